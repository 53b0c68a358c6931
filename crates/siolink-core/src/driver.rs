use crate::hardware::{InterruptSink, Irq};
use crate::serial::SioMode;

/// A pluggable handler for one physical link mode.
///
/// Every hook is optional. A driver that leaves `write_register` at its default
/// lets the serial unit apply its built-in register behavior instead.
pub trait SioDriver: Send {
    /// Called once when the driver is installed. Returning `false` aborts the
    /// installation; `deinit` is called before the driver is dropped.
    fn init(&mut self) -> bool {
        true
    }

    /// Called once when the driver is removed or the serial unit is torn down.
    fn deinit(&mut self) {}

    /// The link mode served by this driver became active.
    fn load(&mut self) {}

    /// The link mode served by this driver is no longer active.
    fn unload(&mut self) {}

    /// Handle a register write while this driver is active.
    ///
    /// Returns the value to latch, or `None` to leave the write to the
    /// built-in behavior.
    fn write_register(&mut self, bus: &mut DriverBus<'_>, address: u32, value: u16) -> Option<u16> {
        let _ = (bus, address, value);
        None
    }
}

/// What an active driver can see of, and do to, the serial unit that owns it.
pub struct DriverBus<'a> {
    pub(crate) mode: SioMode,
    pub(crate) rcnt: u16,
    pub(crate) siocnt: u16,
    pub(crate) irq: &'a mut dyn InterruptSink,
}

impl DriverBus<'_> {
    pub fn mode(&self) -> SioMode {
        self.mode
    }

    pub fn rcnt(&self) -> u16 {
        self.rcnt
    }

    pub fn siocnt(&self) -> u16 {
        self.siocnt
    }

    pub fn raise_irq(&mut self, irq: Irq) {
        self.irq.raise_irq(irq);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The three driver slots of the serial unit.
pub enum DriverSlot {
    Normal = 0,
    Multiplayer = 1,
    Joybus = 2,
}

impl DriverSlot {
    pub const ALL: [DriverSlot; 3] = [DriverSlot::Normal, DriverSlot::Multiplayer, DriverSlot::Joybus];

    /// The slot serving `mode`. UART and general-purpose modes have none.
    pub const fn for_mode(mode: SioMode) -> Option<DriverSlot> {
        match mode {
            SioMode::Normal8 | SioMode::Normal32 => Some(DriverSlot::Normal),
            SioMode::Multiplayer => Some(DriverSlot::Multiplayer),
            SioMode::Joybus => Some(DriverSlot::Joybus),
            SioMode::Uart | SioMode::Gpio => None,
        }
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// One driver per slot, installed together with `SioContext::set_driver_set`.
#[derive(Default)]
pub struct DriverSet {
    pub normal: Option<Box<dyn SioDriver>>,
    pub multiplayer: Option<Box<dyn SioDriver>>,
    pub joybus: Option<Box<dyn SioDriver>>,
}
