use log::{debug, error, trace};
use thiserror::Error;

use crate::driver::{DriverBus, DriverSet, DriverSlot, SioDriver};
use crate::hardware::{
    InterruptSink, Irq, RCNT_INITIAL, RCNT_MODE_MASK, REG_RCNT, REG_SIOCNT, SIOCNT_INTERNAL_CLOCK,
    SIOCNT_IRQ_ENABLE, SIOCNT_MODE_MASK, SIOCNT_MULTI_FORCED, SIOCNT_MULTI_WRITABLE,
    SIOCNT_SI_READY, SIOCNT_START, cycles_per_transfer,
};

const LOG_TARGET: &str = "gba.sio";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Physical link mode, numbered by its RCNT/SIOCNT selector value.
pub enum SioMode {
    Normal8 = 0,
    Normal32 = 1,
    Multiplayer = 2,
    Uart = 3,
    Gpio = 8,
    Joybus = 12,
}

impl SioMode {
    /// Decodes the link mode selected by the two control registers.
    ///
    /// RCNT bits 14-15 sit above SIOCNT bits 12-13 in a 4-bit selector. While
    /// RCNT bit 15 is clear the SIOCNT bits pick one of the four serial modes;
    /// once it is set RCNT bit 14 alone picks general-purpose or JOY Bus.
    pub const fn from_registers(rcnt: u16, siocnt: u16) -> SioMode {
        let selector = ((rcnt & RCNT_MODE_MASK) | (siocnt & SIOCNT_MODE_MASK)) >> 12;
        if selector < 8 {
            match selector & 0x3 {
                0 => SioMode::Normal8,
                1 => SioMode::Normal32,
                2 => SioMode::Multiplayer,
                _ => SioMode::Uart,
            }
        } else if selector & 0xC == 0xC {
            SioMode::Joybus
        } else {
            SioMode::Gpio
        }
    }

    #[inline]
    pub const fn is_normal(self) -> bool {
        matches!(self, SioMode::Normal8 | SioMode::Normal32)
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SioError {
    #[error("no SIO driver slot serves link mode {0:?}")]
    UnsupportedMode(SioMode),

    #[error("{0:?} SIO driver failed to initialize")]
    DriverInitFailed(DriverSlot),
}

/// The serial unit's link-mode state: RCNT/SIOCNT, the derived mode and the
/// driver installed for each mode.
///
/// The active driver is never chosen directly. It is re-derived from the
/// control registers on every write, so it always matches [`SioContext::mode`].
pub struct SioContext {
    rcnt: u16,
    siocnt: u16,
    mode: Option<SioMode>,
    active: Option<DriverSlot>,
    drivers: [Option<Box<dyn SioDriver>>; 3],
}

impl SioContext {
    pub fn new() -> Self {
        let mut sio = Self {
            rcnt: RCNT_INITIAL,
            siocnt: 0,
            mode: None,
            active: None,
            drivers: [None, None, None],
        };
        sio.switch_mode();
        sio
    }

    pub fn rcnt(&self) -> u16 {
        self.rcnt
    }

    pub fn siocnt(&self) -> u16 {
        self.siocnt
    }

    /// Current link mode. `None` only between a reset and the next derivation.
    pub fn mode(&self) -> Option<SioMode> {
        self.mode
    }

    /// Slot whose driver (if installed) is currently active.
    pub fn active_slot(&self) -> Option<DriverSlot> {
        self.active
    }

    pub fn has_driver(&self, slot: DriverSlot) -> bool {
        self.drivers[slot.index()].is_some()
    }

    /// Returns the registers to their power-on values.
    ///
    /// Installed drivers survive; the driver for the power-on mode is loaded
    /// again if there is one.
    pub fn reset(&mut self) {
        if let Some(driver) = self.active_driver_mut() {
            driver.unload();
        }
        self.rcnt = RCNT_INITIAL;
        self.siocnt = 0;
        self.mode = None;
        self.active = None;
        self.switch_mode();
    }

    /// Installs `driver` into the slot serving `mode`, or empties the slot
    /// when `driver` is `None`.
    ///
    /// The replaced driver is unloaded (when active), deinitialized and handed
    /// back. If the incoming driver fails to initialize the slot is left as it
    /// was.
    pub fn set_driver(
        &mut self,
        driver: Option<Box<dyn SioDriver>>,
        mode: SioMode,
    ) -> Result<Option<Box<dyn SioDriver>>, SioError> {
        let Some(slot) = DriverSlot::for_mode(mode) else {
            error!(target: LOG_TARGET, "Setting an unsupported SIO driver: {mode:?}");
            return Err(SioError::UnsupportedMode(mode));
        };

        let mut driver = driver;
        if let Some(incoming) = driver.as_mut() {
            if !incoming.init() {
                incoming.deinit();
                error!(target: LOG_TARGET, "Could not initialize {slot:?} SIO driver");
                return Err(SioError::DriverInitFailed(slot));
            }
        }

        let is_active = self.active == Some(slot);
        let mut previous = self.drivers[slot.index()].take();
        if let Some(outgoing) = previous.as_mut() {
            if is_active {
                outgoing.unload();
            }
            outgoing.deinit();
        }

        self.drivers[slot.index()] = driver;
        if is_active {
            if let Some(incoming) = self.drivers[slot.index()].as_mut() {
                incoming.load();
            }
        }

        debug!(
            target: LOG_TARGET,
            "{slot:?} driver {}",
            if self.has_driver(slot) { "installed" } else { "removed" }
        );
        Ok(previous)
    }

    /// Installs all three drivers, stopping at the first failure.
    pub fn set_driver_set(&mut self, drivers: DriverSet) -> Result<DriverSet, SioError> {
        Ok(DriverSet {
            normal: self.set_driver(drivers.normal, SioMode::Normal8)?,
            multiplayer: self.set_driver(drivers.multiplayer, SioMode::Multiplayer)?,
            joybus: self.set_driver(drivers.joybus, SioMode::Joybus)?,
        })
    }

    /// Unloads the active driver and deinitializes every installed driver.
    pub fn deinit(&mut self) {
        if let Some(driver) = self.active_driver_mut() {
            driver.unload();
        }
        self.active = None;
        for slot in [DriverSlot::Multiplayer, DriverSlot::Joybus, DriverSlot::Normal] {
            if let Some(mut driver) = self.drivers[slot.index()].take() {
                driver.deinit();
            }
        }
    }

    pub fn write_rcnt(&mut self, value: u16, irq: &mut dyn InterruptSink) {
        self.rcnt = (self.rcnt & 0xF) | (value & !0xF);
        self.switch_mode();
        let _ = self.forward_write(REG_RCNT, value, irq);
    }

    /// Writes SIOCNT and returns the value the register now holds.
    pub fn write_siocnt(&mut self, value: u16, irq: &mut dyn InterruptSink) -> u16 {
        if (value ^ self.siocnt) & SIOCNT_MODE_MASK != 0 {
            self.siocnt = value & SIOCNT_MODE_MASK;
            self.switch_mode();
        }

        let value = match self.forward_write(REG_SIOCNT, value, irq) {
            Some(value) => value,
            None => self.unattached_siocnt(value, irq),
        };
        self.siocnt = value;
        value
    }

    /// Passes a write to any other serial register through the active driver.
    pub fn write_register(&mut self, address: u32, value: u16, irq: &mut dyn InterruptSink) -> u16 {
        self.forward_write(address, value, irq).unwrap_or(value)
    }

    /// Cycles for one multiplayer transfer at the current baud rate, or `None`
    /// outside multiplayer mode.
    pub fn transfer_cycles(&self, players: usize) -> Option<u32> {
        if self.mode != Some(SioMode::Multiplayer) {
            return None;
        }
        cycles_per_transfer(self.siocnt, players)
    }

    fn switch_mode(&mut self) {
        let mode = SioMode::from_registers(self.rcnt, self.siocnt);
        if self.mode == Some(mode) {
            return;
        }

        if let Some(driver) = self.active_driver_mut() {
            driver.unload();
        }
        debug!(target: LOG_TARGET, "link mode {:?} -> {mode:?}", self.mode);
        self.mode = Some(mode);
        self.active = DriverSlot::for_mode(mode);
        if let Some(driver) = self.active_driver_mut() {
            driver.load();
        }
    }

    fn active_driver_mut(&mut self) -> Option<&mut (dyn SioDriver + 'static)> {
        let slot = self.active?;
        self.drivers[slot.index()].as_deref_mut()
    }

    fn forward_write(&mut self, address: u32, value: u16, irq: &mut dyn InterruptSink) -> Option<u16> {
        let mode = self.mode?;
        let slot = self.active?;
        let mut bus = DriverBus {
            mode,
            rcnt: self.rcnt,
            siocnt: self.siocnt,
            irq,
        };
        let driver = self.drivers[slot.index()].as_deref_mut()?;
        driver.write_register(&mut bus, address, value)
    }

    /// SIOCNT behavior with no cable attached.
    fn unattached_siocnt(&self, mut value: u16, irq: &mut dyn InterruptSink) -> u16 {
        match self.mode {
            Some(SioMode::Normal8 | SioMode::Normal32) => {
                value |= SIOCNT_SI_READY;
                if value & (SIOCNT_START | SIOCNT_INTERNAL_CLOCK)
                    == SIOCNT_START | SIOCNT_INTERNAL_CLOCK
                {
                    // An internally clocked transfer with nobody listening
                    // finishes at once.
                    // TODO: verify the immediate IRQ against hardware.
                    if value & SIOCNT_IRQ_ENABLE != 0 {
                        trace!(target: LOG_TARGET, "unattached normal transfer raised IRQ");
                        irq.raise_irq(Irq::Serial);
                    }
                    value &= !SIOCNT_START;
                }
            }
            Some(SioMode::Multiplayer) => {
                value &= SIOCNT_MULTI_WRITABLE;
                value |= SIOCNT_MULTI_FORCED;
            }
            // UART, general-purpose and JOY Bus are passed through untouched.
            _ => {}
        }
        value
    }
}

impl Default for SioContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SioContext {
    fn drop(&mut self) {
        self.deinit();
    }
}
