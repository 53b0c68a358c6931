use log::trace;

use crate::hardware::{
    InterruptSink, REG_RCNT, REG_SIOCNT, REG_SIODATA8, SIO_REGISTER_FIRST, SIO_REGISTER_LAST,
};
use crate::relay::{RelayConfig, RelayConnector, RelayEngine};
use crate::serial::SioContext;

const IO_HALFWORDS: usize = ((SIO_REGISTER_LAST - SIO_REGISTER_FIRST) / 2) as usize;

/// The serial register block as the memory bus sees it.
///
/// Control registers go to the link-mode logic, SIODATA8 goes to the relay
/// regardless of link mode, and every other register in the block goes
/// through the active driver and is latched for read-back.
pub struct SioPort {
    pub serial: SioContext,
    pub relay: RelayEngine,
    io: [u16; IO_HALFWORDS],
}

impl SioPort {
    pub fn new(connector: Box<dyn RelayConnector>, config: RelayConfig) -> Self {
        Self {
            serial: SioContext::new(),
            relay: RelayEngine::new(connector, config),
            io: [0; IO_HALFWORDS],
        }
    }

    /// Resets the control registers. The relay keeps its connection.
    pub fn reset(&mut self) {
        self.serial.reset();
        self.io = [0; IO_HALFWORDS];
    }

    pub fn write16(&mut self, address: u32, value: u16, irq: &mut dyn InterruptSink) {
        trace!(target: "gba.sio", "write 0x{address:08X} <- 0x{value:04X}");
        match address {
            REG_RCNT => self.serial.write_rcnt(value, irq),
            REG_SIOCNT => {
                self.serial.write_siocnt(value, irq);
            }
            REG_SIODATA8 => self.relay.write(value),
            _ => {
                let Some(index) = io_index(address) else {
                    return;
                };
                self.io[index] = self.serial.write_register(address, value, irq);
            }
        }
    }

    pub fn read16(&mut self, address: u32) -> u16 {
        match address {
            REG_RCNT => self.serial.rcnt(),
            REG_SIOCNT => self.serial.siocnt(),
            REG_SIODATA8 => self.relay.read(),
            _ => io_index(address).map_or(0, |index| self.io[index]),
        }
    }
}

fn io_index(address: u32) -> Option<usize> {
    if !(SIO_REGISTER_FIRST..SIO_REGISTER_LAST).contains(&address) {
        return None;
    }
    Some(((address - SIO_REGISTER_FIRST) / 2) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{REG_JOYCNT, REG_SIOMULTI1};
    use crate::relay::{NO_DATA, NullConnector, TransferMode};
    use crate::serial::SioMode;

    fn port() -> SioPort {
        SioPort::new(Box::new(NullConnector), RelayConfig::default())
    }

    #[test]
    fn control_registers_route_to_link_logic() {
        let mut port = port();
        let mut if_reg = 0u16;
        port.write16(REG_RCNT, 0x0000, &mut if_reg);
        port.write16(REG_SIOCNT, 0x2000, &mut if_reg);
        assert_eq!(port.serial.mode(), Some(SioMode::Multiplayer));
        assert_eq!(port.read16(REG_SIOCNT), 0x200C);
        assert_eq!(port.read16(REG_RCNT), 0x0000);
    }

    #[test]
    fn data_register_reaches_relay_in_every_link_mode() {
        let mut port = port();
        let mut if_reg = 0u16;
        port.write16(REG_RCNT, 0xC000, &mut if_reg);
        assert_eq!(port.serial.mode(), Some(SioMode::Joybus));
        port.write16(REG_SIODATA8, 0x89, &mut if_reg);
        assert_eq!(port.relay.mode(), TransferMode::Parse);
        assert_eq!(port.read16(REG_SIODATA8), NO_DATA as u16);
    }

    #[test]
    fn other_registers_latch_through_gateway() {
        let mut port = port();
        let mut if_reg = 0u16;
        port.write16(REG_JOYCNT, 0x0040, &mut if_reg);
        port.write16(REG_SIOMULTI1, 0x1234, &mut if_reg);
        assert_eq!(port.read16(REG_JOYCNT), 0x0040);
        assert_eq!(port.read16(REG_SIOMULTI1), 0x1234);
    }

    #[test]
    fn addresses_outside_block_are_ignored() {
        let mut port = port();
        let mut if_reg = 0u16;
        port.write16(0x0400_0200, 0xFFFF, &mut if_reg);
        assert_eq!(port.read16(0x0400_0200), 0);
        assert_eq!(port.read16(0x0400_011E), 0);
    }

    #[test]
    fn reset_restores_power_on_registers() {
        let mut port = port();
        let mut if_reg = 0u16;
        port.write16(REG_RCNT, 0x0000, &mut if_reg);
        port.write16(REG_JOYCNT, 0x0040, &mut if_reg);
        port.reset();
        assert_eq!(port.read16(REG_RCNT), 0x8000);
        assert_eq!(port.read16(REG_JOYCNT), 0);
        assert_eq!(port.serial.mode(), Some(SioMode::Gpio));
    }
}
