/// Serial I/O register block on the system bus.
pub const REG_SIODATA32_LO: u32 = 0x0400_0120;
pub const REG_SIODATA32_HI: u32 = 0x0400_0122;
pub const REG_SIOMULTI0: u32 = 0x0400_0120;
pub const REG_SIOMULTI1: u32 = 0x0400_0122;
pub const REG_SIOMULTI2: u32 = 0x0400_0124;
pub const REG_SIOMULTI3: u32 = 0x0400_0126;
pub const REG_SIOCNT: u32 = 0x0400_0128;
pub const REG_SIOMLT_SEND: u32 = 0x0400_012A;
pub const REG_SIODATA8: u32 = 0x0400_012A;
pub const REG_RCNT: u32 = 0x0400_0134;
pub const REG_JOYCNT: u32 = 0x0400_0140;
pub const REG_JOY_RECV_LO: u32 = 0x0400_0150;
pub const REG_JOY_RECV_HI: u32 = 0x0400_0152;
pub const REG_JOY_TRANS_LO: u32 = 0x0400_0154;
pub const REG_JOY_TRANS_HI: u32 = 0x0400_0156;
pub const REG_JOYSTAT: u32 = 0x0400_0158;

/// First and last halfword of the serial register block.
pub const SIO_REGISTER_FIRST: u32 = REG_SIODATA32_LO;
pub const SIO_REGISTER_LAST: u32 = REG_JOYSTAT + 2;

/// RCNT value after power-on (general-purpose mode selected).
pub const RCNT_INITIAL: u16 = 0x8000;

/// SIOCNT mode-select bits. Combined with the top two RCNT bits they pick the
/// physical link mode.
pub const SIOCNT_MODE_MASK: u16 = 0x3000;
/// RCNT bits that take part in mode selection.
pub const RCNT_MODE_MASK: u16 = 0xC000;

/// Normal mode: shift clock sourced internally.
pub const SIOCNT_INTERNAL_CLOCK: u16 = 0x0001;
/// Normal mode: SI line state. Reads as "ready" when nothing is attached.
pub const SIOCNT_SI_READY: u16 = 0x0004;
/// Start/busy bit.
pub const SIOCNT_START: u16 = 0x0080;
/// Raise the serial interrupt when a transfer completes.
pub const SIOCNT_IRQ_ENABLE: u16 = 0x4000;

/// Multiplayer mode: bits that survive a write when no driver is attached.
pub const SIOCNT_MULTI_WRITABLE: u16 = 0xFF83;
/// Multiplayer mode: SI terminal and SD terminal, both forced high.
pub const SIOCNT_MULTI_FORCED: u16 = 0x000C;

/// Maximum number of consoles on a multiplayer cable.
pub const MAX_GBAS: usize = 4;

/// Cycles spent on one multiplayer transfer, indexed by the SIOCNT baud bits
/// and then by the number of attached consoles minus one.
pub const CYCLES_PER_TRANSFER: [[u32; MAX_GBAS]; 4] = [
    [38326, 73003, 107680, 142356],
    [9582, 18251, 26920, 35589],
    [6388, 12167, 17947, 23726],
    [3194, 6075, 8973, 11863],
];

/// Returns the transfer cost for `baud` (SIOCNT bits 0-1) with `players`
/// consoles attached, or `None` when `players` is outside `1..=MAX_GBAS`.
pub fn cycles_per_transfer(baud: u16, players: usize) -> Option<u32> {
    if players == 0 || players > MAX_GBAS {
        return None;
    }
    Some(CYCLES_PER_TRANSFER[(baud & 0x3) as usize][players - 1])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Interrupt sources, numbered by their bit in the IE/IF registers.
pub enum Irq {
    VBlank = 0,
    HBlank = 1,
    VCounter = 2,
    Timer0 = 3,
    Timer1 = 4,
    Timer2 = 5,
    Timer3 = 6,
    Serial = 7,
    Dma0 = 8,
    Dma1 = 9,
    Dma2 = 10,
    Dma3 = 11,
    Keypad = 12,
    GamePak = 13,
}

impl Irq {
    #[inline]
    pub const fn mask(self) -> u16 {
        1 << self as u16
    }
}

/// The interrupt controller of the machine that owns the serial unit.
pub trait InterruptSink {
    fn raise_irq(&mut self, irq: Irq);
}

/// A bare IF register.
impl InterruptSink for u16 {
    fn raise_irq(&mut self, irq: Irq) {
        *self |= irq.mask();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_irq_sets_bit_seven_of_if() {
        let mut if_reg = 0u16;
        if_reg.raise_irq(Irq::Serial);
        assert_eq!(if_reg, 0x0080);
        if_reg.raise_irq(Irq::VBlank);
        assert_eq!(if_reg, 0x0081);
    }

    #[test]
    fn transfer_cycles_follow_baud_and_player_count() {
        assert_eq!(cycles_per_transfer(0, 1), Some(38326));
        assert_eq!(cycles_per_transfer(3, 4), Some(11863));
        assert_eq!(cycles_per_transfer(0x7, 2), Some(6075));
        assert_eq!(cycles_per_transfer(1, 0), None);
        assert_eq!(cycles_per_transfer(1, 5), None);
    }
}
