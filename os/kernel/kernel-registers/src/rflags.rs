use bitfield_struct::bitfield;

/// RFLAGS, reduced to what the kernel inspects.
///
/// Only the interrupt-enable flag is named; the arithmetic flags are kept
/// as opaque bit groups so a loaded value round-trips unchanged.
#[bitfield(u64)]
pub struct Rflags {
    /// Bits 0–8: CF, reserved-1, PF, AF, ZF, SF, TF.
    #[bits(9)]
    pub low_flags: u16,

    /// Bit 9, IF: maskable hardware interrupts are delivered.
    pub interrupts_enabled: bool,

    /// Bits 10–63: DF, OF, IOPL, NT, RF, VM, AC, VIF, VIP, ID, reserved.
    #[bits(54)]
    pub high_flags: u64,
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegister for Rflags {
    #[inline]
    fn load() -> Self {
        let r: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) r, options(nomem, preserves_flags));
        }
        Self::from_bits(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_flag_is_bit_nine() {
        let f = Rflags::from_bits(0x202);
        assert!(f.interrupts_enabled());
        assert_eq!(f.low_flags(), 0x002);

        let f = Rflags::from_bits(0x002);
        assert!(!f.interrupts_enabled());
    }
}
