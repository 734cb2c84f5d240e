use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// CR3: root translation table register (4-level paging, PCID disabled).
///
/// Holds the physical base of the active root table. Writing CR3 switches
/// address spaces and flushes all non-global TLB entries.
#[bitfield(u64)]
pub struct Cr3 {
    /// Bits 0–2: reserved.
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3: PWT, write-through caching for root table accesses.
    pub pwt: bool,

    /// Bit 4: PCD, caching disabled for root table accesses.
    pub pcd: bool,

    /// Bits 5–11: reserved.
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–51: root table physical base >> 12.
    #[bits(40)]
    root_base_4k: u64,

    /// Bits 52–63: reserved.
    #[bits(12)]
    pub reserved2: u16,
}

impl Cr3 {
    /// Build a CR3 value pointing at the given root table.
    ///
    /// `root_phys` must be 4 KiB-aligned.
    #[must_use]
    pub fn from_root_phys(root_phys: PhysicalAddress) -> Self {
        debug_assert_eq!(
            root_phys.as_u64() & 0xFFF,
            0,
            "root table must be 4K-aligned"
        );
        Self::new().with_root_base_4k(root_phys.as_u64() >> 12)
    }

    /// Physical address of the root table.
    #[must_use]
    pub fn root_phys(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.root_base_4k() << 12)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_round_trips() {
        let cr3 = Cr3::from_root_phys(PhysicalAddress::new(0x0012_3000));
        assert_eq!(cr3.into_bits(), 0x0012_3000);
        assert_eq!(cr3.root_phys().as_u64(), 0x0012_3000);
    }

    #[test]
    fn flag_bits_do_not_leak_into_root() {
        let cr3 = Cr3::from_bits(0x0045_6018);
        assert!(cr3.pwt());
        assert!(cr3.pcd());
        assert_eq!(cr3.root_phys().as_u64(), 0x0045_6000);
    }
}
