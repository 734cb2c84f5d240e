//! # Direct-map `PhysMapper`
//!
//! The boot collaborator maps all physical memory at a constant offset before
//! the kernel runs. Physical address `p` is then reachable at `offset + p`,
//! which is all the memory core needs to touch page tables and the frame
//! bitmap before any heap exists.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::DirectMapPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let mapper = DirectMapPhysMapper::new(0xffff_8000_0000_0000);
//! let va = mapper.phys_to_virt(PhysicalAddress::new(0x1234_0000));
//! assert_eq!(va.as_u64(), 0xffff_8000_1234_0000);
//! ```

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] over the boot-provided direct map.
///
/// The offset is added with wrapping arithmetic, so host tests can use a
/// "negative" offset to point low physical addresses at a heap buffer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DirectMapPhysMapper {
    offset: u64,
}

impl DirectMapPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Inverse of [`phys_to_virt`](PhysMapper::phys_to_virt) for addresses inside the direct map.
    #[must_use]
    pub const fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset))
    }
}

impl PhysMapper for DirectMapPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(self.offset.wrapping_add(pa.as_u64()))
    }
}
