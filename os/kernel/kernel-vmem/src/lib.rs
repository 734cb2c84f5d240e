//! # Virtual Memory Support
//!
//! x86-64 4-level paging for the kernel.
//!
//! ## What you get
//! - [`PageEntryBits`], the bit-exact entry layout shared by all levels.
//! - A 4 KiB-aligned [`PageTable`] wrapper and the [`TableLevel`] index helpers.
//! - [`AddressSpace`], a handle to one hierarchy that walks, maps, unmaps and
//!   translates.
//! - The seams the hierarchy talks through: [`FrameAlloc`] for table frames,
//!   [`PhysMapper`] to reach physical memory, and [`TranslationControl`] for
//!   CR3 and the TLB.
//!
//! ## x86-64 Virtual Address → Physical Address Walk
//!
//! Each 48-bit virtual address is divided into five fields:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! The CPU uses these fields as **indices** into four levels of page tables,
//! each level containing 512 (2⁹) entries of 8 bytes each.
//!
//! ```text
//!  PML4  →  PDPT  →  PD  →  PT  →  Physical Page
//!   │        │        │        │
//!   │        │        │        └───► PTE   → maps 4 KiB page
//!   │        │        └────────────► PDE   → PS=1 → 2 MiB page
//!   │        └─────────────────────► PDPTE → PS=1 → 1 GiB page
//!   └──────────────────────────────► PML4E
//! ```
//!
//! This kernel only ever creates 4 KiB leaves. Large pages installed by the
//! boot collaborator are honored when translating but never split.
//!
//! Tables are never reached through their own architected translation; every
//! table access goes through the [`PhysMapper`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod address_space;
mod page_entry;
mod page_table;
mod translation;

pub use crate::address_space::{AddressSpace, WalkError};
pub use crate::page_entry::{ADDRESS_MASK, PageEntryBits};
pub use crate::page_table::{
    ENTRIES_PER_TABLE, PageTable, TableLevel, UPPER_HALF_FIRST_INDEX, split_indices,
};
#[cfg(target_arch = "x86_64")]
pub use crate::translation::Cr3Control;
pub use crate::translation::TranslationControl;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Source of **physical** 4 KiB frames for page tables (and anything else
/// that needs whole frames).
///
/// Returned frames must be 4 KiB aligned. `None` means out of memory.
pub trait FrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame. Frames the allocator does not manage are ignored.
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

/// Converts physical addresses to usable pointers in the current virtual
/// address space.
///
/// The kernel uses the boot-provided direct map, which adds a constant
/// offset; tests map onto host buffers.
pub trait PhysMapper {
    /// Kernel-accessible virtual address of `pa`.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Reference to the `T` stored at `pa`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable through this mapper for `'a`.
    /// - The bytes at `pa` must be a valid, suitably aligned `T`.
    /// - No other live reference may alias it.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_virt(pa).as_mut_ptr::<T>() }
    }

    /// Borrow the page table held in `page`.
    ///
    /// # Safety
    /// `page` must hold a page table (or be about to be zeroed into one).
    #[inline]
    unsafe fn table_mut<'a>(&self, page: PhysicalPage<Size4K>) -> &'a mut PageTable {
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }
}

impl<M: PhysMapper> PhysMapper for &M {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).phys_to_virt(pa)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::vec::Vec;

    /// A 4 KiB-aligned raw frame of simulated physical RAM.
    #[repr(C, align(4096))]
    pub struct Aligned4K([u8; 4096]);

    /// Simulated physical memory starting at physical address 0.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut frames = Vec::with_capacity(n);
            frames.resize_with(n, || Aligned4K([0u8; 4096]));
            Self { frames }
        }
    }

    impl PhysMapper for TestPhys {
        fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
            let idx = usize::try_from(pa.as_u64() >> 12).unwrap();
            assert!(idx < self.frames.len(), "{pa} outside simulated RAM");
            VirtualAddress::from_ptr(self.frames.as_ptr()) + pa.as_u64()
        }
    }

    /// Hands out the next 4 KiB frame; reuses nothing.
    pub struct BumpAlloc {
        next: u64,
        end: u64,
        pub freed: Vec<PhysicalPage<Size4K>>,
    }

    impl BumpAlloc {
        pub fn new(start: u64, end: u64) -> Self {
            Self {
                next: start,
                end,
                freed: Vec::new(),
            }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next + 4096 > self.end {
                return None;
            }
            let p = self.next;
            self.next += 4096;
            Some(PhysicalPage::from_addr(PhysicalAddress::new(p)))
        }

        fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
            self.freed.push(page);
        }
    }
}
