//! # Address Space (x86-64, PML4-rooted)
//!
//! A handle to one 4-level hierarchy. Tables are reached through a
//! [`PhysMapper`]; new intermediate tables come from a [`FrameAlloc`].
//!
//! - [`AddressSpace::walk`] finds the leaf entry for a VA without creating
//!   anything; [`AddressSpace::walk_or_create`] allocates missing levels.
//! - [`AddressSpace::map_one`] / [`AddressSpace::unmap_one`] edit one 4 KiB leaf.
//! - [`AddressSpace::query`] translates a VA (1 GiB and 2 MiB leaves included).
//!
//! None of these touch the TLB; the caller owns invalidation.

use crate::page_table::{ENTRIES_PER_TABLE, TableLevel, UPPER_HALF_FIRST_INDEX};
use crate::{FrameAlloc, PageEntryBits, PageTable, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum WalkError {
    #[error("no {level} entry for the address")]
    NotPresent { level: TableLevel },
    #[error("out of frames while creating a {level} entry")]
    OutOfMemory { level: TableLevel },
    #[error("{level} entry maps a large page at {base}")]
    LargePage {
        level: TableLevel,
        base: PhysicalAddress,
    },
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Allocate and zero a fresh root table.
    ///
    /// # Errors
    /// [`WalkError::OutOfMemory`] if no frame is available.
    pub fn new_empty<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, WalkError> {
        let root = alloc.alloc_4k().ok_or(WalkError::OutOfMemory {
            level: TableLevel::Root,
        })?;
        unsafe { mapper.table_mut(root).zero() };
        Ok(Self::from_root(mapper, root))
    }

    /// Physical page of the PML4.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn table(&self, page: PhysicalPage<Size4K>) -> &'m mut PageTable {
        // Every page handed in here was installed as a table by this module
        // or by the boot collaborator.
        unsafe { self.mapper.table_mut(page) }
    }

    /// Copy root entries `256..512` from `source` into this root table.
    ///
    /// The new hierarchy then shares every upper-half table with `source`.
    pub fn copy_upper_half_from(&self, source: PhysicalPage<Size4K>) {
        let src = self.table(source);
        let dst = self.table(self.root);
        for i in UPPER_HALF_FIRST_INDEX..ENTRIES_PER_TABLE {
            dst.set(i, src.get(i));
        }
    }

    /// Leaf entry for `va`, without creating anything.
    ///
    /// The returned entry may itself be non-present.
    ///
    /// # Errors
    /// - [`WalkError::NotPresent`] if an intermediate level is missing.
    /// - [`WalkError::LargePage`] if the walk ends early at a 1 GiB or 2 MiB leaf.
    #[allow(clippy::mut_from_ref)]
    pub fn walk(&self, va: VirtualAddress) -> Result<&'m mut PageEntryBits, WalkError> {
        self.walk_with(va, |level| Err(WalkError::NotPresent { level }))
    }

    /// Leaf entry for `va`, allocating zeroed tables for missing levels.
    ///
    /// New levels are linked present + writable.
    ///
    /// # Errors
    /// - [`WalkError::OutOfMemory`] if `alloc` runs dry. Levels created before
    ///   that point stay linked.
    /// - [`WalkError::LargePage`] as for [`walk`](Self::walk).
    #[allow(clippy::mut_from_ref)]
    pub fn walk_or_create<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<&'m mut PageEntryBits, WalkError> {
        self.walk_with(va, |level| {
            let frame = alloc.alloc_4k().ok_or(WalkError::OutOfMemory { level })?;
            log::trace!("New table below {level} for {va} in frame {frame}");
            Ok(frame)
        })
    }

    #[allow(clippy::mut_from_ref)]
    fn walk_with<F>(
        &self,
        va: VirtualAddress,
        mut on_missing: F,
    ) -> Result<&'m mut PageEntryBits, WalkError>
    where
        F: FnMut(TableLevel) -> Result<PhysicalPage<Size4K>, WalkError>,
    {
        let mut table = self.table(self.root);
        for level in TableLevel::NON_LEAF {
            let entry = table.entry_mut(level.index_of(va));
            if !entry.present() {
                let frame = on_missing(level)?;
                self.table(frame).zero();
                *entry = PageEntryBits::table_link(frame);
            } else if entry.large_page() && level != TableLevel::Root {
                let mask = !(level.coverage() - 1);
                let base = PhysicalAddress::new(entry.physical_address().as_u64() & mask);
                return Err(WalkError::LargePage { level, base });
            }

            let next = entry.physical_page();
            table = self.table(next);
        }

        Ok(table.entry_mut(TableLevel::Leaf.index_of(va)))
    }

    /// Map **one** 4 KiB page at `va → pa`.
    ///
    /// Writes `(pa & ADDRESS_MASK) | flags | PRESENT`, replacing whatever the
    /// leaf held. Address bits inside `flags` are ignored.
    ///
    /// # Errors
    /// Propagates [`walk_or_create`](Self::walk_or_create) failures.
    pub fn map_one<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), WalkError> {
        let entry = self.walk_or_create(alloc, va)?;
        *entry = PageEntryBits::leaf(pa, flags);
        Ok(())
    }

    /// Clear the 4 KiB leaf at `va`.
    ///
    /// Returns the frame that was mapped, or `None` if nothing was.
    pub fn unmap_one(&self, va: VirtualAddress) -> Option<PhysicalPage<Size4K>> {
        let entry = self.walk(va).ok()?;
        if !entry.present() {
            return None;
        }

        let frame = entry.physical_page();
        *entry = PageEntryBits::new();
        Some(frame)
    }

    /// Translate `va` to the physical address it maps to, if any.
    ///
    /// The in-page offset of `va` is preserved.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        match self.walk(va) {
            Ok(entry) if entry.present() => Some(entry.physical_page().join(va.offset::<Size4K>())),
            Ok(_) | Err(WalkError::NotPresent { .. } | WalkError::OutOfMemory { .. }) => None,
            Err(WalkError::LargePage { level, base }) => {
                Some(base + (va.as_u64() & (level.coverage() - 1)))
            }
        }
    }
}
