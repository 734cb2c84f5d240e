//! # Virtual Memory Manager
//!
//! Owns the active 4-level hierarchy: maps, unmaps and resolves single 4 KiB
//! pages, takes table frames from the frame allocator, and switches the
//! active root.
//!
//! Every change to a leaf is followed by a TLB invalidation of that page.
//! Running out of frames while building table levels is fatal; see
//! [`Vmm::walk_or_create`]. Heap growth maps through [`Vmm::try_map`], which
//! reports it instead.

use crate::fatal::fatal;
use crate::frame_alloc::BitmapFrameAlloc;
use kernel_info::memory_map::{MemoryRegion, usable_regions};
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress, align_down, align_up,
};
use kernel_vmem::{
    AddressSpace, FrameAlloc, PageEntryBits, PhysMapper, TranslationControl, WalkError,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    #[error("{va} is covered by a large page")]
    LargePage { va: VirtualAddress },
    #[error("range {start}+{len:#x} overflows the address space")]
    InvalidRange { start: PhysicalAddress, len: u64 },
    #[error(transparent)]
    Walk(WalkError),
}

impl From<WalkError> for VmmError {
    fn from(value: WalkError) -> Self {
        Self::Walk(value)
    }
}

pub struct Vmm<M: PhysMapper, T: TranslationControl> {
    mapper: M,
    control: T,
    root: PhysicalPage<Size4K>,
}

impl<M: PhysMapper, T: TranslationControl> Vmm<M, T> {
    /// Adopt whatever hierarchy is currently active.
    pub fn from_active(mapper: M, control: T) -> Self {
        let root = control.active_root();
        Self {
            mapper,
            control,
            root,
        }
    }

    /// Build the kernel's own hierarchy and switch to it.
    ///
    /// 1. Allocate a fresh root table.
    /// 2. Copy the upper half (entries 256..512) of the active root, keeping
    ///    the kernel image and the direct map reachable.
    /// 3. Identity-map every usable region, writable.
    /// 4. Identity-map the frame allocator's bitmap.
    /// 5. Load the new root.
    ///
    /// The new hierarchy must resolve everything before step 5, or the
    /// switch itself faults.
    ///
    /// # Safety
    /// - The active root must be a valid hierarchy reachable through `mapper`.
    /// - Code and stack must live in the upper half.
    ///
    /// # Errors
    /// [`VmmError::LargePage`] if a usable region collides with a large page
    /// in the copied upper half.
    pub unsafe fn init(
        mapper: M,
        control: T,
        regions: &[MemoryRegion],
        frames: &mut BitmapFrameAlloc,
    ) -> Result<Self, VmmError> {
        let boot_root = control.active_root();

        let root = match AddressSpace::new_empty(&mapper, frames) {
            Ok(space) => space.root_page(),
            Err(e) => fatal(format_args!("VMM: cannot allocate root table: {e}")),
        };
        AddressSpace::from_root(&mapper, root).copy_upper_half_from(boot_root);

        let mut vmm = Self {
            mapper,
            control,
            root,
        };

        for region in usable_regions(regions).filter_map(MemoryRegion::page_aligned) {
            vmm.identity_map_range(frames, region.base, region.length, PageEntryBits::kernel_rw())?;
        }

        let bitmap = frames.bitmap_range();
        let bitmap_len = bitmap.end.as_u64() - bitmap.start.as_u64();
        vmm.identity_map_range(frames, bitmap.start, bitmap_len, PageEntryBits::kernel_rw())?;

        unsafe { vmm.switch(root) };
        log::debug!("VMM switched from boot root {boot_root} to {root}");
        Ok(vmm)
    }

    #[inline]
    const fn space(&self) -> AddressSpace<'_, M> {
        AddressSpace::from_root(&self.mapper, self.root)
    }

    /// Root table of the active hierarchy.
    #[inline]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    pub const fn control(&self) -> &T {
        &self.control
    }

    /// Leaf entry for `va`, or `None` if an intermediate level is missing.
    ///
    /// The entry itself may be non-present.
    #[allow(clippy::mut_from_ref)]
    pub fn walk(&self, va: VirtualAddress) -> Option<&mut PageEntryBits> {
        self.space().walk(va).ok()
    }

    /// Leaf entry for `va`, creating zeroed present + writable tables on the way.
    ///
    /// Halts if a table frame cannot be allocated: a kernel that cannot grow
    /// its own page tables cannot make progress.
    ///
    /// # Errors
    /// [`VmmError::LargePage`] if `va` lies inside a 1 GiB or 2 MiB mapping.
    #[allow(clippy::mut_from_ref)]
    pub fn walk_or_create<A: FrameAlloc>(
        &self,
        frames: &mut A,
        va: VirtualAddress,
    ) -> Result<&mut PageEntryBits, VmmError> {
        match self.space().walk_or_create(frames, va) {
            Ok(entry) => Ok(entry),
            Err(WalkError::OutOfMemory { level }) => fatal(format_args!(
                "VMM: out of frames for a table below {level} while mapping {va}"
            )),
            Err(WalkError::LargePage { .. }) => Err(VmmError::LargePage { va }),
            Err(e) => Err(e.into()),
        }
    }

    /// Map the 4 KiB page at `va` to the frame containing `pa`.
    ///
    /// Installs `(pa & ADDRESS_MASK) | flags | PRESENT` over whatever the leaf
    /// held, then invalidates `va`.
    ///
    /// # Errors
    /// See [`walk_or_create`](Self::walk_or_create).
    pub fn map<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let entry = self.walk_or_create(frames, va)?;
        *entry = PageEntryBits::leaf(pa, flags);
        self.control.invalidate(va);
        Ok(())
    }

    /// Like [`map`](Self::map), but running out of table frames is an error.
    ///
    /// Tables created before the allocator ran dry stay linked.
    ///
    /// # Errors
    /// - [`VmmError::Walk`] with [`WalkError::OutOfMemory`] if a table frame
    ///   cannot be allocated.
    /// - [`VmmError::LargePage`] if `va` lies inside a 1 GiB or 2 MiB mapping.
    pub fn try_map<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        match self.space().map_one(frames, va, pa, flags) {
            Ok(()) => {
                self.control.invalidate(va);
                Ok(())
            }
            Err(WalkError::LargePage { .. }) => Err(VmmError::LargePage { va }),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the mapping of the page at `va`.
    ///
    /// Returns the frame that was mapped; `None` (and no invalidation) if
    /// nothing was. The frame is not returned to the allocator.
    pub fn unmap(&mut self, va: VirtualAddress) -> Option<PhysicalPage<Size4K>> {
        let frame = self.space().unmap_one(va)?;
        self.control.invalidate(va);
        Some(frame)
    }

    /// Physical address `va` translates to, preserving the in-page offset.
    #[must_use]
    pub fn resolve(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.space().query(va)
    }

    /// Map `[start, start + len)` onto itself, page by page.
    ///
    /// The range is widened to whole pages.
    ///
    /// # Errors
    /// [`VmmError::InvalidRange`] if the range wraps; otherwise as [`map`](Self::map).
    pub fn identity_map_range<A: FrameAlloc>(
        &mut self,
        frames: &mut A,
        start: PhysicalAddress,
        len: u64,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        let invalid = VmmError::InvalidRange { start, len };
        let end = start.as_u64().checked_add(len).ok_or(invalid)?;
        let end = align_up(end, Size4K::SIZE).ok_or(invalid)?;

        let mut addr = align_down(start.as_u64(), Size4K::SIZE);
        let mut pages = 0u64;
        while addr < end {
            self.map(frames, VirtualAddress::new(addr), PhysicalAddress::new(addr), flags)?;
            addr += Size4K::SIZE;
            pages += 1;
        }

        log::trace!("VMM identity-mapped {pages} page(s) at {start}");
        Ok(())
    }

    /// Install `root` as the active hierarchy.
    ///
    /// # Safety
    /// `root` must map the executing code, the stack and the direct map.
    pub unsafe fn switch(&mut self, root: PhysicalPage<Size4K>) {
        unsafe { self.control.load_root(root) };
        self.root = root;
    }

    /// Drop every non-global cached translation.
    pub fn flush_all(&self) {
        self.control.flush_all();
    }
}
