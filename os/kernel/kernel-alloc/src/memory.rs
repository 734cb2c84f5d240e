//! # Memory Manager
//!
//! The kernel-context object that owns the frame allocator, the VMM and the
//! heap, and brings them up in dependency order:
//!
//! ```text
//! memory map ──► PFA ──► VMM (tables from the PFA) ──► heap (frames from the PFA, mapped by the VMM)
//! ```

use crate::fatal::fatal;
use crate::frame_alloc::BitmapFrameAlloc;
use crate::heap::{HeapError, HeapGrowth, HeapStats, KernelHeap};
use crate::phys_mapper::DirectMapPhysMapper;
use crate::vmm::{Vmm, VmmError};
use core::ptr::NonNull;
use kernel_info::boot::BootMemoryInfo;
use kernel_info::memory::{KERNEL_HEAP_BASE, KERNEL_HEAP_MAX_SIZE};
use kernel_info::memory_map::{MemoryRegion, total_usable_bytes};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{PageEntryBits, PhysMapper, TranslationControl, WalkError};

/// Where the heap lives and how far it may grow.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HeapConfig {
    pub base: VirtualAddress,
    pub max_size: u64,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            base: VirtualAddress::new(KERNEL_HEAP_BASE),
            max_size: KERNEL_HEAP_MAX_SIZE,
        }
    }
}

/// Grows the heap with frames from the PFA mapped through the VMM.
///
/// A missing table frame fails the growth instead of halting.
struct HeapBacking<'a, M: PhysMapper, T: TranslationControl> {
    frames: &'a mut BitmapFrameAlloc,
    vmm: &'a mut Vmm<M, T>,
}

impl<M: PhysMapper, T: TranslationControl> HeapGrowth for HeapBacking<'_, M, T> {
    fn map_fresh_page(&mut self, page: VirtualAddress) -> Result<(), HeapError> {
        let frame = self.frames.alloc_frame().ok_or(HeapError::OutOfFrames)?;
        match self.vmm.try_map(&mut *self.frames, page, frame, PageEntryBits::kernel_rw_nx()) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.frames.free_frame(frame);
                Err(match e {
                    VmmError::Walk(WalkError::OutOfMemory { .. }) => HeapError::OutOfFrames,
                    e => e.into(),
                })
            }
        }
    }
}

pub struct MemoryManager<M: PhysMapper, T: TranslationControl> {
    frames: BitmapFrameAlloc,
    vmm: Vmm<M, T>,
    heap: KernelHeap,
}

impl<T: TranslationControl> MemoryManager<DirectMapPhysMapper, T> {
    /// Bring up the memory core from the boot hand-off.
    ///
    /// # Safety
    /// See [`init_with`](Self::init_with).
    pub unsafe fn init(boot: BootMemoryInfo<'_>, control: T) -> Self {
        let mapper = DirectMapPhysMapper::new(boot.direct_map_offset);
        unsafe { Self::init_with(boot.regions, mapper, control, HeapConfig::default()) }
    }
}

impl<M: PhysMapper, T: TranslationControl> MemoryManager<M, T> {
    /// Initialize the PFA, then the VMM, then the heap.
    ///
    /// Halts if any stage cannot come up.
    ///
    /// # Safety
    /// - `regions` must describe real RAM, reachable writable through `mapper`.
    /// - `control` must report the boot hierarchy as the active root.
    /// - The heap range in `heap` must be unused and not covered by large pages.
    /// - Must run once, before anything else allocates.
    pub unsafe fn init_with(
        regions: &[MemoryRegion],
        mapper: M,
        control: T,
        heap: HeapConfig,
    ) -> Self {
        let mut frames = unsafe { BitmapFrameAlloc::init(regions, &mapper) };

        let mut vmm = match unsafe { Vmm::init(mapper, control, regions, &mut frames) } {
            Ok(vmm) => vmm,
            Err(e) => fatal(format_args!("VMM: {e}")),
        };

        let mut backing = HeapBacking {
            frames: &mut frames,
            vmm: &mut vmm,
        };
        let heap = match unsafe { KernelHeap::init(heap.base, heap.max_size, &mut backing) } {
            Ok(heap) => heap,
            Err(e) => fatal(format_args!("Heap: {e}")),
        };

        log::debug!(
            "Memory core up: {} KiB usable RAM, {} of {} frames free, heap at {}",
            total_usable_bytes(regions) / 1024,
            frames.free_frames(),
            frames.total_frames(),
            heap.base()
        );
        Self { frames, vmm, heap }
    }

    #[inline]
    fn heap_and_backing(&mut self) -> (&mut KernelHeap, HeapBacking<'_, M, T>) {
        let backing = HeapBacking {
            frames: &mut self.frames,
            vmm: &mut self.vmm,
        };
        (&mut self.heap, backing)
    }

    /// See [`KernelHeap::alloc`].
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let (heap, mut backing) = self.heap_and_backing();
        heap.alloc(size, &mut backing)
    }

    pub fn zalloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let (heap, mut backing) = self.heap_and_backing();
        heap.zalloc(size, &mut backing)
    }

    pub fn calloc(&mut self, count: usize, size: usize) -> Option<NonNull<u8>> {
        let (heap, mut backing) = self.heap_and_backing();
        heap.calloc(count, size, &mut backing)
    }

    /// # Safety
    /// See [`KernelHeap::free`].
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        unsafe { self.heap.free(ptr) }
    }

    pub fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        self.frames.alloc_frame()
    }

    pub fn free_frame(&mut self, addr: PhysicalAddress) {
        self.frames.free_frame(addr);
    }

    pub fn reserve_range(&mut self, phys: PhysicalAddress, length: u64) {
        self.frames.reserve_range(phys, length);
    }

    /// Map one page in the active hierarchy; see [`Vmm::map`].
    ///
    /// # Errors
    /// [`VmmError::LargePage`] if `va` lies inside a large page.
    pub fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), VmmError> {
        self.vmm.map(&mut self.frames, va, pa, flags)
    }

    pub fn unmap(&mut self, va: VirtualAddress) -> Option<PhysicalPage<Size4K>> {
        self.vmm.unmap(va)
    }

    #[must_use]
    pub fn resolve(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.vmm.resolve(va)
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub const fn frames(&self) -> &BitmapFrameAlloc {
        &self.frames
    }

    pub const fn vmm(&self) -> &Vmm<M, T> {
        &self.vmm
    }

    pub const fn heap(&self) -> &KernelHeap {
        &self.heap
    }
}
