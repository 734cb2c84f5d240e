//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame of the largest usable region; a set bit means the
//! frame is allocated or reserved. The bitmap lives at the start of the region
//! it describes and is reached through the direct map, so the allocator works
//! before any heap exists.
//!
//! ```text
//! managed_base                                              managed_end
//! ├──────────────┬──────────────────────────────────────────────────┤
//! │ bitmap pages │ frames handed out by alloc_frame (first fit)     │
//! │ (always set) │                                                  │
//! └──────────────┴──────────────────────────────────────────────────┘
//! ```

use crate::fatal::fatal;
use core::ops::Range;
use kernel_info::memory_map::{MemoryRegion, find_biggest_usable};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{FrameAlloc, PhysMapper};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocInitError {
    #[error("memory map has no usable region")]
    NoUsableRegion,
    #[error("largest usable region {0:?} holds no whole frame")]
    RegionTooSmall(MemoryRegion),
}

pub struct BitmapFrameAlloc {
    bitmap: &'static mut [u8],
    managed_base: PhysicalAddress,
    total_frames: u64,
    free_frames: u64,
    bitmap_frames: u64,
}

impl BitmapFrameAlloc {
    /// Set up the allocator over the largest usable region of `regions`.
    ///
    /// Halts if the memory map has no usable region.
    ///
    /// # Safety
    /// See [`try_init`](Self::try_init).
    pub unsafe fn init<M: PhysMapper>(regions: &[MemoryRegion], mapper: &M) -> Self {
        match unsafe { Self::try_init(regions, mapper) } {
            Ok(pfa) => pfa,
            Err(e) => fatal(format_args!("PFA: {e}")),
        }
    }

    /// Set up the allocator over the largest usable region of `regions`.
    ///
    /// The region is shrunk to whole frames. The bitmap is placed at its start
    /// and every frame it occupies stays marked allocated; every other frame
    /// starts free.
    ///
    /// # Safety
    /// - `regions` must describe real, otherwise unused RAM.
    /// - `mapper` must reach that RAM writable for the rest of the kernel's
    ///   lifetime; the bitmap is borrowed as `'static`.
    /// - At most one allocator may manage a region.
    ///
    /// # Errors
    /// If no usable region exists, or the largest one holds no whole frame.
    pub unsafe fn try_init<M: PhysMapper>(
        regions: &[MemoryRegion],
        mapper: &M,
    ) -> Result<Self, FrameAllocInitError> {
        let biggest = find_biggest_usable(regions).ok_or(FrameAllocInitError::NoUsableRegion)?;
        let region = biggest
            .page_aligned()
            .ok_or(FrameAllocInitError::RegionTooSmall(biggest))?;

        let total_frames = region.frame_count();
        let bitmap_len = total_frames.div_ceil(8);
        let bitmap_frames = bitmap_len.div_ceil(Size4K::SIZE);

        let bitmap = unsafe {
            let ptr = mapper.phys_to_virt(region.base).as_mut_ptr::<u8>();
            core::slice::from_raw_parts_mut(ptr, to_usize(bitmap_len))
        };
        bitmap.fill(0xFF);

        let mut pfa = Self {
            bitmap,
            managed_base: region.base,
            total_frames,
            free_frames: 0,
            bitmap_frames: bitmap_frames.min(total_frames),
        };
        for idx in pfa.bitmap_frames..total_frames {
            pfa.clear_bit(idx);
        }
        pfa.free_frames = total_frames - pfa.bitmap_frames;

        log::debug!(
            "PFA managing {} frames at {}, bitmap {} bytes in {} frame(s), {} free",
            pfa.total_frames,
            pfa.managed_base,
            bitmap_len,
            pfa.bitmap_frames,
            pfa.free_frames
        );
        Ok(pfa)
    }

    #[inline]
    fn test_bit(&self, idx: u64) -> bool {
        self.bitmap[to_usize(idx / 8)] & (1 << (idx % 8)) != 0
    }

    #[inline]
    fn set_bit(&mut self, idx: u64) {
        self.bitmap[to_usize(idx / 8)] |= 1 << (idx % 8);
    }

    #[inline]
    fn clear_bit(&mut self, idx: u64) {
        self.bitmap[to_usize(idx / 8)] &= !(1 << (idx % 8));
    }

    /// Frame index of `addr`, if it lies in the managed region.
    #[inline]
    fn index_of(&self, addr: PhysicalAddress) -> Option<u64> {
        let offset = addr.as_u64().checked_sub(self.managed_base.as_u64())?;
        let idx = offset / Size4K::SIZE;
        (idx < self.total_frames).then_some(idx)
    }

    #[inline]
    const fn frame_at(&self, idx: u64) -> PhysicalAddress {
        PhysicalAddress::new(self.managed_base.as_u64() + idx * Size4K::SIZE)
    }

    /// Allocate the lowest free frame.
    ///
    /// Returns `None` when every frame is taken.
    pub fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        let found = self
            .bitmap
            .iter()
            .enumerate()
            .find(|(_, b)| **b != 0xFF)
            .map(|(byte_idx, b)| byte_idx as u64 * 8 + u64::from(b.trailing_ones()))
            .filter(|idx| *idx < self.total_frames);
        let Some(idx) = found else {
            log::warn!("PFA: out of physical frames");
            return None;
        };

        self.set_bit(idx);
        self.free_frames -= 1;
        Some(self.frame_at(idx))
    }

    /// Allocate a frame and return its direct-mapped address.
    pub fn alloc_frame_direct<M: PhysMapper>(&mut self, mapper: &M) -> Option<VirtualAddress> {
        self.alloc_frame().map(|pa| mapper.phys_to_virt(pa))
    }

    /// Return the frame containing `addr`.
    ///
    /// Addresses outside the managed region are ignored, as are frames that
    /// are already free. Frames holding the bitmap itself are never released.
    pub fn free_frame(&mut self, addr: PhysicalAddress) {
        let Some(idx) = self.index_of(addr) else {
            return;
        };
        if idx < self.bitmap_frames {
            log::warn!("PFA: refusing to free bitmap frame {addr}");
            return;
        }
        if self.test_bit(idx) {
            self.clear_bit(idx);
            self.free_frames += 1;
        }
    }

    /// Mark every frame overlapping `[phys, phys + length)` as allocated.
    ///
    /// The part of the range outside the managed region is ignored.
    pub fn reserve_range(&mut self, phys: PhysicalAddress, length: u64) {
        if length == 0 {
            return;
        }

        let base = self.managed_base.as_u64();
        let end = self.frame_at(self.total_frames).as_u64();
        let start = phys.as_u64().max(base);
        let stop = phys.as_u64().saturating_add(length).min(end);
        if start >= stop {
            return;
        }

        let first = (start - base) / Size4K::SIZE;
        let last = (stop - base).div_ceil(Size4K::SIZE);
        let mut newly = 0;
        for idx in first..last {
            if !self.test_bit(idx) {
                self.set_bit(idx);
                newly += 1;
            }
        }
        self.free_frames -= newly;
        log::trace!("PFA reserved {newly} frame(s) for {phys}+{length:#x}");
    }

    /// Whether the frame containing `addr` is allocated or reserved.
    ///
    /// Addresses outside the managed region report `false`.
    #[must_use]
    pub fn is_allocated(&self, addr: PhysicalAddress) -> bool {
        self.index_of(addr).is_some_and(|idx| self.test_bit(idx))
    }

    #[must_use]
    pub const fn total_frames(&self) -> u64 {
        self.total_frames
    }

    #[must_use]
    pub const fn free_frames(&self) -> u64 {
        self.free_frames
    }

    #[must_use]
    pub const fn managed_base(&self) -> PhysicalAddress {
        self.managed_base
    }

    /// Physical range the allocator manages.
    #[must_use]
    pub const fn managed_range(&self) -> Range<PhysicalAddress> {
        self.managed_base..self.frame_at(self.total_frames)
    }

    /// Physical frames occupied by the bitmap.
    #[must_use]
    pub const fn bitmap_range(&self) -> Range<PhysicalAddress> {
        self.managed_base..self.frame_at(self.bitmap_frames)
    }

    /// Length of the bitmap in bytes.
    #[must_use]
    pub const fn bitmap_len(&self) -> usize {
        self.bitmap.len()
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_frame().map(PhysicalPage::from_addr)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        self.free_frame(page.base());
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn to_usize(v: u64) -> usize {
    v as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SimulatedRam;
    use kernel_info::memory_map::MemoryRegionKind;

    const BASE: u64 = 0x10_0000;

    fn pfa_over(ram: &SimulatedRam, frames: u64) -> BitmapFrameAlloc {
        let map = [
            MemoryRegion::new(0, BASE, MemoryRegionKind::Reserved),
            MemoryRegion::usable(BASE, frames * 4096),
        ];
        unsafe { BitmapFrameAlloc::try_init(&map, &ram.mapper()) }.unwrap()
    }

    #[test]
    fn sixteen_page_region() {
        let ram = SimulatedRam::new(BASE, 16);
        let mut pfa = pfa_over(&ram, 16);

        assert_eq!(pfa.total_frames(), 16);
        assert_eq!(pfa.bitmap_len(), 2);
        assert!(pfa.is_allocated(PhysicalAddress::new(BASE)));
        for i in 1..16 {
            assert!(!pfa.is_allocated(PhysicalAddress::new(BASE + i * 4096)));
        }
        assert_eq!(pfa.free_frames(), 15);

        assert_eq!(pfa.alloc_frame(), Some(PhysicalAddress::new(BASE + 4096)));
    }

    #[test]
    fn freed_frame_is_reused() {
        let ram = SimulatedRam::new(BASE, 16);
        let mut pfa = pfa_over(&ram, 16);

        let a = pfa.alloc_frame().unwrap();
        let b = pfa.alloc_frame().unwrap();
        assert!(pfa.is_allocated(a) && pfa.is_allocated(b));

        pfa.free_frame(a);
        assert!(!pfa.is_allocated(a));
        assert_eq!(pfa.alloc_frame(), Some(a));
    }

    #[test]
    fn exhaustion_returns_none() {
        let ram = SimulatedRam::new(BASE, 4);
        let mut pfa = pfa_over(&ram, 4);

        for _ in 0..3 {
            assert!(pfa.alloc_frame().is_some());
        }
        assert_eq!(pfa.alloc_frame(), None);
        assert_eq!(pfa.free_frames(), 0);
    }

    #[test]
    fn free_outside_region_and_double_free_are_ignored() {
        let ram = SimulatedRam::new(BASE, 8);
        let mut pfa = pfa_over(&ram, 8);

        pfa.free_frame(PhysicalAddress::new(0x1000));
        pfa.free_frame(PhysicalAddress::new(BASE + 8 * 4096));
        assert_eq!(pfa.free_frames(), 7);

        let a = pfa.alloc_frame().unwrap();
        pfa.free_frame(a);
        pfa.free_frame(a);
        assert_eq!(pfa.free_frames(), 7);

        // The bitmap frame stays put.
        pfa.free_frame(PhysicalAddress::new(BASE));
        assert!(pfa.is_allocated(PhysicalAddress::new(BASE)));
    }

    #[test]
    fn reserve_range_clamps_and_skips_reserved_frames() {
        let ram = SimulatedRam::new(BASE, 8);
        let mut pfa = pfa_over(&ram, 8);

        // Frames 2 and 3, partially overlapping at both ends.
        pfa.reserve_range(PhysicalAddress::new(BASE + 2 * 4096 + 1), 4096);
        assert!(pfa.is_allocated(PhysicalAddress::new(BASE + 2 * 4096)));
        assert!(pfa.is_allocated(PhysicalAddress::new(BASE + 3 * 4096)));
        assert_eq!(pfa.free_frames(), 5);

        // Starts below the region; only frame 0 (bitmap) and 1 are covered.
        pfa.reserve_range(PhysicalAddress::new(0), BASE + 2 * 4096);
        assert_eq!(pfa.free_frames(), 4);

        // Entirely outside.
        pfa.reserve_range(PhysicalAddress::new(BASE + 100 * 4096), 4096);
        assert_eq!(pfa.free_frames(), 4);

        assert_eq!(pfa.alloc_frame(), Some(PhysicalAddress::new(BASE + 4 * 4096)));
    }

    #[test]
    fn picks_the_largest_region_and_aligns_it() {
        let ram = SimulatedRam::new(BASE, 8);
        let map = [
            MemoryRegion::usable(0x1000, 0x2000),
            MemoryRegion::usable(BASE + 0x10, 8 * 4096 - 0x10),
        ];
        let pfa = unsafe { BitmapFrameAlloc::try_init(&map, &ram.mapper()) }.unwrap();

        // Base rounds up, end stays: seven whole frames.
        assert_eq!(pfa.managed_base().as_u64(), BASE + 4096);
        assert_eq!(pfa.total_frames(), 7);
        assert_eq!(pfa.bitmap_range(), PhysicalAddress::new(BASE + 4096)..PhysicalAddress::new(BASE + 2 * 4096));
    }

    #[test]
    fn init_errors() {
        let ram = SimulatedRam::new(BASE, 1);
        let none = [MemoryRegion::new(BASE, 4096, MemoryRegionKind::Reserved)];
        assert_eq!(
            unsafe { BitmapFrameAlloc::try_init(&none, &ram.mapper()) }.err(),
            Some(FrameAllocInitError::NoUsableRegion)
        );

        let tiny = [MemoryRegion::usable(BASE + 1, 4096)];
        assert!(matches!(
            unsafe { BitmapFrameAlloc::try_init(&tiny, &ram.mapper()) },
            Err(FrameAllocInitError::RegionTooSmall(_))
        ));
    }

    #[test]
    #[should_panic(expected = "no usable region")]
    fn init_without_usable_memory_is_fatal() {
        let ram = SimulatedRam::new(BASE, 1);
        let map = [MemoryRegion::new(BASE, 4096, MemoryRegionKind::Bad)];
        let _ = unsafe { BitmapFrameAlloc::init(&map, &ram.mapper()) };
    }

    #[test]
    fn direct_alloc_points_into_the_direct_map() {
        let ram = SimulatedRam::new(BASE, 4);
        let mut pfa = pfa_over(&ram, 4);
        let mapper = ram.mapper();

        let va = pfa.alloc_frame_direct(&mapper).unwrap();
        assert_eq!(mapper.virt_to_phys(va).as_u64(), BASE + 4096);
    }
}
