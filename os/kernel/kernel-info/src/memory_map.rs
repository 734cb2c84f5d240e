//! # Memory Map Interpreter
//!
//! Classifies the regions reported by the boot collaborator and selects the
//! one that backs the physical frame allocator.

use core::fmt;
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, align_down, align_up};

/// Kind of a physical memory region, as reported at boot.
///
/// Only [`Usable`](Self::Usable) memory is ever handed out by the frame
/// allocator; everything else is left alone.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryRegionKind {
    Usable = 0,
    Reserved = 1,
    AcpiReclaimable = 2,
    AcpiNvs = 3,
    Bad = 4,
    BootReclaimable = 5,
    KernelAndModules = 6,
    Framebuffer = 7,
}

impl MemoryRegionKind {
    /// Decode the numeric region type used by the boot protocol.
    ///
    /// Returns `None` for tags this kernel does not know; callers should treat
    /// such regions as [`Reserved`](Self::Reserved).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        Some(match raw {
            0 => Self::Usable,
            1 => Self::Reserved,
            2 => Self::AcpiReclaimable,
            3 => Self::AcpiNvs,
            4 => Self::Bad,
            5 => Self::BootReclaimable,
            6 => Self::KernelAndModules,
            7 => Self::Framebuffer,
            _ => return None,
        })
    }
}

/// One entry of the boot memory map.
///
/// `base` and `length` are in bytes. Regions are not assumed to be page
/// aligned; use [`page_aligned`](Self::page_aligned) to shrink a region to the
/// whole frames it contains.
#[repr(C)]
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: PhysicalAddress,
    pub length: u64,
    pub kind: MemoryRegionKind,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionKind) -> Self {
        Self {
            base: PhysicalAddress::new(base),
            length,
            kind,
        }
    }

    #[must_use]
    pub const fn usable(base: u64, length: u64) -> Self {
        Self::new(base, length, MemoryRegionKind::Usable)
    }

    #[inline]
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        matches!(self.kind, MemoryRegionKind::Usable)
    }

    /// Exclusive end address, saturating at the top of the address space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64().saturating_add(self.length))
    }

    /// Number of whole 4 KiB frames covered by `length`.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.length / Size4K::SIZE
    }

    /// Shrink the region to the page-aligned frames fully inside it.
    ///
    /// Returns `None` if no whole frame remains.
    #[must_use]
    pub const fn page_aligned(&self) -> Option<Self> {
        let Some(start) = align_up(self.base.as_u64(), Size4K::SIZE) else {
            return None;
        };
        let end = align_down(self.end().as_u64(), Size4K::SIZE);
        if end <= start {
            return None;
        }

        Some(Self::new(start, end - start, self.kind))
    }
}

impl fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryRegion({:?}, {}..{}, {} KiB)",
            self.kind,
            self.base,
            self.end(),
            self.length / 1024
        )
    }
}

/// Select the usable region with the largest `length`.
///
/// When several usable regions share the maximal length, the first one in
/// map order wins. Returns `None` if the map has no usable region.
#[must_use]
pub fn find_biggest_usable(regions: &[MemoryRegion]) -> Option<MemoryRegion> {
    let mut biggest: Option<MemoryRegion> = None;
    for region in usable_regions(regions) {
        match biggest {
            Some(current) if region.length <= current.length => {}
            _ => biggest = Some(*region),
        }
    }

    if let Some(region) = &biggest {
        log::debug!("Largest usable memory region: {region:?}");
    } else {
        log::warn!("Memory map contains no usable region");
    }

    biggest
}

/// All usable regions, in map order.
pub fn usable_regions(regions: &[MemoryRegion]) -> impl Iterator<Item = &MemoryRegion> {
    regions.iter().filter(|r| r.is_usable())
}

/// Sum of the lengths of all usable regions.
#[must_use]
pub fn total_usable_bytes(regions: &[MemoryRegion]) -> u64 {
    usable_regions(regions).fold(0u64, |acc, r| acc.saturating_add(r.length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_largest_usable() {
        let map = [
            MemoryRegion::usable(0x0, 0x9_F000),
            MemoryRegion::new(0x9_F000, 0x6_1000, MemoryRegionKind::Reserved),
            MemoryRegion::usable(0x10_0000, 0x7EE_0000),
            MemoryRegion::new(0x8000_0000, 0x1000_0000, MemoryRegionKind::Framebuffer),
        ];

        let region = find_biggest_usable(&map).expect("usable region");
        assert_eq!(region.base.as_u64(), 0x10_0000);
        assert_eq!(region.length, 0x7EE_0000);
    }

    #[test]
    fn ignores_bigger_non_usable_regions() {
        let map = [
            MemoryRegion::new(0x0, 0x1000_0000, MemoryRegionKind::Reserved),
            MemoryRegion::new(0x1000_0000, 0x1000_0000, MemoryRegionKind::KernelAndModules),
            MemoryRegion::usable(0x2000_0000, 0x2000),
        ];

        let region = find_biggest_usable(&map).expect("usable region");
        assert_eq!(region.base.as_u64(), 0x2000_0000);
    }

    #[test]
    fn first_region_wins_ties() {
        let map = [
            MemoryRegion::usable(0x10_0000, 0x4000),
            MemoryRegion::usable(0x20_0000, 0x4000),
        ];

        let region = find_biggest_usable(&map).expect("usable region");
        assert_eq!(region.base.as_u64(), 0x10_0000);
    }

    #[test]
    fn no_usable_region() {
        let map = [
            MemoryRegion::new(0x0, 0x1000, MemoryRegionKind::Bad),
            MemoryRegion::new(0x1000, 0x1000, MemoryRegionKind::AcpiNvs),
        ];
        assert!(find_biggest_usable(&map).is_none());
        assert!(find_biggest_usable(&[]).is_none());
    }

    #[test]
    fn page_aligned_shrinks_to_whole_frames() {
        let r = MemoryRegion::usable(0x1234, 0x3000);
        let aligned = r.page_aligned().expect("whole frame");
        assert_eq!(aligned.base.as_u64(), 0x2000);
        assert_eq!(aligned.end().as_u64(), 0x4000);
        assert_eq!(aligned.frame_count(), 2);

        assert!(MemoryRegion::usable(0x1001, 0x1000).page_aligned().is_none());
    }

    #[test]
    fn raw_kinds_decode() {
        assert_eq!(MemoryRegionKind::from_raw(0), Some(MemoryRegionKind::Usable));
        assert_eq!(MemoryRegionKind::from_raw(7), Some(MemoryRegionKind::Framebuffer));
        assert_eq!(MemoryRegionKind::from_raw(42), None);
    }

    #[test]
    fn totals_only_usable() {
        let map = [
            MemoryRegion::usable(0x0, 0x1000),
            MemoryRegion::new(0x1000, 0x1000, MemoryRegionKind::Reserved),
            MemoryRegion::usable(0x2000, 0x3000),
        ];
        assert_eq!(total_usable_bytes(&map), 0x4000);
        assert_eq!(usable_regions(&map).count(), 2);
    }
}
