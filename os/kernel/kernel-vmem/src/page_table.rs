//! # 512-entry page tables and virtual-address decomposition

use crate::PageEntryBits;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Entries per table at every level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// First root-table index of the upper (kernel) canonical half.
pub const UPPER_HALF_FIRST_INDEX: usize = 256;

/// One level of the 4-level hierarchy, root first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TableLevel {
    /// PML4, indexed by VA bits 47..=39.
    Root,
    /// PDPT, indexed by VA bits 38..=30.
    Upper,
    /// PD, indexed by VA bits 29..=21.
    Middle,
    /// PT, indexed by VA bits 20..=12.
    Leaf,
}

impl TableLevel {
    /// The levels a walk passes through before reaching the leaf table.
    pub const NON_LEAF: [Self; 3] = [Self::Root, Self::Upper, Self::Middle];

    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Root => 39,
            Self::Upper => 30,
            Self::Middle => 21,
            Self::Leaf => 12,
        }
    }

    /// Bytes of address space covered by one entry at this level.
    #[inline]
    #[must_use]
    pub const fn coverage(self) -> u64 {
        1 << self.shift()
    }

    /// Table index selected by `va` at this level.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn index_of(self, va: VirtualAddress) -> usize {
        ((va.as_u64() >> self.shift()) & 0x1FF) as usize
    }
}

impl fmt::Display for TableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Root => "PML4",
            Self::Upper => "PDPT",
            Self::Middle => "PD",
            Self::Leaf => "PT",
        })
    }
}

/// Split a VA into its `[root, upper, middle, leaf]` table indices.
///
/// ```rust
/// # use kernel_memory_addresses::VirtualAddress;
/// # use kernel_vmem::split_indices;
/// let va = VirtualAddress::new(0xFFFF_8000_4020_3123);
/// assert_eq!(split_indices(va), [256, 1, 1, 3]);
/// ```
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> [usize; 4] {
    [
        TableLevel::Root.index_of(va),
        TableLevel::Upper.index_of(va),
        TableLevel::Middle.index_of(va),
        TableLevel::Leaf.index_of(va),
    ]
}

/// A 4 KiB-aligned table of 512 entries, usable at any level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntryBits; ENTRIES_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Clear every entry.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntryBits::new());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageEntryBits {
        self.entries[index]
    }

    #[inline]
    pub const fn entry_mut(&mut self, index: usize) -> &mut PageEntryBits {
        &mut self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageEntryBits) {
        self.entries[index] = entry;
    }

    /// Indices of all present entries.
    pub fn present_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.present())
            .map(|(i, _)| i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_cover_bits_12_to_47() {
        let va = VirtualAddress::new(0x0000_7FFF_FFFF_F000);
        assert_eq!(split_indices(va), [255, 511, 511, 511]);

        let va = VirtualAddress::new(0x1000);
        assert_eq!(split_indices(va), [0, 0, 0, 1]);
    }

    #[test]
    fn heap_base_lands_in_its_own_root_slot() {
        let va = VirtualAddress::new(0xffff_c000_0000_0000);
        assert_eq!(split_indices(va), [384, 0, 0, 0]);
    }

    #[test]
    fn coverage_per_level() {
        assert_eq!(TableLevel::Leaf.coverage(), 4096);
        assert_eq!(TableLevel::Middle.coverage(), 2 * 1024 * 1024);
        assert_eq!(TableLevel::Upper.coverage(), 1024 * 1024 * 1024);
    }
}
