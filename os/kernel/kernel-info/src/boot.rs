//! # Kernel Boot Information

use crate::memory_map::MemoryRegion;

/// Memory-related information handed over by the boot collaborator.
///
/// The memory core reads it exactly once, during initialization; the regions
/// themselves remain owned by the boot collaborator.
#[derive(Debug, Copy, Clone)]
pub struct BootMemoryInfo<'a> {
    /// The memory map, in the order the boot collaborator reported it.
    pub regions: &'a [MemoryRegion],

    /// Offset of the direct physical-memory mapping set up before the kernel
    /// runs. Physical address `p` is readable and writable at `offset + p`.
    pub direct_map_offset: u64,
}

impl<'a> BootMemoryInfo<'a> {
    #[must_use]
    pub const fn new(regions: &'a [MemoryRegion], direct_map_offset: u64) -> Self {
        Self {
            regions,
            direct_map_offset,
        }
    }
}
