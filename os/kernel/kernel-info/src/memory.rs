//! # Memory Layout

/// Size of a physical frame and of a virtual page.
pub const PAGE_SIZE: u64 = 4096;

/// Fixed virtual address the kernel heap starts at.
///
/// Lives in the upper canonical half, in a root-table slot of its own so that
/// it never collides with the boot-provided direct map or the kernel image.
pub const KERNEL_HEAP_BASE: u64 = 0xffff_c000_0000_0000;

/// Upper bound on how far the heap may grow past [`KERNEL_HEAP_BASE`].
pub const KERNEL_HEAP_MAX_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB

/// Alignment of every heap allocation (and of every heap block header).
pub const HEAP_ALIGN: usize = 16;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(HEAP_ALIGN.is_power_of_two());
    assert!(KERNEL_HEAP_BASE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_MAX_SIZE.is_multiple_of(PAGE_SIZE));
    // Upper canonical half.
    assert!(KERNEL_HEAP_BASE >= 0xffff_8000_0000_0000);
    assert!(KERNEL_HEAP_BASE.checked_add(KERNEL_HEAP_MAX_SIZE).is_some());
};
