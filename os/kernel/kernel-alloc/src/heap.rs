//! # Kernel Heap
//!
//! A first-fit, split-and-coalesce free-list allocator over a reserved virtual
//! range. Every allocation is preceded by an inline `HeapBlock` header, and
//! all blocks (free or not) form one singly linked list in address order that
//! covers the mapped part of the range without gaps:
//!
//! ```text
//! base                                                   high_water_mark
//! ├────────┬─────────┬────────┬─────────────┬────────┬──────────┤
//! │ header │ payload │ header │   payload   │ header │ payload  │ unmapped ...
//! └────────┴─────────┴────────┴─────────────┴────────┴──────────┘
//!   block ───next──────► block ───next──────► block ──► null
//! ```
//!
//! The heap grows on demand: a miss maps whole fresh pages at the high-water
//! mark through a [`HeapGrowth`] backend and appends them as one free block.
//! Pages are never unmapped again.

use crate::vmm::VmmError;
use core::ptr::{self, NonNull, null_mut};
use kernel_info::memory::{HEAP_ALIGN, PAGE_SIZE};
use kernel_memory_addresses::{Size4K, VirtualAddress, align_up};

/// Marks a live block header. Cleared when a block is merged away.
const BLOCK_MAGIC: u64 = 0x4b48_6561_7042_6c6b;

/// Header placed in front of every heap payload.
#[repr(C, align(16))]
struct HeapBlock {
    magic: u64,
    /// Payload bytes after the header.
    size: usize,
    /// Next block in address order.
    next: *mut HeapBlock,
    free: bool,
}

/// Size of a block header; payloads start this far past their block.
pub const HEADER_SIZE: usize = size_of::<HeapBlock>();

const _: () = {
    assert!(HEADER_SIZE == 32);
    assert!(HEADER_SIZE.is_multiple_of(HEAP_ALIGN));
};

impl HeapBlock {
    const fn new(size: usize, next: *mut Self) -> Self {
        Self {
            magic: BLOCK_MAGIC,
            size,
            next,
            free: true,
        }
    }

    #[inline]
    fn addr(&self) -> usize {
        ptr::from_ref(self).addr()
    }

    /// First byte past this block's payload.
    #[inline]
    fn end(&self) -> usize {
        self.addr() + HEADER_SIZE + self.size
    }

    #[inline]
    fn payload(&mut self) -> *mut u8 {
        ptr::from_mut(self).cast::<u8>().wrapping_add(HEADER_SIZE)
    }
}

#[inline]
fn block_at(addr: usize) -> *mut HeapBlock {
    VirtualAddress::new(addr as u64).as_mut_ptr()
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("no physical frame left to grow the heap")]
    OutOfFrames,
    #[error("heap would grow past its {limit:#x}-byte limit")]
    LimitReached { limit: u64 },
    #[error("cannot map heap page: {0}")]
    Map(#[from] VmmError),
}

/// Backing store for heap growth.
pub trait HeapGrowth {
    /// Back the 4 KiB page at `page` with a fresh writable frame.
    ///
    /// # Errors
    /// If no frame is left or the page cannot be mapped.
    fn map_fresh_page(&mut self, page: VirtualAddress) -> Result<(), HeapError>;
}

/// Snapshot of the heap's bookkeeping.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct HeapStats {
    /// Bytes mapped between the heap base and the high-water mark.
    pub mapped: u64,
    /// Payload bytes handed out.
    pub used: u64,
    /// Payload bytes available without growing.
    pub free: u64,
    pub blocks: usize,
    pub free_blocks: usize,
}

pub struct KernelHeap {
    head: *mut HeapBlock,
    base: VirtualAddress,
    high_water_mark: VirtualAddress,
    max_size: u64,
}

// Safety: the block list is only reached through `&mut self`.
unsafe impl Send for KernelHeap {}

impl KernelHeap {
    /// Map the first heap page at `base` and seed the list with one free block.
    ///
    /// # Safety
    /// - `[base, base + max_size)` must be reserved for this heap and unmapped.
    /// - Pages mapped by `growth` must be writable through their virtual address.
    ///
    /// # Errors
    /// - [`HeapError::LimitReached`] if `max_size` cannot hold a single page.
    /// - Whatever `growth` reports for the first page.
    pub unsafe fn init<G: HeapGrowth>(
        base: VirtualAddress,
        max_size: u64,
        growth: &mut G,
    ) -> Result<Self, HeapError> {
        debug_assert!(base.is_aligned::<Size4K>(), "heap base {base} not page aligned");
        if max_size < PAGE_SIZE {
            return Err(HeapError::LimitReached { limit: max_size });
        }

        growth.map_fresh_page(base)?;
        let head = base.as_mut_ptr::<HeapBlock>();
        unsafe { head.write(HeapBlock::new(to_usize(PAGE_SIZE) - HEADER_SIZE, null_mut())) };

        log::debug!("Heap initialized at {base}, limit {max_size:#x} bytes");
        Ok(Self {
            head,
            base,
            high_water_mark: base + PAGE_SIZE,
            max_size,
        })
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// First virtual address past the mapped heap range.
    #[must_use]
    pub const fn high_water_mark(&self) -> VirtualAddress {
        self.high_water_mark
    }

    /// Whether `ptr` points into the mapped heap range.
    pub fn is_heap_pointer<T>(&self, ptr: *const T) -> bool {
        let addr = VirtualAddress::from_ptr(ptr);
        self.base <= addr && addr < self.high_water_mark
    }

    /// Allocate `size` bytes, 16-byte aligned.
    ///
    /// `size` is rounded up to a multiple of 16. On a miss the heap grows by
    /// enough whole pages for the request and searches once more.
    ///
    /// Returns `None` for `size == 0` or when the heap cannot grow.
    pub fn alloc<G: HeapGrowth>(&mut self, size: usize, growth: &mut G) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let size = size.checked_next_multiple_of(HEAP_ALIGN)?;

        if let Some(payload) = self.take_first_fit(size) {
            return Some(payload);
        }

        if let Err(e) = self.grow(size, growth) {
            log::warn!("Heap: cannot grow for {size} bytes: {e}");
            return None;
        }
        self.take_first_fit(size)
    }

    /// [`alloc`](Self::alloc), then zero the `size` requested bytes.
    pub fn zalloc<G: HeapGrowth>(&mut self, size: usize, growth: &mut G) -> Option<NonNull<u8>> {
        let payload = self.alloc(size, growth)?;
        unsafe { payload.write_bytes(0, size) };
        Some(payload)
    }

    /// Zeroed allocation of `count * size` bytes.
    ///
    /// Returns `None` without allocating if the product overflows.
    pub fn calloc<G: HeapGrowth>(
        &mut self,
        count: usize,
        size: usize,
        growth: &mut G,
    ) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        self.zalloc(total, growth)
    }

    /// Release an allocation and coalesce neighboring free blocks.
    ///
    /// Null is ignored. A pointer that does not name a live allocation is
    /// reported and ignored; debug builds panic on it.
    ///
    /// # Safety
    /// `ptr` must be null or come from this heap, and must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let Some(block) = self.live_block_of(ptr) else {
            log::error!("Heap: ignoring invalid free of {ptr:p}");
            debug_assert!(false, "invalid heap free of {ptr:p}");
            return;
        };

        block.free = true;
        self.coalesce();
    }

    /// Walk the block list and sum it up.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            mapped: self.high_water_mark.as_u64() - self.base.as_u64(),
            ..HeapStats::default()
        };
        let mut curr = self.head;
        while let Some(block) = unsafe { curr.as_ref() } {
            stats.blocks += 1;
            if block.free {
                stats.free += block.size as u64;
                stats.free_blocks += 1;
            } else {
                stats.used += block.size as u64;
            }
            curr = block.next;
        }
        stats
    }

    /// Header of the live allocation whose payload starts at `ptr`.
    fn live_block_of(&mut self, ptr: *mut u8) -> Option<&mut HeapBlock> {
        let addr = ptr.addr();
        let base = to_usize(self.base.as_u64());
        let end = to_usize(self.high_water_mark.as_u64());
        if addr < base + HEADER_SIZE || addr >= end || !addr.is_multiple_of(HEAP_ALIGN) {
            return None;
        }

        let block = unsafe { &mut *block_at(addr - HEADER_SIZE) };
        (block.magic == BLOCK_MAGIC && !block.free && block.end() <= end).then_some(block)
    }

    fn take_first_fit(&mut self, size: usize) -> Option<NonNull<u8>> {
        let mut curr = self.head;
        while let Some(block) = unsafe { curr.as_mut() } {
            if block.free && block.size >= size {
                Self::split(block, size);
                block.free = false;
                return NonNull::new(block.payload());
            }
            curr = block.next;
        }
        None
    }

    /// Carve a trailing free block off `block` if more than a header remains.
    fn split(block: &mut HeapBlock, size: usize) {
        if block.size <= size + HEADER_SIZE {
            return;
        }

        let rest = block_at(block.addr() + HEADER_SIZE + size);
        unsafe { rest.write(HeapBlock::new(block.size - size - HEADER_SIZE, block.next)) };
        block.size = size;
        block.next = rest;
    }

    /// One pass over the list, merging each free block with free successors
    /// that start exactly where it ends.
    fn coalesce(&mut self) {
        let mut curr = self.head;
        while let Some(block) = unsafe { curr.as_mut() } {
            let next = block.next;
            match unsafe { next.as_mut() } {
                Some(neighbor) if block.free && neighbor.free && block.end() == neighbor.addr() => {
                    block.size += HEADER_SIZE + neighbor.size;
                    block.next = neighbor.next;
                    neighbor.magic = 0;
                }
                _ => curr = next,
            }
        }
    }

    /// Map enough whole pages at the high-water mark for a `size`-byte
    /// payload plus header, and append them as one free block.
    ///
    /// Pages mapped before a failure are kept and appended all the same.
    fn grow<G: HeapGrowth>(&mut self, size: usize, growth: &mut G) -> Result<(), HeapError> {
        let limit = HeapError::LimitReached {
            limit: self.max_size,
        };
        let bytes = (size as u64)
            .checked_add(HEADER_SIZE as u64)
            .and_then(|b| align_up(b, PAGE_SIZE))
            .ok_or(limit)?;
        let mapped = self.high_water_mark.as_u64() - self.base.as_u64();
        if mapped.checked_add(bytes).is_none_or(|total| total > self.max_size) {
            return Err(limit);
        }

        let start = self.high_water_mark;
        let mut grown = 0;
        let mut result = Ok(());
        while grown < bytes {
            if let Err(e) = growth.map_fresh_page(start + grown) {
                result = Err(e);
                break;
            }
            grown += PAGE_SIZE;
        }

        if grown > 0 {
            let block = start.as_mut_ptr::<HeapBlock>();
            unsafe { block.write(HeapBlock::new(to_usize(grown) - HEADER_SIZE, null_mut())) };
            self.append(block);
            self.high_water_mark = start + grown;
            log::debug!("Heap grew by {} page(s) to {}", grown / PAGE_SIZE, self.high_water_mark);
        }
        result
    }

    fn append(&mut self, block: *mut HeapBlock) {
        let mut tail = self.head;
        while let Some(curr) = unsafe { tail.as_mut() } {
            if curr.next.is_null() {
                curr.next = block;
                return;
            }
            tail = curr.next;
        }
        self.head = block;
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
    use std::vec::Vec;

    #[repr(C, align(4096))]
    struct Page([u8; 4096]);

    /// Host pages standing in for the heap's virtual range.
    struct HostPages {
        start: u64,
        len: u64,
        mapped: Vec<VirtualAddress>,
        frames_left: usize,
    }

    impl HostPages {
        fn new(pages: usize) -> Self {
            let mut buf = Vec::with_capacity(pages);
            buf.resize_with(pages, || Page([0xCC; 4096]));
            let start = Vec::leak(buf).as_mut_ptr().addr() as u64;
            Self {
                start,
                len: pages as u64 * 4096,
                mapped: Vec::new(),
                frames_left: usize::MAX,
            }
        }

        fn base(&self) -> VirtualAddress {
            VirtualAddress::new(self.start)
        }

        fn heap(&mut self) -> KernelHeap {
            unsafe { KernelHeap::init(self.base(), self.len, self) }.unwrap()
        }
    }

    impl HeapGrowth for HostPages {
        fn map_fresh_page(&mut self, page: VirtualAddress) -> Result<(), HeapError> {
            assert!(page.as_u64() >= self.start && page.as_u64() < self.start + self.len);
            if self.frames_left == 0 {
                return Err(HeapError::OutOfFrames);
            }
            self.frames_left -= 1;
            self.mapped.push(page);
            Ok(())
        }
    }

    fn offset_of(heap: &KernelHeap, p: NonNull<u8>) -> u64 {
        p.as_ptr().addr() as u64 - heap.base().as_u64()
    }

    #[test]
    fn init_seeds_a_single_free_block() {
        let mut host = HostPages::new(4);
        let heap = host.heap();

        assert_eq!(host.mapped, vec![host.base()]);
        assert_eq!(heap.high_water_mark(), host.base() + 4096);
        assert_eq!(
            heap.stats(),
            HeapStats {
                mapped: 4096,
                used: 0,
                free: 4096 - 32,
                blocks: 1,
                free_blocks: 1,
            }
        );
    }

    #[test]
    fn init_needs_room_for_a_page() {
        let mut host = HostPages::new(1);
        let base = host.base();
        assert_eq!(
            unsafe { KernelHeap::init(base, 100, &mut host) }.err(),
            Some(HeapError::LimitReached { limit: 100 })
        );
        assert!(host.mapped.is_empty());
    }

    #[test]
    fn allocations_are_rounded_aligned_and_split() {
        let mut host = HostPages::new(4);
        let mut heap = host.heap();

        let a = heap.alloc(1, &mut host).unwrap();
        let b = heap.alloc(20, &mut host).unwrap();
        assert_eq!(offset_of(&heap, a), 32);
        assert_eq!(offset_of(&heap, b), 32 + 16 + 32);
        assert!(b.as_ptr().addr().is_multiple_of(16));

        let stats = heap.stats();
        assert_eq!(stats.used, 16 + 32);
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.free, 4096 - 3 * 32 - 48);
    }

    #[test]
    fn zero_sized_alloc_fails() {
        let mut host = HostPages::new(2);
        let mut heap = host.heap();
        assert!(heap.alloc(0, &mut host).is_none());
        assert_eq!(heap.stats().used, 0);
    }

    #[test]
    fn free_then_alloc_reuses_the_same_block() {
        let mut host = HostPages::new(4);
        let mut heap = host.heap();

        let _head = heap.alloc(64, &mut host).unwrap();
        let a = heap.alloc(100, &mut host).unwrap();
        let _tail = heap.alloc(64, &mut host).unwrap();

        unsafe { heap.free(a.as_ptr()) };
        assert_eq!(heap.alloc(100, &mut host), Some(a));
        assert_eq!(host.mapped.len(), 1);
    }

    #[test]
    fn freeing_the_middle_block_merges_three() {
        let mut host = HostPages::new(4);
        let mut heap = host.heap();

        let a = heap.alloc(64, &mut host).unwrap();
        let b = heap.alloc(64, &mut host).unwrap();
        let c = heap.alloc(64, &mut host).unwrap();
        let _d = heap.alloc(64, &mut host).unwrap();

        unsafe {
            heap.free(a.as_ptr());
            heap.free(c.as_ptr());
        }
        assert_eq!(heap.stats().free_blocks, 3);

        unsafe { heap.free(b.as_ptr()) };
        let stats = heap.stats();
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(stats.blocks, 3);

        // One block spanning A, B and C with their headers.
        let merged = heap.alloc(3 * 64 + 2 * 32, &mut host).unwrap();
        assert_eq!(merged, a);
        assert_eq!(heap.stats().free_blocks, 1);
    }

    #[test]
    fn miss_grows_by_whole_pages() {
        let mut host = HostPages::new(8);
        let mut heap = host.heap();

        let p = heap.alloc(5000, &mut host).unwrap();
        // ceil((5008 + 32) / 4096) == 2 fresh pages.
        assert_eq!(host.mapped.len(), 3);
        assert_eq!(heap.high_water_mark(), host.base() + 3 * 4096);
        assert!(heap.is_heap_pointer(p.as_ptr()));
        unsafe { p.write_bytes(0xAB, 5000) };

        unsafe { heap.free(p.as_ptr()) };
        let q = heap.alloc(5000, &mut host).unwrap();
        assert!(heap.is_heap_pointer(q.as_ptr()));
        assert_eq!(host.mapped.len(), 3);
        assert_eq!(heap.stats().mapped, 3 * 4096);
    }

    #[test]
    fn growth_stops_at_the_limit() {
        let mut host = HostPages::new(3);
        let mut heap = host.heap();

        // Three more pages would overshoot.
        assert!(heap.alloc(9000, &mut host).is_none());
        assert_eq!(heap.high_water_mark(), host.base() + 4096);
        assert_eq!(host.mapped.len(), 1);

        // Two still fit.
        assert!(heap.alloc(5000, &mut host).is_some());
        assert_eq!(host.mapped.len(), 3);
    }

    #[test]
    fn partial_growth_keeps_the_pages_it_got() {
        let mut host = HostPages::new(8);
        let mut heap = host.heap();
        host.frames_left = 1;

        assert!(heap.alloc(6000, &mut host).is_none());
        let stats = heap.stats();
        assert_eq!(stats.mapped, 2 * 4096);
        assert_eq!(stats.free_blocks, 2);

        // The kept page serves later requests without growing.
        let first = heap.alloc(4000, &mut host).unwrap();
        let second = heap.alloc(4000, &mut host).unwrap();
        assert_eq!(offset_of(&heap, first), 32);
        assert_eq!(offset_of(&heap, second), 4096 + 32);
        assert_eq!(host.mapped.len(), 2);
    }

    #[test]
    fn calloc_zeroes_and_rejects_overflow() {
        let mut host = HostPages::new(4);
        let mut heap = host.heap();

        assert!(heap.calloc(usize::MAX, 2, &mut host).is_none());
        assert_eq!(heap.stats().used, 0);

        let dirty = heap.alloc(64, &mut host).unwrap();
        unsafe {
            dirty.write_bytes(0xFF, 64);
            heap.free(dirty.as_ptr());
        }
        let clean = heap.calloc(8, 8, &mut host).unwrap();
        assert_eq!(clean, dirty);
        let bytes = unsafe { core::slice::from_raw_parts(clean.as_ptr(), 64) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn null_free_is_a_no_op() {
        let mut host = HostPages::new(2);
        let mut heap = host.heap();
        let before = heap.stats();
        unsafe { heap.free(null_mut()) };
        assert_eq!(heap.stats(), before);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invalid heap free"))]
    fn double_free_is_rejected() {
        let mut host = HostPages::new(2);
        let mut heap = host.heap();

        let a = heap.alloc(32, &mut host).unwrap();
        unsafe { heap.free(a.as_ptr()) };
        let before = heap.stats();
        unsafe { heap.free(a.as_ptr()) };
        assert_eq!(heap.stats(), before);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "invalid heap free"))]
    fn interior_pointer_free_is_rejected() {
        let mut host = HostPages::new(2);
        let mut heap = host.heap();

        let a = heap.alloc(128, &mut host).unwrap();
        unsafe { heap.free(a.as_ptr().add(64)) };
        assert_eq!(heap.stats().used, 128);
    }

    #[test]
    fn heap_pointer_bounds() {
        let mut host = HostPages::new(2);
        let mut heap = host.heap();
        let a = heap.alloc(16, &mut host).unwrap();

        assert!(heap.is_heap_pointer(a.as_ptr()));
        assert!(!heap.is_heap_pointer((host.base() + 4096).as_mut_ptr::<u8>()));
        assert!(!heap.is_heap_pointer(&raw const host));
    }
}
