//! # Kernel Memory Core
//!
//! Physical frame allocation, page-table management and the kernel heap,
//! brought up in that order from the boot-provided memory map.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │  LockedKernelMemory (GlobalAlloc, lock_irq)         │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │  MemoryManager                                      │
//! │    • runs PFA → VMM → heap initialization           │
//! │    • owns all three; no global state below it       │
//! └──────┬──────────────────┬──────────────────┬────────┘
//!        │                  │                  │
//! ┌──────▼───────┐   ┌──────▼───────┐   ┌──────▼───────┐
//! │ KernelHeap   │──►│ Vmm          │──►│ BitmapFrame- │
//! │ first fit,   │   │ 4-level,     │   │ Alloc        │
//! │ grows by     │   │ 4 KiB leaves │   │ 1 bit/frame  │
//! │ whole pages  │   │              │   │              │
//! └──────────────┘   └──────┬───────┘   └──────┬───────┘
//!                           │                  │
//!                    ┌──────▼──────────────────▼───────┐
//!                    │ DirectMapPhysMapper (offset + p)│
//!                    └─────────────────────────────────┘
//! ```
//!
//! ## Components
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//! A bitmap over the largest usable region, stored at the start of that
//! region and reached through the direct map. Linear first-fit scan.
//!
//! ### Virtual Memory Manager ([`vmm`])
//! Owns the active hierarchy. At init it builds a fresh root that shares the
//! boot upper half, identity-maps usable RAM and the bitmap, and switches to
//! it. Table frames come from the PFA; failing to get one halts.
//!
//! ### Kernel Heap ([`heap`])
//! Inline 32-byte headers, 16-byte alignment, first-fit with splitting and a
//! coalescing pass on every free. Grows page by page from
//! [`KERNEL_HEAP_BASE`](kernel_info::memory::KERNEL_HEAP_BASE); growth
//! failure is an ordinary allocation failure.
//!
//! ## Failure model
//!
//! | Failure | Result |
//! |---|---|
//! | no free frame, heap cannot grow | `None` to the caller |
//! | `alloc(0)`, free outside the region, unmap of nothing | no-op or `None` |
//! | no table frame during a creating walk, no usable RAM | [`fatal`](fatal::fatal): log and halt |
//!
//! ## Example
//!
//! ```ignore
//! let boot = BootMemoryInfo::new(regions, hhdm_offset);
//! let mut mm = unsafe { MemoryManager::init(boot, Cr3Control::new()) };
//!
//! let p = mm.alloc(128).expect("heap");
//! unsafe { mm.free(p.as_ptr()) };
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod fatal;
pub mod frame_alloc;
pub mod global;
pub mod heap;
pub mod memory;
pub mod phys_mapper;
pub mod vmm;

#[cfg(test)]
mod test_support;

pub use frame_alloc::{BitmapFrameAlloc, FrameAllocInitError};
#[cfg(target_arch = "x86_64")]
pub use global::KernelMemory;
pub use global::LockedKernelMemory;
pub use heap::{HeapError, HeapGrowth, HeapStats, KernelHeap};
pub use memory::{HeapConfig, MemoryManager};
pub use phys_mapper::DirectMapPhysMapper;
pub use vmm::{Vmm, VmmError};
