//! # Global allocator front end
//!
//! Wraps the [`MemoryManager`] in a [`SpinLock`] that is only ever taken with
//! interrupts masked, so an interrupt handler that allocates can never observe
//! the block list mid-update.
//!
//! ```ignore
//! #[global_allocator]
//! static KERNEL_MEMORY: KernelMemory = KernelMemory::new();
//!
//! let mm = unsafe { MemoryManager::init(boot_info, Cr3Control::new()) };
//! KERNEL_MEMORY.install(mm);
//! ```

use crate::memory::MemoryManager;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{NonNull, null_mut};
use kernel_info::memory::HEAP_ALIGN;
use kernel_sync::SpinLock;
use kernel_vmem::{PhysMapper, TranslationControl};

/// The kernel's instance: direct map plus CR3.
#[cfg(target_arch = "x86_64")]
pub type KernelMemory =
    LockedKernelMemory<crate::phys_mapper::DirectMapPhysMapper, kernel_vmem::Cr3Control>;

pub struct LockedKernelMemory<M: PhysMapper, T: TranslationControl> {
    inner: SpinLock<Option<MemoryManager<M, T>>>,
}

impl<M: PhysMapper, T: TranslationControl> LockedKernelMemory<M, T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }

    /// Hand the initialized memory core over. Allocations fail until then.
    pub fn install(&self, memory: MemoryManager<M, T>) {
        let previous = self.inner.with_lock_irq(|slot| slot.replace(memory));
        if previous.is_some() {
            log::warn!("Replaced an already installed memory manager");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inner.with_lock_irq(|slot| slot.is_some())
    }

    /// Run `f` on the memory core with interrupts masked.
    ///
    /// Returns `None` if nothing is installed yet.
    pub fn with<R>(&self, f: impl FnOnce(&mut MemoryManager<M, T>) -> R) -> Option<R> {
        self.inner.with_lock_irq(|slot| slot.as_mut().map(f))
    }
}

impl<M: PhysMapper, T: TranslationControl> Default for LockedKernelMemory<M, T> {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl<M: PhysMapper, T: TranslationControl> GlobalAlloc for LockedKernelMemory<M, T> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_ALIGN {
            return null_mut();
        }
        self.with(|mm| mm.alloc(layout.size().max(1)))
            .flatten()
            .map_or(null_mut(), NonNull::as_ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > HEAP_ALIGN {
            return null_mut();
        }
        self.with(|mm| mm.zalloc(layout.size().max(1)))
            .flatten()
            .map_or(null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.with(|mm| unsafe { mm.free(ptr) });
    }
}
