//! Host-side stand-ins for physical RAM and the translation hardware.

use crate::phys_mapper::DirectMapPhysMapper;
use core::cell::{Cell, RefCell};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::TranslationControl;
use std::vec::Vec;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// `frames` pages of zeroed host memory posing as physical RAM at `phys_base`.
///
/// The buffer is leaked so that allocators may borrow it as `'static`.
pub struct SimulatedRam {
    host: *mut u8,
    phys_base: u64,
}

impl SimulatedRam {
    pub fn new(phys_base: u64, frames: u64) -> Self {
        let mut buf = Vec::with_capacity(usize::try_from(frames).unwrap());
        buf.resize_with(buf.capacity(), || Frame([0; 4096]));
        let host = Vec::leak(buf).as_mut_ptr().cast::<u8>();
        Self {
            host,
            phys_base,
        }
    }

    /// Host address of the first simulated frame.
    pub fn host_base(&self) -> VirtualAddress {
        VirtualAddress::from_ptr(self.host)
    }

    /// Direct map that lands `phys_base` on the start of the buffer.
    pub fn mapper(&self) -> DirectMapPhysMapper {
        DirectMapPhysMapper::new((self.host.addr() as u64).wrapping_sub(self.phys_base))
    }
}

/// Records every root switch and invalidation instead of touching CR3.
pub struct RecordingControl {
    root: Cell<PhysicalPage<Size4K>>,
    loads: Cell<usize>,
    invalidated: RefCell<Vec<VirtualAddress>>,
}

impl RecordingControl {
    pub fn new(root: PhysicalPage<Size4K>) -> Self {
        Self {
            root: Cell::new(root),
            loads: Cell::new(0),
            invalidated: RefCell::new(Vec::new()),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.get()
    }

    pub fn invalidated(&self) -> Vec<VirtualAddress> {
        self.invalidated.borrow().clone()
    }
}

impl TranslationControl for RecordingControl {
    fn active_root(&self) -> PhysicalPage<Size4K> {
        self.root.get()
    }

    unsafe fn load_root(&self, root: PhysicalPage<Size4K>) {
        self.root.set(root);
        self.loads.set(self.loads.get() + 1);
    }

    fn invalidate(&self, va: VirtualAddress) {
        self.invalidated.borrow_mut().push(va);
    }
}
