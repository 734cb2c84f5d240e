use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Control over the active translation: the root table register and the TLB.
pub trait TranslationControl {
    /// Root table frame currently installed in hardware.
    fn active_root(&self) -> PhysicalPage<Size4K>;

    /// Install `root` as the active root table.
    ///
    /// # Safety
    /// The hierarchy under `root` must map everything the CPU touches next:
    /// the executing code, the stack, and every table reached through the
    /// direct map.
    unsafe fn load_root(&self, root: PhysicalPage<Size4K>);

    /// Drop any cached translation of the page containing `va`.
    fn invalidate(&self, va: VirtualAddress);

    /// Drop all non-global cached translations by reloading the active root.
    fn flush_all(&self) {
        let root = self.active_root();
        unsafe { self.load_root(root) }
    }
}

/// [`TranslationControl`] backed by CR3 and `invlpg`.
#[cfg(target_arch = "x86_64")]
#[derive(Debug)]
pub struct Cr3Control {
    _private: (),
}

#[cfg(target_arch = "x86_64")]
impl Cr3Control {
    /// # Safety
    /// Must only be used in Ring 0 with paging enabled.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "x86_64")]
impl TranslationControl for Cr3Control {
    fn active_root(&self) -> PhysicalPage<Size4K> {
        use kernel_registers::{Cr3, LoadRegisterUnsafe};
        let cr3 = unsafe { Cr3::load_unsafe() };
        cr3.root_phys().page()
    }

    unsafe fn load_root(&self, root: PhysicalPage<Size4K>) {
        use kernel_registers::{Cr3, StoreRegisterUnsafe};
        log::trace!("Loading CR3 with root table {root}");
        unsafe { Cr3::from_root_phys(root.base()).store_unsafe() }
    }

    fn invalidate(&self, va: VirtualAddress) {
        unsafe { kernel_registers::instructions::invlpg(va) }
    }
}
