use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// A spin lock guard that also masks interrupts while held.
///
/// Created via [`SpinLock::lock_irq`], it
///
/// 1. saves the current interrupt state and masks interrupts, then
/// 2. acquires the underlying lock,
///
/// releasing them in reverse order on drop. An interrupt handler can
/// therefore never spin on a lock held by the code it interrupted.
///
/// # Examples
///
/// ```
/// use kernel_sync::SpinLock;
///
/// static HEAP_STATE: SpinLock<u64> = SpinLock::new(0);
///
/// {
///     let mut g = HEAP_STATE.lock_irq();
///     *g += 1;
/// }
/// assert_eq!(*HEAP_STATE.lock(), 1);
/// ```
pub struct IrqSpinLockGuard<'a, T> {
    // Field order matters: the lock is released before interrupts are restored.
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> SpinLock<T> {
    /// Acquire the lock with interrupts masked for the guard's lifetime.
    #[inline]
    pub fn lock_irq(&self) -> IrqSpinLockGuard<'_, T> {
        let irq = IrqGuard::new();
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }

    /// Closure convenience, built on [`lock_irq`](Self::lock_irq).
    #[inline]
    pub fn with_lock_irq<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock_irq();
        f(&mut g)
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// RAII guard that masks interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the interrupt flag. If interrupts were
/// enabled, it masks them. On drop, it unmasks them **only** if they were
/// previously enabled, so guards nest.
pub struct IrqGuard {
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}

/// Whether maskable interrupts are currently delivered.
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    imp::interrupts_enabled()
}

/// Mask maskable interrupts.
///
/// On bare metal this executes `cli` and must run in Ring 0.
#[inline]
pub fn disable_interrupts() {
    imp::disable_interrupts();
}

/// Unmask maskable interrupts.
///
/// On bare metal this executes `sti` and must run in Ring 0.
#[inline]
pub fn enable_interrupts() {
    imp::enable_interrupts();
}

#[cfg(target_os = "none")]
mod imp {
    use kernel_registers::{LoadRegister, Rflags, instructions};

    #[inline]
    pub fn interrupts_enabled() -> bool {
        Rflags::load().interrupts_enabled()
    }

    #[inline]
    pub fn disable_interrupts() {
        unsafe { instructions::disable_interrupts() }
    }

    #[inline]
    pub fn enable_interrupts() {
        unsafe { instructions::enable_interrupts() }
    }
}

/// Hosted builds have no interrupt flag to touch; it is emulated so the
/// save/restore logic stays observable.
#[cfg(not(target_os = "none"))]
mod imp {
    use core::sync::atomic::{AtomicBool, Ordering};

    static INTERRUPTS_ENABLED: AtomicBool = AtomicBool::new(false);

    #[inline]
    pub fn interrupts_enabled() -> bool {
        INTERRUPTS_ENABLED.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn disable_interrupts() {
        INTERRUPTS_ENABLED.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn enable_interrupts() {
        INTERRUPTS_ENABLED.store(true, Ordering::SeqCst);
    }
}
