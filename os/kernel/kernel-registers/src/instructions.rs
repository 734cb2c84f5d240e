//! Privileged instructions.
//!
//! All of these require Ring 0 on bare metal.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry for the page containing `va` (`invlpg`).
///
/// # Safety
/// Must run in Ring 0.
#[inline]
#[allow(unused_variables)]
pub unsafe fn invlpg(va: VirtualAddress) {
    #[cfg(all(feature = "asm", target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}

/// Mask maskable interrupts (`cli`).
///
/// # Safety
/// Must run in a context where `cli` is permitted.
#[inline]
pub unsafe fn disable_interrupts() {
    #[cfg(all(feature = "asm", target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Unmask maskable interrupts (`sti`).
///
/// # Safety
/// Must run in a context where `sti` is permitted.
#[inline]
pub unsafe fn enable_interrupts() {
    #[cfg(all(feature = "asm", target_arch = "x86_64"))]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Stop the processor for good.
///
/// Interrupts are masked before halting so nothing can resume execution.
#[inline]
pub fn halt_forever() -> ! {
    loop {
        #[cfg(all(feature = "asm", target_arch = "x86_64", target_os = "none"))]
        unsafe {
            core::arch::asm!("cli; hlt", options(nomem, nostack));
        }

        #[cfg(not(all(feature = "asm", target_arch = "x86_64", target_os = "none")))]
        core::hint::spin_loop();
    }
}
