//! Unrecoverable failures.

use core::fmt;

/// Report a structural failure and stop.
///
/// On the freestanding target the CPU is parked for good. Hosted builds panic
/// instead so tests can observe the failure.
#[cold]
#[track_caller]
pub fn fatal(args: fmt::Arguments<'_>) -> ! {
    log::error!("{args}");

    #[cfg(target_os = "none")]
    kernel_registers::halt_forever();

    #[cfg(not(target_os = "none"))]
    panic!("{args}");
}
