//! # Kernel synchronization primitives
//!
//! A test-and-test-and-set [`SpinLock`] and the interrupt-masking
//! [`IrqGuard`] that [`SpinLock::lock_irq`] pairs it with.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, IrqSpinLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
