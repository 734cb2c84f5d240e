//! # Typed `X86_64` Registers
//!
//! The registers and privileged instructions the memory core touches:
//! [`Cr3`](cr3::Cr3) for the active root table, [`Rflags`](rflags::Rflags) for
//! the interrupt flag, and the [`instructions`] `invlpg`, `cli`, `sti` and `hlt`.
//!
//! Everything that executes an instruction is gated on the `asm` feature and
//! on an `x86_64` target.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;
pub mod instructions;
pub mod rflags;

pub use cr3::Cr3;
pub use instructions::halt_forever;
pub use rflags::Rflags;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// It is generally safe to load this register even from user mode.
    fn load() -> Self;
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}
