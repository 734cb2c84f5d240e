//! # Kernel Memory Configuration and Boot Interface
//!
//! This crate defines what the memory core consumes from the boot
//! collaborator and the layout constants every memory subsystem agrees on.
//!
//! ## Modules
//!
//! ### Boot Information ([`boot`])
//! The hand-off the memory core reads once during initialization:
//! * **Memory Map**: the ordered list of [`MemoryRegion`](memory_map::MemoryRegion)s
//! * **Direct Map Offset**: the constant that turns a physical address into a
//!   kernel-usable virtual pointer (`virtual = offset + physical`)
//!
//! ### Memory Map ([`memory_map`])
//! The memory map interpreter: region kinds, page-alignment normalization and
//! the selection of the largest usable region that backs the frame allocator.
//!
//! ### Memory Layout ([`memory`])
//! Compile-time constants: page size, heap base address and heap size limit.
//!
//! ```text
//! Virtual Address Space Layout (64-bit):
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │  Identity map of usable RAM     │
//!                       │  (installed by the VMM)         │
//! 0x0000_7fff_ffff_ffff ├─────────────────────────────────┤
//!                       │  Non-canonical hole             │
//! 0xffff_8000_0000_0000 ├─────────────────────────────────┤ upper half, copied from
//!                       │  Direct physical map (boot)     │ the boot page tables
//! KERNEL_HEAP_BASE      ├─────────────────────────────────┤ 0xffff_c000_0000_0000
//!                       │  Kernel heap (grows upwards)    │
//!                       ├─────────────────────────────────┤
//!                       │  Kernel image (boot)            │
//! 0xffff_ffff_ffff_ffff └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod memory_map;
