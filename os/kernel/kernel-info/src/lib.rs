//! # Kernel Memory Configuration
//!
//! Compile-time configuration shared by the paging subsystem: where the
//! kernel image lives physically, where it executes virtually, how much low
//! memory is identity mapped during boot, and how large the static frame pool
//! is.
//!
//! ```text
//! Virtual address space after paging bootstrap:
//!
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │  Identity map of low physical   │
//!                       │  memory (2 MiB pages)           │
//! IDENTITY_MAP_BYTES    ├─────────────────────────────────┤ 0x0000_0000_4000_0000
//!                       │            unmapped             │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │  Kernel image (4 KiB pages)     │
//!                       │  backed by PHYS_LOAD ..         │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! The values are consumed by the bootstrap policy in `kernel-alloc`; callers
//! that learn the layout from the linker or boot loader at runtime construct
//! their own [`KernelLayout`](memory::KernelLayout).

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
