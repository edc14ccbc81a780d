//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! Physical frame allocation and the kernel's address space manager.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ KernelPaging  (static, IRQ-masked, once)     │
//! └──────────────┬───────────────────────────────┘
//!                │
//! ┌──────────────▼───────────────────────────────┐
//! │ Vmm  map / unmap / translate / init          │
//! │   • AddressSpace walker (kernel-vmem)        │
//! │   • TLB invalidation once active             │
//! └───────┬──────────────┬───────────────┬───────┘
//!         │              │               │
//! ┌───────▼──────┐ ┌─────▼──────────┐ ┌──▼───────┐
//! │ FramePool    │ │ OffsetPhys-    │ │ X86Mmu   │
//! │ LIFO + bump  │ │ Mapper         │ │ CR3,     │
//! │ 4 KiB frames │ │ PA → pointer   │ │ invlpg   │
//! └──────────────┘ └────────────────┘ └──────────┘
//! ```
//!
//! - [`frame_pool`]: fixed pool of 4 KiB frames.
//! - [`phys_mapper`]: reach page-table frames through a direct map.
//! - [`vmm`]: the address space manager and its bootstrap.
//! - [`bootstrap`]: identity window plus higher-half kernel image.
//! - [`kernel_paging`]: the process-wide instance.
//!
//! On bare-metal builds, `boot::init_kernel_paging` wires all of the above
//! to the real hardware.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap;
pub mod frame_pool;
pub mod kernel_paging;
#[cfg(target_arch = "x86_64")]
pub mod mmu;
pub mod phys_mapper;
pub mod vmm;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod boot;
