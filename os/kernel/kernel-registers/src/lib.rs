//! # Typed `x86_64` Paging Registers
//!
//! The privileged primitives the paging subsystem consumes: the translation
//! root register ([`cr3::Cr3`]) and single-address TLB invalidation
//! ([`tlb::invlpg`]). Raw instructions are only compiled with the `asm`
//! feature on `x86_64`; the bitfield types are usable everywhere.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod cr3;
pub mod tlb;

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
