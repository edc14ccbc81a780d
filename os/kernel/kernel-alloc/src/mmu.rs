//! The real [`TranslationControl`]: CR3 writes and `invlpg`.

use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};
use kernel_registers::cr3::Cr3;
use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe, tlb};
use kernel_vmem::TranslationControl;

/// Privileged paging primitives of the executing CPU.
///
/// Only meaningful at CPL0; constructing one is `unsafe` for that reason.
#[derive(Debug)]
pub struct X86Mmu {
    _private: (),
}

impl X86Mmu {
    /// # Safety
    /// The caller runs at CPL0 with paging enabled.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }

    /// Root of the translation the CPU is using right now.
    #[must_use]
    pub fn current_root(&self) -> PhysicalPage<Size4K> {
        // SAFETY: reading CR3 at CPL0, guaranteed by construction.
        unsafe { Cr3::load_unsafe() }.root()
    }
}

impl TranslationControl for X86Mmu {
    unsafe fn load_root(&mut self, root: PhysicalPage<Size4K>) {
        unsafe { Cr3::from_root(root).store_unsafe() }
    }

    fn invalidate(&mut self, va: VirtualAddress) {
        // SAFETY: CPL0, guaranteed by construction.
        unsafe { tlb::invlpg(va) }
    }
}
