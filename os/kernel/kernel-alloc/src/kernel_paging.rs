//! The kernel's single, process-wide address space.
//!
//! [`KernelPaging`] is meant to live in a `static`. It starts empty, receives
//! its [`Vmm`] exactly once via [`install`](KernelPaging::install), and from
//! then on serializes every operation with interrupts masked. A call that
//! arrives while another one is in progress (an interrupt handler touching
//! paging mid-update) fails with [`KernelPagingError::Reentered`] instead of
//! deadlocking or corrupting a half-linked node.

use crate::vmm::{Vmm, VmmError};
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, Mapped, PageFlags, PhysMapper, TranslationControl, Unmapped};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelPagingError {
    #[error("kernel paging is not initialized")]
    NotInitialized,
    #[error("kernel paging is already initialized")]
    AlreadyInitialized,
    #[error("re-entrant paging operation")]
    Reentered,
    #[error(transparent)]
    Vmm(#[from] VmmError),
}

pub struct KernelPaging<'m, M: PhysMapper, A: FrameAlloc, T: TranslationControl> {
    inner: SpinLock<Option<Vmm<'m, M, A, T>>>,
    /// Set once `inner` holds a [`Vmm`]; readable without the lock.
    installed: AtomicBool,
}

impl<'m, M: PhysMapper, A: FrameAlloc, T: TranslationControl> KernelPaging<'m, M, A, T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
            installed: AtomicBool::new(false),
        }
    }

    /// Hand over the (normally already activated) address space.
    ///
    /// # Errors
    /// [`KernelPagingError::AlreadyInitialized`] on every call but the first;
    /// the rejected `vmm` is dropped.
    pub fn install(&self, vmm: Vmm<'m, M, A, T>) -> Result<(), KernelPagingError> {
        let mut slot = self
            .inner
            .try_lock_irq()
            .ok_or(KernelPagingError::Reentered)?;
        if slot.is_some() {
            return Err(KernelPagingError::AlreadyInitialized);
        }
        *slot = Some(vmm);
        self.installed.store(true, Ordering::Release);
        Ok(())
    }

    /// Never blocks, so it is safe inside [`with_vmm`](Self::with_vmm) and
    /// from interrupt handlers.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// Run `f` on the installed [`Vmm`] with interrupts masked.
    ///
    /// # Errors
    /// [`KernelPagingError::Reentered`] or [`KernelPagingError::NotInitialized`].
    pub fn with_vmm<R>(
        &self,
        f: impl FnOnce(&mut Vmm<'m, M, A, T>) -> R,
    ) -> Result<R, KernelPagingError> {
        let mut slot = self
            .inner
            .try_lock_irq()
            .ok_or(KernelPagingError::Reentered)?;
        let vmm = slot.as_mut().ok_or(KernelPagingError::NotInitialized)?;
        Ok(f(vmm))
    }

    /// # Errors
    /// See [`with_vmm`](Self::with_vmm) and [`Vmm::map`].
    pub fn map(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<Mapped, KernelPagingError> {
        Ok(self.with_vmm(|vmm| vmm.map(va, pa, flags))??)
    }

    /// # Errors
    /// See [`with_vmm`](Self::with_vmm).
    pub fn unmap(&self, va: VirtualAddress) -> Result<Option<Unmapped>, KernelPagingError> {
        self.with_vmm(|vmm| vmm.unmap(va))
    }

    /// # Errors
    /// See [`with_vmm`](Self::with_vmm).
    pub fn translate(
        &self,
        va: VirtualAddress,
    ) -> Result<Option<PhysicalAddress>, KernelPagingError> {
        self.with_vmm(|vmm| vmm.translate(va))
    }
}

impl<M: PhysMapper, A: FrameAlloc, T: TranslationControl> Default for KernelPaging<'_, M, A, T> {
    fn default() -> Self {
        Self::new()
    }
}
