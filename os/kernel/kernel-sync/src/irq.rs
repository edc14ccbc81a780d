//! Interrupt masking.
//!
//! On bare-metal `x86_64` builds the guard saves `RFLAGS.IF`, executes `cli`
//! and restores the flag on drop. Hosted builds (unit tests, tools) cannot
//! execute `cli`, so the guard only tracks nesting there.

use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod arch {
    /// `RFLAGS.IF`
    const INTERRUPT_FLAG: u64 = 1 << 9;

    #[inline]
    pub fn disable_saving() -> bool {
        let rflags: u64;
        unsafe {
            core::arch::asm!("pushfq; pop {}", out(reg) rflags, options(nomem, preserves_flags));
            core::arch::asm!("cli", options(nomem, nostack));
        }
        rflags & INTERRUPT_FLAG != 0
    }

    #[inline]
    pub fn restore(were_enabled: bool) {
        if were_enabled {
            unsafe { core::arch::asm!("sti", options(nomem, nostack)) }
        }
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "none")))]
mod arch {
    #[inline]
    pub const fn disable_saving() -> bool {
        false
    }

    #[inline]
    pub const fn restore(_were_enabled: bool) {}
}

/// RAII guard that masks interrupts until dropped.
///
/// Nested guards are fine: only the outermost one re-enables interrupts, and
/// only if they were enabled when it was created.
pub struct IrqGuard {
    were_enabled: bool,
}

impl IrqGuard {
    // `cli` cannot run in a const context on bare metal.
    #[inline]
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Self {
        Self {
            were_enabled: arch::disable_saving(),
        }
    }

    /// Whether interrupts were enabled when this guard was created.
    #[inline]
    #[must_use]
    pub const fn were_enabled(&self) -> bool {
        self.were_enabled
    }
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        arch::restore(self.were_enabled);
    }
}

/// A [`SpinLockGuard`] paired with an [`IrqGuard`].
///
/// Field order matters: the lock is released before interrupts come back.
pub struct IrqLockGuard<'a, T> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard,
}

impl<T> SpinLock<T> {
    /// Mask interrupts, then make a single acquisition attempt.
    ///
    /// Returns `None` if the lock is held, which on a single core means the
    /// holder was interrupted and this is a re-entrant call.
    #[inline]
    #[must_use]
    pub fn try_lock_irq(&self) -> Option<IrqLockGuard<'_, T>> {
        let irq = IrqGuard::new();
        let guard = self.try_lock()?;
        Some(IrqLockGuard { guard, _irq: irq })
    }
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
