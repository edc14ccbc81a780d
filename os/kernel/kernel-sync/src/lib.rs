//! # Kernel synchronization primitives
//!
//! Just enough locking for a single-core kernel whose paging state must never
//! be re-entered: a test-and-test-and-set [`SpinLock`] and an [`IrqGuard`]
//! that masks interrupts for the duration of a critical section.
//!
//! On a single core a spin lock taken from an interrupt handler while the
//! interrupted code holds it can never be released, so callers that may run
//! in interrupt context use [`SpinLock::try_lock_irq`] and treat contention
//! as re-entry.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, IrqLockGuard};
pub use spin_lock::{SpinLock, SpinLockGuard};
