//! # Fixed-offset `PhysMapper`
//!
//! Page-table frames are physical; code can only dereference virtual
//! addresses. [`OffsetPhysMapper`] covers every linear scheme: the identity
//! map (`offset = 0`, what the boot tables provide for low memory) and any
//! direct map placing physical address `pa` at `pa + offset`.

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for a direct map at a constant offset.
///
/// # Safety
/// Whoever uses this mapper must make sure every physical address it is
/// given is actually mapped, writable, at `pa + offset` in the active
/// translation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Physical memory visible at identical virtual addresses.
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(0)
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    #[allow(clippy::cast_possible_truncation)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = pa.as_u64().wrapping_add(self.offset) as usize as *mut T;
        // SAFETY: the caller guarantees `pa` is mapped at `pa + offset`.
        unsafe { &mut *va }
    }
}
