//! Translation cache maintenance.

use kernel_memory_addresses::VirtualAddress;

/// Invalidate the TLB entry translating `va` on the current CPU.
///
/// For a huge-page mapping any address inside the page drops the whole entry.
///
/// # Safety
/// Privileged instruction; must run at CPL0.
#[cfg(all(feature = "asm", target_arch = "x86_64"))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u64(), options(nostack, preserves_flags));
    }
}
