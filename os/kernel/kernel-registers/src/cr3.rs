use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// CR3: translation root register (IA-32e paging, PCID disabled).
///
/// Holds the physical frame of the PML4 plus the cache-control bits used when
/// the CPU walks that table. Writing CR3 switches the active address space
/// and flushes all non-global TLB entries.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Cr3 {
    /// Bits 0–2: reserved.
    #[bits(3)]
    __reserved0: u8,

    /// Bit 3: PWT, write-through caching for PML4 accesses.
    pub pwt: bool,

    /// Bit 4: PCD, cache disable for PML4 accesses.
    pub pcd: bool,

    /// Bits 5–11: reserved.
    #[bits(7)]
    __reserved1: u8,

    /// Bits 12–51: PML4 physical frame number.
    #[bits(40)]
    pml4_frame: u64,

    /// Bits 52–63: reserved.
    #[bits(12)]
    __reserved2: u16,
}

impl Cr3 {
    /// CR3 value selecting `root` as PML4 with write-back caching.
    #[inline]
    #[must_use]
    pub const fn from_root(root: PhysicalPage<Size4K>) -> Self {
        Self::new().with_pml4_frame(root.number() & ((1 << 40) - 1))
    }

    /// The PML4 frame this value points at.
    #[inline]
    #[must_use]
    pub const fn root(self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(PhysicalAddress::new(self.pml4_frame() << 12))
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let cr3: u64;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86_64"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}
