//! # Page table entries
//!
//! One 64-bit format serves all four levels. The physical frame number lives
//! in bits 12–51; everything else is flags. [`PageFlags`] models only the flag
//! bits (the address hole is padding), so a flag value can never smuggle
//! address bits into an entry. [`PageEntry`] keeps its frame field private and
//! is built through [`PageEntry::leaf`] / [`PageEntry::table`], which take
//! typed addresses.
//!
//! | Bits   | Field            | Notes |
//! |--------|------------------|-------|
//! | 0      | `present`        | |
//! | 1      | `writable`       | |
//! | 2      | `user`           | effective only if set at every level |
//! | 3      | `write_through`  | PWT |
//! | 4      | `cache_disable`  | PCD |
//! | 5      | `accessed`       | set by the CPU |
//! | 6      | `dirty`          | set by the CPU, leaves only |
//! | 7      | `huge`           | PS in PDPTE/PDE; PAT in a PTE |
//! | 8      | `global`         | leaves only, needs `CR4.PGE` |
//! | 9–11   | `os_low`         | ignored by hardware |
//! | 12–51  | frame number     | |
//! | 52–58  | `os_high`        | ignored by hardware |
//! | 59–62  | `protection_key` | with `CR4.PKE`, else ignored |
//! | 63     | `no_execute`     | needs `EFER.NXE` |

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Bits 12–51 of an entry.
pub const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Flag bits of a page table entry.
#[bitfield(u64)]
#[derive(PartialEq, Eq, Hash)]
pub struct PageFlags {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    /// Request a 2 MiB / 1 GiB mapping when alignment permits.
    pub huge: bool,
    pub global: bool,
    #[bits(3)]
    pub os_low: u8,
    #[bits(40)]
    __: u64,
    #[bits(7)]
    pub os_high: u8,
    #[bits(4)]
    pub protection_key: u8,
    pub no_execute: bool,
}

impl PageFlags {
    /// Present and writable, supervisor only.
    pub const KERNEL_RW: Self = Self::new().with_present(true).with_writable(true);

    /// [`KERNEL_RW`](Self::KERNEL_RW) plus the huge-page request.
    pub const KERNEL_RW_HUGE: Self = Self::KERNEL_RW.with_huge(true);

    /// Flags for intermediate (non-leaf) entries.
    pub const TABLE: Self = Self::KERNEL_RW;

    /// `true` if every bit set in `other` is also set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.into_bits() & other.into_bits() == other.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self::from_bits(self.into_bits() | other.into_bits())
    }

    /// Drop the CPU-maintained status bits (accessed, dirty).
    #[inline]
    #[must_use]
    pub const fn without_status(self) -> Self {
        self.with_accessed(false).with_dirty(false)
    }

    /// Strip anything that is not a flag bit.
    #[inline]
    #[must_use]
    const fn sanitized(self) -> Self {
        Self::from_bits(self.into_bits() & !ADDRESS_MASK)
    }
}

/// A raw 64-bit page table entry at any level.
#[bitfield(u64)]
#[derive(PartialEq, Eq, Hash)]
pub struct PageEntry {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disable: bool,
    pub accessed: bool,
    pub dirty: bool,
    /// PS at PDPT/PD level. Meaningless on a 4 KiB leaf.
    pub huge: bool,
    pub global: bool,
    #[bits(3)]
    pub os_low: u8,
    /// Physical frame number (`base >> 12`).
    #[bits(40)]
    frame: u64,
    #[bits(7)]
    pub os_high: u8,
    #[bits(4)]
    pub protection_key: u8,
    pub no_execute: bool,
}

impl PageEntry {
    /// The not-present entry.
    pub const EMPTY: Self = Self::new();

    /// Leaf entry mapping the frame at `base`; `present` is forced on.
    ///
    /// `base` must be 4 KiB aligned; huge leaves additionally require the
    /// caller to have checked the 2 MiB / 1 GiB alignment.
    #[inline]
    #[must_use]
    pub const fn leaf(base: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(base.is_aligned::<Size4K>(), "leaf base not frame aligned");
        Self::from_bits(flags.sanitized().with_present(true).into_bits())
            .with_frame((base.as_u64() & ADDRESS_MASK) >> 12)
    }

    /// Non-leaf entry pointing at the next table in `frame`.
    #[inline]
    #[must_use]
    pub const fn table(frame: PhysicalPage<Size4K>, flags: PageFlags) -> Self {
        Self::leaf(frame.base(), flags.with_huge(false))
    }

    /// Physical base address stored in the entry (frame aligned).
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    /// The next-level table this entry points at.
    ///
    /// Only meaningful for present non-leaf entries.
    #[inline]
    #[must_use]
    pub const fn table_frame(self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(self.base())
    }

    /// Everything except the address bits.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_bits(self.into_bits() & !ADDRESS_MASK)
    }
}
