//! # Page table nodes
//!
//! A node is one 4 KiB frame holding 512 [`PageEntry`] values. [`PageLevel`]
//! names the four levels and knows which virtual address bits index them.

use crate::{MappingSize, PageEntry};
use core::fmt;
use kernel_memory_addresses::VirtualAddress;

/// Entries per table.
pub const ENTRIES: usize = 512;

/// Index into a page table, always `< 512`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    #[inline]
    #[must_use]
    pub const fn new(index: u16) -> Option<Self> {
        if (index as usize) < ENTRIES {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Low nine bits of `raw`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_bits(raw: u64) -> Self {
        Self((raw & 0x1FF) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// The four levels of the translation tree, root first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PageLevel {
    /// Root; indexed by VA bits 39–47.
    Pml4,
    /// Indexed by VA bits 30–38. May hold 1 GiB leaves.
    Pdpt,
    /// Indexed by VA bits 21–29. May hold 2 MiB leaves.
    Pd,
    /// Indexed by VA bits 12–20. Holds 4 KiB leaves only.
    Pt,
}

impl PageLevel {
    /// Lowest VA bit of this level's index.
    #[inline]
    #[must_use]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pml4 => 39,
            Self::Pdpt => 30,
            Self::Pd => 21,
            Self::Pt => 12,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index_of(self, va: VirtualAddress) -> TableIndex {
        TableIndex::from_bits(va.as_u64() >> self.shift())
    }

    /// The level below, or `None` for [`PageLevel::Pt`].
    #[inline]
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pml4 => Some(Self::Pdpt),
            Self::Pdpt => Some(Self::Pd),
            Self::Pd => Some(Self::Pt),
            Self::Pt => None,
        }
    }

    /// Size of a leaf installed at this level; the root holds no leaves.
    #[inline]
    #[must_use]
    pub const fn leaf_size(self) -> Option<MappingSize> {
        match self {
            Self::Pml4 => None,
            Self::Pdpt => Some(MappingSize::Size1G),
            Self::Pd => Some(MappingSize::Size2M),
            Self::Pt => Some(MappingSize::Size4K),
        }
    }

    /// Whether `entry` (present) at this level ends the walk.
    #[inline]
    #[must_use]
    pub const fn is_leaf(self, entry: PageEntry) -> bool {
        match self {
            Self::Pml4 => false,
            Self::Pdpt | Self::Pd => entry.huge(),
            Self::Pt => true,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pml4 => "PML4",
            Self::Pdpt => "PDPT",
            Self::Pd => "PD",
            Self::Pt => "PT",
        }
    }
}

impl fmt::Display for PageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame-sized, frame-aligned node of the translation tree.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageEntry; ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PageEntry::EMPTY; ENTRIES],
        }
    }

    /// Clear all entries, e.g. on a freshly allocated frame.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageEntry::EMPTY);
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, entry: PageEntry) {
        self.entries[i.as_usize()] = entry;
    }

    #[inline]
    pub const fn clear(&mut self, i: TableIndex) {
        self.set(i, PageEntry::EMPTY);
    }

    /// No present entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| !e.present())
    }

    #[must_use]
    pub fn present_count(&self) -> usize {
        self.entries.iter().filter(|e| e.present()).count()
    }

    /// Present entries with their indices.
    pub fn iter_present(&self) -> impl Iterator<Item = (TableIndex, PageEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.present())
            .map(|(i, e)| (TableIndex::from_bits(i as u64), *e))
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::zeroed()
    }
}
