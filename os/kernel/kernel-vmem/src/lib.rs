//! # Virtual Memory Support
//!
//! x86-64 four-level paging: entry encoding, table nodes and an
//! [`AddressSpace`] walker that maps, unmaps and translates.
//!
//! ## What you get
//! - [`PageFlags`] / [`PageEntry`]: typed bitfields; address and flags never
//!   share a raw integer.
//! - [`PageTable`]: one 4 KiB-aligned node of 512 entries, indexed per
//!   [`PageLevel`].
//! - [`MappingSize`]: 4 KiB, 2 MiB or 1 GiB leaves.
//! - The seams the walker needs from its environment: [`FrameAlloc`] for
//!   node frames, [`PhysMapper`] to reach a frame's bytes, and
//!   [`TranslationControl`] for the privileged CR3 / `invlpg` primitives.
//!
//! ## Address decomposition
//!
//! ```text
//! | 63‒48 | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | sign  |  PML4 |  PDPT |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  PML4 ──► PDPT ──► PD ──► PT ──► 4 KiB frame
//!             │        └──► PS=1: 2 MiB leaf (offset = VA[20:0])
//!             └───────────► PS=1: 1 GiB leaf (offset = VA[29:0])
//! ```
//!
//! A walk stops at the first entry that is a leaf for its level (see
//! [`PageLevel::is_leaf`]); the remaining low VA bits become the offset into
//! the mapped region.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
mod page_entry;
mod page_table;

pub use crate::address_space::{AddressSpace, Child, MapError, Mapped, Translation, Unmapped};
pub use crate::page_entry::{ADDRESS_MASK, PageEntry, PageFlags};
pub use crate::page_table::{ENTRIES, PageLevel, PageTable, TableIndex};

use core::fmt;
use kernel_memory_addresses::{
    PageSize, PhysicalAddress, PhysicalPage, Size1G, Size2M, Size4K, VirtualAddress,
};

/// Granularity of a single leaf mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MappingSize {
    /// PTE leaf.
    Size4K,
    /// PDE leaf with `PS=1`.
    Size2M,
    /// PDPTE leaf with `PS=1`.
    Size1G,
}

impl MappingSize {
    #[inline]
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Size4K => Size4K::SIZE,
            Self::Size2M => Size2M::SIZE,
            Self::Size1G => Size1G::SIZE,
        }
    }

    /// The level whose entries hold leaves of this size.
    #[inline]
    #[must_use]
    pub const fn level(self) -> PageLevel {
        match self {
            Self::Size4K => PageLevel::Pt,
            Self::Size2M => PageLevel::Pd,
            Self::Size1G => PageLevel::Pdpt,
        }
    }

    #[inline]
    #[must_use]
    pub const fn offset_mask(self) -> u64 {
        self.bytes() - 1
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, raw: u64) -> bool {
        raw & self.offset_mask() == 0
    }

    /// Largest size whose alignment both addresses satisfy, capped by
    /// whether a huge page was requested at all.
    ///
    /// Order of preference is 1 GiB, then 2 MiB, then 4 KiB; a huge request
    /// that fits neither huge size silently becomes a 4 KiB mapping.
    ///
    /// The virtual address must be aligned as well as the physical one. A
    /// huge leaf maps its whole aligned virtual region, so a physically
    /// aligned but virtually misaligned request would translate addresses
    /// below `va` and miss the tail past it.
    #[inline]
    #[must_use]
    pub const fn select(va: VirtualAddress, pa: PhysicalAddress, huge: bool) -> Self {
        if huge {
            if pa.is_aligned::<Size1G>() && va.is_aligned::<Size1G>() {
                return Self::Size1G;
            }
            if pa.is_aligned::<Size2M>() && va.is_aligned::<Size2M>() {
                return Self::Size2M;
            }
        }
        Self::Size4K
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size4K => "4K",
            Self::Size2M => "2M",
            Self::Size1G => "1G",
        }
    }
}

impl fmt::Display for MappingSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of **physical** 4 KiB frames for page-table nodes.
///
/// Returned frames must be 4 KiB aligned and exclusively owned by the caller
/// until handed back through [`free_4k`](Self::free_4k). `None` means the
/// pool is exhausted.
pub trait FrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&mut self, page: PhysicalPage<Size4K>);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        (**self).free_4k(page);
    }
}

/// Turns a physical address into a usable reference in the current virtual
/// address space (identity map, fixed offset, direct map, ...).
pub trait PhysMapper {
    /// # Safety
    /// - `pa` must be mapped writable in the active translation for `'a`.
    /// - The bytes at `pa` must be a valid `T`, and no other live reference
    ///   may alias them while the returned one is used.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// The privileged primitives behind an active address space.
pub trait TranslationControl {
    /// Make `root` the CPU's live translation root.
    ///
    /// # Safety
    /// The tree under `root` must map the currently executing code, its stack
    /// and every frame the caller still dereferences.
    unsafe fn load_root(&mut self, root: PhysicalPage<Size4K>);

    /// Drop any cached translation for the page containing `va`.
    fn invalidate(&mut self, va: VirtualAddress);
}

/// Map a physical page table frame to a typed node.
///
/// # Safety
/// `frame` must hold a page table and be reachable through `m`.
#[inline]
unsafe fn get_table<'a, M: PhysMapper>(m: &M, frame: PhysicalPage<Size4K>) -> &'a mut PageTable {
    unsafe { m.phys_to_mut::<PageTable>(frame.base()) }
}
