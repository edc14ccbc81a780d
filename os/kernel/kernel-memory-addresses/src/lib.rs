//! # Physical and Virtual Address Types
//!
//! Zero-cost newtypes that keep physical and virtual addresses apart and make
//! page alignment explicit in the type system.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A raw machine (bus) address. |
//! | [`VirtualAddress`] | An address as seen through the page tables. |
//! | [`PhysicalPage<S>`] | The aligned base of a physical page (frame) of size `S`. |
//! | [`VirtualPage<S>`] | The aligned base of a virtual page of size `S`. |
//! | [`PageOffset<S>`] | A byte offset inside a page of size `S`. |
//!
//! The page size is a marker type implementing [`PageSize`]:
//! [`Size4K`], [`Size2M`] and [`Size1G`], the three leaf sizes of x86-64
//! four-level paging.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xFFFF_FFFF_8000_1234);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u64(), 0xFFFF_FFFF_8000_1000);
//! assert_eq!(off.as_u64(), 0x234);
//! assert_eq!(page.join(off), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

use core::fmt;
use core::hash::Hash;
use core::marker::PhantomData;

mod sealed {
    pub trait Sealed {}
}

/// Marker trait for the supported page sizes.
pub trait PageSize:
    sealed::Sealed + Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + 'static
{
    /// Page size in bytes (power of two).
    const SIZE: u64;
    /// `log2(SIZE)`: number of low address bits that form the in-page offset.
    const SHIFT: u32;
    /// Mask selecting the in-page offset bits.
    const OFFSET_MASK: u64 = Self::SIZE - 1;

    /// Short human readable name, e.g. `"2M"`.
    fn as_str() -> &'static str;
}

macro_rules! page_size {
    ($(#[$meta:meta])* $name:ident, $shift:literal, $label:literal) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name;

        impl sealed::Sealed for $name {}

        impl PageSize for $name {
            const SIZE: u64 = 1 << $shift;
            const SHIFT: u32 = $shift;

            fn as_str() -> &'static str {
                $label
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str($label)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str($label)
            }
        }
    };
}

page_size!(
    /// 4 KiB page, the base granularity and the size of every page-table node.
    Size4K, 12, "4K"
);
page_size!(
    /// 2 MiB huge page, mapped by a page-directory entry.
    Size2M, 21, "2M"
);
page_size!(
    /// 1 GiB huge page, mapped by a page-directory-pointer entry.
    Size1G, 30, "1G"
);

/// Offset of an address inside a page of size `S` (`0..S::SIZE`).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset<S: PageSize> {
    value: u64,
    _size: PhantomData<S>,
}

impl<S: PageSize> PageOffset<S> {
    /// Take the offset bits of `raw`; higher bits are discarded.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            value: raw & S::OFFSET_MASK,
            _size: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.value
    }
}

impl<S: PageSize> fmt::Debug for PageOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset<{}>({:#X})", S::as_str(), self.value)
    }
}

macro_rules! address {
    ($(#[$meta:meta])* $name:ident, $page:ident, $short:literal) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $name(u64);

        impl $name {
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            #[inline]
            #[must_use]
            pub const fn zero() -> Self {
                Self(0)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// `true` if the address is a multiple of `S::SIZE`.
            #[inline]
            #[must_use]
            pub const fn is_aligned<S: PageSize>(self) -> bool {
                self.0 & S::OFFSET_MASK == 0
            }

            /// `true` if the address is a multiple of `align` (a power of two).
            #[inline]
            #[must_use]
            pub const fn is_aligned_to(self, align: u64) -> bool {
                debug_assert!(align.is_power_of_two());
                self.0 & (align - 1) == 0
            }

            /// Clear the in-page offset bits for page size `S`.
            #[inline]
            #[must_use]
            pub const fn align_down<S: PageSize>(self) -> Self {
                Self(self.0 & !S::OFFSET_MASK)
            }

            /// The page of size `S` containing this address.
            #[inline]
            #[must_use]
            pub const fn page<S: PageSize>(self) -> $page<S> {
                $page::containing(self)
            }

            /// The offset of this address inside its page of size `S`.
            #[inline]
            #[must_use]
            pub const fn offset<S: PageSize>(self) -> PageOffset<S> {
                PageOffset::from_raw(self.0)
            }

            /// Split into page base and in-page offset.
            #[inline]
            #[must_use]
            pub const fn split<S: PageSize>(self) -> ($page<S>, PageOffset<S>) {
                (self.page::<S>(), self.offset::<S>())
            }

            /// Add `bytes`, returning `None` on overflow.
            #[inline]
            #[must_use]
            pub const fn checked_add(self, bytes: u64) -> Option<Self> {
                match self.0.checked_add(bytes) {
                    Some(v) => Some(Self(v)),
                    None => None,
                }
            }

            /// Add `bytes`, wrapping around at the top of the address space.
            #[inline]
            #[must_use]
            pub const fn wrapping_add(self, bytes: u64) -> Self {
                Self(self.0.wrapping_add(bytes))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($short, "(0x{:016X})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016X}", self.0)
            }
        }

        impl fmt::LowerHex for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::LowerHex::fmt(&self.0, f)
            }
        }

        impl From<u64> for $name {
            #[inline]
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(value: $name) -> Self {
                value.0
            }
        }

        /// Aligned page base of size `S`.
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        pub struct $page<S: PageSize> {
            base: $name,
            _size: PhantomData<S>,
        }

        impl<S: PageSize> $page<S> {
            /// The page containing `addr` (aligns down).
            #[inline]
            #[must_use]
            pub const fn containing(addr: $name) -> Self {
                Self {
                    base: addr.align_down::<S>(),
                    _size: PhantomData,
                }
            }

            /// The page starting exactly at `addr`, or `None` if `addr` is not
            /// aligned to `S`.
            #[inline]
            #[must_use]
            pub const fn from_aligned(addr: $name) -> Option<Self> {
                if addr.is_aligned::<S>() {
                    Some(Self::containing(addr))
                } else {
                    None
                }
            }

            #[inline]
            #[must_use]
            pub const fn base(self) -> $name {
                self.base
            }

            /// Combine with an in-page offset.
            #[inline]
            #[must_use]
            pub const fn join(self, off: PageOffset<S>) -> $name {
                $name(self.base.0 | off.as_u64())
            }

            /// Page number, i.e. the base shifted right by `S::SHIFT`.
            #[inline]
            #[must_use]
            pub const fn number(self) -> u64 {
                self.base.0 >> S::SHIFT
            }
        }

        impl<S: PageSize> fmt::Debug for $page<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($short, "Page<{}>(0x{:016X})"), S::as_str(), self.base.0)
            }
        }

        impl<S: PageSize> fmt::Display for $page<S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:016X}/{}", self.base.0, S::as_str())
            }
        }

        impl<S: PageSize> From<$page<S>> for $name {
            #[inline]
            fn from(page: $page<S>) -> Self {
                page.base()
            }
        }
    };
}

address!(
    /// Physical memory address.
    ///
    /// Carries intent only; no alignment or range checks are implied.
    PhysicalAddress, PhysicalPage, "PA"
);

address!(
    /// Virtual memory address.
    ///
    /// Carries intent only; canonicality can be checked with
    /// [`VirtualAddress::is_canonical`].
    VirtualAddress, VirtualPage, "VA"
);

impl VirtualAddress {
    /// Bits 47..=63 must all equal bit 47 for a 48-bit canonical address.
    #[inline]
    #[must_use]
    pub const fn is_canonical(self) -> bool {
        let upper = self.0 >> 47;
        upper == 0 || upper == 0x1_FFFF
    }

    /// Sign-extend bit 47 into bits 48..=63.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
    pub const fn canonicalize(self) -> Self {
        Self((((self.0 << 16) as i64) >> 16) as u64)
    }
}
