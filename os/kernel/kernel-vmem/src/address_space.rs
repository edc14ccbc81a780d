//! # Address Space (x86-64, PML4-rooted)
//!
//! A handle to one translation tree, rooted at a PML4 frame, with the three
//! tree operations:
//!
//! - [`AddressSpace::map`] installs one leaf, creating missing nodes, using
//!   the huge-page precedence of [`MappingSize::select`].
//! - [`AddressSpace::unmap`] clears the leaf covering an address and frees
//!   every node that became empty.
//! - [`AddressSpace::lookup`] / [`AddressSpace::translate`] walk read-only.
//!
//! ## Design
//!
//! - A map either fully succeeds or leaves no trace in the tree's shape:
//!   nodes created during a failing call are unlinked and returned to the
//!   allocator.
//! - Intermediate entries are present + writable. A user-accessible leaf also
//!   marks its parents user-accessible; other leaf bits never leak upward.
//! - Nothing here touches the TLB. Callers that mutate a live tree must
//!   invalidate the addresses reported in [`Mapped::replaced`] and
//!   [`Unmapped`] (the `Vmm` in `kernel-alloc` does).
//! - `unsafe` is confined to turning a frame into a `&mut PageTable` through
//!   the [`PhysMapper`].

mod error;
#[cfg(test)]
mod tests;

pub use crate::address_space::error::MapError;
use crate::{
    FrameAlloc, MappingSize, PageEntry, PageFlags, PageLevel, PageTable, PhysMapper, TableIndex,
    get_table,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::{debug, trace};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>,
    mapper: &'m M,
}

/// Result of a successful [`AddressSpace::map`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mapped {
    /// Granularity actually installed.
    pub size: MappingSize,
    /// The leaf that was overwritten, if any. A cached translation for it may
    /// still be live.
    pub replaced: Option<PageEntry>,
}

/// Result of an [`AddressSpace::unmap`] that found a leaf.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Unmapped {
    pub size: MappingSize,
    /// The cleared leaf.
    pub entry: PageEntry,
    /// Intermediate nodes freed because they became empty.
    pub reclaimed_tables: usize,
}

/// Result of a successful [`AddressSpace::lookup`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Translation {
    pub phys: PhysicalAddress,
    pub size: MappingSize,
    pub flags: PageFlags,
}

/// Frames of nodes created during one map call. At most PDPT, PD and PT.
struct Created {
    /// Parent entry the first new node was linked into.
    link: Option<(PhysicalPage<Size4K>, TableIndex)>,
    frames: [Option<PhysicalPage<Size4K>>; 3],
    len: usize,
}

impl Created {
    const fn new() -> Self {
        Self {
            link: None,
            frames: [None; 3],
            len: 0,
        }
    }

    const fn push(
        &mut self,
        parent: PhysicalPage<Size4K>,
        index: TableIndex,
        frame: PhysicalPage<Size4K>,
    ) {
        if self.link.is_none() {
            self.link = Some((parent, index));
        }
        self.frames[self.len] = Some(frame);
        self.len += 1;
    }
}

/// What sits below one entry, as seen by [`AddressSpace::get_or_create_child`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Child {
    /// An existing next-level node.
    Table(PhysicalPage<Size4K>),
    /// A node allocated, zeroed and linked by this call.
    Created(PhysicalPage<Size4K>),
    /// A leaf mapping; the walk must not descend through it.
    Leaf(PageEntry),
    /// Nothing, and creation was not requested.
    Absent,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap an existing root.
    #[inline]
    #[must_use]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Allocate a root node and clear it.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if `alloc` has no frame for the root.
    pub fn new_zeroed<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = alloc.alloc_4k().ok_or(MapError::OutOfMemory {
            level: PageLevel::Pml4,
        })?;
        let aspace = Self::from_root(mapper, root);
        aspace.table_mut(root).zero();
        debug!("address space root at {root}");
        Ok(aspace)
    }

    /// Physical page of the PML4.
    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    fn table_mut(&self, frame: PhysicalPage<Size4K>) -> &'m mut PageTable {
        // SAFETY: every frame handed to this function is a node of this tree,
        // zeroed on creation, and reachable through the mapper by contract.
        unsafe { get_table(self.mapper, frame) }
    }

    #[inline]
    fn table(&self, frame: PhysicalPage<Size4K>) -> &'m PageTable {
        self.table_mut(frame)
    }

    /// Follow entry `index` of the `level` node in `parent`.
    ///
    /// With `create` set, a missing node is allocated, zeroed and linked with
    /// the given flags; a present table entry gains the user bit if those
    /// flags carry it. Without `create` this never modifies the tree. Leaves
    /// are reported, never treated as tables.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if creation was requested and failed.
    pub fn get_or_create_child(
        &self,
        parent: PhysicalPage<Size4K>,
        level: PageLevel,
        index: TableIndex,
        create: Option<(&mut dyn FrameAlloc, PageFlags)>,
    ) -> Result<Child, MapError> {
        let table = self.table_mut(parent);
        let entry = table.get(index);

        if entry.present() {
            if level.is_leaf(entry) {
                return Ok(Child::Leaf(entry));
            }
            if let Some((_, flags)) = &create
                && flags.user()
                && !entry.user()
            {
                table.set(index, entry.with_user(true));
            }
            return Ok(Child::Table(entry.table_frame()));
        }

        let (Some((alloc, flags)), Some(next_level)) = (create, level.next()) else {
            return Ok(Child::Absent);
        };
        let child = alloc
            .alloc_4k()
            .ok_or(MapError::OutOfMemory { level: next_level })?;
        self.table_mut(child).zero();
        table.set(index, PageEntry::table(child, flags));
        debug!("new {next_level} node {child}");
        Ok(Child::Created(child))
    }

    /// Map `va → pa`, picking the granularity from `flags.huge()` and the
    /// alignment of both addresses.
    ///
    /// A huge request is honored as 1 GiB if both addresses are 1 GiB
    /// aligned, else as 2 MiB if both are 2 MiB aligned, else it silently
    /// becomes a 4 KiB mapping.
    ///
    /// # Errors
    /// - [`MapError::OutOfMemory`] if a node could not be allocated.
    /// - [`MapError::Conflict`] if the path crosses an incompatible entry.
    /// - [`MapError::NonCanonical`] for non-canonical `va`.
    /// - [`MapError::Unaligned`] if the addresses are not 4 KiB aligned.
    pub fn map<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<Mapped, MapError> {
        let size = MappingSize::select(va, pa, flags.huge());
        if flags.huge() && size == MappingSize::Size4K {
            debug!("huge mapping {va} -> {pa} demoted to 4K (alignment)");
        }
        self.map_sized(alloc, va, pa, size, flags)
    }

    /// Map `va → pa` as exactly one leaf of `size`.
    ///
    /// The leaf gets `flags` with `present` forced on and `huge` set exactly
    /// when `size` is not 4 KiB. An existing leaf of the same size is
    /// replaced and returned in [`Mapped::replaced`].
    ///
    /// # Errors
    /// As [`map`](Self::map); misalignment for `size` is an error here rather
    /// than a demotion.
    pub fn map_sized<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: MappingSize,
        flags: PageFlags,
    ) -> Result<Mapped, MapError> {
        if !va.is_canonical() {
            return Err(MapError::NonCanonical { va });
        }
        if !size.is_aligned(va.as_u64()) || !size.is_aligned(pa.as_u64()) {
            return Err(MapError::Unaligned { va, pa, size });
        }

        let mut created = Created::new();
        let result = self.install(alloc, va, pa, size, flags, &mut created);
        if result.is_err() {
            self.roll_back(alloc, &created);
        }
        result
    }

    fn install<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: MappingSize,
        flags: PageFlags,
        created: &mut Created,
    ) -> Result<Mapped, MapError> {
        let parent_flags = PageFlags::TABLE.with_user(flags.user());
        let target = size.level();

        let mut frame = self.root;
        let mut level = PageLevel::Pml4;
        while level != target {
            let Some(next_level) = level.next() else {
                break;
            };
            let index = level.index_of(va);
            let create: (&mut dyn FrameAlloc, PageFlags) = (&mut *alloc, parent_flags);
            frame = match self.get_or_create_child(frame, level, index, Some(create))? {
                Child::Table(next) => next,
                Child::Created(next) => {
                    created.push(frame, index, next);
                    next
                }
                Child::Leaf(_) | Child::Absent => return Err(MapError::Conflict { va, level }),
            };
            level = next_level;
        }

        let table = self.table_mut(frame);
        let index = level.index_of(va);
        let old = table.get(index);
        if old.present() && size != MappingSize::Size4K && !old.huge() {
            return Err(MapError::Conflict { va, level });
        }

        let leaf_flags = flags.with_huge(size != MappingSize::Size4K);
        table.set(index, PageEntry::leaf(pa, leaf_flags));
        trace!("map {va} -> {pa} ({size})");

        Ok(Mapped {
            size,
            replaced: old.present().then_some(old),
        })
    }

    /// Undo the node creations recorded in `created`.
    ///
    /// New nodes form a single chain below the first one, so unlinking that
    /// one entry detaches all of them.
    fn roll_back<A: FrameAlloc>(&self, alloc: &mut A, created: &Created) {
        let Some((parent, index)) = created.link else {
            return;
        };
        self.table_mut(parent).clear(index);
        for frame in created.frames.iter().take(created.len).flatten() {
            alloc.free_4k(*frame);
        }
        debug!("rolled back {} node(s)", created.len);
    }

    /// Remove the leaf covering `va`, whatever its size, and free the nodes
    /// left empty by that. The root is never freed.
    ///
    /// Returns `None` if nothing was mapped at `va`. Never allocates.
    pub fn unmap<A: FrameAlloc>(&self, alloc: &mut A, va: VirtualAddress) -> Option<Unmapped> {
        if !va.is_canonical() {
            return None;
        }

        let mut path = [(self.root, TableIndex::from_bits(0)); 4];
        let mut depth = 0;
        let mut frame = self.root;
        let mut level = PageLevel::Pml4;

        loop {
            let index = level.index_of(va);
            path[depth] = (frame, index);
            depth += 1;

            match self.get_or_create_child(frame, level, index, None) {
                Ok(Child::Table(next)) => frame = next,
                Ok(Child::Leaf(entry)) => {
                    let size = level.leaf_size()?;
                    self.table_mut(frame).clear(index);
                    trace!("unmap {va} ({size})");
                    let reclaimed_tables = self.reclaim_empty(alloc, &path[..depth]);
                    return Some(Unmapped {
                        size,
                        entry,
                        reclaimed_tables,
                    });
                }
                _ => return None,
            }
            level = level.next()?;
        }
    }

    /// Free empty nodes along `path`, deepest first, stopping at the first
    /// node that still has entries.
    fn reclaim_empty<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        path: &[(PhysicalPage<Size4K>, TableIndex)],
    ) -> usize {
        let mut freed = 0;
        for depth in (1..path.len()).rev() {
            let (frame, _) = path[depth];
            if !self.table(frame).is_empty() {
                break;
            }
            let (parent, index) = path[depth - 1];
            self.table_mut(parent).clear(index);
            alloc.free_4k(frame);
            debug!("reclaimed empty node {frame}");
            freed += 1;
        }
        freed
    }

    /// Walk the tree for `va` without modifying it.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<Translation> {
        if !va.is_canonical() {
            return None;
        }

        let mut frame = self.root;
        let mut level = PageLevel::Pml4;
        loop {
            match self.get_or_create_child(frame, level, level.index_of(va), None) {
                Ok(Child::Table(next)) => frame = next,
                Ok(Child::Leaf(entry)) => {
                    let size = level.leaf_size()?;
                    let base = entry.base().as_u64() & !size.offset_mask();
                    let offset = va.as_u64() & size.offset_mask();
                    return Some(Translation {
                        phys: PhysicalAddress::new(base | offset),
                        size,
                        flags: entry.flags(),
                    });
                }
                _ => return None,
            }
            level = level.next()?;
        }
    }

    /// Physical address `va` resolves to, including its in-page offset.
    #[inline]
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va).map(|t| t.phys)
    }

    /// Number of nodes in the tree, root included.
    #[must_use]
    pub fn table_frames(&self) -> usize {
        self.count_nodes(self.root, PageLevel::Pml4)
    }

    fn count_nodes(&self, frame: PhysicalPage<Size4K>, level: PageLevel) -> usize {
        let Some(next) = level.next() else {
            return 1;
        };
        1 + self
            .table(frame)
            .iter_present()
            .filter(|(_, e)| !level.is_leaf(*e))
            .map(|(_, e)| self.count_nodes(e.table_frame(), next))
            .sum::<usize>()
    }
}
