use super::*;
use crate::get_table;
use kernel_memory_addresses::PageSize;

/// A 4 KiB-aligned raw frame; the backing store for simulated RAM.
#[repr(align(4096))]
struct Aligned4K([u8; 4096]);

/// Simulated physical memory: physical address `n * 4096` is `frames[n]`.
struct TestPhys {
    frames: Vec<Aligned4K>,
}

impl TestPhys {
    fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n).map(|_| Aligned4K([0xA5; 4096])).collect(),
        }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let idx = (pa.as_u64() >> 12) as usize;
        assert_eq!(pa.as_u64() & 0xFFF, 0, "table access must be frame aligned");
        assert!(idx < self.frames.len(), "{pa} outside simulated RAM");
        let ptr = self.frames[idx].0.as_ptr().cast_mut();
        unsafe { &mut *ptr.cast::<T>() }
    }
}

/// Bump allocator with LIFO reuse that counts live frames.
struct CountingAlloc {
    next: u64,
    end: u64,
    free: Vec<PhysicalPage<Size4K>>,
    live: usize,
}

impl CountingAlloc {
    fn frames(n: u64) -> Self {
        Self {
            next: 0,
            end: n << 12,
            free: Vec::new(),
            live: 0,
        }
    }
}

impl FrameAlloc for CountingAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        let page = if let Some(p) = self.free.pop() {
            p
        } else if self.next < self.end {
            let p = PhysicalPage::containing(PhysicalAddress::new(self.next));
            self.next += Size4K::SIZE;
            p
        } else {
            return None;
        };
        self.live += 1;
        Some(page)
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        assert!(!self.free.contains(&page), "double free of {page}");
        self.free.push(page);
        self.live -= 1;
    }
}

fn setup(frames: u64) -> (TestPhys, CountingAlloc) {
    (TestPhys::with_frames(64), CountingAlloc::frames(frames))
}

const fn va(raw: u64) -> VirtualAddress {
    VirtualAddress::new(raw)
}

const fn pa(raw: u64) -> PhysicalAddress {
    PhysicalAddress::new(raw)
}

#[test]
fn map_4k_creates_tables_and_leaf() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let v = va(0xFFFF_8000_0000_0000);
    let p = pa(0x0030_0000);
    let flags = PageFlags::KERNEL_RW.with_global(true).with_no_execute(true);

    let mapped = aspace.map(&mut alloc, v, p, flags).expect("map");
    assert_eq!(mapped.size, MappingSize::Size4K);
    assert_eq!(mapped.replaced, None);

    // Walk by hand: every intermediate entry is a plain present+writable link.
    let mut frame = aspace.root_page();
    for level in [PageLevel::Pml4, PageLevel::Pdpt, PageLevel::Pd] {
        let e = unsafe { get_table(&phys, frame) }.get(level.index_of(v));
        assert!(e.present() && e.writable(), "{level}");
        assert!(!e.huge() && !e.user() && !e.no_execute(), "{level}");
        frame = e.table_frame();
    }
    let leaf = unsafe { get_table(&phys, frame) }.get(PageLevel::Pt.index_of(v));
    assert_eq!(leaf.base(), p);
    assert!(leaf.global() && leaf.no_execute());

    assert_eq!(aspace.table_frames(), 4);
    assert_eq!(alloc.live, 4);
}

#[test]
fn translate_returns_mapped_address_and_flags() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let flags = PageFlags::KERNEL_RW
        .with_user(true)
        .with_write_through(true)
        .with_cache_disable(true)
        .with_no_execute(true);
    aspace.map(&mut alloc, va(0x7000), pa(0x1234_5000), flags).unwrap();

    assert_eq!(aspace.translate(va(0x7000)), Some(pa(0x1234_5000)));
    assert_eq!(aspace.translate(va(0x7ABC)), Some(pa(0x1234_5ABC)));
    assert_eq!(aspace.translate(va(0x8000)), None);

    let t = aspace.lookup(va(0x7000)).unwrap();
    assert_eq!(t.size, MappingSize::Size4K);
    assert!(t.flags.contains(flags));
}

#[test]
fn map_2m_uses_one_directory_node_and_no_leaf_table() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let v = va(0x0000_0000_4020_0000);
    let p = pa(0x0060_0000);
    let mapped = aspace.map(&mut alloc, v, p, PageFlags::KERNEL_RW_HUGE).unwrap();
    assert_eq!(mapped.size, MappingSize::Size2M);

    // root + PDPT + PD, no PT
    assert_eq!(aspace.table_frames(), 3);
    assert_eq!(alloc.live, 3);

    for k in [0, 1, 0x1000, 0x1F_FFFF] {
        assert_eq!(aspace.translate(v.wrapping_add(k)), Some(p.wrapping_add(k)));
    }
    assert_eq!(aspace.translate(v.wrapping_add(0x20_0000)), None);
}

#[test]
fn map_1g_needs_no_directory_or_leaf_table() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let v = va(0x0000_0080_0000_0000);
    let p = pa(0x4000_0000);
    let mapped = aspace.map(&mut alloc, v, p, PageFlags::KERNEL_RW_HUGE).unwrap();
    assert_eq!(mapped.size, MappingSize::Size1G);

    // root + PDPT only
    assert_eq!(aspace.table_frames(), 2);
    assert_eq!(alloc.live, 2);
    assert_eq!(aspace.translate(v.wrapping_add(0x3FFF_FFFF)), Some(pa(0x7FFF_FFFF)));
}

#[test]
fn two_meg_aligned_physical_yields_2m_never_1g() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    // VA is 1 GiB aligned but PA only 2 MiB aligned.
    let v = va(0x4000_0000);
    let mapped = aspace
        .map(&mut alloc, v, pa(0x0020_0000), PageFlags::KERNEL_RW_HUGE)
        .unwrap();
    assert_eq!(mapped.size, MappingSize::Size2M);
    assert_eq!(aspace.lookup(v).unwrap().size, MappingSize::Size2M);
}

#[test]
fn unaligned_huge_request_falls_back_to_4k() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let mapped = aspace
        .map(&mut alloc, va(0x0020_0000), pa(0x0030_1000), PageFlags::KERNEL_RW_HUGE)
        .unwrap();
    assert_eq!(mapped.size, MappingSize::Size4K);

    let t = aspace.lookup(va(0x0020_0000)).unwrap();
    assert_eq!(t.phys, pa(0x0030_1000));
    // bit 7 is PAT in a PTE; it must not leak through
    assert!(!t.flags.huge());
}

#[test]
fn unmap_then_translate_is_absent_and_idempotent() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();
    let v = va(0xFFFF_FFFF_8000_0000);

    assert_eq!(aspace.unmap(&mut alloc, v), None);
    assert_eq!(alloc.live, 1, "unmap must not allocate");

    aspace.map(&mut alloc, v, pa(0x10_0000), PageFlags::KERNEL_RW).unwrap();
    let un = aspace.unmap(&mut alloc, v).unwrap();
    assert_eq!(un.size, MappingSize::Size4K);
    assert_eq!(un.entry.base(), pa(0x10_0000));
    assert_eq!(aspace.translate(v), None);

    assert_eq!(aspace.unmap(&mut alloc, v), None);
}

#[test]
fn unmap_reclaims_empty_nodes_but_never_the_root() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();
    let v = va(0x0000_1234_5678_9000);

    aspace.map(&mut alloc, v, pa(0x9000), PageFlags::KERNEL_RW).unwrap();
    assert_eq!(aspace.table_frames(), 4);

    let un = aspace.unmap(&mut alloc, v).unwrap();
    assert_eq!(un.reclaimed_tables, 3);
    assert_eq!(aspace.table_frames(), 1);
    assert_eq!(alloc.live, 1);

    // Reclaimed frames are reused.
    aspace.map(&mut alloc, v, pa(0x9000), PageFlags::KERNEL_RW).unwrap();
    assert_eq!(alloc.live, 4);
    assert_eq!(alloc.next, 4 << 12);
}

#[test]
fn unmap_keeps_nodes_still_in_use() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    aspace.map(&mut alloc, va(0x1000), pa(0x1000), PageFlags::KERNEL_RW).unwrap();
    aspace.map(&mut alloc, va(0x2000), pa(0x2000), PageFlags::KERNEL_RW).unwrap();

    let un = aspace.unmap(&mut alloc, va(0x1000)).unwrap();
    assert_eq!(un.reclaimed_tables, 0);
    assert_eq!(aspace.translate(va(0x2000)), Some(pa(0x2000)));
    assert_eq!(aspace.table_frames(), 4);
}

#[test]
fn unmap_inside_huge_page_clears_the_whole_leaf() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    aspace
        .map(&mut alloc, va(0x0040_0000), pa(0x0040_0000), PageFlags::KERNEL_RW_HUGE)
        .unwrap();
    let un = aspace.unmap(&mut alloc, va(0x0045_6789)).unwrap();
    assert_eq!(un.size, MappingSize::Size2M);
    assert_eq!(aspace.translate(va(0x0040_0000)), None);
    assert_eq!(aspace.table_frames(), 1);
}

#[test]
fn unmap_1g_leaf_reclaims_the_pdpt() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let v = va(0x0000_0080_0000_0000);
    aspace
        .map(&mut alloc, v, pa(0x4000_0000), PageFlags::KERNEL_RW_HUGE)
        .unwrap();
    assert_eq!(alloc.live, 2);

    let un = aspace.unmap(&mut alloc, v.wrapping_add(0x1234_5000)).unwrap();
    assert_eq!(un.size, MappingSize::Size1G);
    assert_eq!(un.entry.base(), pa(0x4000_0000));
    assert_eq!(un.reclaimed_tables, 1);

    assert_eq!(aspace.translate(v), None);
    assert_eq!(aspace.table_frames(), 1);
    assert_eq!(alloc.live, 1);
    let root_entry = unsafe { get_table(&phys, aspace.root_page()) }.get(PageLevel::Pml4.index_of(v));
    assert!(!root_entry.present());
}

#[test]
fn out_of_memory_rolls_back_new_nodes() {
    // Root + PDPT only; the PD allocation fails.
    let (phys, mut alloc) = setup(2);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let err = aspace
        .map(&mut alloc, va(0x5000), pa(0x5000), PageFlags::KERNEL_RW)
        .unwrap_err();
    assert_eq!(err, MapError::OutOfMemory { level: PageLevel::Pd });

    assert_eq!(aspace.table_frames(), 1);
    assert_eq!(alloc.live, 1);
    assert_eq!(aspace.translate(va(0x5000)), None);
    assert!(unsafe { get_table(&phys, aspace.root_page()) }.is_empty());
}

#[test]
fn out_of_memory_keeps_preexisting_nodes() {
    let (phys, mut alloc) = setup(4);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();
    aspace.map(&mut alloc, va(0x1000), pa(0x1000), PageFlags::KERNEL_RW).unwrap();

    // Same PDPT, different PD entry: needs a fresh PT, which is unavailable.
    let err = aspace
        .map(&mut alloc, va(0x0020_0000), pa(0x1000), PageFlags::KERNEL_RW)
        .unwrap_err();
    assert_eq!(err, MapError::OutOfMemory { level: PageLevel::Pt });
    assert_eq!(aspace.translate(va(0x1000)), Some(pa(0x1000)));
    assert_eq!(aspace.table_frames(), 4);
}

#[test]
fn mixing_granularities_is_a_conflict() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    aspace
        .map(&mut alloc, va(0x0020_0000), pa(0x0020_0000), PageFlags::KERNEL_RW_HUGE)
        .unwrap();
    assert_eq!(
        aspace.map(&mut alloc, va(0x0020_1000), pa(0x9000), PageFlags::KERNEL_RW),
        Err(MapError::Conflict {
            va: va(0x0020_1000),
            level: PageLevel::Pd
        })
    );

    aspace.map(&mut alloc, va(0x0060_0000), pa(0x9000), PageFlags::KERNEL_RW).unwrap();
    assert_eq!(
        aspace.map(&mut alloc, va(0x0060_0000), pa(0x0060_0000), PageFlags::KERNEL_RW_HUGE),
        Err(MapError::Conflict {
            va: va(0x0060_0000),
            level: PageLevel::Pd
        })
    );
    assert_eq!(aspace.translate(va(0x0060_0000)), Some(pa(0x9000)));
}

#[test]
fn remap_reports_the_replaced_leaf() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    aspace.map(&mut alloc, va(0x3000), pa(0xA000), PageFlags::KERNEL_RW).unwrap();
    let again = aspace
        .map(&mut alloc, va(0x3000), pa(0xB000), PageFlags::KERNEL_RW)
        .unwrap();
    assert_eq!(again.replaced.map(PageEntry::base), Some(pa(0xA000)));
    assert_eq!(aspace.translate(va(0x3000)), Some(pa(0xB000)));
}

#[test]
fn user_leaf_marks_parents_user_accessible() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let v = va(0x0040_0000);
    aspace.map(&mut alloc, v, pa(0x1000), PageFlags::KERNEL_RW).unwrap();
    let root_entry =
        || unsafe { get_table(&phys, aspace.root_page()) }.get(PageLevel::Pml4.index_of(v));
    assert!(!root_entry().user());

    aspace
        .map(&mut alloc, va(0x0040_1000), pa(0x2000), PageFlags::KERNEL_RW.with_user(true))
        .unwrap();
    assert!(root_entry().user());
    assert!(!aspace.lookup(v).unwrap().flags.user());
}

#[test]
fn rejects_bad_addresses() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();

    let bad = va(0x0000_8000_0000_0000);
    assert_eq!(
        aspace.map(&mut alloc, bad, pa(0), PageFlags::KERNEL_RW),
        Err(MapError::NonCanonical { va: bad })
    );
    assert_eq!(aspace.translate(bad), None);

    assert_eq!(
        aspace.map_sized(
            &mut alloc,
            va(0x1000),
            pa(0x1000),
            MappingSize::Size2M,
            PageFlags::KERNEL_RW
        ),
        Err(MapError::Unaligned {
            va: va(0x1000),
            pa: pa(0x1000),
            size: MappingSize::Size2M
        })
    );
    assert_eq!(alloc.live, 1);
}

#[test]
fn root_allocation_failure() {
    let (phys, mut alloc) = setup(0);
    assert!(matches!(
        AddressSpace::new_zeroed(&phys, &mut alloc),
        Err(MapError::OutOfMemory {
            level: PageLevel::Pml4
        })
    ));
}

#[test]
fn child_lookup_without_creation_never_allocates() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();
    let root = aspace.root_page();
    let index = TableIndex::new(3).unwrap();

    assert_eq!(
        aspace.get_or_create_child(root, PageLevel::Pml4, index, None),
        Ok(Child::Absent)
    );
    assert_eq!(alloc.live, 1);

    let create: (&mut dyn FrameAlloc, PageFlags) = (&mut alloc, PageFlags::TABLE);
    let created = aspace
        .get_or_create_child(root, PageLevel::Pml4, index, Some(create))
        .unwrap();
    let Child::Created(pdpt) = created else {
        panic!("expected a new node, got {created:?}");
    };
    assert_eq!(
        aspace.get_or_create_child(root, PageLevel::Pml4, index, None),
        Ok(Child::Table(pdpt))
    );
    assert_eq!(alloc.live, 2);
}

#[test]
fn child_lookup_reports_huge_leaves() {
    let (phys, mut alloc) = setup(64);
    let aspace = AddressSpace::new_zeroed(&phys, &mut alloc).unwrap();
    let v = va(0x4000_0000);
    aspace.map(&mut alloc, v, pa(0x4000_0000), PageFlags::KERNEL_RW_HUGE).unwrap();

    let Ok(Child::Table(pdpt)) = aspace.get_or_create_child(
        aspace.root_page(),
        PageLevel::Pml4,
        PageLevel::Pml4.index_of(v),
        None,
    ) else {
        panic!("root entry must link a PDPT");
    };
    let leaf = aspace.get_or_create_child(pdpt, PageLevel::Pdpt, PageLevel::Pdpt.index_of(v), None);
    assert!(matches!(leaf, Ok(Child::Leaf(e)) if e.huge() && e.base() == pa(0x4000_0000)));
}
