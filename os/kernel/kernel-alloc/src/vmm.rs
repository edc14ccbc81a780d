//! Virtual Memory Manager (VMM) for the kernel's single address space.
//!
//! Owns the [`AddressSpace`] together with its frame allocator and the
//! [`TranslationControl`] that makes it live. Once [`activated`](Vmm::activate),
//! every change to an existing translation is followed by an `invlpg` for the
//! affected address.
//!
//! # Example
//! ```ignore
//! let mapper = OffsetPhysMapper::identity();
//! let pool = FramePool::<4096>::with_region(base, size, 4096)?;
//! let mut vmm = Vmm::new(&mapper, pool, unsafe { X86Mmu::new() })?;
//! unsafe { vmm.init(&BootstrapPolicy::DEFAULT)? };
//! ```

use crate::bootstrap::{BootstrapError, BootstrapPolicy, BootstrapStage};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{
    AddressSpace, FrameAlloc, MapError, Mapped, MappingSize, PageFlags, PhysMapper,
    TranslationControl, Translation, Unmapped,
};
use log::{info, trace};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error(transparent)]
    Map(#[from] MapError),
    /// A range length that is not a whole number of pages.
    #[error("range length {len:#x} is not a multiple of {size}")]
    RangeLength { len: u64, size: MappingSize },
    /// A range that wraps around the end of the address space.
    #[error("range at {va} (+{len:#x}) overflows")]
    RangeOverflow { va: VirtualAddress, len: u64 },
}

/// Kernel virtual memory manager.
pub struct Vmm<'m, M: PhysMapper, A: FrameAlloc, T: TranslationControl> {
    aspace: AddressSpace<'m, M>,
    alloc: A,
    mmu: T,
    active: bool,
}

impl<'m, M: PhysMapper, A: FrameAlloc, T: TranslationControl> Vmm<'m, M, A, T> {
    /// Create an empty address space whose root comes from `alloc`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no root frame is available.
    pub fn new(mapper: &'m M, mut alloc: A, mmu: T) -> Result<Self, VmmError> {
        let aspace = AddressSpace::new_zeroed(mapper, &mut alloc)?;
        Ok(Self {
            aspace,
            alloc,
            mmu,
            active: false,
        })
    }

    /// Map one page; see [`AddressSpace::map`] for the size selection.
    ///
    /// # Errors
    /// Propagates [`MapError`]; nothing changes on failure.
    pub fn map(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageFlags,
    ) -> Result<Mapped, VmmError> {
        let mapped = self.aspace.map(&mut self.alloc, va, pa, flags)?;
        self.after_remap(va, &mapped);
        Ok(mapped)
    }

    /// Map one page of exactly `size`.
    ///
    /// # Errors
    /// Propagates [`MapError`]; nothing changes on failure.
    pub fn map_sized(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: MappingSize,
        flags: PageFlags,
    ) -> Result<Mapped, VmmError> {
        let mapped = self.aspace.map_sized(&mut self.alloc, va, pa, size, flags)?;
        self.after_remap(va, &mapped);
        Ok(mapped)
    }

    fn after_remap(&mut self, va: VirtualAddress, mapped: &Mapped) {
        if self.active && mapped.replaced.is_some() {
            self.mmu.invalidate(va);
        }
    }

    /// Map `[va, va + len)` to `[pa, pa + len)` in steps of `size`.
    ///
    /// Each step is atomic on its own; if a step fails, the pages mapped by
    /// earlier steps stay in place. Returns the number of leaves installed.
    ///
    /// # Errors
    /// - [`VmmError::RangeLength`] / [`VmmError::RangeOverflow`] for a bad
    ///   range, before anything is mapped.
    /// - The first [`MapError`] of any step.
    pub fn map_range(
        &mut self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        size: MappingSize,
        flags: PageFlags,
    ) -> Result<u64, VmmError> {
        if !size.is_aligned(len) {
            return Err(VmmError::RangeLength { len, size });
        }
        if va.checked_add(len).is_none() || pa.checked_add(len).is_none() {
            return Err(VmmError::RangeOverflow { va, len });
        }

        let pages = len / size.bytes();
        for i in 0..pages {
            let offset = i * size.bytes();
            self.map_sized(va.wrapping_add(offset), pa.wrapping_add(offset), size, flags)?;
        }
        trace!("mapped {pages} x {size} at {va} -> {pa}");
        Ok(pages)
    }

    /// Remove the mapping covering `va`; `None` if there was none.
    pub fn unmap(&mut self, va: VirtualAddress) -> Option<Unmapped> {
        let unmapped = self.aspace.unmap(&mut self.alloc, va)?;
        // Also drops cached paging-structure entries of reclaimed nodes.
        if self.active {
            self.mmu.invalidate(va);
        }
        Some(unmapped)
    }

    #[inline]
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.aspace.translate(va)
    }

    #[inline]
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<Translation> {
        self.aspace.lookup(va)
    }

    /// Install every mapping of `policy`: low memory identity mapped in
    /// 2 MiB pages, then the kernel image at its higher-half base in 4 KiB
    /// pages. Does not activate.
    ///
    /// # Errors
    /// [`BootstrapError`] naming the failed stage.
    pub fn build(&mut self, policy: &BootstrapPolicy) -> Result<(), BootstrapError> {
        policy.validate()?;

        let identity = self
            .map_range(
                VirtualAddress::zero(),
                PhysicalAddress::zero(),
                policy.identity_bytes,
                MappingSize::Size2M,
                BootstrapPolicy::IDENTITY_FLAGS,
            )
            .map_err(|source| BootstrapError::Map {
                stage: BootstrapStage::Identity,
                source,
            })?;
        info!(
            "identity mapped {:#x} bytes ({identity} x 2M)",
            policy.identity_bytes
        );

        let image = &policy.kernel;
        let pages = self
            .map_range(
                image.virt_base,
                image.phys_base,
                image.size,
                MappingSize::Size4K,
                BootstrapPolicy::KERNEL_FLAGS,
            )
            .map_err(|source| BootstrapError::Map {
                stage: BootstrapStage::KernelImage,
                source,
            })?;
        info!(
            "kernel image {} -> {} ({pages} x 4K)",
            image.virt_base, image.phys_base
        );
        Ok(())
    }

    /// [`build`](Self::build) followed by [`activate`](Self::activate).
    ///
    /// # Errors
    /// As [`build`](Self::build); nothing is activated on failure.
    ///
    /// # Safety
    /// As [`activate`](Self::activate): the policy's mappings must cover
    /// everything the caller keeps using.
    pub unsafe fn init(&mut self, policy: &BootstrapPolicy) -> Result<(), BootstrapError> {
        self.build(policy)?;
        unsafe { self.activate() };
        Ok(())
    }

    /// Load the root into the translation-root register. There is no way
    /// back to the previous tables.
    ///
    /// # Safety
    /// The tree must map the running code, its stack, and every frame the
    /// allocator and mapper touch afterwards.
    pub unsafe fn activate(&mut self) {
        let root = self.aspace.root_page();
        unsafe { self.mmu.load_root(root) };
        self.active = true;
        info!(
            "address space {root} active ({} table frames)",
            self.aspace.table_frames()
        );
    }

    #[inline]
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    #[must_use]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.aspace.root_page()
    }

    /// Page-table nodes currently owned, root included.
    #[must_use]
    pub fn table_frames(&self) -> usize {
        self.aspace.table_frames()
    }

    #[must_use]
    pub const fn allocator(&self) -> &A {
        &self.alloc
    }

    #[must_use]
    pub const fn translation_control(&self) -> &T {
        &self.mmu
    }
}
