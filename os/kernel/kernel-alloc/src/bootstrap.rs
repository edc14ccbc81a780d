//! # Bootstrap policy
//!
//! The initial kernel address space: the first `identity_bytes` of physical
//! memory mapped at the same virtual addresses with 2 MiB pages, and the
//! kernel image mapped at its higher-half base with 4 KiB pages.

use crate::vmm::VmmError;
use core::fmt;
use kernel_info::memory::KernelLayout;
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_vmem::{MappingSize, PageFlags};

/// Where the kernel image lives, physically and virtually.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KernelImage {
    pub phys_base: PhysicalAddress,
    pub virt_base: VirtualAddress,
    pub size: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootstrapPolicy {
    /// Bytes of low physical memory to identity map; multiple of 2 MiB.
    pub identity_bytes: u64,
    pub kernel: KernelImage,
}

impl BootstrapPolicy {
    /// Identity window: kernel-only, writable, 2 MiB pages.
    pub const IDENTITY_FLAGS: PageFlags = PageFlags::KERNEL_RW_HUGE;

    /// Kernel image: kernel-only, writable, 4 KiB pages.
    pub const KERNEL_FLAGS: PageFlags = PageFlags::KERNEL_RW;

    pub const DEFAULT: Self = Self::from_layout(&KernelLayout::DEFAULT);

    #[must_use]
    pub const fn from_layout(layout: &KernelLayout) -> Self {
        Self {
            identity_bytes: layout.identity_map_bytes,
            kernel: KernelImage {
                phys_base: layout.phys_load,
                virt_base: layout.virt_base,
                size: layout.image_size,
            },
        }
    }

    /// Check alignment and that the two windows do not overlap virtually.
    ///
    /// # Errors
    /// [`BootstrapError::Layout`] describing the first violation.
    pub const fn validate(&self) -> Result<(), BootstrapError> {
        use LayoutFault::{
            IdentityNotMultipleOf2M, ImageBaseUnaligned, ImageNotCanonical, ImageOverlapsIdentity,
            ImageSizeUnaligned,
        };

        let k = &self.kernel;
        let fault = if !MappingSize::Size2M.is_aligned(self.identity_bytes) {
            Some(IdentityNotMultipleOf2M)
        } else if !k.phys_base.is_aligned::<Size4K>() || !k.virt_base.is_aligned::<Size4K>() {
            Some(ImageBaseUnaligned)
        } else if !MappingSize::Size4K.is_aligned(k.size) {
            Some(ImageSizeUnaligned)
        } else if !k.virt_base.is_canonical() {
            Some(ImageNotCanonical)
        } else if k.virt_base.as_u64() < self.identity_bytes {
            Some(ImageOverlapsIdentity)
        } else {
            None
        };

        match fault {
            Some(fault) => Err(BootstrapError::Layout(fault)),
            None => Ok(()),
        }
    }
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which part of the bootstrap was running when a mapping failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootstrapStage {
    Identity,
    KernelImage,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity map",
            Self::KernelImage => "kernel image map",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LayoutFault {
    IdentityNotMultipleOf2M,
    ImageBaseUnaligned,
    ImageSizeUnaligned,
    ImageNotCanonical,
    ImageOverlapsIdentity,
}

impl fmt::Display for LayoutFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IdentityNotMultipleOf2M => "identity window is not a multiple of 2 MiB",
            Self::ImageBaseUnaligned => "kernel image base is not 4 KiB aligned",
            Self::ImageSizeUnaligned => "kernel image size is not a multiple of 4 KiB",
            Self::ImageNotCanonical => "kernel image base is not canonical",
            Self::ImageOverlapsIdentity => "kernel image overlaps the identity window",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("invalid bootstrap layout: {0}")]
    Layout(LayoutFault),
    #[error("{stage} failed: {source}")]
    Map { stage: BootstrapStage, source: VmmError },
}
