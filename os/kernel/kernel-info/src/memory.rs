//! # Memory Layout

use kernel_memory_addresses::{PageSize, PhysicalAddress, Size2M, Size4K, VirtualAddress};

/// Where the kernel executes (VMA); the higher-half base of the image.
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

/// Where the boot loader places the kernel image in *physical* memory (LMA).
pub const PHYS_LOAD: u64 = 0x0010_0000; // 1 MiB

/// Size of the kernel image window mapped at [`KERNEL_BASE`].
pub const KERNEL_IMAGE_SIZE: u64 = 0x0100_0000; // 16 MiB

/// Low physical memory identity mapped during bootstrap.
pub const IDENTITY_MAP_BYTES: u64 = 0x4000_0000; // 1 GiB

/// Size of one physical frame handed out by the frame pool.
pub const FRAME_SIZE: u64 = 4096;

/// Number of frames in the statically reserved frame pool.
pub const FRAME_POOL_FRAMES: usize = 4096;

const _: () = {
    assert!(FRAME_SIZE == Size4K::SIZE);
    assert!(PHYS_LOAD.is_multiple_of(Size4K::SIZE));
    assert!(KERNEL_BASE.is_multiple_of(Size4K::SIZE));
    assert!(KERNEL_IMAGE_SIZE.is_multiple_of(Size4K::SIZE));
    assert!(IDENTITY_MAP_BYTES.is_multiple_of(Size2M::SIZE));
    assert!(KERNEL_BASE > IDENTITY_MAP_BYTES);
};

/// Placement of the kernel image and the boot identity window.
///
/// The physical and virtual bases are opaque inputs from the linker/boot
/// loader; [`KernelLayout::DEFAULT`] mirrors the constants of this module.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelLayout {
    /// Physical load address of the image (LMA).
    pub phys_load: PhysicalAddress,
    /// Higher-half virtual base of the image (VMA).
    pub virt_base: VirtualAddress,
    /// Bytes of the image to map.
    pub image_size: u64,
    /// Bytes of low physical memory to identity map.
    pub identity_map_bytes: u64,
}

impl KernelLayout {
    /// Layout described by the constants of this module.
    pub const DEFAULT: Self = Self {
        phys_load: PhysicalAddress::new(PHYS_LOAD),
        virt_base: VirtualAddress::new(KERNEL_BASE),
        image_size: KERNEL_IMAGE_SIZE,
        identity_map_bytes: IDENTITY_MAP_BYTES,
    };

    /// `true` if `va` falls inside the mapped kernel image window.
    #[inline]
    #[must_use]
    pub const fn contains_virt(&self, va: VirtualAddress) -> bool {
        va.as_u64() >= self.virt_base.as_u64()
            && va.as_u64() - self.virt_base.as_u64() < self.image_size
    }

    /// Translate an image address using the link-time relation
    /// `PA = phys_load + (VA - virt_base)`.
    #[inline]
    #[must_use]
    pub const fn image_virt_to_phys(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        if !self.contains_virt(va) {
            return None;
        }
        Some(PhysicalAddress::new(
            self.phys_load.as_u64() + (va.as_u64() - self.virt_base.as_u64()),
        ))
    }
}

impl Default for KernelLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}
