#![allow(dead_code)]

use kernel_alloc::frame_pool::FramePool;
use kernel_alloc::phys_mapper::OffsetPhysMapper;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::TranslationControl;

/// Physical base of the simulated frame pool; inside the 1 GiB identity window.
pub const POOL_BASE: u64 = 0x0020_0000;

#[repr(align(4096))]
pub struct Aligned4K([u8; 4096]);

/// Host memory standing in for the pool's physical frames.
pub struct HostRam {
    frames: Vec<Aligned4K>,
}

impl HostRam {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n).map(|_| Aligned4K([0xCC; 4096])).collect(),
        }
    }

    /// Mapper placing physical `POOL_BASE` at the start of this buffer.
    pub fn mapper(&self) -> OffsetPhysMapper {
        let host = self.frames.as_ptr() as u64;
        OffsetPhysMapper::new(host.wrapping_sub(POOL_BASE))
    }

    pub fn pool<const N: usize>(&self) -> FramePool<N> {
        assert!(N <= self.frames.len());
        FramePool::with_region(PhysicalAddress::new(POOL_BASE), (N as u64) * 4096, 4096)
            .expect("pool region")
    }
}

/// Records privileged operations instead of executing them.
#[derive(Default)]
pub struct RecordingMmu {
    pub loaded: Vec<PhysicalPage<Size4K>>,
    pub invalidated: Vec<VirtualAddress>,
}

impl TranslationControl for RecordingMmu {
    unsafe fn load_root(&mut self, root: PhysicalPage<Size4K>) {
        self.loaded.push(root);
    }

    fn invalidate(&mut self, va: VirtualAddress) {
        self.invalidated.push(va);
    }
}
