//! Bare-metal entry point: build, activate and publish the kernel address
//! space.

use crate::bootstrap::{BootstrapError, BootstrapPolicy};
use crate::frame_pool::{FramePool, FramePoolError};
use crate::kernel_paging::{KernelPaging, KernelPagingError};
use crate::mmu::X86Mmu;
use crate::phys_mapper::OffsetPhysMapper;
use crate::vmm::{Vmm, VmmError};
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_info::memory::{FRAME_POOL_FRAMES, FRAME_SIZE, KernelLayout};
use kernel_memory_addresses::PhysicalAddress;
use log::{error, info};

/// Type of [`KERNEL_PAGING`].
pub type KernelSpace =
    KernelPaging<'static, OffsetPhysMapper, &'static mut FramePool<FRAME_POOL_FRAMES>, X86Mmu>;

/// The kernel address space, populated by [`init_kernel_paging`].
pub static KERNEL_PAGING: KernelSpace = KernelPaging::new();

/// Node frames are reached through the low identity map: the boot loader's
/// tables provide it before activation, the bootstrap policy after.
static IDENTITY: OffsetPhysMapper = OffsetPhysMapper::identity();

static mut FRAME_POOL: FramePool<FRAME_POOL_FRAMES> = FramePool::new();

static STARTED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, thiserror::Error)]
enum BootError {
    #[error("paging bootstrap entered twice")]
    AlreadyStarted,
    #[error("frame pool {base} (+{size:#x}) is not inside the identity window")]
    PoolNotIdentityMapped { base: PhysicalAddress, size: u64 },
    #[error(transparent)]
    Pool(#[from] FramePoolError),
    #[error(transparent)]
    Vmm(#[from] VmmError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error(transparent)]
    Publish(#[from] KernelPagingError),
}

/// Build the kernel address space from the reserved region
/// `[pool_base, pool_base + pool_size)`, load it into CR3 and publish it in
/// [`KERNEL_PAGING`]. Halts the CPU on any failure.
///
/// # Safety
/// - Call exactly once, at CPL0, early in boot, before anything relies on
///   translations outside the bootstrap windows.
/// - The region must be unused RAM, identity mapped by the current tables,
///   and lie within [`KernelLayout::identity_map_bytes`].
/// - The kernel must be linked per [`KernelLayout::DEFAULT`].
pub unsafe fn init_kernel_paging(pool_base: PhysicalAddress, pool_size: u64) -> &'static KernelSpace {
    match unsafe { try_init(pool_base, pool_size) } {
        Ok(()) => &KERNEL_PAGING,
        Err(e) => {
            error!("kernel paging bootstrap failed: {e}");
            halt()
        }
    }
}

unsafe fn try_init(pool_base: PhysicalAddress, pool_size: u64) -> Result<(), BootError> {
    if STARTED.swap(true, Ordering::AcqRel) {
        return Err(BootError::AlreadyStarted);
    }

    let layout = KernelLayout::DEFAULT;
    let in_window = pool_base
        .checked_add(pool_size)
        .is_some_and(|end| end.as_u64() <= layout.identity_map_bytes);
    if !in_window {
        return Err(BootError::PoolNotIdentityMapped {
            base: pool_base,
            size: pool_size,
        });
    }

    // SAFETY: guarded by `STARTED`; this is the only reference ever created.
    let pool = unsafe { &mut *(&raw mut FRAME_POOL) };
    pool.init(pool_base, pool_size, FRAME_SIZE)?;

    // SAFETY: CPL0 per this function's contract.
    let mmu = unsafe { X86Mmu::new() };
    info!("replacing boot page tables at {}", mmu.current_root());

    let mut vmm = Vmm::new(&IDENTITY, pool, mmu)?;
    // SAFETY: the policy maps the kernel image and the identity window,
    // which holds the pool.
    unsafe { vmm.init(&BootstrapPolicy::from_layout(&layout))? };

    KERNEL_PAGING.install(vmm)?;
    Ok(())
}

fn halt() -> ! {
    loop {
        // SAFETY: privileged, CPL0 per caller contract.
        unsafe { core::arch::asm!("cli", "hlt", options(nomem, nostack)) };
    }
}
