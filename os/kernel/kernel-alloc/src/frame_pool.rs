//! # Physical frame pool
//!
//! Hands out 4 KiB frames from one fixed region. Freed frames go onto a LIFO
//! free list and are reused first; otherwise a bump cursor advances into
//! frames never handed out before. No coalescing, no size classes.
//!
//! Every frame is in exactly one state: untouched (beyond the cursor),
//! allocated, or free (on the list). [`FramePool::free`] rejects anything
//! that would break this instead of corrupting the list.

use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};
use kernel_vmem::FrameAlloc;
use log::{debug, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramePoolError {
    #[error("frame pool exhausted")]
    OutOfMemory,
    /// Outside the pool, misaligned, or never allocated.
    #[error("{pa} is not a frame allocated from this pool")]
    InvalidFree { pa: PhysicalAddress },
    #[error("{pa} is already free")]
    DoubleFree { pa: PhysicalAddress },
    #[error("unsupported frame size {frame_size}, only 4096 byte frames exist")]
    UnsupportedFrameSize { frame_size: u64 },
    #[error("region {base} (+{size:#x}) holds no whole frame")]
    EmptyPool { base: PhysicalAddress, size: u64 },
}

/// Fixed pool of at most `N` physical 4 KiB frames.
pub struct FramePool<const N: usize> {
    /// First frame, 4 KiB aligned.
    base: u64,
    /// Frames carved from the region, `<= N`.
    frames: usize,
    /// Bump cursor: frames `next..frames` were never handed out.
    next: usize,
    /// LIFO stack of freed frame indices.
    free: [usize; N],
    free_len: usize,
    is_free: [bool; N],
}

impl<const N: usize> FramePool<N> {
    /// A pool without frames; every allocation fails until [`init`](Self::init).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: 0,
            frames: 0,
            next: 0,
            free: [0; N],
            free_len: 0,
            is_free: [false; N],
        }
    }

    /// Convenience for [`new`](Self::new) followed by [`init`](Self::init).
    ///
    /// # Errors
    /// See [`init`](Self::init).
    pub fn with_region(
        pool_base: PhysicalAddress,
        pool_size: u64,
        frame_size: u64,
    ) -> Result<Self, FramePoolError> {
        let mut pool = Self::new();
        pool.init(pool_base, pool_size, frame_size)?;
        Ok(pool)
    }

    /// Carve `[pool_base, pool_base + pool_size)` into frames.
    ///
    /// The base is rounded up to the next frame boundary and a trailing
    /// partial frame is dropped; at most `N` frames are used. Any previous
    /// state is discarded.
    ///
    /// # Errors
    /// - [`FramePoolError::UnsupportedFrameSize`] unless `frame_size` is 4096.
    /// - [`FramePoolError::EmptyPool`] if no whole frame fits.
    pub fn init(
        &mut self,
        pool_base: PhysicalAddress,
        pool_size: u64,
        frame_size: u64,
    ) -> Result<(), FramePoolError> {
        if frame_size != FRAME_SIZE {
            return Err(FramePoolError::UnsupportedFrameSize { frame_size });
        }
        let empty = FramePoolError::EmptyPool {
            base: pool_base,
            size: pool_size,
        };

        let raw = pool_base.as_u64();
        let end = raw.checked_add(pool_size).ok_or(empty)?;
        let start = raw
            .checked_add(Size4K::OFFSET_MASK)
            .map(|v| v & !Size4K::OFFSET_MASK)
            .ok_or(empty)?;
        let usable = end.saturating_sub(start) / Size4K::SIZE;
        let frames = usize::try_from(usable).unwrap_or(usize::MAX).min(N);
        if frames == 0 {
            return Err(empty);
        }

        self.base = start;
        self.frames = frames;
        self.next = 0;
        self.free_len = 0;
        self.is_free.fill(false);
        debug!(
            "frame pool: {frames} frames at {}",
            PhysicalAddress::new(start)
        );
        Ok(())
    }

    /// Take a frame: the most recently freed one, else the next untouched one.
    ///
    /// # Errors
    /// [`FramePoolError::OutOfMemory`] once both sources are exhausted.
    pub fn allocate(&mut self) -> Result<PhysicalPage<Size4K>, FramePoolError> {
        let index = if self.free_len > 0 {
            self.free_len -= 1;
            let index = self.free[self.free_len];
            self.is_free[index] = false;
            index
        } else if self.next < self.frames {
            self.next += 1;
            self.next - 1
        } else {
            return Err(FramePoolError::OutOfMemory);
        };
        Ok(self.page_at(index))
    }

    /// Return an allocated frame to the pool.
    ///
    /// # Errors
    /// [`FramePoolError::InvalidFree`] or [`FramePoolError::DoubleFree`];
    /// the pool is unchanged in either case.
    pub fn free(&mut self, page: PhysicalPage<Size4K>) -> Result<(), FramePoolError> {
        let pa = page.base();
        let index = self
            .index_of(pa)
            .filter(|&i| i < self.next)
            .ok_or(FramePoolError::InvalidFree { pa })?;
        if self.is_free[index] {
            return Err(FramePoolError::DoubleFree { pa });
        }

        // Bounded by `next <= N`: each allocated frame is pushed at most once.
        self.free[self.free_len] = index;
        self.free_len += 1;
        self.is_free[index] = true;
        Ok(())
    }

    /// [`free`](Self::free) for an untyped address.
    ///
    /// # Errors
    /// As [`free`](Self::free); a misaligned address is an
    /// [`FramePoolError::InvalidFree`].
    pub fn free_addr(&mut self, pa: PhysicalAddress) -> Result<(), FramePoolError> {
        let page = PhysicalPage::from_aligned(pa).ok_or(FramePoolError::InvalidFree { pa })?;
        self.free(page)
    }

    /// Frames carved from the region.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.frames
    }

    #[must_use]
    pub const fn free_count(&self) -> usize {
        self.frames - self.next + self.free_len
    }

    #[must_use]
    pub const fn allocated_count(&self) -> usize {
        self.next - self.free_len
    }

    /// `true` if `pa` lies inside one of the pool's frames.
    #[must_use]
    pub const fn contains(&self, pa: PhysicalAddress) -> bool {
        let raw = pa.as_u64();
        raw >= self.base && (raw - self.base) / Size4K::SIZE < self.frames as u64
    }

    fn index_of(&self, pa: PhysicalAddress) -> Option<usize> {
        if !self.contains(pa) || !pa.is_aligned::<Size4K>() {
            return None;
        }
        usize::try_from((pa.as_u64() - self.base) / Size4K::SIZE).ok()
    }

    const fn page_at(&self, index: usize) -> PhysicalPage<Size4K> {
        PhysicalPage::containing(PhysicalAddress::new(
            self.base + index as u64 * Size4K::SIZE,
        ))
    }
}

impl<const N: usize> Default for FramePool<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameAlloc for FramePool<N> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.allocate().ok()
    }

    fn free_4k(&mut self, page: PhysicalPage<Size4K>) {
        if let Err(e) = self.free(page) {
            warn!("ignoring frame free: {e}");
        }
    }
}
