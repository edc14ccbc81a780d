use crate::{MappingSize, PageLevel};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Why a mapping could not be installed.
///
/// A failed map creates no nodes and installs no leaf.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    /// The frame allocator ran dry while creating a node at `level`.
    #[error("out of frames for a {level} node")]
    OutOfMemory { level: PageLevel },
    /// An explicitly sized mapping was requested for misaligned addresses.
    #[error("{va} -> {pa} is not {size} aligned")]
    Unaligned {
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: MappingSize,
    },
    #[error("{va} is not canonical")]
    NonCanonical { va: VirtualAddress },
    /// The `level` entry on the path already maps a different granularity:
    /// either a huge leaf sits where a table is needed, or a populated table
    /// sits where a huge leaf should go.
    #[error("{va} conflicts with an existing {level} entry")]
    Conflict { va: VirtualAddress, level: PageLevel },
}
