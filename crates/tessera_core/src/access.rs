//! Buffer access modes.

use serde::{Deserialize, Serialize};

/// How a task accesses a buffer.
///
/// The mode determines both dependency edges in the task graph (read modes
/// depend on the last writer) and post-task ownership updates (write modes
/// make the executing node the owner of the written region).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    /// Read existing data
    Read,
    /// Overwrite, preserving unwritten parts
    Write,
    /// Read and write
    ReadWrite,
    /// Overwrite without reading; previous contents are not needed
    DiscardWrite,
    /// Read and write without needing previous contents
    DiscardReadWrite,
    /// Atomic read-modify-write; lowered to a reduction over per-node
    /// partial results rather than chunked like a plain write
    Atomic,
}

impl AccessMode {
    /// Whether this mode consumes existing buffer contents.
    ///
    /// `Discard*` modes do not: they declare the previous contents dead and
    /// therefore create no read edge and move no data.
    #[must_use]
    pub const fn reads(&self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite | Self::Atomic)
    }

    /// Whether this mode produces new buffer contents.
    #[must_use]
    pub const fn writes(&self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Whether previous contents are explicitly discarded.
    #[must_use]
    pub const fn discards(&self) -> bool {
        matches!(self, Self::DiscardWrite | Self::DiscardReadWrite)
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read_write",
            Self::DiscardWrite => "discard_write",
            Self::DiscardReadWrite => "discard_read_write",
            Self::Atomic => "atomic",
        };
        write!(f, "{}", s)
    }
}
