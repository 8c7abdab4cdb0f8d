//! Per-node commands.

use serde::{Deserialize, Serialize};
use tessera_core::{BufferId, CommandId, NodeId, ReductionId, TaskId};
use tessera_grid::Subrange;

/// What a command does on its node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    /// Structural join; completes immediately
    Nop,
    /// Run a task's kernel over one chunk of its iteration space
    Compute {
        /// The task being executed
        task: TaskId,
        /// The chunk assigned to this node
        chunk: Subrange,
    },
    /// Send a buffer subrange to another node
    Push {
        /// Receiving node
        target: NodeId,
        /// Buffer being transferred
        bid: BufferId,
        /// Reduction routing, if the payload is a partial result
        rid: Option<ReductionId>,
        /// The transferred subrange, normalized to three axes
        sr: Subrange,
    },
    /// Wait for a push from another node and commit it locally
    AwaitPush {
        /// Command id of the matching push on the sending node
        source_cid: CommandId,
        /// Buffer being transferred
        bid: BufferId,
        /// Reduction routing, if the payload is a partial result
        rid: Option<ReductionId>,
        /// The transferred subrange, normalized to three axes
        sr: Subrange,
    },
}

impl CommandKind {
    /// Short name for logs and labels
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Compute { .. } => "compute",
            Self::Push { .. } => "push",
            Self::AwaitPush { .. } => "await_push",
        }
    }
}

/// One command: where it runs and what it does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Command identifier, globally unique within a run
    pub cid: CommandId,
    /// The node this command executes on
    pub nid: NodeId,
    /// The action
    pub kind: CommandKind,
}

impl Command {
    /// Create a command
    #[must_use]
    pub const fn new(cid: CommandId, nid: NodeId, kind: CommandKind) -> Self {
        Self { cid, nid, kind }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{} [{}]", self.cid, self.nid, self.kind.name())
    }
}
