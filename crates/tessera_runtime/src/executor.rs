//! Per-node command executor.
//!
//! Drives one node's slice of the command graph cooperatively: each
//! `step` retires finished transfers and starts at most one new command.
//! Ordering within the node follows the graph's same-node dependency
//! edges; ordering across nodes is enforced by the PUSH/AWAIT_PUSH
//! rendezvous itself, so cross-node edges are not waited on locally.

use crate::device::DeviceCompute;
use crate::queue::DistrQueue;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;
use tessera_core::{CommandId, CoreResult, NodeId};
use tessera_graph::{Command, CommandGraph, CommandKind};
use tessera_transfer::{Fabric, TransferHandle, TransferManager};
use tracing::trace;

/// What one executor step accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// A command was started or retired
    Dispatched,
    /// Nothing runnable; waiting on transfers
    Idle,
    /// Every command on this node has completed
    Done,
}

/// Executes one node's command stream.
pub struct CommandExecutor {
    nid: NodeId,
    commands: Vec<Command>,
    /// Same-node prerequisites per command
    dependencies: IndexMap<CommandId, IndexSet<CommandId>>,
    started: IndexSet<CommandId>,
    completed: IndexSet<CommandId>,
    in_flight: Vec<(CommandId, Arc<TransferHandle>)>,
}

impl CommandExecutor {
    /// Extract this node's commands from a built command graph
    #[must_use]
    pub fn new(nid: NodeId, graph: &CommandGraph) -> Self {
        let commands: Vec<Command> =
            graph.node_commands(nid).into_iter().cloned().collect();

        let local: IndexSet<CommandId> = commands.iter().map(|c| c.cid).collect();
        let mut dependencies = IndexMap::new();
        for cmd in &commands {
            let deps: IndexSet<CommandId> = graph
                .dependencies_of(cmd.cid)
                .map(|all| {
                    all.iter()
                        .filter(|d| local.contains(*d))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            dependencies.insert(cmd.cid, deps);
        }

        Self {
            nid,
            commands,
            dependencies,
            started: IndexSet::new(),
            completed: IndexSet::new(),
            in_flight: Vec::new(),
        }
    }

    /// This executor's node
    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.nid
    }

    /// Whether every command on this node has completed
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.completed.len() == self.commands.len()
    }

    /// Number of commands completed so far
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Retire finished transfers, then start the first runnable command.
    ///
    /// # Errors
    ///
    /// Propagates transfer-manager and device errors.
    pub fn step<F: Fabric>(
        &mut self,
        queue: &DistrQueue,
        transfers: &mut TransferManager<F>,
        device: &mut dyn DeviceCompute,
    ) -> CoreResult<Progress> {
        let mut retired = false;
        {
            let completed = &mut self.completed;
            self.in_flight.retain(|(cid, handle)| {
                if handle.is_complete() {
                    completed.insert(*cid);
                    retired = true;
                    false
                } else {
                    true
                }
            });
        }

        for i in 0..self.commands.len() {
            let cid = self.commands[i].cid;
            if self.started.contains(&cid) {
                continue;
            }
            if !self.deps_satisfied(cid) {
                continue;
            }

            self.started.insert(cid);
            let cmd = self.commands[i].clone();
            trace!(node = %self.nid, cmd = %cmd, "starting command");
            match &cmd.kind {
                CommandKind::Nop => {
                    self.completed.insert(cid);
                }
                CommandKind::Compute { task, chunk } => {
                    queue.execute_live(*task, chunk, device)?;
                    self.completed.insert(cid);
                }
                CommandKind::Push { .. } => {
                    let handle = transfers.push(&cmd)?;
                    self.in_flight.push((cid, handle));
                }
                CommandKind::AwaitPush { .. } => {
                    let handle = transfers.await_push(&cmd)?;
                    if handle.is_complete() {
                        self.completed.insert(cid);
                    } else {
                        self.in_flight.push((cid, handle));
                    }
                }
            }
            return Ok(Progress::Dispatched);
        }

        if self.is_done() {
            Ok(Progress::Done)
        } else if retired {
            Ok(Progress::Dispatched)
        } else {
            Ok(Progress::Idle)
        }
    }

    fn deps_satisfied(&self, cid: CommandId) -> bool {
        self.dependencies
            .get(&cid)
            .map_or(true, |deps| deps.iter().all(|d| self.completed.contains(d)))
    }
}
