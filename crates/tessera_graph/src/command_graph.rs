//! The command DAG and its builder.
//!
//! Tasks are lowered in topological order. Each task's global iteration
//! space is split into one chunk per worker node; every chunk's read
//! requirements are resolved against the buffer ownership maps, emitting
//! PUSH/AWAIT_PUSH pairs for data that must move. A NOP command per task
//! joins everything emitted for it, and successor tasks attach their
//! incoming edges there.
//!
//! Emission is a pure function of task submission order: source nodes are
//! chosen as the lowest owning rank, transfers are ordered by
//! `(buffer, tile)`, and within a chunk ids are assigned to the
//! AWAIT_PUSHes, then the COMPUTE, then the PUSHes.

use crate::command::{Command, CommandKind};
use crate::task_graph::TaskGraph;
use indexmap::{IndexMap, IndexSet};
use std::collections::BTreeSet;
use tessera_core::{
    AccessMode, BufferId, CommandId, CoreError, CoreResult, NodeId, ReductionId, TaskId,
};
use tessera_grid::{Extent, Region, Subrange, Tile};
use tessera_state::BufferState;
use tracing::debug;

/// The command DAG: commands, intra-graph dependencies, and the per-task
/// completion vertex.
#[derive(Debug, Clone, Default)]
pub struct CommandGraph {
    commands: IndexMap<CommandId, Command>,
    dependencies: IndexMap<CommandId, IndexSet<CommandId>>,
    task_completion: IndexMap<TaskId, CommandId>,
    reductions: IndexMap<ReductionId, BufferId>,
}

impl CommandGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All commands in emission order
    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    /// Get a command
    #[must_use]
    pub fn get(&self, cid: CommandId) -> Option<&Command> {
        self.commands.get(&cid)
    }

    /// Commands assigned to one node, in emission order
    #[must_use]
    pub fn node_commands(&self, nid: NodeId) -> Vec<&Command> {
        self.commands.values().filter(|c| c.nid == nid).collect()
    }

    /// Prerequisites of a command
    #[must_use]
    pub fn dependencies_of(&self, cid: CommandId) -> Option<&IndexSet<CommandId>> {
        self.dependencies.get(&cid)
    }

    /// The completion vertex of a processed task
    #[must_use]
    pub fn completion_of(&self, tid: TaskId) -> Option<CommandId> {
        self.task_completion.get(&tid).copied()
    }

    /// Reductions allocated while lowering, with their target buffers.
    ///
    /// The runtime registers each of these with its reduction registry
    /// before execution so inbound partials have somewhere to land.
    #[must_use]
    pub fn reductions(&self) -> &IndexMap<ReductionId, BufferId> {
        &self.reductions
    }

    /// Number of commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn insert(&mut self, command: Command, deps: IndexSet<CommandId>) {
        self.dependencies.insert(command.cid, deps);
        self.commands.insert(command.cid, command);
    }
}

/// Split a global iteration space into one chunk per worker node.
///
/// Dimension-0 row-wise: approximately equal extents, with any remainder
/// assigned to the last node. Other axes are not split. Nodes whose share
/// is empty receive no chunk.
#[must_use]
pub fn split_into_chunks(global: &Extent, num_nodes: usize) -> Vec<(NodeId, Subrange)> {
    let sizes = global.sizes();
    let rows = sizes[0];
    let base = rows / num_nodes as u64;

    let mut chunks = Vec::with_capacity(num_nodes);
    let mut offset = 0u64;
    for i in 0..num_nodes as u64 {
        let share = if i == num_nodes as u64 - 1 {
            rows - offset
        } else {
            base
        };
        if share == 0 {
            continue;
        }
        let sr = Subrange::new(
            [offset, 0, 0],
            [share, sizes[1], sizes[2]],
            sizes,
        );
        chunks.push((NodeId::from_raw(i), sr));
        offset += share;
    }
    chunks
}

/// Builds the command DAG incrementally as tasks become eligible.
pub struct CommandGraphBuilder {
    num_nodes: usize,
    master_node: NodeId,
    next_cid: u64,
    /// Next reduction id; 0 is reserved as "absent" on the wire
    next_rid: u64,
    graph: CommandGraph,
    /// Commands emitted per task, grouped by node; used to order
    /// successor commands after their predecessors on the same node
    emitted_by_node: IndexMap<TaskId, IndexMap<NodeId, Vec<CommandId>>>,
    /// Last processed task that wrote each buffer
    buffer_writer: IndexMap<BufferId, TaskId>,
}

impl CommandGraphBuilder {
    /// Create a builder for a run with `num_nodes` workers
    #[must_use]
    pub fn new(num_nodes: usize, master_node: NodeId) -> Self {
        Self {
            num_nodes,
            master_node,
            next_cid: 0,
            next_rid: 1,
            graph: CommandGraph::new(),
            emitted_by_node: IndexMap::new(),
            buffer_writer: IndexMap::new(),
        }
    }

    /// The graph built so far
    #[must_use]
    pub fn graph(&self) -> &CommandGraph {
        &self.graph
    }

    /// Consume the builder, returning the graph
    #[must_use]
    pub fn into_graph(self) -> CommandGraph {
        self.graph
    }

    /// Process every eligible task, following releases transitively.
    ///
    /// Returns the number of tasks lowered.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced buffer has no ownership state or
    /// source resolution fails.
    pub fn process_ready(
        &mut self,
        tasks: &mut TaskGraph,
        states: &mut IndexMap<BufferId, BufferState>,
    ) -> CoreResult<usize> {
        let mut processed = 0;
        loop {
            let ready = tasks.ready_tasks();
            if ready.is_empty() {
                break;
            }
            for tid in ready {
                self.process_task(tid, tasks, states)?;
                tasks.mark_processed(tid)?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    fn alloc(&mut self) -> CommandId {
        let cid = CommandId::from_raw(self.next_cid);
        self.next_cid += 1;
        cid
    }

    fn alloc_rid(&mut self) -> CoreResult<ReductionId> {
        let rid = ReductionId::from_raw(self.next_rid).ok_or_else(|| {
            CoreError::invariant(None, "reduction id allocator handed out the reserved 0")
        })?;
        self.next_rid += 1;
        Ok(rid)
    }

    fn process_task(
        &mut self,
        tid: TaskId,
        tasks: &TaskGraph,
        states: &mut IndexMap<BufferId, BufferState>,
    ) -> CoreResult<()> {
        let vertex = tasks.get(tid).ok_or_else(|| CoreError::NotFound {
            kind: "Task".to_string(),
            id: tid.to_string(),
        })?;
        let kind = vertex.task.kind;
        let global = vertex.task.global_size;
        let reqs = vertex.task.requirements.clone();
        let task_deps: Vec<TaskId> = vertex.dependencies.iter().copied().collect();

        let chunks = match kind {
            crate::task::TaskKind::Compute => split_into_chunks(&global, self.num_nodes),
            crate::task::TaskKind::MasterAccess => {
                vec![(self.master_node, Subrange::full(&global))]
            }
        };

        let mut emitted: IndexMap<NodeId, Vec<CommandId>> = IndexMap::new();
        let mut all_cids: Vec<CommandId> = Vec::new();

        // All chunks resolve their reads against the pre-task ownership
        // state; the post-task update happens after emission.
        for (node, chunk) in &chunks {
            // (bid, tile, source) triples for data this node is missing
            let mut transfers: Vec<(BufferId, Tile, NodeId)> = Vec::new();
            for req in &reqs {
                // Atomic requirements reduce partials after the computes
                // run; they pre-fetch nothing here.
                if !req.mode.reads() || req.mode == AccessMode::Atomic {
                    continue;
                }
                let state = states.get(&req.bid).ok_or_else(|| CoreError::NotFound {
                    kind: "BufferState".to_string(),
                    id: req.bid.to_string(),
                })?;
                let sr = req.mapper.map(chunk).clamp_to(state.extent());
                if sr.is_empty() {
                    continue;
                }
                for (tile, owners) in state.get_source_nodes(&sr.to_region())? {
                    if owners.contains(node) {
                        continue;
                    }
                    let source = *owners.iter().next().ok_or_else(|| {
                        CoreError::invariant(
                            Some(req.bid),
                            format!("empty owner set for {}", tile),
                        )
                    })?;
                    transfers.push((req.bid, tile, source));
                }
            }
            transfers.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
            transfers.dedup_by(|a, b| a.0 == b.0 && a.1 == b.1);

            // Ids within a chunk: AWAIT_PUSHes, the COMPUTE, then PUSHes
            // in the same order.
            let n_t = transfers.len() as u64;
            let base = self.next_cid;
            let compute_cid = CommandId::from_raw(base + n_t);
            self.next_cid = base + 2 * n_t + 1;

            let mut compute_deps = IndexSet::new();
            for (k, (bid, tile, _)) in transfers.iter().enumerate() {
                let await_cid = CommandId::from_raw(base + k as u64);
                let push_cid = CommandId::from_raw(base + n_t + 1 + k as u64);
                let global_sizes = states
                    .get(bid)
                    .map(|s| s.extent().sizes())
                    .unwrap_or([1, 1, 1]);
                let sr = Subrange::from_tile(tile, global_sizes);
                self.graph.insert(
                    Command::new(
                        await_cid,
                        *node,
                        CommandKind::AwaitPush {
                            source_cid: push_cid,
                            bid: *bid,
                            rid: None,
                            sr,
                        },
                    ),
                    IndexSet::new(),
                );
                emitted.entry(*node).or_default().push(await_cid);
                all_cids.push(await_cid);
                compute_deps.insert(await_cid);
                debug!(task = %tid, cmd = %await_cid, node = %node, buffer = %bid, "emit await_push");
            }

            // The compute also follows its predecessor tasks: their
            // completion vertex, and their commands on this node.
            for dep in &task_deps {
                if let Some(completion) = self.graph.completion_of(*dep) {
                    compute_deps.insert(completion);
                }
                if let Some(by_node) = self.emitted_by_node.get(dep) {
                    if let Some(cmds) = by_node.get(node) {
                        compute_deps.extend(cmds.iter().copied());
                    }
                }
            }

            self.graph.insert(
                Command::new(
                    compute_cid,
                    *node,
                    CommandKind::Compute {
                        task: tid,
                        chunk: *chunk,
                    },
                ),
                compute_deps,
            );
            emitted.entry(*node).or_default().push(compute_cid);
            all_cids.push(compute_cid);
            debug!(task = %tid, cmd = %compute_cid, node = %node, chunk = %chunk, "emit compute");

            for (k, (bid, tile, source)) in transfers.iter().enumerate() {
                let push_cid = CommandId::from_raw(base + n_t + 1 + k as u64);
                let global_sizes = states
                    .get(bid)
                    .map(|s| s.extent().sizes())
                    .unwrap_or([1, 1, 1]);
                let sr = Subrange::from_tile(tile, global_sizes);

                // The push must follow whatever produced the data on the
                // source node.
                let mut push_deps = IndexSet::new();
                if let Some(&writer) = self.buffer_writer.get(bid) {
                    if let Some(completion) = self.graph.completion_of(writer) {
                        push_deps.insert(completion);
                    }
                    if let Some(by_node) = self.emitted_by_node.get(&writer) {
                        if let Some(cmds) = by_node.get(source) {
                            push_deps.extend(cmds.iter().copied());
                        }
                    }
                }

                self.graph.insert(
                    Command::new(
                        push_cid,
                        *source,
                        CommandKind::Push {
                            target: *node,
                            bid: *bid,
                            rid: None,
                            sr,
                        },
                    ),
                    push_deps,
                );
                emitted.entry(*source).or_default().push(push_cid);
                all_cids.push(push_cid);
                debug!(task = %tid, cmd = %push_cid, source = %source, target = %node, buffer = %bid, "emit push");
            }
        }

        // Atomic requirements: every node computed a partial result over
        // its chunk; the non-owner nodes push theirs to the reduction
        // owner under a fresh reduction id, where the transfer manager
        // hands the payloads to the reduction registry instead of the
        // buffer store. The pushes follow this task's own commands on
        // their node; the awaits rendezvous by source id.
        for req in &reqs {
            if req.mode != AccessMode::Atomic {
                continue;
            }
            let state = states.get(&req.bid).ok_or_else(|| CoreError::NotFound {
                kind: "BufferState".to_string(),
                id: req.bid.to_string(),
            })?;
            let extent = *state.extent();
            let rid = self.alloc_rid()?;
            self.graph.reductions.insert(rid, req.bid);

            for (node, chunk) in &chunks {
                let sr = req.mapper.map(chunk).clamp_to(&extent);
                if sr.is_empty() || *node == self.master_node {
                    continue;
                }

                let push_cid = self.alloc();
                let await_cid = self.alloc();

                let mut push_deps = IndexSet::new();
                if let Some(cmds) = emitted.get(node) {
                    push_deps.extend(cmds.iter().copied());
                }
                self.graph.insert(
                    Command::new(
                        push_cid,
                        *node,
                        CommandKind::Push {
                            target: self.master_node,
                            bid: req.bid,
                            rid: Some(rid),
                            sr,
                        },
                    ),
                    push_deps,
                );
                emitted.entry(*node).or_default().push(push_cid);
                all_cids.push(push_cid);

                self.graph.insert(
                    Command::new(
                        await_cid,
                        self.master_node,
                        CommandKind::AwaitPush {
                            source_cid: push_cid,
                            bid: req.bid,
                            rid: Some(rid),
                            sr,
                        },
                    ),
                    IndexSet::new(),
                );
                emitted.entry(self.master_node).or_default().push(await_cid);
                all_cids.push(await_cid);
                debug!(task = %tid, reduction = %rid, source = %node, target = %self.master_node, buffer = %req.bid, "emit partial reduction pair");
            }
        }

        // One NOP joins everything emitted for the task; successor edges
        // attach here.
        let nop_cid = self.alloc();
        let nop_deps: IndexSet<CommandId> = all_cids.iter().copied().collect();
        self.graph
            .insert(Command::new(nop_cid, self.master_node, CommandKind::Nop), nop_deps);
        emitted.entry(self.master_node).or_default().push(nop_cid);
        self.graph.task_completion.insert(tid, nop_cid);

        // Post-task ownership update: written regions now live on the
        // node that computed them. A reduced region lives on the
        // reduction owner alone, since only the owner ever sees the
        // combined result.
        for req in &reqs {
            if !req.mode.writes() {
                continue;
            }
            let state = states.get_mut(&req.bid).ok_or_else(|| CoreError::NotFound {
                kind: "BufferState".to_string(),
                id: req.bid.to_string(),
            })?;
            if req.mode == AccessMode::Atomic {
                let extent = *state.extent();
                let mut reduced = Region::empty();
                for (_, chunk) in &chunks {
                    let sr = req.mapper.map(chunk).clamp_to(&extent);
                    if !sr.is_empty() {
                        reduced = reduced.merge(&sr.to_region());
                    }
                }
                if !reduced.is_empty() {
                    state.update_region(&reduced, BTreeSet::from([self.master_node]));
                }
            } else {
                for (node, chunk) in &chunks {
                    let sr = req.mapper.map(chunk).clamp_to(state.extent());
                    if sr.is_empty() {
                        continue;
                    }
                    state.update_region(&sr.to_region(), BTreeSet::from([*node]));
                }
            }
            self.buffer_writer.insert(req.bid, tid);
        }

        self.emitted_by_node.insert(tid, emitted);
        Ok(())
    }
}
