//! The distributed queue.
//!
//! `submit` records one task and returns immediately: the command group
//! runs once in prepass mode, the captured requirements feed the task
//! DAG, and the stored closure is kept for live execution of the local
//! chunks. `build_command_graph` lowers every eligible task.

use crate::buffer::BufferHandle;
use crate::device::DeviceCompute;
use crate::handler::Handler;
use crate::runtime::Runtime;
use indexmap::IndexMap;
use std::sync::Arc;
use tessera_core::{BufferId, CoreError, CoreResult, TaskId};
use tessera_graph::{CommandGraph, CommandGraphBuilder, TaskGraph, TaskKind};
use tessera_grid::{Extent, Subrange};
use tessera_state::BufferState;
use tracing::debug;

type StoredCommandGroup = Box<dyn Fn(&mut Handler<'_>) -> CoreResult<()>>;

/// The distributed queue: records tasks, owns the graphs.
pub struct DistrQueue {
    runtime: Arc<Runtime>,
    tasks: TaskGraph,
    builder: CommandGraphBuilder,
    states: IndexMap<BufferId, BufferState>,
    command_groups: IndexMap<TaskId, StoredCommandGroup>,
    task_count: u64,
    buffer_count: u64,
}

impl DistrQueue {
    /// Create a queue over an initialized runtime
    #[must_use]
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let num_nodes = runtime.num_nodes();
        let master = runtime.config().master_node;
        Self {
            runtime,
            tasks: TaskGraph::new(),
            builder: CommandGraphBuilder::new(num_nodes, master),
            states: IndexMap::new(),
            command_groups: IndexMap::new(),
            task_count: 0,
            buffer_count: 0,
        }
    }

    /// Register a buffer, optionally seeded with host bytes.
    ///
    /// The initial ownership state lists the full extent as current on
    /// every node.
    ///
    /// # Errors
    ///
    /// Returns an error if registration with the local store fails.
    pub fn create_buffer(
        &mut self,
        extent: Extent,
        elem_size: usize,
        host_init: Option<&[u8]>,
    ) -> CoreResult<BufferHandle> {
        let bid = BufferId::from_raw(self.buffer_count);
        self.runtime
            .store()
            .register_buffer(bid, extent, elem_size, host_init)?;
        self.buffer_count += 1;

        self.states
            .insert(bid, BufferState::new(bid, extent, self.runtime.num_nodes()));
        debug!(buffer = %bid, %extent, "buffer registered");
        Ok(BufferHandle::new(
            bid,
            extent,
            elem_size,
            Arc::clone(self.runtime.store()),
        ))
    }

    /// Submit a compute command group.
    ///
    /// # Errors
    ///
    /// Usage errors from the pre-pass abort the submission and bubble up.
    pub fn submit<CG>(&mut self, cg: CG) -> CoreResult<TaskId>
    where
        CG: Fn(&mut Handler<'_>) -> CoreResult<()> + 'static,
    {
        self.submit_kind(TaskKind::Compute, cg)
    }

    /// Submit a master-access command group.
    ///
    /// # Errors
    ///
    /// Usage errors from the pre-pass abort the submission and bubble up.
    pub fn submit_master_access<CG>(&mut self, cg: CG) -> CoreResult<TaskId>
    where
        CG: Fn(&mut Handler<'_>) -> CoreResult<()> + 'static,
    {
        self.submit_kind(TaskKind::MasterAccess, cg)
    }

    fn submit_kind<CG>(&mut self, kind: TaskKind, cg: CG) -> CoreResult<TaskId>
    where
        CG: Fn(&mut Handler<'_>) -> CoreResult<()> + 'static,
    {
        let tid = TaskId::from_raw(self.task_count);

        let mut handler = Handler::prepass(tid, kind);
        cg(&mut handler)?;
        let task = handler.into_task()?;
        debug!(task = %tid, label = %task.label, "task recorded");

        self.tasks.add_task(task)?;
        self.command_groups.insert(tid, Box::new(cg));
        self.task_count += 1;
        Ok(tid)
    }

    /// Lower every eligible task into commands.
    ///
    /// Reductions allocated during lowering are registered with the
    /// runtime's reduction registry so inbound partials can be committed
    /// the moment they arrive.
    ///
    /// Returns the number of tasks processed.
    ///
    /// # Errors
    ///
    /// Returns builder errors; the graphs are not rolled back.
    pub fn build_command_graph(&mut self) -> CoreResult<usize> {
        let processed = self
            .builder
            .process_ready(&mut self.tasks, &mut self.states)?;

        let registry = self.runtime.reductions();
        for (&rid, &bid) in self.builder.graph().reductions() {
            if !registry.has_reduction(rid) {
                registry.register(rid, bid);
            }
        }
        Ok(processed)
    }

    /// Run a task's stored command group in live mode for one chunk.
    ///
    /// # Errors
    ///
    /// Returns usage errors when execution-time accessors diverge from
    /// the pre-pass, and whatever the device collaborator reports.
    pub fn execute_live(
        &self,
        tid: TaskId,
        chunk: &Subrange,
        device: &mut dyn DeviceCompute,
    ) -> CoreResult<()> {
        let cg = self.command_groups.get(&tid).ok_or_else(|| CoreError::NotFound {
            kind: "CommandGroup".to_string(),
            id: tid.to_string(),
        })?;
        let vertex = self.tasks.get(tid).ok_or_else(|| CoreError::NotFound {
            kind: "Task".to_string(),
            id: tid.to_string(),
        })?;
        let expected: Vec<BufferId> =
            vertex.task.requirements.iter().map(|r| r.bid).collect();

        let mut handler = Handler::live(
            tid,
            vertex.task.kind,
            vertex.task.label.clone(),
            *chunk,
            expected,
            device,
        );
        cg(&mut handler)?;
        handler.finish_live()
    }

    /// The runtime this queue belongs to
    #[must_use]
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The task DAG built so far
    #[must_use]
    pub fn task_graph(&self) -> &TaskGraph {
        &self.tasks
    }

    /// The command DAG built so far
    #[must_use]
    pub fn command_graph(&self) -> &CommandGraph {
        self.builder.graph()
    }

    /// The ownership state of a buffer
    #[must_use]
    pub fn buffer_state(&self, bid: BufferId) -> Option<&BufferState> {
        self.states.get(&bid)
    }
}
