//! The command group handler.
//!
//! The same user closure runs twice: once in *prepass* mode, where it
//! only records the kernel's global size, debug label, and buffer
//! requirements, and once per chunk in *live* mode, where accessor
//! bindings are resolved and the kernel is handed to the device-compute
//! collaborator. Operations invalid in a mode fail with a usage error.

use crate::device::{AccessorBinding, DeviceCompute};
use tessera_core::{AccessMode, BufferId, CoreError, CoreResult, TaskId};
use tessera_graph::{BufferRequirement, RangeMapper, Task, TaskKind};
use tessera_grid::{Extent, Subrange};
use std::sync::Arc;

enum Mode<'a> {
    Prepass {
        global_size: Option<Extent>,
        label: Option<String>,
        requirements: Vec<BufferRequirement>,
    },
    Live {
        chunk: Subrange,
        label: String,
        expected: Vec<BufferId>,
        bindings: Vec<AccessorBinding>,
        device: &'a mut dyn DeviceCompute,
        dispatched: bool,
    },
}

/// Handler passed to command group closures.
pub struct Handler<'a> {
    tid: TaskId,
    kind: TaskKind,
    mode: Mode<'a>,
}

impl<'a> Handler<'a> {
    pub(crate) fn prepass(tid: TaskId, kind: TaskKind) -> Handler<'static> {
        Handler {
            tid,
            kind,
            mode: Mode::Prepass {
                global_size: None,
                label: None,
                requirements: Vec::new(),
            },
        }
    }

    pub(crate) fn live(
        tid: TaskId,
        kind: TaskKind,
        label: String,
        chunk: Subrange,
        expected: Vec<BufferId>,
        device: &'a mut dyn DeviceCompute,
    ) -> Handler<'a> {
        Handler {
            tid,
            kind,
            mode: Mode::Live {
                chunk,
                label,
                expected,
                bindings: Vec::new(),
                device,
                dispatched: false,
            },
        }
    }

    /// The task this handler belongs to
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.tid
    }

    /// Declare the kernel of a compute task.
    ///
    /// In prepass mode this records the global iteration space and debug
    /// label. In live mode it dispatches the current chunk to the device
    /// collaborator with the bindings declared so far.
    ///
    /// # Errors
    ///
    /// Returns a usage error on a master-access handler, on a repeated
    /// call, or if live bindings do not match the prepass requirements.
    pub fn parallel_for(&mut self, global_size: Extent, name: &str) -> CoreResult<()> {
        if self.kind != TaskKind::Compute {
            return Err(CoreError::usage(
                "parallel_for is only allowed in compute tasks",
            ));
        }
        self.launch(global_size, name)
    }

    /// Declare the host body of a master-access task.
    ///
    /// # Errors
    ///
    /// Returns a usage error on a compute handler, on a repeated call, or
    /// if live bindings do not match the prepass requirements.
    pub fn host_access(&mut self, global_size: Extent, name: &str) -> CoreResult<()> {
        if self.kind != TaskKind::MasterAccess {
            return Err(CoreError::usage(
                "host_access is only allowed in master-access tasks",
            ));
        }
        self.launch(global_size, name)
    }

    fn launch(&mut self, global: Extent, name: &str) -> CoreResult<()> {
        match &mut self.mode {
            Mode::Prepass {
                global_size, label, ..
            } => {
                if global_size.is_some() {
                    return Err(CoreError::usage(
                        "a command group declares exactly one kernel",
                    ));
                }
                *global_size = Some(global);
                *label = Some(name.to_string());
                Ok(())
            }
            Mode::Live {
                chunk,
                label,
                expected,
                bindings,
                device,
                dispatched,
            } => {
                if *dispatched {
                    return Err(CoreError::usage(
                        "a command group declares exactly one kernel",
                    ));
                }
                let bound: Vec<BufferId> = bindings.iter().map(|b| b.bid).collect();
                if bound != *expected {
                    return Err(CoreError::usage(format!(
                        "accessors at execution ({:?}) do not match the pre-pass ({:?})",
                        bound, expected
                    )));
                }
                device.execute(self.tid, label, chunk, bindings)?;
                *dispatched = true;
                Ok(())
            }
        }
    }

    /// Declare a buffer access. Called through
    /// [`BufferHandle::get_access`](crate::buffer::BufferHandle::get_access).
    ///
    /// # Errors
    ///
    /// Returns a usage error if the mapper's dimensionality does not
    /// match the buffer's.
    pub fn require(
        &mut self,
        bid: BufferId,
        extent: Extent,
        mode: AccessMode,
        mapper: Arc<dyn RangeMapper>,
    ) -> CoreResult<()> {
        if mapper.dimensions() != extent.dims() {
            return Err(CoreError::DimensionMismatch {
                expected: extent.dims() as usize,
                actual: mapper.dimensions() as usize,
            });
        }

        match &mut self.mode {
            Mode::Prepass { requirements, .. } => {
                requirements.push(BufferRequirement::new(bid, mode, mapper));
                Ok(())
            }
            Mode::Live { chunk, bindings, .. } => {
                let sr = mapper.map(chunk).clamp_to(&extent);
                bindings.push(AccessorBinding { bid, mode, sr });
                Ok(())
            }
        }
    }

    /// Finish a prepass and produce the recorded task.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the command group never declared a
    /// kernel, or on a live handler.
    pub(crate) fn into_task(self) -> CoreResult<Task> {
        let Mode::Prepass {
            global_size,
            label,
            requirements,
        } = self.mode
        else {
            return Err(CoreError::usage("into_task on a live handler"));
        };
        let Some(global_size) = global_size else {
            return Err(CoreError::usage(
                "command group declared no kernel during the pre-pass",
            ));
        };
        let label = label.unwrap_or_else(|| format!("task{}", self.tid.as_u64()));
        let mut task = match self.kind {
            TaskKind::Compute => Task::compute(self.tid, global_size, label),
            TaskKind::MasterAccess => Task::master_access(self.tid, global_size, label),
        };
        for req in requirements {
            task.add_requirement(req);
        }
        Ok(task)
    }

    /// Finish a live run.
    ///
    /// # Errors
    ///
    /// Returns a usage error if the command group never dispatched its
    /// kernel.
    pub(crate) fn finish_live(self) -> CoreResult<()> {
        let Mode::Live { dispatched, .. } = self.mode else {
            return Err(CoreError::usage("finish_live on a prepass handler"));
        };
        if !dispatched {
            return Err(CoreError::usage(
                "command group did not dispatch its kernel at execution time",
            ));
        }
        Ok(())
    }
}
