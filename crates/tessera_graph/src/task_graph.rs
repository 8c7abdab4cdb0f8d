//! The task DAG.
//!
//! Built incrementally on submission: each task that reads a buffer gains
//! an edge from that buffer's current last writer; each task that writes
//! becomes the new last writer. Edges therefore always point from an
//! earlier submission to a later one, so the graph is acyclic by
//! construction.

use crate::task::Task;
use indexmap::{IndexMap, IndexSet};
use tessera_core::{BufferId, CoreError, CoreResult, TaskId};

/// One task plus its graph bookkeeping
#[derive(Debug, Clone)]
pub struct TaskVertex {
    /// The captured task
    pub task: Task,
    /// Whether this task has been lowered into commands
    pub processed: bool,
    /// Number of incoming edges whose source is not yet processed
    pub num_unsatisfied: usize,
    /// Tasks this one depends on
    pub dependencies: IndexSet<TaskId>,
    /// Tasks depending on this one
    pub dependents: IndexSet<TaskId>,
}

/// The task DAG
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    vertices: IndexMap<TaskId, TaskVertex>,
    buffer_last_writer: IndexMap<BufferId, TaskId>,
}

impl TaskGraph {
    /// Create an empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a submitted task and derive its edges.
    ///
    /// # Errors
    ///
    /// Returns an error if a task with the same id was already added.
    pub fn add_task(&mut self, task: Task) -> CoreResult<()> {
        let tid = task.id;
        if self.vertices.contains_key(&tid) {
            return Err(CoreError::AlreadyExists {
                kind: "Task".to_string(),
                id: tid.to_string(),
            });
        }

        // Read edges come from the last-writer state before this task's
        // own writes take effect.
        let mut dependencies = IndexSet::new();
        for req in &task.requirements {
            if !req.mode.reads() {
                continue;
            }
            if let Some(&writer) = self.buffer_last_writer.get(&req.bid) {
                if writer != tid {
                    dependencies.insert(writer);
                }
            }
        }

        for req in &task.requirements {
            if req.mode.writes() {
                self.buffer_last_writer.insert(req.bid, tid);
            }
        }

        let num_unsatisfied = dependencies
            .iter()
            .filter(|dep| {
                self.vertices
                    .get(*dep)
                    .is_some_and(|v| !v.processed)
            })
            .count();

        for dep in &dependencies {
            if let Some(v) = self.vertices.get_mut(dep) {
                v.dependents.insert(tid);
            }
        }

        self.vertices.insert(
            tid,
            TaskVertex {
                task,
                processed: false,
                num_unsatisfied,
                dependencies,
                dependents: IndexSet::new(),
            },
        );
        Ok(())
    }

    /// Get a vertex
    #[must_use]
    pub fn get(&self, tid: TaskId) -> Option<&TaskVertex> {
        self.vertices.get(&tid)
    }

    /// Current last writer of a buffer
    #[must_use]
    pub fn last_writer(&self, bid: BufferId) -> Option<TaskId> {
        self.buffer_last_writer.get(&bid).copied()
    }

    /// Unprocessed tasks with no unsatisfied dependencies, in id order
    #[must_use]
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        let mut ready: Vec<TaskId> = self
            .vertices
            .values()
            .filter(|v| !v.processed && v.num_unsatisfied == 0)
            .map(|v| v.task.id)
            .collect();
        ready.sort();
        ready
    }

    /// Mark a task processed and release its dependents.
    ///
    /// Returns the dependents that became eligible.
    ///
    /// # Errors
    ///
    /// Returns an error if the task is unknown or already processed.
    pub fn mark_processed(&mut self, tid: TaskId) -> CoreResult<Vec<TaskId>> {
        let vertex = self.vertices.get_mut(&tid).ok_or_else(|| CoreError::NotFound {
            kind: "Task".to_string(),
            id: tid.to_string(),
        })?;
        if vertex.processed {
            return Err(CoreError::invariant(
                None,
                format!("{} processed twice", tid),
            ));
        }
        vertex.processed = true;

        let dependents: Vec<TaskId> = vertex.dependents.iter().copied().collect();
        let mut released = Vec::new();
        for dep in dependents {
            if let Some(v) = self.vertices.get_mut(&dep) {
                v.num_unsatisfied -= 1;
                if v.num_unsatisfied == 0 {
                    released.push(dep);
                }
            }
        }
        Ok(released)
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Whether the graph is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Whether every task has been processed
    #[must_use]
    pub fn all_processed(&self) -> bool {
        self.vertices.values().all(|v| v.processed)
    }

    /// Check structural invariants: every edge points from an earlier
    /// submission to a later one.
    ///
    /// # Errors
    ///
    /// Returns an error on the first violating edge.
    pub fn validate(&self) -> CoreResult<()> {
        for vertex in self.vertices.values() {
            for dep in &vertex.dependencies {
                if *dep >= vertex.task.id {
                    return Err(CoreError::invariant(
                        None,
                        format!("edge {} -> {} violates submission order", dep, vertex.task.id),
                    ));
                }
                if !self.vertices.contains_key(dep) {
                    return Err(CoreError::NotFound {
                        kind: "Task".to_string(),
                        id: dep.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::one_to_one;
    use crate::task::BufferRequirement;
    use tessera_core::AccessMode;
    use tessera_grid::Extent;

    fn make_test_task(raw: u64, bid: u64, mode: AccessMode) -> Task {
        Task::compute(TaskId::from_raw(raw), Extent::d1(8), format!("task{}", raw))
            .with_requirement(BufferRequirement::new(
                BufferId::from_raw(bid),
                mode,
                one_to_one(1),
            ))
    }

    #[test]
    fn test_writer_then_reader_edge() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        graph.add_task(make_test_task(1, 0, AccessMode::Read)).unwrap();

        let reader = graph.get(TaskId::from_raw(1)).unwrap();
        assert!(reader.dependencies.contains(&TaskId::from_raw(0)));
        assert_eq!(reader.num_unsatisfied, 1);

        let writer = graph.get(TaskId::from_raw(0)).unwrap();
        assert!(writer.dependents.contains(&TaskId::from_raw(1)));
    }

    #[test]
    fn test_discard_write_no_read_edge() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        graph
            .add_task(make_test_task(1, 0, AccessMode::DiscardWrite))
            .unwrap();

        let second = graph.get(TaskId::from_raw(1)).unwrap();
        assert!(second.dependencies.is_empty());
        // the discard-writer still becomes the new last writer
        assert_eq!(graph.last_writer(BufferId::from_raw(0)), Some(TaskId::from_raw(1)));
    }

    #[test]
    fn test_read_with_no_writer() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Read)).unwrap();
        let v = graph.get(TaskId::from_raw(0)).unwrap();
        assert!(v.dependencies.is_empty());
        assert_eq!(v.num_unsatisfied, 0);
    }

    #[test]
    fn test_read_write_chain() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        graph
            .add_task(make_test_task(1, 0, AccessMode::ReadWrite))
            .unwrap();
        graph.add_task(make_test_task(2, 0, AccessMode::Read)).unwrap();

        // task 2 reads task 1's output, not task 0's
        let third = graph.get(TaskId::from_raw(2)).unwrap();
        assert!(third.dependencies.contains(&TaskId::from_raw(1)));
        assert!(!third.dependencies.contains(&TaskId::from_raw(0)));
    }

    #[test]
    fn test_ready_and_release() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        graph.add_task(make_test_task(1, 0, AccessMode::Read)).unwrap();

        assert_eq!(graph.ready_tasks(), vec![TaskId::from_raw(0)]);

        let released = graph.mark_processed(TaskId::from_raw(0)).unwrap();
        assert_eq!(released, vec![TaskId::from_raw(1)]);
        assert_eq!(graph.ready_tasks(), vec![TaskId::from_raw(1)]);
    }

    #[test]
    fn test_mark_processed_twice() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        graph.mark_processed(TaskId::from_raw(0)).unwrap();
        assert!(graph.mark_processed(TaskId::from_raw(0)).is_err());
    }

    #[test]
    fn test_independent_buffers_no_edges() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        graph.add_task(make_test_task(1, 1, AccessMode::Read)).unwrap();

        assert_eq!(graph.ready_tasks().len(), 2);
    }

    #[test]
    fn test_validate_submission_order() {
        let mut graph = TaskGraph::new();
        for i in 0..4 {
            let mode = if i % 2 == 0 { AccessMode::Write } else { AccessMode::Read };
            graph.add_task(make_test_task(i, 0, mode)).unwrap();
        }
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn test_duplicate_task_id() {
        let mut graph = TaskGraph::new();
        graph.add_task(make_test_task(0, 0, AccessMode::Write)).unwrap();
        assert!(graph.add_task(make_test_task(0, 0, AccessMode::Write)).is_err());
    }
}
