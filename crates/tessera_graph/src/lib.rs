//! TESSERA Graph Construction
//!
//! Turns the linear stream of submitted command groups into a task DAG,
//! then lowers each task into per-node commands with explicit inter-node
//! transfer pairs. Both graphs are pure functions of submission order.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod command_graph;
pub mod mapper;
pub mod task;
pub mod task_graph;

pub use command::{Command, CommandKind};
pub use command_graph::{CommandGraph, CommandGraphBuilder};
pub use mapper::{FixedSubrange, FnMapper, FullExtent, OneToOne, RangeMapper};
pub use task::{BufferRequirement, Task, TaskKind};
pub use task_graph::{TaskGraph, TaskVertex};
