//! TESSERA Runtime
//!
//! The per-node runtime surface: an explicitly-owned [`Runtime`] value,
//! the distributed queue that records command groups and builds the
//! graphs, the recording/executing handler pair, the device-compute
//! collaborator boundary, and the executor that drives one node's
//! command stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod device;
pub mod executor;
pub mod handler;
pub mod queue;
pub mod runtime;

pub use buffer::BufferHandle;
pub use device::{AccessorBinding, DeviceCompute, HostDevice, HostKernel, HostKernelCtx};
pub use executor::{CommandExecutor, Progress};
pub use handler::Handler;
pub use queue::DistrQueue;
pub use runtime::{Runtime, RuntimeConfig};
