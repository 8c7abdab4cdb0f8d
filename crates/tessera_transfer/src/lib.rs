//! TESSERA Buffer Transfers
//!
//! The asynchronous machinery that moves buffer regions between nodes:
//! the packed wire frame, the non-blocking message fabric abstraction
//! (with an in-memory implementation), and the transfer manager that
//! matches outgoing pushes to awaiting receivers via the push blackboard.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fabric;
pub mod frame;
pub mod manager;

pub use fabric::{
    Fabric, FabricError, FabricResult, MemoryFabric, MemoryFabricHub, ReceivedFrame,
    RecvRequest, SendRequest, TAG_DATA_TRANSFER,
};
pub use frame::{DataFrame, FrameError, FRAME_HEADER_LEN};
pub use manager::{TransferHandle, TransferManager};
