//! TESSERA Deterministic Simulation
//!
//! Runs N worker nodes in one process over the in-memory fabric. Every
//! node executes the same submission program, builds the same graphs,
//! and drives its own executor and transfer manager; the harness ticks
//! the nodes in a seeded order so transfer arrival interleavings vary
//! reproducibly.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod harness;
pub mod seed;

pub use harness::{SimCluster, SimConfig, SimResult, SimWorker};
pub use seed::{SeedSource, SimSeed};
