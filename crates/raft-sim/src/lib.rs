//! # raft-sim
//!
//! why: watch raft-core elect leaders and replicate entries without a real network
//! relations: depends on raft-core only; used by the raft-sim binary and cluster tests
//! what: delayed message channels, a cluster simulator on a shared logical clock

pub mod channel;
pub mod error;
pub mod simulator;

pub use channel::{InFlight, MessageChannel};
pub use error::{Result, SimError};
pub use simulator::{Simulator, SimulatorOptions, SimulatorState};
