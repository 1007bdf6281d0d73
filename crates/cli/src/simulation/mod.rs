//! In-process simulation of a storage node with long-polling consumers.

mod harness;
mod stats;

pub use harness::{Simulation, SimulationConfig};
