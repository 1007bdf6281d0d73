//! # Contracts
//!
//! Frozen interface contracts between the push layer and its collaborators.
//! Business crates depend only on this crate, never on each other's internals.
//!
//! ## Version Model
//! - Every accepted write carries a monotonically increasing WAL `Version`
//! - Consumers report the last version they processed on each poll

mod config;
mod engine;
mod error;
mod payload;
mod request;
mod rpc;
mod subscription;
mod wal;

pub use config::*;
pub use engine::*;
pub use error::*;
pub use payload::*;
pub use request::PollRequest;
pub use rpc::{RpcContext, RpcSender};
pub use subscription::{ConsumerId, ConsumerKey, Topic};
pub use wal::{WalReader, WalScan};
