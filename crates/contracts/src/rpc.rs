//! RPC boundary: reply context and fire-and-forget sender

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Reply routing for one outstanding consumer poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RpcContext {
    /// Transport connection the poll arrived on
    pub conn_id: u64,
    /// Correlation id the transport matches the reply with
    pub correlation_id: u64,
}

impl RpcContext {
    pub fn new(conn_id: u64, correlation_id: u64) -> Self {
        Self {
            conn_id,
            correlation_id,
        }
    }
}

/// Transport that carries encoded responses back to consumers.
///
/// `send` takes ownership of the buffer and must not block on the network.
pub trait RpcSender: Send + Sync {
    fn send(&self, ctx: RpcContext, buf: Bytes);
}
