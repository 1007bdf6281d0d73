//! Push engine error types

use thiserror::Error;

use contracts::{ConsumerKey, MsgType, Version};

use crate::registry::HandleId;

/// Push-path errors
///
/// Retryable variants only affect one handle for one attempt; callers skip
/// the handle and carry on.
#[derive(Debug, Error)]
pub enum PushError {
    /// Back-pressure: the handle is refusing new input
    #[error("handle {handle_id} input blocked")]
    Blocked { handle_id: HandleId },

    /// The outstanding request expired; input waits for the next poll
    #[error("handle {handle_id} request expired")]
    Expired { handle_id: HandleId },

    /// The handle was unregistered while the operation was in flight
    #[error("handle {handle_id} closed")]
    HandleClosed { handle_id: HandleId },

    /// Handle id not present in the registry
    #[error("handle {0} not found")]
    HandleNotFound(HandleId),

    /// Consumer already has a handle
    #[error("consumer '{0}' already registered")]
    DuplicateConsumer(ConsumerKey),

    /// A bounded resource ran out
    #[error("{resource} exhausted: {message}")]
    ResourceExhausted {
        resource: &'static str,
        message: String,
    },

    /// A non-submit message reached the push path
    #[error("unsupported message type '{msg_type}' at version {version}")]
    UnsupportedMessage { msg_type: MsgType, version: Version },

    /// Response could not be encoded or decoded
    #[error("encode error: {0}")]
    Encode(String),

    /// Collaborator failure
    #[error("collaborator error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// The manager is shutting down
    #[error("push manager shut down")]
    Shutdown,
}

impl PushError {
    /// Create a resource exhaustion error
    pub fn exhausted(resource: &'static str, message: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            resource,
            message: message.into(),
        }
    }

    /// True for failures the caller should treat as "skip and retry later"
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Blocked { .. } | Self::Expired { .. } | Self::HandleClosed { .. }
        )
    }
}
