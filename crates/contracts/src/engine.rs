//! ExecEngine trait - computation engine behind the push path
//!
//! Turns one submit batch into zero or more encoded result blocks for a
//! single consumer.

use bytes::Bytes;

use crate::{ConsumerKey, ContractError, SubmitPayload, Version};

/// What the engine gets to know about the handle it executes for
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Registry id of the push handle
    pub handle_id: u64,
    /// Topic and consumer the results are for
    pub key: ConsumerKey,
    /// Last version already executed for this consumer
    pub processed_version: Version,
}

/// Engine output for one submit batch
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Encoded result blocks, in order
    pub blocks: Vec<Bytes>,
    /// Version the consumer has processed after this batch
    pub processed_version: Version,
}

impl ExecOutput {
    /// Output with no rows for the consumer
    pub fn empty(processed_version: Version) -> Self {
        Self {
            blocks: Vec::new(),
            processed_version,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Execution engine interface
///
/// May take arbitrary time; it is always called from a dispatch worker and
/// never with a handle lock held.
#[trait_variant::make(ExecEngine: Send)]
pub trait LocalExecEngine {
    /// Execute one batch for the consumer described by `ctx`
    ///
    /// # Errors
    /// Returns an exec error; the caller does not advance the consumer's
    /// processed version for this batch.
    async fn execute(
        &self,
        ctx: &ExecContext,
        payload: &SubmitPayload,
        worker_id: usize,
    ) -> Result<ExecOutput, ContractError>;
}
