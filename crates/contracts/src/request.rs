//! PollRequest - what a consumer poll carries into the push layer

use std::time::Duration;

use crate::{RpcContext, Version};

/// An accepted long-poll from a consumer
#[derive(Debug, Clone)]
pub struct PollRequest {
    /// Consumer-side request id
    pub request_id: i64,
    /// Request generation; echoed in the response header
    pub epoch: i32,
    /// Where to send the reply
    pub rpc: RpcContext,
    /// Last version the consumer has processed
    pub processed_version: Version,
    /// Offset the consumer asked to read from
    pub requested_offset: i64,
    /// Expiry override; the configured poll timeout applies when `None`
    pub timeout: Option<Duration>,
}

impl PollRequest {
    /// Poll continuing from `processed_version`, reading at the next offset
    pub fn new(request_id: i64, epoch: i32, rpc: RpcContext, processed_version: Version) -> Self {
        Self {
            request_id,
            epoch,
            rpc,
            processed_version,
            requested_offset: processed_version + 1,
            timeout: None,
        }
    }

    pub fn with_requested_offset(mut self, offset: i64) -> Self {
        self.requested_offset = offset;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
