//! PushConfig - tuning knobs of the push layer
//!
//! Every field has a default so an empty config file is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Smallest encodable response: 14-byte header plus a 20-byte empty body
pub const MIN_RESPONSE_BYTES: usize = 34;

/// Push layer configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PushConfig {
    /// Config version
    pub version: ConfigVersion,

    /// Vnode group this push layer serves (log context only)
    pub vgroup_id: i32,

    /// Dispatch worker count
    #[validate(range(min = 1, max = 1024, message = "worker_count must be in 1..=1024"))]
    pub worker_count: usize,

    /// Per-handle input queue capacity before back-pressure kicks in
    #[validate(range(min = 1, message = "queue_capacity must be > 0"))]
    pub queue_capacity: usize,

    /// Default long-poll expiry in milliseconds
    #[validate(range(min = 1, message = "poll_timeout_ms must be > 0"))]
    pub poll_timeout_ms: u64,

    /// Upper bound on one encoded response
    #[validate(range(min = 34, message = "max_response_bytes must be >= 34"))]
    pub max_response_bytes: usize,

    /// Maximum number of registered handles
    #[validate(range(min = 1, message = "max_handles must be > 0"))]
    pub max_handles: usize,

    /// Maximum WAL entries recovered per gap
    #[validate(range(min = 1, message = "wal_scan_limit must be > 0"))]
    pub wal_scan_limit: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            version: ConfigVersion::V1,
            vgroup_id: 0,
            worker_count: 4,
            queue_capacity: 1024,
            poll_timeout_ms: 5000,
            max_response_bytes: 16 * 1024 * 1024,
            max_handles: 4096,
            wal_scan_limit: 4096,
        }
    }
}

impl PushConfig {
    /// Default poll timeout as a Duration
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}
