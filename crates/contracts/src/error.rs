//! Layered error definitions
//!
//! Categorized by source: config / engine / wal / rpc

use thiserror::Error;

use crate::{MsgType, Version};

/// Unified collaborator error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Execution Engine Errors =====
    /// The engine failed to execute a submit batch
    #[error("exec error at version {version}: {message}")]
    Exec { version: Version, message: String },

    /// A message kind other than submit reached the push path
    #[error("unsupported message type '{msg_type}' at version {version}")]
    UnsupportedMessage { msg_type: MsgType, version: Version },

    // ===== WAL Errors =====
    /// WAL scan failure
    #[error("wal scan from version {from} failed: {message}")]
    WalScan { from: Version, message: String },

    // ===== RPC Errors =====
    /// RPC send failure
    #[error("rpc send to conn {conn_id} failed: {message}")]
    RpcSend { conn_id: u64, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create execution error
    pub fn exec(version: Version, message: impl Into<String>) -> Self {
        Self::Exec {
            version,
            message: message.into(),
        }
    }

    /// Create WAL scan error
    pub fn wal_scan(from: Version, message: impl Into<String>) -> Self {
        Self::WalScan {
            from,
            message: message.into(),
        }
    }
}
