//! Write-side data handed to the push layer
//!
//! `SubmitPayload` wraps one accepted write batch. It is immutable and
//! shared by reference across every push handle that queues it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// WAL version of a write
pub type Version = i64;

/// Kind of write message reaching the storage node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgType {
    /// Data submit (the only kind the push path accepts)
    Submit,
    Delete,
    CreateTable,
    AlterTable,
    DropTable,
}

impl fmt::Display for MsgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MsgType::Submit => "submit",
            MsgType::Delete => "delete",
            MsgType::CreateTable => "create_table",
            MsgType::AlterTable => "alter_table",
            MsgType::DropTable => "drop_table",
        };
        f.write_str(name)
    }
}

/// A write as the storage node hands it over after it is accepted
#[derive(Debug, Clone)]
pub struct WriteMsg {
    pub msg_type: MsgType,
    pub version: Version,
    pub body: Bytes,
}

impl WriteMsg {
    pub fn submit(version: Version, body: impl Into<Bytes>) -> Self {
        Self {
            msg_type: MsgType::Submit,
            version,
            body: body.into(),
        }
    }
}

/// One record read back from the write-ahead log
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub version: Version,
    pub msg_type: MsgType,
    pub body: Bytes,
}

impl From<WriteMsg> for WalEntry {
    fn from(msg: WriteMsg) -> Self {
        Self {
            version: msg.version,
            msg_type: msg.msg_type,
            body: msg.body,
        }
    }
}

struct SubmitInner {
    version: Version,
    body: Bytes,
}

/// Reference-counted, immutable submit batch.
///
/// Cloning increments an atomic count and never copies the batch bytes;
/// the batch is released when the last clone is dropped.
#[derive(Clone)]
pub struct SubmitPayload(Arc<SubmitInner>);

impl SubmitPayload {
    pub fn new(version: Version, body: impl Into<Bytes>) -> Self {
        Self(Arc::new(SubmitInner {
            version,
            body: body.into(),
        }))
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.0.version
    }

    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.0.body
    }

    /// Number of live references to this batch
    #[inline]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True if both values share the same underlying batch
    #[inline]
    pub fn shares_storage(&self, other: &SubmitPayload) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for SubmitPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitPayload")
            .field("version", &self.0.version)
            .field("len", &self.0.body.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl From<WriteMsg> for SubmitPayload {
    fn from(msg: WriteMsg) -> Self {
        Self::new(msg.version, msg.body)
    }
}
