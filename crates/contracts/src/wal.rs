//! WalReader trait - read side of the write-ahead log

use crate::{ContractError, Version, WalEntry};

/// Lazy, finite scan over WAL entries in version order
pub type WalScan<'a> = Box<dyn Iterator<Item = WalEntry> + Send + 'a>;

/// Write-ahead log reader
///
/// Used to recover entries a push handle missed while it was not queueing.
pub trait WalReader: Send + Sync {
    /// Scan entries with `version >= from`, in ascending version order.
    ///
    /// A scan can be restarted from any version by calling this again.
    fn scan_from(&self, from: Version) -> Result<WalScan<'_>, ContractError>;
}
