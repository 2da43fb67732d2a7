//! Error types for the sync engine.

use thiserror::Error;

/// Errors that can occur while syncing a network.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The provider answered, but the answer is inconsistent with data we
    /// know must exist (e.g. empty `eth_getLogs` for a block with a non-zero bloom).
    #[error("Invalid {method} response: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("Unrecoverable reorg on chain {chain_id}: no common ancestor above finalized block {finalized_block}")]
    UnrecoverableReorg { chain_id: u64, finalized_block: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Invalid checkpoint: {0}")]
    Checkpoint(String),

    #[error("Invalid interval: start ({start}) is greater than end ({end})")]
    Interval { start: u64, end: u64 },

    #[error("Block {block_number} was {reason}")]
    BlockProgress { block_number: u64, reason: String },

    /// The service was shut down while the operation was in flight.
    #[error("Sync killed")]
    Killed,

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    pub fn invalid_response(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error was caused by shutdown and should be
    /// swallowed rather than logged or retried.
    pub fn is_killed(&self) -> bool {
        matches!(self, Self::Killed)
    }

    /// Returns `true` if the error should halt the affected network.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnrecoverableReorg { .. } | Self::Config(_))
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(SyncError::Killed.is_killed());
        assert!(!SyncError::Rpc("boom".into()).is_killed());
        assert!(SyncError::UnrecoverableReorg {
            chain_id: 1,
            finalized_block: 10
        }
        .is_fatal());
        assert!(!SyncError::invalid_response("eth_getLogs", "empty").is_fatal());
    }
}
