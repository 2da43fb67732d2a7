//! Transport and request error types.

use thiserror::Error;

use chainsync_core::error::SyncError;

use crate::request::JsonRpcError;

/// JSON-RPC codes that mean the request itself is wrong; retrying cannot help.
const FATAL_RPC_CODES: &[i64] = &[
    -32700, // parse error
    -32600, // invalid request
    -32601, // method not found
    -32602, // invalid params
    3,      // execution reverted
    -32015, // execution reverted (some clients)
];

/// EIP-1474 "limit exceeded".
const LIMIT_EXCEEDED_CODE: i64 = -32005;

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "too many requests",
    "requests per second",
    "exceeded the quota",
    "throttled",
];

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p))
}

/// Errors that can occur during a single RPC round trip.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed. `status` is `None` for connection failures.
    #[error("HTTP error{}: {message}", .status.map(|s| format!(" {s}")).unwrap_or_default())]
    Http { status: Option<u16>, message: String },

    /// JSON-RPC protocol-level error returned by the node.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// The node answered `null` for data that must exist (block, receipt).
    #[error("{method} returned no result")]
    NotFound { method: String },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is transient and the request should be
    /// retried with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status: None, .. } => true,
            Self::Http {
                status: Some(status),
                ..
            } => !(400..500).contains(status) || matches!(*status, 408 | 413 | 429),
            Self::Rpc(err) => {
                !FATAL_RPC_CODES.contains(&err.code)
                    && !err.message.to_ascii_lowercase().contains("execution reverted")
            }
            Self::Timeout { .. }
            | Self::Deserialization(_)
            | Self::NotFound { .. }
            | Self::Other(_) => true,
        }
    }

    /// Returns `true` if the provider is throttling us. Such errors are
    /// retried with backoff and never split into more requests.
    ///
    /// Infura reuses `-32005` for oversized log queries, so that code only
    /// counts as throttling when the message does not carry a result limit.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Http {
                status: Some(429), ..
            } => true,
            Self::Http { message, .. } | Self::Other(message) => is_rate_limit_message(message),
            Self::Rpc(err) => {
                is_rate_limit_message(&err.message)
                    || (err.code == LIMIT_EXCEEDED_CODE
                        && !err.message.to_ascii_lowercase().contains("query returned more than"))
            }
            _ => false,
        }
    }

    /// Provider message text, if any, used to derive `eth_getLogs` split hints.
    pub fn message(&self) -> String {
        match self {
            Self::Rpc(err) => match &err.data {
                Some(data) => format!("{} {}", err.message, data),
                None => err.message.clone(),
            },
            other => other.to_string(),
        }
    }
}

/// Final outcome of a queued request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{method} failed after {attempts} attempt(s): {source}")]
    Transport {
        method: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// The queue was shut down before the request completed.
    #[error("Request queue killed")]
    Killed,
}

impl From<RequestError> for SyncError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Killed => SyncError::Killed,
            other => SyncError::Rpc(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16) -> TransportError {
        TransportError::Http {
            status: Some(status),
            message: String::new(),
        }
    }

    #[test]
    fn http_classification() {
        assert!(http(429).is_retryable());
        assert!(http(408).is_retryable());
        assert!(http(413).is_retryable());
        assert!(http(502).is_retryable());
        assert!(!http(400).is_retryable());
        assert!(!http(403).is_retryable());
        assert!(TransportError::Http { status: None, message: "refused".into() }.is_retryable());
    }

    #[test]
    fn rpc_classification() {
        let rpc = |code, msg: &str| TransportError::Rpc(JsonRpcError::new(code, msg));
        assert!(rpc(-32005, "rate limit exceeded").is_retryable());
        assert!(rpc(-32000, "header not found").is_retryable());
        assert!(rpc(-32603, "internal error").is_retryable());
        assert!(!rpc(-32602, "invalid params").is_retryable());
        assert!(!rpc(-32601, "method not found").is_retryable());
        assert!(!rpc(3, "execution reverted").is_retryable());
        assert!(!rpc(-32000, "execution reverted: nope").is_retryable());
        assert!(TransportError::Timeout { ms: 10 }.is_retryable());
    }

    #[test]
    fn rate_limit_classification() {
        let rpc = |code, msg: &str| TransportError::Rpc(JsonRpcError::new(code, msg));
        assert!(http(429).is_rate_limited());
        assert!(rpc(-32005, "limit exceeded").is_rate_limited());
        assert!(rpc(-32000, "Your app has exceeded its compute units per second capacity. Rate limit hit").is_rate_limited());
        assert!(TransportError::Other("429 Too Many Requests".into()).is_rate_limited());
        assert!(!rpc(-32005, "query returned more than 10000 results").is_rate_limited());
        assert!(!rpc(-32000, "block range is too wide").is_rate_limited());
        assert!(!http(500).is_rate_limited());
    }

    #[test]
    fn killed_maps_to_sync_killed() {
        assert!(SyncError::from(RequestError::Killed).is_killed());
        let err = RequestError::Transport {
            method: "eth_getLogs".into(),
            attempts: 10,
            source: http(500),
        };
        assert!(matches!(SyncError::from(err), SyncError::Rpc(_)));
    }
}
