//! The `RpcTransport` trait: a single JSON-RPC round trip.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::request::{JsonRpcRequest, JsonRpcResponse};

/// A raw JSON-RPC transport. Retries, rate limiting and cancellation are
/// layered on top by [`crate::queue::RequestQueue`].
///
/// The trait is object-safe and stored as `Arc<dyn RpcTransport>`.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError>;

    /// The transport's identifier (URL or name).
    fn url(&self) -> &str;

    /// Send a request and unwrap the JSON-RPC result.
    async fn call(&self, req: JsonRpcRequest) -> Result<Value, TransportError> {
        self.send(req)
            .await?
            .into_result()
            .map_err(TransportError::Rpc)
    }
}
