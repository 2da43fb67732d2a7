//! Scripted in-process transport for tests.
//!
//! Responses come from, in order: one-shot results queued per method with
//! [`MockTransport::push_result`] / [`MockTransport::push_error`], then a
//! per-method handler registered with [`MockTransport::on`]. Unknown methods
//! answer `-32601 method not found`. Every request is recorded.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::error::TransportError;
use crate::request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::transport::RpcTransport;

type Handler = Box<dyn Fn(&[Value]) -> Result<Value, JsonRpcError> + Send + Sync>;

enum Scripted {
    Response(Result<Value, JsonRpcError>),
    Transport(TransportError),
}

#[derive(Default)]
pub struct MockTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    scripted: Mutex<HashMap<String, VecDeque<Scripted>>>,
    log: Mutex<Vec<JsonRpcRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every `method` call with `handler(params)` unless a one-shot
    /// response is queued. Replaces any previous handler.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, JsonRpcError> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(method.to_string(), Box::new(handler));
    }

    pub fn push_result(&self, method: &str, result: Value) {
        self.push(method, Scripted::Response(Ok(result)));
    }

    pub fn push_error(&self, method: &str, error: JsonRpcError) {
        self.push(method, Scripted::Response(Err(error)));
    }

    /// Fail the next `method` call below the JSON-RPC layer (HTTP, timeout).
    pub fn push_transport_error(&self, method: &str, error: TransportError) {
        self.push(method, Scripted::Transport(error));
    }

    fn push(&self, method: &str, item: Scripted) {
        self.scripted
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(item);
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<JsonRpcRequest> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self, method: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    pub fn clear_requests(&self) {
        self.log.lock().unwrap().clear();
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn send(&self, req: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        self.log.lock().unwrap().push(req.clone());

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&req.method)
            .and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(Scripted::Transport(err)) => return Err(err),
            Some(Scripted::Response(outcome)) => outcome,
            None => match self.handlers.lock().unwrap().get(&req.method) {
                Some(handler) => handler(&req.params),
                None => Err(JsonRpcError::new(
                    -32601,
                    format!("the method {} does not exist/is not available", req.method),
                )),
            },
        };

        Ok(match outcome {
            Ok(result) => JsonRpcResponse::ok(req.id, result),
            Err(error) => JsonRpcResponse::err(req.id, error),
        })
    }

    fn url(&self) -> &str {
        "mock://"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn scripted_before_handler() {
        let mock = MockTransport::new();
        mock.on("eth_blockNumber", |_| Ok(json!("0x2")));
        mock.push_result("eth_blockNumber", json!("0x1"));

        let call = |id| JsonRpcRequest::new(id, "eth_blockNumber", vec![]);
        assert_eq!(mock.call(call(1)).await.unwrap(), json!("0x1"));
        assert_eq!(mock.call(call(2)).await.unwrap(), json!("0x2"));
        assert_eq!(mock.request_count("eth_blockNumber"), 2);
    }

    #[tokio::test]
    async fn unknown_method_is_rpc_error() {
        let mock = MockTransport::new();
        let err = mock
            .call(JsonRpcRequest::new(1, "eth_foo", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Rpc(e) if e.code == -32601));
    }
}
