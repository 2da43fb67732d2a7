//! chainsync-rpc: the RPC layer of ChainSync.
//!
//! - [`RpcTransport`]: a single JSON-RPC round trip ([`HttpTransport`], [`mock::MockTransport`])
//! - [`RequestQueue`]: per-network rate limit, concurrency ceiling, retry,
//!   `eth_getLogs` range splitting and cancellation
//! - [`methods`]: typed EVM calls and the store-backed RPC cache

pub mod error;
pub mod http;
pub mod logs_retry;
pub mod methods;
pub mod mock;
pub mod policy;
pub mod queue;
pub mod request;
pub mod transport;

pub use error::{RequestError, TransportError};
pub use http::{HttpTransport, HttpTransportConfig};
pub use methods::{BlockTag, LogsQuery, TraceQuery};
pub use queue::{RequestQueue, RequestQueueConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcId};
pub use transport::RpcTransport;
