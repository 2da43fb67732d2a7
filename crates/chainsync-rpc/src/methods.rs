//! Typed EVM JSON-RPC helpers over a [`RequestQueue`].

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use chainsync_core::error::SyncError;
use chainsync_core::store::SyncStore;
use chainsync_core::types::{parse_hex_u64, to_hex, Block, CallTrace, Log, TransactionReceipt};

use crate::queue::RequestQueue;
use crate::request::JsonRpcRequest;

/// Block selector for `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Number(u64),
    Latest,
}

impl BlockTag {
    fn to_param(self) -> Value {
        match self {
            BlockTag::Number(n) => Value::String(to_hex(n)),
            BlockTag::Latest => json!("latest"),
        }
    }
}

/// Range selector of an `eth_getLogs` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogsRange {
    Blocks { from: u64, to: u64 },
    BlockHash(String),
}

/// An `eth_getLogs` filter. Empty lists are wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsQuery {
    pub range: LogsRange,
    pub address: Vec<String>,
    pub topics: Vec<Vec<String>>,
}

impl LogsQuery {
    pub fn blocks(from: u64, to: u64) -> Self {
        Self {
            range: LogsRange::Blocks { from, to },
            address: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn block_hash(hash: impl Into<String>) -> Self {
        Self {
            range: LogsRange::BlockHash(hash.into()),
            address: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn address(mut self, address: Vec<String>) -> Self {
        self.address = address;
        self
    }

    pub fn topics(mut self, topics: Vec<Vec<String>>) -> Self {
        self.topics = topics;
        self
    }

    fn to_param(&self) -> Value {
        let mut filter = Map::new();
        match &self.range {
            LogsRange::Blocks { from, to } => {
                filter.insert("fromBlock".into(), Value::String(to_hex(*from)));
                filter.insert("toBlock".into(), Value::String(to_hex(*to)));
            }
            LogsRange::BlockHash(hash) => {
                filter.insert("blockHash".into(), Value::String(hash.clone()));
            }
        }
        if !self.address.is_empty() {
            filter.insert("address".into(), json!(self.address));
        }
        let mut topics: Vec<Value> = self
            .topics
            .iter()
            .map(|alts| if alts.is_empty() { Value::Null } else { json!(alts) })
            .collect();
        while topics.last().is_some_and(Value::is_null) {
            topics.pop();
        }
        if !topics.is_empty() {
            filter.insert("topics".into(), Value::Array(topics));
        }
        Value::Object(filter)
    }
}

/// A `trace_filter` query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceQuery {
    pub from_block: u64,
    pub to_block: u64,
    pub from_address: Vec<String>,
    pub to_address: Vec<String>,
}

impl TraceQuery {
    fn to_param(&self) -> Value {
        let mut filter = Map::new();
        filter.insert("fromBlock".into(), Value::String(to_hex(self.from_block)));
        filter.insert("toBlock".into(), Value::String(to_hex(self.to_block)));
        if !self.from_address.is_empty() {
            filter.insert("fromAddress".into(), json!(self.from_address));
        }
        if !self.to_address.is_empty() {
            filter.insert("toAddress".into(), json!(self.to_address));
        }
        Value::Object(filter)
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, SyncError> {
    serde_json::from_value(value).map_err(|e| SyncError::invalid_response(method, e.to_string()))
}

/// `eth_blockNumber`
pub async fn block_number(queue: &RequestQueue) -> Result<u64, SyncError> {
    let value = queue.request("eth_blockNumber", vec![]).await?;
    value
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| SyncError::invalid_response("eth_blockNumber", format!("got {value}")))
}

/// `eth_chainId`
pub async fn chain_id(queue: &RequestQueue) -> Result<u64, SyncError> {
    let value = queue.request("eth_chainId", vec![]).await?;
    value
        .as_str()
        .and_then(parse_hex_u64)
        .ok_or_else(|| SyncError::invalid_response("eth_chainId", format!("got {value}")))
}

/// `eth_getBlockByNumber` with full transactions.
pub async fn get_block_by_number(queue: &RequestQueue, tag: BlockTag) -> Result<Block, SyncError> {
    let value = queue
        .request("eth_getBlockByNumber", vec![tag.to_param(), json!(true)])
        .await?;
    decode("eth_getBlockByNumber", value)
}

/// `eth_getBlockByHash` with full transactions.
pub async fn get_block_by_hash(queue: &RequestQueue, hash: &str) -> Result<Block, SyncError> {
    let value = queue
        .request("eth_getBlockByHash", vec![json!(hash), json!(true)])
        .await?;
    decode("eth_getBlockByHash", value)
}

/// `eth_getLogs`; oversized ranges are split by the queue.
pub async fn get_logs(queue: &RequestQueue, query: &LogsQuery) -> Result<Vec<Log>, SyncError> {
    let value = queue.request("eth_getLogs", vec![query.to_param()]).await?;
    decode("eth_getLogs", value)
}

/// `eth_getTransactionReceipt`
pub async fn get_transaction_receipt(
    queue: &RequestQueue,
    hash: &str,
) -> Result<TransactionReceipt, SyncError> {
    let value = queue
        .request("eth_getTransactionReceipt", vec![json!(hash)])
        .await?;
    decode("eth_getTransactionReceipt", value)
}

/// `trace_filter`
pub async fn trace_filter(queue: &RequestQueue, query: &TraceQuery) -> Result<Vec<CallTrace>, SyncError> {
    let value = queue.request("trace_filter", vec![query.to_param()]).await?;
    decode("trace_filter", value)
}

/// `trace_block`
pub async fn trace_block(queue: &RequestQueue, block_number: u64) -> Result<Vec<CallTrace>, SyncError> {
    let value = queue
        .request("trace_block", vec![Value::String(to_hex(block_number))])
        .await?;
    decode("trace_block", value)
}

/// Answer `method(params)` from the store's RPC cache, or request it and
/// fill the cache. `block_number` is part of the cache key so reorged
/// results can be deleted with the block.
pub async fn request_cached(
    queue: &RequestQueue,
    store: &dyn SyncStore,
    method: &str,
    params: Vec<Value>,
    block_number: u64,
) -> Result<Value, SyncError> {
    let key = JsonRpcRequest::new(0, method, params.clone()).cache_key();
    let chain_id = queue.chain_id();

    if let Some(cached) = store.get_rpc_request_result(chain_id, block_number, &key).await? {
        return serde_json::from_str(&cached)
            .map_err(|e| SyncError::Store(format!("corrupt cached RPC result for {method}: {e}")));
    }

    let value = queue.request(method, params).await?;
    store
        .insert_rpc_request_result(chain_id, block_number, &key, &value.to_string())
        .await?;
    Ok(value)
}

// ─── Cached (finalized data only) ─────────────────────────────────────────────

/// [`get_block_by_number`] for a finalized block, through the RPC cache.
pub async fn get_block_by_number_cached(
    queue: &RequestQueue,
    store: &dyn SyncStore,
    number: u64,
) -> Result<Block, SyncError> {
    let params = vec![BlockTag::Number(number).to_param(), json!(true)];
    let value = request_cached(queue, store, "eth_getBlockByNumber", params, number).await?;
    decode("eth_getBlockByNumber", value)
}

/// [`get_transaction_receipt`] for a transaction in finalized block
/// `block_number`, through the RPC cache.
pub async fn get_transaction_receipt_cached(
    queue: &RequestQueue,
    store: &dyn SyncStore,
    hash: &str,
    block_number: u64,
) -> Result<TransactionReceipt, SyncError> {
    let value = request_cached(
        queue,
        store,
        "eth_getTransactionReceipt",
        vec![json!(hash)],
        block_number,
    )
    .await?;
    decode("eth_getTransactionReceipt", value)
}

/// [`trace_filter`] over finalized blocks, through the RPC cache. Keyed by
/// the last block of the range.
pub async fn trace_filter_cached(
    queue: &RequestQueue,
    store: &dyn SyncStore,
    query: &TraceQuery,
) -> Result<Vec<CallTrace>, SyncError> {
    let value = request_cached(queue, store, "trace_filter", vec![query.to_param()], query.to_block).await?;
    decode("trace_filter", value)
}
