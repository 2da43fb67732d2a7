//! Per-network request queue.
//!
//! Every RPC call made by the sync engine goes through a [`RequestQueue`],
//! which layers onto a raw [`RpcTransport`]:
//! - a token bucket (`max_requests_per_second` capacity and refill),
//! - a concurrency ceiling of `ceil(max_requests_per_second / 4)`,
//! - exponential backoff retry for transient errors,
//! - `eth_getLogs` range splitting driven by provider hints,
//! - cancellation, checked before every attempt and every retry sleep.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use chainsync_core::metrics::SyncMetrics;
use chainsync_core::types::{parse_hex_u64, to_hex};
use chainsync_core::Interval;

use crate::error::{RequestError, TransportError};
use crate::logs_retry::get_logs_retry_ranges;
use crate::policy::{RateLimiterConfig, RetryConfig, RetryPolicy, TokenBucket};
use crate::request::JsonRpcRequest;
use crate::transport::RpcTransport;

/// Methods whose `null` result means "not yet available", never "absent".
const NON_NULL_METHODS: &[&str] = &[
    "eth_getBlockByNumber",
    "eth_getBlockByHash",
    "eth_getTransactionReceipt",
];

/// Configuration for [`RequestQueue`].
#[derive(Debug, Clone)]
pub struct RequestQueueConfig {
    pub chain_id: u64,
    pub max_requests_per_second: u32,
    pub retry: RetryConfig,
}

impl RequestQueueConfig {
    pub fn new(chain_id: u64, max_requests_per_second: u32) -> Self {
        Self {
            chain_id,
            max_requests_per_second,
            retry: RetryConfig::default(),
        }
    }
}

/// Rate-limited, retrying JSON-RPC multiplexer for one network.
pub struct RequestQueue {
    chain_id: u64,
    transport: Arc<dyn RpcTransport>,
    limiter: TokenBucket,
    permits: Semaphore,
    concurrency: usize,
    retry: RetryPolicy,
    metrics: Arc<dyn SyncMetrics>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl RequestQueue {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        config: RequestQueueConfig,
        metrics: Arc<dyn SyncMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let rps = config.max_requests_per_second.max(1);
        let concurrency = rps.div_ceil(4) as usize;
        Self {
            chain_id: config.chain_id,
            transport,
            limiter: TokenBucket::new(RateLimiterConfig::per_second(rps)),
            permits: Semaphore::new(concurrency),
            concurrency,
            retry: RetryPolicy::new(config.retry),
            metrics,
            cancel,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Maximum number of requests in flight at once.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn url(&self) -> &str {
        self.transport.url()
    }

    pub fn metrics(&self) -> &Arc<dyn SyncMetrics> {
        &self.metrics
    }

    /// Stop accepting work. In-flight and future requests fail with
    /// [`RequestError::Killed`].
    pub fn kill(&self) {
        self.cancel.cancel();
        self.permits.close();
    }

    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Send `method(params)`, retrying transient failures. Fails only after
    /// exhausting retries; a split `eth_getLogs` result is all-or-nothing.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, RequestError> {
        self.request_boxed(method, params).await
    }

    fn request_boxed<'a>(
        &'a self,
        method: &'a str,
        params: Vec<Value>,
    ) -> BoxFuture<'a, Result<Value, RequestError>> {
        async move {
            let mut attempt = 0u32;
            loop {
                if self.is_killed() {
                    return Err(RequestError::Killed);
                }

                let result = {
                    let waiting = Instant::now();
                    let _permit = tokio::select! {
                        permit = self.permits.acquire() => permit.map_err(|_| RequestError::Killed)?,
                        _ = self.cancel.cancelled() => return Err(RequestError::Killed),
                    };
                    tokio::select! {
                        _ = self.limiter.acquire() => {}
                        _ = self.cancel.cancelled() => return Err(RequestError::Killed),
                    }
                    let queue_wait = waiting.elapsed();

                    let started = Instant::now();
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let result = self.send_once(JsonRpcRequest::new(id, method, params.clone())).await;
                    self.metrics.rpc_request(
                        self.chain_id,
                        method,
                        queue_wait,
                        started.elapsed(),
                        result.is_ok(),
                    );
                    result
                    // permit released here, before any split or retry sleep
                };

                let err = match result {
                    Ok(value) => return Ok(value),
                    Err(err) => err,
                };
                if self.is_killed() {
                    return Err(RequestError::Killed);
                }
                attempt += 1;

                if method == "eth_getLogs" {
                    if let Some(ranges) = split_ranges(&params, &err) {
                        tracing::debug!(
                            chain_id = self.chain_id,
                            ranges = ranges.len(),
                            error = %err,
                            "splitting eth_getLogs range"
                        );
                        return self.request_split(method, &params, ranges).await;
                    }
                }

                if !err.is_retryable() {
                    tracing::warn!(
                        chain_id = self.chain_id,
                        method,
                        error = %err,
                        "request failed with non-retryable error"
                    );
                    return Err(RequestError::Transport {
                        method: method.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }

                match self.retry.next_delay(attempt) {
                    Some(delay) => {
                        tracing::debug!(
                            chain_id = self.chain_id,
                            method,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying request"
                        );
                        if self.is_killed() {
                            return Err(RequestError::Killed);
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.cancel.cancelled() => return Err(RequestError::Killed),
                        }
                    }
                    None => {
                        tracing::warn!(
                            chain_id = self.chain_id,
                            method,
                            attempts = attempt,
                            error = %err,
                            url = %self.transport.url(),
                            "max retries exceeded"
                        );
                        return Err(RequestError::Transport {
                            method: method.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                }
            }
        }
        .boxed()
    }

    /// Issue the sub-ranges in order and concatenate their logs.
    async fn request_split(
        &self,
        method: &str,
        params: &[Value],
        ranges: Vec<Interval>,
    ) -> Result<Value, RequestError> {
        let mut logs = Vec::new();
        for (from, to) in ranges {
            match self.request_boxed(method, with_range(params, from, to)).await? {
                Value::Array(items) => logs.extend(items),
                other => {
                    return Err(RequestError::Transport {
                        method: method.to_string(),
                        attempts: 1,
                        source: TransportError::Other(format!(
                            "expected an array of logs, got {other}"
                        )),
                    })
                }
            }
        }
        Ok(Value::Array(logs))
    }

    async fn send_once(&self, req: JsonRpcRequest) -> Result<Value, TransportError> {
        let method = req.method.clone();
        let value = self.transport.call(req).await?;
        if value.is_null() && NON_NULL_METHODS.contains(&method.as_str()) {
            return Err(TransportError::NotFound { method });
        }
        Ok(value)
    }
}

/// Sub-ranges for a rejected `eth_getLogs` call, if it was a range query
/// and the error is a range complaint.
fn split_ranges(params: &[Value], err: &TransportError) -> Option<Vec<Interval>> {
    if err.is_rate_limited() {
        return None;
    }
    let filter = params.first()?;
    let from = parse_hex_u64(filter.get("fromBlock")?.as_str()?)?;
    let to = parse_hex_u64(filter.get("toBlock")?.as_str()?)?;
    get_logs_retry_ranges(&err.message(), from, to)
}

fn with_range(params: &[Value], from: u64, to: u64) -> Vec<Value> {
    let mut params = params.to_vec();
    if let Some(Value::Object(filter)) = params.first_mut() {
        filter.insert("fromBlock".into(), Value::String(to_hex(from)));
        filter.insert("toBlock".into(), Value::String(to_hex(to)));
    }
    params
}
