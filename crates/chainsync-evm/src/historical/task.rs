//! Historical sync tasks and the block callbacks they leave behind.
//!
//! A filter task fetches one chunk of one source and splits the result into
//! intervals that each end at a block. The store write of an interval needs
//! that block, so it is deferred into a [`BlockCallback`] that the driver
//! hands to a [`Task::Block`] once every source has progressed past it.

use std::collections::{BTreeMap, HashMap};

use chainsync_core::error::SyncError;
use chainsync_core::interval::Interval;
use chainsync_core::source::{
    BlockFilterCriteria, FactoryCriteria, FactoryLogFilterCriteria, FactoryTraceFilterCriteria,
    LogFilterCriteria, TraceFilterCriteria,
};
use chainsync_core::store::BlockData;
use chainsync_core::types::{Block, CallTrace, Log, TransactionReceipt};
use chainsync_rpc::methods::{self, LogsQuery, TraceQuery};

use crate::context::NetworkContext;

/// Child addresses read from the store per page.
const CHILD_ADDRESS_PAGE_SIZE: usize = 1_000;

/// Addresses sent in a single `eth_getLogs` / `trace_filter` request.
const ADDRESS_BATCH_SIZE: usize = 500;

// ─── Tasks ────────────────────────────────────────────────────────────────────

/// One unit of historical work. `source` indexes the scheduler's source list.
#[derive(Debug, Clone)]
pub(crate) enum Task {
    LogFilter {
        source: usize,
        criteria: LogFilterCriteria,
        chunk: Interval,
    },
    FactoryLogFilter {
        source: usize,
        criteria: FactoryLogFilterCriteria,
        chunk: Interval,
    },
    FactoryChildAddress {
        source: usize,
        factory: FactoryCriteria,
        chunk: Interval,
    },
    TraceFilter {
        source: usize,
        criteria: TraceFilterCriteria,
        chunk: Interval,
    },
    FactoryTraceFilter {
        source: usize,
        criteria: FactoryTraceFilterCriteria,
        chunk: Interval,
    },
    BlockFilter {
        source: usize,
        criteria: BlockFilterCriteria,
        chunk: Interval,
    },
    Block {
        number: u64,
        callbacks: Vec<BlockCallback>,
    },
}

/// What a finished task hands back to the driver.
#[derive(Debug)]
pub(crate) enum TaskOutput {
    /// Store writes to run once the interval's end block is fetched,
    /// as `(interval, data)`.
    Intervals(Vec<(Interval, CallbackData)>),
    Block { number: u64, timestamp: u64 },
}

impl Task {
    /// Higher runs first. Earlier blocks win.
    pub(crate) fn priority(&self) -> u64 {
        let start = match self {
            Task::LogFilter { chunk, .. }
            | Task::FactoryLogFilter { chunk, .. }
            | Task::FactoryChildAddress { chunk, .. }
            | Task::TraceFilter { chunk, .. }
            | Task::FactoryTraceFilter { chunk, .. }
            | Task::BlockFilter { chunk, .. } => chunk.0,
            Task::Block { number, .. } => *number,
        };
        u64::MAX - start
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Task::LogFilter { .. } => "log_filter",
            Task::FactoryLogFilter { .. } => "factory_log_filter",
            Task::FactoryChildAddress { .. } => "factory_child_address",
            Task::TraceFilter { .. } => "trace_filter",
            Task::FactoryTraceFilter { .. } => "factory_trace_filter",
            Task::BlockFilter { .. } => "block_filter",
            Task::Block { .. } => "block",
        }
    }

    pub(crate) async fn execute(&self, ctx: &NetworkContext) -> Result<TaskOutput, SyncError> {
        match self {
            Task::LogFilter { criteria, chunk, .. } => log_filter(ctx, criteria, *chunk).await,
            Task::FactoryLogFilter { criteria, chunk, .. } => {
                factory_log_filter(ctx, criteria, *chunk).await
            }
            Task::FactoryChildAddress { factory, chunk, .. } => {
                factory_child_address(ctx, factory, *chunk).await
            }
            Task::TraceFilter { criteria, chunk, .. } => trace_filter(ctx, criteria, *chunk).await,
            Task::FactoryTraceFilter { criteria, chunk, .. } => {
                factory_trace_filter(ctx, criteria, *chunk).await
            }
            Task::BlockFilter { criteria, chunk, .. } => block_filter(ctx, criteria, *chunk).await,
            Task::Block { number, callbacks } => block(ctx, *number, callbacks).await,
        }
    }
}

// ─── Block callbacks ──────────────────────────────────────────────────────────

/// Data of one interval, waiting for its end block.
#[derive(Debug, Clone)]
pub(crate) enum CallbackData {
    LogFilter {
        criteria: LogFilterCriteria,
        logs: Vec<Log>,
        receipts: Vec<TransactionReceipt>,
    },
    FactoryLogFilter {
        criteria: FactoryLogFilterCriteria,
        logs: Vec<Log>,
        receipts: Vec<TransactionReceipt>,
    },
    TraceFilter {
        criteria: TraceFilterCriteria,
        traces: Vec<CallTrace>,
        receipts: Vec<TransactionReceipt>,
    },
    FactoryTraceFilter {
        criteria: FactoryTraceFilterCriteria,
        traces: Vec<CallTrace>,
        receipts: Vec<TransactionReceipt>,
    },
    BlockFilter {
        criteria: BlockFilterCriteria,
    },
    /// Records the creation-log interval of a factory; the child addresses
    /// themselves are written by the task.
    FactoryChildAddress {
        criteria: LogFilterCriteria,
    },
}

/// A deferred store write, registered at `interval.1`.
#[derive(Debug, Clone)]
pub(crate) struct BlockCallback {
    pub source_id: String,
    pub interval: Interval,
    pub data: CallbackData,
}

impl BlockCallback {
    async fn run(&self, ctx: &NetworkContext, block: &Block) -> Result<(), SyncError> {
        let chain_id = ctx.chain_id();
        let store = &ctx.store;
        let with_block = |logs: &[Log], traces: &[CallTrace], receipts: &[TransactionReceipt]| {
            let has_data = !logs.is_empty() || !traces.is_empty();
            BlockData {
                block: has_data.then(|| block.clone()),
                receipts: receipts.to_vec(),
                logs: logs.to_vec(),
                traces: traces.to_vec(),
            }
        };

        match &self.data {
            CallbackData::LogFilter { criteria, logs, receipts } => {
                store
                    .insert_log_filter_interval(chain_id, criteria, with_block(logs, &[], receipts), self.interval)
                    .await?
            }
            CallbackData::FactoryLogFilter { criteria, logs, receipts } => {
                store
                    .insert_factory_log_filter_interval(
                        chain_id,
                        criteria,
                        with_block(logs, &[], receipts),
                        self.interval,
                    )
                    .await?
            }
            CallbackData::TraceFilter { criteria, traces, receipts } => {
                store
                    .insert_trace_filter_interval(chain_id, criteria, with_block(&[], traces, receipts), self.interval)
                    .await?
            }
            CallbackData::FactoryTraceFilter { criteria, traces, receipts } => {
                store
                    .insert_factory_trace_filter_interval(
                        chain_id,
                        criteria,
                        with_block(&[], traces, receipts),
                        self.interval,
                    )
                    .await?
            }
            CallbackData::BlockFilter { criteria } => {
                let block = criteria.matches(block.number).then(|| block.clone());
                store
                    .insert_block_filter_interval(chain_id, criteria, block, self.interval)
                    .await?
            }
            CallbackData::FactoryChildAddress { criteria } => {
                store
                    .insert_log_filter_interval(chain_id, criteria, BlockData::default(), self.interval)
                    .await?;
                return Ok(());
            }
        }

        ctx.metrics.historical_completed_blocks(
            chain_id,
            &self.source_id,
            self.interval.1 - self.interval.0 + 1,
        );
        Ok(())
    }
}

// ─── Task bodies ──────────────────────────────────────────────────────────────

async fn log_filter(
    ctx: &NetworkContext,
    criteria: &LogFilterCriteria,
    chunk: Interval,
) -> Result<TaskOutput, SyncError> {
    let query = LogsQuery::blocks(chunk.0, chunk.1)
        .address(criteria.address.clone())
        .topics(criteria.topics.clone());
    let mut logs = methods::get_logs(&ctx.queue, &query).await?;
    check_in_chunk("eth_getLogs", logs.iter().map(|l| l.block_number), chunk)?;
    logs.retain(|l| criteria.matches(l));

    let receipts = if criteria.include_transaction_receipts {
        ctx.fetch_finalized_receipts(logs.iter().map(|l| (l.transaction_hash.as_str(), l.block_number)))
            .await?
    } else {
        Vec::new()
    };

    let intervals = partition_by_block(logs, chunk, |l| (l.block_number, l.log_index))
        .into_iter()
        .map(|(interval, logs)| {
            let receipts = receipts_in_block(&receipts, interval.1);
            let data = CallbackData::LogFilter {
                criteria: criteria.clone(),
                logs,
                receipts,
            };
            (interval, data)
        })
        .collect();
    Ok(TaskOutput::Intervals(intervals))
}

async fn factory_log_filter(
    ctx: &NetworkContext,
    criteria: &FactoryLogFilterCriteria,
    chunk: Interval,
) -> Result<TaskOutput, SyncError> {
    let children = child_addresses(ctx, &criteria.factory, chunk.1).await?;
    let addresses: Vec<String> = children.keys().cloned().collect();

    let mut logs = Vec::new();
    for batch in addresses.chunks(ADDRESS_BATCH_SIZE) {
        let query = LogsQuery::blocks(chunk.0, chunk.1)
            .address(batch.to_vec())
            .topics(criteria.topics.clone());
        logs.extend(methods::get_logs(&ctx.queue, &query).await?);
    }
    check_in_chunk("eth_getLogs", logs.iter().map(|l| l.block_number), chunk)?;
    logs.retain(|l| {
        criteria.matches(l, |address, block_number| {
            children
                .get(&address.to_ascii_lowercase())
                .is_some_and(|created| *created <= block_number)
        })
    });

    let receipts = if criteria.include_transaction_receipts {
        ctx.fetch_finalized_receipts(logs.iter().map(|l| (l.transaction_hash.as_str(), l.block_number)))
            .await?
    } else {
        Vec::new()
    };

    let intervals = partition_by_block(logs, chunk, |l| (l.block_number, l.log_index))
        .into_iter()
        .map(|(interval, logs)| {
            let receipts = receipts_in_block(&receipts, interval.1);
            let data = CallbackData::FactoryLogFilter {
                criteria: criteria.clone(),
                logs,
                receipts,
            };
            (interval, data)
        })
        .collect();
    Ok(TaskOutput::Intervals(intervals))
}

async fn factory_child_address(
    ctx: &NetworkContext,
    factory: &FactoryCriteria,
    chunk: Interval,
) -> Result<TaskOutput, SyncError> {
    let criteria = factory.creation_log_criteria();
    let query = LogsQuery::blocks(chunk.0, chunk.1)
        .address(criteria.address.clone())
        .topics(criteria.topics.clone());
    let mut logs = methods::get_logs(&ctx.queue, &query).await?;
    check_in_chunk("eth_getLogs", logs.iter().map(|l| l.block_number), chunk)?;
    logs.retain(|l| factory.matches_creation_log(l));

    if !logs.is_empty() {
        tracing::debug!(
            chain_id = ctx.chain_id(),
            factory = %factory.address,
            from = chunk.0,
            to = chunk.1,
            children = logs.len(),
            "Discovered factory children"
        );
        ctx.store
            .insert_factory_child_address_logs(ctx.chain_id(), &logs)
            .await?;
    }

    Ok(TaskOutput::Intervals(vec![(
        chunk,
        CallbackData::FactoryChildAddress { criteria },
    )]))
}

async fn trace_filter(
    ctx: &NetworkContext,
    criteria: &TraceFilterCriteria,
    chunk: Interval,
) -> Result<TaskOutput, SyncError> {
    let query = TraceQuery {
        from_block: chunk.0,
        to_block: chunk.1,
        from_address: criteria.from_address.clone(),
        to_address: criteria.to_address.clone(),
    };
    let traces = methods::trace_filter_cached(&ctx.queue, ctx.store.as_ref(), &query).await?;
    check_in_chunk("trace_filter", traces.iter().map(|t| t.block_number), chunk)?;
    let traces: Vec<CallTrace> = assign_trace_indexes(traces)
        .into_iter()
        .filter(|t| criteria.matches(t))
        .collect();

    let (traces, receipts) = drop_reverted(ctx, traces).await?;
    let intervals = partition_by_block(traces, chunk, |t| (t.block_number, t.trace_index))
        .into_iter()
        .map(|(interval, traces)| {
            let receipts = receipts_in_block(&receipts, interval.1);
            let data = CallbackData::TraceFilter {
                criteria: criteria.clone(),
                traces,
                receipts,
            };
            (interval, data)
        })
        .collect();
    Ok(TaskOutput::Intervals(intervals))
}

async fn factory_trace_filter(
    ctx: &NetworkContext,
    criteria: &FactoryTraceFilterCriteria,
    chunk: Interval,
) -> Result<TaskOutput, SyncError> {
    let children = child_addresses(ctx, &criteria.factory, chunk.1).await?;
    let addresses: Vec<String> = children.keys().cloned().collect();

    let mut traces = Vec::new();
    for batch in addresses.chunks(ADDRESS_BATCH_SIZE) {
        let query = TraceQuery {
            from_block: chunk.0,
            to_block: chunk.1,
            from_address: criteria.from_address.clone(),
            to_address: batch.to_vec(),
        };
        traces.extend(methods::trace_filter_cached(&ctx.queue, ctx.store.as_ref(), &query).await?);
    }
    check_in_chunk("trace_filter", traces.iter().map(|t| t.block_number), chunk)?;
    let traces: Vec<CallTrace> = assign_trace_indexes(traces)
        .into_iter()
        .filter(|t| {
            criteria.matches(t, |address, block_number| {
                children
                    .get(&address.to_ascii_lowercase())
                    .is_some_and(|created| *created <= block_number)
            })
        })
        .collect();

    let (traces, receipts) = drop_reverted(ctx, traces).await?;
    let intervals = partition_by_block(traces, chunk, |t| (t.block_number, t.trace_index))
        .into_iter()
        .map(|(interval, traces)| {
            let receipts = receipts_in_block(&receipts, interval.1);
            let data = CallbackData::FactoryTraceFilter {
                criteria: criteria.clone(),
                traces,
                receipts,
            };
            (interval, data)
        })
        .collect();
    Ok(TaskOutput::Intervals(intervals))
}

async fn block_filter(
    ctx: &NetworkContext,
    criteria: &BlockFilterCriteria,
    chunk: Interval,
) -> Result<TaskOutput, SyncError> {
    let chain_id = ctx.chain_id();
    let mut intervals = Vec::new();
    let mut start = chunk.0;

    for number in (chunk.0..=chunk.1).filter(|n| criteria.matches(*n)) {
        let interval = (start, number);
        start = number + 1;
        if ctx.store.has_block(chain_id, number).await? {
            ctx.store
                .insert_block_filter_interval(chain_id, criteria, None, interval)
                .await?;
        } else {
            intervals.push((interval, CallbackData::BlockFilter { criteria: *criteria }));
        }
    }

    // nothing in the tail can fire, record it right away
    if start <= chunk.1 {
        ctx.store
            .insert_block_filter_interval(chain_id, criteria, None, (start, chunk.1))
            .await?;
    }
    Ok(TaskOutput::Intervals(intervals))
}

async fn block(
    ctx: &NetworkContext,
    number: u64,
    callbacks: &[BlockCallback],
) -> Result<TaskOutput, SyncError> {
    let block = methods::get_block_by_number_cached(&ctx.queue, ctx.store.as_ref(), number).await?;
    if block.number != number {
        return Err(SyncError::invalid_response(
            "eth_getBlockByNumber",
            format!("requested block {number}, got {}", block.number),
        ));
    }
    for callback in callbacks {
        callback.run(ctx, &block).await?;
    }
    Ok(TaskOutput::Block {
        number,
        timestamp: block.timestamp,
    })
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// All children of `factory` created at or before `up_to_block`, as
/// lowercase address → creation block.
async fn child_addresses(
    ctx: &NetworkContext,
    factory: &FactoryCriteria,
    up_to_block: u64,
) -> Result<BTreeMap<String, u64>, SyncError> {
    let mut out = BTreeMap::new();
    let mut after: Option<String> = None;
    loop {
        let page = ctx
            .store
            .get_factory_child_addresses(
                ctx.chain_id(),
                factory,
                up_to_block,
                CHILD_ADDRESS_PAGE_SIZE,
                after.as_deref(),
            )
            .await?;
        for child in page.addresses {
            out.insert(child.address.to_ascii_lowercase(), child.block_number);
        }
        match page.cursor {
            Some(cursor) => after = Some(cursor),
            None => return Ok(out),
        }
    }
}

fn check_in_chunk(
    method: &str,
    mut blocks: impl Iterator<Item = u64>,
    chunk: Interval,
) -> Result<(), SyncError> {
    match blocks.find(|n| *n < chunk.0 || *n > chunk.1) {
        Some(n) => Err(SyncError::invalid_response(
            method,
            format!("block {n} outside requested range [{}, {}]", chunk.0, chunk.1),
        )),
        None => Ok(()),
    }
}

/// Split `chunk` into intervals that each end at a block holding items,
/// plus a trailing empty interval up to `chunk.1` when needed.
pub(crate) fn partition_by_block<T>(
    items: Vec<T>,
    chunk: Interval,
    key: impl Fn(&T) -> (u64, u64),
) -> Vec<(Interval, Vec<T>)> {
    let mut by_block: BTreeMap<u64, Vec<T>> = BTreeMap::new();
    for item in items {
        by_block.entry(key(&item).0).or_default().push(item);
    }

    let mut out = Vec::with_capacity(by_block.len() + 1);
    let mut start = chunk.0;
    for (number, mut items) in by_block {
        items.sort_by_key(|i| key(i).1);
        out.push(((start, number), items));
        start = number + 1;
    }
    if start <= chunk.1 {
        out.push(((start, chunk.1), Vec::new()));
    }
    out
}

/// Order traces by position in their block and number them per block.
pub(crate) fn assign_trace_indexes(mut traces: Vec<CallTrace>) -> Vec<CallTrace> {
    traces.sort_by(|a, b| {
        (a.block_number, a.transaction_position, &a.trace_address).cmp(&(
            b.block_number,
            b.transaction_position,
            &b.trace_address,
        ))
    });
    let mut current_block = None;
    let mut index = 0;
    for trace in &mut traces {
        if current_block != Some(trace.block_number) {
            current_block = Some(trace.block_number);
            index = 0;
        }
        trace.trace_index = index;
        index += 1;
    }
    traces
}

/// Fetch receipts for `traces` and keep only traces of successful
/// transactions, with the receipts they reference.
async fn drop_reverted(
    ctx: &NetworkContext,
    traces: Vec<CallTrace>,
) -> Result<(Vec<CallTrace>, Vec<TransactionReceipt>), SyncError> {
    let receipts = ctx
        .fetch_finalized_receipts(
            traces
                .iter()
                .filter_map(|t| t.transaction_hash.as_deref().map(|h| (h, t.block_number))),
        )
        .await?;
    let reverted: HashMap<String, bool> = receipts
        .iter()
        .map(|r| (r.transaction_hash.to_ascii_lowercase(), r.is_reverted()))
        .collect();
    let is_reverted = |t: &CallTrace| {
        t.transaction_hash
            .as_deref()
            .and_then(|h| reverted.get(&h.to_ascii_lowercase()).copied())
            .unwrap_or(false)
    };
    let traces: Vec<CallTrace> = traces.into_iter().filter(|t| !is_reverted(t)).collect();
    let receipts = receipts.into_iter().filter(|r| !r.is_reverted()).collect();
    Ok((traces, receipts))
}

fn receipts_in_block(receipts: &[TransactionReceipt], block_number: u64) -> Vec<TransactionReceipt> {
    receipts
        .iter()
        .filter(|r| r.block_number == block_number)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chainsync_core::config::NetworkConfig;
    use chainsync_core::metrics::NoopMetrics;
    use chainsync_core::types::{parse_hex_u64, to_hex, TraceAction};
    use chainsync_rpc::mock::MockTransport;
    use chainsync_rpc::{RequestQueue, RequestQueueConfig};
    use chainsync_storage::MemorySyncStore;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    const ADDRESS: &str = "0x00000000000000000000000000000000000000aa";

    fn context(mock: Arc<MockTransport>, store: Arc<MemorySyncStore>) -> NetworkContext {
        let cancel = CancellationToken::new();
        let queue = RequestQueue::new(
            mock,
            RequestQueueConfig::new(1, 1_000),
            Arc::new(NoopMetrics),
            cancel.clone(),
        );
        NetworkContext {
            config: NetworkConfig::new("mainnet", 1, "mock://"),
            queue: Arc::new(queue),
            store,
            metrics: Arc::new(NoopMetrics),
            cancel,
        }
    }

    fn mock_node() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        mock.on("eth_getBlockByNumber", |params| {
            let number = params[0].as_str().and_then(parse_hex_u64).unwrap_or_default();
            Ok(json!({
                "hash": format!("0xb{number}"),
                "parentHash": format!("0xb{}", number.saturating_sub(1)),
                "number": to_hex(number),
                "timestamp": to_hex(number * 12),
                "logsBloom": "",
                "transactions": [],
            }))
        });
        mock.on("eth_getLogs", |_| {
            Ok(json!([{
                "address": ADDRESS,
                "topics": [],
                "data": "0x",
                "blockNumber": "0x5",
                "blockHash": "0xb5",
                "transactionHash": "0xt5",
                "transactionIndex": "0x0",
                "logIndex": "0x0",
                "removed": false,
            }]))
        });
        mock.on("eth_getTransactionReceipt", |_| {
            Ok(json!({
                "transactionHash": "0xt5",
                "transactionIndex": "0x0",
                "blockNumber": "0x5",
                "blockHash": "0xb5",
                "status": "0x1",
            }))
        });
        mock
    }

    fn trace(block_number: u64, position: u64, address: Vec<u64>) -> CallTrace {
        CallTrace {
            action: TraceAction {
                from: "0xa".into(),
                to: Some("0xb".into()),
                call_type: Some("call".into()),
                input: "0x".into(),
                value: None,
                gas: None,
            },
            result: None,
            error: None,
            block_hash: format!("0xb{block_number}"),
            block_number,
            transaction_hash: Some(format!("0xt{block_number}_{position}")),
            transaction_position: Some(position),
            trace_address: address,
            subtraces: 0,
            trace_type: "call".into(),
            trace_index: 0,
        }
    }

    #[test]
    fn partition_ends_intervals_at_matched_blocks() {
        let items = vec![(12u64, 1u64), (10, 3), (12, 0), (10, 1)];
        let parts = partition_by_block(items, (5, 20), |i| *i);
        let shape: Vec<(Interval, Vec<(u64, u64)>)> = parts;
        assert_eq!(
            shape,
            vec![
                ((5, 10), vec![(10, 1), (10, 3)]),
                ((11, 12), vec![(12, 0), (12, 1)]),
                ((13, 20), vec![]),
            ]
        );
    }

    #[test]
    fn partition_without_trailing_interval() {
        let parts = partition_by_block(vec![(20u64, 0u64)], (5, 20), |i| *i);
        assert_eq!(parts, vec![((5, 20), vec![(20, 0)])]);

        let empty = partition_by_block(Vec::<(u64, u64)>::new(), (5, 20), |i| *i);
        assert_eq!(empty, vec![((5, 20), vec![])]);
    }

    #[test]
    fn trace_indexes_restart_per_block() {
        let traces = assign_trace_indexes(vec![
            trace(2, 0, vec![]),
            trace(1, 1, vec![]),
            trace(1, 0, vec![0]),
            trace(1, 0, vec![]),
        ]);
        let order: Vec<(u64, Option<u64>, u64)> = traces
            .iter()
            .map(|t| (t.block_number, t.transaction_position, t.trace_index))
            .collect();
        assert_eq!(order, vec![(1, Some(0), 0), (1, Some(0), 1), (1, Some(1), 2), (2, Some(0), 0)]);
        assert!(traces[0].trace_address.is_empty());
    }

    #[tokio::test]
    async fn finalized_fetches_are_answered_from_rpc_cache() {
        let mock = mock_node();
        let store = Arc::new(MemorySyncStore::new());
        let criteria = LogFilterCriteria {
            address: vec![ADDRESS.into()],
            include_transaction_receipts: true,
            ..Default::default()
        };

        // a second sync against the same store refetches logs only
        for _ in 0..2 {
            let ctx = context(Arc::clone(&mock), Arc::clone(&store));
            let task = Task::LogFilter {
                source: 0,
                criteria: criteria.clone(),
                chunk: (0, 9),
            };
            let TaskOutput::Intervals(intervals) = task.execute(&ctx).await.unwrap() else {
                panic!("log filter returns intervals");
            };
            match &intervals[0].1 {
                CallbackData::LogFilter { logs, receipts, .. } => {
                    assert_eq!(logs.len(), 1);
                    assert_eq!(receipts.len(), 1);
                }
                other => panic!("unexpected callback {other:?}"),
            }

            let block = Task::Block { number: 5, callbacks: vec![] };
            assert!(matches!(
                block.execute(&ctx).await.unwrap(),
                TaskOutput::Block { number: 5, timestamp: 60 }
            ));
        }

        assert_eq!(mock.request_count("eth_getLogs"), 2);
        assert_eq!(mock.request_count("eth_getTransactionReceipt"), 1);
        assert_eq!(mock.request_count("eth_getBlockByNumber"), 1);
    }

    #[test]
    fn priority_prefers_earlier_blocks() {
        let early = Task::Block { number: 10, callbacks: vec![] };
        let late = Task::BlockFilter {
            source: 0,
            criteria: BlockFilterCriteria { interval: 1, offset: 0 },
            chunk: (11, 20),
        };
        assert!(early.priority() > late.priority());
        assert_eq!(late.name(), "block_filter");
    }
}
