//! In-memory sync store.
//!
//! Keeps chain data, fragment intervals, factory logs and the RPC cache in
//! RAM, per chain. Events are derived on read by matching stored logs,
//! traces and blocks against the requested sources.
//! All data is lost when the process exits.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chainsync_core::checkpoint::{event_type, Checkpoint};
use chainsync_core::error::SyncError;
use chainsync_core::fragment::{self, Fragment};
use chainsync_core::interval::{self, Interval};
use chainsync_core::source::{
    BlockFilterCriteria, FactoryCriteria, FactoryLogFilterCriteria, FactoryTraceFilterCriteria,
    LogFilterCriteria, Source, SourceFilter, TraceFilterCriteria,
};
use chainsync_core::store::{
    BlockData, ChildAddress, ChildAddressPage, EventKind, EventsPage, RawEvent, SyncStore,
};
use chainsync_core::types::{Block, CallTrace, Log, TransactionReceipt};

#[derive(Default)]
struct ChainData {
    /// fragment id → normalised intervals
    intervals: HashMap<String, Vec<Interval>>,
    blocks: BTreeMap<u64, Block>,
    /// (block number, log index)
    logs: BTreeMap<(u64, u64), Log>,
    /// (block number, trace index)
    traces: BTreeMap<(u64, u64), CallTrace>,
    /// transaction hash (lowercase) → receipt
    receipts: HashMap<String, TransactionReceipt>,
    /// (block number, log index)
    factory_logs: BTreeMap<(u64, u64), Log>,
    /// (block number, request key) → result
    rpc_cache: HashMap<(u64, String), String>,
}

impl ChainData {
    fn insert_intervals(&mut self, fragments: &[Fragment], interval: Interval) {
        for f in fragments {
            let list = self.intervals.entry(f.id()).or_default();
            list.push(interval);
            *list = interval::union(list);
        }
    }

    fn intervals(&self, fragments: &[Fragment]) -> Vec<Interval> {
        let lists: Vec<Vec<Interval>> = fragments
            .iter()
            .map(|f| self.intervals.get(&f.id()).cloned().unwrap_or_default())
            .collect();
        interval::intersection_many(&lists)
    }

    fn insert_data(&mut self, data: BlockData) {
        if let Some(block) = data.block {
            self.blocks.insert(block.number, block);
        }
        for log in data.logs {
            self.logs.insert((log.block_number, log.log_index), log);
        }
        for trace in data.traces {
            self.traces.insert((trace.block_number, trace.trace_index), trace);
        }
        for receipt in data.receipts {
            self.receipts
                .insert(receipt.transaction_hash.to_ascii_lowercase(), receipt);
        }
    }

    fn child_addresses(&self, factory: &FactoryCriteria, up_to_block: u64) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        for log in self.factory_logs.range(..=(up_to_block, u64::MAX)).map(|(_, l)| l) {
            if !factory.matches_creation_log(log) {
                continue;
            }
            if let Some(address) = factory.child_address(log) {
                out.entry(address).or_insert(log.block_number);
            }
        }
        out
    }

    fn is_child(&self, factory: &FactoryCriteria, address: &str, block_number: u64) -> bool {
        let address = address.to_ascii_lowercase();
        self.factory_logs
            .range(..=(block_number, u64::MAX))
            .any(|(_, log)| {
                factory.matches_creation_log(log)
                    && factory.child_address(log).as_deref() == Some(address.as_str())
            })
    }

    fn receipt(&self, hash: &str) -> Option<&TransactionReceipt> {
        self.receipts.get(&hash.to_ascii_lowercase())
    }
}

/// In-memory [`SyncStore`].
#[derive(Default)]
pub struct MemorySyncStore {
    chains: Mutex<HashMap<u64, ChainData>>,
}

impl MemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_chain<T>(&self, chain_id: u64, f: impl FnOnce(&mut ChainData) -> T) -> T {
        let mut chains = self.chains.lock().unwrap();
        f(chains.entry(chain_id).or_default())
    }

    /// Block numbers stored for `chain_id`, ascending.
    pub fn block_numbers(&self, chain_id: u64) -> Vec<u64> {
        self.with_chain(chain_id, |c| c.blocks.keys().copied().collect())
    }

    /// Number of stored logs (including factory creation logs) for `chain_id`.
    pub fn log_count(&self, chain_id: u64) -> usize {
        self.with_chain(chain_id, |c| c.logs.len() + c.factory_logs.len())
    }

    pub fn trace_count(&self, chain_id: u64) -> usize {
        self.with_chain(chain_id, |c| c.traces.len())
    }

    /// Every event of `sources` in `(from, to]`, sorted by checkpoint.
    fn collect_events(
        &self,
        sources: &[Source],
        from: &Checkpoint,
        to: &Checkpoint,
    ) -> Result<Vec<(Checkpoint, RawEvent)>, SyncError> {
        let chains = self.chains.lock().unwrap();
        let mut events = Vec::new();
        for source in sources {
            let Some(chain) = chains.get(&source.chain_id) else {
                continue;
            };
            collect_source_events(chain, source, from, to, &mut events)?;
        }
        events.sort_by(|(a, ea), (b, eb)| a.cmp(b).then_with(|| ea.source_id.cmp(&eb.source_id)));
        Ok(events)
    }
}

fn block_header(block: &Block) -> Value {
    let mut value = serde_json::to_value(block).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.remove("transactions");
    }
    value
}

fn push_event(
    out: &mut Vec<(Checkpoint, RawEvent)>,
    kind: EventKind,
    source: &Source,
    checkpoint: Checkpoint,
    payload: Value,
) -> Result<(), SyncError> {
    out.push((
        checkpoint,
        RawEvent {
            kind,
            chain_id: source.chain_id,
            source_id: source.id.clone(),
            checkpoint: checkpoint.encode()?,
            payload,
        },
    ));
    Ok(())
}

fn collect_source_events(
    chain: &ChainData,
    source: &Source,
    from: &Checkpoint,
    to: &Checkpoint,
    out: &mut Vec<(Checkpoint, RawEvent)>,
) -> Result<(), SyncError> {
    let in_range = |c: &Checkpoint| c > from && c <= to;

    match &source.filter {
        SourceFilter::Log(_) | SourceFilter::FactoryLog(_) => {
            let include_receipts = match &source.filter {
                SourceFilter::Log(c) => c.include_transaction_receipts,
                SourceFilter::FactoryLog(c) => c.include_transaction_receipts,
                _ => false,
            };
            for log in chain.logs.values() {
                if !source.contains_block(log.block_number) {
                    continue;
                }
                let matched = match &source.filter {
                    SourceFilter::Log(c) => c.matches(log),
                    SourceFilter::FactoryLog(c) => {
                        c.matches(log, |addr, n| chain.is_child(&c.factory, addr, n))
                    }
                    _ => false,
                };
                if !matched {
                    continue;
                }
                let Some(block) = chain.blocks.get(&log.block_number) else {
                    continue;
                };
                let checkpoint = Checkpoint {
                    block_timestamp: block.timestamp,
                    chain_id: source.chain_id,
                    block_number: log.block_number,
                    transaction_index: log.transaction_index,
                    event_type: event_type::LOG,
                    event_index: log.log_index,
                };
                if !in_range(&checkpoint) {
                    continue;
                }
                let mut payload = json!({
                    "log": log,
                    "block": block_header(block),
                    "transaction": block.transaction(&log.transaction_hash),
                });
                if include_receipts {
                    payload["transactionReceipt"] = json!(chain.receipt(&log.transaction_hash));
                }
                push_event(out, EventKind::Log, source, checkpoint, payload)?;
            }
        }
        SourceFilter::CallTrace(_) | SourceFilter::FactoryCallTrace(_) => {
            for trace in chain.traces.values() {
                if !source.contains_block(trace.block_number) {
                    continue;
                }
                let matched = match &source.filter {
                    SourceFilter::CallTrace(c) => c.matches(trace),
                    SourceFilter::FactoryCallTrace(c) => {
                        c.matches(trace, |addr, n| chain.is_child(&c.factory, addr, n))
                    }
                    _ => false,
                };
                if !matched {
                    continue;
                }
                let Some(block) = chain.blocks.get(&trace.block_number) else {
                    continue;
                };
                let checkpoint = Checkpoint {
                    block_timestamp: block.timestamp,
                    chain_id: source.chain_id,
                    block_number: trace.block_number,
                    transaction_index: trace.transaction_position.unwrap_or_default(),
                    event_type: event_type::CALL_TRACE,
                    event_index: trace.trace_index,
                };
                if !in_range(&checkpoint) {
                    continue;
                }
                let tx_hash = trace.transaction_hash.as_deref().unwrap_or_default();
                let payload = json!({
                    "trace": trace,
                    "block": block_header(block),
                    "transaction": block.transaction(tx_hash),
                    "transactionReceipt": chain.receipt(tx_hash),
                });
                push_event(out, EventKind::CallTrace, source, checkpoint, payload)?;
            }
        }
        SourceFilter::Block(c) => {
            for block in chain.blocks.values() {
                if !source.contains_block(block.number) || !c.matches(block.number) {
                    continue;
                }
                let checkpoint = Checkpoint::for_block(block.timestamp, source.chain_id, block.number);
                if !in_range(&checkpoint) {
                    continue;
                }
                let payload = json!({ "block": block_header(block) });
                push_event(out, EventKind::Block, source, checkpoint, payload)?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl SyncStore for MemorySyncStore {
    async fn insert_log_filter_interval(
        &self,
        chain_id: u64,
        criteria: &LogFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError> {
        let fragments = fragment::log_filter_fragments(chain_id, criteria);
        self.with_chain(chain_id, |c| {
            c.insert_data(data);
            c.insert_intervals(&fragments, interval);
        });
        Ok(())
    }

    async fn get_log_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &LogFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError> {
        let fragments = fragment::log_filter_fragments(chain_id, criteria);
        Ok(self.with_chain(chain_id, |c| c.intervals(&fragments)))
    }

    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: u64,
        criteria: &FactoryLogFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError> {
        let fragments = fragment::factory_log_filter_fragments(chain_id, criteria);
        self.with_chain(chain_id, |c| {
            c.insert_data(data);
            c.insert_intervals(&fragments, interval);
        });
        Ok(())
    }

    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &FactoryLogFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError> {
        let fragments = fragment::factory_log_filter_fragments(chain_id, criteria);
        Ok(self.with_chain(chain_id, |c| c.intervals(&fragments)))
    }

    async fn insert_block_filter_interval(
        &self,
        chain_id: u64,
        criteria: &BlockFilterCriteria,
        block: Option<Block>,
        interval: Interval,
    ) -> Result<(), SyncError> {
        let fragments = fragment::block_filter_fragments(chain_id, criteria);
        self.with_chain(chain_id, |c| {
            c.insert_data(BlockData {
                block,
                ..Default::default()
            });
            c.insert_intervals(&fragments, interval);
        });
        Ok(())
    }

    async fn get_block_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &BlockFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError> {
        let fragments = fragment::block_filter_fragments(chain_id, criteria);
        Ok(self.with_chain(chain_id, |c| c.intervals(&fragments)))
    }

    async fn insert_trace_filter_interval(
        &self,
        chain_id: u64,
        criteria: &TraceFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError> {
        let fragments = fragment::trace_filter_fragments(chain_id, criteria);
        self.with_chain(chain_id, |c| {
            c.insert_data(data);
            c.insert_intervals(&fragments, interval);
        });
        Ok(())
    }

    async fn get_trace_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &TraceFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError> {
        let fragments = fragment::trace_filter_fragments(chain_id, criteria);
        Ok(self.with_chain(chain_id, |c| c.intervals(&fragments)))
    }

    async fn insert_factory_trace_filter_interval(
        &self,
        chain_id: u64,
        criteria: &FactoryTraceFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError> {
        let fragments = fragment::factory_trace_filter_fragments(chain_id, criteria);
        self.with_chain(chain_id, |c| {
            c.insert_data(data);
            c.insert_intervals(&fragments, interval);
        });
        Ok(())
    }

    async fn get_factory_trace_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &FactoryTraceFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError> {
        let fragments = fragment::factory_trace_filter_fragments(chain_id, criteria);
        Ok(self.with_chain(chain_id, |c| c.intervals(&fragments)))
    }

    async fn insert_factory_child_address_logs(
        &self,
        chain_id: u64,
        logs: &[Log],
    ) -> Result<(), SyncError> {
        self.with_chain(chain_id, |c| {
            for log in logs {
                c.factory_logs
                    .insert((log.block_number, log.log_index), log.clone());
            }
        });
        Ok(())
    }

    async fn get_factory_child_addresses(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
        up_to_block: u64,
        limit: usize,
        after: Option<&str>,
    ) -> Result<ChildAddressPage, SyncError> {
        let all = self.with_chain(chain_id, |c| c.child_addresses(factory, up_to_block));
        let mut remaining = all
            .into_iter()
            .filter(|(address, _)| after.map_or(true, |a| address.as_str() > a))
            .map(|(address, block_number)| ChildAddress {
                address,
                block_number,
            })
            .peekable();

        let addresses: Vec<ChildAddress> = remaining.by_ref().take(limit.max(1)).collect();
        let cursor = match remaining.peek() {
            Some(_) => addresses.last().map(|c| c.address.clone()),
            None => None,
        };
        Ok(ChildAddressPage { addresses, cursor })
    }

    async fn has_block(&self, chain_id: u64, block_number: u64) -> Result<bool, SyncError> {
        Ok(self.with_chain(chain_id, |c| c.blocks.contains_key(&block_number)))
    }

    async fn insert_realtime_block(&self, chain_id: u64, data: BlockData) -> Result<(), SyncError> {
        self.with_chain(chain_id, |c| c.insert_data(data));
        Ok(())
    }

    async fn insert_realtime_interval(
        &self,
        chain_id: u64,
        sources: &[Source],
        interval: Interval,
    ) -> Result<(), SyncError> {
        let mut fragments = Vec::new();
        for source in sources.iter().filter(|s| s.chain_id == chain_id) {
            match &source.filter {
                SourceFilter::Log(c) => fragments.extend(fragment::log_filter_fragments(chain_id, c)),
                SourceFilter::FactoryLog(c) => {
                    fragments.extend(fragment::factory_log_filter_fragments(chain_id, c));
                    fragments.extend(fragment::log_filter_fragments(
                        chain_id,
                        &c.factory.creation_log_criteria(),
                    ));
                }
                SourceFilter::CallTrace(c) => {
                    fragments.extend(fragment::trace_filter_fragments(chain_id, c))
                }
                SourceFilter::FactoryCallTrace(c) => {
                    fragments.extend(fragment::factory_trace_filter_fragments(chain_id, c));
                    fragments.extend(fragment::log_filter_fragments(
                        chain_id,
                        &c.factory.creation_log_criteria(),
                    ));
                }
                SourceFilter::Block(c) => {
                    fragments.extend(fragment::block_filter_fragments(chain_id, c))
                }
            }
        }
        fragments.sort();
        fragments.dedup();
        self.with_chain(chain_id, |c| c.insert_intervals(&fragments, interval));
        Ok(())
    }

    async fn delete_realtime_data(&self, chain_id: u64, from_block: u64) -> Result<(), SyncError> {
        let Some(first_deleted) = from_block.checked_add(1) else {
            return Ok(());
        };
        self.with_chain(chain_id, |c| {
            c.blocks.retain(|n, _| *n <= from_block);
            c.logs.retain(|(n, _), _| *n <= from_block);
            c.traces.retain(|(n, _), _| *n <= from_block);
            c.factory_logs.retain(|(n, _), _| *n <= from_block);
            c.receipts.retain(|_, r| r.block_number <= from_block);
            c.rpc_cache.retain(|(n, _), _| *n <= from_block);
            for list in c.intervals.values_mut() {
                *list = interval::difference(list, &[(first_deleted, u64::MAX)]);
            }
        });
        tracing::debug!(chain_id, from_block, "deleted realtime data above block");
        Ok(())
    }

    async fn get_rpc_request_result(
        &self,
        chain_id: u64,
        block_number: u64,
        request: &str,
    ) -> Result<Option<String>, SyncError> {
        Ok(self.with_chain(chain_id, |c| {
            c.rpc_cache.get(&(block_number, request.to_string())).cloned()
        }))
    }

    async fn insert_rpc_request_result(
        &self,
        chain_id: u64,
        block_number: u64,
        request: &str,
        result: &str,
    ) -> Result<(), SyncError> {
        self.with_chain(chain_id, |c| {
            c.rpc_cache
                .insert((block_number, request.to_string()), result.to_string());
        });
        Ok(())
    }

    async fn get_events(
        &self,
        sources: &[Source],
        from: &Checkpoint,
        to: &Checkpoint,
        limit: usize,
    ) -> Result<EventsPage, SyncError> {
        let mut events = self.collect_events(sources, from, to)?;
        // The cursor is exclusive, so a page never ends inside a run of
        // events sharing one checkpoint.
        let mut end = limit.max(1).min(events.len());
        while end < events.len() && events[end].0 == events[end - 1].0 {
            end += 1;
        }
        let has_next_page = events.len() > end;
        events.truncate(end);
        let cursor = if has_next_page {
            events.last().map(|(c, _)| *c)
        } else {
            None
        };
        Ok(EventsPage {
            events: events.into_iter().map(|(_, e)| e).collect(),
            cursor,
            has_next_page,
        })
    }

    async fn get_last_event_checkpoint(
        &self,
        sources: &[Source],
        from: &Checkpoint,
        to: &Checkpoint,
    ) -> Result<Option<Checkpoint>, SyncError> {
        Ok(self
            .collect_events(sources, from, to)?
            .last()
            .map(|(c, _)| *c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsync_core::source::ChildAddressLocation;
    use chainsync_core::types::Transaction;

    fn block(number: u64, timestamp: u64) -> Block {
        Block {
            hash: format!("0xb{number}"),
            parent_hash: format!("0xb{}", number.saturating_sub(1)),
            number,
            timestamp,
            logs_bloom: String::new(),
            miner: None,
            transactions: vec![Transaction {
                hash: format!("0xt{number}"),
                from: "0xsender".into(),
                to: Some("0xa".into()),
                input: "0x".into(),
                value: None,
                transaction_index: 0,
                block_number: number,
            }],
        }
    }

    fn log(address: &str, number: u64, index: u64) -> Log {
        Log {
            address: address.into(),
            topics: vec!["0xtopic".into()],
            data: "0x".into(),
            block_number: number,
            block_hash: format!("0xb{number}"),
            transaction_hash: format!("0xt{number}"),
            transaction_index: 0,
            log_index: index,
            removed: false,
        }
    }

    fn source(id: &str, chain_id: u64, filter: SourceFilter) -> Source {
        Source {
            id: id.into(),
            network_name: format!("net{chain_id}"),
            chain_id,
            start_block: 0,
            end_block: None,
            filter,
        }
    }

    fn address_criteria(address: &[&str]) -> LogFilterCriteria {
        LogFilterCriteria {
            address: address.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn intervals_are_shared_through_fragments() {
        let store = MemorySyncStore::new();
        let ab = address_criteria(&["0xa", "0xb"]);
        let b = address_criteria(&["0xb"]);

        store
            .insert_log_filter_interval(1, &ab, BlockData::default(), (0, 100))
            .await
            .unwrap();
        store
            .insert_log_filter_interval(1, &b, BlockData::default(), (101, 200))
            .await
            .unwrap();

        assert_eq!(store.get_log_filter_intervals(1, &b).await.unwrap(), vec![(0, 200)]);
        assert_eq!(store.get_log_filter_intervals(1, &ab).await.unwrap(), vec![(0, 100)]);
        assert!(store.get_log_filter_intervals(2, &b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn events_are_checkpoint_ordered_across_chains() {
        let store = MemorySyncStore::new();
        let criteria = address_criteria(&["0xa"]);
        for (chain, number, ts) in [(1, 10, 100), (1, 11, 112), (10, 50, 105)] {
            store
                .insert_log_filter_interval(
                    chain,
                    &criteria,
                    BlockData {
                        block: Some(block(number, ts)),
                        logs: vec![log("0xa", number, 0), log("0xother", number, 1)],
                        ..Default::default()
                    },
                    (number, number),
                )
                .await
                .unwrap();
        }
        let sources = vec![
            source("a1", 1, SourceFilter::Log(criteria.clone())),
            source("a10", 10, SourceFilter::Log(criteria.clone())),
        ];

        let page = store
            .get_events(&sources, &Checkpoint::ZERO, &Checkpoint::MAX, 10)
            .await
            .unwrap();
        let order: Vec<(u64, &str)> = page
            .events
            .iter()
            .map(|e| (e.chain_id, e.source_id.as_str()))
            .collect();
        assert_eq!(order, vec![(1, "a1"), (10, "a10"), (1, "a1")]);
        assert!(!page.has_next_page);
        assert_eq!(page.events[0].payload["transaction"]["hash"], "0xt10");
        assert!(page.events[0].payload["block"].get("transactions").is_none());

        let first = store
            .get_events(&sources, &Checkpoint::ZERO, &Checkpoint::MAX, 2)
            .await
            .unwrap();
        assert!(first.has_next_page);
        let cursor = first.cursor.unwrap();
        let rest = store
            .get_events(&sources, &cursor, &Checkpoint::MAX, 2)
            .await
            .unwrap();
        assert_eq!(rest.events.len(), 1);
        assert_eq!(rest.events[0].payload["block"]["number"], "0xb");

        let last = store
            .get_last_event_checkpoint(&sources, &Checkpoint::ZERO, &Checkpoint::MAX)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(last.block_number, 11);
    }

    #[tokio::test]
    async fn pages_never_split_a_shared_checkpoint() {
        let store = MemorySyncStore::new();
        let criteria = address_criteria(&["0xa"]);
        for number in [10, 11] {
            store
                .insert_log_filter_interval(
                    1,
                    &criteria,
                    BlockData {
                        block: Some(block(number, number * 12)),
                        logs: vec![log("0xa", number, 0)],
                        ..Default::default()
                    },
                    (number, number),
                )
                .await
                .unwrap();
        }
        // two sources matching the same log share every checkpoint
        let sources = vec![
            source("first", 1, SourceFilter::Log(criteria.clone())),
            source("second", 1, SourceFilter::Log(criteria.clone())),
        ];

        let mut seen = Vec::new();
        let mut from = Checkpoint::ZERO;
        loop {
            let page = store
                .get_events(&sources, &from, &Checkpoint::MAX, 1)
                .await
                .unwrap();
            seen.extend(page.events.iter().map(|e| e.source_id.clone()));
            if !page.has_next_page {
                break;
            }
            assert_eq!(page.events.len(), 2, "a page extends to the end of a tie");
            from = page.cursor.unwrap();
        }
        assert_eq!(seen, vec!["first", "second", "first", "second"]);
    }

    #[tokio::test]
    async fn block_source_events_follow_interval() {
        let store = MemorySyncStore::new();
        let criteria = BlockFilterCriteria { interval: 2, offset: 0 };
        for n in 1..=4 {
            store
                .insert_block_filter_interval(1, &criteria, Some(block(n, n * 10)), (n, n))
                .await
                .unwrap();
        }
        let sources = vec![source("blocks", 1, SourceFilter::Block(criteria))];
        let page = store
            .get_events(&sources, &Checkpoint::ZERO, &Checkpoint::MAX, 100)
            .await
            .unwrap();
        let numbers: Vec<u64> = page
            .events
            .iter()
            .map(|e| Checkpoint::decode(&e.checkpoint).unwrap().block_number)
            .collect();
        assert_eq!(numbers, vec![2, 4]);
        assert!(page.events.iter().all(|e| e.kind == EventKind::Block));
    }

    #[tokio::test]
    async fn delete_realtime_data_removes_blocks_above() {
        let store = MemorySyncStore::new();
        let criteria = address_criteria(&["0xa"]);
        for n in 100..=105 {
            store
                .insert_realtime_block(
                    1,
                    BlockData {
                        block: Some(block(n, n)),
                        logs: vec![log("0xa", n, 0)],
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            store
                .insert_rpc_request_result(1, n, "eth_call[]", "\"0x\"")
                .await
                .unwrap();
        }
        let sources = vec![source("a", 1, SourceFilter::Log(criteria.clone()))];
        store
            .insert_realtime_interval(1, &sources, (100, 105))
            .await
            .unwrap();

        store.delete_realtime_data(1, 102).await.unwrap();

        assert_eq!(store.block_numbers(1), vec![100, 101, 102]);
        assert_eq!(store.log_count(1), 3);
        assert!(store.has_block(1, 102).await.unwrap());
        assert!(!store.has_block(1, 103).await.unwrap());
        assert_eq!(
            store.get_log_filter_intervals(1, &criteria).await.unwrap(),
            vec![(100, 102)]
        );
        assert!(store
            .get_rpc_request_result(1, 103, "eth_call[]")
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store.get_rpc_request_result(1, 102, "eth_call[]").await.unwrap().as_deref(),
            Some("\"0x\"")
        );
    }

    #[tokio::test]
    async fn factory_children_paginate_and_match_logs() {
        let store = MemorySyncStore::new();
        let factory = FactoryCriteria {
            address: "0xf".into(),
            event_selector: "0xcreated".into(),
            child_address_location: ChildAddressLocation::Topic(1),
        };
        let child = |i: u64| format!("0x{:040x}", i);
        let creation = |i: u64, n: u64| Log {
            address: "0xf".into(),
            topics: vec!["0xcreated".into(), format!("0x{:064x}", i)],
            ..log("0xf", n, i)
        };
        store
            .insert_factory_child_address_logs(1, &[creation(1, 10), creation(2, 11), creation(3, 20)])
            .await
            .unwrap();

        let page = store
            .get_factory_child_addresses(1, &factory, 15, 1, None)
            .await
            .unwrap();
        assert_eq!(page.addresses.len(), 1);
        assert_eq!(page.addresses[0].address, child(1));
        assert_eq!(page.addresses[0].block_number, 10);
        let cursor = page.cursor.unwrap();
        let page = store
            .get_factory_child_addresses(1, &factory, 15, 10, Some(&cursor))
            .await
            .unwrap();
        assert_eq!(page.addresses.len(), 1);
        assert_eq!(page.addresses[0].address, child(2));
        assert!(page.cursor.is_none());

        // a child log only counts once the child exists
        let criteria = FactoryLogFilterCriteria {
            factory: factory.clone(),
            topics: vec![],
            include_transaction_receipts: false,
        };
        for n in [15, 25] {
            store
                .insert_factory_log_filter_interval(
                    1,
                    &criteria,
                    BlockData {
                        block: Some(block(n, n)),
                        logs: vec![log(&child(3), n, 0)],
                        ..Default::default()
                    },
                    (n, n),
                )
                .await
                .unwrap();
        }
        let sources = vec![source("children", 1, SourceFilter::FactoryLog(criteria))];
        let page = store
            .get_events(&sources, &Checkpoint::ZERO, &Checkpoint::MAX, 10)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].payload["log"]["blockNumber"], "0x19");
    }
}
