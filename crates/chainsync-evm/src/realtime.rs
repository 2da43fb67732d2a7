//! Realtime sync: follow the chain head of one network, one head
//! transition at a time.
//!
//! For every new head the reconciler decides between four outcomes:
//! 1. **Known head**: a block already in the local chain, nothing to do.
//! 2. **Reorg**: the head does not extend the local chain. Walk back from
//!    the remote head to a common ancestor, delete everything above it and
//!    report a safe checkpoint.
//! 3. **Gap**: the head is more than one block ahead. Fetch the missing
//!    blocks (at most [`MAX_QUEUED_BLOCKS`]) and reconcile them in order.
//! 4. **Child**: the head extends the local chain. Fetch matching logs and
//!    traces, persist them and report a checkpoint.
//!
//! After each accepted block the finalized block may be promoted by
//! `finality_block_count`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use chainsync_core::bloom::{is_filter_in_bloom, Bloom};
use chainsync_core::checkpoint::Checkpoint;
use chainsync_core::error::SyncError;
use chainsync_core::source::{FactoryCriteria, Source, SourceFilter, Sources};
use chainsync_core::store::BlockData;
use chainsync_core::types::{Block, CallTrace, LightBlock, Log};
use chainsync_rpc::methods::{self, BlockTag, LogsQuery};

use crate::context::{EventSender, NetworkContext, NetworkEvent};

/// Most missing blocks fetched for a single head transition.
pub const MAX_QUEUED_BLOCKS: u64 = 25;

/// Delay before the next poll after the n-th consecutive failure. Running
/// out of entries is fatal.
const BACKOFF_SECS: [u64; 14] = [1, 2, 5, 10, 30, 60, 60, 60, 60, 60, 60, 60, 60, 60];

// ─── LocalChain ───────────────────────────────────────────────────────────────

/// Unfinalized blocks accepted so far, oldest first.
///
/// Every block extends the one before it; the first extends the finalized
/// block held by the reconciler.
#[derive(Debug, Default, Clone)]
pub struct LocalChain {
    blocks: VecDeque<LightBlock>,
}

impl LocalChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `block`. Returns `false` (and leaves the chain untouched) if it
    /// does not extend the current head.
    pub fn push(&mut self, block: LightBlock) -> bool {
        if let Some(head) = self.blocks.back() {
            if !block.extends(head) {
                return false;
            }
        }
        self.blocks.push_back(block);
        true
    }

    pub fn head(&self) -> Option<&LightBlock> {
        self.blocks.back()
    }

    pub fn get(&self, number: u64) -> Option<&LightBlock> {
        self.blocks.iter().find(|b| b.number == number)
    }

    pub fn contains_hash(&self, hash: &str) -> bool {
        self.blocks.iter().any(|b| b.hash == hash)
    }

    pub fn pop(&mut self) -> Option<LightBlock> {
        self.blocks.pop_back()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Discard every block above `block_number`.
    pub fn rewind_to(&mut self, block_number: u64) {
        while self.blocks.back().is_some_and(|b| b.number > block_number) {
            self.blocks.pop_back();
        }
    }

    /// Discard every block at or below `block_number`.
    pub fn prune_to(&mut self, block_number: u64) {
        while self.blocks.front().is_some_and(|b| b.number <= block_number) {
            self.blocks.pop_front();
        }
    }

    pub fn numbers(&self) -> Vec<u64> {
        self.blocks.iter().map(|b| b.number).collect()
    }
}

// ─── RealtimeSync ─────────────────────────────────────────────────────────────

/// Head follower and reorg reconciler of one network.
pub struct RealtimeSync {
    ctx: Arc<NetworkContext>,
    sources: Vec<Source>,
    partitioned: Sources,
    factories: Vec<FactoryCriteria>,
    finalized: LightBlock,
    local: LocalChain,
    /// Blocks fetched for the current head transition, in order.
    pending: VecDeque<Block>,
    /// factory → lowercase child address → creation block
    children: HashMap<FactoryCriteria, BTreeMap<String, u64>>,
    consecutive_failures: usize,
}

impl RealtimeSync {
    pub fn new(ctx: Arc<NetworkContext>, sources: Vec<Source>, finalized: LightBlock) -> Self {
        let partitioned = Sources::partition(&sources);
        let factories = partitioned.factories();
        Self {
            ctx,
            sources,
            partitioned,
            factories,
            finalized,
            local: LocalChain::new(),
            pending: VecDeque::new(),
            children: HashMap::new(),
            consecutive_failures: 0,
        }
    }

    pub fn finalized(&self) -> &LightBlock {
        &self.finalized
    }

    pub fn local_chain(&self) -> &LocalChain {
        &self.local
    }

    /// `true` when every source ended at or before the finalized block.
    pub fn is_terminal(&self) -> bool {
        !self.sources.is_empty()
            && self
                .sources
                .iter()
                .all(|s| s.end_block.is_some_and(|end| end < self.finalized.number))
    }

    /// Load factory children discovered by historical sync.
    pub async fn load_children(&mut self) -> Result<(), SyncError> {
        let chain_id = self.ctx.chain_id();
        for factory in &self.factories {
            let known = self.children.entry(factory.clone()).or_default();
            let mut after: Option<String> = None;
            loop {
                let page = self
                    .ctx
                    .store
                    .get_factory_child_addresses(chain_id, factory, self.finalized.number, 1_000, after.as_deref())
                    .await?;
                for child in page.addresses {
                    known.insert(child.address.to_ascii_lowercase(), child.block_number);
                }
                match page.cursor {
                    Some(cursor) => after = Some(cursor),
                    None => break,
                }
            }
        }
        Ok(())
    }

    /// Poll the head until killed or a fatal error occurs.
    pub async fn run(mut self, events: EventSender) -> Result<(), SyncError> {
        let ctx = Arc::clone(&self.ctx);
        let chain_id = ctx.chain_id();

        if self.is_terminal() {
            tracing::info!(chain_id, "Every source ended before the finalized block, realtime sync not needed");
            let done = Checkpoint {
                chain_id,
                ..Checkpoint::MAX
            };
            events.send(NetworkEvent::Checkpoint(done)).await;
            return Ok(());
        }

        match self.load_children().await {
            Ok(()) => {}
            Err(e) if e.is_killed() || ctx.is_killed() => return Ok(()),
            Err(e) => return Err(e),
        }

        tracing::info!(
            chain_id,
            finalized = self.finalized.number,
            polling_interval_ms = ctx.config.polling_interval_ms,
            "Realtime sync started"
        );

        let mut ticker = tokio::time::interval(Duration::from_millis(ctx.config.polling_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let result = match methods::get_block_by_number(&ctx.queue, BlockTag::Latest).await {
                Ok(head) => self.handle_head(head, &events).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => self.consecutive_failures = 0,
                Err(e) if e.is_killed() || ctx.is_killed() => return Ok(()),
                Err(e) if e.is_fatal() => {
                    tracing::error!(chain_id, error = %e, "Realtime sync failed");
                    return Err(e);
                }
                Err(e) => {
                    self.pending.clear();
                    self.consecutive_failures += 1;
                    if self.consecutive_failures >= BACKOFF_SECS.len() {
                        tracing::error!(
                            chain_id,
                            failures = self.consecutive_failures,
                            error = %e,
                            "Realtime sync giving up"
                        );
                        return Err(e);
                    }
                    let delay = Duration::from_secs(BACKOFF_SECS[self.consecutive_failures - 1]);
                    tracing::warn!(
                        chain_id,
                        failures = self.consecutive_failures,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "Realtime sync error"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn local_head(&self) -> &LightBlock {
        self.local.head().unwrap_or(&self.finalized)
    }

    /// Reconcile a new remote head, fetching missing blocks first.
    pub async fn handle_head(&mut self, head: Block, events: &EventSender) -> Result<(), SyncError> {
        let local_number = self.local_head().number;

        if head.number > local_number + 1 {
            let missing_to = (local_number + MAX_QUEUED_BLOCKS).min(head.number - 1);
            tracing::debug!(
                chain_id = self.ctx.chain_id(),
                from = local_number + 1,
                to = missing_to,
                head = head.number,
                "Fetching missing blocks"
            );
            for number in local_number + 1..=missing_to {
                let block = methods::get_block_by_number(&self.ctx.queue, BlockTag::Number(number)).await?;
                self.pending.push_back(block);
            }
            // the head itself waits for the next poll when the gap was capped
            if missing_to + 1 == head.number {
                self.pending.push_back(head);
            }
        } else {
            self.pending.push_back(head);
        }

        while let Some(block) = self.pending.pop_front() {
            self.reconcile(block, events).await?;
        }
        Ok(())
    }

    async fn reconcile(&mut self, block: Block, events: &EventSender) -> Result<(), SyncError> {
        let local_head = self.local_head();
        if block.hash == local_head.hash {
            return Ok(());
        }
        // a lagging node may report a block we already accepted
        if block.number <= local_head.number
            && (block.hash == self.finalized.hash || self.local.contains_hash(&block.hash))
        {
            tracing::debug!(
                chain_id = self.ctx.chain_id(),
                block = block.number,
                local_head = local_head.number,
                "Head already in local chain, skipping"
            );
            return Ok(());
        }
        if block.number <= local_head.number || block.parent_hash != local_head.hash {
            self.reorg(&block, events).await?;
            self.pending.clear();
            return Ok(());
        }

        self.handle_block(block, events).await?;
        self.finalize_if_ready(events).await
    }

    async fn reorg(&mut self, head: &Block, events: &EventSender) -> Result<(), SyncError> {
        let ctx = Arc::clone(&self.ctx);
        let chain_id = ctx.chain_id();
        let previous_head = self.local_head().number;
        let mut remote = head.light();

        let ancestor = loop {
            self.local.rewind_to(remote.number.saturating_sub(1));
            let candidate = self.local_head().clone();
            if remote.parent_hash == candidate.hash {
                break candidate;
            }
            if self.local.is_empty() && remote.number <= self.finalized.number + 1 {
                tracing::error!(
                    chain_id,
                    finalized = self.finalized.number,
                    "Reorg reaches below the finalized block"
                );
                return Err(SyncError::UnrecoverableReorg {
                    chain_id,
                    finalized_block: self.finalized.number,
                });
            }
            remote = methods::get_block_by_hash(&ctx.queue, &remote.parent_hash)
                .await?
                .light();
        };

        ctx.store.delete_realtime_data(chain_id, ancestor.number).await?;
        for children in self.children.values_mut() {
            children.retain(|_, created| *created <= ancestor.number);
        }

        let depth = previous_head.saturating_sub(ancestor.number);
        ctx.metrics.realtime_reorg(chain_id, depth);
        tracing::warn!(
            chain_id,
            depth,
            ancestor = ancestor.number,
            head = head.number,
            "Reorg detected"
        );

        let safe = Checkpoint::block_end(ancestor.timestamp, chain_id, ancestor.number);
        events.send(NetworkEvent::Reorg(safe)).await;
        Ok(())
    }

    fn is_child(&self, factory: &FactoryCriteria, address: &str, block_number: u64) -> bool {
        self.children
            .get(factory)
            .and_then(|c| c.get(&address.to_ascii_lowercase()))
            .is_some_and(|created| *created <= block_number)
    }

    /// `false` only when the bloom proves no source can match.
    fn should_fetch_logs(&self, bloom: &Bloom) -> bool {
        let p = &self.partitioned;
        if p.log.is_empty() && p.factory_log.is_empty() && self.factories.is_empty() {
            return false;
        }
        if bloom.is_zero() {
            return true;
        }

        let logs = p.log.iter().any(|s| match &s.filter {
            SourceFilter::Log(c) => {
                let addresses = (!c.address.is_empty()).then_some(c.address.as_slice());
                is_filter_in_bloom(bloom, addresses, &c.topics)
            }
            _ => false,
        });
        let children = p.factory_log.iter().any(|s| match &s.filter {
            SourceFilter::FactoryLog(c) => {
                let known: Vec<String> = self
                    .children
                    .get(&c.factory)
                    .map(|m| m.keys().cloned().collect())
                    .unwrap_or_default();
                is_filter_in_bloom(bloom, Some(known.as_slice()), &c.topics)
            }
            _ => false,
        });
        let creations = self.factories.iter().any(|f| {
            is_filter_in_bloom(
                bloom,
                Some(std::slice::from_ref(&f.address)),
                &[vec![f.event_selector.clone()]],
            )
        });
        logs || children || creations
    }

    /// Accept a block that extends the local chain.
    async fn handle_block(&mut self, block: Block, events: &EventSender) -> Result<(), SyncError> {
        let ctx = Arc::clone(&self.ctx);
        let chain_id = ctx.chain_id();
        let number = block.number;

        let bloom = if block.logs_bloom.is_empty() {
            Bloom::default()
        } else {
            Bloom::from_hex(&block.logs_bloom)?
        };

        let logs = if self.should_fetch_logs(&bloom) {
            let logs = methods::get_logs(&ctx.queue, &LogsQuery::block_hash(block.hash.clone())).await?;
            if !bloom.is_zero() && logs.is_empty() {
                return Err(SyncError::invalid_response(
                    "eth_getLogs",
                    format!("block {number} has a non-empty logs bloom but no logs"),
                ));
            }
            if let Some(log) = logs.iter().find(|l| !l.block_hash.eq_ignore_ascii_case(&block.hash)) {
                return Err(SyncError::invalid_response(
                    "eth_getLogs",
                    format!("log of block {} returned for block {}", log.block_hash, block.hash),
                ));
            }
            logs
        } else {
            Vec::new()
        };

        // factory children first, a child may emit logs in its creation block
        let mut creation_logs: BTreeMap<u64, Log> = BTreeMap::new();
        for factory in &self.factories {
            for log in logs.iter().filter(|l| factory.matches_creation_log(l)) {
                if let Some(child) = factory.child_address(log) {
                    self.children
                        .entry(factory.clone())
                        .or_default()
                        .entry(child)
                        .or_insert(number);
                    creation_logs.insert(log.log_index, log.clone());
                }
            }
        }
        if !creation_logs.is_empty() {
            let creation_logs: Vec<Log> = creation_logs.into_values().collect();
            ctx.store
                .insert_factory_child_address_logs(chain_id, &creation_logs)
                .await?;
        }

        let mut matched_logs: BTreeMap<u64, Log> = BTreeMap::new();
        let mut receipt_hashes: BTreeSet<String> = BTreeSet::new();
        for source in self.partitioned.log.iter().chain(&self.partitioned.factory_log) {
            if !source.contains_block(number) {
                continue;
            }
            let (include_receipts, matching): (bool, Vec<&Log>) = match &source.filter {
                SourceFilter::Log(c) => (
                    c.include_transaction_receipts,
                    logs.iter().filter(|l| c.matches(l)).collect(),
                ),
                SourceFilter::FactoryLog(c) => (
                    c.include_transaction_receipts,
                    logs.iter()
                        .filter(|l| c.matches(l, |address, n| self.is_child(&c.factory, address, n)))
                        .collect(),
                ),
                _ => continue,
            };
            for log in matching {
                if include_receipts {
                    receipt_hashes.insert(log.transaction_hash.to_ascii_lowercase());
                }
                matched_logs.insert(log.log_index, log.clone());
            }
        }

        let mut traces: Vec<CallTrace> = Vec::new();
        if self.partitioned.has_call_traces() {
            let all = methods::trace_block(&ctx.queue, number).await?;
            if all.is_empty() && !block.transactions.is_empty() {
                return Err(SyncError::invalid_response(
                    "trace_block",
                    format!("block {number} has transactions but no traces"),
                ));
            }
            for (index, mut trace) in all.into_iter().enumerate() {
                trace.trace_index = index as u64;
                if self.trace_matches(&trace) {
                    if let Some(hash) = &trace.transaction_hash {
                        receipt_hashes.insert(hash.to_ascii_lowercase());
                    }
                    traces.push(trace);
                }
            }
        }

        let mut receipts = ctx.fetch_receipts(receipt_hashes.iter().map(String::as_str)).await?;
        let reverted: BTreeSet<String> = receipts
            .iter()
            .filter(|r| r.is_reverted())
            .map(|r| r.transaction_hash.to_ascii_lowercase())
            .collect();
        traces.retain(|t| {
            t.transaction_hash
                .as_deref()
                .map_or(true, |h| !reverted.contains(&h.to_ascii_lowercase()))
        });
        receipts.retain(|r| !r.is_reverted());

        let block_fires = self.partitioned.block.iter().any(|s| {
            s.contains_block(number) && matches!(&s.filter, SourceFilter::Block(c) if c.matches(number))
        });

        let matched = matched_logs.len();
        let matched_traces = traces.len();
        if matched > 0 || matched_traces > 0 || block_fires {
            let data = BlockData {
                block: Some(block.clone()),
                receipts,
                logs: matched_logs.into_values().collect(),
                traces,
            };
            ctx.store.insert_realtime_block(chain_id, data).await?;
        }

        if !self.local.push(block.light()) {
            return Err(SyncError::Other(format!(
                "block {number} does not extend the local chain"
            )));
        }
        ctx.metrics.realtime_block(chain_id, number);
        tracing::debug!(
            chain_id,
            block = number,
            logs = matched,
            traces = matched_traces,
            "Realtime block"
        );

        let checkpoint = Checkpoint::block_end(block.timestamp, chain_id, number);
        events.send(NetworkEvent::Checkpoint(checkpoint)).await;
        Ok(())
    }

    fn trace_matches(&self, trace: &CallTrace) -> bool {
        let p = &self.partitioned;
        p.call_trace
            .iter()
            .chain(&p.factory_call_trace)
            .filter(|s| s.contains_block(trace.block_number))
            .any(|s| match &s.filter {
                SourceFilter::CallTrace(c) => c.matches(trace),
                SourceFilter::FactoryCallTrace(c) => {
                    c.matches(trace, |address, n| self.is_child(&c.factory, address, n))
                }
                _ => false,
            })
    }

    /// Promote `head - finality` once the head is two finality windows past
    /// the finalized block.
    async fn finalize_if_ready(&mut self, events: &EventSender) -> Result<(), SyncError> {
        let ctx = Arc::clone(&self.ctx);
        let chain_id = ctx.chain_id();
        let finality = ctx.config.finality_block_count();
        let Some(head) = self.local.head() else {
            return Ok(());
        };
        if head.number < self.finalized.number + 2 * finality {
            return Ok(());
        }
        let Some(promoted) = self.local.get(head.number - finality).cloned() else {
            return Ok(());
        };

        ctx.store
            .insert_realtime_interval(chain_id, &self.sources, (self.finalized.number + 1, promoted.number))
            .await?;
        self.local.prune_to(promoted.number);
        ctx.metrics.realtime_finalize(chain_id, promoted.number);
        tracing::info!(
            chain_id,
            from = self.finalized.number,
            to = promoted.number,
            "Finalized block"
        );

        let checkpoint = Checkpoint::block_end(promoted.timestamp, chain_id, promoted.number);
        self.finalized = promoted;
        events.send(NetworkEvent::Finalize(checkpoint)).await;
        Ok(())
    }
}
