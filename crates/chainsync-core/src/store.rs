//! The sync store contract.
//!
//! The engine persists fetched chain data and the block ranges it has
//! completed through this trait, and reads ordered events back out of it.
//! Interval methods are per source kind; implementations decompose the
//! criteria into [`crate::fragment::Fragment`]s and store intervals per
//! fragment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checkpoint::Checkpoint;
use crate::error::SyncError;
use crate::interval::Interval;
use crate::source::{
    BlockFilterCriteria, FactoryCriteria, FactoryLogFilterCriteria, FactoryTraceFilterCriteria,
    LogFilterCriteria, Source, TraceFilterCriteria,
};
use crate::types::{Block, CallTrace, Log, TransactionReceipt};

/// Chain data written together with an interval.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockData {
    /// `None` when the interval has no matching data.
    pub block: Option<Block>,
    pub receipts: Vec<TransactionReceipt>,
    pub logs: Vec<Log>,
    pub traces: Vec<CallTrace>,
}

impl BlockData {
    pub fn is_empty(&self) -> bool {
        self.block.is_none() && self.logs.is_empty() && self.traces.is_empty()
    }
}

/// A discovered factory child contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAddress {
    pub address: String,
    /// Block of the creation log that first announced this address.
    pub block_number: u64,
}

/// One page of child addresses, ordered by address.
#[derive(Debug, Clone, Default)]
pub struct ChildAddressPage {
    pub addresses: Vec<ChildAddress>,
    /// Pass as `after` to fetch the next page; `None` on the last page.
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Log,
    Block,
    CallTrace,
}

/// A checkpoint-ordered record handed to the indexing consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub kind: EventKind,
    pub chain_id: u64,
    pub source_id: String,
    /// Encoded [`Checkpoint`].
    pub checkpoint: String,
    pub payload: Value,
}

/// Result of [`SyncStore::get_events`].
#[derive(Debug, Clone, Default)]
pub struct EventsPage {
    pub events: Vec<RawEvent>,
    /// Checkpoint of the last returned event, when more events remain.
    pub cursor: Option<Checkpoint>,
    pub has_next_page: bool,
}

#[async_trait]
pub trait SyncStore: Send + Sync {
    // ─── Historical intervals ────────────────────────────────────────────────

    async fn insert_log_filter_interval(
        &self,
        chain_id: u64,
        criteria: &LogFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError>;

    async fn get_log_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &LogFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError>;

    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: u64,
        criteria: &FactoryLogFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError>;

    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &FactoryLogFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError>;

    async fn insert_block_filter_interval(
        &self,
        chain_id: u64,
        criteria: &BlockFilterCriteria,
        block: Option<Block>,
        interval: Interval,
    ) -> Result<(), SyncError>;

    async fn get_block_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &BlockFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError>;

    async fn insert_trace_filter_interval(
        &self,
        chain_id: u64,
        criteria: &TraceFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError>;

    async fn get_trace_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &TraceFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError>;

    async fn insert_factory_trace_filter_interval(
        &self,
        chain_id: u64,
        criteria: &FactoryTraceFilterCriteria,
        data: BlockData,
        interval: Interval,
    ) -> Result<(), SyncError>;

    async fn get_factory_trace_filter_intervals(
        &self,
        chain_id: u64,
        criteria: &FactoryTraceFilterCriteria,
    ) -> Result<Vec<Interval>, SyncError>;

    // ─── Factories ────────────────────────────────────────────────────────────

    /// Persist factory creation logs. Child addresses are derived from them
    /// on read.
    async fn insert_factory_child_address_logs(
        &self,
        chain_id: u64,
        logs: &[Log],
    ) -> Result<(), SyncError>;

    /// Children announced by `factory` at or below `up_to_block`, keyset
    /// paginated by address (exclusive `after`).
    async fn get_factory_child_addresses(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
        up_to_block: u64,
        limit: usize,
        after: Option<&str>,
    ) -> Result<ChildAddressPage, SyncError>;

    // ─── Blocks and realtime ──────────────────────────────────────────────────

    async fn has_block(&self, chain_id: u64, block_number: u64) -> Result<bool, SyncError>;

    async fn insert_realtime_block(&self, chain_id: u64, data: BlockData) -> Result<(), SyncError>;

    /// Mark `interval` complete for every source (and every factory's
    /// creation-log criteria).
    async fn insert_realtime_interval(
        &self,
        chain_id: u64,
        sources: &[Source],
        interval: Interval,
    ) -> Result<(), SyncError>;

    /// Delete all data for blocks strictly above `from_block` and clamp
    /// cached intervals to end at `from_block`.
    async fn delete_realtime_data(&self, chain_id: u64, from_block: u64) -> Result<(), SyncError>;

    // ─── RPC cache ────────────────────────────────────────────────────────────

    async fn get_rpc_request_result(
        &self,
        chain_id: u64,
        block_number: u64,
        request: &str,
    ) -> Result<Option<String>, SyncError>;

    async fn insert_rpc_request_result(
        &self,
        chain_id: u64,
        block_number: u64,
        request: &str,
        result: &str,
    ) -> Result<(), SyncError>;

    // ─── Events ───────────────────────────────────────────────────────────────

    /// Events of `sources` with `from < checkpoint <= to`, in checkpoint
    /// order, about `limit` per page. A page may run past `limit` so it never
    /// ends between two events sharing a checkpoint, because the cursor is
    /// exclusive.
    async fn get_events(
        &self,
        sources: &[Source],
        from: &Checkpoint,
        to: &Checkpoint,
        limit: usize,
    ) -> Result<EventsPage, SyncError>;

    /// Checkpoint of the last event of `sources` in `(from, to]`.
    async fn get_last_event_checkpoint(
        &self,
        sources: &[Source],
        from: &Checkpoint,
        to: &Checkpoint,
    ) -> Result<Option<Checkpoint>, SyncError>;
}
