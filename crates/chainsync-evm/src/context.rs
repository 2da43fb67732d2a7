//! Per-network state shared by the historical and realtime components.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chainsync_core::checkpoint::Checkpoint;
use chainsync_core::config::NetworkConfig;
use chainsync_core::error::SyncError;
use chainsync_core::metrics::SyncMetrics;
use chainsync_core::store::SyncStore;
use chainsync_core::types::TransactionReceipt;
use chainsync_rpc::{methods, RequestQueue};

/// Everything a sync component needs to talk to one network.
pub struct NetworkContext {
    pub config: NetworkConfig,
    pub queue: Arc<RequestQueue>,
    pub store: Arc<dyn SyncStore>,
    pub metrics: Arc<dyn SyncMetrics>,
    /// Cancelled by `SyncService::kill` (or by a fatal error elsewhere).
    pub cancel: CancellationToken,
}

impl NetworkContext {
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetch the receipt of every distinct transaction hash, concurrently.
    pub async fn fetch_receipts<'a>(
        &self,
        hashes: impl Iterator<Item = &'a str>,
    ) -> Result<Vec<TransactionReceipt>, SyncError> {
        let unique: BTreeSet<String> = hashes.map(str::to_ascii_lowercase).collect();
        try_join_all(
            unique
                .iter()
                .map(|hash| methods::get_transaction_receipt(&self.queue, hash)),
        )
        .await
    }

    /// Receipts of transactions in finalized blocks, given as
    /// `(hash, block_number)`. Answered from the store's RPC cache when a
    /// previous sync already fetched them.
    pub async fn fetch_finalized_receipts<'a>(
        &self,
        transactions: impl Iterator<Item = (&'a str, u64)>,
    ) -> Result<Vec<TransactionReceipt>, SyncError> {
        let unique: BTreeMap<String, u64> = transactions
            .map(|(hash, number)| (hash.to_ascii_lowercase(), number))
            .collect();
        try_join_all(unique.iter().map(|(hash, number)| {
            methods::get_transaction_receipt_cached(&self.queue, self.store.as_ref(), hash, *number)
        }))
        .await
    }
}

/// Progress reported by a network's sync components to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// Every historical event up to this checkpoint is in the store.
    HistoricalCheckpoint(Checkpoint),
    /// The historical backfill of this network is done.
    SyncComplete,
    /// A realtime block was reconciled.
    Checkpoint(Checkpoint),
    /// Data above the safe checkpoint was deleted.
    Reorg(Checkpoint),
    /// Everything up to this checkpoint is final.
    Finalize(Checkpoint),
}

/// Tags [`NetworkEvent`]s with their chain id on the orchestrator channel.
#[derive(Clone)]
pub struct EventSender {
    chain_id: u64,
    tx: mpsc::Sender<(u64, NetworkEvent)>,
}

impl EventSender {
    pub fn new(chain_id: u64, tx: mpsc::Sender<(u64, NetworkEvent)>) -> Self {
        Self { chain_id, tx }
    }

    /// Deliver `event`. A closed channel means the orchestrator is gone,
    /// which only happens during shutdown, so the event is dropped.
    pub async fn send(&self, event: NetworkEvent) {
        if self.tx.send((self.chain_id, event)).await.is_err() {
            tracing::debug!(chain_id = self.chain_id, "orchestrator channel closed, dropping event");
        }
    }
}
