//! Multi-network sync orchestrator.
//!
//! [`SyncService::start`] sets every network up (chain id check, finalized
//! block, historical scheduler) and spawns one orchestrator task. The
//! orchestrator owns all cross-network state: it merges the networks'
//! progress into a single global checkpoint and pages events out of the
//! store in checkpoint order.
//!
//! ```text
//!  HistoricalSync ─┐                       ┌─▶ SyncEvent::Events
//!  HistoricalSync ─┼─(chain_id, event)─▶ Orchestrator ─▶ SyncEvent::Reorg
//!  RealtimeSync ───┘        mpsc           └─▶ SyncEvent::Finalize / Fatal
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use chainsync_core::checkpoint::{self, Checkpoint};
use chainsync_core::error::SyncError;
use chainsync_core::metrics::SyncMetrics;
use chainsync_core::source::Source;
use chainsync_core::store::{RawEvent, SyncStore};
use chainsync_rpc::methods::{self, BlockTag};
use chainsync_rpc::{RequestQueue, RequestQueueConfig};

use crate::builder::Network;
use crate::context::{EventSender, NetworkContext, NetworkEvent};
use crate::historical::HistoricalSync;
use crate::realtime::RealtimeSync;

/// Events requested from the store per page.
pub const EVENTS_PAGE_SIZE: usize = 1_000;

/// How often historical progress is turned into events.
const HISTORICAL_EMIT_INTERVAL: Duration = Duration::from_millis(500);

const NETWORK_CHANNEL_CAPACITY: usize = 1_024;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// What the indexing consumer receives, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Ordered events after the previous `Events` checkpoint, up to and
    /// including `checkpoint`.
    Events {
        events: Vec<RawEvent>,
        checkpoint: Checkpoint,
    },
    /// Everything after `safe_checkpoint` was reorged out and must be
    /// reverted by the consumer.
    Reorg { safe_checkpoint: Checkpoint },
    /// Everything up to `checkpoint` is final on every network.
    Finalize { checkpoint: Checkpoint },
    /// A network failed; the service has stopped.
    Fatal { chain_id: u64, message: String },
}

// ─── NetworkSyncState ─────────────────────────────────────────────────────────

/// Per-network progress as seen by the orchestrator.
struct NetworkSyncState {
    chain_id: u64,
    sources: Vec<Source>,
    historical_checkpoint: Option<Checkpoint>,
    historical_complete: bool,
    initial_finalized: Checkpoint,
    realtime_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    /// Taken when realtime sync starts.
    realtime: Option<RealtimeSync>,
    /// Taken when the service starts.
    historical: Option<HistoricalSync>,
}

impl NetworkSyncState {
    fn new(chain_id: u64, sources: Vec<Source>, initial_finalized: Checkpoint) -> Self {
        Self {
            chain_id,
            sources,
            historical_checkpoint: None,
            historical_complete: false,
            initial_finalized,
            realtime_checkpoint: initial_finalized,
            finalized_checkpoint: initial_finalized,
            realtime: None,
            historical: None,
        }
    }
}

// ─── SyncService ──────────────────────────────────────────────────────────────

/// Handle to a running sync.
pub struct SyncService {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncService {
    /// Set up every network and start syncing.
    ///
    /// Configuration problems (chain id mismatch, invalid sources) fail here,
    /// before anything is spawned.
    pub async fn start(
        networks: Vec<Network>,
        store: Arc<dyn SyncStore>,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Result<(SyncService, mpsc::Receiver<SyncEvent>), SyncError> {
        if networks.is_empty() {
            return Err(SyncError::Config("at least one network is required".into()));
        }

        let cancel = CancellationToken::new();
        let mut states = Vec::with_capacity(networks.len());
        for network in networks {
            let state = match setup_network(network, &store, &metrics, &cancel).await {
                Ok(state) => state,
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            };
            states.push(state);
        }

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let orchestrator = Orchestrator::new(store, states, tx, cancel.clone());
        let handle = tokio::spawn(orchestrator.run());

        Ok((SyncService { cancel, handle }, rx))
    }

    /// Stop every network. The event stream closes once in-flight work is
    /// drained.
    pub fn kill(&self) {
        tracing::info!("Killing sync service");
        self.cancel.cancel();
    }

    /// Kill and wait for the orchestrator to exit.
    pub async fn shutdown(self) {
        self.kill();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Orchestrator task panicked");
        }
    }

    pub fn is_killed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn setup_network(
    network: Network,
    store: &Arc<dyn SyncStore>,
    metrics: &Arc<dyn SyncMetrics>,
    cancel: &CancellationToken,
) -> Result<NetworkSyncState, SyncError> {
    let Network {
        config,
        sources,
        transport,
    } = network;
    config.validate()?;
    let chain_id = config.chain_id;

    let network_cancel = cancel.child_token();
    let queue = Arc::new(RequestQueue::new(
        transport,
        RequestQueueConfig::new(chain_id, config.max_requests_per_second),
        Arc::clone(metrics),
        network_cancel.clone(),
    ));

    let remote_chain_id = methods::chain_id(&queue).await?;
    if remote_chain_id != chain_id {
        return Err(SyncError::Config(format!(
            "network '{}' is configured with chain id {chain_id} but the RPC reports {remote_chain_id}",
            config.name
        )));
    }

    let latest = methods::get_block_by_number(&queue, BlockTag::Latest).await?;
    let finalized_number = latest.number.saturating_sub(config.finality_block_count());
    let finalized = methods::get_block_by_number(&queue, BlockTag::Number(finalized_number))
        .await?
        .light();

    tracing::info!(
        chain_id,
        network = %config.name,
        latest = latest.number,
        finalized = finalized.number,
        sources = sources.len(),
        "Network set up"
    );

    let ctx = Arc::new(NetworkContext {
        config,
        queue,
        store: Arc::clone(store),
        metrics: Arc::clone(metrics),
        cancel: network_cancel,
    });

    let mut historical = HistoricalSync::new(Arc::clone(&ctx), sources.clone());
    historical.setup(latest.number, &finalized).await?;
    let realtime = RealtimeSync::new(ctx, sources.clone(), finalized.clone());

    let initial_finalized = Checkpoint::block_end(finalized.timestamp, chain_id, finalized.number);
    let mut state = NetworkSyncState::new(chain_id, sources, initial_finalized);
    state.historical = Some(historical);
    state.realtime = Some(realtime);
    Ok(state)
}

/// Realtime sync reports the chain's maximum checkpoint once every source
/// has ended.
fn is_terminal(checkpoint: &Checkpoint) -> bool {
    checkpoint.block_timestamp == Checkpoint::MAX.block_timestamp
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

type NetworkResult = (u64, Result<(), SyncError>);

struct Orchestrator {
    store: Arc<dyn SyncStore>,
    networks: Vec<NetworkSyncState>,
    sources: Vec<Source>,
    /// Events up to here have been emitted.
    checkpoint: Checkpoint,
    finalized: Checkpoint,
    realtime_started: bool,
    output: mpsc::Sender<SyncEvent>,
    cancel: CancellationToken,
}

impl Orchestrator {
    fn new(
        store: Arc<dyn SyncStore>,
        networks: Vec<NetworkSyncState>,
        output: mpsc::Sender<SyncEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let sources = networks.iter().flat_map(|n| n.sources.iter().cloned()).collect();
        let finalized =
            checkpoint::min(networks.iter().map(|n| &n.initial_finalized)).unwrap_or(Checkpoint::ZERO);
        Self {
            store,
            networks,
            sources,
            checkpoint: Checkpoint::ZERO,
            finalized,
            realtime_started: false,
            output,
            cancel,
        }
    }

    async fn run(mut self) {
        let (tx, mut rx) = mpsc::channel(NETWORK_CHANNEL_CAPACITY);
        let mut tasks: JoinSet<NetworkResult> = JoinSet::new();

        for state in &mut self.networks {
            if let Some(historical) = state.historical.take() {
                let chain_id = state.chain_id;
                let events = EventSender::new(chain_id, tx.clone());
                tasks.spawn(async move { (chain_id, historical.run(events).await) });
            }
        }

        let mut ticker = tokio::time::interval(HISTORICAL_EMIT_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some((chain_id, event)) = rx.recv() => {
                    self.handle_event(chain_id, event, &tx, &mut tasks).await
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok((_, Ok(()))) => Ok(()),
                    Ok((chain_id, Err(e))) => Err((chain_id, e)),
                    Err(e) => Err((0, SyncError::Other(format!("network task panicked: {e}")))),
                },
                _ = ticker.tick(), if !self.realtime_started => self.emit_historical().await,
            };

            if let Err((chain_id, e)) = result {
                if e.is_killed() || self.cancel.is_cancelled() {
                    break;
                }
                tracing::error!(chain_id, error = %e, "Fatal sync error, stopping");
                let fatal = SyncEvent::Fatal {
                    chain_id,
                    message: e.to_string(),
                };
                let _ = self.output.send(fatal).await;
                break;
            }
        }

        self.cancel.cancel();
        while tasks.join_next().await.is_some() {}
        tracing::info!("Sync stopped");
    }

    async fn handle_event(
        &mut self,
        chain_id: u64,
        event: NetworkEvent,
        tx: &mpsc::Sender<(u64, NetworkEvent)>,
        tasks: &mut JoinSet<NetworkResult>,
    ) -> Result<(), (u64, SyncError)> {
        let Some(index) = self.networks.iter().position(|n| n.chain_id == chain_id) else {
            tracing::warn!(chain_id, "Event from unknown network");
            return Ok(());
        };

        match event {
            NetworkEvent::HistoricalCheckpoint(checkpoint) => {
                self.networks[index].historical_checkpoint = Some(checkpoint);
            }
            NetworkEvent::SyncComplete => {
                self.networks[index].historical_complete = true;
                if !self.realtime_started && self.networks.iter().all(|n| n.historical_complete) {
                    let to = checkpoint::min(self.networks.iter().map(|n| &n.initial_finalized))
                        .unwrap_or(Checkpoint::ZERO);
                    self.emit(to).await?;
                    self.start_realtime(tx, tasks);
                }
            }
            NetworkEvent::Checkpoint(checkpoint) => {
                self.networks[index].realtime_checkpoint = checkpoint;
                if is_terminal(&checkpoint) {
                    // a finished network never holds back finality
                    self.networks[index].finalized_checkpoint = checkpoint;
                }
                if self.realtime_started {
                    let to = checkpoint::min(self.networks.iter().map(|n| &n.realtime_checkpoint))
                        .unwrap_or(Checkpoint::ZERO);
                    self.emit(to).await?;
                }
                if is_terminal(&checkpoint) {
                    self.finalize().await;
                }
            }
            NetworkEvent::Finalize(checkpoint) => {
                self.networks[index].finalized_checkpoint = checkpoint;
                self.finalize().await;
            }
            NetworkEvent::Reorg(safe_checkpoint) => {
                self.networks[index].realtime_checkpoint = safe_checkpoint;
                if safe_checkpoint < self.checkpoint {
                    self.checkpoint = safe_checkpoint;
                }
                tracing::info!(chain_id, safe_checkpoint = %safe_checkpoint, "Forwarding reorg");
                self.send(SyncEvent::Reorg { safe_checkpoint }).await;
            }
        }
        Ok(())
    }

    /// Emit the minimum finalized checkpoint when it advanced.
    async fn finalize(&mut self) {
        let Some(finalized) = checkpoint::min(self.networks.iter().map(|n| &n.finalized_checkpoint)) else {
            return;
        };
        if finalized > self.finalized {
            self.finalized = finalized;
            self.send(SyncEvent::Finalize {
                checkpoint: finalized,
            })
            .await;
        }
    }

    fn start_realtime(&mut self, tx: &mpsc::Sender<(u64, NetworkEvent)>, tasks: &mut JoinSet<NetworkResult>) {
        self.realtime_started = true;
        for state in &mut self.networks {
            if let Some(realtime) = state.realtime.take() {
                let chain_id = state.chain_id;
                let events = EventSender::new(chain_id, tx.clone());
                tasks.spawn(async move { (chain_id, realtime.run(events).await) });
            }
        }
        tracing::info!(networks = self.networks.len(), "Historical sync complete, realtime sync started");
    }

    /// Emit up to the slowest network's historical checkpoint.
    async fn emit_historical(&mut self) -> Result<(), (u64, SyncError)> {
        let checkpoints: Option<Vec<Checkpoint>> =
            self.networks.iter().map(|n| n.historical_checkpoint).collect();
        let Some(checkpoints) = checkpoints else {
            return Ok(());
        };
        match checkpoint::min(&checkpoints) {
            Some(to) => self.emit(to).await,
            None => Ok(()),
        }
    }

    /// Page events in `(self.checkpoint, to]` out of the store.
    async fn emit(&mut self, to: Checkpoint) -> Result<(), (u64, SyncError)> {
        if to <= self.checkpoint {
            return Ok(());
        }
        let mut from = self.checkpoint;
        loop {
            let page = self
                .store
                .get_events(&self.sources, &from, &to, EVENTS_PAGE_SIZE)
                .await
                .map_err(|e| (to.chain_id, e))?;
            let checkpoint = match page.cursor {
                Some(cursor) if page.has_next_page => cursor,
                _ => to,
            };
            tracing::debug!(
                events = page.events.len(),
                from = %from,
                to = %checkpoint,
                "Emitting events"
            );
            self.send(SyncEvent::Events {
                events: page.events,
                checkpoint,
            })
            .await;
            if !page.has_next_page {
                break;
            }
            from = checkpoint;
        }
        self.checkpoint = to;
        Ok(())
    }

    async fn send(&self, event: SyncEvent) {
        if self.output.send(event).await.is_err() {
            // the consumer dropped the receiver
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainsync_storage::MemorySyncStore;

    fn state(chain_id: u64, finalized_ts: u64, finalized_block: u64) -> NetworkSyncState {
        NetworkSyncState::new(
            chain_id,
            Vec::new(),
            Checkpoint::block_end(finalized_ts, chain_id, finalized_block),
        )
    }

    fn orchestrator(networks: Vec<NetworkSyncState>) -> (Orchestrator, mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let store = Arc::new(MemorySyncStore::new());
        (Orchestrator::new(store, networks, tx, CancellationToken::new()), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn checkpoints(events: &[SyncEvent]) -> Vec<Checkpoint> {
        events
            .iter()
            .filter_map(|e| match e {
                SyncEvent::Events { checkpoint, .. } => Some(*checkpoint),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn historical_emits_up_to_slowest_network() {
        let (mut orch, mut rx) = orchestrator(vec![state(1, 1_000, 100), state(10, 1_000, 500)]);
        let (tx, _network_rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();

        let fast = Checkpoint::block_end(900, 1, 90);
        orch.handle_event(1, NetworkEvent::HistoricalCheckpoint(fast), &tx, &mut tasks)
            .await
            .unwrap();
        orch.emit_historical().await.unwrap();
        assert!(drain(&mut rx).is_empty(), "chain 10 has no checkpoint yet");

        let slow = Checkpoint::block_end(500, 10, 50);
        orch.handle_event(10, NetworkEvent::HistoricalCheckpoint(slow), &tx, &mut tasks)
            .await
            .unwrap();
        orch.emit_historical().await.unwrap();
        assert_eq!(checkpoints(&drain(&mut rx)), vec![slow]);

        // no progress, nothing emitted
        orch.emit_historical().await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn realtime_starts_after_every_network_completes() {
        let (mut orch, mut rx) = orchestrator(vec![state(1, 1_000, 100), state(10, 800, 400)]);
        let (tx, _network_rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();

        orch.handle_event(1, NetworkEvent::SyncComplete, &tx, &mut tasks)
            .await
            .unwrap();
        assert!(!orch.realtime_started);
        orch.handle_event(10, NetworkEvent::SyncComplete, &tx, &mut tasks)
            .await
            .unwrap();
        assert!(orch.realtime_started);
        assert_eq!(
            checkpoints(&drain(&mut rx)),
            vec![Checkpoint::block_end(800, 10, 400)]
        );

        // realtime progress on one chain waits for the other
        let cp = Checkpoint::block_end(1_012, 1, 101);
        orch.handle_event(1, NetworkEvent::Checkpoint(cp), &tx, &mut tasks)
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());

        orch.handle_event(10, NetworkEvent::Checkpoint(Checkpoint::block_end(1_100, 10, 401)), &tx, &mut tasks)
            .await
            .unwrap();
        assert_eq!(checkpoints(&drain(&mut rx)), vec![cp]);
    }

    #[tokio::test]
    async fn finalize_is_min_and_never_regresses() {
        let (mut orch, mut rx) = orchestrator(vec![state(1, 100, 10), state(10, 100, 10)]);
        let (tx, _network_rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();

        let a = Checkpoint::block_end(200, 1, 20);
        orch.handle_event(1, NetworkEvent::Finalize(a), &tx, &mut tasks)
            .await
            .unwrap();
        // chain 10 still at its initial finalized checkpoint
        assert!(drain(&mut rx).is_empty());

        let b = Checkpoint::block_end(300, 10, 30);
        orch.handle_event(10, NetworkEvent::Finalize(b), &tx, &mut tasks)
            .await
            .unwrap();
        assert_eq!(drain(&mut rx), vec![SyncEvent::Finalize { checkpoint: a }]);

        let older = Checkpoint::block_end(150, 1, 15);
        orch.handle_event(1, NetworkEvent::Finalize(older), &tx, &mut tasks)
            .await
            .unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn finished_network_stops_holding_back_finality() {
        let (mut orch, mut rx) = orchestrator(vec![state(1, 1_000, 100), state(10, 500, 50)]);
        let (tx, _network_rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();
        orch.realtime_started = true;
        assert_eq!(orch.finalized, Checkpoint::block_end(500, 10, 50));

        let done = Checkpoint {
            chain_id: 10,
            ..Checkpoint::MAX
        };
        orch.handle_event(10, NetworkEvent::Checkpoint(done), &tx, &mut tasks)
            .await
            .unwrap();
        assert_eq!(
            drain(&mut rx).last(),
            Some(&SyncEvent::Finalize {
                checkpoint: Checkpoint::block_end(1_000, 1, 100)
            })
        );

        let mut finalized = Vec::new();
        for number in 101..110 {
            let cp = Checkpoint::block_end(number * 10, 1, number);
            orch.handle_event(1, NetworkEvent::Finalize(cp), &tx, &mut tasks)
                .await
                .unwrap();
            for event in drain(&mut rx) {
                if let SyncEvent::Finalize { checkpoint } = event {
                    finalized.push(checkpoint.block_number);
                }
            }
        }
        assert_eq!(finalized, (101..110).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn reorg_clamps_global_checkpoint() {
        let (mut orch, mut rx) = orchestrator(vec![state(1, 100, 10)]);
        let (tx, _network_rx) = mpsc::channel(8);
        let mut tasks = JoinSet::new();
        orch.realtime_started = true;

        let head = Checkpoint::block_end(150, 1, 15);
        orch.handle_event(1, NetworkEvent::Checkpoint(head), &tx, &mut tasks)
            .await
            .unwrap();
        assert_eq!(orch.checkpoint, head);

        let safe = Checkpoint::block_end(120, 1, 12);
        orch.handle_event(1, NetworkEvent::Reorg(safe), &tx, &mut tasks)
            .await
            .unwrap();
        assert_eq!(orch.checkpoint, safe);
        let events = drain(&mut rx);
        assert_eq!(events.last(), Some(&SyncEvent::Reorg { safe_checkpoint: safe }));
    }
}
