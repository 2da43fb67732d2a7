//! Historical sync: backfill every source of one network up to the
//! finalized block.
//!
//! # Scheduling
//!
//! ```text
//! setup ──► chunks of each source's required range ──► priority queue
//!                                                        │ (earliest block first)
//!                        ┌───────────────────────────────┘
//!                        ▼
//!   driver loop ── JoinSet (≤ max_historical_task_concurrency) ── filter tasks
//!        │                                                         │
//!        │◄──── intervals + block callbacks ◄──────────────────────┘
//!        │
//!        └─► block tasks, up to the lowest source checkpoint
//!               └─► callbacks write the store, BlockProgressTracker
//!                   advances, checkpoint emitted (debounced 500 ms)
//! ```
//!
//! The driver owns all scheduler state; tasks only talk to the network and
//! the store. A failed task is re-queued with its original priority.

mod task;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;

use chainsync_core::checkpoint::Checkpoint;
use chainsync_core::error::SyncError;
use chainsync_core::interval::{self, Interval};
use chainsync_core::progress::{BlockProgressTracker, ProgressTracker};
use chainsync_core::source::{Source, SourceFilter};
use chainsync_core::types::LightBlock;

use crate::context::{EventSender, NetworkContext, NetworkEvent};

use task::{BlockCallback, Task, TaskOutput};

/// Minimum spacing between two historical checkpoint events.
const CHECKPOINT_DEBOUNCE: Duration = Duration::from_millis(500);

// ─── Queue ────────────────────────────────────────────────────────────────────

struct QueuedTask {
    priority: u64,
    /// Insertion order, breaks priority ties first-in first-out.
    seq: u64,
    task: Task,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ─── Source state ─────────────────────────────────────────────────────────────

struct SourceState {
    source: Source,
    /// `None` when the source starts above the finalized block and is left
    /// to realtime sync.
    tracker: Option<ProgressTracker>,
    /// Creation-log progress of a factory source.
    child_tracker: Option<ProgressTracker>,
}

impl SourceState {
    fn trackers(&self) -> impl Iterator<Item = &ProgressTracker> {
        self.tracker.iter().chain(self.child_tracker.iter())
    }
}

// ─── Checkpoint debounce ──────────────────────────────────────────────────────

/// Fires immediately unless the previous checkpoint went out less than
/// [`CHECKPOINT_DEBOUNCE`] ago, in which case the newest one waits for
/// the deadline.
struct Debounce {
    last_fired: Option<Instant>,
    pending: Option<Checkpoint>,
}

impl Debounce {
    fn new() -> Self {
        Self {
            last_fired: None,
            pending: None,
        }
    }

    /// Returns the checkpoint to emit now, if any.
    fn push(&mut self, checkpoint: Checkpoint) -> Option<Checkpoint> {
        let now = Instant::now();
        match self.last_fired {
            Some(last) if now.duration_since(last) < CHECKPOINT_DEBOUNCE => {
                self.pending = Some(checkpoint);
                None
            }
            _ => {
                self.last_fired = Some(now);
                self.pending = None;
                Some(checkpoint)
            }
        }
    }

    fn deadline(&self) -> Option<Instant> {
        self.pending?;
        self.last_fired.map(|last| last + CHECKPOINT_DEBOUNCE)
    }

    fn flush(&mut self) -> Option<Checkpoint> {
        let pending = self.pending.take()?;
        self.last_fired = Some(Instant::now());
        Some(pending)
    }
}

// ─── HistoricalSync ───────────────────────────────────────────────────────────

/// Backfill scheduler of one network.
pub struct HistoricalSync {
    ctx: Arc<NetworkContext>,
    sources: Vec<SourceState>,
    queue: BinaryHeap<QueuedTask>,
    next_seq: u64,
    /// Deferred store writes, keyed by the block they wait for.
    block_callbacks: BTreeMap<u64, Vec<BlockCallback>>,
    block_progress: BlockProgressTracker,
    finalized: Option<LightBlock>,
}

impl HistoricalSync {
    pub fn new(ctx: Arc<NetworkContext>, sources: Vec<Source>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| SourceState {
                source,
                tracker: None,
                child_tracker: None,
            })
            .collect();
        Self {
            ctx,
            sources,
            queue: BinaryHeap::new(),
            next_seq: 0,
            block_callbacks: BTreeMap::new(),
            block_progress: BlockProgressTracker::new(),
            finalized: None,
        }
    }

    /// Validate every source against the chain, seed progress from the
    /// store's interval cache and enqueue the first tasks.
    ///
    /// Fails without enqueuing anything if a source is misconfigured.
    pub async fn setup(&mut self, latest: u64, finalized: &LightBlock) -> Result<(), SyncError> {
        let chain_id = self.ctx.chain_id();

        for state in &self.sources {
            let source = &state.source;
            if let Some(end) = source.end_block {
                if source.start_block > end {
                    return Err(SyncError::Config(format!(
                        "source '{}': start block {} is after end block {end}",
                        source.id, source.start_block
                    )));
                }
            }
            if source.start_block > latest {
                return Err(SyncError::Config(format!(
                    "source '{}': start block {} is after the latest block {latest} of chain {chain_id}",
                    source.id, source.start_block
                )));
            }
        }

        self.finalized = Some(finalized.clone());
        for index in 0..self.sources.len() {
            self.setup_source(index, finalized.number).await?;
        }
        self.enqueue_block_tasks()?;

        tracing::info!(
            chain_id,
            sources = self.sources.len(),
            tasks = self.queue.len(),
            finalized = finalized.number,
            "Historical sync set up"
        );
        Ok(())
    }

    async fn setup_source(&mut self, index: usize, finalized: u64) -> Result<(), SyncError> {
        let ctx = Arc::clone(&self.ctx);
        let chain_id = ctx.chain_id();
        let source = self.sources[index].source.clone();

        if source.start_block > finalized {
            tracing::debug!(
                chain_id,
                source = %source.id,
                start = source.start_block,
                finalized,
                "Source starts above the finalized block, left to realtime sync"
            );
            return Ok(());
        }
        let end = source.end_block.map_or(finalized, |e| e.min(finalized));
        let target = (source.start_block, end);

        let cached = match &source.filter {
            SourceFilter::Log(c) => ctx.store.get_log_filter_intervals(chain_id, c).await?,
            SourceFilter::FactoryLog(c) => ctx.store.get_factory_log_filter_intervals(chain_id, c).await?,
            SourceFilter::CallTrace(c) => ctx.store.get_trace_filter_intervals(chain_id, c).await?,
            SourceFilter::FactoryCallTrace(c) => {
                ctx.store.get_factory_trace_filter_intervals(chain_id, c).await?
            }
            SourceFilter::Block(c) => ctx.store.get_block_filter_intervals(chain_id, c).await?,
        };
        let tracker = ProgressTracker::new(target, &cached)?;

        let total = target.1 - target.0 + 1;
        let cached_blocks = interval::sum(&interval::intersection(&[target], &cached));
        ctx.metrics.historical_total_blocks(chain_id, &source.id, total);
        ctx.metrics.historical_cached_blocks(chain_id, &source.id, cached_blocks);
        tracing::info!(
            chain_id,
            source = %source.id,
            from = target.0,
            to = target.1,
            cached = cached_blocks,
            "Historical target"
        );

        if let Some(factory) = source.factory() {
            let creation = factory.creation_log_criteria();
            let child_cached = ctx.store.get_log_filter_intervals(chain_id, &creation).await?;
            let child_tracker = ProgressTracker::new(target, &child_cached)?;

            for chunk in interval::get_chunks(child_tracker.required(), ctx.config.max_block_range) {
                self.push(Task::FactoryChildAddress {
                    source: index,
                    factory: factory.clone(),
                    chunk,
                });
            }

            // children sync only as far as their discovery has come
            if let Some(discovered) = child_tracker.checkpoint() {
                if discovered >= target.0 {
                    self.enqueue_filter_chunks(index, &tracker, (target.0, discovered));
                }
            }
            self.sources[index].child_tracker = Some(child_tracker);
        } else {
            self.enqueue_filter_chunks(index, &tracker, target);
        }

        self.sources[index].tracker = Some(tracker);
        Ok(())
    }

    /// Enqueue filter tasks for the part of `range` the tracker still needs.
    fn enqueue_filter_chunks(&mut self, index: usize, tracker: &ProgressTracker, range: Interval) {
        let required = interval::intersection(tracker.required(), &[range]);
        let filter = self.sources[index].source.filter.clone();
        let max_range = match filter {
            SourceFilter::CallTrace(_) | SourceFilter::FactoryCallTrace(_) => {
                self.ctx.config.max_trace_block_range
            }
            _ => self.ctx.config.max_block_range,
        };

        for chunk in interval::get_chunks(&required, max_range) {
            let task = match &filter {
                SourceFilter::Log(criteria) => Task::LogFilter {
                    source: index,
                    criteria: criteria.clone(),
                    chunk,
                },
                SourceFilter::FactoryLog(criteria) => Task::FactoryLogFilter {
                    source: index,
                    criteria: criteria.clone(),
                    chunk,
                },
                SourceFilter::CallTrace(criteria) => Task::TraceFilter {
                    source: index,
                    criteria: criteria.clone(),
                    chunk,
                },
                SourceFilter::FactoryCallTrace(criteria) => Task::FactoryTraceFilter {
                    source: index,
                    criteria: criteria.clone(),
                    chunk,
                },
                SourceFilter::Block(criteria) => Task::BlockFilter {
                    source: index,
                    criteria: *criteria,
                    chunk,
                },
            };
            self.push(task);
        }
    }

    fn push(&mut self, task: Task) {
        let priority = task.priority();
        self.push_with_priority(task, priority);
    }

    fn push_with_priority(&mut self, task: Task, priority: u64) {
        self.queue.push(QueuedTask {
            priority,
            seq: self.next_seq,
            task,
        });
        self.next_seq += 1;
    }

    /// Lowest checkpoint over every unfinished tracker; `Some(u64::MAX)`
    /// once all trackers are complete, `None` while one has no progress.
    fn min_source_checkpoint(&self) -> Option<u64> {
        self.sources
            .iter()
            .flat_map(SourceState::trackers)
            .filter(|t| !t.is_complete())
            .map(ProgressTracker::checkpoint)
            .min()
            .unwrap_or(Some(u64::MAX))
    }

    /// Turn callbacks at or below the lowest source checkpoint into block
    /// tasks. Blocks are handed to the progress tracker in increasing order.
    fn enqueue_block_tasks(&mut self) -> Result<(), SyncError> {
        let Some(ready_to) = self.min_source_checkpoint() else {
            return Ok(());
        };
        let ready = match ready_to.checked_add(1) {
            Some(split) => {
                let rest = self.block_callbacks.split_off(&split);
                std::mem::replace(&mut self.block_callbacks, rest)
            }
            None => std::mem::take(&mut self.block_callbacks),
        };
        if ready.is_empty() {
            return Ok(());
        }

        let numbers: Vec<u64> = ready.keys().copied().collect();
        self.block_progress.add_pending_blocks(&numbers)?;
        for (number, callbacks) in ready {
            self.push(Task::Block { number, callbacks });
        }
        Ok(())
    }

    /// Apply a finished task to the scheduler state. Returns the new
    /// historical checkpoint when block progress moved.
    fn complete(&mut self, task: Task, output: TaskOutput) -> Result<Option<Checkpoint>, SyncError> {
        let chain_id = self.ctx.chain_id();
        match (task, output) {
            (Task::Block { .. }, TaskOutput::Block { number, timestamp }) => {
                let update = self.block_progress.add_completed_block(number, timestamp)?;
                if let (true, Some(cp)) = (update.is_updated, update.new_checkpoint) {
                    self.ctx.metrics.historical_checkpoint(chain_id, cp.block_number);
                    return Ok(Some(Checkpoint::block_end(
                        cp.block_timestamp,
                        chain_id,
                        cp.block_number,
                    )));
                }
                Ok(None)
            }
            (Task::FactoryChildAddress { source, chunk, .. }, TaskOutput::Intervals(intervals)) => {
                self.register_callbacks(source, intervals);
                let update = match self.sources[source].child_tracker.as_mut() {
                    Some(child_tracker) => child_tracker.add_completed_interval(chunk),
                    None => return Ok(None),
                };
                if update.is_updated {
                    if let (Some(new), Some(tracker)) =
                        (update.new_checkpoint, self.sources[source].tracker.clone())
                    {
                        let from = update.prev_checkpoint.map_or(tracker.target().0, |p| p + 1);
                        if new >= from {
                            self.enqueue_filter_chunks(source, &tracker, (from, new));
                        }
                    }
                }
                self.enqueue_block_tasks()?;
                Ok(None)
            }
            (
                Task::LogFilter { source, chunk, .. }
                | Task::FactoryLogFilter { source, chunk, .. }
                | Task::TraceFilter { source, chunk, .. }
                | Task::FactoryTraceFilter { source, chunk, .. }
                | Task::BlockFilter { source, chunk, .. },
                TaskOutput::Intervals(intervals),
            ) => {
                self.register_callbacks(source, intervals);
                if let Some(tracker) = self.sources[source].tracker.as_mut() {
                    tracker.add_completed_interval(chunk);
                }
                self.enqueue_block_tasks()?;
                Ok(None)
            }
            (task, _) => Err(SyncError::Other(format!(
                "historical task {} returned a mismatched output",
                task.name()
            ))),
        }
    }

    fn register_callbacks(&mut self, source: usize, intervals: Vec<(Interval, task::CallbackData)>) {
        let source_id = self.sources[source].source.id.clone();
        for (interval, data) in intervals {
            self.block_callbacks
                .entry(interval.1)
                .or_default()
                .push(BlockCallback {
                    source_id: source_id.clone(),
                    interval,
                    data,
                });
        }
    }

    /// Run the driver loop until every task is done, then report the
    /// finalized block as the final checkpoint followed by `SyncComplete`.
    ///
    /// Returns `Ok(())` without completing when the network is killed.
    pub async fn run(mut self, events: EventSender) -> Result<(), SyncError> {
        let ctx = Arc::clone(&self.ctx);
        let chain_id = ctx.chain_id();
        let concurrency = ctx.config.max_historical_task_concurrency.max(1);
        let mut running: JoinSet<(Task, u64, Result<TaskOutput, SyncError>)> = JoinSet::new();
        let mut debounce = Debounce::new();

        loop {
            while running.len() < concurrency {
                let Some(queued) = self.queue.pop() else {
                    break;
                };
                let ctx = Arc::clone(&ctx);
                running.spawn(async move {
                    let result = queued.task.execute(&ctx).await;
                    (queued.task, queued.priority, result)
                });
            }
            if running.is_empty() {
                break;
            }

            let deadline = debounce.deadline();
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    running.shutdown().await;
                    return Ok(());
                }
                joined = running.join_next() => {
                    let Some(joined) = joined else { continue };
                    let (task, priority, result) = joined
                        .map_err(|e| SyncError::Other(format!("historical task panicked: {e}")))?;
                    match result {
                        Ok(output) => {
                            if let Some(checkpoint) = self.complete(task, output)? {
                                if let Some(checkpoint) = debounce.push(checkpoint) {
                                    events.send(NetworkEvent::HistoricalCheckpoint(checkpoint)).await;
                                }
                            }
                        }
                        Err(e) if e.is_killed() || ctx.is_killed() => {
                            running.shutdown().await;
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(
                                chain_id,
                                task = task.name(),
                                error = %e,
                                "Historical task failed, retrying"
                            );
                            self.push_with_priority(task, priority);
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    if let Some(checkpoint) = debounce.flush() {
                        events.send(NetworkEvent::HistoricalCheckpoint(checkpoint)).await;
                    }
                }
            }
        }

        if ctx.is_killed() {
            return Ok(());
        }
        if let Some(checkpoint) = debounce.flush() {
            events.send(NetworkEvent::HistoricalCheckpoint(checkpoint)).await;
        }
        if let Some(finalized) = &self.finalized {
            let checkpoint = Checkpoint::block_end(finalized.timestamp, chain_id, finalized.number);
            events.send(NetworkEvent::HistoricalCheckpoint(checkpoint)).await;
        }
        tracing::info!(chain_id, "Historical sync complete");
        events.send(NetworkEvent::SyncComplete).await;
        Ok(())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
