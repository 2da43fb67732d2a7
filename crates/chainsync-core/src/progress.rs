//! Progress trackers derived from interval arithmetic.
//!
//! [`ProgressTracker`] follows one source's backfill: which part of its
//! target range is still required, and how far the contiguous completed
//! prefix reaches. [`BlockProgressTracker`] turns out-of-order block
//! completions into a monotonic per-network checkpoint.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::SyncError;
use crate::interval::{self, Interval};

/// Result of recording progress on a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointUpdate<T> {
    pub is_updated: bool,
    pub prev_checkpoint: T,
    pub new_checkpoint: T,
}

/// Completion state of a target block range.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    target: Interval,
    completed: Vec<Interval>,
    required: Vec<Interval>,
    checkpoint: Option<u64>,
}

impl ProgressTracker {
    /// Create a tracker for `target`, seeded with already completed ranges
    /// (typically read from the sync store's interval cache).
    pub fn new(target: Interval, completed: &[Interval]) -> Result<Self, SyncError> {
        if target.0 > target.1 {
            return Err(SyncError::Interval {
                start: target.0,
                end: target.1,
            });
        }
        let mut tracker = Self {
            target,
            completed: interval::union(completed),
            required: Vec::new(),
            checkpoint: None,
        };
        tracker.refresh();
        Ok(tracker)
    }

    pub fn target(&self) -> Interval {
        self.target
    }

    /// Record a completed range and report whether the checkpoint moved.
    pub fn add_completed_interval(&mut self, completed: Interval) -> CheckpointUpdate<Option<u64>> {
        let prev_checkpoint = self.checkpoint;
        self.completed.push(completed);
        self.completed = interval::union(&self.completed);
        self.refresh();
        CheckpointUpdate {
            is_updated: self.checkpoint > prev_checkpoint,
            prev_checkpoint,
            new_checkpoint: self.checkpoint,
        }
    }

    /// `target - completed`.
    pub fn required(&self) -> &[Interval] {
        &self.required
    }

    /// Every completed range recorded so far, normalised.
    pub fn completed(&self) -> &[Interval] {
        &self.completed
    }

    /// End of the completed interval covering `target.start`, or
    /// `target.start - 1` when nothing covers it. `None` only when
    /// `target.start` is block 0 and it is not yet completed.
    pub fn checkpoint(&self) -> Option<u64> {
        self.checkpoint
    }

    /// `true` once the whole target range is completed.
    pub fn is_complete(&self) -> bool {
        self.required.is_empty()
    }

    fn refresh(&mut self) {
        self.required = interval::difference(&[self.target], &self.completed);
        let start = self.target.0;
        self.checkpoint = self
            .completed
            .iter()
            .find(|(s, e)| *s <= start && *e >= start)
            .map(|&(_, end)| end)
            .or_else(|| start.checked_sub(1));
    }
}

/// A block whose completion moved the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BlockCheckpoint {
    pub block_number: u64,
    pub block_timestamp: u64,
}

/// Tracks pending vs completed blocks that finish out of order.
///
/// The checkpoint is the highest completed block `N` such that no pending
/// block `<= N` remains.
#[derive(Debug, Default)]
pub struct BlockProgressTracker {
    pending: BTreeSet<u64>,
    completed: BTreeMap<u64, u64>,
    checkpoint: Option<BlockCheckpoint>,
}

impl BlockProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> Option<BlockCheckpoint> {
        self.checkpoint
    }

    /// Number of blocks added but not yet completed.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Register blocks that will complete later. Must be strictly greater
    /// than every block added before.
    pub fn add_pending_blocks(&mut self, block_numbers: &[u64]) -> Result<(), SyncError> {
        let mut sorted = block_numbers.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let Some(&lowest) = sorted.first() else {
            return Ok(());
        };
        let floor = self
            .pending
            .last()
            .copied()
            .max(self.completed.keys().last().copied())
            .max(self.checkpoint.map(|c| c.block_number));
        if let Some(floor) = floor {
            if lowest <= floor {
                return Err(SyncError::BlockProgress {
                    block_number: lowest,
                    reason: format!("added out of order, already added block number {floor}"),
                });
            }
        }
        self.pending.extend(sorted);
        Ok(())
    }

    /// Mark a pending block completed and report whether the checkpoint moved.
    pub fn add_completed_block(
        &mut self,
        block_number: u64,
        block_timestamp: u64,
    ) -> Result<CheckpointUpdate<Option<BlockCheckpoint>>, SyncError> {
        if !self.pending.remove(&block_number) {
            return Err(SyncError::BlockProgress {
                block_number,
                reason: "not pending, add blocks as pending before completing them".into(),
            });
        }
        self.completed.insert(block_number, block_timestamp);

        let prev_checkpoint = self.checkpoint;
        let unchanged = CheckpointUpdate {
            is_updated: false,
            prev_checkpoint,
            new_checkpoint: prev_checkpoint,
        };

        let lowest_pending = self.pending.first().copied();
        if matches!(lowest_pending, Some(p) if block_number > p) {
            return Ok(unchanged);
        }

        // every completed block below the lowest pending one is now safe
        let safe: Vec<u64> = match lowest_pending {
            Some(p) => self.completed.range(..p).map(|(n, _)| *n).collect(),
            None => self.completed.keys().copied().collect(),
        };
        let Some(&highest) = safe.last() else {
            return Ok(unchanged);
        };
        let new_checkpoint = BlockCheckpoint {
            block_number: highest,
            block_timestamp: self.completed[&highest],
        };
        for n in safe {
            self.completed.remove(&n);
        }
        self.checkpoint = Some(new_checkpoint);

        Ok(CheckpointUpdate {
            is_updated: true,
            prev_checkpoint,
            new_checkpoint: self.checkpoint,
        })
    }
}
