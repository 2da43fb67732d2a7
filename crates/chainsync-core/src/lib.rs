//! chainsync-core: foundation types of the multi-chain sync engine.
//!
//! # Architecture
//!
//! ```text
//! SyncService (chainsync-evm)
//!     ├── HistoricalSync   per network: chunked backfill → ProgressTracker / BlockProgressTracker
//!     ├── RealtimeSync     per network: head polling, bloom pre-filter, reorg reconciliation
//!     ├── RequestQueue     per network: rate limit, retry, eth_getLogs range split (chainsync-rpc)
//!     └── SyncStore        fragment interval cache + ordered events (chainsync-storage)
//! ```
//!
//! Everything is ordered by [`Checkpoint`]: a fixed-width encoding whose
//! string order is the global event order across chains.

pub mod bloom;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod fragment;
pub mod interval;
pub mod metrics;
pub mod progress;
pub mod source;
pub mod store;
pub mod types;

pub use checkpoint::Checkpoint;
pub use config::{LogConfig, NetworkConfig, SyncConfig};
pub use error::SyncError;
pub use interval::Interval;
pub use metrics::{NoopMetrics, RecordingMetrics, SyncMetrics};
pub use progress::{BlockCheckpoint, BlockProgressTracker, CheckpointUpdate, ProgressTracker};
pub use source::{Source, SourceFilter, Sources};
pub use store::{BlockData, EventKind, EventsPage, RawEvent, SyncStore};
pub use types::{Block, CallTrace, LightBlock, Log, Transaction, TransactionReceipt};
