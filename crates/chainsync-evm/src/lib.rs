//! chainsync-evm: EVM sync engine.
//!
//! # Architecture
//!
//! ```text
//! SyncService
//!     ├── per network
//!     │     ├── RequestQueue      rate limit, retry, eth_getLogs split (chainsync-rpc)
//!     │     ├── HistoricalSync    chunked backfill of every source up to the finalized block
//!     │     └── RealtimeSync      head polling, reorg reconciliation, finality promotion
//!     └── Orchestrator            merges network checkpoints, pages events from the SyncStore
//! ```
//!
//! Networks are configured with [`NetworkBuilder`] and started together with
//! [`SyncService::start`], which returns the ordered [`SyncEvent`] stream.

pub mod builder;
pub mod context;
pub mod historical;
pub mod realtime;
pub mod sync;

pub use builder::{Network, NetworkBuilder};
pub use context::{NetworkContext, NetworkEvent};
pub use historical::HistoricalSync;
pub use realtime::{LocalChain, RealtimeSync, MAX_QUEUED_BLOCKS};
pub use sync::{SyncEvent, SyncService};
