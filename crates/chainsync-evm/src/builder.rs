//! Fluent builder API for configuring a synced network.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainsync_evm::NetworkBuilder;
//! use chainsync_core::source::{LogFilterCriteria, Source, SourceFilter};
//!
//! let network = NetworkBuilder::new("mainnet", 1, "https://eth.llamarpc.com")
//!     .polling_interval_ms(2_000)
//!     .max_requests_per_second(25)
//!     .finality_block_count(64)
//!     .source(Source {
//!         id: "usdc-transfers".into(),
//!         network_name: "mainnet".into(),
//!         chain_id: 1,
//!         start_block: 19_000_000,
//!         end_block: None,
//!         filter: SourceFilter::Log(LogFilterCriteria {
//!             address: vec!["0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48".into()],
//!             ..Default::default()
//!         }),
//!     })
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

use chainsync_core::config::NetworkConfig;
use chainsync_core::error::SyncError;
use chainsync_core::source::Source;
use chainsync_rpc::{HttpTransport, HttpTransportConfig, RpcTransport};

/// A network ready to be handed to [`crate::SyncService::start`].
pub struct Network {
    pub config: NetworkConfig,
    pub sources: Vec<Source>,
    pub transport: Arc<dyn RpcTransport>,
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("config", &self.config)
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Network`].
pub struct NetworkBuilder {
    config: NetworkConfig,
    sources: Vec<Source>,
    transport: Option<Arc<dyn RpcTransport>>,
}

impl NetworkBuilder {
    pub fn new(name: impl Into<String>, chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self::from_config(NetworkConfig::new(name, chain_id, rpc_url))
    }

    /// Start from an existing (e.g. deserialized) config.
    pub fn from_config(config: NetworkConfig) -> Self {
        Self {
            config,
            sources: Vec::new(),
            transport: None,
        }
    }

    /// Set the realtime head polling interval in milliseconds.
    pub fn polling_interval_ms(mut self, ms: u64) -> Self {
        self.config.polling_interval_ms = ms;
        self
    }

    pub fn max_requests_per_second(mut self, rps: u32) -> Self {
        self.config.max_requests_per_second = rps;
        self
    }

    /// Override the chain's default finality depth.
    pub fn finality_block_count(mut self, blocks: u64) -> Self {
        self.config.finality_block_count = Some(blocks);
        self
    }

    pub fn max_historical_task_concurrency(mut self, tasks: usize) -> Self {
        self.config.max_historical_task_concurrency = tasks;
        self
    }

    /// Set the number of blocks per `eth_getLogs` chunk.
    pub fn max_block_range(mut self, blocks: u64) -> Self {
        self.config.max_block_range = blocks;
        self
    }

    /// Set the number of blocks per `trace_filter` chunk.
    pub fn max_trace_block_range(mut self, blocks: u64) -> Self {
        self.config.max_trace_block_range = blocks;
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = Source>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Use `transport` instead of an HTTP client for `rpc_url`.
    pub fn transport(mut self, transport: Arc<dyn RpcTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the `NetworkConfig` only.
    pub fn build_config(self) -> NetworkConfig {
        self.config
    }

    /// Validate and build the network.
    pub fn build(self) -> Result<Network, SyncError> {
        self.config.validate()?;
        for source in &self.sources {
            if source.network_name != self.config.name || source.chain_id != self.config.chain_id {
                return Err(SyncError::Config(format!(
                    "source '{}' belongs to network '{}' (chain {}), not '{}' (chain {})",
                    source.id,
                    source.network_name,
                    source.chain_id,
                    self.config.name,
                    self.config.chain_id
                )));
            }
        }

        let transport = match self.transport {
            Some(transport) => transport,
            None => {
                let http = HttpTransport::new(self.config.rpc_url.clone(), HttpTransportConfig::default())
                    .map_err(|e| SyncError::Config(e.to_string()))?;
                Arc::new(http)
            }
        };

        Ok(Network {
            config: self.config,
            sources: self.sources,
            transport,
        })
    }
}
