//! Sync configuration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::SyncError;
use crate::source::{ChildAddressLocation, Source, SourceFilter};

/// Configuration for one EVM network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name referenced by sources, e.g. `"mainnet"`.
    pub name: String,
    pub chain_id: u64,
    /// HTTP JSON-RPC endpoint.
    pub rpc_url: String,
    /// Realtime head polling interval in milliseconds.
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_max_requests_per_second")]
    pub max_requests_per_second: u32,
    /// Blocks below `head - finality_block_count` are treated as immutable.
    /// Defaults per chain id, see [`default_finality_block_count`].
    #[serde(default)]
    pub finality_block_count: Option<u64>,
    #[serde(default = "default_max_historical_task_concurrency")]
    pub max_historical_task_concurrency: usize,
    /// Maximum blocks per `eth_getLogs` chunk.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Maximum blocks per `trace_filter` chunk.
    #[serde(default = "default_max_trace_block_range")]
    pub max_trace_block_range: u64,
}

fn default_polling_interval_ms() -> u64 { 1_000 }
fn default_max_requests_per_second() -> u32 { 50 }
fn default_max_historical_task_concurrency() -> usize { 20 }
fn default_max_block_range() -> u64 { 10_000 }
fn default_max_trace_block_range() -> u64 { 10 }

/// Finality depth used when a network does not configure one.
pub fn default_finality_block_count(chain_id: u64) -> u64 {
    match chain_id {
        // ethereum mainnet, goerli, sepolia
        1 | 5 | 11_155_111 => 32,
        // polygon, mumbai
        137 | 80_001 => 100,
        // arbitrum one, arbitrum sepolia
        42_161 | 421_614 => 40,
        _ => 30,
    }
}

impl NetworkConfig {
    pub fn new(name: impl Into<String>, chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain_id,
            rpc_url: rpc_url.into(),
            polling_interval_ms: default_polling_interval_ms(),
            max_requests_per_second: default_max_requests_per_second(),
            finality_block_count: None,
            max_historical_task_concurrency: default_max_historical_task_concurrency(),
            max_block_range: default_max_block_range(),
            max_trace_block_range: default_max_trace_block_range(),
        }
    }

    pub fn finality_block_count(&self) -> u64 {
        self.finality_block_count
            .unwrap_or_else(|| default_finality_block_count(self.chain_id))
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.name.is_empty() {
            return Err(SyncError::Config("network name must not be empty".into()));
        }
        if self.rpc_url.is_empty() {
            return Err(SyncError::Config(format!("network '{}' has no rpc_url", self.name)));
        }
        let positive = [
            ("max_requests_per_second", self.max_requests_per_second as u64),
            ("max_historical_task_concurrency", self.max_historical_task_concurrency as u64),
            ("max_block_range", self.max_block_range),
            ("max_trace_block_range", self.max_trace_block_range),
            ("polling_interval_ms", self.polling_interval_ms),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(SyncError::Config(format!(
                    "network '{}': {field} must be greater than 0",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Log level per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

/// Top-level configuration: networks and the sources synced on them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub networks: Vec<NetworkConfig>,
    pub sources: Vec<Source>,
    #[serde(default)]
    pub log: LogConfig,
}

impl SyncConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(s: &str) -> Result<Self, SyncError> {
        let config: Self =
            serde_json::from_str(s).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn network(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }

    /// Sources configured for `network`.
    pub fn sources_for(&self, network: &str) -> Vec<Source> {
        self.sources
            .iter()
            .filter(|s| s.network_name == network)
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let mut names = HashSet::new();
        for network in &self.networks {
            network.validate()?;
            if !names.insert(network.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate network name '{}'",
                    network.name
                )));
            }
        }

        let mut ids = HashSet::new();
        for source in &self.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(SyncError::Config(format!("duplicate source id '{}'", source.id)));
            }
            let network = self.network(&source.network_name).ok_or_else(|| {
                SyncError::Config(format!(
                    "source '{}' references unknown network '{}'",
                    source.id, source.network_name
                ))
            })?;
            if network.chain_id != source.chain_id {
                return Err(SyncError::Config(format!(
                    "source '{}' has chain id {} but network '{}' has chain id {}",
                    source.id, source.chain_id, network.name, network.chain_id
                )));
            }
            validate_source(source)?;
        }
        Ok(())
    }
}

fn validate_source(source: &Source) -> Result<(), SyncError> {
    if let Some(end) = source.end_block {
        if source.start_block > end {
            return Err(SyncError::Config(format!(
                "source '{}': start block {} is greater than end block {end}",
                source.id, source.start_block
            )));
        }
    }
    let topics = match &source.filter {
        SourceFilter::Log(c) => c.topics.len(),
        SourceFilter::FactoryLog(c) => c.topics.len(),
        SourceFilter::Block(c) => {
            if c.interval == 0 {
                return Err(SyncError::Config(format!(
                    "source '{}': block interval must be greater than 0",
                    source.id
                )));
            }
            0
        }
        SourceFilter::CallTrace(_) | SourceFilter::FactoryCallTrace(_) => 0,
    };
    if topics > 4 {
        return Err(SyncError::Config(format!(
            "source '{}': at most 4 topic positions, got {topics}",
            source.id
        )));
    }
    if let Some(factory) = source.factory() {
        if let ChildAddressLocation::Topic(n) = factory.child_address_location {
            if !(1..=3).contains(&n) {
                return Err(SyncError::Config(format!(
                    "source '{}': child address topic must be 1, 2 or 3, got {n}",
                    source.id
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "networks": [
            { "name": "mainnet", "chain_id": 1, "rpc_url": "http://localhost:8545" },
            { "name": "optimism", "chain_id": 10, "rpc_url": "http://localhost:9545",
              "finality_block_count": 5, "max_block_range": 2000 }
        ],
        "sources": [
            { "id": "transfers", "networkName": "mainnet", "chainId": 1, "startBlock": 100,
              "filter": { "type": "log", "address": ["0xa"], "topics": [["0xt"]] } },
            { "id": "every10", "networkName": "optimism", "chainId": 10,
              "filter": { "type": "block", "interval": 10 } }
        ],
        "log": { "level": "debug" }
    }"#;

    #[test]
    fn parse_with_defaults() {
        let c = SyncConfig::from_json_str(CONFIG).unwrap();
        let mainnet = c.network("mainnet").unwrap();
        assert_eq!(mainnet.polling_interval_ms, 1_000);
        assert_eq!(mainnet.max_requests_per_second, 50);
        assert_eq!(mainnet.max_historical_task_concurrency, 20);
        assert_eq!(mainnet.max_block_range, 10_000);
        assert_eq!(mainnet.max_trace_block_range, 10);
        assert_eq!(mainnet.finality_block_count(), 32);

        let op = c.network("optimism").unwrap();
        assert_eq!(op.finality_block_count(), 5);
        assert_eq!(op.max_block_range, 2000);

        assert_eq!(c.sources_for("optimism").len(), 1);
        assert_eq!(c.log.level, "debug");
    }

    #[test]
    fn finality_defaults() {
        assert_eq!(default_finality_block_count(137), 100);
        assert_eq!(default_finality_block_count(42_161), 40);
        assert_eq!(default_finality_block_count(8453), 30);
    }

    #[test]
    fn rejects_unknown_network_and_chain_mismatch() {
        let mut c = SyncConfig::from_json_str(CONFIG).unwrap();
        c.sources[0].network_name = "base".into();
        assert!(matches!(c.validate(), Err(SyncError::Config(_))));

        let mut c = SyncConfig::from_json_str(CONFIG).unwrap();
        c.sources[0].chain_id = 10;
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_inverted_range_and_zero_interval() {
        let mut c = SyncConfig::from_json_str(CONFIG).unwrap();
        c.sources[0].end_block = Some(50);
        assert!(c.validate().is_err());

        let bad = CONFIG.replace(r#""interval": 10"#, r#""interval": 0"#);
        assert!(SyncConfig::from_json_str(&bad).is_err());
    }

    #[test]
    fn rejects_duplicates() {
        let mut c = SyncConfig::from_json_str(CONFIG).unwrap();
        c.networks[1].name = "mainnet".into();
        assert!(c.validate().is_err());

        let mut c = SyncConfig::from_json_str(CONFIG).unwrap();
        c.sources[1].id = "transfers".into();
        assert!(c.validate().is_err());
    }
}
