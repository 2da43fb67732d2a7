//! Source model: what to sync, where, and from which block.
//!
//! A [`Source`] is immutable once configured. Its [`SourceFilter`] is a closed
//! enum; every consumer matches on it exhaustively so adding a kind is a
//! compile error everywhere it must be handled.

use serde::{Deserialize, Serialize};

use crate::types::{CallTrace, Log};

// ─── Source ───────────────────────────────────────────────────────────────────

/// A named unit of sync work on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub network_name: String,
    pub chain_id: u64,
    #[serde(default)]
    pub start_block: u64,
    /// Inclusive; `None` keeps syncing in realtime.
    #[serde(default)]
    pub end_block: Option<u64>,
    pub filter: SourceFilter,
}

/// The five source kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceFilter {
    Log(LogFilterCriteria),
    FactoryLog(FactoryLogFilterCriteria),
    CallTrace(TraceFilterCriteria),
    FactoryCallTrace(FactoryTraceFilterCriteria),
    Block(BlockFilterCriteria),
}

impl Source {
    /// `true` if `block_number` lies within `[start_block, end_block]`.
    pub fn contains_block(&self, block_number: u64) -> bool {
        block_number >= self.start_block && self.end_block.map_or(true, |end| block_number <= end)
    }

    /// The factory this source depends on, if any.
    pub fn factory(&self) -> Option<&FactoryCriteria> {
        match &self.filter {
            SourceFilter::FactoryLog(f) => Some(&f.factory),
            SourceFilter::FactoryCallTrace(f) => Some(&f.factory),
            SourceFilter::Log(_) | SourceFilter::CallTrace(_) | SourceFilter::Block(_) => None,
        }
    }
}

// ─── Criteria ─────────────────────────────────────────────────────────────────

/// Log criteria. An empty list at any position is a wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilterCriteria {
    #[serde(default)]
    pub address: Vec<String>,
    /// Up to four topic positions, each a list of alternatives.
    #[serde(default)]
    pub topics: Vec<Vec<String>>,
    #[serde(default)]
    pub include_transaction_receipts: bool,
}

impl LogFilterCriteria {
    pub fn matches(&self, log: &Log) -> bool {
        matches_any(&self.address, &log.address) && matches_topics(&self.topics, log)
    }
}

/// Where a factory's creation event stores the child contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChildAddressLocation {
    /// Indexed parameter at `topics[n]`, `n` in `1..=3`.
    Topic(u8),
    /// Non-indexed parameter at this byte offset of `data`.
    Offset(usize),
}

/// A parent contract whose events announce child contracts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryCriteria {
    pub address: String,
    /// `topic0` of the creation event.
    pub event_selector: String,
    pub child_address_location: ChildAddressLocation,
}

impl FactoryCriteria {
    /// `true` if `log` is a creation event emitted by this factory.
    pub fn matches_creation_log(&self, log: &Log) -> bool {
        log.address.eq_ignore_ascii_case(&self.address)
            && log
                .topic(0)
                .is_some_and(|t| t.eq_ignore_ascii_case(&self.event_selector))
    }

    /// Extract the lowercase child address from a creation log.
    pub fn child_address(&self, log: &Log) -> Option<String> {
        let word = match self.child_address_location {
            ChildAddressLocation::Topic(n) => log.topic(n as usize)?.strip_prefix("0x")?,
            ChildAddressLocation::Offset(offset) => {
                let data = log.data.strip_prefix("0x")?;
                data.get(offset * 2..offset * 2 + 64)?
            }
        };
        // the address is the low 20 bytes of the 32-byte word
        let hex = word.get(word.len().checked_sub(40)?..)?;
        Some(format!("0x{}", hex.to_ascii_lowercase()))
    }

    /// Log criteria selecting this factory's creation events.
    pub fn creation_log_criteria(&self) -> LogFilterCriteria {
        LogFilterCriteria {
            address: vec![self.address.clone()],
            topics: vec![vec![self.event_selector.clone()]],
            include_transaction_receipts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryLogFilterCriteria {
    pub factory: FactoryCriteria,
    #[serde(default)]
    pub topics: Vec<Vec<String>>,
    #[serde(default)]
    pub include_transaction_receipts: bool,
}

impl FactoryLogFilterCriteria {
    /// `is_child` answers whether an address is a known child at the log's block.
    pub fn matches(&self, log: &Log, is_child: impl Fn(&str, u64) -> bool) -> bool {
        matches_topics(&self.topics, log) && is_child(&log.address, log.block_number)
    }
}

/// Call trace criteria. Empty lists are wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceFilterCriteria {
    #[serde(default)]
    pub from_address: Vec<String>,
    #[serde(default)]
    pub to_address: Vec<String>,
    /// 4-byte selectors, `0x` + 8 hex chars.
    #[serde(default)]
    pub function_selectors: Vec<String>,
}

impl TraceFilterCriteria {
    pub fn matches(&self, trace: &CallTrace) -> bool {
        trace.is_call()
            && matches_any(&self.from_address, &trace.action.from)
            && trace
                .action
                .to
                .as_deref()
                .is_some_and(|to| matches_any(&self.to_address, to))
            && matches_selector(&self.function_selectors, trace)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryTraceFilterCriteria {
    pub factory: FactoryCriteria,
    #[serde(default)]
    pub from_address: Vec<String>,
    #[serde(default)]
    pub function_selectors: Vec<String>,
}

impl FactoryTraceFilterCriteria {
    pub fn matches(&self, trace: &CallTrace, is_child: impl Fn(&str, u64) -> bool) -> bool {
        trace.is_call()
            && matches_any(&self.from_address, &trace.action.from)
            && trace
                .action
                .to
                .as_deref()
                .is_some_and(|to| is_child(to, trace.block_number))
            && matches_selector(&self.function_selectors, trace)
    }
}

/// Fires on every block where `(number - offset) % interval == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockFilterCriteria {
    pub interval: u64,
    #[serde(default)]
    pub offset: u64,
}

impl BlockFilterCriteria {
    pub fn matches(&self, block_number: u64) -> bool {
        self.interval > 0
            && block_number >= self.offset
            && (block_number - self.offset) % self.interval == 0
    }
}

fn matches_any(alternatives: &[String], value: &str) -> bool {
    alternatives.is_empty() || alternatives.iter().any(|a| a.eq_ignore_ascii_case(value))
}

fn matches_topics(topics: &[Vec<String>], log: &Log) -> bool {
    topics.iter().enumerate().all(|(i, alternatives)| {
        alternatives.is_empty() || log.topic(i).is_some_and(|t| matches_any(alternatives, t))
    })
}

fn matches_selector(selectors: &[String], trace: &CallTrace) -> bool {
    selectors.is_empty()
        || trace
            .function_selector()
            .is_some_and(|s| matches_any(selectors, s))
}

// ─── Sources ──────────────────────────────────────────────────────────────────

/// A source list partitioned by kind.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub log: Vec<Source>,
    pub factory_log: Vec<Source>,
    pub call_trace: Vec<Source>,
    pub factory_call_trace: Vec<Source>,
    pub block: Vec<Source>,
}

impl Sources {
    pub fn partition<'a>(sources: impl IntoIterator<Item = &'a Source>) -> Self {
        let mut out = Self::default();
        for source in sources {
            let bucket = match source.filter {
                SourceFilter::Log(_) => &mut out.log,
                SourceFilter::FactoryLog(_) => &mut out.factory_log,
                SourceFilter::CallTrace(_) => &mut out.call_trace,
                SourceFilter::FactoryCallTrace(_) => &mut out.factory_call_trace,
                SourceFilter::Block(_) => &mut out.block,
            };
            bucket.push(source.clone());
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.log
            .iter()
            .chain(&self.factory_log)
            .chain(&self.call_trace)
            .chain(&self.factory_call_trace)
            .chain(&self.block)
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn has_call_traces(&self) -> bool {
        !self.call_trace.is_empty() || !self.factory_call_trace.is_empty()
    }

    /// Distinct factories referenced by the factory sources.
    pub fn factories(&self) -> Vec<FactoryCriteria> {
        let mut out: Vec<FactoryCriteria> = Vec::new();
        for f in self.iter().filter_map(Source::factory) {
            if !out.contains(f) {
                out.push(f.clone());
            }
        }
        out
    }
}
