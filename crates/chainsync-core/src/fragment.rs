//! Fragments: single-valued decompositions of filters.
//!
//! A filter with several address/topic alternatives is split into the
//! cartesian product of single-valued fragments. Synced intervals are stored
//! per fragment, so two filters that share an alternative share its cache.
//! The cached intervals of a whole filter are the intersection of its
//! fragments' intervals.

use std::fmt;

use crate::source::{
    BlockFilterCriteria, ChildAddressLocation, FactoryCriteria, FactoryLogFilterCriteria,
    FactoryTraceFilterCriteria, LogFilterCriteria, TraceFilterCriteria,
};

const TOPIC_POSITIONS: usize = 4;

/// One single-valued sub-filter. `None` means "any".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fragment {
    Log {
        chain_id: u64,
        address: Option<String>,
        topics: [Option<String>; TOPIC_POSITIONS],
        include_transaction_receipts: bool,
    },
    FactoryLog {
        chain_id: u64,
        factory: String,
        event_selector: String,
        child_address_location: String,
        topics: [Option<String>; TOPIC_POSITIONS],
        include_transaction_receipts: bool,
    },
    Trace {
        chain_id: u64,
        from_address: Option<String>,
        to_address: Option<String>,
        function_selector: Option<String>,
    },
    FactoryTrace {
        chain_id: u64,
        factory: String,
        event_selector: String,
        child_address_location: String,
        from_address: Option<String>,
        function_selector: Option<String>,
    },
    Block {
        chain_id: u64,
        interval: u64,
        offset: u64,
    },
}

impl Fragment {
    /// Stable string key used by stores.
    pub fn id(&self) -> String {
        self.to_string()
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Fragment::Log { chain_id, .. }
            | Fragment::FactoryLog { chain_id, .. }
            | Fragment::Trace { chain_id, .. }
            | Fragment::FactoryTrace { chain_id, .. }
            | Fragment::Block { chain_id, .. } => *chain_id,
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "null".into());
        let topics = |t: &[Option<String>; TOPIC_POSITIONS]| {
            t.iter().map(opt).collect::<Vec<_>>().join("_")
        };
        match self {
            Fragment::Log {
                chain_id,
                address,
                topics: t,
                include_transaction_receipts,
            } => write!(
                f,
                "log_{chain_id}_{}_{}_{}",
                opt(address),
                topics(t),
                *include_transaction_receipts as u8
            ),
            Fragment::FactoryLog {
                chain_id,
                factory,
                event_selector,
                child_address_location,
                topics: t,
                include_transaction_receipts,
            } => write!(
                f,
                "factorylog_{chain_id}_{factory}_{event_selector}_{child_address_location}_{}_{}",
                topics(t),
                *include_transaction_receipts as u8
            ),
            Fragment::Trace {
                chain_id,
                from_address,
                to_address,
                function_selector,
            } => write!(
                f,
                "trace_{chain_id}_{}_{}_{}",
                opt(from_address),
                opt(to_address),
                opt(function_selector)
            ),
            Fragment::FactoryTrace {
                chain_id,
                factory,
                event_selector,
                child_address_location,
                from_address,
                function_selector,
            } => write!(
                f,
                "factorytrace_{chain_id}_{factory}_{event_selector}_{child_address_location}_{}_{}",
                opt(from_address),
                opt(function_selector)
            ),
            Fragment::Block {
                chain_id,
                interval,
                offset,
            } => write!(f, "block_{chain_id}_{interval}_{offset}"),
        }
    }
}

/// Expand a list of alternatives: empty means a single wildcard.
fn alternatives(values: &[String]) -> Vec<Option<String>> {
    if values.is_empty() {
        vec![None]
    } else {
        let mut out: Vec<Option<String>> =
            values.iter().map(|v| Some(v.to_ascii_lowercase())).collect();
        out.sort();
        out.dedup();
        out
    }
}

fn topic_product(topics: &[Vec<String>]) -> Vec<[Option<String>; TOPIC_POSITIONS]> {
    let mut out: Vec<[Option<String>; TOPIC_POSITIONS]> = vec![Default::default()];
    for position in 0..TOPIC_POSITIONS {
        let values = topics.get(position).map(Vec::as_slice).unwrap_or(&[]);
        let alts = alternatives(values);
        out = out
            .into_iter()
            .flat_map(|prefix| {
                alts.iter().map(move |alt| {
                    let mut next = prefix.clone();
                    next[position] = alt.clone();
                    next
                })
            })
            .collect();
    }
    out
}

fn location_key(location: ChildAddressLocation) -> String {
    match location {
        ChildAddressLocation::Topic(n) => format!("topic{n}"),
        ChildAddressLocation::Offset(o) => format!("offset{o}"),
    }
}

fn factory_key(factory: &FactoryCriteria) -> (String, String, String) {
    (
        factory.address.to_ascii_lowercase(),
        factory.event_selector.to_ascii_lowercase(),
        location_key(factory.child_address_location),
    )
}

pub fn log_filter_fragments(chain_id: u64, criteria: &LogFilterCriteria) -> Vec<Fragment> {
    let mut out = Vec::new();
    for address in alternatives(&criteria.address) {
        for topics in topic_product(&criteria.topics) {
            out.push(Fragment::Log {
                chain_id,
                address: address.clone(),
                topics,
                include_transaction_receipts: criteria.include_transaction_receipts,
            });
        }
    }
    out
}

pub fn factory_log_filter_fragments(
    chain_id: u64,
    criteria: &FactoryLogFilterCriteria,
) -> Vec<Fragment> {
    let (factory, event_selector, child_address_location) = factory_key(&criteria.factory);
    topic_product(&criteria.topics)
        .into_iter()
        .map(|topics| Fragment::FactoryLog {
            chain_id,
            factory: factory.clone(),
            event_selector: event_selector.clone(),
            child_address_location: child_address_location.clone(),
            topics,
            include_transaction_receipts: criteria.include_transaction_receipts,
        })
        .collect()
}

pub fn trace_filter_fragments(chain_id: u64, criteria: &TraceFilterCriteria) -> Vec<Fragment> {
    let mut out = Vec::new();
    for from_address in alternatives(&criteria.from_address) {
        for to_address in alternatives(&criteria.to_address) {
            for function_selector in alternatives(&criteria.function_selectors) {
                out.push(Fragment::Trace {
                    chain_id,
                    from_address: from_address.clone(),
                    to_address: to_address.clone(),
                    function_selector,
                });
            }
        }
    }
    out
}

pub fn factory_trace_filter_fragments(
    chain_id: u64,
    criteria: &FactoryTraceFilterCriteria,
) -> Vec<Fragment> {
    let (factory, event_selector, child_address_location) = factory_key(&criteria.factory);
    let mut out = Vec::new();
    for from_address in alternatives(&criteria.from_address) {
        for function_selector in alternatives(&criteria.function_selectors) {
            out.push(Fragment::FactoryTrace {
                chain_id,
                factory: factory.clone(),
                event_selector: event_selector.clone(),
                child_address_location: child_address_location.clone(),
                from_address: from_address.clone(),
                function_selector,
            });
        }
    }
    out
}

pub fn block_filter_fragments(chain_id: u64, criteria: &BlockFilterCriteria) -> Vec<Fragment> {
    vec![Fragment::Block {
        chain_id,
        interval: criteria.interval,
        offset: criteria.offset,
    }]
}
