//! Chain data types as returned by EVM JSON-RPC providers.
//!
//! Quantities arrive hex-encoded (`"0x1b4"`); they are decoded into `u64`
//! at deserialization time so the rest of the engine works with integers.
//! Hashes, addresses and byte strings stay as `0x…`
//! strings compared case-insensitively.

use serde::{Deserialize, Serialize};

// ─── LightBlock ───────────────────────────────────────────────────────────────

/// The minimal data needed to compare two chains for a reorg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightBlock {
    pub hash: String,
    pub parent_hash: String,
    #[serde(with = "quantity")]
    pub number: u64,
    #[serde(with = "quantity")]
    pub timestamp: u64,
}

impl LightBlock {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &LightBlock) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A block fetched with full transaction objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub hash: String,
    pub parent_hash: String,
    #[serde(with = "quantity")]
    pub number: u64,
    #[serde(with = "quantity")]
    pub timestamp: u64,
    /// 256-byte logs bloom (`0x` + 512 hex chars).
    #[serde(default)]
    pub logs_bloom: String,
    #[serde(default)]
    pub miner: Option<String>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn light(&self) -> LightBlock {
        LightBlock {
            hash: self.hash.clone(),
            parent_hash: self.parent_hash.clone(),
            number: self.number,
            timestamp: self.timestamp,
        }
    }

    /// Look up a transaction of this block by hash.
    pub fn transaction(&self, hash: &str) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|t| t.hash.eq_ignore_ascii_case(hash))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(with = "quantity")]
    pub transaction_index: u64,
    #[serde(with = "quantity")]
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(with = "quantity")]
    pub transaction_index: u64,
    #[serde(with = "quantity")]
    pub block_number: u64,
    pub block_hash: String,
    /// `0x1` success, `0x0` reverted. Absent on pre-byzantium receipts.
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub contract_address: Option<String>,
}

impl TransactionReceipt {
    pub fn is_reverted(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| parse_hex_u64(s) == Some(0))
            .unwrap_or(false)
    }
}

// ─── Log ──────────────────────────────────────────────────────────────────────

/// An EVM log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(with = "quantity")]
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    #[serde(with = "quantity")]
    pub transaction_index: u64,
    #[serde(with = "quantity")]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

impl Log {
    pub fn topic(&self, position: usize) -> Option<&str> {
        self.topics.get(position).map(String::as_str)
    }
}

// ─── CallTrace ────────────────────────────────────────────────────────────────

/// The `action` object of a parity-style trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAction {
    pub from: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub gas: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResult {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
}

/// A parity-style trace from `trace_filter` or `trace_block`.
///
/// `trace_index` is not part of the provider response; the sync engine
/// assigns it per block to order traces inside their checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallTrace {
    pub action: TraceAction,
    #[serde(default)]
    pub result: Option<TraceResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub block_hash: String,
    #[serde(with = "quantity")]
    pub block_number: u64,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default, with = "opt_quantity")]
    pub transaction_position: Option<u64>,
    #[serde(default)]
    pub trace_address: Vec<u64>,
    #[serde(default)]
    pub subtraces: u64,
    #[serde(rename = "type")]
    pub trace_type: String,
    #[serde(default)]
    pub trace_index: u64,
}

impl CallTrace {
    /// `true` for message calls (`type == "call"` and `callType == "call"`).
    pub fn is_call(&self) -> bool {
        self.trace_type == "call" && self.action.call_type.as_deref() == Some("call")
    }

    /// The 4-byte function selector (`0x` + 8 hex chars) of the call input.
    pub fn function_selector(&self) -> Option<&str> {
        self.action.input.get(..10)
    }
}

// ─── Hex helpers ──────────────────────────────────────────────────────────────

/// Parse a hex-encoded quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

/// Encode a quantity as `0x`-prefixed hex without leading zeros.
pub fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

/// Serde adapter for quantities sent either as hex strings or JSON numbers
/// (parity traces use plain numbers for `blockNumber`).
pub mod quantity {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(n: &u64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::to_hex(*n))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        from_value(&Value::deserialize(d)?).map_err(D::Error::custom)
    }

    pub(super) fn from_value(v: &Value) -> Result<u64, String> {
        match v {
            Value::String(s) => {
                super::parse_hex_u64(s).ok_or_else(|| format!("invalid hex quantity {s:?}"))
            }
            Value::Number(n) => n.as_u64().ok_or_else(|| format!("invalid quantity {n}")),
            other => Err(format!("expected quantity, got {other}")),
        }
    }
}

/// [`quantity`] for optional fields; `null` maps to `None`.
pub mod opt_quantity {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(n: &Option<u64>, s: S) -> Result<S::Ok, S::Error> {
        match n {
            Some(n) => s.serialize_str(&super::to_hex(*n)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u64>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            v => super::quantity::from_value(&v)
                .map(Some)
                .map_err(D::Error::custom),
        }
    }
}
