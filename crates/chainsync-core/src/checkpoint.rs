//! Checkpoint codec: the total order over events from every chain.
//!
//! A checkpoint is encoded as fixed-width, zero-padded decimal fields
//! concatenated in priority order, so that plain string comparison of two
//! encoded checkpoints equals their semantic comparison:
//!
//! ```text
//! | timestamp (10) | chain id (16) | block (16) | tx index (16) | type (1) | event index (16) |
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

const BLOCK_TIMESTAMP_DIGITS: usize = 10;
const CHAIN_ID_DIGITS: usize = 16;
const BLOCK_NUMBER_DIGITS: usize = 16;
const TRANSACTION_INDEX_DIGITS: usize = 16;
const EVENT_TYPE_DIGITS: usize = 1;
const EVENT_INDEX_DIGITS: usize = 16;

/// Length of an encoded checkpoint string.
pub const ENCODED_CHECKPOINT_LENGTH: usize = BLOCK_TIMESTAMP_DIGITS
    + CHAIN_ID_DIGITS
    + BLOCK_NUMBER_DIGITS
    + TRANSACTION_INDEX_DIGITS
    + EVENT_TYPE_DIGITS
    + EVENT_INDEX_DIGITS;

/// Event type discriminants used to break ties between event kinds inside
/// one block.
pub mod event_type {
    pub const BLOCK: u8 = 5;
    pub const LOG: u8 = 5;
    pub const CALL_TRACE: u8 = 7;
}

/// A position in the merged multi-chain event stream.
///
/// The derived `Ord` is field-lexicographic, which is exactly the order of
/// the encoded strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub block_timestamp: u64,
    pub chain_id: u64,
    pub block_number: u64,
    pub transaction_index: u64,
    pub event_type: u8,
    pub event_index: u64,
}

impl Checkpoint {
    pub const ZERO: Checkpoint = Checkpoint {
        block_timestamp: 0,
        chain_id: 0,
        block_number: 0,
        transaction_index: 0,
        event_type: 0,
        event_index: 0,
    };

    pub const MAX: Checkpoint = Checkpoint {
        block_timestamp: 9_999_999_999,
        chain_id: 2_147_483_647,
        block_number: 9_999_999_999_999_999,
        transaction_index: 9_999_999_999_999_999,
        event_type: 9,
        event_index: 9_999_999_999_999_999,
    };

    /// The checkpoint that sorts after every event of the given block.
    pub fn block_end(block_timestamp: u64, chain_id: u64, block_number: u64) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            ..Self::MAX
        }
    }

    /// Checkpoint of a block event (after every log and trace of the block).
    pub fn for_block(block_timestamp: u64, chain_id: u64, block_number: u64) -> Self {
        Self {
            block_timestamp,
            chain_id,
            block_number,
            transaction_index: Self::MAX.transaction_index,
            event_type: event_type::BLOCK,
            event_index: 0,
        }
    }

    /// Encode to the fixed-width decimal representation.
    ///
    /// Fails if `event_type` is not a single digit or any field does not fit
    /// its width.
    pub fn encode(&self) -> Result<String, SyncError> {
        if self.event_type > 9 {
            return Err(SyncError::Checkpoint(format!(
                "got invalid event type {}, expected a number from 0 to 9",
                self.event_type
            )));
        }
        let mut out = String::with_capacity(ENCODED_CHECKPOINT_LENGTH);
        push_padded(&mut out, "block timestamp", self.block_timestamp, BLOCK_TIMESTAMP_DIGITS)?;
        push_padded(&mut out, "chain id", self.chain_id, CHAIN_ID_DIGITS)?;
        push_padded(&mut out, "block number", self.block_number, BLOCK_NUMBER_DIGITS)?;
        push_padded(
            &mut out,
            "transaction index",
            self.transaction_index,
            TRANSACTION_INDEX_DIGITS,
        )?;
        push_padded(&mut out, "event type", self.event_type as u64, EVENT_TYPE_DIGITS)?;
        push_padded(&mut out, "event index", self.event_index, EVENT_INDEX_DIGITS)?;
        Ok(out)
    }

    /// Decode an encoded checkpoint. Exact inverse of [`Checkpoint::encode`].
    pub fn decode(encoded: &str) -> Result<Self, SyncError> {
        if encoded.len() != ENCODED_CHECKPOINT_LENGTH || !encoded.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SyncError::Checkpoint(format!(
                "expected {ENCODED_CHECKPOINT_LENGTH} decimal digits, got {encoded:?}"
            )));
        }
        let mut rest = encoded;
        let mut take = |width: usize| -> Result<u64, SyncError> {
            let (field, tail) = rest.split_at(width);
            rest = tail;
            field
                .parse::<u64>()
                .map_err(|e| SyncError::Checkpoint(e.to_string()))
        };
        Ok(Self {
            block_timestamp: take(BLOCK_TIMESTAMP_DIGITS)?,
            chain_id: take(CHAIN_ID_DIGITS)?,
            block_number: take(BLOCK_NUMBER_DIGITS)?,
            transaction_index: take(TRANSACTION_INDEX_DIGITS)?,
            event_type: take(EVENT_TYPE_DIGITS)? as u8,
            event_index: take(EVENT_INDEX_DIGITS)?,
        })
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            self.block_timestamp,
            self.chain_id,
            self.block_number,
            self.transaction_index,
            self.event_type,
            self.event_index
        )
    }
}

fn push_padded(out: &mut String, field: &str, value: u64, width: usize) -> Result<(), SyncError> {
    let digits = value.to_string();
    if digits.len() > width {
        return Err(SyncError::Checkpoint(format!(
            "{field} {value} does not fit in {width} digits"
        )));
    }
    for _ in digits.len()..width {
        out.push('0');
    }
    out.push_str(&digits);
    Ok(())
}

/// Returns `true` if `a` sorts strictly after `b`.
pub fn is_greater_than(a: &Checkpoint, b: &Checkpoint) -> Result<bool, SyncError> {
    Ok(a.encode()? > b.encode()?)
}

/// Returns `true` if `a` and `b` encode to the same position.
pub fn is_equal(a: &Checkpoint, b: &Checkpoint) -> Result<bool, SyncError> {
    Ok(a.encode()? == b.encode()?)
}

/// The smallest of the given checkpoints, `None` for an empty input.
pub fn min<'a>(checkpoints: impl IntoIterator<Item = &'a Checkpoint>) -> Option<Checkpoint> {
    checkpoints.into_iter().min().copied()
}

/// The largest of the given checkpoints, `None` for an empty input.
pub fn max<'a>(checkpoints: impl IntoIterator<Item = &'a Checkpoint>) -> Option<Checkpoint> {
    checkpoints.into_iter().max().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cp(ts: u64, chain: u64, block: u64, tx: u64, kind: u8, idx: u64) -> Checkpoint {
        Checkpoint {
            block_timestamp: ts,
            chain_id: chain,
            block_number: block,
            transaction_index: tx,
            event_type: kind,
            event_index: idx,
        }
    }

    #[test]
    fn encode_is_fixed_width() {
        let encoded = cp(1, 1, 1, 1, 5, 1).encode().unwrap();
        assert_eq!(encoded.len(), ENCODED_CHECKPOINT_LENGTH);
        assert_eq!(&encoded[..10], "0000000001");
        assert_eq!(Checkpoint::ZERO.encode().unwrap(), "0".repeat(75));
    }

    #[test]
    fn decode_inverts_encode() {
        for c in [
            Checkpoint::ZERO,
            Checkpoint::MAX,
            cp(1_700_000_000, 10, 120_000_000, 3, event_type::LOG, 42),
            Checkpoint::block_end(1_700_000_012, 8453, 17),
            Checkpoint::for_block(5, 1, 2),
        ] {
            assert_eq!(Checkpoint::decode(&c.encode().unwrap()).unwrap(), c);
        }
    }

    #[test]
    fn string_order_matches_field_order() {
        let samples = [
            cp(10, 1, 5, 0, 5, 0),
            cp(10, 1, 5, 0, 5, 1),
            cp(10, 1, 5, 0, 7, 0),
            cp(10, 1, 5, 1, 5, 0),
            cp(10, 1, 6, 0, 5, 0),
            cp(10, 2, 0, 0, 5, 0),
            cp(11, 1, 0, 0, 5, 0),
            cp(9, 999, 999_999, 999, 9, 999),
        ];
        for a in &samples {
            for b in &samples {
                let by_string = a.encode().unwrap().cmp(&b.encode().unwrap());
                assert_eq!(by_string, a.cmp(b), "{a} vs {b}");
                assert_eq!(is_greater_than(a, b).unwrap(), a > b);
                assert_eq!(is_equal(a, b).unwrap(), a == b);
            }
        }
    }

    #[test]
    fn rejects_invalid_event_type() {
        assert!(cp(1, 1, 1, 1, 10, 1).encode().is_err());
    }

    #[test]
    fn rejects_overflowing_field() {
        assert!(cp(10_000_000_000, 1, 1, 1, 5, 1).encode().is_err());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Checkpoint::decode("123").is_err());
        assert!(Checkpoint::decode(&"x".repeat(75)).is_err());
    }

    #[test]
    fn min_and_max() {
        let a = cp(10, 1, 5, 0, 5, 0);
        let b = cp(9, 5, 5, 0, 5, 0);
        assert_eq!(min([&a, &b]), Some(b));
        assert_eq!(max([&a, &b]), Some(a));
        assert_eq!(min(std::iter::empty::<&Checkpoint>()), None);
    }

    #[test]
    fn block_end_sorts_after_block_events() {
        let end = Checkpoint::block_end(100, 1, 7);
        let log = cp(100, 1, 7, 200, event_type::LOG, 3);
        let block = Checkpoint::for_block(100, 1, 7);
        assert!(end > log);
        assert!(end > block);
        assert!(block > log);
        assert!(Checkpoint::block_end(100, 1, 6) < log);
    }
}
