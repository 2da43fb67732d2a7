//! Logs bloom pre-filter.
//!
//! The bloom can only prove that a block has *no* matching log. An all-zero
//! bloom is treated as "unknown" (some providers return it for every block),
//! so it never allows a log fetch to be skipped.

use tiny_keccak::{Hasher, Keccak};

use crate::error::SyncError;

const BLOOM_BYTES: usize = 256;

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut out);
    out
}

/// A 2048-bit Ethereum logs bloom.
#[derive(Clone, PartialEq, Eq)]
pub struct Bloom([u8; BLOOM_BYTES]);

impl std::fmt::Debug for Bloom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bloom(0x{})", hex::encode(self.0))
    }
}

impl Bloom {
    pub fn from_hex(s: &str) -> Result<Self, SyncError> {
        let raw = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| SyncError::invalid_response("logsBloom", e.to_string()))?;
        let bytes: [u8; BLOOM_BYTES] = raw.try_into().map_err(|raw: Vec<u8>| {
            SyncError::invalid_response(
                "logsBloom",
                format!("expected {BLOOM_BYTES} bytes, got {}", raw.len()),
            )
        })?;
        Ok(Self(bytes))
    }

    /// `0x`-prefixed hex, the form blocks carry in `logsBloom`.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Set the three bits for `input`.
    pub fn accrue(&mut self, input: &[u8]) {
        for (byte, mask) in bit_positions(input) {
            self.0[byte] |= mask;
        }
    }

    /// `true` if `input` may have been added to the bloom.
    pub fn contains(&self, input: &[u8]) -> bool {
        bit_positions(input)
            .iter()
            .all(|&(byte, mask)| self.0[byte] & mask != 0)
    }

    /// `true` if any `0x` hex value of `values` may be in the bloom.
    fn contains_any_hex(&self, values: &[String]) -> bool {
        values.iter().any(|v| match hex::decode(v.strip_prefix("0x").unwrap_or(v)) {
            Ok(bytes) => self.contains(&bytes),
            // an undecodable value cannot be ruled out
            Err(_) => true,
        })
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Self([0u8; BLOOM_BYTES])
    }
}

/// Three 11-bit indexes taken from byte pairs 0-1, 2-3, 4-5 of the hash.
fn bit_positions(input: &[u8]) -> [(usize, u8); 3] {
    let hash = keccak256(input);
    let mut out = [(0usize, 0u8); 3];
    for (slot, i) in [0usize, 2, 4].into_iter().enumerate() {
        let bit = ((hash[i] as usize) << 8 | hash[i + 1] as usize) & 2047;
        out[slot] = (BLOOM_BYTES - 1 - bit / 8, 1u8 << (bit % 8));
    }
    out
}

/// `true` unless the bloom proves no log can match.
///
/// `addresses == None` means any address (including factory sources whose
/// child set is too large to test). Every non-empty topic position must have
/// at least one alternative in the bloom.
pub fn is_filter_in_bloom(bloom: &Bloom, addresses: Option<&[String]>, topics: &[Vec<String>]) -> bool {
    if bloom.is_zero() {
        return true;
    }
    let address_ok = match addresses {
        None => true,
        Some(list) => bloom.contains_any_hex(list),
    };
    address_ok
        && topics
            .iter()
            .all(|alternatives| alternatives.is_empty() || bloom.contains_any_hex(alternatives))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
    const TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

    fn bloom_with(values: &[&str]) -> Bloom {
        let mut b = Bloom::default();
        for v in values {
            b.accrue(&hex::decode(v.trim_start_matches("0x")).unwrap());
        }
        b
    }

    #[test]
    fn zero_bloom_must_fetch() {
        let b = Bloom::default();
        assert!(b.is_zero());
        assert!(is_filter_in_bloom(&b, Some(&[ADDRESS.to_string()]), &[]));
    }

    #[test]
    fn matching_address_and_topic() {
        let b = bloom_with(&[ADDRESS, TOPIC]);
        assert!(is_filter_in_bloom(
            &b,
            Some(&[ADDRESS.to_string()]),
            &[vec![TOPIC.to_string()]]
        ));
    }

    #[test]
    fn absent_address_is_ruled_out() {
        let b = bloom_with(&[TOPIC]);
        let other = "0x0000000000000000000000000000000000000001".to_string();
        assert!(!is_filter_in_bloom(&b, Some(&[other]), &[]));
        assert!(is_filter_in_bloom(&b, None, &[vec![TOPIC.to_string()]]));
    }

    #[test]
    fn every_topic_position_must_match() {
        let b = bloom_with(&[ADDRESS, TOPIC]);
        let missing = format!("0x{}", "11".repeat(32));
        assert!(!is_filter_in_bloom(&b, None, &[vec![TOPIC.to_string()], vec![missing.clone()]]));
        assert!(is_filter_in_bloom(&b, None, &[vec![missing, TOPIC.to_string()], vec![]]));
    }

    #[test]
    fn hex_round_trip() {
        let b = bloom_with(&[ADDRESS]);
        assert_eq!(Bloom::from_hex(&b.to_hex()).unwrap(), b);
        assert!(Bloom::from_hex("0x00").is_err());
    }
}
