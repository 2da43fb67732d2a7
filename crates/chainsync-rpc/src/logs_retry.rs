//! `eth_getLogs` range splitting.
//!
//! Providers reject log queries whose block range or result set is too
//! large, and many of them say how to fix it in the error message. This
//! module turns such a message into the sub-ranges to request instead.

use chainsync_core::interval::{get_chunks, Interval};

/// Phrases introducing a suggested `[0x…, 0x…]` range (Alchemy, Infura).
const SUGGESTED_RANGE_PHRASES: &[&str] = &[
    "this block range should work",
    "try with this block range",
    "retry with the range",
];

/// Phrases followed by a maximum block count.
const MAX_RANGE_PHRASES: &[&str] = &[
    "limited to a",
    "maximum block range",
    "max block range",
    "block range limit",
    "max range",
    "range limit",
    "range should not exceed",
];

/// Phrases that mean "too big" without saying by how much.
const TOO_LARGE_PHRASES: &[&str] = &[
    "query returned more than",
    "response size",
    "too large",
    "too wide",
    "too many results",
    "too many logs",
    "block range exceeded",
    "range exceeded",
    "range is too",
    "block range",
];

/// Throttling replies; backing off is the fix, not more requests.
const RATE_LIMIT_PHRASES: &[&str] = &["rate limit", "too many requests", "requests per second"];

/// Sub-ranges to request instead of `[from, to]`, or `None` if `message` is
/// not a range complaint. A single-block range is never split.
pub fn get_logs_retry_ranges(message: &str, from: u64, to: u64) -> Option<Vec<Interval>> {
    if from >= to {
        return None;
    }
    let lower = message.to_ascii_lowercase();
    if RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p)) {
        return None;
    }

    if let Some((hint_start, hint_end)) = suggested_range(&lower) {
        if hint_start >= from && hint_end <= to && hint_end >= hint_start && hint_end < to {
            let size = hint_end - hint_start + 1;
            return Some(get_chunks(&[(from, to)], size));
        }
    }

    if let Some(max) = max_range(&lower) {
        if max > 0 && max <= to - from {
            return Some(get_chunks(&[(from, to)], max));
        }
    }

    if TOO_LARGE_PHRASES.iter().any(|p| lower.contains(p)) {
        let mid = from + (to - from) / 2;
        return Some(vec![(from, mid), (mid + 1, to)]);
    }

    None
}

fn suggested_range(lower: &str) -> Option<(u64, u64)> {
    let phrase_end = SUGGESTED_RANGE_PHRASES
        .iter()
        .find_map(|p| lower.find(p).map(|i| i + p.len()))?;
    let rest = &lower[phrase_end..];
    let open = rest.find('[')?;
    let close = open + rest[open..].find(']')?;
    let mut parts = rest[open + 1..close].split(',').map(str::trim);
    let start = parse_hex(parts.next()?)?;
    let end = parse_hex(parts.next()?)?;
    Some((start, end))
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.strip_prefix("0x")?, 16).ok()
}

fn max_range(lower: &str) -> Option<u64> {
    let phrase_end = MAX_RANGE_PHRASES
        .iter()
        .find_map(|p| lower.find(p).map(|i| i + p.len()))?;
    let rest = &lower[phrase_end..];
    let digits_start = rest.find(|c: char| c.is_ascii_digit())?;
    // the number must follow the phrase closely
    if digits_start > 4 {
        return None;
    }
    let number: String = rest[digits_start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '_')
        .filter(char::is_ascii_digit)
        .collect();
    number.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alchemy_suggested_range() {
        let msg = "Log response size exceeded. You can make eth_getLogs requests with up to a 2K block range and no limit on the response size, or you can request any block range with a cap of 10K logs in the response. Based on your parameters, this block range should work: [0x0, 0x1f4]";
        assert_eq!(get_logs_retry_ranges(msg, 0, 1000), Some(vec![(0, 500), (501, 1000)]));
    }

    #[test]
    fn infura_suggested_range() {
        let msg = "query returned more than 10000 results. Try with this block range [0x64, 0x95].";
        assert_eq!(
            get_logs_retry_ranges(msg, 100, 200),
            Some(vec![(100, 149), (150, 199), (200, 200)])
        );
    }

    #[test]
    fn max_range_hint() {
        let msg = "eth_getLogs is limited to a 10,000 range";
        let ranges = get_logs_retry_ranges(msg, 0, 24_999).unwrap();
        assert_eq!(ranges, vec![(0, 9_999), (10_000, 19_999), (20_000, 24_999)]);

        let msg = "exceed maximum block range: 500";
        assert_eq!(get_logs_retry_ranges(msg, 0, 999).unwrap().len(), 2);
    }

    #[test]
    fn falls_back_to_halving() {
        let msg = "block range is too wide";
        assert_eq!(get_logs_retry_ranges(msg, 10, 20), Some(vec![(10, 15), (16, 20)]));
    }

    #[test]
    fn rate_limits_are_not_range_complaints() {
        assert_eq!(get_logs_retry_ranges("rate limit exceeded", 0, 1000), None);
        assert_eq!(get_logs_retry_ranges("429 Too Many Requests", 0, 1000), None);
        assert_eq!(get_logs_retry_ranges("daily request count exceeded", 0, 1000), None);
        assert_eq!(
            get_logs_retry_ranges("block range exceeded", 0, 1000),
            Some(vec![(0, 500), (501, 1000)])
        );
    }

    #[test]
    fn unrelated_or_single_block() {
        assert_eq!(get_logs_retry_ranges("header not found", 0, 100), None);
        assert_eq!(get_logs_retry_ranges("block range is too wide", 7, 7), None);
    }
}
