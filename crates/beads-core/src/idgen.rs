//! SHA256 + base36 ID generation, hierarchical child IDs, and partial ID resolution.

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Maximum number of nonces tried at a given length before growing it.
const NONCES_PER_LENGTH: i32 = 10;

/// Length beyond which generation falls back to a full 16-char hash.
const MAX_ADAPTIVE_LENGTH: usize = 8;

/// Fallback length used once `MAX_ADAPTIVE_LENGTH` is exceeded (practically never reached).
const FALLBACK_LENGTH: usize = 16;

/// Maximum depth of hierarchical dotted child IDs (`P.1.2` is depth 2, `P.1.2.3` is depth 3).
const MAX_CHILD_DEPTH: usize = 3;

/// Converts a byte slice to a base36 string of the specified length.
///
/// Matches the algorithm used for bd hash IDs.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    // Build the string in reverse.
    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        // rem is guaranteed to be < 36, so fits in a u8 index.
        let idx = rem.to_u32_digits();
        let i = if idx.is_empty() { 0 } else { idx[0] as usize };
        chars.push(BASE36_ALPHABET[i]);
    }

    // Reverse to get most-significant digit first.
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");

    // Pad with zeros if needed.
    if s.len() < length {
        let padding = "0".repeat(length - s.len());
        s = padding + &s;
    }

    // Truncate to exact length (keep least significant digits).
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }

    s
}

/// Creates a hash-based ID for an issue.
///
/// Uses base36 encoding (0-9, a-z) for better information density than hex.
/// The `length` parameter is expected to be 3-8; beyond 8 this falls back to
/// a full 16-char hash.
#[allow(clippy::too_many_arguments)]
pub fn generate_hash_id(
    prefix: &str,
    title: &str,
    description: &str,
    creator: &str,
    timestamp: DateTime<Utc>,
    workspace_id: &str,
    length: usize,
    nonce: i32,
) -> String {
    let truncated_desc: String = description.chars().take(100).collect();

    // Combine inputs into a stable content string.
    let content = format!(
        "{}|{}|{}|{}|{}|{}",
        title,
        truncated_desc,
        creator,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        workspace_id,
        nonce
    );

    let hash = Sha256::digest(content.as_bytes());

    if length > MAX_ADAPTIVE_LENGTH {
        let short_hash = encode_base36(&hash, FALLBACK_LENGTH);
        return format!("{}-{}", prefix, short_hash);
    }

    // Determine how many bytes to use based on desired output length.
    let num_bytes = match length {
        3 => 2, // 2 bytes = 16 bits ~ 3.09 base36 chars
        4 => 3, // 3 bytes = 24 bits ~ 4.63 base36 chars
        5 => 4, // 4 bytes = 32 bits ~ 6.18 base36 chars
        6 => 4, // 4 bytes = 32 bits ~ 6.18 base36 chars
        7 => 5, // 5 bytes = 40 bits ~ 7.73 base36 chars
        8 => 5, // 5 bytes = 40 bits ~ 7.73 base36 chars
        _ => 3, // default to 3 chars
    };

    let short_hash = encode_base36(&hash[..num_bytes], length);
    format!("{}-{}", prefix, short_hash)
}

/// Generates a collision-free hash ID against a set of existing IDs.
///
/// For each length starting at `min_length`, tries up to `NONCES_PER_LENGTH`
/// distinct nonces before growing the length. Stops at `max_length`; beyond
/// that, falls back to a 16-char hash (practically never reached).
#[allow(clippy::too_many_arguments)]
pub fn generate_unique_hash_id<F>(
    prefix: &str,
    title: &str,
    description: &str,
    creator: &str,
    timestamp: DateTime<Utc>,
    workspace_id: &str,
    min_length: usize,
    max_length: usize,
    exists: F,
) -> String
where
    F: Fn(&str) -> bool,
{
    for length in min_length..=max_length {
        for nonce in 0..NONCES_PER_LENGTH {
            let id = generate_hash_id(
                prefix,
                title,
                description,
                creator,
                timestamp,
                workspace_id,
                length,
                nonce,
            );
            if !exists(&id) {
                return id;
            }
        }
    }

    // Every length/nonce combination collided; fall back to a 16-char hash.
    for nonce in 0.. {
        let id = generate_hash_id(
            prefix,
            title,
            description,
            creator,
            timestamp,
            workspace_id,
            FALLBACK_LENGTH,
            nonce,
        );
        if !exists(&id) {
            return id;
        }
    }

    unreachable!("16-char hash space is exhausted, which cannot happen in practice")
}

/// Computes the collision probability using the birthday paradox approximation.
///
/// P(collision) ~ 1 - e^(-n^2 / 2N)
/// where n = number of items, N = total possible values.
fn collision_probability(num_issues: usize, id_length: usize) -> f64 {
    let total: f64 = 36.0_f64.powi(id_length as i32);
    let exponent = -(num_issues as f64).powi(2) / (2.0 * total);
    1.0 - exponent.exp()
}

/// Determines the optimal ID length for the current database size.
///
/// Tries lengths from `min_length` to `max_length`, returning the first
/// that keeps the collision probability at or below `max_collision_prob`.
pub fn compute_adaptive_length(
    num_issues: usize,
    min_length: usize,
    max_length: usize,
    max_collision_prob: f64,
) -> usize {
    for length in min_length..=max_length {
        let prob = collision_probability(num_issues, length);
        if prob <= max_collision_prob {
            return length;
        }
    }
    max_length
}

/// Default adaptive ID configuration constants.
pub mod adaptive_defaults {
    /// Default collision probability threshold (25%).
    pub const MAX_COLLISION_PROB: f64 = 0.25;
    /// Default minimum hash length.
    pub const MIN_LENGTH: usize = 3;
    /// Default maximum hash length.
    pub const MAX_LENGTH: usize = 8;
}

/// Computes the next hierarchical child ID for `parent_id`, given the parent's
/// next counter value.
///
/// Returns an error if the parent ID is already at the maximum nesting depth.
pub fn next_child_id(parent_id: &str, next_counter: u64) -> Result<String, ChildDepthError> {
    let depth = parent_id.matches('.').count() + 1;
    if depth > MAX_CHILD_DEPTH {
        return Err(ChildDepthError {
            parent_id: parent_id.to_owned(),
            max_depth: MAX_CHILD_DEPTH,
        });
    }
    Ok(format!("{}.{}", parent_id, next_counter))
}

/// Error returned when a hierarchical child ID would exceed the maximum nesting depth.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parent `{parent_id}` is already at the maximum child depth ({max_depth})")]
pub struct ChildDepthError {
    pub parent_id: String,
    pub max_depth: usize,
}

/// Outcome of resolving a partial ID against the full set of known IDs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one ID matched.
    Found(String),
    /// No ID matched.
    NotFound,
    /// More than one ID matched; candidates are returned in the order encountered.
    Ambiguous(Vec<String>),
}

/// Resolves a partial ID against the full set of known IDs.
///
/// Tries, in order: exact match, normalized-prefix match (case-insensitive,
/// ignoring hyphens), then substring match. The first strategy that yields
/// any match wins; more than one candidate at that stage is `Ambiguous`.
pub fn resolve_partial_id<'a, I>(query: &str, known_ids: I) -> Resolution
where
    I: IntoIterator<Item = &'a str>,
{
    let ids: Vec<&str> = known_ids.into_iter().collect();

    if let Some(exact) = ids.iter().find(|id| **id == query) {
        return Resolution::Found((*exact).to_owned());
    }

    let normalized_query = normalize(query);
    let prefix_matches: Vec<String> = ids
        .iter()
        .filter(|id| normalize(id).starts_with(&normalized_query))
        .map(|id| (*id).to_owned())
        .collect();
    match prefix_matches.len() {
        0 => {}
        1 => return Resolution::Found(prefix_matches.into_iter().next().unwrap()),
        _ => return Resolution::Ambiguous(prefix_matches),
    }

    let substring_matches: Vec<String> = ids
        .iter()
        .filter(|id| normalize(id).contains(&normalized_query))
        .map(|id| (*id).to_owned())
        .collect();
    match substring_matches.len() {
        0 => Resolution::NotFound,
        1 => Resolution::Found(substring_matches.into_iter().next().unwrap()),
        _ => Resolution::Ambiguous(substring_matches),
    }
}

/// Lowercases and strips hyphens, so `"BD-ABC"`, `"bd-abc"`, and `"bdabc"` compare equal.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '-')
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn encode_base36_basic() {
        // 0 bytes -> all zeros
        let result = encode_base36(&[], 4);
        assert_eq!(result, "0000");
    }

    #[test]
    fn encode_base36_length() {
        let data = [0xFF, 0xFF];
        let result = encode_base36(&data, 4);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn encode_base36_truncates() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        let result = encode_base36(&data, 3);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn generate_hash_id_format() {
        let id = generate_hash_id("bd", "Test Title", "desc", "alice", ts(), "ws1", 6, 0);
        assert!(id.starts_with("bd-"));
        // prefix "bd-" + 6 chars = 9 total
        assert_eq!(id.len(), 9);
    }

    #[test]
    fn generate_hash_id_deterministic() {
        let id1 = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 6, 0);
        let id2 = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 6, 0);
        assert_eq!(id1, id2);
    }

    #[test]
    fn generate_hash_id_nonce_changes_output() {
        let id1 = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 6, 0);
        let id2 = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 6, 1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn generate_hash_id_workspace_changes_output() {
        let id1 = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 6, 0);
        let id2 = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws2", 6, 0);
        assert_ne!(id1, id2);
    }

    #[test]
    fn generate_hash_id_long_description_is_truncated() {
        let short = "a".repeat(100);
        let long = "a".repeat(500);
        let id1 = generate_hash_id("bd", "Title", &short, "alice", ts(), "ws1", 6, 0);
        let id2 = generate_hash_id("bd", "Title", &long, "alice", ts(), "ws1", 6, 0);
        assert_eq!(id1, id2);
    }

    #[test]
    fn generate_hash_id_falls_back_beyond_max_length() {
        let id = generate_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 9, 0);
        // prefix "bd-" + 16 char fallback hash = 19 total
        assert_eq!(id.len(), 19);
    }

    #[test]
    fn adaptive_length_small_repo() {
        let len = compute_adaptive_length(10, 3, 8, 0.25);
        assert_eq!(len, 3); // 10 issues easily fits in 3 chars
    }

    #[test]
    fn adaptive_length_large_repo() {
        let len = compute_adaptive_length(100_000, 3, 8, 0.25);
        assert!(len >= 6); // 100K issues needs longer IDs
    }

    #[test]
    fn adaptive_length_capped_at_max() {
        let len = compute_adaptive_length(10_000_000, 3, 8, 0.01);
        assert_eq!(len, 8);
    }

    #[test]
    fn generate_unique_hash_id_skips_collisions() {
        let taken = std::collections::HashSet::from(["bd-000000".to_string()]);
        let id =
            generate_unique_hash_id("bd", "Title", "Desc", "alice", ts(), "ws1", 6, 8, |id| {
                taken.contains(id)
            });
        assert_ne!(id, "bd-000000");
    }

    #[test]
    fn next_child_id_appends_counter() {
        assert_eq!(next_child_id("bd-abc", 1).unwrap(), "bd-abc.1");
        assert_eq!(next_child_id("bd-abc.1", 2).unwrap(), "bd-abc.1.2");
    }

    #[test]
    fn next_child_id_rejects_past_max_depth() {
        let err = next_child_id("bd-abc.1.2.3", 4).unwrap_err();
        assert_eq!(err.parent_id, "bd-abc.1.2.3");
    }

    #[test]
    fn resolve_partial_id_exact_match() {
        let ids = vec!["bd-abc", "bd-abd", "bd-xyz"];
        assert_eq!(
            resolve_partial_id("bd-abc", ids),
            Resolution::Found("bd-abc".into())
        );
    }

    #[test]
    fn resolve_partial_id_prefix_match() {
        let ids = vec!["bd-abc123", "bd-xyz999"];
        assert_eq!(
            resolve_partial_id("bd-abc", ids),
            Resolution::Found("bd-abc123".into())
        );
    }

    #[test]
    fn resolve_partial_id_unhyphenated_prefix_match() {
        let ids = vec!["bd-abc123", "bd-xyz999"];
        assert_eq!(
            resolve_partial_id("bdabc", ids),
            Resolution::Found("bd-abc123".into())
        );
    }

    #[test]
    fn resolve_partial_id_ambiguous() {
        let ids = vec!["bd-abc123", "bd-abc999"];
        match resolve_partial_id("bd-abc", ids) {
            Resolution::Ambiguous(candidates) => assert_eq!(candidates.len(), 2),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }

    #[test]
    fn resolve_partial_id_not_found() {
        let ids = vec!["bd-abc123"];
        assert_eq!(resolve_partial_id("zzz", ids), Resolution::NotFound);
    }

    #[test]
    fn resolve_partial_id_substring_fallback() {
        let ids = vec!["bd-abc123"];
        assert_eq!(
            resolve_partial_id("c12", ids),
            Resolution::Found("bd-abc123".into())
        );
    }
}
