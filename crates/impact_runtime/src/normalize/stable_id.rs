//! Sequence ID computation using BLAKE3.
//!
//! Generates identifiers for recorded test sequences from the sequence kind
//! and its start time. The same inputs always produce the same ID.

/// Computes the ID of a test sequence.
///
/// The ID is the BLAKE3 hash of `<kind>:<started_at_nanos>`, truncated to the
/// first 32 hexadecimal characters (lowercase).
pub fn sequence_id(kind: &str, started_at_nanos: u128) -> String {
    let input = format!("{kind}:{started_at_nanos}");
    let hash = blake3::hash(input.as_bytes());
    let hex = hash.to_hex();
    hex[..32].to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_input_produces_same_id() {
        assert_eq!(
            sequence_id("impact_analysis", 1_700_000_000_000),
            sequence_id("impact_analysis", 1_700_000_000_000)
        );
    }

    #[test]
    fn different_kind_produces_different_id() {
        assert_ne!(
            sequence_id("regular", 1_700_000_000_000),
            sequence_id("seeded", 1_700_000_000_000)
        );
    }

    #[test]
    fn output_is_exactly_32_lowercase_hex_chars() {
        let id = sequence_id("safe_impact_analysis", 42);
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, id.to_lowercase());
    }
}
