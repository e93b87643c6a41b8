// src/utils/encoding.rs
//! Canonical credential-value encoding.
//!
//! Proof systems operate on field elements, so every attribute value is
//! carried twice in a presentation: the `raw` string and its canonical
//! numeric `encoded` form. Values that parse as 32-bit integers encode
//! to themselves; anything else encodes to the SHA-256 digest of the
//! UTF-8 bytes read as a big-endian unsigned integer, in decimal.
//!
//! Verifiers must re-derive the encoding from the raw value and compare:
//! accepting the prover's `encoded` field unchecked allows a
//! substitution attack where the proven value differs from the displayed
//! one.

use num_bigint::BigUint;
use sha2::{Digest, Sha256};

/// Computes the canonical numeric encoding of a raw attribute value.
///
/// # Arguments
/// * `raw` - The attribute value as issued
///
/// # Returns
/// Decimal string of the canonical encoding.
pub fn encode_credential_value(raw: &str) -> String {
    // Int32-range values are their own encoding
    if let Ok(int_value) = raw.trim().parse::<i32>() {
        return int_value.to_string();
    }

    let digest = Sha256::digest(raw.as_bytes());
    BigUint::from_bytes_be(&digest).to_string()
}

/// Checks that an `encoded` value is the canonical encoding of `raw`.
pub fn is_valid_credential_encoding(raw: &str, encoded: &str) -> bool {
    encode_credential_value(raw) == encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_values_encode_to_themselves() {
        assert_eq!(encode_credential_value("25"), "25");
        assert_eq!(encode_credential_value("-7"), "-7");
        assert_eq!(encode_credential_value("0"), "0");
        assert_eq!(encode_credential_value("2147483647"), "2147483647");
    }

    #[test]
    fn test_out_of_range_integers_are_hashed() {
        // One past i32::MAX no longer fits and must be hashed
        let encoded = encode_credential_value("2147483648");
        assert_ne!(encoded, "2147483648");
        assert!(encoded.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_strings_hash_to_stable_big_integers() {
        let alice = encode_credential_value("Alice");
        assert_eq!(alice, encode_credential_value("Alice"));
        assert_ne!(alice, encode_credential_value("alice"));
        // SHA-256 output interpreted as an integer is far wider than i32
        assert!(alice.len() > 20);
    }

    #[test]
    fn test_encoding_check_rejects_mismatch() {
        assert!(is_valid_credential_encoding("25", "25"));
        assert!(is_valid_credential_encoding(
            "Alice",
            &encode_credential_value("Alice")
        ));
        // A well-formed but wrong encoding must be rejected
        assert!(!is_valid_credential_encoding("Alice", "25"));
    }
}
