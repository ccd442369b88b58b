//! Receipt identifiers for the order ledger.
//!
//! A receipt is `<prefix><13-digit epoch millis><random suffix>`, with the prefix shortened
//! so the whole string fits the gateway's receipt length limit.

use chrono::{DateTime, Utc};
use rand::prelude::RngExt;

const TIMESTAMP_DIGITS: usize = 13;
const SUFFIX_LEN: usize = 6;
const SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Shortest receipt that still holds the timestamp and suffix
pub const MIN_RECEIPT_LENGTH: usize = TIMESTAMP_DIGITS + SUFFIX_LEN;

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("receipt length {max_length} is too short, at least {MIN_RECEIPT_LENGTH} characters are required")]
pub struct ReceiptLengthError {
    pub max_length: usize,
}

pub fn generate(prefix: &str, max_length: usize) -> Result<String, ReceiptLengthError> {
    generate_at(prefix, max_length, Utc::now())
}

pub fn generate_at(prefix: &str, max_length: usize, now: DateTime<Utc>) -> Result<String, ReceiptLengthError> {
    if max_length < MIN_RECEIPT_LENGTH {
        return Err(ReceiptLengthError { max_length });
    }

    let room = max_length - MIN_RECEIPT_LENGTH;
    let prefix: String = prefix.chars().take(room).collect();

    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.random_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();

    let millis = now.timestamp_millis().max(0);
    Ok(format!("{prefix}{millis:0width$}{suffix}", width = TIMESTAMP_DIGITS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_receipt_layout() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let receipt = generate_at("rcpt_", 40, now).unwrap();

        assert!(receipt.starts_with("rcpt_"));
        let stamp = &receipt[5..5 + TIMESTAMP_DIGITS];
        assert_eq!(stamp, now.timestamp_millis().to_string());
        assert_eq!(receipt.len(), 5 + TIMESTAMP_DIGITS + SUFFIX_LEN);
        assert!(receipt[5 + TIMESTAMP_DIGITS..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_long_prefix_truncated_to_fit() {
        let prefix = "a-very-long-receipt-prefix-that-will-not-fit_";
        let receipt = generate(prefix, 40).unwrap();
        assert_eq!(receipt.chars().count(), 40);
        assert!(receipt.starts_with("a-very-long-receipt-"));
    }

    #[test]
    fn test_minimum_length() {
        let receipt = generate("rcpt_", MIN_RECEIPT_LENGTH).unwrap();
        assert_eq!(receipt.len(), MIN_RECEIPT_LENGTH);
        assert_eq!(generate("rcpt_", 10), Err(ReceiptLengthError { max_length: 10 }));
    }

    #[test]
    fn test_receipts_differ() {
        let now = Utc::now();
        let a = generate_at("rcpt_", 40, now).unwrap();
        let b = generate_at("rcpt_", 40, now).unwrap();
        assert_ne!(a, b);
    }
}
