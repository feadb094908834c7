//! Deterministic request fingerprints.
//!
//! A fingerprint is the SHA-256 digest of a normalized request:
//!
//! - description: trimmed, internal whitespace collapsed, lowercased
//! - sheet name: trimmed, case preserved
//! - each column, in order: tag lowercased, column letters uppercased,
//!   header trimmed, kind, samples verbatim
//! - parameters rendered with four decimals
//! - model name
//!
//! Every field is length-prefixed before hashing so that adjacent fields can
//! never run together into the same byte stream.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Request;

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// Cache key derived from a normalized [`Request`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint a request for the given model.
    pub fn of(request: &Request, model: &str) -> Self {
        let mut hasher = Sha256::new();
        let mut field = |value: &str| {
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        };

        field(&normalize_description(request.description()));
        field(request.sheet_name().map(str::trim).unwrap_or(""));
        field(&request.columns().len().to_string());
        for column in request.columns() {
            field(&column.tag.trim().to_lowercase());
            field(&column.column.trim().to_uppercase());
            field(column.header.as_deref().map(str::trim).unwrap_or(""));
            field(column.kind.as_str());
            field(&column.samples.len().to_string());
            for sample in &column.samples {
                field(sample);
            }
        }
        let params = request.model_parameters();
        field(&format!("{:.4}", params.temperature));
        field(&format!("{:.4}", params.top_p));
        field(model);

        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a hex fingerprint, e.g. a key read back from the cache file.
    ///
    /// Returns `None` unless the string is exactly 64 lowercase hex digits.
    pub fn parse(hex_digest: &str) -> Option<Self> {
        let well_formed = hex_digest.len() == FINGERPRINT_HEX_LEN
            && hex_digest
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(hex_digest.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim, collapse runs of whitespace and lowercase.
pub fn normalize_description(description: &str) -> String {
    description
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
