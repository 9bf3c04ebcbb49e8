//! SHA-256 content hashing.
//!
//! A deliverable is bound to its order through the SHA-256 hash of its
//! content. Text hashes over its UTF-8 bytes, binary over the raw bytes,
//! and structured values over their canonical JSON form (sorted keys,
//! minimal separators) so that key order never changes the hash.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Display;
use std::str::FromStr;

/// A SHA-256 digest as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash raw bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        ContentHash(hex::encode(digest))
    }

    /// Hash a UTF-8 string over its byte representation.
    pub fn of_str(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// Hash a structured value over its canonical JSON form.
    ///
    /// `serde_json` maps are ordered by key, and `to_string` emits minimal
    /// separators, so equal values hash equally regardless of how their
    /// keys were originally ordered.
    pub fn of_json(value: &serde_json::Value) -> Self {
        let canonical = serde_json::to_string(value).expect("JSON value serialization");
        Self::of_str(&canonical)
    }

    /// The digest as a hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Error returned when parsing a malformed content hash.
#[derive(Debug, thiserror::Error)]
#[error("Invalid content hash: expected 64 lowercase hex characters")]
pub struct ContentHashError;

impl FromStr for ContentHash {
    type Err = ContentHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            Ok(ContentHash(s.to_string()))
        } else {
            Err(ContentHashError)
        }
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
