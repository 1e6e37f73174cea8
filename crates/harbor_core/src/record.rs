//! The stored record format.

use serde::{Deserialize, Serialize};

/// A value as persisted by the key-value store.
///
/// Serialized as camelCase JSON with `value` base64-encoded, then optionally
/// sealed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// The stored bytes.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    /// Write time in epoch milliseconds.
    pub created_at: u64,
    /// Lifetime in milliseconds; `None` never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_millis: Option<u64>,
    /// Whether the record was sealed when written.
    #[serde(default)]
    pub encrypted: bool,
}

impl Record {
    /// Creates an unencrypted record.
    #[must_use]
    pub fn new(value: Vec<u8>, created_at: u64, ttl_millis: Option<u64>) -> Self {
        Self {
            value,
            created_at,
            ttl_millis,
            encrypted: false,
        }
    }

    /// Returns true once more than `ttl_millis` have elapsed since creation.
    #[must_use]
    pub fn is_expired(&self, now_ms: u64) -> bool {
        match self.ttl_millis {
            Some(ttl) => now_ms.saturating_sub(self.created_at) > ttl,
            None => false,
        }
    }

    /// The last instant at which the record is still live.
    #[must_use]
    pub fn expires_at(&self) -> Option<u64> {
        self.ttl_millis
            .map(|ttl| self.created_at.saturating_add(ttl))
    }
}

/// Serde adapter for `Vec<u8>` as standard base64.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
