//! Namespaced key/value entries held in the memory store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `(namespace, key)` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
    /// Milliseconds to live from `updated_at`; 0 means no expiry.
    #[serde(default)]
    pub ttl_ms: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.ttl_ms == 0 {
            return false;
        }
        let age = now.signed_duration_since(self.updated_at);
        age.num_milliseconds() >= self.ttl_ms as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(ttl_ms: u64) -> MemoryEntry {
        let now = Utc::now();
        MemoryEntry {
            namespace: "ns".into(),
            key: "k".into(),
            value: serde_json::json!({"v": 1}),
            ttl_ms,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn zero_ttl_never_expires() {
        let e = entry(0);
        assert!(!e.is_expired_at(Utc::now() + Duration::days(3650)));
    }

    #[test]
    fn ttl_expires_after_window() {
        let e = entry(1_000);
        assert!(!e.is_expired_at(e.updated_at + Duration::milliseconds(500)));
        assert!(e.is_expired_at(e.updated_at + Duration::milliseconds(1_500)));
    }
}
