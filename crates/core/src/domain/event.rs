use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::rule::{OwnerId, TriggerKind};

/// Deterministic fingerprint of an event, used for idempotent execution.
///
/// Two events with the same kind, owner, and payload always derive the same
/// key regardless of payload field order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DedupKey(pub String);

impl DedupKey {
    pub fn derive(kind: TriggerKind, owner_id: &OwnerId, payload: &Map<String, Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(owner_id.0.as_bytes());

        // Sort keys so serialization order cannot change the fingerprint.
        let sorted: BTreeMap<&String, &Value> = payload.iter().collect();
        for (key, value) in sorted {
            hasher.update(b"\x1f");
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }

        Self(format!("{:x}", hasher.finalize()))
    }
}

/// A business occurrence fed into the rule engine. Ephemeral; the engine never
/// persists it, only the resulting `ActionExecution` records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: TriggerKind,
    pub owner_id: OwnerId,
    pub payload: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
    pub dedup_key: DedupKey,
}

impl TriggerEvent {
    pub fn new(
        kind: TriggerKind,
        owner_id: OwnerId,
        payload: Map<String, Value>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let dedup_key = DedupKey::derive(kind, &owner_id, &payload);
        Self { kind, owner_id, payload, occurred_at, dedup_key }
    }

    /// The contact this event concerns, when the payload carries one.
    /// Drives the per-(owner, contact) reply cap.
    pub fn contact(&self) -> Option<&str> {
        ["sender_email", "contact_email", "lead_email"]
            .iter()
            .find_map(|field| self.payload.get(*field).and_then(Value::as_str))
            .filter(|value| !value.trim().is_empty())
    }

    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }
}
