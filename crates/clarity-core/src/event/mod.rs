//! Event envelope for the Clarity event log.
//!
//! Every state change in a workspace is recorded as one [`Envelope`]: an
//! immutable JSON object appended as a single line to the writing replica's
//! shard. Envelopes for the same `(entityKind, entityId)` form a causal chain
//! through `parents` and a monotone `entitySeq`.
//!
//! Writers never build envelopes directly. A mutation produces an
//! [`EventDraft`]; the event log fills in identity, sequencing, and parents
//! at append time.

pub mod payload;
pub mod types;

pub use payload::Payload;
pub use types::{EntityKind, EventType};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use crate::error::{ClarityError, Result};

/// Local write state. Every envelope written by this engine is `local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    #[default]
    Local,
}

/// Publication state as reported by a remote collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// One record of the event log, exactly as it appears on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_id: String,
    pub workspace_id: String,
    pub replica_id: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub entity_seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(with = "rfc3339_millis")]
    pub issued_at: DateTime<Utc>,
    pub actor_id: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub local_status: LocalStatus,
    #[serde(default)]
    pub server_status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at_unix_ms: Option<i64>,
}

impl Envelope {
    /// Decode the payload into the typed shape for this event's type.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when the payload doesn't match.
    pub fn payload(&self) -> std::result::Result<Payload, serde_json::Error> {
        Payload::decode(&self.event_type, &self.payload)
    }

    /// Total order used for cross-entity reads: `(issuedAt, eventId)`.
    #[must_use]
    pub fn cmp_global(&self, other: &Self) -> Ordering {
        self.issued_at
            .cmp(&other.issued_at)
            .then_with(|| self.event_id.cmp(&other.event_id))
    }

    /// Total order used within one entity stream: `(entitySeq, issuedAt, eventId)`.
    #[must_use]
    pub fn cmp_entity(&self, other: &Self) -> Ordering {
        self.entity_seq
            .cmp(&other.entity_seq)
            .then_with(|| self.cmp_global(other))
    }

    /// Serialize to a single JSONL line, without the trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Truncate a timestamp to whole milliseconds, the precision stored on disk.
#[must_use]
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

/// An event ready to be appended, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub entity_id: String,
    pub actor_id: String,
    pub payload: Map<String, Value>,
    pub issued_at: DateTime<Utc>,
}

impl EventDraft {
    /// Build a draft from any serializable payload, stamped with the current
    /// time.
    ///
    /// # Errors
    ///
    /// Returns [`ClarityError::EventContract`] when the payload does not
    /// serialize to a JSON object, or when the draft violates
    /// [`EventDraft::validate`].
    pub fn new(
        event_type: EventType,
        entity_id: impl Into<String>,
        actor_id: impl Into<String>,
        payload: &impl Serialize,
    ) -> Result<Self> {
        let payload = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            other => {
                return Err(ClarityError::EventContract(format!(
                    "payload must be a JSON object, got {other}"
                )));
            }
        };
        let draft = Self {
            event_type,
            entity_id: entity_id.into(),
            actor_id: actor_id.into(),
            payload,
            issued_at: truncate_millis(Utc::now()),
        };
        draft.validate()?;
        Ok(draft)
    }

    /// Override the issue time (replays, imports, tests).
    #[must_use]
    pub fn issued_at(mut self, ts: DateTime<Utc>) -> Self {
        self.issued_at = truncate_millis(ts);
        self
    }

    /// Entity kind implied by the type prefix.
    ///
    /// # Errors
    ///
    /// Returns [`ClarityError::EventContract`] when the prefix is unknown.
    pub fn entity_kind(&self) -> Result<EntityKind> {
        self.event_type.entity_kind().ok_or_else(|| {
            ClarityError::EventContract(format!("unknown entity kind for type {}", self.event_type))
        })
    }

    /// Check the append preconditions: non-empty type, actor and entity id,
    /// and a type prefix naming a known entity kind.
    ///
    /// # Errors
    ///
    /// Returns [`ClarityError::EventContract`] naming the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.event_type.name().is_empty() {
            return Err(ClarityError::EventContract("missing type".into()));
        }
        if self.actor_id.trim().is_empty() {
            return Err(ClarityError::EventContract("missing actor".into()));
        }
        if self.entity_id.trim().is_empty() {
            return Err(ClarityError::EventContract("missing entity id".into()));
        }
        self.entity_kind()?;
        Ok(())
    }

    /// Seal the draft into an envelope.
    ///
    /// # Errors
    ///
    /// Propagates [`EventDraft::validate`] failures.
    pub fn seal(
        self,
        workspace_id: &str,
        replica_id: &str,
        entity_seq: u64,
        parents: Vec<String>,
    ) -> Result<Envelope> {
        self.validate()?;
        Ok(Envelope {
            event_id: uuid::Uuid::new_v4().to_string(),
            workspace_id: workspace_id.to_string(),
            replica_id: replica_id.to_string(),
            entity_kind: self.entity_kind()?,
            entity_id: self.entity_id,
            entity_seq,
            event_type: self.event_type,
            parents,
            issued_at: self.issued_at,
            actor_id: self.actor_id,
            payload: self.payload,
            local_status: LocalStatus::Local,
            server_status: ServerStatus::Pending,
            rejection_reason: None,
            published_at_unix_ms: None,
        })
    }
}

/// RFC 3339 with millisecond precision and a `Z` suffix.
pub mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Format a timestamp the way envelopes store it.
#[must_use]
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn draft() -> EventDraft {
        EventDraft::new(
            EventType::ItemSetTitle,
            "item-abc",
            "act-1",
            &json!({"title": "New"}),
        )
        .expect("valid draft")
    }

    #[test]
    fn draft_validation_rejects_missing_fields() {
        let err = EventDraft::new(EventType::ItemSetTitle, "", "act-1", &json!({"title": "x"}))
            .expect_err("missing entity id");
        assert!(matches!(err, ClarityError::EventContract(_)));

        let err = EventDraft::new(EventType::ItemSetTitle, "item-1", " ", &json!({"title": "x"}))
            .expect_err("missing actor");
        assert!(matches!(err, ClarityError::EventContract(_)));

        let err = EventDraft::new(
            EventType::Unknown("widget.spin".into()),
            "w-1",
            "act-1",
            &json!({"x": 1}),
        )
        .expect_err("unknown kind");
        assert!(matches!(err, ClarityError::EventContract(_)));

        let err = EventDraft::new(EventType::ItemSetTitle, "item-1", "act-1", &json!(null))
            .expect_err("null payload");
        assert!(matches!(err, ClarityError::EventContract(_)));
    }

    #[test]
    fn sealed_envelope_serializes_wire_shape() {
        let env = draft()
            .seal("ws-1", "rep-1", 1, Vec::new())
            .expect("seal");
        let value: Value = serde_json::from_str(&env.to_line().expect("line")).expect("json");

        assert_eq!(value["type"], "item.set_title");
        assert_eq!(value["entityKind"], "item");
        assert_eq!(value["entitySeq"], 1);
        assert_eq!(value["localStatus"], "local");
        assert_eq!(value["serverStatus"], "pending");
        assert!(value.get("rejectionReason").is_none());
        assert!(value["issuedAt"].as_str().expect("ts").ends_with('Z'));
        assert_eq!(value["eventId"].as_str().expect("id").len(), 36);
    }

    #[test]
    fn envelope_round_trips_through_a_line() {
        let env = draft()
            .seal("ws-1", "rep-1", 3, vec!["parent".into()])
            .expect("seal");
        let line = env.to_line().expect("line");
        assert!(!line.contains('\n'));
        let back: Envelope = serde_json::from_str(&line).expect("parse");
        assert_eq!(back, env);
    }

    #[test]
    fn identity_prefix_maps_to_actor_kind() {
        let env = EventDraft::new(
            EventType::IdentityCreate,
            "act-1",
            "act-1",
            &json!({"kind": "human", "name": "A"}),
        )
        .expect("draft")
        .seal("ws", "rep", 1, Vec::new())
        .expect("seal");
        assert_eq!(env.entity_kind, EntityKind::Actor);
    }

    #[test]
    fn orderings_break_ties_by_event_id() {
        let ts = truncate_millis(Utc::now());
        let mut a = draft().issued_at(ts).seal("ws", "rep", 2, Vec::new()).expect("a");
        let mut b = draft().issued_at(ts).seal("ws", "rep", 1, Vec::new()).expect("b");
        a.event_id = "a".into();
        b.event_id = "b".into();
        assert_eq!(a.cmp_global(&b), Ordering::Less);
        assert_eq!(a.cmp_entity(&b), Ordering::Greater);
    }
}
