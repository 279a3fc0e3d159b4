//! Materialized workspace entities.
//!
//! These are the shapes replay produces. They are plain values; the event
//! log is the source of truth and entities are never persisted directly.

pub mod snapshot;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use snapshot::Snapshot;

/// Human or agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    #[default]
    Human,
    Agent,
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Human => "human",
            Self::Agent => "agent",
        })
    }
}

/// Identity of a human or an agent acting on a human's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
    pub name: String,
    /// For agents: the owning human's actor id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub archived: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// One column of an outline's status workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDef {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub is_end_state: bool,
    #[serde(default)]
    pub requires_note: bool,
}

impl StatusDef {
    pub fn new(id: &str, label: &str, is_end_state: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            is_end_state,
            requires_note: false,
        }
    }
}

/// Status definitions given to outlines created without any.
#[must_use]
pub fn default_status_defs() -> Vec<StatusDef> {
    vec![
        StatusDef::new("todo", "TODO", false),
        StatusDef::new("doing", "DOING", false),
        StatusDef::new("done", "DONE", true),
    ]
}

/// Derive a status id from a label: lowercase, whitespace runs become `-`.
#[must_use]
pub fn status_id_from_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    pub id: String,
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default = "default_status_defs")]
    pub status_defs: Vec<StatusDef>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Outline {
    /// Find a status definition by id.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<&StatusDef> {
        self.status_defs.iter().find(|def| def.id == id)
    }

    /// Find a status definition by id, falling back to a case-insensitive
    /// label match.
    #[must_use]
    pub fn status_position(&self, id: Option<&str>, label: Option<&str>) -> Option<usize> {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if let Some(pos) = self.status_defs.iter().position(|def| def.id == id) {
                return Some(pos);
            }
        }
        let label = label.filter(|label| !label.is_empty())?;
        self.status_defs
            .iter()
            .position(|def| def.label.eq_ignore_ascii_case(label))
    }
}

/// A calendar day with an optional wall time (`HH:MM`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOn {
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
}

impl DateOn {
    /// Convert a legacy single timestamp into a structured date.
    ///
    /// Midnight and 09:00 were the old "no time" sentinels, so those become
    /// date-only values.
    #[must_use]
    pub fn from_legacy(ts: DateTime<Utc>) -> Self {
        let (hour, minute) = (ts.hour(), ts.minute());
        let time = if (hour, minute) == (0, 0) || (hour, minute) == (9, 0) {
            None
        } else {
            Some(format!("{hour:02}:{minute:02}"))
        };
        Self {
            date: ts.date_naive(),
            time,
        }
    }

    /// Return `true` when `time` is absent or a valid `HH:MM`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.time.as_deref().is_none_or(|t| {
            chrono::NaiveTime::parse_from_str(t, "%H:%M").is_ok() && t.len() == 5
        })
    }
}

/// Closed set of item kinds. Empty means a plain outline item.
pub const ITEM_KINDS: [&str; 3] = ["", "status", "checkbox"];

/// Closed set of children kinds.
pub const CHILDREN_KINDS: [&str; 2] = ["", "checkbox"];

/// A work item in an outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub project_id: String,
    pub outline_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub rank: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status_id: String,
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub on_hold: bool,
    #[serde(default)]
    pub archived: bool,
    pub owner_actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_delegated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_delegated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateOn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<DateOn>,
    /// Legacy single-timestamp due date, migrated after replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Legacy single-timestamp schedule, migrated after replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub item_kind: String,
    #[serde(default)]
    pub children_kind: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Fold legacy timestamps into structured dates when none exist.
    pub fn migrate_legacy_dates(&mut self) {
        if self.due.is_none() {
            if let Some(ts) = self.due_at {
                self.due = Some(DateOn::from_legacy(ts));
            }
        }
        if self.schedule.is_none() {
            if let Some(ts) = self.scheduled_at {
                self.schedule = Some(DateOn::from_legacy(ts));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub id: String,
    pub from_item_id: String,
    pub to_item_id: String,
    #[serde(rename = "type", default = "default_dep_type")]
    pub dep_type: String,
}

fn default_dep_type() -> String {
    "blocks".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub item_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogEntry {
    pub id: String,
    pub item_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// What an attachment hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentOwner {
    Item,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub entity_kind: AttachmentOwner,
    pub entity_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub mime_type: String,
    /// Workspace-relative path, `resources/attachments/<id>/<name>`.
    pub path: String,
}
