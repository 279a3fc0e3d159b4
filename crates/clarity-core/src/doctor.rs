//! Read-only audit of the JSONL event shards.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::dag::{self, ChainViolation};
use crate::error::Result;
use crate::event::{EntityKind, Envelope};
use crate::log::jsonl::{for_each_line, list_shards};

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warn,
    Error,
}

/// One finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub level: Level,
    /// Stable snake_case identifier, e.g. `fork_detected`.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub event_ids: Vec<String>,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Warn => "warn",
            Level::Error => "error",
        };
        write!(f, "{level} [{}]", self.code)?;
        if let Some(path) = &self.path {
            write!(f, " {}", path.display())?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub events_checked: usize,
    pub issues: Vec<Issue>,
}

impl Report {
    /// The gate for refusing dangerous operations.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.level == Level::Error)
    }

    #[must_use]
    pub fn errors(&self) -> usize {
        self.issues.iter().filter(|i| i.level == Level::Error).count()
    }

    #[must_use]
    pub fn warnings(&self) -> usize {
        self.issues.len() - self.errors()
    }

    fn push(&mut self, level: Level, code: &str, message: String, at: Option<(&Path, usize)>) -> &mut Issue {
        self.issues.push(Issue {
            level,
            code: code.to_string(),
            message,
            path: at.map(|(p, _)| p.to_path_buf()),
            line: at.map(|(_, l)| l),
            event_ids: Vec::new(),
        });
        let last = self.issues.len() - 1;
        &mut self.issues[last]
    }
}

/// Envelope fields every line must carry, with their issue codes.
const REQUIRED: [(&str, &str); 8] = [
    ("eventId", "missing_event_id"),
    ("replicaId", "missing_replica_id"),
    ("workspaceId", "missing_workspace_id"),
    ("actorId", "missing_actor_id"),
    ("issuedAt", "missing_issued_at"),
    ("entityKind", "missing_entity_kind"),
    ("entityId", "missing_entity_id"),
    ("type", "missing_type"),
];

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

/// Audit every shard under `events_dir`.
///
/// # Errors
///
/// Only I/O errors reading the shards; everything wrong with their content
/// becomes an [`Issue`].
pub fn check(events_dir: &Path) -> Result<Report> {
    let mut report = Report::default();
    let mut first_seen: HashMap<(String, String), (PathBuf, usize)> = HashMap::new();
    let mut envelopes: Vec<Envelope> = Vec::new();

    for path in list_shards(events_dir)? {
        for_each_line(&path, |line, text| {
            report.events_checked += 1;
            let at = Some((path.as_path(), line));
            let obj = match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(obj)) => obj,
                Ok(_) => {
                    report.push(Level::Error, "malformed_json", "line is not a JSON object".into(), at);
                    return;
                }
                Err(err) => {
                    report.push(Level::Error, "malformed_json", err.to_string(), at);
                    return;
                }
            };

            let mut complete = true;
            for (key, code) in REQUIRED {
                if str_field(&obj, key).is_none() {
                    report.push(Level::Error, code, format!("missing {key}"), at);
                    complete = false;
                }
            }

            let event_id = str_field(&obj, "eventId").unwrap_or_default().to_string();
            if let (Some(ty), Some(declared)) = (str_field(&obj, "type"), str_field(&obj, "entityKind")) {
                match EntityKind::from_event_type(ty) {
                    Some(inferred) if inferred.as_str() != declared => {
                        report
                            .push(
                                Level::Error,
                                "entity_kind_mismatch",
                                format!("type {ty} implies {inferred}, entityKind is {declared}"),
                                at,
                            )
                            .event_ids
                            .push(event_id.clone());
                        complete = false;
                    }
                    Some(_) => {}
                    None => {
                        report.push(Level::Warn, "unknown_type", format!("unknown event type {ty}"), at);
                    }
                }
            }

            if let Some(replica) = str_field(&obj, "replicaId").filter(|_| !event_id.is_empty()) {
                let key = (replica.to_string(), event_id.clone());
                if let Some((first_path, first_line)) = first_seen.get(&key) {
                    report
                        .push(
                            Level::Error,
                            "duplicate_event",
                            format!(
                                "event {event_id} already appears at {}:{first_line}",
                                first_path.display()
                            ),
                            at,
                        )
                        .event_ids
                        .push(event_id.clone());
                    return;
                }
                first_seen.insert(key, (path.clone(), line));
            }

            let empty_payload = match obj.get("payload") {
                None | Some(Value::Null) => true,
                Some(Value::Object(map)) => map.is_empty(),
                Some(_) => false,
            };
            if empty_payload {
                report
                    .push(Level::Warn, "empty_payload", "event has an empty payload".into(), at)
                    .event_ids
                    .push(event_id.clone());
            }

            if complete {
                match serde_json::from_value::<Envelope>(Value::Object(obj)) {
                    Ok(env) => envelopes.push(env),
                    Err(err) => {
                        report.push(Level::Error, "malformed_envelope", err.to_string(), at);
                    }
                }
            }
        })?;
    }

    check_streams(&mut report, &envelopes);
    debug!(
        events = report.events_checked,
        errors = report.errors(),
        warnings = report.warnings(),
        "doctor finished"
    );
    Ok(report)
}

fn check_streams(report: &mut Report, envelopes: &[Envelope]) {
    for ((kind, id), heads) in dag::forks(envelopes) {
        let count = heads.len();
        report
            .push(
                Level::Error,
                "fork_detected",
                format!("{kind}/{id} has {count} heads"),
                None,
            )
            .event_ids = heads;
    }

    let mut streams: HashMap<(EntityKind, &str), Vec<Envelope>> = HashMap::new();
    for env in envelopes {
        streams
            .entry((env.entity_kind, env.entity_id.as_str()))
            .or_default()
            .push(env.clone());
    }
    let mut keys: Vec<_> = streams.keys().copied().collect();
    keys.sort_unstable();
    for key in keys {
        let Some(stream) = streams.get(&key) else {
            continue;
        };
        for violation in dag::check_chain(stream) {
            let (message, ids) = match violation {
                ChainViolation::SeqNotIncreasing { child, parent } => (
                    format!("{child} does not follow {parent} in entitySeq"),
                    vec![child, parent],
                ),
                ChainViolation::MissingParent { child, parent } => (
                    format!("{child} names unknown parent {parent}"),
                    vec![child, parent],
                ),
                ChainViolation::RootHasParents { event } => {
                    (format!("first event {event} has parents"), vec![event])
                }
            };
            report
                .push(Level::Warn, "broken_chain", format!("{}/{}: {message}", key.0, key.1), None)
                .event_ids = ids;
        }
    }
}
