//! Backup export/import and legacy snapshot migration.
//!
//! An export is one JSONL file holding every readable event ordered by
//! `(issuedAt, eventId)`. Importing writes each event into the shard of its
//! own replica, skipping `(replicaId, eventId)` pairs already present.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::to_value;
use tracing::{info, warn};

use crate::error::{ClarityError, Result};
use crate::event::payload::{
    ArchivePayload, DepAdd, IdentityCreate, ItemCreate, NamePayload, NoteAdd, OutlineCreate,
};
use crate::event::{Envelope, EventDraft, EventType};
use crate::log::jsonl::{JsonlEventLog, LineError};
use crate::log::{EventLog, Located};
use crate::model::{Actor, Comment, Dependency, Item, Outline, Project, Snapshot, WorklogEntry};

/// Write every event to `out`, one JSON object per line.
///
/// Returns the number of events written.
///
/// # Errors
///
/// Read or write failures.
pub fn export(events: &[Located], mut out: impl Write) -> Result<usize> {
    let mut ordered: Vec<_> = events.iter().map(|l| &l.envelope).collect();
    ordered.sort_by(|a, b| {
        a.issued_at
            .cmp(&b.issued_at)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    for env in &ordered {
        writeln!(out, "{}", env.to_line()?)?;
    }
    out.flush()?;
    Ok(ordered.len())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Stamp every imported event with this workspace id.
    pub rewrite_workspace_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    /// Already present by `(replicaId, eventId)`.
    pub skipped: usize,
    /// Lines of the export that were not envelopes.
    pub errors: Vec<LineError>,
}

/// Import a JSONL export into `log`.
///
/// # Errors
///
/// Read errors and append failures; unparseable lines are reported in
/// [`ImportReport::errors`] instead.
pub fn import(
    log: &JsonlEventLog,
    input: impl BufRead,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let mut seen: HashSet<(String, String)> = log
        .all_events()?
        .into_iter()
        .map(|l| (l.envelope.replica_id, l.envelope.event_id))
        .collect();
    let mut report = ImportReport::default();

    for (idx, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let mut env = match serde_json::from_str::<Envelope>(&line) {
            Ok(env) => env,
            Err(err) => {
                report.errors.push(LineError {
                    path: "<import>".into(),
                    line: idx + 1,
                    message: err.to_string(),
                });
                continue;
            }
        };
        if !seen.insert((env.replica_id.clone(), env.event_id.clone())) {
            report.skipped += 1;
            continue;
        }
        if let Some(ws) = &options.rewrite_workspace_id {
            env.workspace_id.clone_from(ws);
        }
        log.append_sealed(&env)?;
        report.imported += 1;
    }
    if !report.errors.is_empty() {
        warn!(count = report.errors.len(), "import skipped unreadable lines");
    }
    info!(imported = report.imported, skipped = report.skipped, "import finished");
    Ok(report)
}

/// Pre-event-log snapshot file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacySnapshot {
    pub version: u32,
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub outlines: Vec<Outline>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub worklogs: Vec<WorklogEntry>,
}

/// Newest legacy snapshot version understood.
pub const LEGACY_SNAPSHOT_VERSION: u32 = 1;

/// Convert a legacy snapshot into creation events, leaving out entities
/// `existing` already has.
///
/// Drafts are ordered so that every reference points at something created
/// earlier: actors, projects, outlines, items (parents first), then
/// dependencies, comments and worklogs.
///
/// # Errors
///
/// [`ClarityError::EventContract`] for an unsupported version or a record
/// that can't form a valid event.
pub fn legacy_drafts(snapshot: &LegacySnapshot, existing: &Snapshot) -> Result<Vec<EventDraft>> {
    if snapshot.version > LEGACY_SNAPSHOT_VERSION {
        return Err(ClarityError::EventContract(format!(
            "legacy snapshot version {} is newer than {LEGACY_SNAPSHOT_VERSION}",
            snapshot.version
        )));
    }
    let mut drafts = Vec::new();
    let mut push = |ty: EventType,
                    id: &str,
                    actor: &str,
                    at: DateTime<Utc>,
                    payload: serde_json::Value|
     -> Result<()> {
        drafts.push(EventDraft::new(ty, id, actor, &payload)?.issued_at(at));
        Ok(())
    };
    let epoch = DateTime::<Utc>::default();

    for actor in snapshot.actors.iter().filter(|a| !existing.actors.contains_key(&a.id)) {
        let payload = IdentityCreate {
            kind: actor.kind,
            name: actor.name.clone(),
            user_id: actor.user_id.clone(),
        };
        push(EventType::IdentityCreate, &actor.id, &actor.id, epoch, to_value(&payload)?)?;
    }

    for project in snapshot.projects.iter().filter(|p| !existing.projects.contains_key(&p.id)) {
        let name = NamePayload {
            name: project.name.clone(),
        };
        push(EventType::ProjectCreate, &project.id, &project.created_by, project.created_at, to_value(&name)?)?;
        if project.archived {
            let archived = ArchivePayload { archived: true };
            push(EventType::ProjectArchive, &project.id, &project.created_by, project.created_at, to_value(&archived)?)?;
        }
    }

    for outline in snapshot.outlines.iter().filter(|o| !existing.outlines.contains_key(&o.id)) {
        let payload = OutlineCreate {
            project_id: outline.project_id.clone(),
            name: outline.name.clone(),
            description: outline.description.clone(),
            status_defs: Some(outline.status_defs.clone()),
        };
        push(EventType::OutlineCreate, &outline.id, &outline.created_by, outline.created_at, to_value(&payload)?)?;
        if outline.archived {
            let archived = ArchivePayload { archived: true };
            push(EventType::OutlineArchive, &outline.id, &outline.created_by, outline.created_at, to_value(&archived)?)?;
        }
    }

    for item in parents_first(&snapshot.items) {
        if existing.items.contains_key(&item.id) {
            continue;
        }
        let payload = ItemCreate {
            project_id: item.project_id.clone(),
            outline_id: item.outline_id.clone(),
            parent_id: item.parent_id.clone(),
            rank: item.rank.clone(),
            title: item.title.clone(),
            description: item.description.clone(),
            status_id: item.status_id.clone(),
            owner_actor_id: Some(item.owner_actor_id.clone()).filter(|o| !o.is_empty()),
            assigned_actor_id: item.assigned_actor_id.clone(),
            priority: item.priority,
            on_hold: item.on_hold,
            tags: item.tags.iter().cloned().collect(),
            item_kind: item.item_kind.clone(),
            children_kind: item.children_kind.clone(),
            due: item.due.clone(),
            schedule: item.schedule.clone(),
            due_at: item.due_at,
            scheduled_at: item.scheduled_at,
        };
        push(EventType::ItemCreate, &item.id, &item.created_by, item.created_at, to_value(&payload)?)?;
        if item.archived {
            let archived = ArchivePayload { archived: true };
            push(EventType::ItemSetArchive, &item.id, &item.created_by, item.updated_at, to_value(&archived)?)?;
        }
    }

    for dep in snapshot.dependencies.iter().filter(|d| !existing.deps.contains_key(&d.id)) {
        let from = snapshot
            .items
            .iter()
            .find(|i| i.id == dep.from_item_id)
            .or_else(|| existing.items.get(&dep.from_item_id))
            .ok_or_else(|| {
                ClarityError::EventContract(format!(
                    "dependency {} names unknown item {}",
                    dep.id, dep.from_item_id
                ))
            })?;
        let payload = DepAdd {
            from_item_id: dep.from_item_id.clone(),
            to_item_id: dep.to_item_id.clone(),
            dep_type: dep.dep_type.clone(),
        };
        push(EventType::DepAdd, &dep.id, &from.created_by, from.created_at, to_value(&payload)?)?;
    }

    for c in snapshot.comments.iter().filter(|c| !existing.comments.contains_key(&c.id)) {
        let payload = NoteAdd {
            item_id: c.item_id.clone(),
            body: c.body.clone(),
        };
        push(EventType::CommentAdd, &c.id, &c.author_id, c.created_at, to_value(&payload)?)?;
    }

    for w in snapshot.worklogs.iter().filter(|w| !existing.worklogs.contains_key(&w.id)) {
        let payload = NoteAdd {
            item_id: w.item_id.clone(),
            body: w.body.clone(),
        };
        push(EventType::WorklogAdd, &w.id, &w.author_id, w.created_at, to_value(&payload)?)?;
    }

    Ok(drafts)
}

/// Append the drafts from [`legacy_drafts`] through the normal write path.
///
/// # Errors
///
/// As for [`legacy_drafts`], plus append failures.
pub fn import_legacy(log: &dyn EventLog, snapshot: &LegacySnapshot, existing: &Snapshot) -> Result<usize> {
    let drafts = legacy_drafts(snapshot, existing)?;
    let count = drafts.len();
    for draft in drafts {
        log.append(draft)?;
    }
    info!(events = count, "imported legacy snapshot");
    Ok(count)
}

/// Items ordered so each parent precedes its children. Items whose parent
/// is missing keep their relative order at the end.
fn parents_first(items: &[Item]) -> Vec<&Item> {
    let ids: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    let mut pending: Vec<&Item> = items.iter().collect();
    loop {
        let before = pending.len();
        pending.retain(|item| {
            let ready = match item.parent_id.as_deref() {
                None => true,
                Some(parent) => placed.contains(parent) || !ids.contains(parent),
            };
            if ready {
                placed.insert(item.id.as_str());
                out.push(*item);
            }
            !ready
        });
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }
    out.extend(pending);
    out
}
