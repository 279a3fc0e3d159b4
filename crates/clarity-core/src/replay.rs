//! Replay: fold the event log into a [`Snapshot`].
//!
//! Events are applied in `(issuedAt, eventId, replicaId, shardPath,
//! lineNumber)` order, so every replica that holds the same set of events
//! materializes the same state. Duplicate event ids apply once. Creates are
//! skipped when the entity already exists; setters on missing entities are
//! skipped. Unknown types and undecodable payloads are counted and skipped,
//! never fatal.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{ClarityError, Result};
use crate::event::payload::{
    ItemCreate, MovePayload, SetAssign, StatusAdd, StatusUpdate,
};
use crate::event::{Envelope, EventType, Payload};
use crate::log::Located;
use crate::model::snapshot::Snapshot;
use crate::model::{
    Actor, AttachmentOwner, CHILDREN_KINDS, Comment, Dependency, ITEM_KINDS, Item, Outline,
    Project, StatusDef, WorklogEntry, default_status_defs, status_id_from_label,
};
use crate::rank;
use crate::reorder::{self, Sibling};

/// Replay located events. Input order doesn't matter.
#[must_use]
pub fn replay(events: &[Located]) -> Snapshot {
    let mut order: Vec<&Located> = events.iter().collect();
    order.sort_by(|a, b| a.cmp_replay(b));
    let mut replayer = Replayer::default();
    for located in order {
        replayer.apply(&located.envelope);
    }
    replayer.finish()
}

/// Replay bare envelopes ordered by `(issuedAt, eventId, replicaId)`.
#[must_use]
pub fn replay_envelopes<'a>(events: impl IntoIterator<Item = &'a Envelope>) -> Snapshot {
    let mut order: Vec<&Envelope> = events.into_iter().collect();
    order.sort_by(|a, b| a.cmp_global(b).then_with(|| a.replica_id.cmp(&b.replica_id)));
    let mut replayer = Replayer::default();
    for env in order {
        replayer.apply(env);
    }
    replayer.finish()
}

/// Incremental reducer. Feed envelopes in replay order, then [`finish`].
///
/// [`finish`]: Replayer::finish
#[derive(Debug, Default)]
pub struct Replayer {
    snapshot: Snapshot,
    seen: HashSet<String>,
}

impl Replayer {
    /// Continue from an existing snapshot. Event ids already folded into it
    /// are unknown, so the caller must only feed new events.
    #[must_use]
    pub fn resume(snapshot: Snapshot) -> Self {
        Self {
            snapshot,
            seen: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Apply one envelope. Returns `false` when it was a duplicate, unknown,
    /// or undecodable.
    pub fn apply(&mut self, env: &Envelope) -> bool {
        if !self.seen.insert(env.event_id.clone()) {
            return false;
        }
        if let EventType::Unknown(raw) = &env.event_type {
            debug!(event_id = %env.event_id, ty = %raw, "skipping unknown event type");
            self.snapshot.unknown_events += 1;
            return false;
        }
        let payload = match env.payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event_id = %env.event_id, ty = %env.event_type, %err, "undecodable payload");
                self.snapshot.bad_payloads += 1;
                return false;
            }
        };
        apply_payload(&mut self.snapshot, env, payload);
        true
    }

    /// Run post-replay migrations and hand back the snapshot.
    #[must_use]
    pub fn finish(mut self) -> Snapshot {
        for item in self.snapshot.items.values_mut() {
            item.migrate_legacy_dates();
        }
        self.snapshot
    }
}

fn stamp(env: &Envelope) -> DateTime<Utc> {
    if env.issued_at.timestamp_millis() == 0 {
        Utc::now()
    } else {
        env.issued_at
    }
}

/// Trim, drop empties, dedupe.
#[must_use]
pub fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[allow(clippy::too_many_lines)]
fn apply_payload(snap: &mut Snapshot, env: &Envelope, payload: Payload) {
    let id = env.entity_id.as_str();
    let at = stamp(env);

    match payload {
        Payload::IdentityCreate(p) => {
            snap.actors.insert(
                id.to_string(),
                Actor {
                    id: id.to_string(),
                    kind: p.kind,
                    name: p.name,
                    user_id: non_empty(p.user_id),
                },
            );
        }
        Payload::IdentityHelper(_) | Payload::Merge(_) | Payload::Ignored => {}

        Payload::ProjectCreate(p) => {
            snap.projects.entry(id.to_string()).or_insert_with(|| Project {
                id: id.to_string(),
                name: p.name,
                archived: false,
                created_by: env.actor_id.clone(),
                created_at: at,
            });
        }
        Payload::ProjectRename(p) => {
            if let Some(project) = snap.projects.get_mut(id) {
                let name = p.name.trim();
                if !name.is_empty() {
                    project.name = name.to_string();
                }
            }
        }
        Payload::ProjectArchive(p) => {
            if let Some(project) = snap.projects.get_mut(id) {
                project.archived = p.archived;
            }
        }

        Payload::OutlineCreate(p) => {
            snap.outlines.entry(id.to_string()).or_insert_with(|| Outline {
                id: id.to_string(),
                project_id: p.project_id,
                name: non_empty(p.name),
                description: non_empty(p.description),
                archived: false,
                status_defs: p.status_defs.unwrap_or_else(default_status_defs),
                created_by: env.actor_id.clone(),
                created_at: at,
            });
        }
        Payload::OutlineRename(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                outline.name = non_empty(p.name);
            }
        }
        Payload::OutlineSetDescription(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                outline.description = non_empty(Some(p.description));
            }
        }
        Payload::OutlineArchive(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                outline.archived = p.archived;
            }
        }
        Payload::OutlineStatusAdd(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                add_status(outline, p);
            }
        }
        Payload::OutlineStatusRemove(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                if let Some(pos) = outline.status_position(p.id.as_deref(), p.label.as_deref()) {
                    outline.status_defs.remove(pos);
                }
            }
        }
        Payload::OutlineStatusUpdate(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                update_status(outline, &p);
            }
        }
        Payload::OutlineStatusReorder(p) => {
            if let Some(outline) = snap.outlines.get_mut(id) {
                reorder_statuses(outline, &p.labels);
            }
        }

        Payload::ItemCreate(p) => {
            if !snap.items.contains_key(id) {
                let item = new_item(snap, env, *p, at);
                snap.items.insert(id.to_string(), item);
            }
        }
        Payload::ItemSetTitle(p) => touch(snap, id, at, |item| item.title = p.title),
        Payload::ItemSetDescription(p) => {
            touch(snap, id, at, |item| item.description = p.description);
        }
        Payload::ItemSetStatus(p) => {
            let to = p.target().to_string();
            touch(snap, id, at, |item| item.status_id = to);
        }
        Payload::ItemSetPriority(p) => touch(snap, id, at, |item| item.priority = p.priority),
        Payload::ItemSetOnHold(p) => touch(snap, id, at, |item| item.on_hold = p.on_hold),
        Payload::ItemSetDue(p) => touch(snap, id, at, |item| {
            item.due = p.due;
            item.due_at = None;
        }),
        Payload::ItemSetSchedule(p) => touch(snap, id, at, |item| {
            item.schedule = p.schedule;
            item.scheduled_at = None;
        }),
        Payload::ItemSetAssign(p) => touch(snap, id, at, |item| apply_assign(item, p, at)),
        Payload::ItemSetArchive(p) => touch(snap, id, at, |item| item.archived = p.archived),
        Payload::ItemTagsAdd(p) => {
            touch(snap, id, at, |item| item.tags.extend(normalize_tags(&p.tags)));
        }
        Payload::ItemTagsRemove(p) => touch(snap, id, at, |item| {
            for tag in normalize_tags(&p.tags) {
                item.tags.remove(&tag);
            }
        }),
        Payload::ItemTagsSet(p) => touch(snap, id, at, |item| item.tags = normalize_tags(&p.tags)),
        Payload::ItemMove(p) => {
            if let Err(err) = apply_move(snap, id, &p, at) {
                warn!(event_id = %env.event_id, item = id, %err, "item.move not applied");
            }
        }
        Payload::ItemSetParent(p) => {
            let parent = p.parent_id().map(str::to_string);
            if let Err(err) = reparent(snap, id, parent.as_deref(), p.rank, at) {
                warn!(event_id = %env.event_id, item = id, %err, "item.set_parent not applied");
            }
        }
        Payload::ItemIndent(p) => {
            if let Err(err) = reparent(snap, id, Some(p.parent_id.as_str()), None, at) {
                warn!(event_id = %env.event_id, item = id, %err, "item.indent not applied");
            }
        }
        Payload::ItemOutdent(_) => {
            let grandparent = snap
                .items
                .get(id)
                .and_then(|item| item.parent_id.as_deref())
                .and_then(|parent| snap.items.get(parent))
                .map(|parent| parent.parent_id.clone());
            if let Some(target) = grandparent {
                if let Err(err) = reparent(snap, id, target.as_deref(), None, at) {
                    warn!(event_id = %env.event_id, item = id, %err, "item.outdent not applied");
                }
            }
        }
        Payload::ItemMoveOutline(p) => {
            if let Err(err) = move_subtree_to_outline(snap, id, &p.outline_id, &p.status_id, at) {
                warn!(event_id = %env.event_id, item = id, %err, "item.move_outline not applied");
            }
        }
        Payload::ItemSetKind(p) => {
            if ITEM_KINDS.contains(&p.item_kind.as_str()) {
                touch(snap, id, at, |item| item.item_kind = p.item_kind);
            }
        }
        Payload::ItemSetChildrenKind(p) => {
            if CHILDREN_KINDS.contains(&p.children_kind.as_str()) {
                touch(snap, id, at, |item| item.children_kind = p.children_kind);
            }
        }

        Payload::AttachmentAdd(p) => {
            let owner = if env.event_type == EventType::CommentAttachmentAdd {
                AttachmentOwner::Comment
            } else {
                AttachmentOwner::Item
            };
            if !snap.attachments.contains_key(&p.attachment_id) {
                let attachment = p.into_attachment(owner, id);
                snap.attachments.insert(attachment.id.clone(), attachment);
            }
        }
        Payload::DepAdd(p) => {
            snap.deps.entry(id.to_string()).or_insert_with(|| Dependency {
                id: id.to_string(),
                from_item_id: p.from_item_id,
                to_item_id: p.to_item_id,
                dep_type: p.dep_type,
            });
        }
        Payload::CommentAdd(p) => {
            snap.comments.entry(id.to_string()).or_insert_with(|| Comment {
                id: id.to_string(),
                item_id: p.item_id,
                author_id: env.actor_id.clone(),
                body: p.body,
                created_at: at,
            });
        }
        Payload::WorklogAdd(p) => {
            snap.worklogs.entry(id.to_string()).or_insert_with(|| WorklogEntry {
                id: id.to_string(),
                item_id: p.item_id,
                author_id: env.actor_id.clone(),
                body: p.body,
                created_at: at,
            });
        }
    }
}

fn touch(snap: &mut Snapshot, id: &str, at: DateTime<Utc>, change: impl FnOnce(&mut Item)) {
    if let Some(item) = snap.items.get_mut(id) {
        change(item);
        item.updated_at = at;
    } else {
        debug!(item = id, "setter for unknown item skipped");
    }
}

fn new_item(snap: &Snapshot, env: &Envelope, p: ItemCreate, at: DateTime<Utc>) -> Item {
    let project_id = if p.project_id.is_empty() {
        snap.outlines
            .get(&p.outline_id)
            .map(|outline| outline.project_id.clone())
            .unwrap_or_default()
    } else {
        p.project_id
    };
    let rank = if rank::is_valid(&p.rank) {
        p.rank
    } else {
        let ranks = snap.sibling_ranks(&p.outline_id, p.parent_id.as_deref());
        rank::next_after(ranks.iter().map(String::as_str)).unwrap_or_else(|_| rank::initial())
    };
    Item {
        id: env.entity_id.clone(),
        project_id,
        outline_id: p.outline_id,
        parent_id: non_empty(p.parent_id),
        rank,
        title: p.title,
        description: p.description,
        status_id: p.status_id,
        priority: p.priority,
        on_hold: p.on_hold,
        archived: false,
        owner_actor_id: non_empty(p.owner_actor_id).unwrap_or_else(|| env.actor_id.clone()),
        assigned_actor_id: non_empty(p.assigned_actor_id),
        owner_delegated_from: None,
        owner_delegated_at: None,
        due: p.due,
        schedule: p.schedule,
        due_at: p.due_at,
        scheduled_at: p.scheduled_at,
        tags: normalize_tags(&p.tags),
        item_kind: if ITEM_KINDS.contains(&p.item_kind.as_str()) {
            p.item_kind
        } else {
            String::new()
        },
        children_kind: if CHILDREN_KINDS.contains(&p.children_kind.as_str()) {
            p.children_kind
        } else {
            String::new()
        },
        created_by: env.actor_id.clone(),
        created_at: at,
        updated_at: at,
    }
}

fn add_status(outline: &mut Outline, p: StatusAdd) {
    let id = non_empty(p.id).unwrap_or_else(|| status_id_from_label(&p.label));
    if id.is_empty() || outline.status(&id).is_some() {
        return;
    }
    outline.status_defs.push(StatusDef {
        id,
        label: p.label,
        is_end_state: p.is_end_state,
        requires_note: p.requires_note,
    });
}

fn update_status(outline: &mut Outline, p: &StatusUpdate) {
    let Some(pos) = outline.status_position(p.target.id.as_deref(), p.target.label.as_deref())
    else {
        return;
    };
    let def = &mut outline.status_defs[pos];
    if let Some(label) = p.new_label.as_deref().filter(|l| !l.trim().is_empty()) {
        def.label = label.to_string();
    }
    if let Some(end) = p.end_state() {
        def.is_end_state = end;
    }
    if let Some(note) = p.note_required() {
        def.requires_note = note;
    }
}

/// Reorder status definitions by label; definitions not named keep their
/// relative order after the named ones.
pub fn reorder_statuses(outline: &mut Outline, labels: &[String]) {
    let mut remaining = std::mem::take(&mut outline.status_defs);
    let mut ordered = Vec::with_capacity(remaining.len());
    for label in labels {
        if let Some(pos) = remaining
            .iter()
            .position(|def| def.label.eq_ignore_ascii_case(label.trim()))
        {
            ordered.push(remaining.remove(pos));
        }
    }
    ordered.append(&mut remaining);
    outline.status_defs = ordered;
}

fn apply_assign(item: &mut Item, p: SetAssign, at: DateTime<Utc>) {
    let next = non_empty(p.assigned_actor_id);
    if let Some(owner) = non_empty(p.owner_actor_id) {
        item.assigned_actor_id = next;
        item.owner_actor_id = owner;
        item.owner_delegated_from = non_empty(p.owner_delegated_from);
        item.owner_delegated_at = p.owner_delegated_at;
        return;
    }
    if let Some(next_id) = next.as_deref() {
        if next_id != item.owner_actor_id {
            item.owner_delegated_from = Some(std::mem::replace(
                &mut item.owner_actor_id,
                next_id.to_string(),
            ));
            item.owner_delegated_at = Some(at);
        }
    }
    item.assigned_actor_id = next;
}

fn apply_move(snap: &mut Snapshot, id: &str, p: &MovePayload, at: DateTime<Utc>) -> Result<()> {
    snap.item(id)?;
    if let Some(rebalance) = &p.rebalance {
        for (other, fresh) in rebalance {
            if !rank::is_valid(fresh) {
                continue;
            }
            if let Some(item) = snap.items.get_mut(other) {
                item.rank.clone_from(fresh);
                item.updated_at = at;
            }
        }
    }
    if let Some(fresh) = p.rank.as_deref().filter(|r| rank::is_valid(r)) {
        let item = snap.item_mut(id)?;
        item.rank = fresh.to_string();
        item.updated_at = at;
        return Ok(());
    }

    let (anchor, after) = match (p.before.as_deref(), p.after.as_deref()) {
        (Some(before), _) => (before, false),
        (None, Some(after)) => (after, true),
        (None, None) => return Ok(()),
    };
    let plan = {
        let siblings = snap.siblings_of(id)?;
        let view: Vec<Sibling<'_>> = siblings.iter().map(|item| Sibling::from(*item)).collect();
        let index = reorder::anchor_index(&view, id, anchor, after)
            .ok_or_else(|| ClarityError::not_found("item", anchor))?;
        reorder::plan_reorder(&view, id, index)?
    };
    for (changed, fresh) in plan.changed {
        if let Some(item) = snap.items.get_mut(&changed) {
            item.rank = fresh;
            item.updated_at = at;
        }
    }
    Ok(())
}

/// Check that `id` may move under `parent` and pick the rank it would take
/// at the end of its new siblings.
pub(crate) fn reparent_rank(snap: &Snapshot, id: &str, parent: Option<&str>) -> Result<String> {
    let outline_id = &snap.item(id)?.outline_id;
    if let Some(parent_id) = parent {
        let parent_item = snap.item(parent_id)?;
        if &parent_item.outline_id != outline_id {
            return Err(ClarityError::EventContract(format!(
                "parent {parent_id} is in outline {}, item is in {outline_id}",
                parent_item.outline_id
            )));
        }
        if snap.is_ancestor_or_self(id, parent_id) {
            return Err(ClarityError::EventContract(format!(
                "cannot move {id} under its own descendant {parent_id}"
            )));
        }
    }
    let ranks: Vec<String> = snap
        .children(outline_id, parent)
        .into_iter()
        .filter(|item| item.id != id)
        .map(|item| item.rank.clone())
        .collect();
    Ok(rank::next_after(ranks.iter().map(String::as_str))?)
}

/// Attach `id` under `parent` (or the outline root) at the end of its new
/// siblings, unless an explicit rank is given.
pub(crate) fn reparent(
    snap: &mut Snapshot,
    id: &str,
    parent: Option<&str>,
    explicit_rank: Option<String>,
    at: DateTime<Utc>,
) -> Result<()> {
    let appended = reparent_rank(snap, id, parent)?;
    let rank = explicit_rank.filter(|r| rank::is_valid(r)).unwrap_or(appended);
    let item = snap.item_mut(id)?;
    item.parent_id = parent.map(str::to_string);
    item.rank = rank;
    item.updated_at = at;
    Ok(())
}

/// Move `id` and its subtree into another outline.
///
/// The root lands at the outline root, after the current last root item,
/// with `status_id`. Descendants keep their parents; each keeps its status
/// when the target outline defines it and takes `status_id` otherwise.
/// Returns the moved ids, root first.
///
/// # Errors
///
/// [`ClarityError::NotFound`] for a missing item or outline.
pub fn move_subtree_to_outline(
    snap: &mut Snapshot,
    id: &str,
    outline_id: &str,
    status_id: &str,
    at: DateTime<Utc>,
) -> Result<Vec<String>> {
    snap.item(id)?;
    let target = snap.outline(outline_id)?.clone();
    let subtree = snap.subtree(id);
    let root_ranks: Vec<String> = snap
        .children(outline_id, None)
        .into_iter()
        .filter(|item| item.id != id)
        .map(|item| item.rank.clone())
        .collect();
    let rank = rank::next_after(root_ranks.iter().map(String::as_str))?;

    for (depth, member) in subtree.iter().enumerate() {
        let item = snap.item_mut(member)?;
        item.outline_id = target.id.clone();
        item.project_id.clone_from(&target.project_id);
        item.updated_at = at;
        if depth == 0 {
            item.parent_id = None;
            item.rank.clone_from(&rank);
            item.status_id = status_id.to_string();
        } else if target.status(&item.status_id).is_none() {
            item.status_id = status_id.to_string();
        }
    }
    Ok(subtree)
}
