//! Mutation layer: validated state transitions that emit events.
//!
//! A [`Mutator`] works on a snapshot the caller owns. Each operation looks
//! the entities up, checks permissions, validates the new value, and either
//! reports `changed = false` or updates the snapshot in place and returns
//! the [`EventDraft`] to append. The caller appends it; nothing here touches
//! the log.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;

use crate::config::DEFAULT_ASSIGN_GRACE;
use crate::error::{ClarityError, Result};
use crate::event::payload::{
    ArchivePayload, AttachmentAdd, DepAdd, DescriptionPayload, DuePayload, IdentityCreate, Indent,
    ItemCreate, MoveOutline, MovePayload, NamePayload, NoteAdd, OnHoldPayload, OutlineCreate,
    OutlineRename, Outdent, PARENT_NONE, PriorityPayload, SchedulePayload, SetAssign,
    SetChildrenKind, SetItemKind, SetParent, SetStatus, StatusAdd, StatusRef, StatusReorder,
    StatusUpdate, TagsPayload, TitlePayload,
};
use crate::event::{EventDraft, EventType, truncate_millis};
use crate::id::{
    ACTOR_PREFIX, COMMENT_PREFIX, DEP_PREFIX, ITEM_PREFIX, IdAllocator, OUTLINE_PREFIX,
    PROJECT_PREFIX, WORKLOG_PREFIX,
};
use crate::model::{
    Actor, ActorKind, Attachment, AttachmentOwner, CHILDREN_KINDS, Comment, DateOn, Dependency,
    ITEM_KINDS, Item, Outline, Project, Snapshot, StatusDef, WorklogEntry, default_status_defs,
    status_id_from_label,
};
use crate::perm;
use crate::rank;
use crate::reorder::{self, Sibling};
use crate::replay::{self, normalize_tags};

/// Outcome of one mutator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation<T> {
    pub changed: bool,
    pub entity: T,
    /// The event to append; `None` exactly when `changed` is false.
    pub event: Option<EventDraft>,
}

impl<T> Mutation<T> {
    const fn unchanged(entity: T) -> Self {
        Self {
            changed: false,
            entity,
            event: None,
        }
    }

    const fn changed(entity: T, event: EventDraft) -> Self {
        Self {
            changed: true,
            entity,
            event: Some(event),
        }
    }
}

/// Fields for a new item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewItem {
    pub outline_id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub description: String,
    /// Empty picks the outline's first status.
    pub status_id: String,
    pub tags: Vec<String>,
    pub item_kind: String,
}

/// Validate an item kind against the closed set.
///
/// # Errors
///
/// [`ClarityError::InvalidItemKind`].
pub fn normalize_item_kind(raw: &str) -> Result<String> {
    let kind = raw.trim().to_ascii_lowercase();
    if ITEM_KINDS.contains(&kind.as_str()) {
        Ok(kind)
    } else {
        Err(ClarityError::InvalidItemKind(raw.to_string()))
    }
}

/// Validate a children kind against the closed set.
///
/// # Errors
///
/// [`ClarityError::InvalidChildrenKind`].
pub fn normalize_children_kind(raw: &str) -> Result<String> {
    let kind = raw.trim().to_ascii_lowercase();
    if CHILDREN_KINDS.contains(&kind.as_str()) {
        Ok(kind)
    } else {
        Err(ClarityError::InvalidChildrenKind(raw.to_string()))
    }
}

/// Check a status id against an outline. Empty clears the status; outlines
/// without definitions accept any id.
///
/// # Errors
///
/// [`ClarityError::InvalidStatus`].
pub fn validate_status<'o>(outline: &'o Outline, status_id: &str) -> Result<Option<&'o StatusDef>> {
    if status_id.is_empty() {
        return Ok(None);
    }
    if outline.status_defs.is_empty() {
        return Ok(None);
    }
    outline
        .status(status_id)
        .map(Some)
        .ok_or_else(|| ClarityError::InvalidStatus {
            status: status_id.to_string(),
            outline: outline.id.clone(),
        })
}

/// Applies mutations for one acting actor.
#[derive(Debug)]
pub struct Mutator<'s> {
    snap: &'s mut Snapshot,
    actor_id: String,
    now: DateTime<Utc>,
    grace: Duration,
}

impl<'s> Mutator<'s> {
    pub fn new(snap: &'s mut Snapshot, actor_id: impl Into<String>) -> Self {
        Self {
            snap,
            actor_id: actor_id.into(),
            now: truncate_millis(Utc::now()),
            grace: DEFAULT_ASSIGN_GRACE,
        }
    }

    /// Pin the clock (tests, imports).
    #[must_use]
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = truncate_millis(now);
        self
    }

    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        self.snap
    }

    fn draft(&self, ty: EventType, id: &str, payload: &impl Serialize) -> Result<EventDraft> {
        Ok(EventDraft::new(ty, id, self.actor_id.as_str(), payload)?.issued_at(self.now))
    }

    fn require_actor(&self) -> Result<&Actor> {
        self.snap.actor(&self.actor_id)
    }

    /// Look up an item the actor wants to edit: it must exist, not be
    /// archived, and be editable by the actor.
    fn editable_item(&self, id: &str) -> Result<Item> {
        self.require_actor()?;
        let item = self.snap.item(id)?;
        if item.archived {
            return Err(ClarityError::Archived {
                kind: "item",
                id: id.to_string(),
            });
        }
        perm::require_edit(self.snap, &self.actor_id, item, self.now, self.grace)?;
        Ok(item.clone())
    }

    fn commit_item(&mut self, id: &str, change: impl FnOnce(&mut Item)) -> Result<Item> {
        let now = self.now;
        let item = self.snap.item_mut(id)?;
        change(item);
        item.updated_at = now;
        Ok(item.clone())
    }

    fn fresh_id<R: Rng>(&self, ids: &mut IdAllocator<R>, prefix: &str) -> Result<String> {
        ids.allocate(prefix, |candidate| self.snap.id_in_use(candidate))
    }

    // -- actors ------------------------------------------------------------

    /// Register an actor. Agents must name an existing human as `user_id`.
    ///
    /// The first actor of a workspace may create itself: with no acting
    /// actor set, the new actor is recorded as the event's author.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown owning human, `EventContract` when an agent
    /// names no human or a non-human.
    pub fn create_actor<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        kind: ActorKind,
        name: &str,
        user_id: Option<&str>,
    ) -> Result<Mutation<Actor>> {
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());
        if kind == ActorKind::Agent {
            let owner = user_id.ok_or_else(|| {
                ClarityError::EventContract("agents must name their owning human".into())
            })?;
            if self.snap.actor(owner)?.kind != ActorKind::Human {
                return Err(ClarityError::EventContract(format!(
                    "agent owner {owner} is not a human"
                )));
            }
        }
        let id = self.fresh_id(ids, ACTOR_PREFIX)?;
        let actor = Actor {
            id: id.clone(),
            kind,
            name: name.trim().to_string(),
            user_id: user_id.map(str::to_string),
        };
        let author = if self.actor_id.is_empty() {
            id.clone()
        } else {
            self.actor_id.clone()
        };
        let payload = IdentityCreate {
            kind,
            name: actor.name.clone(),
            user_id: actor.user_id.clone(),
        };
        let event = EventDraft::new(EventType::IdentityCreate, &id, author, &payload)?
            .issued_at(self.now);
        self.snap.actors.insert(id, actor.clone());
        Ok(Mutation::changed(actor, event))
    }

    // -- projects ----------------------------------------------------------

    /// # Errors
    ///
    /// `NotFound` for an unknown acting actor, `EventContract` for an empty name.
    pub fn create_project<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        name: &str,
    ) -> Result<Mutation<Project>> {
        self.require_actor()?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ClarityError::EventContract("project name is empty".into()));
        }
        let id = self.fresh_id(ids, PROJECT_PREFIX)?;
        let project = Project {
            id: id.clone(),
            name: name.to_string(),
            archived: false,
            created_by: self.actor_id.clone(),
            created_at: self.now,
        };
        let event = self.draft(EventType::ProjectCreate, &id, &NamePayload { name: name.into() })?;
        self.snap.projects.insert(id, project.clone());
        Ok(Mutation::changed(project, event))
    }

    /// # Errors
    ///
    /// `NotFound`, or `EventContract` for an empty name.
    pub fn rename_project(&mut self, id: &str, name: &str) -> Result<Mutation<Project>> {
        self.require_actor()?;
        let current = self.snap.project(id)?.clone();
        let name = name.trim();
        if name.is_empty() {
            return Err(ClarityError::EventContract("project name is empty".into()));
        }
        if current.name == name {
            return Ok(Mutation::unchanged(current));
        }
        let event = self.draft(EventType::ProjectRename, id, &NamePayload { name: name.into() })?;
        let project = self.snap.projects.get_mut(id).ok_or_else(|| ClarityError::not_found("project", id))?;
        project.name = name.to_string();
        Ok(Mutation::changed(project.clone(), event))
    }

    /// # Errors
    ///
    /// `NotFound`.
    pub fn set_project_archived(&mut self, id: &str, archived: bool) -> Result<Mutation<Project>> {
        self.require_actor()?;
        let current = self.snap.project(id)?.clone();
        if current.archived == archived {
            return Ok(Mutation::unchanged(current));
        }
        let event = self.draft(EventType::ProjectArchive, id, &ArchivePayload { archived })?;
        let project = self.snap.projects.get_mut(id).ok_or_else(|| ClarityError::not_found("project", id))?;
        project.archived = archived;
        Ok(Mutation::changed(project.clone(), event))
    }

    // -- outlines ----------------------------------------------------------

    /// # Errors
    ///
    /// `NotFound` for the project, `Archived` when it is archived.
    pub fn create_outline<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        project_id: &str,
        name: Option<&str>,
    ) -> Result<Mutation<Outline>> {
        self.require_actor()?;
        let project = self.snap.project(project_id)?;
        if project.archived {
            return Err(ClarityError::Archived {
                kind: "project",
                id: project_id.to_string(),
            });
        }
        let id = self.fresh_id(ids, OUTLINE_PREFIX)?;
        let name = name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        let outline = Outline {
            id: id.clone(),
            project_id: project_id.to_string(),
            name: name.clone(),
            description: None,
            archived: false,
            status_defs: default_status_defs(),
            created_by: self.actor_id.clone(),
            created_at: self.now,
        };
        let payload = OutlineCreate {
            project_id: project_id.to_string(),
            name,
            description: None,
            status_defs: Some(outline.status_defs.clone()),
        };
        let event = self.draft(EventType::OutlineCreate, &id, &payload)?;
        self.snap.outlines.insert(id, outline.clone());
        Ok(Mutation::changed(outline, event))
    }

    fn outline_op(
        &mut self,
        id: &str,
        ty: EventType,
        payload: &impl Serialize,
        change: impl FnOnce(&mut Outline) -> bool,
    ) -> Result<Mutation<Outline>> {
        self.require_actor()?;
        let mut next = self.snap.outline(id)?.clone();
        if !change(&mut next) {
            return Ok(Mutation::unchanged(next));
        }
        let event = self.draft(ty, id, payload)?;
        self.snap.outlines.insert(id.to_string(), next.clone());
        Ok(Mutation::changed(next, event))
    }

    /// Rename an outline; `None` or blank clears the name.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub fn rename_outline(&mut self, id: &str, name: Option<&str>) -> Result<Mutation<Outline>> {
        let name = name.map(str::trim).filter(|n| !n.is_empty()).map(str::to_string);
        let payload = OutlineRename { name: name.clone() };
        self.outline_op(id, EventType::OutlineRename, &payload, |o| {
            if o.name == name {
                return false;
            }
            o.name = name;
            true
        })
    }

    /// # Errors
    ///
    /// `NotFound`.
    pub fn set_outline_description(&mut self, id: &str, description: &str) -> Result<Mutation<Outline>> {
        let description = Some(description.trim().to_string()).filter(|d| !d.is_empty());
        let payload = DescriptionPayload {
            description: description.clone().unwrap_or_default(),
        };
        self.outline_op(id, EventType::OutlineSetDescription, &payload, |o| {
            if o.description == description {
                return false;
            }
            o.description = description;
            true
        })
    }

    /// # Errors
    ///
    /// `NotFound`.
    pub fn set_outline_archived(&mut self, id: &str, archived: bool) -> Result<Mutation<Outline>> {
        self.outline_op(id, EventType::OutlineArchive, &ArchivePayload { archived }, |o| {
            if o.archived == archived {
                return false;
            }
            o.archived = archived;
            true
        })
    }

    /// Add a status definition; its id is derived from the label.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidStatus` for a blank label or an id already in use.
    pub fn add_status(
        &mut self,
        outline_id: &str,
        label: &str,
        is_end_state: bool,
        requires_note: bool,
    ) -> Result<Mutation<Outline>> {
        let label = label.trim().to_string();
        let id = status_id_from_label(&label);
        let outline = self.snap.outline(outline_id)?;
        if id.is_empty() || outline.status(&id).is_some() {
            return Err(ClarityError::InvalidStatus {
                status: label,
                outline: outline_id.to_string(),
            });
        }
        let payload = StatusAdd {
            id: Some(id.clone()),
            label: label.clone(),
            is_end_state,
            requires_note,
        };
        self.outline_op(outline_id, EventType::OutlineStatusAdd, &payload, |o| {
            o.status_defs.push(StatusDef {
                id,
                label,
                is_end_state,
                requires_note,
            });
            true
        })
    }

    /// # Errors
    ///
    /// `NotFound`, or `InvalidStatus` when no definition matches.
    pub fn remove_status(&mut self, outline_id: &str, status: &str) -> Result<Mutation<Outline>> {
        let target = StatusRef {
            id: Some(status.to_string()),
            label: Some(status.to_string()),
        };
        let pos = self
            .snap
            .outline(outline_id)?
            .status_position(Some(status), Some(status))
            .ok_or_else(|| ClarityError::InvalidStatus {
                status: status.to_string(),
                outline: outline_id.to_string(),
            })?;
        self.outline_op(outline_id, EventType::OutlineStatusRemove, &target, |o| {
            o.status_defs.remove(pos);
            true
        })
    }

    /// Apply a partial update to one status definition.
    ///
    /// # Errors
    ///
    /// `NotFound`, or `InvalidStatus` when no definition matches.
    pub fn update_status(&mut self, outline_id: &str, update: StatusUpdate) -> Result<Mutation<Outline>> {
        let pos = self
            .snap
            .outline(outline_id)?
            .status_position(update.target.id.as_deref(), update.target.label.as_deref())
            .ok_or_else(|| ClarityError::InvalidStatus {
                status: update.target.id.clone().or_else(|| update.target.label.clone()).unwrap_or_default(),
                outline: outline_id.to_string(),
            })?;
        let end = update.end_state();
        let note = update.note_required();
        let label = update.new_label.clone().filter(|l| !l.trim().is_empty());
        self.outline_op(outline_id, EventType::OutlineStatusUpdate, &update, |o| {
            let def = &mut o.status_defs[pos];
            let before = def.clone();
            if let Some(label) = label {
                def.label = label;
            }
            if let Some(end) = end {
                def.is_end_state = end;
            }
            if let Some(note) = note {
                def.requires_note = note;
            }
            *def != before
        })
    }

    /// Reorder statuses by label; unnamed statuses keep their relative
    /// order at the end.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub fn reorder_statuses(&mut self, outline_id: &str, labels: &[String]) -> Result<Mutation<Outline>> {
        let payload = StatusReorder {
            labels: labels.to_vec(),
        };
        self.outline_op(outline_id, EventType::OutlineStatusReorder, &payload, |o| {
            let before = o.status_defs.clone();
            replay::reorder_statuses(o, labels);
            o.status_defs != before
        })
    }

    // -- items -------------------------------------------------------------

    /// Create an item at the end of its sibling list.
    ///
    /// # Errors
    ///
    /// `NotFound` for outline or parent, `Archived` for an archived outline
    /// or parent, `InvalidStatus`, `InvalidItemKind`, `EventContract` for a
    /// blank title.
    pub fn create_item<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        new: NewItem,
    ) -> Result<Mutation<Item>> {
        self.require_actor()?;
        let title = new.title.trim().to_string();
        if title.is_empty() {
            return Err(ClarityError::EventContract("item title is empty".into()));
        }
        let outline = self.snap.outline(&new.outline_id)?;
        if outline.archived {
            return Err(ClarityError::Archived {
                kind: "outline",
                id: outline.id.clone(),
            });
        }
        let status_id = if new.status_id.is_empty() {
            outline.status_defs.first().map(|def| def.id.clone()).unwrap_or_default()
        } else {
            validate_status(outline, &new.status_id)?;
            new.status_id.clone()
        };
        let item_kind = normalize_item_kind(&new.item_kind)?;
        let parent_id = new.parent_id.clone().filter(|p| !p.trim().is_empty());
        if let Some(parent) = parent_id.as_deref() {
            let parent = self.snap.item(parent)?;
            if parent.outline_id != outline.id {
                return Err(ClarityError::EventContract(format!(
                    "parent {} is not in outline {}",
                    parent.id, outline.id
                )));
            }
            if parent.archived {
                return Err(ClarityError::Archived {
                    kind: "item",
                    id: parent.id.clone(),
                });
            }
        }
        let project_id = outline.project_id.clone();
        let ranks = self.snap.sibling_ranks(&new.outline_id, parent_id.as_deref());
        let rank = rank::next_after(ranks.iter().map(String::as_str))?;
        let id = self.fresh_id(ids, ITEM_PREFIX)?;

        let payload = ItemCreate {
            project_id: project_id.clone(),
            outline_id: new.outline_id.clone(),
            parent_id: parent_id.clone(),
            rank: rank.clone(),
            title: title.clone(),
            description: new.description.clone(),
            status_id: status_id.clone(),
            owner_actor_id: Some(self.actor_id.clone()),
            tags: normalize_tags(&new.tags).into_iter().collect(),
            item_kind: item_kind.clone(),
            ..ItemCreate::default()
        };
        let event = self.draft(EventType::ItemCreate, &id, &payload)?;
        let item = Item {
            id: id.clone(),
            project_id,
            outline_id: new.outline_id,
            parent_id,
            rank,
            title,
            description: new.description,
            status_id,
            priority: false,
            on_hold: false,
            archived: false,
            owner_actor_id: self.actor_id.clone(),
            assigned_actor_id: None,
            owner_delegated_from: None,
            owner_delegated_at: None,
            due: None,
            schedule: None,
            due_at: None,
            scheduled_at: None,
            tags: normalize_tags(&new.tags),
            item_kind,
            children_kind: String::new(),
            created_by: self.actor_id.clone(),
            created_at: self.now,
            updated_at: self.now,
        };
        self.snap.items.insert(id, item.clone());
        Ok(Mutation::changed(item, event))
    }

    /// Shared shape of the simple item setters.
    fn set_item_field<P: Serialize>(
        &mut self,
        id: &str,
        ty: EventType,
        payload: &P,
        unchanged: impl FnOnce(&Item) -> bool,
        change: impl FnOnce(&mut Item),
    ) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        if unchanged(&current) {
            return Ok(Mutation::unchanged(current));
        }
        let event = self.draft(ty, id, payload)?;
        let item = self.commit_item(id, change)?;
        Ok(Mutation::changed(item, event))
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `EventContract` for a blank title.
    pub fn set_title(&mut self, id: &str, title: &str) -> Result<Mutation<Item>> {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(ClarityError::EventContract("item title is empty".into()));
        }
        let payload = TitlePayload { title: title.clone() };
        self.set_item_field(id, EventType::ItemSetTitle, &payload, |i| i.title == title, |i| {
            i.title = payload.title.clone();
        })
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn set_description(&mut self, id: &str, description: &str) -> Result<Mutation<Item>> {
        let payload = DescriptionPayload {
            description: description.to_string(),
        };
        self.set_item_field(
            id,
            EventType::ItemSetDescription,
            &payload,
            |i| i.description == description,
            |i| i.description = description.to_string(),
        )
    }

    /// Set an item's status. Statuses flagged `requiresNote` need a
    /// non-blank `note`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `InvalidStatus`,
    /// `StatusNoteRequired`.
    pub fn set_item_status(
        &mut self,
        id: &str,
        status_id: &str,
        note: Option<&str>,
    ) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        let outline = self.snap.outline(&current.outline_id)?;
        let status_id = status_id.trim();
        let def = validate_status(outline, status_id)?;
        if current.status_id == status_id {
            return Ok(Mutation::unchanged(current));
        }
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if def.is_some_and(|d| d.requires_note) && note.is_none() {
            return Err(ClarityError::StatusNoteRequired {
                status: status_id.to_string(),
            });
        }
        let payload = SetStatus {
            to: Some(status_id.to_string()),
            status: None,
            note: note.map(str::to_string),
        };
        let event = self.draft(EventType::ItemSetStatus, id, &payload)?;
        let item = self.commit_item(id, |i| i.status_id = status_id.to_string())?;
        Ok(Mutation::changed(item, event))
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn set_priority(&mut self, id: &str, priority: bool) -> Result<Mutation<Item>> {
        self.set_item_field(
            id,
            EventType::ItemSetPriority,
            &PriorityPayload { priority },
            |i| i.priority == priority,
            |i| i.priority = priority,
        )
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn set_on_hold(&mut self, id: &str, on_hold: bool) -> Result<Mutation<Item>> {
        self.set_item_field(
            id,
            EventType::ItemSetOnHold,
            &OnHoldPayload { on_hold },
            |i| i.on_hold == on_hold,
            |i| i.on_hold = on_hold,
        )
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `EventContract` for a
    /// malformed time.
    pub fn set_due(&mut self, id: &str, due: Option<DateOn>) -> Result<Mutation<Item>> {
        check_date(due.as_ref())?;
        let payload = DuePayload { due: due.clone() };
        self.set_item_field(id, EventType::ItemSetDue, &payload, |i| i.due == due, |i| {
            i.due = payload.due.clone();
            i.due_at = None;
        })
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `EventContract` for a
    /// malformed time.
    pub fn set_schedule(&mut self, id: &str, schedule: Option<DateOn>) -> Result<Mutation<Item>> {
        check_date(schedule.as_ref())?;
        let payload = SchedulePayload {
            schedule: schedule.clone(),
        };
        self.set_item_field(
            id,
            EventType::ItemSetSchedule,
            &payload,
            |i| i.schedule == schedule,
            |i| {
                i.schedule = payload.schedule.clone();
                i.scheduled_at = None;
            },
        )
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn add_tags(&mut self, id: &str, tags: &[String]) -> Result<Mutation<Item>> {
        let tags = normalize_tags(tags);
        let payload = TagsPayload {
            tags: tags.iter().cloned().collect(),
        };
        self.set_item_field(id, EventType::ItemTagsAdd, &payload, |i| tags.is_subset(&i.tags), |i| {
            i.tags.extend(payload.tags.iter().cloned());
        })
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn remove_tags(&mut self, id: &str, tags: &[String]) -> Result<Mutation<Item>> {
        let tags = normalize_tags(tags);
        let payload = TagsPayload {
            tags: tags.iter().cloned().collect(),
        };
        self.set_item_field(
            id,
            EventType::ItemTagsRemove,
            &payload,
            |i| i.tags.is_disjoint(&tags),
            |i| i.tags.retain(|t| !tags.contains(t)),
        )
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn set_tags(&mut self, id: &str, tags: &[String]) -> Result<Mutation<Item>> {
        let tags: BTreeSet<String> = normalize_tags(tags);
        let payload = TagsPayload {
            tags: tags.iter().cloned().collect(),
        };
        self.set_item_field(id, EventType::ItemTagsSet, &payload, |i| i.tags == tags, |i| {
            i.tags = tags.clone();
        })
    }

    /// Archive or unarchive an item. Unarchiving is the one edit allowed on
    /// an archived item.
    ///
    /// # Errors
    ///
    /// `NotFound`, `PermissionDenied`.
    pub fn set_item_archived(&mut self, id: &str, archived: bool) -> Result<Mutation<Item>> {
        self.require_actor()?;
        let current = self.snap.item(id)?.clone();
        perm::require_edit(self.snap, &self.actor_id, &current, self.now, self.grace)?;
        if current.archived == archived {
            return Ok(Mutation::unchanged(current));
        }
        let event = self.draft(EventType::ItemSetArchive, id, &ArchivePayload { archived })?;
        let item = self.commit_item(id, |i| i.archived = archived)?;
        Ok(Mutation::changed(item, event))
    }

    /// Assign (or with `None`, unassign) an item, applying the claim and
    /// takeover rules.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `TakeAssignedRequired`.
    pub fn set_assigned_actor(
        &mut self,
        id: &str,
        next: Option<&str>,
        take_assigned: bool,
    ) -> Result<Mutation<Item>> {
        self.require_actor()?;
        let current = self.snap.item(id)?.clone();
        if current.archived {
            return Err(ClarityError::Archived {
                kind: "item",
                id: id.to_string(),
            });
        }
        let Some(change) = perm::plan_assignment(
            self.snap,
            &self.actor_id,
            &current,
            next,
            take_assigned,
            self.now,
            self.grace,
        )?
        else {
            return Ok(Mutation::unchanged(current));
        };
        let payload = SetAssign {
            assigned_actor_id: change.assigned_actor_id.clone(),
            owner_actor_id: Some(change.owner_actor_id.clone()),
            owner_delegated_from: change.owner_delegated_from.clone(),
            owner_delegated_at: change.owner_delegated_at,
        };
        let event = self.draft(EventType::ItemSetAssign, id, &payload)?;
        let item = self.commit_item(id, |i| change.apply(i))?;
        Ok(Mutation::changed(item, event))
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `InvalidItemKind`.
    pub fn set_item_kind(&mut self, id: &str, kind: &str) -> Result<Mutation<Item>> {
        let kind = normalize_item_kind(kind)?;
        let payload = SetItemKind {
            item_kind: kind.clone(),
        };
        self.set_item_field(id, EventType::ItemSetKind, &payload, |i| i.item_kind == kind, |i| {
            i.item_kind = payload.item_kind.clone();
        })
    }

    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `InvalidChildrenKind`.
    pub fn set_item_children_kind(&mut self, id: &str, kind: &str) -> Result<Mutation<Item>> {
        let kind = normalize_children_kind(kind)?;
        let payload = SetChildrenKind {
            children_kind: kind.clone(),
        };
        self.set_item_field(
            id,
            EventType::ItemSetChildrenKind,
            &payload,
            |i| i.children_kind == kind,
            |i| i.children_kind = payload.children_kind.clone(),
        )
    }

    // -- structure ---------------------------------------------------------

    /// Move an item to `index` among its siblings.
    ///
    /// The emitted `item.move` carries the moved item's rank, plus a
    /// `rebalance` map when neighbours had to be re-ranked too.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, rank errors.
    pub fn move_item(&mut self, id: &str, index: usize) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        let plan = {
            let siblings = self.snap.siblings_of(id)?;
            let view: Vec<Sibling<'_>> = siblings.iter().map(|i| Sibling::from(*i)).collect();
            reorder::plan_reorder(&view, id, index)?
        };
        if plan.is_empty() {
            return Ok(Mutation::unchanged(current));
        }
        let only_self = plan.changed.len() == 1 && plan.changed.contains_key(id);
        let payload = MovePayload {
            rank: plan.rank_of(id).map(str::to_string),
            rebalance: (!only_self).then(|| plan.changed.clone()),
            ..MovePayload::default()
        };
        let event = self.draft(EventType::ItemMove, id, &payload)?;
        let now = self.now;
        for (other, fresh) in plan.changed {
            let sibling = self.snap.item_mut(&other)?;
            sibling.rank = fresh;
            sibling.updated_at = now;
        }
        Ok(Mutation::changed(self.snap.item(id)?.clone(), event))
    }

    /// Re-parent an item (`None` for the outline root), appending it after
    /// its new siblings.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `EventContract` for a
    /// cross-outline parent or a cycle.
    pub fn set_parent(&mut self, id: &str, parent: Option<&str>) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        let parent = parent.map(str::trim).filter(|p| !p.is_empty() && *p != PARENT_NONE);
        if current.parent_id.as_deref() == parent {
            return Ok(Mutation::unchanged(current));
        }
        self.reparent_with(id, parent, |rank| {
            let payload = SetParent {
                parent: parent.unwrap_or(PARENT_NONE).to_string(),
                rank: Some(rank.to_string()),
            };
            (EventType::ItemSetParent, serde_json::to_value(payload))
        })
    }

    /// Nest an item under its previous sibling. Unchanged for the first
    /// sibling.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn indent(&mut self, id: &str) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        let new_parent = {
            let siblings = self.snap.siblings_of(id)?;
            let pos = siblings.iter().position(|s| s.id == id).unwrap_or_default();
            pos.checked_sub(1).map(|prev| siblings[prev].id.clone())
        };
        let Some(parent) = new_parent else {
            return Ok(Mutation::unchanged(current));
        };
        self.reparent_with(id, Some(parent.as_str()), |_| {
            (
                EventType::ItemIndent,
                serde_json::to_value(Indent {
                    parent_id: parent.clone(),
                }),
            )
        })
    }

    /// Lift an item to its grandparent (or the root). Unchanged at the root.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`.
    pub fn outdent(&mut self, id: &str) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        let Some(parent_id) = current.parent_id.clone() else {
            return Ok(Mutation::unchanged(current));
        };
        let grandparent = self.snap.item(&parent_id)?.parent_id.clone();
        self.reparent_with(id, grandparent.as_deref(), |_| {
            (
                EventType::ItemOutdent,
                serde_json::to_value(Outdent {
                    from_parent_id: Some(parent_id.clone()),
                }),
            )
        })
    }

    fn reparent_with(
        &mut self,
        id: &str,
        parent: Option<&str>,
        event: impl FnOnce(&str) -> (EventType, serde_json::Result<serde_json::Value>),
    ) -> Result<Mutation<Item>> {
        let rank = replay::reparent_rank(self.snap, id, parent)?;
        let (ty, payload) = event(&rank);
        let draft = self.draft(ty, id, &payload?)?;
        let now = self.now;
        let item = self.commit_item(id, |i| {
            i.parent_id = parent.map(str::to_string);
            i.rank = rank;
            i.updated_at = now;
        })?;
        Ok(Mutation::changed(item, draft))
    }

    /// Move an item and its subtree to another outline, landing at the root
    /// after the last root item with `status_id`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Archived`, `PermissionDenied`, `InvalidStatus`.
    pub fn move_item_to_outline(
        &mut self,
        id: &str,
        outline_id: &str,
        status_id: &str,
    ) -> Result<Mutation<Item>> {
        let current = self.editable_item(id)?;
        let target = self.snap.outline(outline_id)?;
        if target.archived {
            return Err(ClarityError::Archived {
                kind: "outline",
                id: outline_id.to_string(),
            });
        }
        let status_id = status_id.trim();
        validate_status(target, status_id)?;
        if current.outline_id == outline_id
            && current.parent_id.is_none()
            && current.status_id == status_id
        {
            return Ok(Mutation::unchanged(current));
        }
        let payload = MoveOutline {
            outline_id: outline_id.to_string(),
            status_id: status_id.to_string(),
        };
        let event = self.draft(EventType::ItemMoveOutline, id, &payload)?;
        replay::move_subtree_to_outline(self.snap, id, outline_id, status_id, self.now)?;
        Ok(Mutation::changed(self.snap.item(id)?.clone(), event))
    }

    // -- related records ---------------------------------------------------

    /// # Errors
    ///
    /// `NotFound` for either item, `PermissionDenied` on the source item,
    /// `EventContract` for a self-dependency.
    pub fn add_dependency<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        from: &str,
        to: &str,
        dep_type: &str,
    ) -> Result<Mutation<Dependency>> {
        self.editable_item(from)?;
        self.snap.item(to)?;
        if from == to {
            return Err(ClarityError::EventContract(format!("{from} cannot depend on itself")));
        }
        let dep_type = Some(dep_type.trim())
            .filter(|t| !t.is_empty())
            .unwrap_or("blocks")
            .to_string();
        if let Some(existing) = self.snap.deps.values().find(|d| {
            d.from_item_id == from && d.to_item_id == to && d.dep_type == dep_type
        }) {
            return Ok(Mutation::unchanged(existing.clone()));
        }
        let id = self.fresh_id(ids, DEP_PREFIX)?;
        let payload = DepAdd {
            from_item_id: from.to_string(),
            to_item_id: to.to_string(),
            dep_type: dep_type.clone(),
        };
        let event = self.draft(EventType::DepAdd, &id, &payload)?;
        let dep = Dependency {
            id: id.clone(),
            from_item_id: from.to_string(),
            to_item_id: to.to_string(),
            dep_type,
        };
        self.snap.deps.insert(id, dep.clone());
        Ok(Mutation::changed(dep, event))
    }

    fn note_body(&self, item_id: &str, body: &str) -> Result<String> {
        self.require_actor()?;
        self.snap.item(item_id)?;
        let body = body.trim();
        if body.is_empty() {
            return Err(ClarityError::EventContract("note body is empty".into()));
        }
        Ok(body.to_string())
    }

    /// Anyone may comment, including on archived items.
    ///
    /// # Errors
    ///
    /// `NotFound`, `EventContract` for a blank body.
    pub fn add_comment<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        item_id: &str,
        body: &str,
    ) -> Result<Mutation<Comment>> {
        let body = self.note_body(item_id, body)?;
        let id = self.fresh_id(ids, COMMENT_PREFIX)?;
        let payload = NoteAdd {
            item_id: item_id.to_string(),
            body: body.clone(),
        };
        let event = self.draft(EventType::CommentAdd, &id, &payload)?;
        let comment = Comment {
            id: id.clone(),
            item_id: item_id.to_string(),
            author_id: self.actor_id.clone(),
            body,
            created_at: self.now,
        };
        self.snap.comments.insert(id, comment.clone());
        Ok(Mutation::changed(comment, event))
    }

    /// Worklog entries are private to the author's human.
    ///
    /// # Errors
    ///
    /// `NotFound`, `EventContract` for a blank body.
    pub fn add_worklog<R: Rng>(
        &mut self,
        ids: &mut IdAllocator<R>,
        item_id: &str,
        body: &str,
    ) -> Result<Mutation<WorklogEntry>> {
        let body = self.note_body(item_id, body)?;
        let id = self.fresh_id(ids, WORKLOG_PREFIX)?;
        let payload = NoteAdd {
            item_id: item_id.to_string(),
            body: body.clone(),
        };
        let event = self.draft(EventType::WorklogAdd, &id, &payload)?;
        let entry = WorklogEntry {
            id: id.clone(),
            item_id: item_id.to_string(),
            author_id: self.actor_id.clone(),
            body,
            created_at: self.now,
        };
        self.snap.worklogs.insert(id, entry.clone());
        Ok(Mutation::changed(entry, event))
    }

    /// Record an attachment already stored under `resources/attachments`.
    ///
    /// # Errors
    ///
    /// `NotFound` for the owning entity; `Archived`/`PermissionDenied` for
    /// item attachments.
    pub fn add_attachment(
        &mut self,
        owner: AttachmentOwner,
        entity_id: &str,
        record: AttachmentAdd,
    ) -> Result<Mutation<Attachment>> {
        let ty = match owner {
            AttachmentOwner::Item => {
                self.editable_item(entity_id)?;
                EventType::ItemAttachmentAdd
            }
            AttachmentOwner::Comment => {
                self.require_actor()?;
                if !self.snap.comments.contains_key(entity_id) {
                    return Err(ClarityError::not_found("comment", entity_id));
                }
                EventType::CommentAttachmentAdd
            }
        };
        if let Some(existing) = self.snap.attachments.get(&record.attachment_id) {
            return Ok(Mutation::unchanged(existing.clone()));
        }
        let event = self.draft(ty, entity_id, &record)?;
        let attachment = record.into_attachment(owner, entity_id);
        self.snap
            .attachments
            .insert(attachment.id.clone(), attachment.clone());
        Ok(Mutation::changed(attachment, event))
    }
}

fn check_date(date: Option<&DateOn>) -> Result<()> {
    match date {
        Some(d) if !d.is_valid() => Err(ClarityError::EventContract(format!(
            "invalid time {:?}; expected HH:MM",
            d.time
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::snapshot::tests::{agent, human, ts};
    use crate::replay::replay_envelopes;
    use crate::event::Envelope;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    struct World {
        snap: Snapshot,
        ids: IdAllocator<StdRng>,
        events: Vec<Envelope>,
        seq: u64,
    }

    impl World {
        fn new() -> Self {
            let mut snap = Snapshot::default();
            for actor in [human("h1"), human("h2"), agent("a1", "h1")] {
                snap.actors.insert(actor.id.clone(), actor);
            }
            Self {
                snap,
                ids: IdAllocator::with_rng(StdRng::seed_from_u64(11), None),
                events: Vec::new(),
                seq: 0,
            }
        }

        fn as_actor(&mut self, actor: &str) -> Mutator<'_> {
            self.seq += 1;
            Mutator::new(&mut self.snap, actor).at(ts(i64::try_from(self.seq).unwrap_or(0)))
        }

        fn record<T>(&mut self, m: &Mutation<T>) {
            if let Some(draft) = m.event.clone() {
                self.events.push(draft.seal("ws", "rep", 1, Vec::new()).expect("seal"));
            }
        }

        fn outline(&mut self) -> String {
            let mut ids = IdAllocator::with_rng(StdRng::seed_from_u64(1), None);
            let project = self.as_actor("h1").create_project(&mut ids, "P").expect("project");
            self.record(&project);
            let outline = self
                .as_actor("h1")
                .create_outline(&mut ids, &project.entity.id, Some("O"))
                .expect("outline");
            self.record(&outline);
            outline.entity.id
        }

        fn item(&mut self, outline: &str, title: &str) -> String {
            let new = NewItem {
                outline_id: outline.into(),
                title: title.into(),
                ..NewItem::default()
            };
            self.seq += 1;
            let at = ts(i64::try_from(self.seq).unwrap_or(0));
            let m = Mutator::new(&mut self.snap, "h1")
                .at(at)
                .create_item(&mut self.ids, new)
                .expect("item");
            self.record(&m);
            m.entity.id
        }
    }

    #[test]
    fn created_items_append_and_default_status() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let b = w.item(&out, "b");
        assert!(w.snap.items[&a].rank < w.snap.items[&b].rank);
        assert_eq!(w.snap.items[&a].status_id, "todo");
        assert_eq!(w.snap.items[&a].owner_actor_id, "h1");
    }

    #[test]
    fn unchanged_value_emits_no_event() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let m = w.as_actor("h1").set_title(&a, "a").expect("same");
        assert!(!m.changed);
        assert!(m.event.is_none());
        let m = w.as_actor("h1").set_title(&a, "b").expect("new");
        assert!(m.changed);
        assert_eq!(m.event.map(|e| e.event_type), Some(EventType::ItemSetTitle));
    }

    #[test]
    fn status_validation_and_required_note() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let err = w.as_actor("h1").set_item_status(&a, "bogus", None).expect_err("invalid");
        assert!(matches!(err, ClarityError::InvalidStatus { .. }));

        w.as_actor("h1").add_status(&out, "Blocked", false, true).expect("add");
        let err = w.as_actor("h1").set_item_status(&a, "blocked", Some("  ")).expect_err("note");
        assert!(matches!(err, ClarityError::StatusNoteRequired { .. }));
        let m = w
            .as_actor("h1")
            .set_item_status(&a, "blocked", Some("waiting on review"))
            .expect("with note");
        assert_eq!(m.entity.status_id, "blocked");

        let m = w.as_actor("h1").set_item_status(&a, "", None).expect("clear");
        assert_eq!(m.entity.status_id, "");
    }

    #[test]
    fn kinds_are_normalized() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let m = w.as_actor("h1").set_item_kind(&a, " Checkbox ").expect("kind");
        assert_eq!(m.entity.item_kind, "checkbox");
        let err = w.as_actor("h1").set_item_kind(&a, "radio").expect_err("bad kind");
        assert!(matches!(err, ClarityError::InvalidItemKind(_)));
        let err = w.as_actor("h1").set_item_children_kind(&a, "status").expect_err("bad");
        assert!(matches!(err, ClarityError::InvalidChildrenKind(_)));
    }

    #[test]
    fn archived_items_refuse_edits_but_can_be_restored() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        w.as_actor("h1").set_item_archived(&a, true).expect("archive");
        let err = w.as_actor("h1").set_title(&a, "x").expect_err("archived");
        assert!(matches!(err, ClarityError::Archived { .. }));
        let m = w.as_actor("h1").set_item_archived(&a, false).expect("restore");
        assert!(m.changed && !m.entity.archived);
    }

    #[test]
    fn non_owner_cannot_edit() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let err = w.as_actor("h2").set_priority(&a, true).expect_err("denied");
        assert!(matches!(err, ClarityError::PermissionDenied { .. }));
        // The owner's agent is not the owner and isn't assigned.
        let err = w.as_actor("a1").set_priority(&a, true).expect_err("denied");
        assert!(matches!(err, ClarityError::PermissionDenied { .. }));
    }

    #[test]
    fn agent_self_claims_and_replay_agrees() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let m = w
            .as_actor("a1")
            .set_assigned_actor(&a, Some("a1"), true)
            .expect("self-claim");
        w.record(&m);
        assert_eq!(m.entity.assigned_actor_id.as_deref(), Some("a1"));
        assert_eq!(m.entity.owner_actor_id, "a1");
        assert_eq!(m.entity.owner_delegated_from, None);

        let mut replayed = replay_envelopes(&w.events);
        for actor in [human("h1"), agent("a1", "h1")] {
            replayed.actors.insert(actor.id.clone(), actor);
        }
        assert_eq!(replayed.items[&a].owner_actor_id, "a1");
        assert_eq!(replayed.items[&a].assigned_actor_id.as_deref(), Some("a1"));
    }

    #[test]
    fn move_reorders_and_replays_identically() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let b = w.item(&out, "b");
        let c = w.item(&out, "c");
        let m = w.as_actor("h1").move_item(&c, 0).expect("move");
        w.record(&m);
        let order: Vec<String> = w.snap.children(&out, None).iter().map(|i| i.id.clone()).collect();
        assert_eq!(order, [c.clone(), a.clone(), b.clone()]);

        let replayed = replay_envelopes(&w.events);
        let order: Vec<String> = replayed.children(&out, None).iter().map(|i| i.id.clone()).collect();
        assert_eq!(order, [c, a, b]);
    }

    #[test]
    fn indent_outdent_round_trip() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let b = w.item(&out, "b");
        let m = w.as_actor("h1").indent(&a).expect("first sibling");
        assert!(!m.changed);
        let m = w.as_actor("h1").indent(&b).expect("indent");
        w.record(&m);
        assert_eq!(m.entity.parent_id.as_deref(), Some(a.as_str()));
        let m = w.as_actor("h1").outdent(&b).expect("outdent");
        w.record(&m);
        assert_eq!(m.entity.parent_id, None);

        let replayed = replay_envelopes(&w.events);
        assert_eq!(replayed.items[&b].parent_id, None);
        assert_eq!(replayed.items[&b].rank, w.snap.items[&b].rank);
    }

    #[test]
    fn move_to_outline_takes_subtree() {
        let mut w = World::new();
        let out = w.outline();
        let out2 = w.outline();
        let a = w.item(&out, "a");
        let b = w.item(&out, "b");
        w.as_actor("h1").set_parent(&b, Some(a.as_str())).expect("nest");
        let m = w.as_actor("h1").move_item_to_outline(&a, &out2, "doing").expect("move");
        assert!(m.changed);
        assert_eq!(w.snap.items[&b].outline_id, out2);
        assert_eq!(w.snap.items[&b].parent_id.as_deref(), Some(a.as_str()));
        assert_eq!(w.snap.items[&a].status_id, "doing");

        let err = w.as_actor("h1").move_item_to_outline(&a, &out, "nope").expect_err("status");
        assert!(matches!(err, ClarityError::InvalidStatus { .. }));
    }

    #[test]
    fn tags_add_remove_set() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let tags = |xs: &[&str]| xs.iter().map(|s| (*s).to_string()).collect::<Vec<_>>();
        let m = w.as_actor("h1").add_tags(&a, &tags(&["x", " y ", ""])).expect("add");
        assert_eq!(m.entity.tags.len(), 2);
        assert!(!w.as_actor("h1").add_tags(&a, &tags(&["x"])).expect("noop").changed);
        let m = w.as_actor("h1").remove_tags(&a, &tags(&["x"])).expect("remove");
        assert_eq!(m.entity.tags.iter().collect::<Vec<_>>(), ["y"]);
        let m = w.as_actor("h1").set_tags(&a, &tags(&["z"])).expect("set");
        assert_eq!(m.entity.tags.iter().collect::<Vec<_>>(), ["z"]);
    }

    #[test]
    fn notes_and_dependencies() {
        let mut w = World::new();
        let out = w.outline();
        let a = w.item(&out, "a");
        let b = w.item(&out, "b");
        let mut ids = IdAllocator::with_rng(StdRng::seed_from_u64(5), None);
        let dep = w.as_actor("h1").add_dependency(&mut ids, &a, &b, "").expect("dep");
        assert_eq!(dep.entity.dep_type, "blocks");
        assert!(!w.as_actor("h1").add_dependency(&mut ids, &a, &b, "blocks").expect("dup").changed);

        let c = w.as_actor("h2").add_comment(&mut ids, &a, "looks good").expect("comment");
        assert_eq!(c.entity.author_id, "h2");
        let err = w.as_actor("h2").add_worklog(&mut ids, &a, "  ").expect_err("blank");
        assert!(matches!(err, ClarityError::EventContract(_)));
    }

    #[test]
    fn agents_need_a_human_owner() {
        let mut w = World::new();
        let mut ids = IdAllocator::with_rng(StdRng::seed_from_u64(3), None);
        let err = w
            .as_actor("h1")
            .create_actor(&mut ids, ActorKind::Agent, "bot", None)
            .expect_err("no owner");
        assert!(matches!(err, ClarityError::EventContract(_)));
        let err = w
            .as_actor("h1")
            .create_actor(&mut ids, ActorKind::Agent, "bot", Some("a1"))
            .expect_err("agent owner");
        assert!(matches!(err, ClarityError::EventContract(_)));
        let m = w
            .as_actor("h1")
            .create_actor(&mut ids, ActorKind::Agent, "bot", Some("h1"))
            .expect("agent");
        assert!(m.entity.id.starts_with("act-"));
    }
}
