//! Materialized workspace state.
//!
//! A [`Snapshot`] is what replay produces. Lookups that need derived indexes
//! (children of a parent, comments of an item) compute them on demand from
//! the entity maps; nothing is cached on the snapshot.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use super::{
    Actor, ActorKind, Attachment, Comment, Dependency, Item, Outline, Project, WorklogEntry,
};
use crate::error::{ClarityError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub actors: BTreeMap<String, Actor>,
    pub projects: BTreeMap<String, Project>,
    pub outlines: BTreeMap<String, Outline>,
    pub items: BTreeMap<String, Item>,
    pub deps: BTreeMap<String, Dependency>,
    pub comments: BTreeMap<String, Comment>,
    pub worklogs: BTreeMap<String, WorklogEntry>,
    pub attachments: BTreeMap<String, Attachment>,
    /// Events replay saw but did not recognize.
    pub unknown_events: usize,
    /// Events whose payload could not be decoded.
    pub bad_payloads: usize,
}

/// Sibling order: rank, then creation time, then id.
#[must_use]
pub fn sibling_order(a: &Item, b: &Item) -> Ordering {
    a.rank
        .cmp(&b.rank)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

impl Snapshot {
    /// Whether any entity uses `id`.
    #[must_use]
    pub fn id_in_use(&self, id: &str) -> bool {
        self.actors.contains_key(id)
            || self.projects.contains_key(id)
            || self.outlines.contains_key(id)
            || self.items.contains_key(id)
            || self.deps.contains_key(id)
            || self.comments.contains_key(id)
            || self.worklogs.contains_key(id)
            || self.attachments.contains_key(id)
    }

    /// # Errors
    ///
    /// [`ClarityError::NotFound`] when missing.
    pub fn actor(&self, id: &str) -> Result<&Actor> {
        self.actors
            .get(id)
            .ok_or_else(|| ClarityError::not_found("actor", id))
    }

    /// # Errors
    ///
    /// [`ClarityError::NotFound`] when missing.
    pub fn project(&self, id: &str) -> Result<&Project> {
        self.projects
            .get(id)
            .ok_or_else(|| ClarityError::not_found("project", id))
    }

    /// # Errors
    ///
    /// [`ClarityError::NotFound`] when missing.
    pub fn outline(&self, id: &str) -> Result<&Outline> {
        self.outlines
            .get(id)
            .ok_or_else(|| ClarityError::not_found("outline", id))
    }

    /// # Errors
    ///
    /// [`ClarityError::NotFound`] when missing.
    pub fn item(&self, id: &str) -> Result<&Item> {
        self.items
            .get(id)
            .ok_or_else(|| ClarityError::not_found("item", id))
    }

    /// # Errors
    ///
    /// [`ClarityError::NotFound`] when missing.
    pub fn item_mut(&mut self, id: &str) -> Result<&mut Item> {
        self.items
            .get_mut(id)
            .ok_or_else(|| ClarityError::not_found("item", id))
    }

    /// The human an actor stands for: itself for humans, its owner for agents.
    #[must_use]
    pub fn human_of<'a>(&'a self, actor_id: &'a str) -> Option<&'a str> {
        let actor = self.actors.get(actor_id)?;
        match actor.kind {
            ActorKind::Human => Some(actor.id.as_str()),
            ActorKind::Agent => actor.user_id.as_deref().filter(|id| !id.is_empty()),
        }
    }

    /// Whether `a` and `b` resolve to the same human.
    #[must_use]
    pub fn same_human(&self, a: &str, b: &str) -> bool {
        match (self.human_of(a), self.human_of(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Items of `outline_id` directly under `parent_id`, in sibling order.
    #[must_use]
    pub fn children(&self, outline_id: &str, parent_id: Option<&str>) -> Vec<&Item> {
        let mut out: Vec<&Item> = self
            .items
            .values()
            .filter(|item| item.outline_id == outline_id && item.parent_id.as_deref() == parent_id)
            .collect();
        out.sort_by(|a, b| sibling_order(a, b));
        out
    }

    /// Siblings of `item_id` (including itself), in sibling order.
    ///
    /// # Errors
    ///
    /// [`ClarityError::NotFound`] when the item is missing.
    pub fn siblings_of(&self, item_id: &str) -> Result<Vec<&Item>> {
        let item = self.item(item_id)?;
        Ok(self.children(&item.outline_id, item.parent_id.as_deref()))
    }

    /// `item_id` followed by all its descendants, depth first in sibling
    /// order.
    #[must_use]
    pub fn subtree(&self, item_id: &str) -> Vec<String> {
        let Some(root) = self.items.get(item_id) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root.id.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(item) = self.items.get(&id) else {
                continue;
            };
            let kids = self.children(&item.outline_id, Some(&id));
            stack.extend(kids.iter().rev().map(|kid| kid.id.clone()));
            out.push(id);
        }
        out
    }

    /// Whether `ancestor` is `item_id` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: &str, item_id: &str) -> bool {
        let mut seen = HashSet::new();
        let mut cursor = Some(item_id.to_string());
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            if !seen.insert(id.clone()) {
                return false;
            }
            cursor = self.items.get(&id).and_then(|item| item.parent_id.clone());
        }
        false
    }

    /// Ranks of items under `(outline_id, parent_id)`.
    #[must_use]
    pub fn sibling_ranks(&self, outline_id: &str, parent_id: Option<&str>) -> Vec<String> {
        self.children(outline_id, parent_id)
            .into_iter()
            .map(|item| item.rank.clone())
            .collect()
    }

    /// Whether `item`'s status is an end state of its outline.
    ///
    /// Without status definitions, a status id of `done` (any case) counts.
    #[must_use]
    pub fn is_end_state(&self, item: &Item) -> bool {
        match self.outlines.get(&item.outline_id) {
            Some(outline) if !outline.status_defs.is_empty() => outline
                .status(&item.status_id)
                .is_some_and(|def| def.is_end_state),
            _ => item.status_id.eq_ignore_ascii_case("done"),
        }
    }

    /// Comments on an item, oldest first.
    #[must_use]
    pub fn comments_for(&self, item_id: &str) -> Vec<&Comment> {
        let mut out: Vec<&Comment> = self
            .comments
            .values()
            .filter(|c| c.item_id == item_id)
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Worklog entries on an item that `viewer` may see: only those written
    /// by the same human.
    #[must_use]
    pub fn worklogs_visible_to(&self, item_id: &str, viewer: &str) -> Vec<&WorklogEntry> {
        let mut out: Vec<&WorklogEntry> = self
            .worklogs
            .values()
            .filter(|w| w.item_id == item_id && self.same_human(&w.author_id, viewer))
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Attachments on an item or comment.
    #[must_use]
    pub fn attachments_for(&self, entity_id: &str) -> Vec<&Attachment> {
        self.attachments
            .values()
            .filter(|a| a.entity_id == entity_id)
            .collect()
    }

    /// Dependencies touching an item in either direction.
    #[must_use]
    pub fn deps_for(&self, item_id: &str) -> Vec<&Dependency> {
        self.deps
            .values()
            .filter(|d| d.from_item_id == item_id || d.to_item_id == item_id)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{ActorKind, default_status_defs};
    use chrono::{DateTime, TimeZone, Utc};

    pub(crate) fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("ts")
    }

    pub(crate) fn human(id: &str) -> Actor {
        Actor {
            id: id.into(),
            kind: ActorKind::Human,
            name: id.into(),
            user_id: None,
        }
    }

    pub(crate) fn agent(id: &str, user: &str) -> Actor {
        Actor {
            id: id.into(),
            kind: ActorKind::Agent,
            name: id.into(),
            user_id: Some(user.into()),
        }
    }

    pub(crate) fn outline(id: &str) -> Outline {
        Outline {
            id: id.into(),
            project_id: "proj-1".into(),
            name: None,
            description: None,
            archived: false,
            status_defs: default_status_defs(),
            created_by: "act-1".into(),
            created_at: ts(0),
        }
    }

    pub(crate) fn item(id: &str, parent: Option<&str>, rank: &str) -> Item {
        Item {
            id: id.into(),
            project_id: "proj-1".into(),
            outline_id: "out-1".into(),
            parent_id: parent.map(str::to_string),
            rank: rank.into(),
            title: id.into(),
            description: String::new(),
            status_id: "todo".into(),
            priority: false,
            on_hold: false,
            archived: false,
            owner_actor_id: "act-1".into(),
            assigned_actor_id: None,
            owner_delegated_from: None,
            owner_delegated_at: None,
            due: None,
            schedule: None,
            due_at: None,
            scheduled_at: None,
            tags: std::collections::BTreeSet::new(),
            item_kind: String::new(),
            children_kind: String::new(),
            created_by: "act-1".into(),
            created_at: ts(0),
            updated_at: ts(0),
        }
    }

    pub(crate) fn snapshot_with(items: Vec<Item>) -> Snapshot {
        let mut snap = Snapshot::default();
        snap.actors.insert("act-1".into(), human("act-1"));
        snap.outlines.insert("out-1".into(), outline("out-1"));
        for item in items {
            snap.items.insert(item.id.clone(), item);
        }
        snap
    }

    #[test]
    fn children_follow_rank_then_created_then_id() {
        let mut b = item("b", None, "m");
        b.created_at = ts(5);
        let a = item("a", None, "m");
        let c = item("c", None, "a");
        let snap = snapshot_with(vec![a, b, c]);
        let order: Vec<_> = snap.children("out-1", None).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);
    }

    #[test]
    fn subtree_is_depth_first() {
        let snap = snapshot_with(vec![
            item("root", None, "h"),
            item("k2", Some("root"), "q"),
            item("k1", Some("root"), "8"),
            item("g", Some("k1"), "h"),
        ]);
        assert_eq!(snap.subtree("root"), ["root", "k1", "g", "k2"]);
        assert!(snap.is_ancestor_or_self("root", "g"));
        assert!(!snap.is_ancestor_or_self("k2", "g"));
    }

    #[test]
    fn human_of_resolves_agents() {
        let mut snap = Snapshot::default();
        snap.actors.insert("h1".into(), human("h1"));
        snap.actors.insert("a1".into(), agent("a1", "h1"));
        snap.actors.insert("h2".into(), human("h2"));
        assert_eq!(snap.human_of("a1"), Some("h1"));
        assert!(snap.same_human("a1", "h1"));
        assert!(!snap.same_human("a1", "h2"));
        assert!(!snap.same_human("ghost", "ghost"));
    }

    #[test]
    fn end_state_falls_back_to_done() {
        let mut snap = snapshot_with(vec![]);
        let mut it = item("i", None, "h");
        it.status_id = "done".into();
        assert!(snap.is_end_state(&it));
        it.status_id = "doing".into();
        assert!(!snap.is_end_state(&it));

        snap.outlines.get_mut("out-1").expect("outline").status_defs.clear();
        it.status_id = "DONE".into();
        assert!(snap.is_end_state(&it));
    }

    #[test]
    fn worklogs_are_private_to_the_authoring_human() {
        let mut snap = Snapshot::default();
        snap.actors.insert("h1".into(), human("h1"));
        snap.actors.insert("a1".into(), agent("a1", "h1"));
        snap.actors.insert("h2".into(), human("h2"));
        snap.worklogs.insert(
            "wl-1".into(),
            WorklogEntry {
                id: "wl-1".into(),
                item_id: "i".into(),
                author_id: "a1".into(),
                body: "did things".into(),
                created_at: ts(1),
            },
        );
        assert_eq!(snap.worklogs_visible_to("i", "h1").len(), 1);
        assert!(snap.worklogs_visible_to("i", "h2").is_empty());
    }
}
