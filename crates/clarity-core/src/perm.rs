//! Ownership and delegation rules for item edits.
//!
//! An actor may edit an item when any of these holds:
//!
//! 1. it owns the item;
//! 2. it is the human behind the agent that owns the item;
//! 3. it resolves to the same human as the current assignee;
//! 4. it handed the item off (`ownerDelegatedFrom`) less than the grace
//!    window ago.
//!
//! Assignment has its own claim/takeover rules on top, see
//! [`plan_assignment`].

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{ClarityError, Result};
use crate::model::{ActorKind, Item, Snapshot};

fn grace_delta(grace: Duration) -> chrono::Duration {
    chrono::Duration::from_std(grace).unwrap_or(chrono::Duration::MAX)
}

/// Whether `actor_id` may edit `item` at `now`.
#[must_use]
pub fn can_edit_item(
    snap: &Snapshot,
    actor_id: &str,
    item: &Item,
    now: DateTime<Utc>,
    grace: Duration,
) -> bool {
    if actor_id == item.owner_actor_id {
        return true;
    }

    let actor_is_human = snap
        .actors
        .get(actor_id)
        .is_some_and(|actor| actor.kind == ActorKind::Human);
    let owner_is_agent = snap
        .actors
        .get(&item.owner_actor_id)
        .is_some_and(|owner| owner.kind == ActorKind::Agent);
    if actor_is_human && owner_is_agent && snap.human_of(&item.owner_actor_id) == Some(actor_id) {
        return true;
    }

    if let Some(assigned) = item.assigned_actor_id.as_deref() {
        if snap.same_human(actor_id, assigned) {
            return true;
        }
    }

    match (item.owner_delegated_from.as_deref(), item.owner_delegated_at) {
        (Some(from), Some(at)) if from == actor_id => {
            at.checked_add_signed(grace_delta(grace))
                .is_none_or(|until| now < until)
        }
        _ => false,
    }
}

/// [`can_edit_item`] as a `Result`.
///
/// # Errors
///
/// [`ClarityError::PermissionDenied`] when the actor may not edit.
pub fn require_edit(
    snap: &Snapshot,
    actor_id: &str,
    item: &Item,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<()> {
    if can_edit_item(snap, actor_id, item, now, grace) {
        Ok(())
    } else {
        Err(ClarityError::PermissionDenied {
            actor: actor_id.to_string(),
            item: item.id.clone(),
        })
    }
}

/// New assignment and ownership fields for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignChange {
    pub assigned_actor_id: Option<String>,
    pub owner_actor_id: String,
    pub owner_delegated_from: Option<String>,
    pub owner_delegated_at: Option<DateTime<Utc>>,
}

impl AssignChange {
    fn keep(item: &Item) -> Self {
        Self {
            assigned_actor_id: item.assigned_actor_id.clone(),
            owner_actor_id: item.owner_actor_id.clone(),
            owner_delegated_from: item.owner_delegated_from.clone(),
            owner_delegated_at: item.owner_delegated_at,
        }
    }

    /// Write the fields onto `item`.
    pub fn apply(&self, item: &mut Item) {
        item.assigned_actor_id.clone_from(&self.assigned_actor_id);
        item.owner_actor_id.clone_from(&self.owner_actor_id);
        item.owner_delegated_from.clone_from(&self.owner_delegated_from);
        item.owner_delegated_at = self.owner_delegated_at;
    }
}

/// Decide what `actor_id` assigning `item` to `next` does.
///
/// Returns `None` when nothing changes.
///
/// # Errors
///
/// - [`ClarityError::NotFound`] when `next` names an unknown actor.
/// - [`ClarityError::TakeAssignedRequired`] when claiming an item assigned to
///   someone else without `take_assigned`.
/// - [`ClarityError::PermissionDenied`] when the edit rules refuse.
pub fn plan_assignment(
    snap: &Snapshot,
    actor_id: &str,
    item: &Item,
    next: Option<&str>,
    take_assigned: bool,
    now: DateTime<Utc>,
    grace: Duration,
) -> Result<Option<AssignChange>> {
    let Some(next) = next.filter(|n| !n.trim().is_empty()) else {
        if item.assigned_actor_id.is_none() {
            return Ok(None);
        }
        require_edit(snap, actor_id, item, now, grace)?;
        return Ok(Some(AssignChange {
            assigned_actor_id: None,
            ..AssignChange::keep(item)
        }));
    };

    snap.actor(next)?;
    if item.assigned_actor_id.as_deref() == Some(next) {
        return Ok(None);
    }

    if next == actor_id {
        if let Some(current) = item.assigned_actor_id.as_deref() {
            if !take_assigned {
                return Err(ClarityError::TakeAssignedRequired {
                    item: item.id.clone(),
                    assigned: current.to_string(),
                });
            }
        } else if actor_id != item.owner_actor_id
            && snap.same_human(actor_id, &item.owner_actor_id)
        {
            return Ok(Some(AssignChange {
                assigned_actor_id: Some(actor_id.to_string()),
                owner_actor_id: actor_id.to_string(),
                owner_delegated_from: None,
                owner_delegated_at: None,
            }));
        }
    }

    require_edit(snap, actor_id, item, now, grace)?;
    let mut change = AssignChange {
        assigned_actor_id: Some(next.to_string()),
        ..AssignChange::keep(item)
    };
    if next != item.owner_actor_id {
        change.owner_actor_id = next.to_string();
        change.owner_delegated_from = Some(item.owner_actor_id.clone());
        change.owner_delegated_at = Some(now);
    }
    Ok(Some(change))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::snapshot::tests::{agent, human, item, snapshot_with, ts};

    const HOUR: Duration = Duration::from_secs(3600);

    fn world() -> Snapshot {
        let mut snap = snapshot_with(Vec::new());
        for actor in [human("h1"), human("h2"), agent("a1", "h1"), agent("a2", "h2")] {
            snap.actors.insert(actor.id.clone(), actor);
        }
        snap
    }

    fn owned_by(owner: &str) -> Item {
        let mut it = item("item-a", None, "h");
        it.owner_actor_id = owner.into();
        it
    }

    #[test]
    fn owner_can_edit() {
        let snap = world();
        assert!(can_edit_item(&snap, "h1", &owned_by("h1"), ts(0), HOUR));
        assert!(!can_edit_item(&snap, "h2", &owned_by("h1"), ts(0), HOUR));
    }

    #[test]
    fn human_overrides_own_agent_but_not_the_reverse() {
        let snap = world();
        assert!(can_edit_item(&snap, "h1", &owned_by("a1"), ts(0), HOUR));
        assert!(!can_edit_item(&snap, "h2", &owned_by("a1"), ts(0), HOUR));
        assert!(!can_edit_item(&snap, "a1", &owned_by("h1"), ts(0), HOUR));
    }

    #[test]
    fn assignment_grants_edit_to_the_same_human() {
        let snap = world();
        let mut it = owned_by("h2");
        it.assigned_actor_id = Some("a1".into());
        assert!(can_edit_item(&snap, "h1", &it, ts(0), HOUR));
        assert!(can_edit_item(&snap, "a1", &it, ts(0), HOUR));
        assert!(!can_edit_item(&snap, "a2", &it, ts(0), HOUR));
    }

    #[test]
    fn delegation_grace_expires() {
        let snap = world();
        let mut it = owned_by("h2");
        it.owner_delegated_from = Some("h1".into());
        it.owner_delegated_at = Some(ts(0));
        assert!(can_edit_item(&snap, "h1", &it, ts(3599), HOUR));
        assert!(!can_edit_item(&snap, "h1", &it, ts(3600), HOUR));
        assert!(!can_edit_item(&snap, "h1", &it, ts(10), Duration::ZERO));
    }

    #[test]
    fn agent_self_claim_of_own_humans_item() {
        let snap = world();
        let mut it = owned_by("h1");
        it.owner_delegated_from = Some("h2".into());
        it.owner_delegated_at = Some(ts(0));
        let change = plan_assignment(&snap, "a1", &it, Some("a1"), true, ts(5), HOUR)
            .expect("allowed")
            .expect("changed");
        assert_eq!(change.assigned_actor_id.as_deref(), Some("a1"));
        assert_eq!(change.owner_actor_id, "a1");
        assert_eq!(change.owner_delegated_from, None);
        assert_eq!(change.owner_delegated_at, None);
    }

    #[test]
    fn claiming_someone_elses_item_needs_take_assigned() {
        let snap = world();
        let mut it = owned_by("h1");
        it.assigned_actor_id = Some("h2".into());
        let err = plan_assignment(&snap, "h1", &it, Some("h1"), false, ts(0), HOUR)
            .expect_err("needs override");
        assert!(matches!(err, ClarityError::TakeAssignedRequired { .. }));

        let change = plan_assignment(&snap, "h1", &it, Some("h1"), true, ts(0), HOUR)
            .expect("override")
            .expect("changed");
        assert_eq!(change.assigned_actor_id.as_deref(), Some("h1"));
        assert_eq!(change.owner_actor_id, "h1");
        assert_eq!(change.owner_delegated_from, None);
    }

    #[test]
    fn handing_off_transfers_ownership() {
        let snap = world();
        let it = owned_by("h1");
        let change = plan_assignment(&snap, "h1", &it, Some("h2"), false, ts(9), HOUR)
            .expect("owner may assign")
            .expect("changed");
        assert_eq!(change.owner_actor_id, "h2");
        assert_eq!(change.owner_delegated_from.as_deref(), Some("h1"));
        assert_eq!(change.owner_delegated_at, Some(ts(9)));
    }

    #[test]
    fn stranger_cannot_assign() {
        let snap = world();
        let err = plan_assignment(&snap, "h2", &owned_by("h1"), Some("a2"), false, ts(0), HOUR)
            .expect_err("not allowed");
        assert!(matches!(err, ClarityError::PermissionDenied { .. }));
    }

    #[test]
    fn clearing_and_no_ops() {
        let snap = world();
        let mut it = owned_by("h1");
        assert_eq!(
            plan_assignment(&snap, "h1", &it, None, false, ts(0), HOUR).expect("noop"),
            None
        );
        it.assigned_actor_id = Some("h2".into());
        assert_eq!(
            plan_assignment(&snap, "h1", &it, Some("h2"), false, ts(0), HOUR).expect("noop"),
            None
        );
        let cleared = plan_assignment(&snap, "h1", &it, None, false, ts(0), HOUR)
            .expect("owner clears")
            .expect("changed");
        assert_eq!(cleared.assigned_actor_id, None);
        assert_eq!(cleared.owner_actor_id, "h1");

        let err = plan_assignment(&snap, "h1", &it, Some("ghost"), false, ts(0), HOUR)
            .expect_err("unknown actor");
        assert!(matches!(err, ClarityError::NotFound { .. }));
    }
}
