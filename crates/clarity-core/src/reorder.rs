//! Reorder planner: turn "put this item at index k" into rank updates.
//!
//! The common case rewrites one rank. When the new neighbours leave no room
//! (`"y"` / `"y0"`, or duplicate ranks left behind by concurrent writers)
//! the planner rebalances the smallest window around the moved item whose
//! outer bounds still admit fresh ranks.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::model::Item;
use crate::rank::{self, RankError};

/// A sibling as the planner sees it. Callers pass siblings already sorted by
/// `(rank, createdAt, id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sibling<'a> {
    pub id: &'a str,
    pub rank: &'a str,
}

impl<'a> From<&'a Item> for Sibling<'a> {
    fn from(item: &'a Item) -> Self {
        Self {
            id: &item.id,
            rank: &item.rank,
        }
    }
}

/// Rank updates for one move.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReorderPlan {
    /// New rank per changed item id.
    pub changed: BTreeMap<String, String>,
    /// Ids whose ranks were (re)assigned, in final order.
    pub window: Vec<String>,
}

impl ReorderPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }

    /// The moved item's new rank, if it changed.
    #[must_use]
    pub fn rank_of(&self, id: &str) -> Option<&str> {
        self.changed.get(id).map(String::as_str)
    }
}

/// Plan ranks so `moved_id` ends up at `insert_at` of the sibling order.
///
/// `insert_at` indexes the list after the moved item is removed and is
/// clamped to its length. A `moved_id` missing from `siblings` is treated
/// as a newcomer being inserted.
///
/// # Errors
///
/// Returns [`RankError`] only when no window, including the whole sibling
/// set, can be rebalanced.
pub fn plan_reorder(
    siblings: &[Sibling<'_>],
    moved_id: &str,
    insert_at: usize,
) -> Result<ReorderPlan, RankError> {
    let original = siblings.iter().position(|s| s.id == moved_id);
    let moved_rank = original.map(|i| siblings[i].rank);

    let mut order: Vec<Sibling<'_>> = siblings
        .iter()
        .copied()
        .filter(|s| s.id != moved_id)
        .collect();
    let k = insert_at.min(order.len());
    order.insert(
        k,
        Sibling {
            id: moved_id,
            rank: moved_rank.unwrap_or_default(),
        },
    );

    let lower = if k == 0 { "" } else { order[k - 1].rank };
    let upper = order.get(k + 1).map_or("", |s| s.rank);

    if let Some(current) = moved_rank {
        let already_there = original == Some(k)
            && !current.is_empty()
            && (lower.is_empty() || lower < current)
            && (upper.is_empty() || current < upper);
        if already_there {
            return Ok(ReorderPlan::default());
        }
    }

    let existing: HashSet<String> = order
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != k)
        .map(|(_, s)| s.rank.to_string())
        .collect();

    if lower.is_empty() || upper.is_empty() || lower < upper {
        if let Ok(fresh) = rank::between_unique(&existing, lower, upper) {
            return Ok(ReorderPlan {
                changed: BTreeMap::from([(moved_id.to_string(), fresh)]),
                window: vec![moved_id.to_string()],
            });
        }
    }

    let prefer_right = original.is_some_and(|from| k < from);
    debug!(moved_id, k, prefer_right, "no room between neighbours, rebalancing");
    rebalance(&order, k, prefer_right)
}

/// Candidate windows `[lo, hi]` containing `k`, smallest first; for equal
/// sizes the preferred side comes first.
fn windows(len: usize, k: usize, prefer_right: bool) -> impl Iterator<Item = (usize, usize)> {
    (1..=len).flat_map(move |size| {
        let first = (k + 1).saturating_sub(size);
        let last = k.min(len - size);
        let starts: Vec<usize> = if prefer_right {
            (first..=last).rev().collect()
        } else {
            (first..=last).collect()
        };
        starts.into_iter().map(move |lo| (lo, lo + size - 1))
    })
}

fn rebalance(
    order: &[Sibling<'_>],
    k: usize,
    prefer_right: bool,
) -> Result<ReorderPlan, RankError> {
    let mut last_err = RankError::Exhausted {
        attempts: rank::UNIQUE_ATTEMPTS,
    };
    for (lo, hi) in windows(order.len(), k, prefer_right) {
        let lower = if lo == 0 { "" } else { order[lo - 1].rank };
        let upper = order.get(hi + 1).map_or("", |s| s.rank);
        if !lower.is_empty() && !upper.is_empty() && lower >= upper {
            continue;
        }

        let mut existing: HashSet<String> = order
            .iter()
            .enumerate()
            .filter(|&(i, _)| i < lo || i > hi)
            .map(|(_, s)| s.rank.to_string())
            .collect();

        match assign_window(&order[lo..=hi], lower, upper, &mut existing) {
            Ok(assigned) => {
                let window = order[lo..=hi].iter().map(|s| s.id.to_string()).collect();
                let changed = order[lo..=hi]
                    .iter()
                    .zip(assigned)
                    .filter(|(s, fresh)| s.rank != fresh.as_str())
                    .map(|(s, fresh)| (s.id.to_string(), fresh))
                    .collect();
                return Ok(ReorderPlan { changed, window });
            }
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

fn assign_window(
    window: &[Sibling<'_>],
    lower: &str,
    upper: &str,
    existing: &mut HashSet<String>,
) -> Result<Vec<String>, RankError> {
    let mut cur = lower.to_string();
    let mut out = Vec::with_capacity(window.len());
    for _ in window {
        let fresh = rank::between_unique(existing, &cur, upper)?;
        existing.insert(fresh.clone());
        cur.clone_from(&fresh);
        out.push(fresh);
    }
    Ok(out)
}

/// Index the moved item should land at so it sits directly before (or
/// after) `anchor_id`, measured after removing the moved item.
#[must_use]
pub fn anchor_index(
    siblings: &[Sibling<'_>],
    moved_id: &str,
    anchor_id: &str,
    after: bool,
) -> Option<usize> {
    siblings
        .iter()
        .filter(|s| s.id != moved_id)
        .position(|s| s.id == anchor_id)
        .map(|i| if after { i + 1 } else { i })
}
