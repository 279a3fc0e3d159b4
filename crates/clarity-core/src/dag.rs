//! Per-entity causal DAG bookkeeping.
//!
//! Each `(entityKind, entityId)` stream is a DAG of events linked through
//! `parents`. A healthy stream has exactly one head (an event nobody names
//! as parent) and a strictly increasing `entitySeq` along every parent edge.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::event::{EntityKind, Envelope};

/// What an appender needs to know about one entity stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSummary {
    pub event_ids: BTreeSet<String>,
    pub parent_refs: BTreeSet<String>,
    pub max_seq: u64,
    pub count: u64,
}

impl StreamSummary {
    /// Fold one event of the stream into the summary.
    pub fn observe(&mut self, env: &Envelope) {
        if self.event_ids.insert(env.event_id.clone()) {
            self.count += 1;
        }
        self.parent_refs.extend(env.parents.iter().cloned());
        self.max_seq = self.max_seq.max(env.entity_seq);
    }

    #[must_use]
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Envelope>) -> Self {
        let mut summary = Self::default();
        for env in events {
            summary.observe(env);
        }
        summary
    }

    /// Event ids no other event of the stream names as parent, sorted.
    #[must_use]
    pub fn heads(&self) -> Vec<String> {
        self.event_ids
            .difference(&self.parent_refs)
            .cloned()
            .collect()
    }

    /// Sequence number for the next event: `max(maxSeq + 1, count + 1, 1)`.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        (self.max_seq + 1).max(self.count + 1).max(1)
    }
}

/// Stream key.
pub type EntityKey = (EntityKind, String);

/// Summaries for every stream in `events`.
#[must_use]
pub fn summarize_all<'a>(
    events: impl IntoIterator<Item = &'a Envelope>,
) -> BTreeMap<EntityKey, StreamSummary> {
    let mut out: BTreeMap<EntityKey, StreamSummary> = BTreeMap::new();
    for env in events {
        out.entry((env.entity_kind, env.entity_id.clone()))
            .or_default()
            .observe(env);
    }
    out
}

/// Streams with more than one head, with their sorted heads.
#[must_use]
pub fn forks<'a>(events: impl IntoIterator<Item = &'a Envelope>) -> Vec<(EntityKey, Vec<String>)> {
    summarize_all(events)
        .into_iter()
        .filter_map(|(key, summary)| {
            let heads = summary.heads();
            (heads.len() > 1).then_some((key, heads))
        })
        .collect()
}

/// A parent edge that breaks the stream's ordering rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    /// `child` does not have a larger `entitySeq` than `parent`.
    SeqNotIncreasing { child: String, parent: String },
    /// `child` names a parent that isn't in the stream.
    MissingParent { child: String, parent: String },
    /// The stream's first event (by seq) has parents.
    RootHasParents { event: String },
}

/// Check parent edges within one stream.
#[must_use]
pub fn check_chain(stream: &[Envelope]) -> Vec<ChainViolation> {
    let by_id: HashMap<&str, &Envelope> = stream
        .iter()
        .map(|env| (env.event_id.as_str(), env))
        .collect();
    let mut violations = Vec::new();

    if let Some(root) = stream.iter().min_by(|a, b| a.cmp_entity(b)) {
        if !root.parents.is_empty() {
            violations.push(ChainViolation::RootHasParents {
                event: root.event_id.clone(),
            });
        }
    }

    for env in stream {
        for parent in &env.parents {
            match by_id.get(parent.as_str()) {
                Some(p) if p.entity_seq >= env.entity_seq => {
                    violations.push(ChainViolation::SeqNotIncreasing {
                        child: env.event_id.clone(),
                        parent: parent.clone(),
                    });
                }
                Some(_) => {}
                None => violations.push(ChainViolation::MissingParent {
                    child: env.event_id.clone(),
                    parent: parent.clone(),
                }),
            }
        }
    }
    violations
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event::{EventDraft, EventType};
    use serde_json::json;

    pub(crate) fn env(id: &str, seq: u64, parents: &[&str]) -> Envelope {
        let mut env = EventDraft::new(
            EventType::ItemSetTitle,
            "item-1",
            "act-1",
            &json!({"title": id}),
        )
        .expect("draft")
        .seal(
            "ws",
            "rep",
            seq,
            parents.iter().map(|p| (*p).to_string()).collect(),
        )
        .expect("seal");
        env.event_id = id.to_string();
        env
    }

    #[test]
    fn linear_chain_has_one_head() {
        let events = [env("e1", 1, &[]), env("e2", 2, &["e1"]), env("e3", 3, &["e2"])];
        let summary = StreamSummary::from_events(&events);
        assert_eq!(summary.heads(), ["e3"]);
        assert_eq!(summary.next_seq(), 4);
        assert!(check_chain(&events).is_empty());
    }

    #[test]
    fn empty_stream_starts_at_one() {
        let summary = StreamSummary::default();
        assert!(summary.heads().is_empty());
        assert_eq!(summary.next_seq(), 1);
    }

    #[test]
    fn sibling_children_fork() {
        let events = [env("e1", 1, &[]), env("e2", 2, &["e1"]), env("e3", 2, &["e1"])];
        let found = forks(&events);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, (EntityKind::Item, "item-1".to_string()));
        assert_eq!(found[0].1, ["e2", "e3"]);
    }

    #[test]
    fn next_seq_respects_count_when_seqs_lag() {
        // Two events both claiming seq 1 (imported from a broken writer).
        let events = [env("a", 1, &[]), env("b", 1, &["a"])];
        assert_eq!(StreamSummary::from_events(&events).next_seq(), 3);
    }

    #[test]
    fn chain_violations_are_reported() {
        let events = [env("e1", 2, &[]), env("e2", 1, &["e1"]), env("e3", 3, &["ghost"])];
        let violations = check_chain(&events);
        assert!(violations.contains(&ChainViolation::RootHasParents { event: "e2".into() }));
        assert!(violations.contains(&ChainViolation::SeqNotIncreasing {
            child: "e2".into(),
            parent: "e1".into(),
        }));
        assert!(violations.contains(&ChainViolation::MissingParent {
            child: "e3".into(),
            parent: "ghost".into(),
        }));
    }
}
