//! Event type catalog and entity kinds.
//!
//! Event types use the dotted `<prefix>.<verb>` convention. The prefix
//! before the first `.` decides the entity kind the event belongs to; the
//! `identity` prefix maps to [`EntityKind::Actor`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of entity an event stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Actor,
    Project,
    Outline,
    Item,
    Comment,
    Worklog,
    Dep,
}

impl EntityKind {
    pub const ALL: [Self; 7] = [
        Self::Actor,
        Self::Project,
        Self::Outline,
        Self::Item,
        Self::Comment,
        Self::Worklog,
        Self::Dep,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Actor => "actor",
            Self::Project => "project",
            Self::Outline => "outline",
            Self::Item => "item",
            Self::Comment => "comment",
            Self::Worklog => "worklog",
            Self::Dep => "dep",
        }
    }

    /// Prefix used for event types of this kind.
    #[must_use]
    pub const fn type_prefix(self) -> &'static str {
        match self {
            Self::Actor => "identity",
            other => other.as_str(),
        }
    }

    /// Infer the entity kind from a raw event type string.
    #[must_use]
    pub fn from_event_type(raw: &str) -> Option<Self> {
        let (prefix, _) = raw.split_once('.')?;
        match prefix {
            "identity" => Some(Self::Actor),
            "project" => Some(Self::Project),
            "outline" => Some(Self::Outline),
            "item" => Some(Self::Item),
            "comment" => Some(Self::Comment),
            "worklog" => Some(Self::Worklog),
            "dep" => Some(Self::Dep),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind '{s}'"))
    }
}

/// Every event type the engine knows how to write or replay.
///
/// Types outside the catalog parse to [`EventType::Unknown`] so that replay
/// can count and skip them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    IdentityCreate,
    /// Local helper recorded for audit; never applied.
    IdentityUse,
    /// Local helper recorded for audit; never applied.
    IdentitySeed,
    ProjectCreate,
    ProjectRename,
    ProjectArchive,
    OutlineCreate,
    OutlineRename,
    OutlineSetDescription,
    OutlineArchive,
    OutlineStatusAdd,
    OutlineStatusRemove,
    OutlineStatusUpdate,
    OutlineStatusReorder,
    ItemCreate,
    /// Legacy spelling, ignored by replay.
    ItemCreated,
    ItemSetTitle,
    ItemSetDescription,
    ItemSetStatus,
    ItemSetPriority,
    ItemSetOnHold,
    ItemSetDue,
    ItemSetSchedule,
    ItemSetAssign,
    ItemSetArchive,
    ItemTagsAdd,
    ItemTagsRemove,
    ItemTagsSet,
    ItemMove,
    ItemSetParent,
    ItemIndent,
    ItemOutdent,
    ItemMoveOutline,
    ItemSetKind,
    ItemSetChildrenKind,
    ItemAttachmentAdd,
    CommentAttachmentAdd,
    DepAdd,
    CommentAdd,
    WorklogAdd,
    /// Merge marker joining divergent heads of one entity stream.
    Merge(EntityKind),
    Unknown(String),
}

static CATALOG: &[(EventType, &str)] = &[
    (EventType::IdentityCreate, "identity.create"),
    (EventType::IdentityUse, "identity.use"),
    (EventType::IdentitySeed, "identity.seed"),
    (EventType::ProjectCreate, "project.create"),
    (EventType::ProjectRename, "project.rename"),
    (EventType::ProjectArchive, "project.archive"),
    (EventType::OutlineCreate, "outline.create"),
    (EventType::OutlineRename, "outline.rename"),
    (EventType::OutlineSetDescription, "outline.set_description"),
    (EventType::OutlineArchive, "outline.archive"),
    (EventType::OutlineStatusAdd, "outline.status.add"),
    (EventType::OutlineStatusRemove, "outline.status.remove"),
    (EventType::OutlineStatusUpdate, "outline.status.update"),
    (EventType::OutlineStatusReorder, "outline.status.reorder"),
    (EventType::ItemCreate, "item.create"),
    (EventType::ItemCreated, "item.created"),
    (EventType::ItemSetTitle, "item.set_title"),
    (EventType::ItemSetDescription, "item.set_description"),
    (EventType::ItemSetStatus, "item.set_status"),
    (EventType::ItemSetPriority, "item.set_priority"),
    (EventType::ItemSetOnHold, "item.set_on_hold"),
    (EventType::ItemSetDue, "item.set_due"),
    (EventType::ItemSetSchedule, "item.set_schedule"),
    (EventType::ItemSetAssign, "item.set_assign"),
    (EventType::ItemSetArchive, "item.set_archive"),
    (EventType::ItemTagsAdd, "item.tags_add"),
    (EventType::ItemTagsRemove, "item.tags_remove"),
    (EventType::ItemTagsSet, "item.tags_set"),
    (EventType::ItemMove, "item.move"),
    (EventType::ItemSetParent, "item.set_parent"),
    (EventType::ItemIndent, "item.indent"),
    (EventType::ItemOutdent, "item.outdent"),
    (EventType::ItemMoveOutline, "item.move_outline"),
    (EventType::ItemSetKind, "item.set_kind"),
    (EventType::ItemSetChildrenKind, "item.set_children_kind"),
    (EventType::ItemAttachmentAdd, "item.attachment.add"),
    (EventType::CommentAttachmentAdd, "comment.attachment.add"),
    (EventType::DepAdd, "dep.add"),
    (EventType::CommentAdd, "comment.add"),
    (EventType::WorklogAdd, "worklog.add"),
];

impl EventType {
    /// Merge marker type for the given entity kind.
    #[must_use]
    pub const fn merge_for(kind: EntityKind) -> Self {
        Self::Merge(kind)
    }

    /// Canonical dotted string for this type.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Merge(kind) => format!("{}.merge", kind.type_prefix()),
            Self::Unknown(raw) => raw.clone(),
            known => CATALOG
                .iter()
                .find(|(ty, _)| ty == known)
                .map(|(_, s)| (*s).to_string())
                .unwrap_or_default(),
        }
    }

    /// Entity kind implied by the type prefix, if any.
    #[must_use]
    pub fn entity_kind(&self) -> Option<EntityKind> {
        match self {
            Self::Merge(kind) => Some(*kind),
            other => EntityKind::from_event_type(&other.name()),
        }
    }

    /// Return `true` for types outside the catalog.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Return `true` for merge markers.
    #[must_use]
    pub const fn is_merge(&self) -> bool {
        matches!(self, Self::Merge(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for EventType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((ty, _)) = CATALOG.iter().find(|(_, raw)| *raw == s) {
            return Ok(ty.clone());
        }
        if let Some(prefix) = s.strip_suffix(".merge") {
            if let Some(kind) = EntityKind::ALL
                .into_iter()
                .find(|kind| kind.type_prefix() == prefix)
            {
                return Ok(Self::Merge(kind));
            }
        }
        Ok(Self::Unknown(s.to_string()))
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.parse::<Self>() {
            Ok(ty) => Ok(ty),
            Err(never) => match never {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_round_trips_through_strings() {
        for (ty, raw) in CATALOG {
            assert_eq!(ty.name(), *raw);
            assert_eq!(raw.parse::<EventType>().expect("infallible"), *ty);
        }
    }

    #[test]
    fn prefix_decides_entity_kind() {
        assert_eq!(EventType::ItemSetTitle.entity_kind(), Some(EntityKind::Item));
        assert_eq!(EventType::IdentityCreate.entity_kind(), Some(EntityKind::Actor));
        assert_eq!(EventType::DepAdd.entity_kind(), Some(EntityKind::Dep));
        assert_eq!(
            EventType::OutlineStatusReorder.entity_kind(),
            Some(EntityKind::Outline)
        );
        assert_eq!(
            EventType::CommentAttachmentAdd.entity_kind(),
            Some(EntityKind::Comment)
        );
        assert_eq!(EntityKind::from_event_type("bogus.thing"), None);
        assert_eq!(EntityKind::from_event_type("nodot"), None);
    }

    #[test]
    fn merge_markers_use_kind_prefix() {
        assert_eq!(EventType::Merge(EntityKind::Actor).name(), "identity.merge");
        assert_eq!(EventType::Merge(EntityKind::Item).name(), "item.merge");
        assert_eq!(
            "identity.merge".parse::<EventType>().expect("infallible"),
            EventType::Merge(EntityKind::Actor)
        );
        assert_eq!(
            "item.merge".parse::<EventType>().expect("infallible"),
            EventType::Merge(EntityKind::Item)
        );
    }

    #[test]
    fn unknown_types_are_preserved() {
        let ty: EventType = "item.future_thing".parse().expect("infallible");
        assert_eq!(ty, EventType::Unknown("item.future_thing".into()));
        assert!(ty.is_unknown());
        assert_eq!(ty.entity_kind(), Some(EntityKind::Item));

        let json = serde_json::to_string(&ty).expect("serialize");
        assert_eq!(json, "\"item.future_thing\"");
    }

    #[test]
    fn entity_kind_serde_is_lowercase() {
        let json = serde_json::to_string(&EntityKind::Worklog).expect("serialize");
        assert_eq!(json, "\"worklog\"");
        assert_eq!("dep".parse::<EntityKind>(), Ok(EntityKind::Dep));
    }
}
