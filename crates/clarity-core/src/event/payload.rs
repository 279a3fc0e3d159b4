//! Typed event payloads.
//!
//! Each event type has a payload struct with camelCase keys. Payloads are
//! decoded on demand from the raw JSON map kept in the envelope, so keys
//! added by newer writers survive untouched on disk and are simply ignored
//! here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::types::EventType;
use crate::model::{ActorKind, AttachmentOwner, DateOn, StatusDef};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityCreate {
    #[serde(default)]
    pub kind: ActorKind,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Free-form payload of the local-only identity helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IdentityNote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePayload {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivePayload {
    #[serde(default = "default_true")]
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineCreate {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_defs: Option<Vec<StatusDef>>,
}

/// `outline.rename`; a null name clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineRename {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptionPayload {
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAdd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    #[serde(default)]
    pub is_end_state: bool,
    #[serde(default)]
    pub requires_note: bool,
}

/// Selects a status definition by id, falling back to its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatusRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Partial update of one status definition.
///
/// The boolean pairs (`end`/`notEnd`, `requireNote`/`noRequireNote`) are the
/// older spelling of `isEndState`/`requiresNote`; a set flag wins over the
/// optional field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(flatten)]
    pub target: StatusRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_end_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_note: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub end: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_end: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub require_note: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_require_note: bool,
}

impl StatusUpdate {
    /// Effective end-state change, if any.
    #[must_use]
    pub fn end_state(&self) -> Option<bool> {
        if self.end {
            Some(true)
        } else if self.not_end {
            Some(false)
        } else {
            self.is_end_state
        }
    }

    /// Effective requires-note change, if any.
    #[must_use]
    pub fn note_required(&self) -> Option<bool> {
        if self.require_note {
            Some(true)
        } else if self.no_require_note {
            Some(false)
        } else {
            self.requires_note
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReorder {
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemCreate {
    pub project_id: String,
    pub outline_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub rank: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub priority: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub on_hold: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub item_kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub children_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateOn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<DateOn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitlePayload {
    pub title: String,
}

/// `item.set_status`; older writers used `status` instead of `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SetStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl SetStatus {
    /// The target status id, preferring `to`.
    #[must_use]
    pub fn target(&self) -> &str {
        self.to
            .as_deref()
            .or(self.status.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityPayload {
    pub priority: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnHoldPayload {
    pub on_hold: bool,
}

/// `item.set_due`; a null date clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuePayload {
    #[serde(default)]
    pub due: Option<DateOn>,
}

/// `item.set_schedule`; a null date clears it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePayload {
    #[serde(default)]
    pub schedule: Option<DateOn>,
}

/// `item.set_assign`.
///
/// When `ownerActorId` is present the owner and delegation fields are taken
/// verbatim. Payloads without it come from older writers and replay applies
/// the transfer rule instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SetAssign {
    #[serde(default)]
    pub assigned_actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_actor_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_delegated_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_delegated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagsPayload {
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `item.move`: an explicit rank, a sibling reference, or a bulk rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MovePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebalance: Option<BTreeMap<String, String>>,
}

/// Parent value that detaches an item to the outline root.
pub const PARENT_NONE: &str = "none";

/// `item.set_parent`; `"none"` or empty moves the item to the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetParent {
    pub parent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
}

impl SetParent {
    #[must_use]
    pub fn parent_id(&self) -> Option<&str> {
        let parent = self.parent.trim();
        (!parent.is_empty() && parent != PARENT_NONE).then_some(parent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indent {
    pub parent_id: String,
}

/// `item.outdent`; records the parent the item was lifted out of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outdent {
    #[serde(default)]
    pub from_parent_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutline {
    pub outline_id: String,
    #[serde(default)]
    pub status_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetItemKind {
    #[serde(default)]
    pub item_kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetChildrenKind {
    #[serde(default)]
    pub children_kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentAdd {
    pub attachment_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub mime_type: String,
    pub path: String,
}

impl AttachmentAdd {
    /// Materialize the attachment record for its owning entity.
    #[must_use]
    pub fn into_attachment(
        self,
        owner: AttachmentOwner,
        entity_id: &str,
    ) -> crate::model::Attachment {
        crate::model::Attachment {
            id: self.attachment_id,
            entity_kind: owner,
            entity_id: entity_id.to_string(),
            original_name: self.original_name,
            size_bytes: self.size_bytes,
            sha256: self.sha256,
            mime_type: self.mime_type,
            path: self.path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepAdd {
    pub from_item_id: String,
    pub to_item_id: String,
    #[serde(rename = "type", default = "default_dep_type")]
    pub dep_type: String,
}

fn default_dep_type() -> String {
    "blocks".to_string()
}

/// Body shared by `comment.add` and `worklog.add`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteAdd {
    pub item_id: String,
    pub body: String,
}

/// `<prefix>.merge`: joins the listed heads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeMarker {
    pub heads: Vec<String>,
}

/// A decoded payload, tagged by event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    IdentityCreate(IdentityCreate),
    IdentityHelper(IdentityNote),
    ProjectCreate(NamePayload),
    ProjectRename(NamePayload),
    ProjectArchive(ArchivePayload),
    OutlineCreate(OutlineCreate),
    OutlineRename(OutlineRename),
    OutlineSetDescription(DescriptionPayload),
    OutlineArchive(ArchivePayload),
    OutlineStatusAdd(StatusAdd),
    OutlineStatusRemove(StatusRef),
    OutlineStatusUpdate(StatusUpdate),
    OutlineStatusReorder(StatusReorder),
    ItemCreate(Box<ItemCreate>),
    ItemSetTitle(TitlePayload),
    ItemSetDescription(DescriptionPayload),
    ItemSetStatus(SetStatus),
    ItemSetPriority(PriorityPayload),
    ItemSetOnHold(OnHoldPayload),
    ItemSetDue(DuePayload),
    ItemSetSchedule(SchedulePayload),
    ItemSetAssign(SetAssign),
    ItemSetArchive(ArchivePayload),
    ItemTagsAdd(TagsPayload),
    ItemTagsRemove(TagsPayload),
    ItemTagsSet(TagsPayload),
    ItemMove(MovePayload),
    ItemSetParent(SetParent),
    ItemIndent(Indent),
    ItemOutdent(Outdent),
    ItemMoveOutline(MoveOutline),
    ItemSetKind(SetItemKind),
    ItemSetChildrenKind(SetChildrenKind),
    AttachmentAdd(AttachmentAdd),
    DepAdd(DepAdd),
    CommentAdd(NoteAdd),
    WorklogAdd(NoteAdd),
    Merge(MergeMarker),
    /// Legacy or unrecognized types. Replay skips these.
    Ignored,
}

impl Payload {
    /// Decode `raw` into the payload shape for `ty`.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error when required keys are missing or
    /// have the wrong JSON type.
    pub fn decode(ty: &EventType, raw: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        fn de<T: serde::de::DeserializeOwned>(
            raw: &Map<String, Value>,
        ) -> Result<T, serde_json::Error> {
            T::deserialize(Value::Object(raw.clone()))
        }

        Ok(match ty {
            EventType::IdentityCreate => Self::IdentityCreate(de(raw)?),
            EventType::IdentityUse | EventType::IdentitySeed => Self::IdentityHelper(de(raw)?),
            EventType::ProjectCreate => Self::ProjectCreate(de(raw)?),
            EventType::ProjectRename => Self::ProjectRename(de(raw)?),
            EventType::ProjectArchive => Self::ProjectArchive(de(raw)?),
            EventType::OutlineCreate => Self::OutlineCreate(de(raw)?),
            EventType::OutlineRename => Self::OutlineRename(de(raw)?),
            EventType::OutlineSetDescription => Self::OutlineSetDescription(de(raw)?),
            EventType::OutlineArchive => Self::OutlineArchive(de(raw)?),
            EventType::OutlineStatusAdd => Self::OutlineStatusAdd(de(raw)?),
            EventType::OutlineStatusRemove => Self::OutlineStatusRemove(de(raw)?),
            EventType::OutlineStatusUpdate => Self::OutlineStatusUpdate(de(raw)?),
            EventType::OutlineStatusReorder => Self::OutlineStatusReorder(de(raw)?),
            EventType::ItemCreate => Self::ItemCreate(Box::new(de(raw)?)),
            EventType::ItemSetTitle => Self::ItemSetTitle(de(raw)?),
            EventType::ItemSetDescription => Self::ItemSetDescription(de(raw)?),
            EventType::ItemSetStatus => Self::ItemSetStatus(de(raw)?),
            EventType::ItemSetPriority => Self::ItemSetPriority(de(raw)?),
            EventType::ItemSetOnHold => Self::ItemSetOnHold(de(raw)?),
            EventType::ItemSetDue => Self::ItemSetDue(de(raw)?),
            EventType::ItemSetSchedule => Self::ItemSetSchedule(de(raw)?),
            EventType::ItemSetAssign => Self::ItemSetAssign(de(raw)?),
            EventType::ItemSetArchive => Self::ItemSetArchive(de(raw)?),
            EventType::ItemTagsAdd => Self::ItemTagsAdd(de(raw)?),
            EventType::ItemTagsRemove => Self::ItemTagsRemove(de(raw)?),
            EventType::ItemTagsSet => Self::ItemTagsSet(de(raw)?),
            EventType::ItemMove => Self::ItemMove(de(raw)?),
            EventType::ItemSetParent => Self::ItemSetParent(de(raw)?),
            EventType::ItemIndent => Self::ItemIndent(de(raw)?),
            EventType::ItemOutdent => Self::ItemOutdent(de(raw)?),
            EventType::ItemMoveOutline => Self::ItemMoveOutline(de(raw)?),
            EventType::ItemSetKind => Self::ItemSetKind(de(raw)?),
            EventType::ItemSetChildrenKind => Self::ItemSetChildrenKind(de(raw)?),
            EventType::ItemAttachmentAdd | EventType::CommentAttachmentAdd => {
                Self::AttachmentAdd(de(raw)?)
            }
            EventType::DepAdd => Self::DepAdd(de(raw)?),
            EventType::CommentAdd => Self::CommentAdd(de(raw)?),
            EventType::WorklogAdd => Self::WorklogAdd(de(raw)?),
            EventType::Merge(_) => Self::Merge(de(raw)?),
            EventType::ItemCreated | EventType::Unknown(_) => Self::Ignored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn set_status_prefers_to_over_legacy_key() {
        let Payload::ItemSetStatus(p) = Payload::decode(
            &EventType::ItemSetStatus,
            &map(json!({"to": "doing", "status": "todo"})),
        )
        .expect("decode") else {
            panic!("wrong variant");
        };
        assert_eq!(p.target(), "doing");

        let Payload::ItemSetStatus(p) =
            Payload::decode(&EventType::ItemSetStatus, &map(json!({"status": "done"})))
                .expect("decode")
        else {
            panic!("wrong variant");
        };
        assert_eq!(p.target(), "done");
    }

    #[test]
    fn status_update_flags_override_fields() {
        let update: StatusUpdate = serde_json::from_value(json!({
            "label": "Doing", "isEndState": false, "end": true, "noRequireNote": true
        }))
        .expect("decode");
        assert_eq!(update.target.label.as_deref(), Some("Doing"));
        assert_eq!(update.end_state(), Some(true));
        assert_eq!(update.note_required(), Some(false));
    }

    #[test]
    fn set_parent_none_means_root() {
        let p = SetParent { parent: "none".into(), rank: None };
        assert_eq!(p.parent_id(), None);
        let p = SetParent { parent: "item-1".into(), rank: None };
        assert_eq!(p.parent_id(), Some("item-1"));
    }

    #[test]
    fn unknown_keys_are_tolerated() {
        let decoded = Payload::decode(
            &EventType::ItemSetTitle,
            &map(json!({"title": "x", "futureField": 42})),
        )
        .expect("decode");
        assert_eq!(
            decoded,
            Payload::ItemSetTitle(TitlePayload { title: "x".into() })
        );
    }

    #[test]
    fn legacy_and_unknown_types_are_ignored() {
        let raw = map(json!({"anything": true}));
        assert_eq!(
            Payload::decode(&EventType::ItemCreated, &raw).expect("decode"),
            Payload::Ignored
        );
        assert_eq!(
            Payload::decode(&EventType::Unknown("x.y".into()), &raw).expect("decode"),
            Payload::Ignored
        );
    }

    #[test]
    fn missing_required_key_is_an_error() {
        assert!(Payload::decode(&EventType::ItemSetTitle, &Map::new()).is_err());
    }
}
