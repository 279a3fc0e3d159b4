//! Event log storage.
//!
//! The sharded JSONL log under `events/` is authoritative. A SQLite store at
//! `.clarity/index.sqlite` is kept for workspaces that predate sharding and
//! as a derived copy; it differs only in how it handles forks (it merges them
//! automatically instead of refusing the write).

pub mod jsonl;
pub mod sqlite;

pub use jsonl::{JsonlEventLog, LineError, Scan};
pub use sqlite::SqliteEventLog;

use std::cmp::Ordering;
use std::path::PathBuf;

use crate::config::{EnvConfig, EventLogBackend};
use crate::error::Result;
use crate::event::{EntityKind, Envelope, EventDraft};
use crate::workspace::{Identity, Layout};

/// An envelope together with where it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub envelope: Envelope,
    pub path: PathBuf,
    /// 1-based line number within `path`.
    pub line: usize,
}

impl Located {
    /// Replay order: `(issuedAt, eventId, replicaId, shardPath, lineNumber)`.
    #[must_use]
    pub fn cmp_replay(&self, other: &Self) -> Ordering {
        self.envelope
            .cmp_global(&other.envelope)
            .then_with(|| self.envelope.replica_id.cmp(&other.envelope.replica_id))
            .then_with(|| self.path.cmp(&other.path))
            .then_with(|| self.line.cmp(&other.line))
    }
}

/// Sort into replay order.
pub fn sort_for_replay(events: &mut [Located]) {
    events.sort_by(Located::cmp_replay);
}

/// Checked before every append. The Git layer implements this to refuse
/// writes while a merge or rebase is in progress.
pub trait WriteGuard: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when writing must not proceed.
    fn check(&self) -> Result<()>;
}

/// Storage for workspace events.
pub trait EventLog: Send + Sync {
    /// Ids this log stamps onto appended events.
    fn identity(&self) -> &Identity;

    /// Sequence, link, and durably append one event.
    ///
    /// # Errors
    ///
    /// Fails closed: guard refusals, fork conflicts, contract violations, and
    /// I/O errors all surface and nothing is written.
    fn append(&self, draft: EventDraft) -> Result<Envelope>;

    /// Events of one entity stream ordered by `(entitySeq, issuedAt, eventId)`.
    ///
    /// # Errors
    ///
    /// Returns I/O or storage errors.
    fn entity_events(&self, kind: EntityKind, id: &str) -> Result<Vec<Envelope>>;

    /// Every readable event in replay order.
    ///
    /// # Errors
    ///
    /// Returns I/O or storage errors. Malformed lines are not errors here.
    fn all_events(&self) -> Result<Vec<Located>>;

    /// Join a forked stream with a `<prefix>.merge` marker.
    ///
    /// Returns `None` when the stream has at most one head.
    ///
    /// # Errors
    ///
    /// Returns guard, storage, or I/O errors.
    fn merge_heads(&self, kind: EntityKind, id: &str, actor_id: &str) -> Result<Option<Envelope>>;
}

/// Decide which backend to open.
///
/// An explicit `CLARITY_EVENTLOG` wins. Otherwise SQLite is used only when
/// the index exists and no JSONL shard does.
#[must_use]
pub fn select_backend(layout: &Layout, env: &EnvConfig) -> EventLogBackend {
    if let Some(forced) = env.eventlog {
        return forced;
    }
    let has_shards = jsonl::list_shards(&layout.events_dir())
        .map(|shards| !shards.is_empty())
        .unwrap_or(false);
    if !has_shards && layout.index_path().exists() {
        EventLogBackend::Sqlite
    } else {
        EventLogBackend::Jsonl
    }
}

/// Open the selected backend.
///
/// # Errors
///
/// Returns errors from opening the SQLite store.
pub fn open(
    layout: &Layout,
    identity: Identity,
    env: &EnvConfig,
    guard: Option<Box<dyn WriteGuard>>,
) -> Result<Box<dyn EventLog>> {
    let backend = select_backend(layout, env);
    tracing::debug!(?backend, root = %layout.root().display(), "opening event log");
    Ok(match backend {
        EventLogBackend::Jsonl => {
            let mut log = JsonlEventLog::new(layout.clone(), identity);
            if let Some(guard) = guard {
                log = log.with_guard(guard);
            }
            Box::new(log)
        }
        EventLogBackend::Sqlite => Box::new(SqliteEventLog::open(&layout.index_path(), identity)?),
    })
}
