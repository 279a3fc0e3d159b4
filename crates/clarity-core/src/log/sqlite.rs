//! SQLite event store at `.clarity/index.sqlite`.
//!
//! Runtime defaults:
//! - `journal_mode = WAL` so readers don't block the writer
//! - `busy_timeout = 5s` to ride out short lock contention
//!
//! Unlike the JSONL log, a fork found at append time is joined on the spot
//! with a `<prefix>.merge` marker whose parents are the divergent heads; the
//! new event then follows the marker.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, types::Type};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::{EventLog, Located, jsonl, sort_for_replay};
use crate::dag::StreamSummary;
use crate::error::Result;
use crate::event::payload::MergeMarker;
use crate::event::{EntityKind, Envelope, EventDraft, EventType, format_ts};
use crate::workspace::{Identity, Layout};

/// Busy timeout for index connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest schema version understood by this build.
pub const LATEST_SCHEMA_VERSION: u32 = 2;

const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS index_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    rebuilt_at TEXT
);
INSERT OR IGNORE INTO index_meta (id, schema_version) VALUES (1, 0);

CREATE TABLE IF NOT EXISTS events (
    row_no INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id TEXT NOT NULL,
    replica_id TEXT NOT NULL,
    entity_kind TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    entity_seq INTEGER NOT NULL,
    issued_at TEXT NOT NULL,
    body TEXT NOT NULL,
    UNIQUE (replica_id, event_id)
);
CREATE INDEX IF NOT EXISTS idx_events_entity
    ON events (entity_kind, entity_id, entity_seq);
";

const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_events_order
    ON events (issued_at, event_id);
";

const MIGRATIONS: &[(u32, &str)] = &[(1, MIGRATION_V1_SQL), (2, MIGRATION_V2_SQL)];

/// Read `PRAGMA user_version` as a `u32`.
///
/// # Errors
///
/// Returns an error if the query fails or the value is out of range.
pub fn current_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Integer, Box::new(error))
    })
}

/// Apply pending migrations in ascending order.
///
/// # Errors
///
/// Returns an error if any migration fails.
pub fn migrate(conn: &mut Connection) -> rusqlite::Result<u32> {
    let mut current = current_schema_version(conn)?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", i64::from(*version))?;
        tx.execute(
            "UPDATE index_meta SET schema_version = ?1 WHERE id = 1",
            [i64::from(*version)],
        )?;
        tx.commit()?;
        current = *version;
    }

    Ok(current)
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn decode_body(body: &str) -> rusqlite::Result<Envelope> {
    serde_json::from_str(body)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(err)))
}

fn insert(conn: &Connection, env: &Envelope) -> Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO events
            (event_id, replica_id, entity_kind, entity_id, entity_seq, issued_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            env.event_id,
            env.replica_id,
            env.entity_kind.as_str(),
            env.entity_id,
            i64::try_from(env.entity_seq).unwrap_or(i64::MAX),
            format_ts(env.issued_at),
            env.to_line()?,
        ],
    )?;
    Ok(changed == 1)
}

fn load_stream(conn: &Connection, kind: EntityKind, id: &str) -> Result<Vec<Envelope>> {
    let mut stmt = conn.prepare_cached(
        "SELECT body FROM events WHERE entity_kind = ?1 AND entity_id = ?2",
    )?;
    let rows = stmt.query_map(params![kind.as_str(), id], |row| {
        let body: String = row.get(0)?;
        decode_body(&body)
    })?;
    let mut events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    events.sort_by(Envelope::cmp_entity);
    Ok(events)
}

/// Event store backed by SQLite.
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
    identity: Identity,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEventLog")
            .field("path", &self.path)
            .field("replica_id", &self.identity.replica_id)
            .finish_non_exhaustive()
    }
}

impl SqliteEventLog {
    /// Open (or create) the store, apply pragmas, and migrate.
    ///
    /// # Errors
    ///
    /// Returns an error if opening, configuring, or migrating fails.
    pub fn open(path: &Path, identity: Identity) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut conn = Connection::open(path)?;
        configure_connection(&conn)?;
        let version = migrate(&mut conn)?;
        debug!(path = %path.display(), version, "opened sqlite event store");
        Ok(Self {
            conn: Mutex::new(conn),
            identity,
            path: path.to_path_buf(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the contents with every event from the JSONL shards.
    ///
    /// Returns the number of events inserted.
    ///
    /// # Errors
    ///
    /// Returns I/O or SQLite errors; the previous contents survive a failure.
    pub fn rebuild_from_jsonl(&self, layout: &Layout) -> Result<usize> {
        let scan = jsonl::scan(&layout.events_dir())?;
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM events", [])?;
        let mut inserted = 0;
        for located in &scan.events {
            if insert(&tx, &located.envelope)? {
                inserted += 1;
            }
        }
        tx.execute(
            "UPDATE index_meta SET rebuilt_at = ?1 WHERE id = 1",
            [format_ts(chrono::Utc::now())],
        )?;
        tx.commit()?;
        info!(inserted, skipped_lines = scan.errors.len(), "rebuilt sqlite event store");
        Ok(inserted)
    }

    /// When the store was last rebuilt from JSONL, if ever.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn rebuilt_at(&self) -> Result<Option<String>> {
        let conn = self.lock();
        Ok(conn
            .query_row("SELECT rebuilt_at FROM index_meta WHERE id = 1", [], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten())
    }

    fn seal_into(
        &self,
        conn: &Connection,
        draft: EventDraft,
        summary: &mut StreamSummary,
    ) -> Result<Envelope> {
        let env = draft.seal(
            &self.identity.workspace_id,
            &self.identity.replica_id,
            summary.next_seq(),
            summary.heads(),
        )?;
        insert(conn, &env)?;
        summary.observe(&env);
        Ok(env)
    }
}

impl EventLog for SqliteEventLog {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn append(&self, draft: EventDraft) -> Result<Envelope> {
        draft.validate()?;
        let kind = draft.entity_kind()?;

        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut summary = StreamSummary::from_events(&load_stream(&tx, kind, &draft.entity_id)?);

        let heads = summary.heads();
        if heads.len() > 1 {
            info!(%kind, entity = %draft.entity_id, heads = heads.len(), "auto-merging fork");
            let marker = EventDraft::new(
                EventType::Merge(kind),
                draft.entity_id.clone(),
                draft.actor_id.clone(),
                &MergeMarker { heads },
            )?
            .issued_at(draft.issued_at);
            self.seal_into(&tx, marker, &mut summary)?;
        }

        let env = self.seal_into(&tx, draft, &mut summary)?;
        tx.commit()?;
        Ok(env)
    }

    fn entity_events(&self, kind: EntityKind, id: &str) -> Result<Vec<Envelope>> {
        let conn = self.lock();
        load_stream(&conn, kind, id)
    }

    fn all_events(&self) -> Result<Vec<Located>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT row_no, body FROM events")?;
        let rows = stmt.query_map([], |row| {
            let row_no: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            Ok(Located {
                envelope: decode_body(&body)?,
                path: self.path.clone(),
                line: usize::try_from(row_no).unwrap_or_default(),
            })
        })?;
        let mut events = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        sort_for_replay(&mut events);
        Ok(events)
    }

    fn merge_heads(&self, kind: EntityKind, id: &str, actor_id: &str) -> Result<Option<Envelope>> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut summary = StreamSummary::from_events(&load_stream(&tx, kind, id)?);
        let heads = summary.heads();
        if heads.len() <= 1 {
            return Ok(None);
        }
        let marker = EventDraft::new(EventType::Merge(kind), id, actor_id, &MergeMarker { heads })?;
        let env = self.seal_into(&tx, marker, &mut summary)?;
        tx.commit()?;
        Ok(Some(env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::JsonlEventLog;
    use serde_json::json;
    use tempfile::TempDir;

    fn identity() -> Identity {
        Identity {
            workspace_id: "ws-1".into(),
            replica_id: "rep-a".into(),
            device_id: "dev".into(),
        }
    }

    fn title(id: &str, t: &str) -> EventDraft {
        EventDraft::new(EventType::ItemSetTitle, id, "act-1", &json!({"title": t})).expect("draft")
    }

    #[test]
    fn open_sets_wal_busy_timeout_and_migrates() -> Result<()> {
        let dir = TempDir::new()?;
        let log = SqliteEventLog::open(&dir.path().join("index.sqlite"), identity())?;
        let conn = log.lock();

        let journal_mode: String =
            conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?;
        assert_eq!(journal_mode.to_ascii_lowercase(), "wal");

        let busy_timeout_ms: u64 =
            conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
        assert_eq!(u128::from(busy_timeout_ms), DEFAULT_BUSY_TIMEOUT.as_millis());

        assert_eq!(current_schema_version(&conn)?, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn migrate_is_idempotent() -> rusqlite::Result<()> {
        let mut conn = Connection::open_in_memory()?;
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        assert_eq!(migrate(&mut conn)?, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    #[test]
    fn append_links_stream() -> Result<()> {
        let dir = TempDir::new()?;
        let log = SqliteEventLog::open(&dir.path().join("index.sqlite"), identity())?;
        let a = log.append(title("item-1", "a"))?;
        let b = log.append(title("item-1", "b"))?;
        assert_eq!(b.parents, vec![a.event_id.clone()]);
        assert_eq!(b.entity_seq, 2);
        assert_eq!(log.entity_events(EntityKind::Item, "item-1")?, vec![a, b]);
        Ok(())
    }

    #[test]
    fn fork_is_merged_automatically() -> Result<()> {
        let dir = TempDir::new()?;
        let log = SqliteEventLog::open(&dir.path().join("index.sqlite"), identity())?;
        let root = log.append(title("item-1", "a"))?;
        {
            let conn = log.lock();
            for (id, replica) in [("x", "rep-a"), ("y", "rep-b")] {
                let mut env = title("item-1", id).seal("ws-1", replica, 2, vec![root.event_id.clone()])?;
                env.event_id = id.into();
                insert(&conn, &env)?;
            }
        }

        let next = log.append(title("item-1", "after"))?;
        let stream = log.entity_events(EntityKind::Item, "item-1")?;
        assert_eq!(stream.len(), 5);
        let marker = &stream[3];
        assert_eq!(marker.event_type, EventType::Merge(EntityKind::Item));
        assert_eq!(marker.parents, vec!["x".to_string(), "y".to_string()]);
        assert!(marker.entity_seq < next.entity_seq);
        assert_eq!(next.parents, vec![marker.event_id.clone()]);
        assert_eq!(StreamSummary::from_events(&stream).heads(), vec![next.event_id]);
        Ok(())
    }

    #[test]
    fn rebuild_copies_jsonl_events() -> Result<()> {
        let dir = TempDir::new()?;
        let layout = Layout::new(dir.path());
        let jsonl = JsonlEventLog::new(layout.clone(), identity());
        jsonl.append(title("item-1", "a"))?;
        jsonl.append(title("item-2", "b"))?;

        let sqlite = SqliteEventLog::open(&layout.index_path(), identity())?;
        assert_eq!(sqlite.rebuild_from_jsonl(&layout)?, 2);
        assert!(sqlite.rebuilt_at()?.is_some());

        let from_sqlite: Vec<_> = sqlite.all_events()?.into_iter().map(|l| l.envelope).collect();
        let from_jsonl: Vec<_> = jsonl.all_events()?.into_iter().map(|l| l.envelope).collect();
        assert_eq!(from_sqlite, from_jsonl);

        // Rebuilding twice doesn't duplicate.
        assert_eq!(sqlite.rebuild_from_jsonl(&layout)?, 2);
        assert_eq!(sqlite.all_events()?.len(), 2);
        Ok(())
    }
}
