//! Sharded JSONL event log.
//!
//! Each replica appends to its own `events/events.<replicaId>.jsonl`; the
//! pre-sharding `events/events.jsonl` is read but never written.
//!
//! # Invariants
//!
//! - Only the local replica's shard receives appends.
//! - Each append is one `write_all` of `line + "\n"` on an `O_APPEND` handle,
//!   so readers see whole lines or nothing.
//! - Appends to one shard are serialized by an in-process mutex and an
//!   advisory lock under `.clarity/locks/`.
//! - Readers take no locks. A line that fails to parse is reported with its
//!   path and line number and otherwise skipped.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::{EventLog, Located, WriteGuard, sort_for_replay};
use crate::dag::StreamSummary;
use crate::error::{ClarityError, Result};
use crate::event::payload::MergeMarker;
use crate::event::{EntityKind, Envelope, EventDraft, EventType};
use crate::lock::{DEFAULT_LOCK_TIMEOUT, ShardLock};
use crate::workspace::{Identity, Layout};

/// A shard line that could not be read as an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineError {
    pub path: PathBuf,
    pub line: usize,
    pub message: String,
}

/// Result of reading every shard.
#[derive(Debug, Default)]
pub struct Scan {
    /// Parsed envelopes in replay order.
    pub events: Vec<Located>,
    pub errors: Vec<LineError>,
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn is_shard_name(name: &str) -> bool {
    name.starts_with("events") && name.ends_with(".jsonl")
}

/// Shard files under `events_dir`, sorted by file name. A missing directory
/// has no shards.
///
/// # Errors
///
/// Returns I/O errors other than the directory not existing.
pub fn list_shards(events_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(events_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut shards = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if is_shard_name(&name.to_string_lossy()) && entry.file_type()?.is_file() {
            shards.push(entry.path());
        }
    }
    shards.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(shards)
}

/// Stream the non-blank lines of `path` with their 1-based line numbers.
///
/// Invalid UTF-8 is passed through lossily so the caller can report it.
///
/// # Errors
///
/// Returns I/O errors from opening or reading the file.
pub fn for_each_line(path: &Path, mut visit: impl FnMut(usize, &str)) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        line_no += 1;
        let text = String::from_utf8_lossy(&buf);
        let text = text.trim_end_matches(['\n', '\r']);
        if !text.trim().is_empty() {
            visit(line_no, text);
        }
    }
}

/// Read and parse every shard under `events_dir`.
///
/// # Errors
///
/// Returns I/O errors; parse failures land in [`Scan::errors`].
pub fn scan(events_dir: &Path) -> Result<Scan> {
    let mut out = Scan::default();
    for path in list_shards(events_dir)? {
        for_each_line(&path, |line, text| match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => out.events.push(Located {
                envelope,
                path: path.clone(),
                line,
            }),
            Err(err) => out.errors.push(LineError {
                path: path.clone(),
                line,
                message: err.to_string(),
            }),
        })?;
    }
    sort_for_replay(&mut out.events);
    Ok(out)
}

fn scan_entity(events_dir: &Path, kind: EntityKind, id: &str) -> Result<Vec<Envelope>> {
    // Match the id as it is encoded on the line, escapes included.
    let needle = serde_json::to_string(id)?;
    let mut events = Vec::new();
    for path in list_shards(events_dir)? {
        for_each_line(&path, |_, text| {
            if !text.contains(&needle) {
                return;
            }
            if let Ok(env) = serde_json::from_str::<Envelope>(text) {
                if env.entity_kind == kind && env.entity_id == id {
                    events.push(env);
                }
            }
        })?;
    }
    events.sort_by(Envelope::cmp_entity);
    Ok(events)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// If a previous writer died mid-line, start the next record on a fresh line
/// so the torn fragment stays isolated.
fn ensure_trailing_newline(file: &mut File) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0_u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        warn!("shard ended mid-line; isolating torn record");
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn append_line(path: &Path, env: &Envelope) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = env.to_line()?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    ensure_trailing_newline(&mut file)?;
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// The authoritative event log.
pub struct JsonlEventLog {
    layout: Layout,
    identity: Identity,
    guard: Option<Box<dyn WriteGuard>>,
    lock_timeout: Duration,
    writer: Mutex<()>,
}

impl std::fmt::Debug for JsonlEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlEventLog")
            .field("root", &self.layout.root())
            .field("replica_id", &self.identity.replica_id)
            .field("guarded", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}

impl JsonlEventLog {
    #[must_use]
    pub fn new(layout: Layout, identity: Identity) -> Self {
        Self {
            layout,
            identity,
            guard: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            writer: Mutex::new(()),
        }
    }

    /// Consult `guard` before every append.
    #[must_use]
    pub fn with_guard(mut self, guard: Box<dyn WriteGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The shard this replica writes.
    #[must_use]
    pub fn local_shard(&self) -> PathBuf {
        self.layout.shard_path(&self.identity.replica_id)
    }

    /// Read every shard, keeping parse failures.
    ///
    /// # Errors
    ///
    /// Returns I/O errors.
    pub fn scan(&self) -> Result<Scan> {
        scan(&self.layout.events_dir())
    }

    fn check_guard(&self) -> Result<()> {
        self.guard.as_ref().map_or(Ok(()), |guard| guard.check())
    }

    /// Write an already-sealed envelope into the shard of its own replica.
    ///
    /// Used by backup import; sequencing and parents are taken as-is.
    ///
    /// # Errors
    ///
    /// Returns guard, lock, or I/O errors.
    pub fn append_sealed(&self, env: &Envelope) -> Result<()> {
        if env.replica_id.trim().is_empty() || env.replica_id.contains(['/', '\\']) {
            return Err(ClarityError::EventContract(format!(
                "invalid replica id {:?}",
                env.replica_id
            )));
        }
        self.check_guard()?;
        let _local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = ShardLock::acquire(
            &self.layout.shard_lock_path(&env.replica_id),
            self.lock_timeout,
        )?;
        append_line(&self.layout.shard_path(&env.replica_id), env)
    }

    fn seal_and_write(&self, draft: EventDraft, summary: &StreamSummary) -> Result<Envelope> {
        let env = draft.seal(
            &self.identity.workspace_id,
            &self.identity.replica_id,
            summary.next_seq(),
            summary.heads(),
        )?;
        append_line(&self.local_shard(), &env)?;
        debug!(
            event_id = %env.event_id,
            kind = %env.entity_kind,
            entity = %env.entity_id,
            seq = env.entity_seq,
            "appended {}",
            env.event_type
        );
        Ok(env)
    }
}

impl EventLog for JsonlEventLog {
    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn append(&self, draft: EventDraft) -> Result<Envelope> {
        draft.validate()?;
        self.check_guard()?;
        let kind = draft.entity_kind()?;

        let _local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = ShardLock::acquire(
            &self.layout.shard_lock_path(&self.identity.replica_id),
            self.lock_timeout,
        )?;

        let stream = scan_entity(&self.layout.events_dir(), kind, &draft.entity_id)?;
        let summary = StreamSummary::from_events(&stream);
        let heads = summary.heads();
        if heads.len() > 1 {
            return Err(ClarityError::ForkConflict {
                kind,
                id: draft.entity_id,
                heads: heads.len(),
            });
        }
        self.seal_and_write(draft, &summary)
    }

    fn entity_events(&self, kind: EntityKind, id: &str) -> Result<Vec<Envelope>> {
        scan_entity(&self.layout.events_dir(), kind, id)
    }

    fn all_events(&self) -> Result<Vec<Located>> {
        let scan = self.scan()?;
        for err in &scan.errors {
            debug!(path = %err.path.display(), line = err.line, "skipping unreadable line");
        }
        Ok(scan.events)
    }

    fn merge_heads(&self, kind: EntityKind, id: &str, actor_id: &str) -> Result<Option<Envelope>> {
        self.check_guard()?;
        let _local = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _lock = ShardLock::acquire(
            &self.layout.shard_lock_path(&self.identity.replica_id),
            self.lock_timeout,
        )?;

        let stream = scan_entity(&self.layout.events_dir(), kind, id)?;
        let summary = StreamSummary::from_events(&stream);
        let heads = summary.heads();
        if heads.len() <= 1 {
            return Ok(None);
        }
        let draft = EventDraft::new(EventType::Merge(kind), id, actor_id, &MergeMarker { heads })?;
        self.seal_and_write(draft, &summary).map(Some)
    }
}
