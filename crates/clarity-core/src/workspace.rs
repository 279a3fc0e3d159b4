//! Workspace layout and identity.
//!
//! A workspace is a directory (normally a Git working tree):
//!
//! ```text
//! meta/workspace.json          committed, holds the stable workspaceId
//! meta/users.json              committed, email -> actor mapping
//! meta/project-sources.json    committed, optional
//! events/events.<rep>.jsonl    committed, one shard per replica
//! resources/attachments/...    committed blobs
//! .clarity/device.json         local, deviceId + replicaId
//! .clarity/index.sqlite        local, derived index
//! ```
//!
//! The workspace id is created exactly once and never changes. The replica id
//! is per device: when a workspace directory is copied to another machine the
//! copy notices the foreign `device.json` and mints a fresh replica id so the
//! two devices never write to the same shard.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{EnvConfig, GlobalConfig};
use crate::error::{ClarityError, Result};

pub const META_DIR: &str = "meta";
pub const EVENTS_DIR: &str = "events";
pub const RESOURCES_DIR: &str = "resources";
pub const LOCAL_DIR: &str = ".clarity";

const WORKSPACE_FILE: &str = "workspace.json";
const USERS_FILE: &str = "users.json";
const PROJECT_SOURCES_FILE: &str = "project-sources.json";
const DEVICE_FILE: &str = "device.json";
const INDEX_FILE: &str = "index.sqlite";

/// Gitignore line covering local-only state.
pub const GITIGNORE_ENTRY: &str = ".clarity/";

/// Paths inside a workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    #[must_use]
    pub fn workspace_file(&self) -> PathBuf {
        self.meta_dir().join(WORKSPACE_FILE)
    }

    #[must_use]
    pub fn users_file(&self) -> PathBuf {
        self.meta_dir().join(USERS_FILE)
    }

    #[must_use]
    pub fn project_sources_file(&self) -> PathBuf {
        self.meta_dir().join(PROJECT_SOURCES_FILE)
    }

    #[must_use]
    pub fn events_dir(&self) -> PathBuf {
        self.root.join(EVENTS_DIR)
    }

    /// The shard written by `replica_id`.
    #[must_use]
    pub fn shard_path(&self, replica_id: &str) -> PathBuf {
        self.events_dir().join(format!("events.{replica_id}.jsonl"))
    }

    /// Pre-sharding single log, still honored on read.
    #[must_use]
    pub fn legacy_shard_path(&self) -> PathBuf {
        self.events_dir().join("events.jsonl")
    }

    #[must_use]
    pub fn attachments_dir(&self) -> PathBuf {
        self.root.join(RESOURCES_DIR).join("attachments")
    }

    #[must_use]
    pub fn local_dir(&self) -> PathBuf {
        self.root.join(LOCAL_DIR)
    }

    #[must_use]
    pub fn device_file(&self) -> PathBuf {
        self.local_dir().join(DEVICE_FILE)
    }

    #[must_use]
    pub fn index_path(&self) -> PathBuf {
        self.local_dir().join(INDEX_FILE)
    }

    #[must_use]
    pub fn shard_lock_path(&self, replica_id: &str) -> PathBuf {
        self.local_dir()
            .join("locks")
            .join(format!("events.{replica_id}.lock"))
    }

    #[must_use]
    pub fn id_seq_path(&self) -> PathBuf {
        self.local_dir().join("id_seq")
    }

    #[must_use]
    pub fn web_secret_path(&self) -> PathBuf {
        self.local_dir().join("web").join("secret.key")
    }

    /// `true` when the root or one of its ancestors carries a `.git` entry.
    /// The entry may be a file, as in linked worktrees and submodules.
    #[must_use]
    pub fn has_git(&self) -> bool {
        self.root.ancestors().any(|dir| dir.join(".git").exists())
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` via a temp sibling and rename.
///
/// `private` restricts the file to its owner on Unix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], private: bool) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    if private {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    #[cfg(not(unix))]
    let _ = private;

    let result = (|| {
        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub(crate) fn write_json(path: &Path, value: &impl Serialize, private: bool) -> Result<()> {
    let mut body = serde_json::to_vec_pretty(value)?;
    body.push(b'\n');
    write_atomic(path, &body, private)?;
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Contents of `meta/workspace.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMeta {
    pub workspace_id: String,
    pub created_at: DateTime<Utc>,
}

/// Contents of `.clarity/device.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub replica_id: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Resolved ids for writing to this workspace from this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub workspace_id: String,
    pub replica_id: String,
    pub device_id: String,
}

/// Load `meta/workspace.json`, creating it on first access.
///
/// Creation uses an exclusive create so two racing initializers agree on one
/// workspace id.
///
/// # Errors
///
/// Returns I/O or JSON errors from reading or creating the file.
pub fn ensure_workspace_meta(layout: &Layout) -> Result<WorkspaceMeta> {
    let path = layout.workspace_file();
    if let Some(meta) = read_json::<WorkspaceMeta>(&path)? {
        return Ok(meta);
    }

    fs::create_dir_all(layout.meta_dir())?;
    let meta = WorkspaceMeta {
        workspace_id: uuid::Uuid::new_v4().to_string(),
        created_at: Utc::now(),
    };
    let mut body = serde_json::to_vec_pretty(&meta)?;
    body.push(b'\n');

    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(mut file) => {
            file.write_all(&body)?;
            file.sync_all()?;
            info!(workspace_id = %meta.workspace_id, "initialized workspace");
            Ok(meta)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => read_json(&path)?
            .ok_or_else(|| ClarityError::not_found("workspace", path.display().to_string())),
        Err(err) => Err(err.into()),
    }
}

/// Resolve workspace and replica ids, creating local state as needed.
///
/// `global_dir` is the directory of the per-user `config.json`; pass `None`
/// to skip clone detection and the replica registry.
///
/// # Errors
///
/// Returns I/O or JSON errors from the workspace or device files. Global
/// config problems are logged and ignored.
pub fn load_identity(layout: &Layout, global_dir: Option<&Path>) -> Result<Identity> {
    let meta = ensure_workspace_meta(layout)?;

    let global_device = global_dir.and_then(|dir| match GlobalConfig::ensure_device_id(dir) {
        Ok(id) => Some(id),
        Err(err) => {
            warn!("global config unavailable, skipping clone detection: {err:#}");
            None
        }
    });

    let device_path = layout.device_file();
    let now = Utc::now();
    let device = match read_json::<DeviceInfo>(&device_path)? {
        Some(existing) => match &global_device {
            Some(global) if *global != existing.device_id => {
                warn!(
                    previous = %existing.device_id,
                    current = %global,
                    "workspace copied from another device; minting a new replica id"
                );
                remove_derived_index(layout);
                let fresh = DeviceInfo {
                    device_id: global.clone(),
                    replica_id: uuid::Uuid::new_v4().to_string(),
                    created_at: existing.created_at,
                    modified_at: now,
                };
                write_json(&device_path, &fresh, true)?;
                fresh
            }
            _ => existing,
        },
        None => {
            let fresh = DeviceInfo {
                device_id: global_device
                    .clone()
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                replica_id: uuid::Uuid::new_v4().to_string(),
                created_at: now,
                modified_at: now,
            };
            write_json(&device_path, &fresh, true)?;
            fresh
        }
    };

    if let Some(dir) = global_dir {
        register_replica(layout, dir, &meta.workspace_id, &device.replica_id);
    }

    Ok(Identity {
        workspace_id: meta.workspace_id,
        replica_id: device.replica_id,
        device_id: device.device_id,
    })
}

/// Convenience wrapper resolving the global config dir from `env`.
///
/// # Errors
///
/// See [`load_identity`].
pub fn load_identity_with_env(layout: &Layout, env: &EnvConfig) -> Result<Identity> {
    load_identity(layout, env.config_dir().as_deref())
}

fn register_replica(layout: &Layout, dir: &Path, workspace_id: &str, replica_id: &str) {
    let result = GlobalConfig::update(dir, |config| {
        config
            .replicas
            .insert(workspace_id.to_string(), replica_id.to_string())
    });
    match result {
        Ok((_, Some(previous))) if previous != replica_id => {
            warn!(%workspace_id, %previous, "replica id changed; discarding derived index");
            remove_derived_index(layout);
        }
        Ok(_) => {}
        Err(err) => warn!("failed to record replica id: {err:#}"),
    }
}

fn remove_derived_index(layout: &Layout) {
    let index = layout.index_path();
    for path in [
        index.clone(),
        index.with_extension("sqlite-wal"),
        index.with_extension("sqlite-shm"),
    ] {
        match fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "removed derived index"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), "failed to remove derived index: {err}"),
        }
    }
}

/// Add `.clarity/` to `.gitignore` when the workspace is a Git checkout.
///
/// Returns `true` when the file was changed.
///
/// # Errors
///
/// Returns I/O errors from reading or appending the file.
pub fn ensure_gitignore(layout: &Layout) -> Result<bool> {
    if !layout.has_git() {
        return Ok(false);
    }

    let path = layout.root().join(".gitignore");
    let existing = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };

    if existing
        .lines()
        .any(|line| matches!(line.trim(), ".clarity/" | ".clarity" | "/.clarity/" | "/.clarity"))
    {
        return Ok(false);
    }

    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    if !existing.is_empty() && !existing.ends_with('\n') {
        writeln!(file)?;
    }
    writeln!(file, "{GITIGNORE_ENTRY}")?;
    Ok(true)
}

// ---------------------------------------------------------------------------
// meta/users.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    pub email: String,
    pub actor_id: String,
}

/// Email to actor mapping shared through Git.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Users {
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl Users {
    /// Load `meta/users.json`; empty when missing.
    ///
    /// # Errors
    ///
    /// Returns I/O or parse errors.
    pub fn load(layout: &Layout) -> Result<Self> {
        Ok(read_json(&layout.users_file())?.unwrap_or_default())
    }

    /// Write back, normalized and sorted by email.
    ///
    /// # Errors
    ///
    /// Returns I/O errors.
    pub fn save(&self, layout: &Layout) -> Result<()> {
        let mut sorted = self.clone();
        sorted.normalize();
        write_json(&layout.users_file(), &sorted, false)
    }

    fn normalize(&mut self) {
        for user in &mut self.users {
            user.email = normalize_email(&user.email);
        }
        self.users.sort_by(|a, b| a.email.cmp(&b.email));
        self.users.dedup_by(|a, b| a.email == b.email);
    }

    /// Map `email` to `actor_id`. Returns `true` when anything changed.
    pub fn upsert(&mut self, email: &str, actor_id: &str) -> bool {
        let email = normalize_email(email);
        if let Some(entry) = self.users.iter_mut().find(|u| normalize_email(&u.email) == email) {
            if entry.actor_id == actor_id {
                return false;
            }
            entry.actor_id = actor_id.to_string();
        } else {
            self.users.push(UserEntry {
                email,
                actor_id: actor_id.to_string(),
            });
        }
        self.normalize();
        true
    }

    #[must_use]
    pub fn actor_for(&self, email: &str) -> Option<&str> {
        let email = normalize_email(email);
        self.users
            .iter()
            .find(|u| normalize_email(&u.email) == email)
            .map(|u| u.actor_id.as_str())
    }
}

// ---------------------------------------------------------------------------
// meta/project-sources.json
// ---------------------------------------------------------------------------

pub const PROJECT_SOURCES_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Workspace,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSource {
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub workspace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSources {
    pub version: u32,
    #[serde(default)]
    pub sources: Vec<ProjectSource>,
}

impl Default for ProjectSources {
    fn default() -> Self {
        Self {
            version: PROJECT_SOURCES_VERSION,
            sources: Vec::new(),
        }
    }
}

impl ProjectSources {
    /// Load the optional sources file.
    ///
    /// # Errors
    ///
    /// Returns I/O or parse errors.
    pub fn load(layout: &Layout) -> Result<Option<Self>> {
        read_json(&layout.project_sources_file())
    }

    /// # Errors
    ///
    /// Returns I/O errors.
    pub fn save(&self, layout: &Layout) -> Result<()> {
        write_json(&layout.project_sources_file(), self, false)
    }
}
