//! Process configuration.
//!
//! [`EnvConfig`] is the closed set of `CLARITY_*` environment variables,
//! read once at the entry point and passed down explicitly. [`GlobalConfig`]
//! is the per-user `config.json` holding this device's id and the
//! `workspaceId -> replicaId` registry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use crate::lock::{ConfigLock, DEFAULT_LOCK_TIMEOUT};

pub const ENV_AUTOCOMMIT: &str = "CLARITY_AUTOCOMMIT";
pub const ENV_GIT_AUTOCOMMIT: &str = "CLARITY_GIT_AUTOCOMMIT";
pub const ENV_AUTOPUSH: &str = "CLARITY_AUTOPUSH";
pub const ENV_AUTOPULL_REBASE: &str = "CLARITY_AUTOPULL_REBASE";
pub const ENV_ASSIGN_GRACE_SECONDS: &str = "CLARITY_ASSIGN_GRACE_SECONDS";
pub const ENV_EVENTLOG: &str = "CLARITY_EVENTLOG";
pub const ENV_CONFIG_DIR: &str = "CLARITY_CONFIG_DIR";

/// Delegation grace applied when the variable is unset or invalid.
pub const DEFAULT_ASSIGN_GRACE: Duration = Duration::from_secs(3600);

/// Event log storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLogBackend {
    Jsonl,
    Sqlite,
}

impl EventLogBackend {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "jsonl" => Some(Self::Jsonl),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Parse a boolean flag: `1/0/true/false/yes/no/on/off`, any case.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Settings drawn from the `CLARITY_*` environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub autocommit: bool,
    pub autopush: bool,
    pub autopull_rebase: bool,
    pub assign_grace: Duration,
    /// Forced backend; `None` means auto-detect.
    pub eventlog: Option<EventLogBackend>,
    pub config_dir_override: Option<PathBuf>,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            autocommit: true,
            autopush: true,
            autopull_rebase: true,
            assign_grace: DEFAULT_ASSIGN_GRACE,
            eventlog: None,
            config_dir_override: None,
        }
    }
}

impl EnvConfig {
    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).and_then(|raw| parse_bool(&raw));

        let autocommit = flag(ENV_AUTOCOMMIT)
            .or_else(|| flag(ENV_GIT_AUTOCOMMIT))
            .unwrap_or(true);

        let assign_grace = lookup(ENV_ASSIGN_GRACE_SECONDS)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|secs| u64::try_from(secs).ok())
            .map_or(DEFAULT_ASSIGN_GRACE, Duration::from_secs);

        Self {
            autocommit,
            autopush: flag(ENV_AUTOPUSH).unwrap_or(true),
            autopull_rebase: flag(ENV_AUTOPULL_REBASE).unwrap_or(true),
            assign_grace,
            eventlog: lookup(ENV_EVENTLOG).and_then(|raw| EventLogBackend::parse(&raw)),
            config_dir_override: lookup(ENV_CONFIG_DIR)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Read the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// The process-wide configuration, read on first use.
    pub fn global() -> &'static Self {
        static CONFIG: OnceLock<EnvConfig> = OnceLock::new();
        CONFIG.get_or_init(Self::from_env)
    }

    /// Directory holding the global `config.json`.
    ///
    /// `CLARITY_CONFIG_DIR` wins; otherwise `$HOME/.clarity`.
    #[must_use]
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.config_dir_override
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".clarity")))
    }
}

// ---------------------------------------------------------------------------
// Global config file
// ---------------------------------------------------------------------------

pub const GLOBAL_CONFIG_FILE: &str = "config.json";
const GLOBAL_CONFIG_VERSION: u32 = 1;

/// Serializes writers inside this process; the file lock covers other
/// processes.
static WRITE_GUARD: Mutex<()> = Mutex::new(());

const fn default_version() -> u32 {
    GLOBAL_CONFIG_VERSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub device_id: String,
    /// `workspaceId -> replicaId` for workspaces opened on this device.
    #[serde(default)]
    pub replicas: BTreeMap<String, String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            version: GLOBAL_CONFIG_VERSION,
            device_id: String::new(),
            replicas: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load `<dir>/config.json`, or defaults when it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but can't be read or parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(GLOBAL_CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Load, apply `change`, and write back atomically while holding both the
    /// process mutex and the advisory file lock.
    ///
    /// # Errors
    ///
    /// Returns an error on lock timeout, parse failure, or write failure.
    pub fn update<T>(dir: &Path, change: impl FnOnce(&mut Self) -> T) -> Result<(Self, T)> {
        let _process = WRITE_GUARD.lock().unwrap_or_else(PoisonError::into_inner);
        fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        let _file = ConfigLock::acquire(&dir.join("config.lock"), DEFAULT_LOCK_TIMEOUT)
            .context("Failed to lock global config")?;

        let mut config = Self::load(dir)?;
        let out = change(&mut config);
        config.write_atomic(dir)?;
        Ok((config, out))
    }

    /// Return this device's id, creating and persisting one if needed.
    ///
    /// # Errors
    ///
    /// See [`GlobalConfig::update`].
    pub fn ensure_device_id(dir: &Path) -> Result<String> {
        let existing = Self::load(dir)?;
        if !existing.device_id.is_empty() {
            return Ok(existing.device_id);
        }
        let (config, ()) = Self::update(dir, |config| {
            if config.device_id.is_empty() {
                config.device_id = uuid::Uuid::new_v4().to_string();
            }
        })?;
        Ok(config.device_id)
    }

    fn write_atomic(&self, dir: &Path) -> Result<()> {
        static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

        let path = dir.join(GLOBAL_CONFIG_FILE);
        let tmp = dir.join(format!(
            ".{GLOBAL_CONFIG_FILE}.{}.{}.tmp",
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));

        let mut body = serde_json::to_vec_pretty(self).context("Failed to encode config")?;
        body.push(b'\n');
        {
            let mut file = fs::File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(&body)?;
            file.sync_all()?;
        }

        if path.exists() {
            if let Err(err) = fs::copy(&path, dir.join(format!("{GLOBAL_CONFIG_FILE}.bak"))) {
                tracing::warn!("config backup failed: {err}");
            }
        }

        fs::rename(&tmp, &path).with_context(|| {
            let _ = fs::remove_file(&tmp);
            format!("Failed to replace {}", path.display())
        })
    }
}
