//! One open workspace: layout, identity, event log and optional Git.
//!
//! Every write goes through [`Store::mutate`]: replay a fresh snapshot, run
//! one mutator against it, append the resulting event. Auto-sync is left to
//! the caller ([`Store::sync`]) so a burst of writes can share one commit.

use std::io::{BufRead, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use rand::rngs::ThreadRng;
use tracing::debug;

use crate::attachment;
use crate::backup::{self, ImportOptions, ImportReport, LegacySnapshot};
use crate::cancel::Cancel;
use crate::config::EnvConfig;
use crate::doctor::{self, Report};
use crate::error::Result;
use crate::event::payload::AttachmentAdd;
use crate::event::{EntityKind, Envelope};
use crate::git::{CliGit, GitBackend, GitGuard, SyncOutcome, auto_sync, git_available};
use crate::id::IdAllocator;
use crate::log::{self, EventLog, JsonlEventLog, WriteGuard};
use crate::model::Snapshot;
use crate::mutate::{Mutation, Mutator};
use crate::replay::replay;
use crate::secret;
use crate::workspace::{self, Identity, Layout};

/// Result of [`Store::mutate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub entity: T,
    /// The appended event; `None` when the mutation was a no-op.
    pub envelope: Option<Envelope>,
}

impl<T> Applied<T> {
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.envelope.is_some()
    }
}

pub struct Store {
    layout: Layout,
    env: EnvConfig,
    identity: Identity,
    log: Box<dyn EventLog>,
    git: Option<Arc<dyn GitBackend>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("root", &self.layout.root())
            .field("identity", &self.identity)
            .field("git", &self.git.is_some())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open the workspace at `root`, initializing its metadata on first use.
    ///
    /// When `root` lies inside a Git checkout (at any depth) and `git` is
    /// on `PATH`, the `git` CLI is wired in as write guard and sync backend.
    ///
    /// # Errors
    ///
    /// I/O, JSON or SQLite errors while initializing.
    pub fn open(root: impl Into<PathBuf>, env: EnvConfig) -> Result<Self> {
        let layout = Layout::new(root);
        let git: Option<Arc<dyn GitBackend>> = (layout.has_git() && git_available())
            .then(|| Arc::new(CliGit::new(layout.root())) as Arc<dyn GitBackend>);
        Self::open_with(layout, env, git)
    }

    /// Open with an explicit Git backend (or none).
    ///
    /// # Errors
    ///
    /// As for [`Store::open`].
    pub fn open_with(layout: Layout, env: EnvConfig, git: Option<Arc<dyn GitBackend>>) -> Result<Self> {
        workspace::ensure_workspace_meta(&layout)?;
        if workspace::ensure_gitignore(&layout)? {
            debug!(root = %layout.root().display(), "added .clarity/ to .gitignore");
        }
        let identity = workspace::load_identity_with_env(&layout, &env)?;
        let guard = git
            .clone()
            .map(|git| Box::new(GitGuard::new(git)) as Box<dyn WriteGuard>);
        let log = log::open(&layout, identity.clone(), &env, guard)?;
        Ok(Self {
            layout,
            env,
            identity,
            log,
            git,
        })
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    #[must_use]
    pub const fn env(&self) -> &EnvConfig {
        &self.env
    }

    #[must_use]
    pub fn log(&self) -> &dyn EventLog {
        self.log.as_ref()
    }

    /// Id allocator persisting its fallback counter under `.clarity/`.
    #[must_use]
    pub fn ids(&self) -> IdAllocator<ThreadRng> {
        IdAllocator::new(Some(self.layout.id_seq_path()))
    }

    /// Replay every readable event.
    ///
    /// # Errors
    ///
    /// Storage errors from reading the log.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(replay(&self.log.all_events()?))
    }

    /// Append the event of a mutation computed elsewhere.
    ///
    /// # Errors
    ///
    /// Append failures; nothing is written on error.
    pub fn apply<T>(&self, mutation: Mutation<T>) -> Result<Applied<T>> {
        let envelope = match mutation.event {
            Some(draft) => Some(self.log.append(draft)?),
            None => None,
        };
        Ok(Applied {
            entity: mutation.entity,
            envelope,
        })
    }

    /// Run one mutator as `actor_id` on a freshly replayed snapshot and
    /// append its event.
    ///
    /// # Errors
    ///
    /// The mutator's validation errors, or append failures.
    pub fn mutate<T>(
        &self,
        actor_id: &str,
        change: impl FnOnce(&mut Mutator<'_>) -> Result<Mutation<T>>,
    ) -> Result<Applied<T>> {
        let mut snap = self.snapshot()?;
        let mut mutator = Mutator::new(&mut snap, actor_id).with_grace(self.env.assign_grace);
        let mutation = change(&mut mutator)?;
        self.apply(mutation)
    }

    /// Join a forked entity stream with a merge marker.
    ///
    /// # Errors
    ///
    /// Storage or guard errors.
    pub fn merge_heads(&self, kind: EntityKind, id: &str, actor_id: &str) -> Result<Option<Envelope>> {
        self.log.merge_heads(kind, id, actor_id)
    }

    /// Copy a blob into `resources/attachments` ready for
    /// [`Mutator::add_attachment`].
    ///
    /// # Errors
    ///
    /// Oversize blobs and I/O errors.
    pub fn store_attachment(&self, name: &str, reader: impl Read, max_bytes: u64) -> Result<AttachmentAdd> {
        attachment::store(&self.layout, &mut self.ids(), name, reader, max_bytes)
    }

    /// Audit the JSONL shards.
    ///
    /// # Errors
    ///
    /// I/O errors listing the shards.
    pub fn doctor(&self) -> Result<Report> {
        doctor::check(&self.layout.events_dir())
    }

    /// Write every event as JSONL. Returns the number written.
    ///
    /// # Errors
    ///
    /// Read or write failures.
    pub fn export(&self, out: impl Write) -> Result<usize> {
        backup::export(&self.log.all_events()?, out)
    }

    /// Import a JSONL export into the shards, stamping this workspace's id.
    ///
    /// # Errors
    ///
    /// Read and append failures.
    pub fn import(&self, input: impl BufRead) -> Result<ImportReport> {
        let target = JsonlEventLog::new(self.layout.clone(), self.identity.clone());
        let options = ImportOptions {
            rewrite_workspace_id: Some(self.identity.workspace_id.clone()),
        };
        backup::import(&target, input, &options)
    }

    /// Import a legacy snapshot through the normal append path.
    ///
    /// # Errors
    ///
    /// Conversion or append failures.
    pub fn import_legacy(&self, legacy: &LegacySnapshot) -> Result<usize> {
        let existing = self.snapshot()?;
        backup::import_legacy(self.log.as_ref(), legacy, &existing)
    }

    /// Best-effort commit (and push) of the canonical files.
    ///
    /// Does nothing outside a Git checkout.
    pub fn sync(&self, label: Option<&str>, cancel: &Cancel) -> SyncOutcome {
        self.git.as_deref().map_or_else(SyncOutcome::default, |git| {
            auto_sync(git, &self.layout, &self.env, label, cancel)
        })
    }

    /// The local web-session signing key, created on first use.
    ///
    /// # Errors
    ///
    /// I/O errors reading or writing `.clarity/web/secret.key`.
    pub fn web_secret(&self) -> Result<Vec<u8>> {
        secret::load_or_create(&self.layout)
    }

    #[must_use]
    pub fn git(&self) -> Option<Arc<dyn GitBackend>> {
        self.git.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventLogBackend;
    use crate::error::ClarityError;
    use crate::git::InProgress;
    use crate::git::tests::FakeGit;
    use crate::model::{ActorKind, AttachmentOwner};
    use crate::mutate::NewItem;
    use tempfile::TempDir;

    fn env(dir: &TempDir) -> EnvConfig {
        EnvConfig {
            config_dir_override: Some(dir.path().join("home")),
            eventlog: Some(EventLogBackend::Jsonl),
            ..EnvConfig::default()
        }
    }

    fn open(dir: &TempDir) -> Store {
        Store::open_with(Layout::new(dir.path().join("ws")), env(dir), None).expect("open")
    }

    /// Human `act`, project and outline; returns (actor, outline).
    fn seed(store: &Store) -> (String, String) {
        let mut ids = store.ids();
        let actor = store
            .mutate("", |m| m.create_actor(&mut ids, ActorKind::Human, "Ann", None))
            .expect("actor")
            .entity
            .id;
        let project = store
            .mutate(&actor, |m| m.create_project(&mut ids, "P"))
            .expect("project")
            .entity
            .id;
        let outline = store
            .mutate(&actor, |m| m.create_outline(&mut ids, &project, Some("O")))
            .expect("outline")
            .entity
            .id;
        (actor, outline)
    }

    #[test]
    fn writes_are_visible_after_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let (actor, outline) = seed(&open(&dir));

        let store = open(&dir);
        let mut ids = store.ids();
        let item = store
            .mutate(&actor, |m| {
                m.create_item(
                    &mut ids,
                    NewItem {
                        outline_id: outline.clone(),
                        title: "Write docs".into(),
                        ..NewItem::default()
                    },
                )
            })
            .expect("item");
        assert!(item.changed());
        let env = item.envelope.as_ref().expect("envelope");
        assert_eq!(env.workspace_id, store.identity().workspace_id);
        assert_eq!(env.replica_id, store.identity().replica_id);

        let snap = open(&dir).snapshot().expect("snapshot");
        assert_eq!(snap.items[&item.entity.id].title, "Write docs");
        assert_eq!(snap.items[&item.entity.id].status_id, "todo");
    }

    #[test]
    fn no_op_mutation_appends_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let (actor, outline) = seed(&store);
        let before = store.log().all_events().expect("events").len();
        let applied = store
            .mutate(&actor, |m| m.rename_outline(&outline, Some("O")))
            .expect("rename");
        assert!(!applied.changed());
        assert_eq!(store.log().all_events().expect("events").len(), before);
    }

    #[test]
    fn failed_validation_appends_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let (actor, _) = seed(&store);
        let before = store.log().all_events().expect("events").len();
        let err = store
            .mutate(&actor, |m| m.set_title("item-missing", "x"))
            .expect_err("missing item");
        assert!(matches!(err, ClarityError::NotFound { kind: "item", .. }));
        assert_eq!(store.log().all_events().expect("events").len(), before);
    }

    #[test]
    fn guard_blocks_writes_during_rebase() {
        let dir = TempDir::new().expect("tempdir");
        let fake = Arc::new(FakeGit::repo());
        let store = Store::open_with(
            Layout::new(dir.path().join("ws")),
            env(&dir),
            Some(Arc::clone(&fake) as Arc<dyn GitBackend>),
        )
        .expect("open");
        let (actor, _) = seed(&store);

        fake.status.lock().expect("lock").in_progress = Some(InProgress::Rebase);
        let mut ids = store.ids();
        let err = store
            .mutate(&actor, |m| m.create_project(&mut ids, "Blocked"))
            .expect_err("blocked");
        assert!(matches!(err, ClarityError::GitWriteBlocked(_)));
    }

    #[test]
    fn attachment_flows_through_to_snapshot() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        let (actor, outline) = seed(&store);
        let mut ids = store.ids();
        let item = store
            .mutate(&actor, |m| {
                m.create_item(
                    &mut ids,
                    NewItem {
                        outline_id: outline.clone(),
                        title: "Screenshot".into(),
                        ..NewItem::default()
                    },
                )
            })
            .expect("item")
            .entity;
        let record = store
            .store_attachment("shot.png", &b"png"[..], 1024)
            .expect("blob");
        let att = store
            .mutate(&actor, |m| m.add_attachment(AttachmentOwner::Item, &item.id, record))
            .expect("attach")
            .entity;
        let snap = store.snapshot().expect("snapshot");
        assert_eq!(snap.attachments[&att.id].mime_type, "image/png");
    }

    #[test]
    fn sync_without_git_is_a_no_op() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        assert_eq!(store.sync(None, &Cancel::none()), SyncOutcome::default());
    }

    #[test]
    fn doctor_is_clean_after_normal_writes() {
        let dir = TempDir::new().expect("tempdir");
        let store = open(&dir);
        seed(&store);
        let report = store.doctor().expect("doctor");
        assert!(!report.has_errors(), "{:?}", report.issues);
        assert_eq!(report.events_checked, 3);
    }
}
