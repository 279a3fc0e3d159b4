//! Git integration: status probing, commits of the canonical workspace
//! files, auto-sync, and the write guard.
//!
//! All subprocess calls go through [`CliGit`], which runs `git -C <dir>`
//! and honours a [`Cancel`] signal by killing the child.

pub mod autosync;
pub mod commit;
pub mod debounce;
pub mod status;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::{Cancel, STATUS_TIMEOUT};
use crate::error::{ClarityError, Result};
use crate::log::WriteGuard;

pub use autosync::{SyncOutcome, auto_sync, push_with_retry};
pub use commit::{CommitOutcome, canonical_paths, commit_message, commit_workspace};
pub use debounce::DebouncedCommitter;
pub use status::{GitStatus, InProgress};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Everything the engine asks of Git.
pub trait GitBackend: Send + Sync {
    /// Probe the working tree. A directory outside any repository yields
    /// `is_repo == false` rather than an error.
    ///
    /// # Errors
    ///
    /// Subprocess failures and cancellation.
    fn status(&self, cancel: &Cancel) -> Result<GitStatus>;

    /// Stage `paths` (relative to the repository root).
    ///
    /// # Errors
    ///
    /// Subprocess failures and cancellation.
    fn add(&self, cancel: &Cancel, paths: &[PathBuf]) -> Result<()>;

    /// Zero-context staged patch limited to `paths`; empty when nothing is
    /// staged.
    ///
    /// # Errors
    ///
    /// Subprocess failures and cancellation.
    fn staged_diff(&self, cancel: &Cancel, paths: &[PathBuf]) -> Result<String>;

    /// Commit the staged state of `paths` only.
    ///
    /// # Errors
    ///
    /// Subprocess failures and cancellation.
    fn commit(&self, cancel: &Cancel, message: &str, paths: &[PathBuf]) -> Result<()>;

    /// # Errors
    ///
    /// [`ClarityError::NonFastForwardPush`] when the remote rejected the
    /// push as non-fast-forward; other subprocess failures as
    /// [`ClarityError::Git`].
    fn push(&self, cancel: &Cancel) -> Result<()>;

    /// # Errors
    ///
    /// Subprocess failures and cancellation.
    fn pull_rebase(&self, cancel: &Cancel) -> Result<()>;

    /// URL of `remote`, `None` when it isn't configured.
    ///
    /// # Errors
    ///
    /// Subprocess failures and cancellation.
    fn remote_url(&self, cancel: &Cancel, remote: &str) -> Result<Option<String>>;
}

/// Captured result of one `git` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    fn ok_or_git(self, what: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ClarityError::Git(format!("{what}: {}", self.stderr.trim())))
        }
    }
}

/// Whether push output reports a non-fast-forward rejection.
#[must_use]
pub fn is_non_fast_forward(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["non-fast-forward", "fetch first", "rejected", "updates were rejected"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Whether a `git` executable can be run at all.
#[must_use]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// The `git` CLI, run inside one directory.
#[derive(Debug, Clone)]
pub struct CliGit {
    dir: PathBuf,
}

impl CliGit {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `git <args>` in the working directory.
    ///
    /// The child is polled so that cancellation or the deadline kills it.
    /// Output is drained on helper threads so a chatty child can't block on
    /// a full pipe.
    ///
    /// # Errors
    ///
    /// [`ClarityError::Io`] when git can't be spawned,
    /// [`ClarityError::Cancelled`] / [`ClarityError::DeadlineExceeded`].
    pub fn run(&self, cancel: &Cancel, args: &[&str]) -> Result<Output> {
        cancel.check()?;
        debug!(dir = %self.dir.display(), ?args, "git");
        let mut child = Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Err(err) = cancel.check() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
            thread::sleep(POLL_INTERVAL);
        };

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            handle
                .and_then(|h| h.join().ok())
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default()
        };
        Ok(Output {
            success: status.success(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        })
    }

    fn git_dir(&self, cancel: &Cancel) -> Result<Option<PathBuf>> {
        let out = self.run(cancel, &["rev-parse", "--absolute-git-dir"])?;
        Ok(out
            .success
            .then(|| PathBuf::from(out.stdout.trim()))
            .filter(|p| !p.as_os_str().is_empty()))
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Repo-relative paths as pathspecs anchored at the top of the work tree,
/// since git runs in the workspace directory which may be nested.
fn path_args(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| format!(":(top){}", p.to_string_lossy().replace('\\', "/")))
        .collect()
}

impl GitBackend for CliGit {
    fn status(&self, cancel: &Cancel) -> Result<GitStatus> {
        let top = self.run(cancel, &["rev-parse", "--show-toplevel"])?;
        if !top.success {
            return Ok(GitStatus::default());
        }
        let porcelain = self
            .run(cancel, &["status", "--porcelain=v2", "--branch"])?
            .ok_or_git("status")?;
        let mut st = status::parse_porcelain_v2(&porcelain.stdout);
        st.is_repo = true;
        st.root = Some(PathBuf::from(top.stdout.trim()));
        if let Some(git_dir) = self.git_dir(cancel)? {
            st.in_progress = InProgress::detect(&git_dir);
        }
        if let Some(remote) = st.upstream_remote.clone() {
            st.upstream_url = self.remote_url(cancel, &remote)?;
        }
        Ok(st)
    }

    fn add(&self, cancel: &Cancel, paths: &[PathBuf]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let rel = path_args(paths);
        let mut args = vec!["add", "-A", "--"];
        args.extend(rel.iter().map(String::as_str));
        self.run(cancel, &args)?.ok_or_git("add")?;
        Ok(())
    }

    fn staged_diff(&self, cancel: &Cancel, paths: &[PathBuf]) -> Result<String> {
        let rel = path_args(paths);
        let mut args = vec!["diff", "--cached", "--no-color", "--no-ext-diff", "--unified=0", "--"];
        args.extend(rel.iter().map(String::as_str));
        Ok(self.run(cancel, &args)?.ok_or_git("diff --cached")?.stdout)
    }

    fn commit(&self, cancel: &Cancel, message: &str, paths: &[PathBuf]) -> Result<()> {
        let rel = path_args(paths);
        let mut args = vec!["commit", "--no-verify", "-m", message, "--"];
        args.extend(rel.iter().map(String::as_str));
        self.run(cancel, &args)?.ok_or_git("commit")?;
        Ok(())
    }

    fn push(&self, cancel: &Cancel) -> Result<()> {
        let out = self.run(cancel, &["push"])?;
        if out.success {
            return Ok(());
        }
        let stderr = out.stderr.trim().to_string();
        if is_non_fast_forward(&stderr) {
            Err(ClarityError::NonFastForwardPush(stderr))
        } else {
            Err(ClarityError::Git(format!("push: {stderr}")))
        }
    }

    fn pull_rebase(&self, cancel: &Cancel) -> Result<()> {
        self.run(cancel, &["pull", "--rebase"])?.ok_or_git("pull --rebase")?;
        Ok(())
    }

    fn remote_url(&self, cancel: &Cancel, remote: &str) -> Result<Option<String>> {
        let out = self.run(cancel, &["remote", "get-url", remote])?;
        Ok(out
            .success
            .then(|| out.stdout.trim().to_string())
            .filter(|url| !url.is_empty()))
    }
}

/// Refuses event appends while a merge, rebase, cherry-pick or revert is in
/// progress or unmerged paths exist.
///
/// A failing probe does not block the write; outside a repository there is
/// nothing to guard.
pub struct GitGuard {
    git: Arc<dyn GitBackend>,
    budget: Duration,
}

impl GitGuard {
    pub fn new(git: Arc<dyn GitBackend>) -> Self {
        Self {
            git,
            budget: STATUS_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }
}

impl WriteGuard for GitGuard {
    fn check(&self) -> Result<()> {
        let status = match self.git.status(&Cancel::with_timeout(self.budget)) {
            Ok(status) => status,
            Err(err) => {
                warn!(error = %err, "git status probe failed; not blocking write");
                return Ok(());
            }
        };
        if !status.is_repo {
            return Ok(());
        }
        if let Some(kind) = status.in_progress {
            return Err(ClarityError::GitWriteBlocked(kind.as_str().to_string()));
        }
        if status.unmerged {
            return Err(ClarityError::GitWriteBlocked("merge".to_string()));
        }
        Ok(())
    }
}
