//! Best-effort commit and push after a successful mutation.

use tracing::{info, warn};

use super::{GitBackend, commit_workspace};
use crate::cancel::{Cancel, PULL_TIMEOUT, PUSH_TIMEOUT};
use crate::config::EnvConfig;
use crate::error::{ClarityError, Result};
use crate::workspace::Layout;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub committed: bool,
    pub pushed: bool,
    /// A pull-rebase ran to recover from a rejected push.
    pub pulled: bool,
}

/// Push, and on a non-fast-forward rejection optionally pull-rebase and
/// push once more.
///
/// Returns whether a pull-rebase ran.
///
/// # Errors
///
/// The push (or retry) error, or the pull-rebase error.
pub fn push_with_retry(git: &dyn GitBackend, pull_rebase: bool, cancel: &Cancel) -> Result<bool> {
    match git.push(&cancel.child(PUSH_TIMEOUT)) {
        Ok(()) => Ok(false),
        Err(ClarityError::NonFastForwardPush(reason)) if pull_rebase => {
            info!(%reason, "push rejected; pulling with rebase and retrying");
            git.pull_rebase(&cancel.child(PULL_TIMEOUT))?;
            git.push(&cancel.child(PUSH_TIMEOUT))?;
            Ok(true)
        }
        Err(err) => Err(err),
    }
}

/// Commit the canonical files and push when configured to.
///
/// Never fails: every error is logged and reflected in the outcome.
pub fn auto_sync(
    git: &dyn GitBackend,
    layout: &Layout,
    env: &EnvConfig,
    label: Option<&str>,
    cancel: &Cancel,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();
    if !env.autocommit {
        return outcome;
    }
    match commit_workspace(git, layout, label, cancel) {
        Ok(commit) => outcome.committed = commit.committed,
        Err(err) => {
            warn!(error = %err, "auto-commit skipped");
            return outcome;
        }
    }
    if !outcome.committed || !env.autopush {
        return outcome;
    }

    let ready = match git.status(cancel) {
        Ok(status) => status.can_push(),
        Err(err) => {
            warn!(error = %err, "status probe before push failed");
            false
        }
    };
    if !ready {
        return outcome;
    }
    match push_with_retry(git, env.autopull_rebase, cancel) {
        Ok(pulled) => {
            outcome.pushed = true;
            outcome.pulled = pulled;
        }
        Err(err) => warn!(error = %err, "auto-push failed"),
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::tests::FakeGit;
    use std::fs;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (Layout, FakeGit) {
        let layout = Layout::new(dir.path());
        fs::create_dir_all(layout.events_dir()).expect("events");
        let fake = FakeGit::repo();
        {
            let mut st = fake.status.lock().expect("status");
            st.root = Some(dir.path().to_path_buf());
            st.upstream = Some("origin/main".into());
        }
        *fake.diff.lock().expect("diff") =
            "+++ b/events/events.r.jsonl\n+{\"type\":\"comment.add\"}\n".into();
        (layout, fake)
    }

    fn env() -> EnvConfig {
        EnvConfig {
            autocommit: true,
            autopush: true,
            autopull_rebase: true,
            ..EnvConfig::default()
        }
    }

    #[test]
    fn commits_and_pushes() {
        let dir = TempDir::new().expect("tempdir");
        let (layout, fake) = setup(&dir);
        let out = auto_sync(&fake, &layout, &env(), None, &Cancel::none());
        assert_eq!(
            out,
            SyncOutcome {
                committed: true,
                pushed: true,
                pulled: false
            }
        );
    }

    #[test]
    fn rejected_push_pulls_and_retries_once() {
        let dir = TempDir::new().expect("tempdir");
        let (layout, fake) = setup(&dir);
        fake.push_results
            .lock()
            .expect("push")
            .push(Err(ClarityError::NonFastForwardPush("fetch first".into())));
        let out = auto_sync(&fake, &layout, &env(), None, &Cancel::none());
        assert!(out.pushed && out.pulled);
        let calls = fake.calls();
        let tail: Vec<&str> = calls.iter().rev().take(3).map(String::as_str).collect();
        assert_eq!(tail, ["push", "pull", "push"]);
    }

    #[test]
    fn rejected_push_without_rebase_is_swallowed() {
        let dir = TempDir::new().expect("tempdir");
        let (layout, fake) = setup(&dir);
        fake.push_results
            .lock()
            .expect("push")
            .push(Err(ClarityError::NonFastForwardPush("rejected".into())));
        let env = EnvConfig {
            autopull_rebase: false,
            ..env()
        };
        let out = auto_sync(&fake, &layout, &env, None, &Cancel::none());
        assert!(out.committed && !out.pushed);
        assert!(!fake.calls().iter().any(|c| c == "pull"));
    }

    #[test]
    fn respects_switches_and_upstream() {
        let dir = TempDir::new().expect("tempdir");
        let (layout, fake) = setup(&dir);
        let off = EnvConfig {
            autocommit: false,
            ..env()
        };
        assert_eq!(auto_sync(&fake, &layout, &off, None, &Cancel::none()), SyncOutcome::default());
        assert!(fake.calls().is_empty());

        fake.status.lock().expect("status").upstream = None;
        let out = auto_sync(&fake, &layout, &env(), None, &Cancel::none());
        assert!(out.committed && !out.pushed);
    }
}
