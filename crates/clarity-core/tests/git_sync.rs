//! Git integration against a real repository. Skipped when `git` is not on
//! `PATH`.

use std::fs;
use std::path::Path;
use std::process::Command;

use clarity_core::cancel::Cancel;
use clarity_core::config::{EnvConfig, EventLogBackend};
use clarity_core::git::{CliGit, GitBackend, git_available};
use clarity_core::model::ActorKind;
use clarity_core::{ClarityError, Store};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn init_repo(dir: &Path) {
    fs::create_dir_all(dir).expect("mkdir");
    git(dir, &["init", "-q"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

fn env_for(home: &Path) -> EnvConfig {
    EnvConfig {
        config_dir_override: Some(home.to_path_buf()),
        eventlog: Some(EventLogBackend::Jsonl),
        ..EnvConfig::default()
    }
}

fn add_project(store: &Store, name: &str) -> Result<(), ClarityError> {
    let mut ids = store.ids();
    let snap = store.snapshot()?;
    let actor = match snap.actors.keys().next() {
        Some(id) => id.clone(),
        None => {
            store
                .mutate("", |m| m.create_actor(&mut ids, ActorKind::Human, "Ann", None))?
                .entity
                .id
        }
    };
    store.mutate(&actor, |m| m.create_project(&mut ids, name))?;
    Ok(())
}

#[test]
fn mutation_then_sync_commits_canonical_files() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("ws");
    init_repo(&root);

    let store = Store::open(&root, env_for(&tmp.path().join("home"))).expect("open");
    assert!(store.git().is_some());
    let ignore = fs::read_to_string(root.join(".gitignore")).expect(".gitignore");
    assert!(ignore.lines().any(|l| l.trim() == ".clarity/"));

    add_project(&store, "Roadmap").expect("project");
    let outcome = store.sync(Some("Ann"), &Cancel::none());
    assert!(outcome.committed);
    assert!(!outcome.pushed, "no upstream configured");

    let subject = git(&root, &["log", "-1", "--format=%s"]);
    assert!(subject.starts_with("clarity (Ann): "), "{subject}");

    let tracked = git(&root, &["ls-files"]);
    assert!(tracked.contains("meta/workspace.json"));
    assert!(tracked.contains("events/events."));
    assert!(!tracked.contains(".clarity/"), "local files must stay untracked");

    let again = store.sync(None, &Cancel::none());
    assert!(!again.committed, "nothing new to commit");
}

#[test]
fn status_reports_branch_and_cleanliness() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("ws");
    init_repo(&root);
    fs::write(root.join("README"), "hi\n").expect("write");
    git(&root, &["add", "README"]);
    git(&root, &["commit", "-q", "-m", "init"]);

    let cli = CliGit::new(&root);
    let status = cli.status(&Cancel::none()).expect("status");
    assert!(status.is_repo);
    assert!(status.branch.is_some());
    assert!(!status.dirty);
    assert!(status.upstream.is_none());
    assert!(!status.can_push());

    fs::write(root.join("README"), "changed\n").expect("write");
    let status = cli.status(&Cancel::none()).expect("status");
    assert!(status.dirty && status.dirty_tracked);
}

#[test]
fn writes_are_blocked_while_a_merge_is_in_progress() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let root = tmp.path().join("ws");
    init_repo(&root);
    let store = Store::open(&root, env_for(&tmp.path().join("home"))).expect("open");
    add_project(&store, "Before").expect("first write");

    let head = "0000000000000000000000000000000000000000\n";
    fs::write(root.join(".git").join("MERGE_HEAD"), head).expect("merge head");
    let err = add_project(&store, "During").expect_err("blocked");
    assert!(matches!(err, ClarityError::GitWriteBlocked(_)), "{err}");

    fs::remove_file(root.join(".git").join("MERGE_HEAD")).expect("cleanup");
    add_project(&store, "After").expect("write after merge");
}

#[test]
fn push_to_bare_remote() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let remote = tmp.path().join("remote.git");
    fs::create_dir_all(&remote).expect("mkdir");
    git(&remote, &["init", "-q", "--bare"]);

    let root = tmp.path().join("ws");
    init_repo(&root);
    fs::write(root.join("README"), "hi\n").expect("write");
    git(&root, &["add", "README"]);
    git(&root, &["commit", "-q", "-m", "init"]);
    let remote_arg = remote.to_string_lossy().into_owned();
    git(&root, &["remote", "add", "origin", &remote_arg]);
    git(&root, &["push", "-q", "-u", "origin", "HEAD"]);

    let store = Store::open(&root, env_for(&tmp.path().join("home"))).expect("open");
    add_project(&store, "Shared").expect("project");
    let outcome = store.sync(None, &Cancel::none());
    assert!(outcome.committed);
    assert!(outcome.pushed);

    let local = git(&root, &["rev-parse", "HEAD"]);
    let pushed = git(&remote, &["rev-parse", "HEAD"]);
    assert_eq!(local, pushed);
}

#[test]
fn nested_workspace_is_guarded_and_synced() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    let root = repo.join("planning").join("ws");
    fs::create_dir_all(&root).expect("mkdir");

    let store = Store::open(&root, env_for(&tmp.path().join("home"))).expect("open");
    assert!(store.git().is_some(), "git backend wired for a nested workspace");
    add_project(&store, "Nested").expect("first write");

    let outcome = store.sync(Some("Ann"), &Cancel::none());
    assert!(outcome.committed);
    let tracked = git(&repo, &["ls-files"]);
    assert!(tracked.contains("planning/ws/meta/workspace.json"), "{tracked}");
    assert!(tracked.contains("planning/ws/events/events."), "{tracked}");
    assert!(!tracked.contains(".clarity/"));

    let head = "0000000000000000000000000000000000000000\n";
    fs::write(repo.join(".git").join("MERGE_HEAD"), head).expect("merge head");
    let err = add_project(&store, "During").expect_err("blocked");
    assert!(matches!(err, ClarityError::GitWriteBlocked(_)), "{err}");
}

#[test]
fn linked_worktree_with_gitdir_file_is_guarded() {
    if !git_available() {
        eprintln!("git not available; skipping");
        return;
    }
    let tmp = TempDir::new().expect("tempdir");
    let repo = tmp.path().join("repo");
    init_repo(&repo);
    fs::write(repo.join("README"), "hi\n").expect("write");
    git(&repo, &["add", "README"]);
    git(&repo, &["commit", "-q", "-m", "init"]);

    let root = tmp.path().join("wt");
    let root_arg = root.to_string_lossy().into_owned();
    git(&repo, &["worktree", "add", "-q", "-b", "planning", &root_arg]);
    assert!(root.join(".git").is_file());

    let store = Store::open(&root, env_for(&tmp.path().join("home"))).expect("open");
    assert!(store.git().is_some());
    add_project(&store, "Worktree").expect("first write");
    let outcome = store.sync(None, &Cancel::none());
    assert!(outcome.committed);
    let branch_log = git(&repo, &["log", "-1", "--format=%s", "planning"]);
    assert!(branch_log.starts_with("clarity: "), "{branch_log}");

    let git_dir = git(&root, &["rev-parse", "--absolute-git-dir"]);
    let head = "0000000000000000000000000000000000000000\n";
    fs::write(Path::new(git_dir.trim()).join("MERGE_HEAD"), head).expect("merge head");
    let err = add_project(&store, "During").expect_err("blocked");
    assert!(matches!(err, ClarityError::GitWriteBlocked(_)), "{err}");
}
