//! Committing the canonical workspace files with a summarising message.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use super::GitBackend;
use crate::cancel::Cancel;
use crate::error::{ClarityError, Result};
use crate::workspace::Layout;

/// How many added events are summarised in a commit message.
pub const SUMMARY_EVENTS: usize = 10;

const TITLE_CHARS: usize = 48;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: bool,
    pub message: Option<String>,
}

/// Workspace files that belong in Git, relative to `repo_root`.
///
/// Both sides are canonicalised first so symlinked temp directories
/// (`/var` vs `/private/var`) still produce a relative path. Paths that
/// don't exist are left out.
///
/// # Errors
///
/// [`ClarityError::Git`] when the workspace lies outside the repository.
pub fn canonical_paths(layout: &Layout, repo_root: &Path) -> Result<Vec<PathBuf>> {
    let repo = fs::canonicalize(repo_root)?;
    let candidates = [
        layout.events_dir(),
        layout.workspace_file(),
        layout.root().join(crate::workspace::RESOURCES_DIR),
        layout.root().join(".gitignore"),
    ];
    let mut out = Vec::new();
    for path in candidates {
        let Ok(real) = fs::canonicalize(&path) else {
            continue;
        };
        let rel = real.strip_prefix(&repo).map_err(|_| {
            ClarityError::Git(format!(
                "{} is outside repository {}",
                real.display(),
                repo.display()
            ))
        })?;
        out.push(rel.to_path_buf());
    }
    Ok(out)
}

fn short(text: &str) -> String {
    let mut out: String = text.chars().take(TITLE_CHARS).collect();
    if text.chars().count() > TITLE_CHARS {
        out.push('…');
    }
    out
}

/// Human phrase for one event line, `None` for lines that aren't events.
fn phrase(line: &str) -> Option<String> {
    let event: Value = serde_json::from_str(line).ok()?;
    let ty = event.get("type")?.as_str()?;
    let payload = event.get("payload");
    let field = |key: &str| {
        payload
            .and_then(|p| p.get(key))
            .and_then(Value::as_str)
            .map(short)
    };
    let phrase = match ty {
        "item.create" => format!("create \"{}\"", field("title").unwrap_or_default()),
        "item.set_title" => format!("title \"{}\"", field("title").unwrap_or_default()),
        "item.set_status" => match field("to").or_else(|| field("status")) {
            Some(status) if !status.is_empty() => format!("status {status}"),
            _ => "clear status".to_string(),
        },
        "item.set_description" | "outline.set_description" => "edit description".to_string(),
        "item.move" | "item.set_parent" | "item.indent" | "item.outdent" => "move".to_string(),
        "item.move_outline" => "move to outline".to_string(),
        "outline.status.reorder" => "reorder statuses".to_string(),
        "item.set_assign" => "assign".to_string(),
        "item.set_archive" | "project.archive" | "outline.archive" => "archive".to_string(),
        "item.tags_add" | "item.tags_remove" | "item.tags_set" => "tags".to_string(),
        "item.set_due" | "item.set_schedule" => "dates".to_string(),
        "comment.add" => "comment".to_string(),
        "worklog.add" => "worklog".to_string(),
        "dep.add" => "dependency".to_string(),
        "project.create" => format!("project \"{}\"", field("name").unwrap_or_default()),
        "outline.create" => "outline".to_string(),
        "identity.create" => format!("actor \"{}\"", field("name").unwrap_or_default()),
        other if other.ends_with(".merge") => "merge".to_string(),
        other => other.replace(['.', '_'], " "),
    };
    Some(phrase)
}

/// Build `clarity[ (label)]: phrase; phrase[ +K more]` from the lines added
/// to event shards in a staged patch.
#[must_use]
pub fn commit_message(label: Option<&str>, staged_diff: &str) -> String {
    let mut in_events = false;
    let mut added = Vec::new();
    for line in staged_diff.lines() {
        if let Some(path) = line.strip_prefix("+++ ") {
            in_events = path.ends_with(".jsonl") && path.contains("events/");
            continue;
        }
        if in_events {
            if let Some(body) = line.strip_prefix('+') {
                added.push(body);
            }
        }
    }

    let mut phrases: Vec<String> = Vec::new();
    for line in added.iter().take(SUMMARY_EVENTS) {
        if let Some(p) = phrase(line) {
            if !phrases.contains(&p) {
                phrases.push(p);
            }
        }
    }

    let mut msg = String::from("clarity");
    if let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) {
        msg.push_str(&format!(" ({label})"));
    }
    msg.push_str(": ");
    if phrases.is_empty() {
        msg.push_str("update workspace");
    } else {
        msg.push_str(&phrases.join("; "));
    }
    if added.len() > SUMMARY_EVENTS {
        msg.push_str(&format!(" +{} more", added.len() - SUMMARY_EVENTS));
    }
    msg
}

/// Stage and commit the canonical workspace files.
///
/// # Errors
///
/// [`ClarityError::Git`] outside a repository,
/// [`ClarityError::GitWriteBlocked`] while an operation is in progress, and
/// subprocess errors.
pub fn commit_workspace(
    git: &dyn GitBackend,
    layout: &Layout,
    label: Option<&str>,
    cancel: &Cancel,
) -> Result<CommitOutcome> {
    let status = git.status(cancel)?;
    let Some(root) = status.root.as_deref().filter(|_| status.is_repo) else {
        return Err(ClarityError::Git(format!(
            "{} is not inside a git repository",
            layout.root().display()
        )));
    };
    if let Some(kind) = status.in_progress {
        return Err(ClarityError::GitWriteBlocked(kind.as_str().to_string()));
    }

    let paths = canonical_paths(layout, root)?;
    if paths.is_empty() {
        return Ok(CommitOutcome::default());
    }
    git.add(cancel, &paths)?;
    let diff = git.staged_diff(cancel, &paths)?;
    if diff.trim().is_empty() {
        debug!("nothing staged");
        return Ok(CommitOutcome::default());
    }
    let message = commit_message(label, &diff);
    git.commit(cancel, &message, &paths)?;
    info!(%message, "committed workspace");
    Ok(CommitOutcome {
        committed: true,
        message: Some(message),
    })
}
