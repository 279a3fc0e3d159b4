//! Parsing of `git status --porcelain=v2 --branch` and in-progress
//! operation markers.

use std::path::{Path, PathBuf};

/// An operation Git is in the middle of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProgress {
    Merge,
    Rebase,
    CherryPick,
    Revert,
}

impl InProgress {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Rebase => "rebase",
            Self::CherryPick => "cherry-pick",
            Self::Revert => "revert",
        }
    }

    /// Look for the marker files Git leaves in its directory.
    #[must_use]
    pub fn detect(git_dir: &Path) -> Option<Self> {
        let has = |name: &str| git_dir.join(name).exists();
        if has("rebase-merge") || has("rebase-apply") {
            Some(Self::Rebase)
        } else if has("MERGE_HEAD") {
            Some(Self::Merge)
        } else if has("CHERRY_PICK_HEAD") {
            Some(Self::CherryPick)
        } else if has("REVERT_HEAD") {
            Some(Self::Revert)
        } else {
            None
        }
    }
}

/// Snapshot of a working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitStatus {
    pub is_repo: bool,
    pub root: Option<PathBuf>,
    /// `None` when detached.
    pub branch: Option<String>,
    /// e.g. `origin/main`.
    pub upstream: Option<String>,
    pub upstream_remote: Option<String>,
    pub upstream_url: Option<String>,
    /// First 7 characters of HEAD; `None` before the first commit.
    pub short_head: Option<String>,
    /// Any change, untracked files included.
    pub dirty: bool,
    /// Changes to tracked files only.
    pub dirty_tracked: bool,
    pub unmerged: bool,
    pub in_progress: Option<InProgress>,
    pub ahead: u32,
    pub behind: u32,
}

impl GitStatus {
    /// Safe to push: a repo with an upstream and nothing half-done.
    #[must_use]
    pub const fn can_push(&self) -> bool {
        self.is_repo
            && self.upstream.is_some()
            && !self.dirty_tracked
            && !self.unmerged
            && self.in_progress.is_none()
    }
}

/// Parse porcelain v2 output. Repository-level fields (`is_repo`, `root`,
/// `in_progress`, `upstream_url`) are left for the caller.
#[must_use]
pub fn parse_porcelain_v2(out: &str) -> GitStatus {
    let mut st = GitStatus::default();
    for line in out.lines() {
        if let Some(header) = line.strip_prefix("# ") {
            let (key, value) = header.split_once(' ').unwrap_or((header, ""));
            match key {
                "branch.oid" if value != "(initial)" => {
                    st.short_head = Some(value.chars().take(7).collect());
                }
                "branch.head" if value != "(detached)" => st.branch = Some(value.to_string()),
                "branch.upstream" => {
                    st.upstream = Some(value.to_string());
                    st.upstream_remote = value.split_once('/').map(|(remote, _)| remote.to_string());
                }
                "branch.ab" => {
                    for part in value.split_whitespace() {
                        if let Some(n) = part.strip_prefix('+') {
                            st.ahead = n.parse().unwrap_or(0);
                        } else if let Some(n) = part.strip_prefix('-') {
                            st.behind = n.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            }
            continue;
        }
        match line.as_bytes().first() {
            Some(b'1' | b'2') => {
                st.dirty = true;
                st.dirty_tracked = true;
            }
            Some(b'u') => {
                st.dirty = true;
                st.dirty_tracked = true;
                st.unmerged = true;
            }
            Some(b'?') => st.dirty = true,
            _ => {}
        }
    }
    st
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_branch_headers_and_entries() {
        let out = "\
# branch.oid 0123456789abcdef0123456789abcdef01234567
# branch.head main
# branch.upstream origin/main
# branch.ab +2 -1
1 .M N... 100644 100644 100644 aaa bbb events/events.r1.jsonl
? notes.txt
";
        let st = parse_porcelain_v2(out);
        assert_eq!(st.short_head.as_deref(), Some("0123456"));
        assert_eq!(st.branch.as_deref(), Some("main"));
        assert_eq!(st.upstream.as_deref(), Some("origin/main"));
        assert_eq!(st.upstream_remote.as_deref(), Some("origin"));
        assert_eq!((st.ahead, st.behind), (2, 1));
        assert!(st.dirty && st.dirty_tracked && !st.unmerged);
    }

    #[test]
    fn untracked_only_is_not_tracked_dirt() {
        let st = parse_porcelain_v2("# branch.oid (initial)\n# branch.head (detached)\n? x\n");
        assert!(st.dirty);
        assert!(!st.dirty_tracked);
        assert_eq!(st.short_head, None);
        assert_eq!(st.branch, None);
    }

    #[test]
    fn unmerged_entries_flag_conflicts() {
        let st = parse_porcelain_v2("u UU N... 100644 100644 100644 100644 a b c file\n");
        assert!(st.unmerged);
        assert!(!st.can_push());
    }

    #[test]
    fn detects_in_progress_markers() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(InProgress::detect(dir.path()), None);
        std::fs::write(dir.path().join("CHERRY_PICK_HEAD"), "x").expect("marker");
        assert_eq!(InProgress::detect(dir.path()), Some(InProgress::CherryPick));
        std::fs::create_dir(dir.path().join("rebase-merge")).expect("marker");
        assert_eq!(InProgress::detect(dir.path()), Some(InProgress::Rebase));
    }
}
