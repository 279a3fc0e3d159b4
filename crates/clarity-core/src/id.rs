//! Short prefixed identifiers (`item-k3f`, `cmt-0a9x2bq1`).
//!
//! Suffixes are random base-36. Frequently typed kinds start with three
//! characters and widen as collisions pile up; everything else gets eight.

use rand::Rng;
use std::fs;
use std::path::PathBuf;

use crate::error::Result;

pub const ACTOR_PREFIX: &str = "act";
pub const PROJECT_PREFIX: &str = "proj";
pub const OUTLINE_PREFIX: &str = "out";
pub const ITEM_PREFIX: &str = "item";
pub const COMMENT_PREFIX: &str = "cmt";
pub const WORKLOG_PREFIX: &str = "wl";
pub const DEP_PREFIX: &str = "dep";
pub const ATTACHMENT_PREFIX: &str = "att";

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `(suffix length, attempts)` for kinds people type by hand.
const SHORT_SCHEDULE: [(usize, usize); 5] = [(3, 200), (4, 50), (5, 10), (6, 10), (8, 10)];
const LONG_SCHEDULE: [(usize, usize); 1] = [(8, 10)];

fn schedule(prefix: &str) -> &'static [(usize, usize)] {
    match prefix {
        ACTOR_PREFIX | PROJECT_PREFIX | OUTLINE_PREFIX | ITEM_PREFIX => &SHORT_SCHEDULE,
        _ => &LONG_SCHEDULE,
    }
}

/// Allocates ids that don't collide with anything `exists` reports.
#[derive(Debug)]
pub struct IdAllocator<R: Rng> {
    rng: R,
    /// File holding the fallback counter; in-memory only when `None`.
    seq_path: Option<PathBuf>,
    seq: u64,
}

impl IdAllocator<rand::rngs::ThreadRng> {
    /// Allocator backed by the thread RNG, persisting its fallback counter at
    /// `seq_path`.
    #[must_use]
    pub fn new(seq_path: Option<PathBuf>) -> Self {
        Self::with_rng(rand::thread_rng(), seq_path)
    }
}

impl<R: Rng> IdAllocator<R> {
    pub const fn with_rng(rng: R, seq_path: Option<PathBuf>) -> Self {
        Self {
            rng,
            seq_path,
            seq: 0,
        }
    }

    fn suffix(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| char::from(ALPHABET[self.rng.gen_range(0..ALPHABET.len())]))
            .collect()
    }

    /// Allocate `<prefix>-<suffix>`.
    ///
    /// # Errors
    ///
    /// Only the sequential fallback can fail, when its counter file can't be
    /// written.
    pub fn allocate(&mut self, prefix: &str, exists: impl Fn(&str) -> bool) -> Result<String> {
        for &(len, attempts) in schedule(prefix) {
            for _ in 0..attempts {
                let candidate = format!("{prefix}-{}", self.suffix(len));
                if !exists(&candidate) {
                    return Ok(candidate);
                }
            }
            tracing::debug!(prefix, len, "id suffix space crowded, widening");
        }
        self.sequential(prefix, &exists)
    }

    fn sequential(&mut self, prefix: &str, exists: &impl Fn(&str) -> bool) -> Result<String> {
        let stored = self
            .seq_path
            .as_ref()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let mut next = stored.max(self.seq);
        let id = loop {
            next += 1;
            let candidate = format!("{prefix}-{next}");
            if !exists(&candidate) {
                break candidate;
            }
        };
        self.seq = next;
        if let Some(path) = &self.seq_path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, format!("{next}\n"))?;
        }
        tracing::warn!(%id, "random id space exhausted, fell back to sequential id");
        Ok(id)
    }
}
