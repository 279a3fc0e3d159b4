//! Fractional lexicographic ranks for ordering sibling items.
//!
//! A rank is a lowercase base-36 string (`0-9a-z`). Ranks compare as plain
//! byte strings, so a shorter prefix sorts before any continuation
//! (`"y" < "y0" < "y1"`). [`between`] produces a key strictly inside an
//! interval; an empty bound means the interval is open on that side.
//!
//! Not every interval has an interior: nothing sorts strictly between `"y"`
//! and `"y0"`. Callers that hit [`RankError::NoSpace`] must rebalance a
//! wider window (see [`crate::reorder`]).

use std::collections::HashSet;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_DIGIT: u8 = 35;

/// Retry budget for [`between_unique`].
pub const UNIQUE_ATTEMPTS: usize = 256;

/// Errors from rank generation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RankError {
    /// A bound contains a character outside `0-9a-z`.
    #[error("invalid rank {0:?}: only 0-9 and a-z are allowed")]
    InvalidChar(String),

    /// Bounds are not strictly increasing.
    #[error("invalid rank bounds: {lo:?} is not below {hi:?}")]
    NotIncreasing { lo: String, hi: String },

    /// The interval is non-empty as a pair but has no representable interior.
    #[error("no rank fits between {lo:?} and {hi:?}")]
    NoSpace { lo: String, hi: String },

    /// [`between_unique`] could not find an unused key.
    #[error("rank space exhausted after {attempts} attempts")]
    Exhausted { attempts: usize },
}

fn digit_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'z' => Some(c - b'a' + 10),
        _ => None,
    }
}

/// Return `true` when `rank` is a non-empty lowercase base-36 string.
#[must_use]
pub fn is_valid(rank: &str) -> bool {
    !rank.is_empty() && rank.bytes().all(|c| digit_value(c).is_some())
}

fn check(bound: &str) -> Result<(), RankError> {
    if bound.bytes().all(|c| digit_value(c).is_some()) {
        Ok(())
    } else {
        Err(RankError::InvalidChar(bound.to_string()))
    }
}

/// Produce a rank `r` with `lo < r < hi`. Either bound may be empty (open).
///
/// # Errors
///
/// - [`RankError::InvalidChar`] when a bound has illegal characters.
/// - [`RankError::NotIncreasing`] when both bounds are set and `lo >= hi`.
/// - [`RankError::NoSpace`] when no key exists between the bounds.
pub fn between(lo: &str, hi: &str) -> Result<String, RankError> {
    check(lo)?;
    check(hi)?;
    if !lo.is_empty() && !hi.is_empty() && lo >= hi {
        return Err(RankError::NotIncreasing {
            lo: lo.to_string(),
            hi: hi.to_string(),
        });
    }

    let lo_bytes = lo.as_bytes();
    let hi_bytes = hi.as_bytes();
    let mut out = String::with_capacity(lo.len().max(hi.len()) + 1);
    let mut i = 0;

    let candidate = loop {
        let dl = lo_bytes.get(i).and_then(|&c| digit_value(c)).unwrap_or(0);
        let dh = hi_bytes
            .get(i)
            .and_then(|&c| digit_value(c))
            .unwrap_or(MAX_DIGIT);

        if dl == dh {
            out.push(char::from(DIGITS[usize::from(dl)]));
            i += 1;
            continue;
        }
        if dh > dl && dh - dl >= 2 {
            let mid = dl + (dh - dl) / 2;
            out.push(char::from(DIGITS[usize::from(mid)]));
            break out;
        }
        let mut appended = lo.to_string();
        appended.push('0');
        break appended;
    };

    if candidate.as_str() > lo && (hi.is_empty() || candidate.as_str() < hi) {
        Ok(candidate)
    } else {
        Err(RankError::NoSpace {
            lo: lo.to_string(),
            hi: hi.to_string(),
        })
    }
}

/// A rank sorting after `a`.
///
/// # Errors
///
/// See [`between`].
pub fn after(a: &str) -> Result<String, RankError> {
    between(a, "")
}

/// A rank sorting before `b`.
///
/// # Errors
///
/// See [`between`].
pub fn before(b: &str) -> Result<String, RankError> {
    between("", b)
}

/// The rank used for the first item of an empty sibling set.
#[must_use]
pub fn initial() -> String {
    // between("", "") always lands on the midpoint digit.
    between("", "").unwrap_or_else(|_| "h".to_string())
}

/// Like [`between`], but never returns a key contained in `existing`.
///
/// On collision the lower bound is tightened to the produced key and the
/// search retries, up to [`UNIQUE_ATTEMPTS`] times.
///
/// # Errors
///
/// Propagates [`between`] errors and returns [`RankError::Exhausted`] when
/// the retry budget runs out.
pub fn between_unique(
    existing: &HashSet<String>,
    lo: &str,
    hi: &str,
) -> Result<String, RankError> {
    let mut lower = lo.to_string();
    for _ in 0..UNIQUE_ATTEMPTS {
        let candidate = between(&lower, hi)?;
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
        lower = candidate;
    }
    Err(RankError::Exhausted {
        attempts: UNIQUE_ATTEMPTS,
    })
}

/// Rank that appends after the greatest of `ranks`, avoiding collisions.
///
/// # Errors
///
/// See [`between_unique`].
pub fn next_after<'a>(ranks: impl IntoIterator<Item = &'a str>) -> Result<String, RankError> {
    let existing: HashSet<String> = ranks.into_iter().map(str::to_string).collect();
    let max = existing.iter().max().cloned().unwrap_or_default();
    between_unique(&existing, &max, "")
}
