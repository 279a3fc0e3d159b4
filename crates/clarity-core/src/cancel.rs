//! Cancellation and deadline signal threaded through long-running calls.
//!
//! A [`Cancel`] is cheap to clone; all clones share one flag. Git subprocess
//! calls poll it and kill the child when it fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::error::{ClarityError, Result};

/// Budget for a status probe issued from an interactive surface.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(3);
/// Budget for `git pull --rebase`.
pub const PULL_TIMEOUT: Duration = Duration::from_secs(60);
/// Budget for `git push`.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Default)]
pub struct Cancel {
    flag: Arc<AtomicBool>,
    deadline: Option<(Instant, Duration)>,
}

impl Cancel {
    /// A signal that never fires on its own.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A signal that fires `budget` from now.
    #[must_use]
    pub fn with_timeout(budget: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some((Instant::now() + budget, budget)),
        }
    }

    /// A child sharing this flag with a deadline no later than `budget` from
    /// now.
    #[must_use]
    pub fn child(&self, budget: Duration) -> Self {
        let proposed = Instant::now() + budget;
        let deadline = match self.deadline {
            Some((at, parent_budget)) if at <= proposed => Some((at, parent_budget)),
            _ => Some((proposed, budget)),
        };
        Self {
            flag: Arc::clone(&self.flag),
            deadline,
        }
    }

    /// Fire the signal for every clone.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|(at, _)| at.saturating_duration_since(Instant::now()))
    }

    /// Fail when cancelled or past the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ClarityError::Cancelled`] or [`ClarityError::DeadlineExceeded`].
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(ClarityError::Cancelled);
        }
        match self.deadline {
            Some((at, budget)) if Instant::now() >= at => {
                Err(ClarityError::DeadlineExceeded(budget))
            }
            _ => Ok(()),
        }
    }
}
