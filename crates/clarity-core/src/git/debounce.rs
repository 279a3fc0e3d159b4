//! Coalesce bursts of writes into one background commit.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

/// Default quiet period before committing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

enum Signal {
    Notify,
    Shutdown,
}

/// Runs a commit turn once notifications have been quiet for `debounce`.
///
/// Notifications that arrive while a turn is running schedule exactly one
/// follow-up turn. Dropping the committer flushes a pending turn and joins
/// the worker.
pub struct DebouncedCommitter {
    tx: Sender<Signal>,
    worker: Option<JoinHandle<()>>,
}

impl DebouncedCommitter {
    /// Start the worker. `turn` must not panic; its failures are its own to
    /// log.
    pub fn spawn(debounce: Duration, mut turn: impl FnMut() + Send + 'static) -> Self {
        let (tx, rx) = mpsc::channel::<Signal>();
        let worker = thread::spawn(move || {
            loop {
                match rx.recv() {
                    Ok(Signal::Notify) => {}
                    Ok(Signal::Shutdown) | Err(_) => return,
                }
                let mut stop = false;
                loop {
                    match rx.recv_timeout(debounce) {
                        Ok(Signal::Notify) => {}
                        Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                            stop = true;
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => break,
                    }
                }
                debug!("debounced commit turn");
                turn();
                if stop {
                    return;
                }
            }
        });
        Self {
            tx,
            worker: Some(worker),
        }
    }

    /// Request a commit turn. Never blocks.
    pub fn notify(&self) {
        let _ = self.tx.send(Signal::Notify);
    }
}

impl Drop for DebouncedCommitter {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl FnMut() + Send + 'static) {
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&runs);
        (runs, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn burst_coalesces_into_one_turn() {
        let (runs, turn) = counter();
        let committer = DebouncedCommitter::spawn(Duration::from_millis(50), turn);
        for _ in 0..20 {
            committer.notify();
        }
        thread::sleep(Duration::from_millis(300));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        drop(committer);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notify_during_a_turn_schedules_a_follow_up() {
        let runs = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&runs);
        let committer = DebouncedCommitter::spawn(Duration::from_millis(20), move || {
            seen.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(100));
        });
        committer.notify();
        thread::sleep(Duration::from_millis(60));
        committer.notify();
        committer.notify();
        thread::sleep(Duration::from_millis(400));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_flushes_pending_notification() {
        let (runs, turn) = counter();
        let committer = DebouncedCommitter::spawn(Duration::from_secs(60), turn);
        committer.notify();
        drop(committer);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn idle_committer_never_runs() {
        let (runs, turn) = counter();
        drop(DebouncedCommitter::spawn(Duration::from_millis(10), turn));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
