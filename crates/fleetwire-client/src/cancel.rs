//! Shared cancellation token.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One shared completion signal for all of a session's threads.
///
/// Closing is idempotent: the first caller wins and later calls are
/// no-ops, so any thread may signal termination without coordinating.
/// Waiters either sleep on it directly or use
/// [`wait_timeout`](Self::wait_timeout) as a cancellable timer tick.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: Mutex<bool>,
    condvar: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation. Safe to call from any thread, any number
    /// of times.
    pub fn cancel(&self) {
        let mut cancelled = self.cancelled.lock().expect("cancel lock poisoned");
        if !*cancelled {
            *cancelled = true;
            self.condvar.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().expect("cancel lock poisoned")
    }

    /// Sleeps for up to `timeout`, waking early on cancellation.
    ///
    /// Returns `true` if the token was cancelled, `false` if the
    /// timeout elapsed. This is the select-like wait producers use
    /// between timer ticks.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut cancelled = self.cancelled.lock().expect("cancel lock poisoned");
        loop {
            if *cancelled {
                return true;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _timeout_result) = self
                .condvar
                .wait_timeout(cancelled, deadline - now)
                .expect("cancel lock poisoned");
            cancelled = guard;
        }
    }

    /// Blocks until the token is cancelled.
    pub fn wait(&self) {
        let mut cancelled = self.cancelled.lock().expect("cancel lock poisoned");
        while !*cancelled {
            cancelled = self
                .condvar
                .wait(cancelled)
                .expect("cancel lock poisoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn cancel_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_timeout_elapses_when_not_cancelled() {
        let token = CancelToken::new();
        let start = std::time::Instant::now();
        let cancelled = token.wait_timeout(Duration::from_millis(30));
        assert!(!cancelled);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wait_timeout_wakes_early_on_cancel() {
        let token = Arc::new(CancelToken::new());
        let waiter = Arc::clone(&token);
        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(handle.join().expect("join"), "waiter saw the cancellation");
    }

    #[test]
    fn wait_returns_once_cancelled() {
        let token = Arc::new(CancelToken::new());
        let waiter = Arc::clone(&token);
        let handle = thread::spawn(move || waiter.wait());
        token.cancel();
        handle.join().expect("join");
    }

    #[test]
    fn wait_timeout_immediate_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.wait_timeout(Duration::from_secs(5)));
    }
}
