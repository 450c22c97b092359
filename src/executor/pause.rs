//! Cooperative pause/resume control (spec.md §4.5 "Pause/Resume": "a plan in
//! `paused` stops launching new steps but lets currently running steps
//! finish; `resume` re-enters the loop."). Mirrors `CancellationToken`'s
//! shape: an `AtomicBool` flag plus a `Notify` so the executor's scheduling
//! loop can wait on a state change instead of polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct PauseToken {
    paused: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl PauseToken {
    pub fn new() -> Self {
        Self {
            paused: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Resolves once `resume()` is called. A no-op if not currently paused.
    pub async fn resumed(&self) {
        if !self.is_paused() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for PauseToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resumed_resolves_immediately_when_not_paused() {
        let token = PauseToken::new();
        token.resumed().await;
    }

    #[tokio::test]
    async fn pause_then_resume_unblocks_waiter() {
        let token = PauseToken::new();
        token.pause();
        assert!(token.is_paused());
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.resumed().await;
        });
        tokio::task::yield_now().await;
        token.resume();
        handle.await.unwrap();
        assert!(!token.is_paused());
    }
}
