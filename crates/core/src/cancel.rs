//! Cooperative cancellation.
//!
//! One token is created per conversation turn and cloned into every tool
//! dispatch belonging to it. The flag is monotonic: once requested it
//! never resets, so readers need no lock and no ordering beyond the
//! atomic itself. Cancellation is advisory — the agent loop and the
//! execution normalizer check it between discrete units of work, and
//! work already in flight is allowed to finish.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A shared, one-way cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; the flag never resets.
    pub fn request(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cheap read of the flag.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn request_is_sticky_and_idempotent() {
        let token = CancellationToken::new();
        token.request();
        assert!(token.is_cancelled());
        token.request();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.request();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn visible_across_tasks() {
        let token = CancellationToken::new();
        let clone = token.clone();
        tokio::spawn(async move { clone.request() }).await.unwrap();
        assert!(token.is_cancelled());
    }
}
