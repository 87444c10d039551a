use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation handle shared between the solver and task
/// handlers.
///
/// Cancellation is observed, never imposed: the solver stops issuing new
/// calls once the token trips, and long-running handlers are expected to
/// check [`CancelToken::is_cancelled`] (or await [`CancelToken::cancelled`])
/// at their own suspension points.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trips the token. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token has been tripped.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives inside this token, so wait_for can't fail while
        // we're borrowed.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_visible_to_clones() {
        let token = CancelToken::new();
        let clone = token.clone();

        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());

        // Already-tripped tokens resolve immediately.
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                token.is_cancelled()
            })
        };

        token.cancel();
        assert!(waiter.await.expect("waiter panicked"));
    }
}
