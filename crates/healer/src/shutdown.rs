//! Broadcast-once shutdown signal shared by every long-running loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

/// Close-once signal. Clones observe the same state; listeners that start
/// waiting after the trigger return immediately.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Safe to call repeatedly and from any thread.
    pub fn trigger(&self) {
        let was_triggered = self.tx.send_replace(true);
        if !was_triggered {
            debug!("Shutdown signal triggered");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal has fired
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on trigger.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_resolves_after_trigger() {
        let shutdown = ShutdownCoordinator::new();
        let listener = shutdown.clone();
        let handle = tokio::spawn(async move { listener.wait().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should observe shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_listener_returns_immediately() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.trigger();
        assert!(shutdown.is_triggered());

        tokio::time::timeout(Duration::from_millis(100), shutdown.clone().wait())
            .await
            .expect("late listener should not block");
    }

    #[tokio::test]
    async fn test_trigger_is_idempotent_and_concurrent_safe() {
        let shutdown = ShutdownCoordinator::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = shutdown.clone();
            handles.push(tokio::spawn(async move { s.trigger() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        shutdown.trigger();
        assert!(shutdown.is_triggered());
    }
}
