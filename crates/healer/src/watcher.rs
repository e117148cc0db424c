//! Per-namespace pod watcher.
//!
//! Each watcher owns one pod subscription and feeds its updates, in delivery
//! order, to a `PodUpdateHandler`. Watchers share nothing with each other; a
//! watcher that cannot sync gives up on its own scope only.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, error, info, instrument, warn};

use crate::cluster::{ClusterClient, PodEvent};
use crate::error::Error;
use crate::namespaces::NamespaceScope;
use crate::pod::PodObservation;
use crate::shutdown::ShutdownCoordinator;

/// Receiver of pod updates from a watcher
#[async_trait]
pub trait PodUpdateHandler: Send + Sync {
    async fn on_pod_updated(&self, observation: PodObservation);

    /// Called once the scope's pod cache has been populated
    fn on_synced(&self, _scope: &NamespaceScope) {}
}

/// Why a watcher stopped
#[derive(Debug)]
pub enum WatchOutcome {
    Shutdown,
    SyncFailed(Error),
    StreamEnded,
}

pub struct NamespaceWatcher {
    scope: NamespaceScope,
    client: Arc<dyn ClusterClient>,
    resync_period: Duration,
    sync_timeout: Duration,
    shutdown: ShutdownCoordinator,
}

impl NamespaceWatcher {
    #[must_use]
    pub fn new(
        scope: NamespaceScope,
        client: Arc<dyn ClusterClient>,
        resync_period: Duration,
        sync_timeout: Duration,
        shutdown: ShutdownCoordinator,
    ) -> Self {
        Self {
            scope,
            client,
            resync_period,
            sync_timeout,
            shutdown,
        }
    }

    /// Watch until shutdown, sync failure, or the end of the stream
    #[instrument(skip_all, fields(scope = %self.scope))]
    pub async fn run<H>(self, handler: &H) -> WatchOutcome
    where
        H: PodUpdateHandler + ?Sized,
    {
        let mut events = self.client.watch_pods(&self.scope, self.resync_period);

        // Sync phase: bounded by `sync_timeout`, any stream error is fatal for this scope.
        let deadline = tokio::time::sleep(self.sync_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.wait() => {
                    debug!("Shutdown before pod cache synced");
                    return WatchOutcome::Shutdown;
                }
                () = &mut deadline => {
                    let err = Error::SyncTimeout {
                        scope: self.scope.to_string(),
                        timeout: self.sync_timeout,
                    };
                    error!(error = %err, "Error syncing pod cache, stopping watch");
                    return WatchOutcome::SyncFailed(err);
                }
                event = events.next() => {
                    match event {
                        Some(Ok(PodEvent::Synced)) => break,
                        Some(Ok(PodEvent::Updated(observation))) => {
                            handler.on_pod_updated(observation).await;
                        }
                        Some(Err(err)) => {
                            error!(error = %err, "Error syncing pod cache, stopping watch");
                            return WatchOutcome::SyncFailed(err);
                        }
                        None => {
                            error!("Pod stream closed before cache synced, stopping watch");
                            return WatchOutcome::StreamEnded;
                        }
                    }
                }
            }
        }

        info!("Pod cache synced, watching for unhealthy pods");
        handler.on_synced(&self.scope);

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.wait() => {
                    debug!("Watcher stopping on shutdown");
                    return WatchOutcome::Shutdown;
                }
                event = events.next() => {
                    match event {
                        Some(Ok(PodEvent::Updated(observation))) => {
                            handler.on_pod_updated(observation).await;
                        }
                        Some(Ok(PodEvent::Synced)) => debug!("Pod cache re-listed"),
                        Some(Err(err)) => warn!(error = %err, "Pod watch error, stream will retry"),
                        None => {
                            warn!("Pod stream closed, stopping watch");
                            return WatchOutcome::StreamEnded;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::pod::PodIdentity;
    use futures::stream;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        updates: Mutex<Vec<PodIdentity>>,
        synced: Mutex<Vec<NamespaceScope>>,
    }

    #[async_trait]
    impl PodUpdateHandler for Recorder {
        async fn on_pod_updated(&self, observation: PodObservation) {
            self.updates.lock().unwrap().push(observation.identity());
        }

        fn on_synced(&self, scope: &NamespaceScope) {
            self.synced.lock().unwrap().push(scope.clone());
        }
    }

    fn update(name: &str) -> crate::error::Result<PodEvent> {
        Ok(PodEvent::Updated(PodObservation {
            namespace: "prod".to_string(),
            name: name.to_string(),
            owner_present: true,
            ..PodObservation::default()
        }))
    }

    fn watcher_with(
        events: Vec<crate::error::Result<PodEvent>>,
        keep_open: bool,
        shutdown: &ShutdownCoordinator,
    ) -> NamespaceWatcher {
        let mut client = MockClusterClient::new();
        let events = Mutex::new(Some(events));
        client.expect_watch_pods().times(1).returning(move |_, _| {
            let items = events.lock().unwrap().take().unwrap_or_default();
            if keep_open {
                stream::iter(items).chain(stream::pending()).boxed()
            } else {
                stream::iter(items).boxed()
            }
        });
        NamespaceWatcher::new(
            NamespaceScope::Namespace("prod".to_string()),
            Arc::new(client),
            Duration::from_secs(30),
            Duration::from_millis(200),
            shutdown.clone(),
        )
    }

    #[tokio::test]
    async fn test_delivers_updates_in_order_until_shutdown() {
        let shutdown = ShutdownCoordinator::new();
        let watcher = watcher_with(
            vec![update("a"), Ok(PodEvent::Synced), update("b"), update("c")],
            true,
            &shutdown,
        );
        let recorder = Arc::new(Recorder::default());

        let handle = {
            let recorder = Arc::clone(&recorder);
            tokio::spawn(async move { watcher.run(recorder.as_ref()).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        let outcome = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(outcome, WatchOutcome::Shutdown));
        let names: Vec<_> = recorder
            .updates
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(
            *recorder.synced.lock().unwrap(),
            vec![NamespaceScope::Namespace("prod".to_string())]
        );
    }

    #[tokio::test]
    async fn test_error_before_sync_fails_the_watcher() {
        let shutdown = ShutdownCoordinator::new();
        let watcher = watcher_with(
            vec![Err(Error::Config("forbidden".to_string())), update("a")],
            true,
            &shutdown,
        );
        let recorder = Recorder::default();

        let outcome = watcher.run(&recorder).await;
        assert!(matches!(outcome, WatchOutcome::SyncFailed(Error::Config(_))));
        assert!(recorder.updates.lock().unwrap().is_empty());
        assert!(recorder.synced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_timeout_fails_the_watcher() {
        let shutdown = ShutdownCoordinator::new();
        let watcher = watcher_with(vec![], true, &shutdown);
        let recorder = Recorder::default();

        let outcome = tokio::time::timeout(Duration::from_secs(2), watcher.run(&recorder))
            .await
            .expect("sync timeout should bound the watcher");
        assert!(matches!(
            outcome,
            WatchOutcome::SyncFailed(Error::SyncTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_errors_after_sync_are_tolerated() {
        let shutdown = ShutdownCoordinator::new();
        let watcher = watcher_with(
            vec![
                Ok(PodEvent::Synced),
                Err(Error::Config("transient".to_string())),
                update("a"),
            ],
            false,
            &shutdown,
        );
        let recorder = Recorder::default();

        let outcome = watcher.run(&recorder).await;
        assert!(matches!(outcome, WatchOutcome::StreamEnded));
        assert_eq!(recorder.updates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_returns_immediately() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.trigger();
        let watcher = watcher_with(vec![update("a")], true, &shutdown);
        let recorder = Recorder::default();

        let outcome = watcher.run(&recorder).await;
        assert!(matches!(outcome, WatchOutcome::Shutdown));
        assert!(recorder.updates.lock().unwrap().is_empty());
    }
}
