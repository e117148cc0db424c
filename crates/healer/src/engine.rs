//! # Remediation Engine
//!
//! Fans pod observation out across the watch set and decides, per update,
//! whether to delete the pod:
//!
//! 1. unmanaged pods (no owner reference) are never touched, nothing would
//!    recreate them
//! 2. pods carrying the opt-out label are skipped
//! 3. healthy pods are ignored
//! 4. the cooldown ledger is claimed atomically; a recently healed pod is
//!    skipped
//! 5. the pod is deleted with a hard timeout. "Not found" counts as success.
//!    Any other failure releases the claim so the next resync can retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classifier::{Health, HealthClassifier};
use crate::cluster::{ClusterClient, DeleteOutcome};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::ledger::{Claim, CooldownLedger};
use crate::namespaces::{NamespaceScope, WatchSet};
use crate::pod::PodObservation;
use crate::shutdown::ShutdownCoordinator;
use crate::watcher::{NamespaceWatcher, PodUpdateHandler, WatchOutcome};

/// What the engine did with a single pod update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Unmanaged,
    Excluded,
    Healthy,
    Cooling { remaining: chrono::Duration },
    Remediated,
    AlreadyGone,
    DeleteFailed,
}

#[derive(Debug, Default)]
struct EngineStats {
    remediated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    synced_watchers: AtomicU64,
    failed_watchers: AtomicU64,
}

/// Point-in-time copy of the engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub remediated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub synced_watchers: u64,
    pub failed_watchers: u64,
}

struct EngineCore {
    config: EngineConfig,
    classifier: HealthClassifier,
    ledger: Arc<CooldownLedger>,
    client: Arc<dyn ClusterClient>,
    stats: EngineStats,
}

impl EngineCore {
    async fn decide(&self, observation: &PodObservation, now: DateTime<Utc>) -> Decision {
        let identity = observation.identity();

        if !observation.owner_present {
            debug!(pod = %identity, "Skipping unmanaged pod");
            return Decision::Unmanaged;
        }

        if observation.excluded {
            debug!(pod = %identity, "Skipping pod excluded by label");
            return Decision::Excluded;
        }

        let reason = match self.classifier.classify(observation) {
            Health::Healthy => return Decision::Healthy,
            Health::Unhealthy { reason } => reason,
        };
        debug!(pod = %identity, %reason, "Pod failed health check");

        if let Claim::Cooling { remaining } = self.ledger.try_claim(&identity, now) {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            info!(
                pod = %identity,
                remaining_secs = remaining.num_seconds(),
                "Pod was healed recently, skipping re-heal"
            );
            return Decision::Cooling { remaining };
        }

        warn!(pod = %identity, %reason, "Healing action required, deleting pod");

        let timeout = self.config.delete_timeout;
        let result = tokio::time::timeout(
            timeout,
            self.client.delete_pod(&identity.namespace, &identity.name),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::DeleteTimeout {
                pod: identity.to_string(),
                timeout,
            })
        });

        // The claim already recorded `now`; only a failed delete touches the ledger again.
        match result {
            Ok(DeleteOutcome::Deleted) => {
                self.stats.remediated.fetch_add(1, Ordering::Relaxed);
                info!(
                    pod = %identity,
                    "Deleted pod, its controller is expected to recreate it"
                );
                Decision::Remediated
            }
            Ok(DeleteOutcome::NotFound) => {
                self.stats.remediated.fetch_add(1, Ordering::Relaxed);
                info!(pod = %identity, "Pod was already gone");
                Decision::AlreadyGone
            }
            Err(e) => {
                self.ledger.release(&identity, now);
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(pod = %identity, error = %e, "Failed to delete pod");
                Decision::DeleteFailed
            }
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            remediated: self.stats.remediated.load(Ordering::Relaxed),
            skipped: self.stats.skipped.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            synced_watchers: self.stats.synced_watchers.load(Ordering::Relaxed),
            failed_watchers: self.stats.failed_watchers.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl PodUpdateHandler for EngineCore {
    async fn on_pod_updated(&self, observation: PodObservation) {
        self.decide(&observation, Utc::now()).await;
    }

    fn on_synced(&self, _scope: &NamespaceScope) {
        self.stats.synced_watchers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Watches the configured namespaces and heals persistently crash-looping pods
pub struct RemediationEngine {
    core: Arc<EngineCore>,
    watch_set: WatchSet,
    shutdown: ShutdownCoordinator,
}

impl RemediationEngine {
    /// Build an engine from a fully-formed configuration
    pub fn new(config: EngineConfig, watch_set: WatchSet, client: Arc<dyn ClusterClient>) -> Result<Self> {
        config.validate()?;

        if let WatchSet::Namespaces(names) = &watch_set {
            if names.is_empty() {
                return Err(Error::Config("watch set has no namespaces".to_string()));
            }
            if names.iter().any(|ns| ns.trim().is_empty()) {
                return Err(Error::Config("watch set contains an empty namespace".to_string()));
            }
        }

        let ledger = Arc::new(CooldownLedger::new(config.cooldown_window));
        Ok(Self {
            core: Arc::new(EngineCore {
                classifier: HealthClassifier::new(config.restart_threshold),
                config,
                ledger,
                client,
                stats: EngineStats::default(),
            }),
            watch_set,
            shutdown: ShutdownCoordinator::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn watch_set(&self) -> &WatchSet {
        &self.watch_set
    }

    pub fn ledger(&self) -> &CooldownLedger {
        &self.core.ledger
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.snapshot()
    }

    /// Handle that can trigger shutdown from elsewhere (e.g. a signal task)
    pub fn shutdown_handle(&self) -> ShutdownCoordinator {
        self.shutdown.clone()
    }

    /// Idempotent; safe to call concurrently with `run`
    pub fn trigger_shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Process one pod update
    pub async fn on_pod_updated(&self, observation: &PodObservation) -> Decision {
        self.core.decide(observation, Utc::now()).await
    }

    /// Process one pod update as if observed at `now`
    pub async fn on_pod_updated_at(&self, observation: &PodObservation, now: DateTime<Utc>) -> Decision {
        self.core.decide(observation, now).await
    }

    /// Start the sweeper and one watcher per scope, then block until shutdown.
    ///
    /// After the signal fires, tasks get `shutdown_grace` to unwind before
    /// they are aborted.
    pub async fn run(&self) {
        let config = &self.core.config;
        info!(
            namespaces = %self.watch_set,
            cooldown_secs = config.cooldown_window.as_secs(),
            restart_threshold = config.restart_threshold,
            "Starting healer"
        );

        let mut tasks = JoinSet::new();
        tasks.spawn(
            Arc::clone(&self.core.ledger).run_sweeper(config.sweep_interval, self.shutdown.clone()),
        );

        for scope in self.watch_set.scopes() {
            let core = Arc::clone(&self.core);
            let watcher = NamespaceWatcher::new(
                scope,
                Arc::clone(&core.client),
                config.resync_period,
                config.sync_timeout,
                self.shutdown.clone(),
            );
            tasks.spawn(async move {
                if let WatchOutcome::SyncFailed(_) | WatchOutcome::StreamEnded =
                    watcher.run(core.as_ref()).await
                {
                    core.stats.failed_watchers.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        self.shutdown.wait().await;
        info!("Termination signal received, shutting down healer");

        let drained = tokio::time::timeout(config.shutdown_grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                still_running = tasks.len(),
                "Tasks did not stop within the grace period, aborting"
            );
            tasks.abort_all();
        }

        let stats = self.stats();
        info!(
            remediated = stats.remediated,
            skipped = stats.skipped,
            failed = stats.failed,
            "Healer stopped"
        );
    }
}
