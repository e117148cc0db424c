//! # Cooldown Ledger
//!
//! Tracks when each pod was last remediated so the same pod is not deleted
//! twice within the cooldown window. One watcher task per namespace plus the
//! sweep loop share a single ledger, so every operation runs under one mutex:
//!
//! - `try_claim` performs the check and the write in a single critical
//!   section, which is what guarantees at most one remediation per pod per
//!   window.
//! - `sweep` bulk-evicts under the same lock, so it can never interleave with
//!   a concurrent `record` and drop a fresh entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::pod::PodIdentity;
use crate::shutdown::ShutdownCoordinator;

/// Outcome of an atomic check-and-set on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// No active cooldown; the caller now owns the remediation and the entry
    /// has been written with the claim time
    Granted,
    /// Pod was remediated recently
    Cooling { remaining: chrono::Duration },
}

/// Concurrency-safe map of pod identity to last remediation time
#[derive(Debug)]
pub struct CooldownLedger {
    cooldown: chrono::Duration,
    retention: chrono::Duration,
    entries: Mutex<HashMap<PodIdentity, DateTime<Utc>>>,
}

impl CooldownLedger {
    #[must_use]
    pub fn new(cooldown_window: Duration) -> Self {
        let cooldown = chrono::Duration::from_std(cooldown_window).unwrap_or(chrono::Duration::MAX);
        Self {
            cooldown,
            retention: cooldown.checked_mul(2).unwrap_or(chrono::Duration::MAX),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<PodIdentity, DateTime<Utc>>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remaining(&self, healed_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let elapsed = now - healed_at;
        (elapsed < self.cooldown)
            .then(|| self.cooldown.checked_sub(&elapsed).unwrap_or(self.cooldown))
    }

    /// Returns the remaining cooldown if `identity` was remediated less than
    /// one cooldown window before `now`
    pub fn should_skip(&self, identity: &PodIdentity, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let entries = self.entries();
        entries
            .get(identity)
            .and_then(|healed_at| self.remaining(*healed_at, now))
    }

    /// Insert or overwrite the entry for `identity`
    pub fn record(&self, identity: PodIdentity, now: DateTime<Utc>) {
        self.entries().insert(identity, now);
    }

    /// Check the cooldown and, if clear, record `now` in the same critical
    /// section
    pub fn try_claim(&self, identity: &PodIdentity, now: DateTime<Utc>) -> Claim {
        let mut entries = self.entries();
        if let Some(remaining) = entries
            .get(identity)
            .and_then(|healed_at| self.remaining(*healed_at, now))
        {
            return Claim::Cooling { remaining };
        }
        entries.insert(identity.clone(), now);
        Claim::Granted
    }

    /// Undo a claim whose remediation did not happen. The entry is only
    /// removed while it still holds `claimed_at`.
    pub fn release(&self, identity: &PodIdentity, claimed_at: DateTime<Utc>) -> bool {
        let mut entries = self.entries();
        if entries.get(identity) == Some(&claimed_at) {
            entries.remove(identity);
            true
        } else {
            false
        }
    }

    /// Remove every entry older than twice the cooldown window
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, healed_at| now - *healed_at <= self.retention);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Sweep every `interval` until shutdown fires
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: ShutdownCoordinator) {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(interval_secs = interval.as_secs(), "Cooldown sweeper started");
        loop {
            tokio::select! {
                () = shutdown.wait() => break,
                _ = ticker.tick() => {
                    let removed = self.sweep(Utc::now());
                    if removed > 0 {
                        info!(removed, remaining = self.len(), "Evicted stale cooldown entries");
                    }
                }
            }
        }
        debug!("Cooldown sweeper stopped");
    }
}
