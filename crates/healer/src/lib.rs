//! k8s-healer
//!
//! Watches pods across a set of namespaces and deletes the ones stuck in
//! `CrashLoopBackOff`, relying on their owning controller to recreate them.
//! A cooldown ledger guarantees a pod is remediated at most once per window,
//! even when several namespace watchers report it concurrently.

pub mod classifier;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod namespaces;
pub mod pod;
pub mod shutdown;
pub mod watcher;

// Re-export commonly used items
pub use classifier::{Health, HealthClassifier};
pub use cluster::{ClusterClient, DeleteOutcome, KubeCluster, PodEvent};
pub use config::{EngineConfig, FileConfig};
pub use engine::{Decision, RemediationEngine, StatsSnapshot};
pub use error::{Error, Result};
pub use ledger::{Claim, CooldownLedger};
pub use namespaces::{parse_patterns, resolve_watch_set, NamespaceScope, WatchSet};
pub use pod::{ContainerObservation, PodIdentity, PodObservation};
pub use shutdown::ShutdownCoordinator;
