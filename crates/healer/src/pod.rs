//! Pod snapshots consumed by the remediation engine.

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// Label used to exclude pods from remediation
pub const DEFAULT_EXCLUDE_LABEL: &str = "healer.k8s.io/exclude";

/// Unique key for cooldown tracking
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodIdentity {
    pub namespace: String,
    pub name: String,
}

impl PodIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Container status within a pod
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerObservation {
    pub waiting_reason: Option<String>,
    pub restart_count: u32,
}

impl ContainerObservation {
    pub fn waiting(reason: impl Into<String>, restart_count: u32) -> Self {
        Self {
            waiting_reason: Some(reason.into()),
            restart_count,
        }
    }

    pub fn running(restart_count: u32) -> Self {
        Self {
            waiting_reason: None,
            restart_count,
        }
    }
}

/// Immutable snapshot of the pod fields the engine decides on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodObservation {
    pub namespace: String,
    pub name: String,
    pub owner_present: bool,
    /// Pod carries the opt-out label
    pub excluded: bool,
    pub containers: Vec<ContainerObservation>,
}

impl PodObservation {
    pub fn identity(&self) -> PodIdentity {
        PodIdentity::new(self.namespace.clone(), self.name.clone())
    }

    /// Build an observation from a Kubernetes pod, honoring `exclude_label`
    pub fn from_pod(pod: &Pod, exclude_label: &str) -> Self {
        let owner_present = pod
            .metadata
            .owner_references
            .as_ref()
            .is_some_and(|owners| !owners.is_empty());

        let excluded = pod
            .labels()
            .get(exclude_label)
            .is_some_and(|v| v == "true");

        let containers = pod
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| {
                statuses
                    .iter()
                    .map(|cs| ContainerObservation {
                        waiting_reason: cs
                            .state
                            .as_ref()
                            .and_then(|state| state.waiting.as_ref())
                            .and_then(|waiting| waiting.reason.clone()),
                        restart_count: cs.restart_count.max(0) as u32,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            namespace: pod.namespace().unwrap_or_default(),
            name: pod.name_any(),
            owner_present,
            excluded,
            containers,
        }
    }
}
