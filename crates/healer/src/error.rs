use std::time::Duration;

use thiserror::Error;

/// Errors raised by the remediation engine and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid namespace pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Namespace patterns [{patterns}] did not match any existing namespace")]
    NoMatchingNamespaces { patterns: String },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Failed to load kubeconfig: {0}")]
    Kubeconfig(String),

    #[error("Pod watch error: {0}")]
    Watch(#[from] kube::runtime::watcher::Error),

    #[error("Pod cache for {scope} did not sync within {timeout:?}")]
    SyncTimeout { scope: String, timeout: Duration },

    #[error("Delete of pod {pod} timed out after {timeout:?}")]
    DeleteTimeout { pod: String, timeout: Duration },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
