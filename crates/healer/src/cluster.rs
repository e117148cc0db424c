//! Kubernetes API boundary.
//!
//! The engine only needs three things from the cluster: a stream of pod
//! updates per namespace scope, a pod delete, and a namespace listing.
//! `ClusterClient` captures exactly that so the engine can be driven by a
//! fake in tests; `KubeCluster` is the kube-rs implementation.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, DeleteParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::reflector::{self, reflector};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::namespaces::NamespaceScope;
use crate::pod::{PodObservation, DEFAULT_EXCLUDE_LABEL};

/// Item of a pod watch stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodEvent {
    /// The initial listing is cached; the watcher is ready
    Synced,
    /// Current state of a pod, from a watch event or a periodic resync
    Updated(PodObservation),
}

/// Result of a pod delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The pod was already gone
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Subscribe to pod updates in `scope`, re-delivering every cached pod
    /// each `resync_period`
    fn watch_pods(
        &self,
        scope: &NamespaceScope,
        resync_period: Duration,
    ) -> BoxStream<'static, Result<PodEvent>>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;

    async fn list_namespaces(&self) -> Result<Vec<String>>;
}

/// `ClusterClient` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    exclude_label: Arc<str>,
}

impl KubeCluster {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            exclude_label: Arc::from(DEFAULT_EXCLUDE_LABEL),
        }
    }

    /// Override the label that opts pods out of remediation
    #[must_use]
    pub fn with_exclude_label(mut self, label: impl AsRef<str>) -> Self {
        self.exclude_label = Arc::from(label.as_ref());
        self
    }

    /// Build a client from an explicit kubeconfig, or infer one from the
    /// environment (KUBECONFIG, ~/.kube/config, in-cluster service account)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| Error::Kubeconfig(format!("{}: {e}", path.display())))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::Kubeconfig(e.to_string()))?
            }
            None => kube::Config::infer()
                .await
                .map_err(|e| Error::Kubeconfig(e.to_string()))?,
        };

        Ok(Client::try_from(config)?)
    }

    fn pods(&self, scope: &NamespaceScope) -> Api<Pod> {
        match scope {
            NamespaceScope::All => Api::all(self.client.clone()),
            NamespaceScope::Namespace(ns) => Api::namespaced(self.client.clone(), ns),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    fn watch_pods(
        &self,
        scope: &NamespaceScope,
        resync_period: Duration,
    ) -> BoxStream<'static, Result<PodEvent>> {
        let (reader, writer) = reflector::store::<Pod>();
        let watcher_config = watcher::Config::default().any_semantic();

        let label = Arc::clone(&self.exclude_label);
        let events = reflector(writer, watcher(self.pods(scope), watcher_config).default_backoff())
            .filter_map(move |event| {
                let label = Arc::clone(&label);
                async move {
                    match event {
                        Ok(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod)) => Some(Ok(
                            PodEvent::Updated(PodObservation::from_pod(&pod, &label)),
                        )),
                        Ok(watcher::Event::InitDone) => Some(Ok(PodEvent::Synced)),
                        Ok(watcher::Event::Init | watcher::Event::Delete(_)) => None,
                        Err(e) => Some(Err(Error::Watch(e))),
                    }
                }
            });

        // Periodic full re-delivery from the reflector cache, to heal missed events.
        let label = Arc::clone(&self.exclude_label);
        let resync = stream::unfold((), move |()| async move {
            tokio::time::sleep(resync_period).await;
            Some(((), ()))
        })
        .flat_map(move |()| {
            let pods = reader.state();
            debug!(pods = pods.len(), "Resyncing pod cache");
            let label = Arc::clone(&label);
            stream::iter(
                pods.into_iter()
                    .map(move |pod| Ok(PodEvent::Updated(PodObservation::from_pod(&pod, &label)))),
            )
        });

        stream::select(events, resync).boxed()
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(Error::Kube(e)),
        }
    }

    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces.list(&ListParams::default()).await?;
        Ok(list.items.iter().map(|ns| ns.name_any()).collect())
    }
}
