//! # Cluster Store
//!
//! The typed get/create/update/delete surface the convergence primitive and
//! the selector migration talk to.
//!
//! [`KubeStore`] is the production implementation. Every call races the
//! reconcile pass's cancellation token, so a cancelled pass aborts the
//! in-flight request instead of waiting for the API server.

use crate::constants::FIELD_MANAGER;
use crate::controller::error::ConvergeError;
use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Any namespaced, statically typed Kubernetes object the controller manages
pub trait ManagedResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ManagedResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Kind name of `K`, used in errors, logs and metric labels
pub fn kind_of<K: ManagedResource>() -> String {
    K::kind(&()).into_owned()
}

/// Namespaced object storage with optimistic concurrency
///
/// `update` sends the object's `resourceVersion`; a stale version fails with
/// [`ConvergeError::Conflict`] and is never retried here.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch an object, `None` when it does not exist
    async fn get<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ConvergeError>;

    async fn create<K: ManagedResource>(&self, namespace: &str, obj: &K)
        -> Result<K, ConvergeError>;

    /// Replace an object, guarded by its `resourceVersion`
    async fn update<K: ManagedResource>(&self, namespace: &str, obj: &K)
        -> Result<K, ConvergeError>;

    /// Delete an object. A missing object yields [`ConvergeError::NotFound`].
    async fn delete<K: ManagedResource>(&self, namespace: &str, name: &str)
        -> Result<(), ConvergeError>;

    /// Merge-patch the status subresource
    async fn patch_status<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ConvergeError>;
}

/// [`ClusterStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    cancel: CancellationToken,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    fn api<K: ManagedResource>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, ConvergeError>
    where
        F: Future<Output = Result<T, ConvergeError>> + Send,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ConvergeError::Cancelled),
            result = call => result,
        }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, ConvergeError> {
        let api = self.api::<K>(namespace);
        self.guarded(async {
            api.get_opt(name)
                .await
                .map_err(|e| ConvergeError::from_kube(&kind_of::<K>(), name, e))
        })
        .await
    }

    async fn create<K: ManagedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ConvergeError> {
        let api = self.api::<K>(namespace);
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!(kind = %kind_of::<K>(), namespace, name = %name, "store.create");
        self.guarded(async {
            api.create(&PostParams::default(), obj)
                .await
                .map_err(|e| ConvergeError::from_kube(&kind_of::<K>(), &name, e))
        })
        .await
    }

    async fn update<K: ManagedResource>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, ConvergeError> {
        let api = self.api::<K>(namespace);
        let name = obj.meta().name.clone().unwrap_or_default();
        debug!(kind = %kind_of::<K>(), namespace, name = %name, "store.update");
        self.guarded(async {
            api.replace(&name, &PostParams::default(), obj)
                .await
                .map_err(|e| ConvergeError::from_kube(&kind_of::<K>(), &name, e))
        })
        .await
    }

    async fn delete<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), ConvergeError> {
        let api = self.api::<K>(namespace);
        debug!(kind = %kind_of::<K>(), namespace, name, "store.delete");
        self.guarded(async {
            api.delete(name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(|e| ConvergeError::from_kube(&kind_of::<K>(), name, e))
        })
        .await
    }

    async fn patch_status<K: ManagedResource>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ConvergeError> {
        let api = self.api::<K>(namespace);
        let patch = serde_json::json!({ "status": status });
        self.guarded(async {
            api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await
                .map(|_| ())
                .map_err(|e| ConvergeError::from_kube(&kind_of::<K>(), name, e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use http::{Request, Response};
    use kube::client::Body;
    use std::convert::Infallible;
    use std::time::Duration;

    /// A client whose API server accepts the request and never answers
    fn stalled_client() -> Client {
        let service = tower::service_fn(|_request: Request<Body>| async {
            std::future::pending::<Result<Response<Body>, Infallible>>().await
        });
        Client::new(service, "gateways")
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_before_request() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = KubeStore::new(stalled_client(), cancel);

        let result = tokio::time::timeout(
            Duration::from_secs(1),
            store.get::<ConfigMap>("gateways", "apicast-gw"),
        )
        .await
        .expect("get returned promptly");
        assert!(matches!(result, Err(ConvergeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_request() {
        let cancel = CancellationToken::new();
        let store = KubeStore::new(stalled_client(), cancel.clone());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            store.get::<ConfigMap>("gateways", "apicast-gw"),
        )
        .await
        .expect("get returned once the token was cancelled");
        assert!(matches!(result, Err(ConvergeError::Cancelled)));
    }
}
