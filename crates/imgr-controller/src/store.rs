//! Object store access for the instance manager controller
//!
//! [`InstanceManagerStore`] is the seam between reconciliation logic and the
//! Kubernetes API. Writes are optimistic: a version conflict is reported as
//! [`WriteOutcome::Conflict`], never as an error, so callers decide whether a
//! lost race means "requeue" or "someone else owns this now".

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use imgr_common::crd::{EngineImage, InstanceManager};
use imgr_common::kube_utils::{is_conflict, is_not_found};
use imgr_common::Error;

/// Field manager recorded on patches issued by this controller
pub const FIELD_MANAGER: &str = "imgr-controller";

/// Result of an optimistic-concurrency write
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome<T> {
    /// The write was accepted; carries the stored object
    Written(T),
    /// The object changed since it was read
    Conflict,
}

/// Trait abstracting Kubernetes operations for instance manager reconciliation
///
/// All lookups are scoped to the controller's namespace. `get_*` returns
/// `Ok(None)` on 404.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceManagerStore: Send + Sync {
    /// Get an InstanceManager by name
    async fn get_instance_manager(&self, name: &str) -> Result<Option<InstanceManager>, Error>;

    /// Replace spec and metadata, guarded by the object's resourceVersion
    async fn update_instance_manager(
        &self,
        im: &InstanceManager,
    ) -> Result<WriteOutcome<InstanceManager>, Error>;

    /// Replace status, guarded by the object's resourceVersion
    async fn update_instance_manager_status(
        &self,
        im: &InstanceManager,
    ) -> Result<WriteOutcome<InstanceManager>, Error>;

    /// Remove a finalizer from an InstanceManager
    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error>;

    /// Get an EngineImage by name
    async fn get_engine_image(&self, name: &str) -> Result<Option<EngineImage>, Error>;

    /// Get a Pod by name
    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error>;

    /// Create a Pod
    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error>;

    /// Delete a Pod; succeeds if it is already gone
    async fn delete_pod(&self, name: &str) -> Result<(), Error>;

    /// Get a cluster-scoped Node by name
    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error>;
}

/// Real Kubernetes client implementation
pub struct KubeStore {
    client: Client,
    namespace: String,
}

impl KubeStore {
    /// Create a new store scoped to `namespace`
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn instance_managers(&self) -> Api<InstanceManager> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

fn optional<T>(result: Result<T, kube::Error>) -> Result<Option<T>, Error> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if is_not_found(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn guarded<T>(result: Result<T, kube::Error>) -> Result<WriteOutcome<T>, Error> {
    match result {
        Ok(obj) => Ok(WriteOutcome::Written(obj)),
        Err(e) if is_conflict(&e) => Ok(WriteOutcome::Conflict),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl InstanceManagerStore for KubeStore {
    async fn get_instance_manager(&self, name: &str) -> Result<Option<InstanceManager>, Error> {
        optional(self.instance_managers().get(name).await)
    }

    async fn update_instance_manager(
        &self,
        im: &InstanceManager,
    ) -> Result<WriteOutcome<InstanceManager>, Error> {
        let result = self
            .instance_managers()
            .replace(&im.name_any(), &PostParams::default(), im)
            .await;
        guarded(result)
    }

    async fn update_instance_manager_status(
        &self,
        im: &InstanceManager,
    ) -> Result<WriteOutcome<InstanceManager>, Error> {
        let data = serde_json::to_vec(im)?;
        let result = self
            .instance_managers()
            .replace_status(&im.name_any(), &PostParams::default(), data)
            .await;
        guarded(result)
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error> {
        let api = self.instance_managers();

        let Some(im) = optional(api.get(name).await)? else {
            return Ok(());
        };
        let finalizers: Vec<String> = im
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();
        if finalizers.len() == im.finalizers().len() {
            return Ok(());
        }

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        match api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_engine_image(&self, name: &str) -> Result<Option<EngineImage>, Error> {
        let api: Api<EngineImage> = Api::namespaced(self.client.clone(), &self.namespace);
        optional(api.get(name).await)
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error> {
        optional(self.pods().get(name).await)
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        Ok(self.pods().create(&PostParams::default(), pod).await?)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), Error> {
        match self.pods().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        let api: Api<Node> = Api::all(self.client.clone());
        optional(api.get(name).await)
    }
}

// =============================================================================
// Compare-and-swap helpers
// =============================================================================

/// Outcome of a status compare-and-swap
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    /// New status stored
    Written,
    /// The transform left status untouched; nothing was written
    Unchanged,
    /// Another writer got there first
    Conflict,
    /// The resource no longer exists
    Missing,
    /// The caller's cancellation token fired before a write landed
    Cancelled,
}

/// Write `after`'s status if it differs from `before`'s
///
/// One-shot: a conflict is returned to the caller rather than retried.
pub async fn persist_status_if_changed(
    store: &dyn InstanceManagerStore,
    before: &InstanceManager,
    after: &InstanceManager,
) -> Result<StatusUpdate, Error> {
    if before.status == after.status {
        return Ok(StatusUpdate::Unchanged);
    }
    match store.update_instance_manager_status(after).await? {
        WriteOutcome::Written(_) => Ok(StatusUpdate::Written),
        WriteOutcome::Conflict => Ok(StatusUpdate::Conflict),
    }
}

/// Read, transform and write an instance manager's status until it sticks
///
/// `mutate` returns whether it changed anything. On conflict the sequence
/// restarts from a fresh read after `retry_interval`. Cancellation is checked
/// before every read and while sleeping, and aborts an in-flight write.
pub async fn update_status_with<F>(
    store: &dyn InstanceManagerStore,
    name: &str,
    retry_interval: Duration,
    cancel: &CancellationToken,
    mut mutate: F,
) -> Result<StatusUpdate, Error>
where
    F: FnMut(&mut InstanceManager) -> bool + Send,
{
    loop {
        if cancel.is_cancelled() {
            return Ok(StatusUpdate::Cancelled);
        }

        let Some(mut im) = store.get_instance_manager(name).await? else {
            return Ok(StatusUpdate::Missing);
        };
        if !mutate(&mut im) {
            return Ok(StatusUpdate::Unchanged);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StatusUpdate::Cancelled),
            outcome = store.update_instance_manager_status(&im) => outcome?,
        };

        match outcome {
            WriteOutcome::Written(_) => return Ok(StatusUpdate::Written),
            WriteOutcome::Conflict => {
                debug!(instance_manager = %name, "Status write conflicted, retrying");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(StatusUpdate::Cancelled),
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            }
        }
    }
}
