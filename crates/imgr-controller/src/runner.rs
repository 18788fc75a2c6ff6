//! Controller runner - wires the InstanceManager controller to the cluster

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, ResourceExt};
use tracing::info;

use imgr_common::crd::InstanceManager;
use imgr_common::retry::{retry_with_backoff, RetryConfig};
use imgr_common::Error;

use crate::config::ControllerConfig;
use crate::controller::{error_policy, reconcile, Context};
use crate::pod::is_instance_manager_pod;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Map a pod event to the instance manager of the same name
///
/// Pods that do not run a manager daemon are ignored.
pub fn pod_to_instance_manager(pod: &Pod) -> Option<ObjectRef<InstanceManager>> {
    if !is_instance_manager_pod(pod) {
        return None;
    }
    let namespace = pod.namespace()?;
    Some(ObjectRef::new(&pod.name_any()).within(&namespace))
}

/// Run the controller until a shutdown signal arrives
///
/// Waits for the InstanceManager API to answer before starting, and stops
/// every process watch on the way out.
pub async fn run(client: Client, config: ControllerConfig) -> Result<(), Error> {
    let namespace = config.namespace.clone();
    let workers = config.workers;
    let instance_managers: Api<InstanceManager> = Api::namespaced(client.clone(), &namespace);
    let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);

    retry_with_backoff(
        &RetryConfig::with_max_attempts(10),
        "list instance managers",
        || {
            let api = instance_managers.clone();
            async move { api.list(&ListParams::default().limit(1)).await.map(|_| ()) }
        },
    )
    .await?;

    let ctx = Arc::new(Context::new(client, config));
    info!(
        namespace = %namespace,
        controller_id = %ctx.config.controller_id,
        workers,
        "Starting instance manager controller"
    );

    Controller::new(
        instance_managers,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
    )
    .watches(
        pods,
        WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        |pod| pod_to_instance_manager(&pod),
    )
    .with_config(controller::Config::default().concurrency(workers))
    .shutdown_on_signal()
    .run(reconcile, error_policy, ctx.clone())
    .for_each(log_reconcile_result("InstanceManager"))
    .await;

    info!("Controller stopped, closing process watches");
    ctx.watches.stop_all().await;
    Ok(())
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
