//! Pod lifecycle state machine for an owned instance manager
//!
//! [`plan`] is a pure function from (recorded state, placement, observed pod)
//! to a [`Transition`]; [`drive`] carries the transition out against the
//! cluster and the remote daemon, mutating an in-memory copy of the resource
//! whose status the caller persists afterwards.

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use imgr_common::crd::{EngineImage, InstanceManager, InstanceManagerState, InstanceState};
use imgr_common::kube_utils::node_boot_id;
use imgr_common::{Error, INSTANCE_MANAGER_ERRORED_MSG};

use crate::controller::Context;
use crate::pod::{manager_pod, PodObservation, PodPhase, PodPlacement};
use crate::poll::resync_processes;
use crate::watch::ManagerWatch;

/// What one reconciliation does to the pod and recorded state
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// The resource targets another node; its state cannot be known here
    ForceUnknown,
    /// Recorded as errored: tear everything down, recreate the pod, go to `Starting`
    Recover,
    /// The pod vanished while it should exist
    PodMissing,
    /// Nothing was ever requested: create the pod and go to `Starting`
    CreatePod,
    /// Pod pending, state was unknown
    MarkStarting,
    /// Nothing to do until the pod makes progress
    Wait,
    /// Pod state contradicts recorded state
    Inconsistent(InstanceManagerState),
    /// Pod ready and already recorded as running: keep remote state flowing
    Sync,
    /// Pod became ready: record address and boot id, go to `Running`
    MarkRunning,
    /// Pod in a phase the daemon cannot recover from
    PodFailed(PodPhase),
}

/// Choose the transition for `state` given the observed pod
///
/// `on_target_node` is whether the resource's `spec.nodeID` is this controller.
pub fn plan(
    state: InstanceManagerState,
    on_target_node: bool,
    pod: Option<&PodObservation>,
) -> Transition {
    use imgr_common::crd::InstanceManagerState as S;

    if !on_target_node {
        return Transition::ForceUnknown;
    }
    if state == S::Error {
        return Transition::Recover;
    }

    let Some(pod) = pod else {
        return match state {
            S::Stopped => Transition::CreatePod,
            _ => Transition::PodMissing,
        };
    };

    match pod.phase {
        PodPhase::Pending => match state {
            S::Unknown => Transition::MarkStarting,
            S::Starting => Transition::Wait,
            other => Transition::Inconsistent(other),
        },
        PodPhase::Running if !pod.all_ready => Transition::Wait,
        PodPhase::Running => match state {
            S::Running => Transition::Sync,
            S::Starting | S::Unknown => Transition::MarkRunning,
            _ => Transition::Wait,
        },
        other => Transition::PodFailed(other),
    }
}

/// Carry out one lifecycle step for `im`
///
/// `im` is a working copy; nothing in its status is written here.
pub async fn drive(ctx: &Context, im: &mut InstanceManager, image: &EngineImage) -> Result<(), Error> {
    let name = im.name_any();
    let state = im.current_state();
    let pod = ctx.store.get_pod(&name).await?;
    let observed = pod.as_ref().map(PodObservation::from_pod);
    let on_target_node = im.spec.node_id == ctx.config.controller_id;

    let transition = plan(state, on_target_node, observed.as_ref());
    debug!(instance_manager = %name, %state, ?transition, "Planned lifecycle transition");

    match transition {
        Transition::ForceUnknown => set_state(im, InstanceManagerState::Unknown),
        Transition::Recover => {
            info!(instance_manager = %name, "Instance manager errored, recreating pod");
            cleanup(ctx, im).await?;
            create_pod(ctx, im, image).await?;
            set_state(im, InstanceManagerState::Starting);
        }
        Transition::PodMissing => {
            warn!(instance_manager = %name, %state, "Instance manager pod is missing");
            set_state(im, InstanceManagerState::Error);
        }
        Transition::CreatePod => {
            create_pod(ctx, im, image).await?;
            set_state(im, InstanceManagerState::Starting);
        }
        Transition::MarkStarting => set_state(im, InstanceManagerState::Starting),
        Transition::Wait => {}
        Transition::Inconsistent(recorded) => {
            error!(
                instance_manager = %name,
                state = %recorded,
                "BUG: instance manager pod is pending in an unexpected state"
            );
            set_state(im, InstanceManagerState::Error);
        }
        Transition::Sync => {
            ensure_watch(ctx, im)?;
            resync_processes(ctx.connector.as_ref(), im).await?;
        }
        Transition::MarkRunning => mark_running(ctx, im, pod.as_ref()).await?,
        Transition::PodFailed(phase) => {
            warn!(instance_manager = %name, ?phase, "Instance manager pod failed");
            set_state(im, InstanceManagerState::Error);
        }
    }
    Ok(())
}

fn set_state(im: &mut InstanceManager, state: InstanceManagerState) {
    im.status_mut().current_state = state;
}

async fn create_pod(ctx: &Context, im: &InstanceManager, image: &EngineImage) -> Result<(), Error> {
    let placement = PodPlacement {
        namespace: &ctx.config.namespace,
        node_name: &ctx.config.controller_id,
        port: ctx.config.manager_port,
    };
    let pod = manager_pod(im, image, &placement)?;
    ctx.store.create_pod(&pod).await?;
    info!(
        instance_manager = %im.name_any(),
        image = %image.spec.image,
        node = %placement.node_name,
        "Created instance manager pod"
    );
    Ok(())
}

/// Record the pod's address and boot id and move to `Running`
///
/// A ready pod without a node binding is unusable; the resource is moved to
/// `Error` so the next pass recreates the pod.
async fn mark_running(ctx: &Context, im: &mut InstanceManager, pod: Option<&Pod>) -> Result<(), Error> {
    let name = im.name_any();
    let observed = pod.map(PodObservation::from_pod);
    let Some(node_name) = observed.as_ref().and_then(|o| o.node_name.clone()) else {
        error!(instance_manager = %name, "BUG: running instance manager pod is not bound to a node");
        set_state(im, InstanceManagerState::Error);
        return Ok(());
    };
    let ip = observed.and_then(|o| o.ip);
    let node = ctx.store.get_node(&node_name).await?.ok_or_else(|| {
        Error::internal_with_context("lifecycle", format!("node {node_name} of pod {name} not found"))
    })?;

    let status = im.status_mut();
    status.ip = ip;
    status.node_boot_id = node_boot_id(&node);
    status.current_state = InstanceManagerState::Running;
    info!(instance_manager = %name, ip = ?status.ip, "Instance manager is running");
    Ok(())
}

fn ensure_watch(ctx: &Context, im: &InstanceManager) -> Result<(), Error> {
    let name = im.name_any();
    ctx.watches.ensure(&name, || {
        let client = ctx.connector.connect(im)?;
        Ok(ManagerWatch::spawn(
            &name,
            client,
            ctx.store.clone(),
            ctx.config.watch_backoff,
        ))
    })?;
    Ok(())
}

/// Tear down everything tied to the current pod incarnation
///
/// Clears the recorded address and boot id, stops the process watch (waiting
/// for it, so none of its writes can land afterwards), marks every tracked
/// process errored and deletes the pod. Safe to repeat.
pub async fn cleanup(ctx: &Context, im: &mut InstanceManager) -> Result<(), Error> {
    let name = im.name_any();
    ctx.watches.stop(&name).await;

    let status = im.status_mut();
    status.ip = None;
    status.node_boot_id = None;
    for process in status.instances.values_mut() {
        process.status.state = InstanceState::Error;
        process.status.error_msg = Some(INSTANCE_MANAGER_ERRORED_MSG.to_string());
    }

    if ctx.store.get_pod(&name).await?.is_some() {
        ctx.store.delete_pod(&name).await?;
        info!(instance_manager = %name, "Deleted instance manager pod");
    }
    Ok(())
}
