//! Per-resource ownership between controller replicas
//!
//! Every node runs one controller whose identity is the node name. The
//! resource's `spec.ownerID` names the controller allowed to act on it; a
//! controller may claim a resource nobody owns or whose owner's node is down,
//! and the controller on the resource's target node always reclaims it. All
//! claims are written with optimistic concurrency, so concurrent claimants
//! resolve to exactly one winner.

use kube::ResourceExt;
use tracing::{debug, info, warn};

use imgr_common::crd::{InstanceManager, InstanceManagerSpec};
use imgr_common::kube_utils::is_node_ready;
use imgr_common::Error;

use crate::store::{InstanceManagerStore, WriteOutcome};

/// What this controller should do about a resource's ownership
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnershipDecision {
    /// Resource targets this node but another controller owns it
    Reclaim,
    /// Resource is unowned or its owner's node is down
    TakeOver,
    /// Already owned by this controller
    Owned,
    /// Owned by a healthy peer
    NotOurs,
}

/// Decide ownership from the spec alone
///
/// `owner_down` is only consulted for resources owned by someone else.
pub fn decide(spec: &InstanceManagerSpec, controller_id: &str, owner_down: bool) -> OwnershipDecision {
    if spec.node_id == controller_id && spec.owner_id != controller_id {
        OwnershipDecision::Reclaim
    } else if spec.owner_id == controller_id {
        OwnershipDecision::Owned
    } else if spec.owner_id.is_empty() || owner_down {
        OwnershipDecision::TakeOver
    } else {
        OwnershipDecision::NotOurs
    }
}

/// Outcome of ownership resolution for one reconciliation
#[derive(Clone, Debug, PartialEq)]
pub enum Ownership {
    /// This controller owns the resource; carries the freshest copy
    Proceed(InstanceManager),
    /// Not this controller's responsibility this cycle
    Skip,
    /// A claim that must eventually succeed lost a race; try again
    Requeue,
}

/// Whether the node hosting `owner_id`'s controller is gone or not ready
///
/// Lookup failures are logged and treated as "alive" so a flaky API never
/// triggers a takeover.
pub async fn owner_node_down(store: &dyn InstanceManagerStore, owner_id: &str) -> bool {
    match store.get_node(owner_id).await {
        Ok(Some(node)) => !is_node_ready(&node),
        Ok(None) => true,
        Err(e) => {
            warn!(owner = %owner_id, error = %e, "Failed to check whether owner node is down");
            false
        }
    }
}

/// Resolve and, if needed, claim ownership of `im` for `controller_id`
pub async fn resolve(
    store: &dyn InstanceManagerStore,
    im: InstanceManager,
    controller_id: &str,
) -> Result<Ownership, Error> {
    let name = im.name_any();

    let owner_down = {
        let owner = im.spec.owner_id.as_str();
        let needs_check =
            !owner.is_empty() && owner != controller_id && im.spec.node_id != controller_id;
        needs_check && owner_node_down(store, owner).await
    };

    let decision = decide(&im.spec, controller_id, owner_down);
    match decision {
        OwnershipDecision::Owned => return Ok(Ownership::Proceed(im)),
        OwnershipDecision::NotOurs => {
            debug!(instance_manager = %name, owner = %im.spec.owner_id, "Owned by another controller, skipping");
            return Ok(Ownership::Skip);
        }
        OwnershipDecision::Reclaim | OwnershipDecision::TakeOver => {}
    }

    let previous = im.spec.owner_id.clone();
    let mut claimed = im;
    claimed.spec.owner_id = controller_id.to_string();

    match store.update_instance_manager(&claimed).await? {
        WriteOutcome::Written(stored) => {
            info!(
                instance_manager = %name,
                previous_owner = %previous,
                ?decision,
                "Instance manager ownership transferred to this controller"
            );
            Ok(Ownership::Proceed(stored))
        }
        WriteOutcome::Conflict if decision == OwnershipDecision::Reclaim => {
            debug!(instance_manager = %name, "Reclaim conflicted, requeueing");
            Ok(Ownership::Requeue)
        }
        WriteOutcome::Conflict => {
            debug!(instance_manager = %name, "Lost takeover race to another controller");
            Ok(Ownership::Skip)
        }
    }
}
