//! Process merge algorithm
//!
//! Decides whether a process observation reported by a daemon, from either
//! the event stream or a full listing, supersedes the locally recorded entry.
//! Stream and poll results arrive in no guaranteed order; these rules alone
//! keep status consistent:
//!
//! 1. Entries are never created from observations.
//! 2. A different UUID is a different process reusing the name: ignored.
//! 3. Only a strictly newer resource version is applied.
//! 4. A deletion is honored only once the entry carries `deletedAt`.
//! 5. Otherwise the observation replaces the entry, keeping local timestamps.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, warn};

use imgr_common::crd::{InstanceManager, InstanceProcess};

/// One process record as reported by a daemon
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessObservation {
    /// Reported identity and runtime state
    pub process: InstanceProcess,
    /// Whether the daemon reports the process as gone
    pub deleted: bool,
}

/// What applying one observation did to the local entries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local entry under that name
    Untracked,
    /// Local entry belongs to a different process incarnation
    UuidMismatch,
    /// Observation is not newer than the local entry
    Stale,
    /// Deletion reported before the entry was marked for deletion
    DeletionUnconfirmed,
    /// Entry removed after a confirmed deletion
    Removed,
    /// Entry replaced with the observation
    Updated,
}

impl MergeOutcome {
    /// Whether the local entries were modified
    pub fn changed(self) -> bool {
        matches!(self, MergeOutcome::Removed | MergeOutcome::Updated)
    }
}

/// Fold one observation into `instances`
pub fn merge_process(
    instances: &mut BTreeMap<String, InstanceProcess>,
    observation: ProcessObservation,
) -> MergeOutcome {
    let ProcessObservation {
        process: mut incoming,
        deleted,
    } = observation;
    let name = incoming.spec.name.clone();

    let Some(current) = instances.get(&name) else {
        return MergeOutcome::Untracked;
    };

    // Timestamps are owned by the storage manager, never by the daemon
    incoming.spec.created_at = current.spec.created_at;
    incoming.spec.deleted_at = current.spec.deleted_at;

    if incoming.spec.uuid != current.spec.uuid {
        return MergeOutcome::UuidMismatch;
    }
    if incoming.status.resource_version <= current.status.resource_version {
        return MergeOutcome::Stale;
    }

    if deleted {
        if current.spec.deleted_at.is_some() {
            instances.remove(&name);
            return MergeOutcome::Removed;
        }
        return MergeOutcome::DeletionUnconfirmed;
    }

    instances.insert(name, incoming);
    MergeOutcome::Updated
}

/// Fold one observation into an instance manager's status, logging anything unusual
pub fn apply_observation(im: &mut InstanceManager, observation: ProcessObservation) -> MergeOutcome {
    let manager = im.name_any();
    let process = observation.process.spec.name.clone();
    let version = observation.process.status.resource_version;

    let outcome = merge_process(&mut im.status_mut().instances, observation);
    match outcome {
        MergeOutcome::Untracked => warn!(
            instance_manager = %manager,
            process = %process,
            "Cannot find process in instance manager status, ignoring update"
        ),
        MergeOutcome::DeletionUnconfirmed => debug!(
            instance_manager = %manager,
            process = %process,
            "Process reported deleted before deletion was requested, keeping entry"
        ),
        MergeOutcome::Removed => debug!(
            instance_manager = %manager,
            process = %process,
            "Removed deleted process"
        ),
        MergeOutcome::Updated => debug!(
            instance_manager = %manager,
            process = %process,
            resource_version = version,
            "Updated process"
        ),
        MergeOutcome::UuidMismatch | MergeOutcome::Stale => {}
    }
    outcome
}
