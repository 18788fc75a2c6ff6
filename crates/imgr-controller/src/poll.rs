//! Full-list resynchronization of remote process state
//!
//! Runs every time a running instance manager is reconciled. It catches
//! anything the event stream missed and confirms deletions whose events were
//! lost. Ordering against the stream does not matter: both paths go through
//! the same merge rules.

use std::collections::BTreeMap;

use tracing::debug;

use imgr_common::crd::InstanceManager;
use imgr_common::Error;
use kube::ResourceExt;

use crate::merge::{apply_observation, MergeOutcome, ProcessObservation};
use crate::remote::ProcessManagerConnector;

/// Counts of entries changed by one resync
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    /// Entries replaced with fresher remote data
    pub updated: usize,
    /// Entries removed after a confirmed deletion
    pub removed: usize,
}

/// Fold a full remote listing into `im`'s tracked processes
///
/// Only locally tracked names are considered. A tracked process missing from
/// the listing is dropped if its deletion was already requested, and left
/// alone otherwise (it may not have started yet).
pub fn reconcile_listing(
    im: &mut InstanceManager,
    mut listing: BTreeMap<String, ProcessObservation>,
) -> ResyncSummary {
    let mut summary = ResyncSummary::default();
    let tracked: Vec<String> = im.status_mut().instances.keys().cloned().collect();

    for name in tracked {
        match listing.remove(&name) {
            Some(observation) => match apply_observation(im, observation) {
                MergeOutcome::Updated => summary.updated += 1,
                MergeOutcome::Removed => summary.removed += 1,
                _ => {}
            },
            None => {
                let instances = &mut im.status_mut().instances;
                let confirmed = instances
                    .get(&name)
                    .is_some_and(|p| p.spec.deleted_at.is_some());
                if confirmed {
                    instances.remove(&name);
                    summary.removed += 1;
                }
            }
        }
    }

    summary
}

/// List the daemon's processes and fold them into `im`
pub async fn resync_processes(
    connector: &dyn ProcessManagerConnector,
    im: &mut InstanceManager,
) -> Result<ResyncSummary, Error> {
    let client = connector.connect(im)?;
    let listing = client.list().await?;
    let summary = reconcile_listing(im, listing);
    if summary != ResyncSummary::default() {
        debug!(
            instance_manager = %im.name_any(),
            updated = summary.updated,
            removed = summary.removed,
            "Resynced processes from instance manager"
        );
    }
    Ok(summary)
}
