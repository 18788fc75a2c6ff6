//! Long-lived process watches, one per running instance manager
//!
//! A [`ManagerWatch`] owns a background task that keeps a subscription to the
//! daemon's event stream open and folds every event into the resource via the
//! merge rules. The [`WatchRegistry`] tracks watches by resource name; it is
//! owned by the controller context, never global.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use imgr_common::Error;

use crate::merge::{apply_observation, ProcessObservation};
use crate::remote::{ProcessEventStream, ProcessManagerClient};
use crate::store::{update_status_with, InstanceManagerStore, StatusUpdate};

/// Handle to one running watch task
///
/// Stopping consumes the handle, so a watch can only be stopped once.
pub struct ManagerWatch {
    name: String,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ManagerWatch {
    /// Spawn the receive loop for `name`
    ///
    /// `backoff` is waited after a failed subscription and between conflicting
    /// status writes.
    pub fn spawn(
        name: impl Into<String>,
        client: Arc<dyn ProcessManagerClient>,
        store: Arc<dyn InstanceManagerStore>,
        backoff: Duration,
    ) -> Self {
        let name = name.into();
        let token = CancellationToken::new();
        let receiver = Receiver {
            name: name.clone(),
            client,
            store,
            backoff,
            token: token.clone(),
        };
        let task = tokio::spawn(receiver.run());
        info!(instance_manager = %name, "Started process watch");
        Self { name, token, task }
    }

    /// Whether the task has exited (only after stop, or a panic)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for it to release the subscription
    ///
    /// Once this returns no write from this watch can land.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                error!(instance_manager = %self.name, "Process watch task panicked");
            }
        }
        info!(instance_manager = %self.name, "Stopped process watch");
    }
}

struct Receiver {
    name: String,
    client: Arc<dyn ProcessManagerClient>,
    store: Arc<dyn InstanceManagerStore>,
    backoff: Duration,
    token: CancellationToken,
}

impl Receiver {
    async fn run(self) {
        let mut stream: Option<ProcessEventStream> = None;

        loop {
            if stream.is_none() {
                let opened = tokio::select! {
                    biased;
                    _ = self.token.cancelled() => break,
                    opened = self.client.watch() => opened,
                };
                match opened {
                    Ok(s) => {
                        debug!(instance_manager = %self.name, "Subscribed to process events");
                        stream = Some(s);
                    }
                    Err(e) => {
                        error!(
                            instance_manager = %self.name,
                            error = %e,
                            "Failed to subscribe to process events, retrying"
                        );
                        if self.pause().await {
                            break;
                        }
                    }
                }
                continue;
            }
            let Some(active) = stream.as_mut() else {
                continue;
            };

            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                next = active.next() => next,
            };

            match next {
                Some(Ok(observation)) => self.fold(observation).await,
                Some(Err(e)) => {
                    error!(
                        instance_manager = %self.name,
                        error = %e,
                        "Failed to receive process event, resubscribing"
                    );
                    stream = None;
                    if self.pause().await {
                        break;
                    }
                }
                None => {
                    warn!(instance_manager = %self.name, "Process event stream closed, resubscribing");
                    stream = None;
                    if self.pause().await {
                        break;
                    }
                }
            }
        }

        drop(stream);
        debug!(instance_manager = %self.name, "Process watch loop exited");
    }

    /// Sleep for the backoff interval; true if cancelled meanwhile
    async fn pause(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => true,
            _ = tokio::time::sleep(self.backoff) => false,
        }
    }

    async fn fold(&self, observation: ProcessObservation) {
        let result = update_status_with(
            self.store.as_ref(),
            &self.name,
            self.backoff,
            &self.token,
            |im| apply_observation(im, observation.clone()).changed(),
        )
        .await;

        match result {
            Ok(StatusUpdate::Missing) => {
                warn!(instance_manager = %self.name, "Instance manager disappeared while watching")
            }
            Ok(_) => {}
            Err(e) => error!(
                instance_manager = %self.name,
                error = %e,
                "Failed to update instance manager from process event"
            ),
        }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Active watches keyed by instance manager name
#[derive(Default)]
pub struct WatchRegistry {
    watches: DashMap<String, ManagerWatch>,
}

impl WatchRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a watch for `name` unless a live one exists
    ///
    /// Returns whether a watch was started. `start` is only called when needed.
    pub fn ensure<F>(&self, name: &str, start: F) -> Result<bool, Error>
    where
        F: FnOnce() -> Result<ManagerWatch, Error>,
    {
        match self.watches.entry(name.to_string()) {
            Entry::Occupied(mut entry) if entry.get().is_finished() => {
                warn!(instance_manager = %name, "Replacing exited process watch");
                entry.insert(start()?);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(entry) => {
                entry.insert(start()?);
                Ok(true)
            }
        }
    }

    /// Stop and forget the watch for `name`; returns whether one existed
    pub async fn stop(&self, name: &str) -> bool {
        // Removal happens before awaiting so the map lock is not held across the join
        let removed = self.watches.remove(name);
        match removed {
            Some((_, watch)) => {
                watch.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stop every watch
    pub async fn stop_all(&self) {
        let names: Vec<String> = self.watches.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.stop(&name).await;
        }
    }

    /// Whether a watch is registered for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.watches.contains_key(name)
    }

    /// Number of registered watches
    pub fn len(&self) -> usize {
        self.watches.len()
    }

    /// Whether no watches are registered
    pub fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
