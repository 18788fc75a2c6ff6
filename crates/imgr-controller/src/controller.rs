//! InstanceManager reconciler
//!
//! One reconciliation walks: namespace filter, load, ownership, deletion,
//! engine image, lifecycle, and finally a single status write of whatever the
//! lifecycle step changed. Failures are wrapped with the resource name and
//! retried with per-key exponential backoff until the retry budget runs out.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::FutureExt;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use imgr_common::crd::{InstanceManager, InstanceManagerState};
use imgr_common::{Error, INSTANCE_MANAGER_FINALIZER};

use crate::config::ControllerConfig;
use crate::lifecycle;
use crate::ownership::{self, Ownership};
use crate::remote::{GrpcConnector, ProcessManagerConnector};
use crate::store::{persist_status_if_changed, InstanceManagerStore, KubeStore, StatusUpdate};
use crate::watch::WatchRegistry;

/// Shared state for all reconciliations
pub struct Context {
    /// Cluster object access (trait object for testability)
    pub store: Arc<dyn InstanceManagerStore>,
    /// Opens clients to instance manager daemons
    pub connector: Arc<dyn ProcessManagerConnector>,
    /// Process watches started by this controller
    pub watches: WatchRegistry,
    /// Resolved settings
    pub config: ControllerConfig,
    retries: DashMap<String, u32>,
}

impl Context {
    /// Create a context backed by the API server and gRPC daemons
    pub fn new(client: Client, config: ControllerConfig) -> Self {
        let store = Arc::new(KubeStore::new(client, config.namespace.clone()));
        let connector = Arc::new(GrpcConnector::new(config.manager_port));
        Self::from_parts(store, connector, config)
    }

    /// Create a context from explicit collaborators
    pub fn from_parts(
        store: Arc<dyn InstanceManagerStore>,
        connector: Arc<dyn ProcessManagerConnector>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            connector,
            watches: WatchRegistry::new(),
            config,
            retries: DashMap::new(),
        }
    }

    /// Create a context for unit tests with mock or in-memory collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn InstanceManagerStore>,
        connector: Arc<dyn ProcessManagerConnector>,
        config: ControllerConfig,
    ) -> Self {
        Self::from_parts(store, connector, config)
    }

    /// Failed attempts recorded for `name` since its last success
    pub fn retry_count(&self, name: &str) -> u32 {
        self.retries.get(name).map(|r| *r).unwrap_or(0)
    }
}

/// Result of one successful synchronization
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing left to do until the resource changes
    Done,
    /// Not acted on this cycle; check again at the resync interval
    Skipped,
    /// A write lost an optimistic-concurrency race; retry shortly
    Conflict,
    /// Lifecycle step completed in this state
    Synced(InstanceManagerState),
}

impl SyncOutcome {
    fn action(self, config: &ControllerConfig) -> Action {
        match self {
            SyncOutcome::Done => Action::await_change(),
            SyncOutcome::Conflict => Action::requeue(config.watch_backoff),
            SyncOutcome::Skipped | SyncOutcome::Synced(_) => Action::requeue(config.resync_interval),
        }
    }
}

/// Synchronize one instance manager by key
pub async fn sync_instance_manager(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<SyncOutcome, Error> {
    if namespace != ctx.config.namespace {
        return Ok(SyncOutcome::Done);
    }

    let Some(im) = ctx.store.get_instance_manager(name).await? else {
        info!(instance_manager = %name, "Instance manager has been deleted");
        return Ok(SyncOutcome::Done);
    };

    let im = match ownership::resolve(ctx.store.as_ref(), im, &ctx.config.controller_id).await? {
        Ownership::Proceed(im) => im,
        Ownership::Skip => return Ok(SyncOutcome::Skipped),
        Ownership::Requeue => return Ok(SyncOutcome::Conflict),
    };

    if im.metadata.deletion_timestamp.is_some() {
        return finalize(ctx, &im).await;
    }

    let Some(image) = ctx.store.get_engine_image(&im.spec.engine_image).await? else {
        info!(
            instance_manager = %name,
            engine_image = %im.spec.engine_image,
            "Engine image has been deleted"
        );
        return Ok(SyncOutcome::Skipped);
    };

    let mut updated = im.clone();
    lifecycle::drive(ctx, &mut updated, &image).await?;

    match persist_status_if_changed(ctx.store.as_ref(), &im, &updated).await? {
        StatusUpdate::Conflict => {
            debug!(instance_manager = %name, "Status write conflicted, requeueing");
            Ok(SyncOutcome::Conflict)
        }
        _ => Ok(SyncOutcome::Synced(updated.current_state())),
    }
}

async fn finalize(ctx: &Context, im: &InstanceManager) -> Result<SyncOutcome, Error> {
    let name = im.name_any();
    let mut updated = im.clone();
    lifecycle::cleanup(ctx, &mut updated).await?;

    if persist_status_if_changed(ctx.store.as_ref(), im, &updated).await? == StatusUpdate::Conflict {
        return Ok(SyncOutcome::Conflict);
    }

    ctx.store.remove_finalizer(&name, INSTANCE_MANAGER_FINALIZER).await?;
    info!(instance_manager = %name, "Instance manager cleaned up for deletion");
    Ok(SyncOutcome::Done)
}

/// Reconcile an InstanceManager
///
/// Panics inside a reconciliation are caught and reported as errors so one
/// bad resource cannot take the worker down.
#[instrument(
    skip(im, ctx),
    fields(
        instance_manager = %im.name_any(),
        otel.kind = "internal"
    )
)]
pub async fn reconcile(im: Arc<InstanceManager>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = im.name_any();
    let namespace = im.namespace().unwrap_or_default();

    let result = AssertUnwindSafe(sync_instance_manager(&ctx, &namespace, &name))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(Error::internal_with_context(
                "reconcile",
                format!("panic: {}", panic_message(panic.as_ref())),
            ))
        });

    match result {
        Ok(outcome) => {
            ctx.retries.remove(&name);
            debug!(?outcome, "Reconciled instance manager");
            Ok(outcome.action(&ctx.config))
        }
        Err(e) => Err(Error::sync_for(format!("{namespace}/{name}"), e)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Error policy for the InstanceManager controller
///
/// Requeues with per-key exponential backoff. Keys that exhausted the retry
/// budget are dropped until the resource changes again. Remote daemon failures keep being retried at
/// the resync interval once the budget is spent.
pub fn error_policy(im: Arc<InstanceManager>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = im.name_any();
    let attempt = {
        let mut entry = ctx.retries.entry(name.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    if error.is_remote() && ctx.config.retry.exhausted(attempt) {
        // daemon outages are waited out, never dropped
        warn!(
            instance_manager = %name,
            error = %error,
            attempt,
            "Instance manager daemon still unreachable, retrying at resync interval"
        );
        return Action::requeue(ctx.config.resync_interval);
    }

    if ctx.config.retry.exhausted(attempt) {
        ctx.retries.remove(&name);
        error!(
            instance_manager = %name,
            error = %error,
            attempt,
            retryable = error.is_retryable(),
            "Dropping instance manager out of the queue"
        );
        return Action::await_change();
    }

    let delay: Duration = ctx.config.retry.delay_for_attempt(attempt);
    warn!(
        instance_manager = %name,
        error = %error,
        attempt,
        delay_ms = delay.as_millis() as u64,
        "Failed to sync instance manager, will retry"
    );
    Action::requeue(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{
        MockProcessManagerClient, MockProcessManagerConnector, ProcessManagerClient,
    };
    use crate::store::MockInstanceManagerStore;
    use crate::test_support::{
        instance_manager, instances, node, pod, process, terminating, MemoryStore,
    };
    use futures::{stream, StreamExt};
    use imgr_common::crd::{InstanceManagerType, InstanceState};
    use imgr_common::INSTANCE_MANAGER_ERRORED_MSG;

    use crate::merge::ProcessObservation;

    const NS: &str = "longhorn-system";

    fn config() -> ControllerConfig {
        ControllerConfig::new(NS, "node-1")
    }

    fn context(store: Arc<MemoryStore>) -> Arc<Context> {
        Arc::new(Context::for_testing(
            store,
            Arc::new(MockProcessManagerConnector::new()),
            config(),
        ))
    }

    fn seeded_store(state: InstanceManagerState) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.insert_engine_image("ei-1", "longhornio/longhorn-engine:v1");
        store.insert_node(node("node-1", true, "boot-1"));
        let mut im = instance_manager("im-1", "node-1", InstanceManagerType::Engine);
        im.spec.owner_id = "node-1".to_string();
        im.status_mut().current_state = state;
        store.insert_instance_manager(im);
        store
    }

    /// Connector whose daemons report nothing and never emit events
    fn quiet_connector() -> MockProcessManagerConnector {
        let mut client = MockProcessManagerClient::new();
        client.expect_list().returning(|| Ok(Default::default()));
        client.expect_watch().returning(|| {
            Ok(stream::pending::<Result<ProcessObservation, Error>>().boxed())
        });
        let client: Arc<dyn ProcessManagerClient> = Arc::new(client);
        let mut connector = MockProcessManagerConnector::new();
        connector
            .expect_connect()
            .returning(move |_| Ok(client.clone()));
        connector
    }

    // =========================================================================
    // Synchronization stories
    // =========================================================================

    #[tokio::test]
    async fn new_manager_is_claimed_and_gets_a_pod() {
        let store = Arc::new(MemoryStore::new());
        store.insert_engine_image("ei-1", "longhornio/longhorn-engine:v1");
        let mut im = instance_manager("im-1", "node-1", InstanceManagerType::Replica);
        im.status_mut().current_state = InstanceManagerState::Stopped;
        store.insert_instance_manager(im);
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(InstanceManagerState::Starting));
        let stored = store.instance_manager("im-1").unwrap();
        assert_eq!(stored.spec.owner_id, "node-1");
        assert_eq!(stored.current_state(), InstanceManagerState::Starting);
        assert_eq!(store.created_pods(), vec!["im-1".to_string()]);
    }

    #[tokio::test]
    async fn ready_pod_promotes_starting_manager_to_running() {
        let store = seeded_store(InstanceManagerState::Starting);
        store.insert_pod(pod("im-1", "node-1", "Running", true, Some("10.0.0.3")));
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(InstanceManagerState::Running));
        let status = store.instance_manager("im-1").unwrap().status.unwrap();
        assert_eq!(status.current_state, InstanceManagerState::Running);
        assert_eq!(status.ip.as_deref(), Some("10.0.0.3"));
        assert_eq!(status.node_boot_id.as_deref(), Some("boot-1"));
    }

    #[tokio::test]
    async fn running_manager_gets_exactly_one_watch() {
        let store = seeded_store(InstanceManagerState::Starting);
        store.insert_pod(pod("im-1", "node-1", "Running", true, Some("10.0.0.3")));
        let ctx = Arc::new(Context::for_testing(
            store.clone(),
            Arc::new(quiet_connector()),
            config(),
        ));

        // Starting -> Running, then two cycles in Running
        for _ in 0..3 {
            sync_instance_manager(&ctx, NS, "im-1").await.unwrap();
        }

        assert_eq!(ctx.watches.len(), 1);
        assert!(ctx.watches.contains("im-1"));
        ctx.watches.stop_all().await;
    }

    #[tokio::test]
    async fn errored_manager_is_torn_down_and_recreated() {
        let store = seeded_store(InstanceManagerState::Error);
        store.insert_pod(pod("im-1", "node-1", "Failed", false, None));
        let mut im = store.instance_manager("im-1").unwrap();
        im.status_mut().instances = instances(vec![process("e1", "u1", 2, InstanceState::Running)]);
        store.insert_instance_manager(im);
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(InstanceManagerState::Starting));
        assert_eq!(store.deleted_pods(), vec!["im-1".to_string()]);
        assert_eq!(store.created_pods(), vec!["im-1".to_string()]);
        let status = store.instance_manager("im-1").unwrap().status.unwrap();
        assert_eq!(status.instances["e1"].status.state, InstanceState::Error);
    }

    fn terminating_with(store: &MemoryStore, extra_finalizer: Option<&str>) {
        let mut im = terminating(store.instance_manager("im-1").unwrap());
        if let Some(extra) = extra_finalizer {
            im.finalizers_mut().push(extra.to_string());
        }
        let status = im.status_mut();
        status.ip = Some("10.0.0.3".to_string());
        status.node_boot_id = Some("boot-1".to_string());
        status.instances = instances(vec![
            process("e1", "u1", 2, InstanceState::Running),
            process("e2", "u2", 1, InstanceState::Starting),
        ]);
        store.insert_instance_manager(im);
    }

    #[tokio::test]
    async fn deletion_errors_processes_before_releasing_finalizer() {
        let store = seeded_store(InstanceManagerState::Running);
        store.insert_pod(pod("im-1", "node-1", "Running", true, Some("10.0.0.3")));
        // a second finalizer keeps the object around so the final status is visible
        terminating_with(&store, Some("example.com/keep"));
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Done);
        assert!(store.pod("im-1").is_none());
        let stored = store.instance_manager("im-1").unwrap();
        assert_eq!(stored.finalizers(), ["example.com/keep".to_string()]);
        let status = stored.status.unwrap();
        assert!(status.ip.is_none());
        assert!(status.node_boot_id.is_none());
        for process in status.instances.values() {
            assert_eq!(process.status.state, InstanceState::Error);
            assert_eq!(
                process.status.error_msg.as_deref(),
                Some(INSTANCE_MANAGER_ERRORED_MSG)
            );
        }
    }

    #[tokio::test]
    async fn deletion_completes_once_finalizer_is_released() {
        let store = seeded_store(InstanceManagerState::Running);
        store.insert_pod(pod("im-1", "node-1", "Running", true, Some("10.0.0.3")));
        terminating_with(&store, None);
        let ctx = Arc::new(Context::for_testing(
            store.clone(),
            Arc::new(quiet_connector()),
            config(),
        ));
        ctx.watches
            .ensure("im-1", || {
                let client = ctx.connector.connect(&store.instance_manager("im-1").unwrap())?;
                Ok(crate::watch::ManagerWatch::spawn(
                    "im-1",
                    client,
                    ctx.store.clone(),
                    ctx.config.watch_backoff,
                ))
            })
            .unwrap();

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Done);
        assert!(ctx.watches.is_empty());
        assert_eq!(store.deleted_pods(), vec!["im-1".to_string()]);
        assert!(store.instance_manager("im-1").is_none());

        // the key is gone; a later event is a no-op
        let again = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();
        assert_eq!(again, SyncOutcome::Done);
    }

    #[tokio::test]
    async fn peer_owned_manager_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        store.insert_engine_image("ei-1", "longhornio/longhorn-engine:v1");
        store.insert_node(node("node-2", true, "boot-2"));
        let mut im = instance_manager("im-1", "node-2", InstanceManagerType::Engine);
        im.spec.owner_id = "node-2".to_string();
        store.insert_instance_manager(im.clone());
        let before = store.instance_manager("im-1").unwrap();
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped);
        assert_eq!(store.instance_manager("im-1").unwrap(), before);
        assert!(store.created_pods().is_empty());
    }

    #[tokio::test]
    async fn takeover_of_foreign_manager_forces_unknown() {
        let store = Arc::new(MemoryStore::new());
        store.insert_engine_image("ei-1", "longhornio/longhorn-engine:v1");
        let mut im = instance_manager("im-1", "node-2", InstanceManagerType::Engine);
        im.spec.owner_id = "node-2".to_string();
        im.status_mut().current_state = InstanceManagerState::Running;
        store.insert_instance_manager(im);
        let ctx = context(store.clone());

        // node-2 does not exist, so its controller counts as down
        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Synced(InstanceManagerState::Unknown));
        let stored = store.instance_manager("im-1").unwrap();
        assert_eq!(stored.spec.owner_id, "node-1");
        assert!(store.created_pods().is_empty());
    }

    #[tokio::test]
    async fn other_namespace_and_missing_keys_are_ignored() {
        let store = seeded_store(InstanceManagerState::Stopped);
        let ctx = context(store.clone());

        assert_eq!(
            sync_instance_manager(&ctx, "default", "im-1").await.unwrap(),
            SyncOutcome::Done
        );
        assert_eq!(
            sync_instance_manager(&ctx, NS, "nope").await.unwrap(),
            SyncOutcome::Done
        );
        assert!(store.created_pods().is_empty());
    }

    #[tokio::test]
    async fn missing_engine_image_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let mut im = instance_manager("im-1", "node-1", InstanceManagerType::Engine);
        im.spec.owner_id = "node-1".to_string();
        im.status_mut().current_state = InstanceManagerState::Stopped;
        store.insert_instance_manager(im);
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Skipped);
        assert!(store.created_pods().is_empty());
    }

    #[tokio::test]
    async fn conflicting_status_write_requeues() {
        let store = seeded_store(InstanceManagerState::Stopped);
        store.fail_next_status_writes(1);
        let ctx = context(store.clone());

        let outcome = sync_instance_manager(&ctx, NS, "im-1").await.unwrap();

        assert_eq!(outcome, SyncOutcome::Conflict);
        assert_eq!(
            store.instance_manager("im-1").unwrap().current_state(),
            InstanceManagerState::Stopped
        );
    }

    // =========================================================================
    // reconcile / error_policy
    // =========================================================================

    #[tokio::test]
    async fn reconcile_wraps_errors_with_resource_key() {
        let mut mock = MockInstanceManagerStore::new();
        mock.expect_get_instance_manager()
            .returning(|_| Err(Error::internal("apiserver unavailable")));
        let ctx = Arc::new(Context::for_testing(
            Arc::new(mock),
            Arc::new(MockProcessManagerConnector::new()),
            config(),
        ));
        let im = Arc::new(instance_manager("im-1", "node-1", InstanceManagerType::Engine));

        let err = reconcile(im, ctx).await.unwrap_err();

        assert!(err
            .to_string()
            .starts_with("fail to sync instance manager for longhorn-system/im-1"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn reconcile_turns_panics_into_errors() {
        let mut mock = MockInstanceManagerStore::new();
        mock.expect_get_instance_manager()
            .returning(|_| panic!("store exploded"));
        let ctx = Arc::new(Context::for_testing(
            Arc::new(mock),
            Arc::new(MockProcessManagerConnector::new()),
            config(),
        ));
        let im = Arc::new(instance_manager("im-1", "node-1", InstanceManagerType::Engine));

        let err = reconcile(im, ctx).await.unwrap_err();
        assert!(err.to_string().contains("store exploded"));
    }

    #[tokio::test]
    async fn success_resets_retry_counter() {
        let store = seeded_store(InstanceManagerState::Stopped);
        let ctx = context(store.clone());
        let im = Arc::new(store.instance_manager("im-1").unwrap());
        let error = Error::internal("transient");

        error_policy(im.clone(), &error, ctx.clone());
        assert_eq!(ctx.retry_count("im-1"), 1);

        let action = reconcile(im, ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.resync_interval));
        assert_eq!(ctx.retry_count("im-1"), 0);
    }

    #[test]
    fn error_policy_backs_off_then_drops() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let im = Arc::new(instance_manager("im-1", "node-1", InstanceManagerType::Engine));
        let error = Error::internal("transient");

        let actions: Vec<Action> = (0..4)
            .map(|_| error_policy(im.clone(), &error, ctx.clone()))
            .collect();

        assert_eq!(actions[0], Action::requeue(Duration::from_millis(5)));
        assert_eq!(actions[1], Action::requeue(Duration::from_millis(10)));
        assert_eq!(actions[2], Action::requeue(Duration::from_millis(20)));
        assert_eq!(actions[3], Action::await_change());
        assert_eq!(ctx.retry_count("im-1"), 0);
    }

    #[test]
    fn remote_failures_are_never_dropped() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let im = Arc::new(instance_manager("im-1", "node-1", InstanceManagerType::Engine));
        let error = Error::sync_for("im-1", Error::remote_for("im-1", "Unavailable: connection refused"));

        let actions: Vec<Action> = (0..5)
            .map(|_| error_policy(im.clone(), &error, ctx.clone()))
            .collect();

        assert_eq!(actions[2], Action::requeue(Duration::from_millis(20)));
        assert_eq!(actions[3], Action::requeue(ctx.config.resync_interval));
        assert_eq!(actions[4], Action::requeue(ctx.config.resync_interval));
        assert_eq!(ctx.retry_count("im-1"), 5);
    }

    #[test]
    fn validation_errors_share_the_retry_budget() {
        let ctx = context(Arc::new(MemoryStore::new()));
        let im = Arc::new(instance_manager("im-1", "node-1", InstanceManagerType::Engine));
        let error = Error::sync_for("im-1", Error::validation_for("im-1", "IP was not set"));

        let actions: Vec<Action> = (0..4)
            .map(|_| error_policy(im.clone(), &error, ctx.clone()))
            .collect();

        assert_eq!(actions[0], Action::requeue(Duration::from_millis(5)));
        assert_eq!(actions[2], Action::requeue(Duration::from_millis(20)));
        assert_eq!(actions[3], Action::await_change());
        assert_eq!(ctx.retry_count("im-1"), 0);
    }
}
