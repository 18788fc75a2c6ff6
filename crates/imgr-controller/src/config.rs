//! Controller settings and their command-line / environment surface

use std::time::Duration;

use clap::Args;

use imgr_common::retry::RetryConfig;
use imgr_common::{Error, DEFAULT_MANAGER_PORT, DEFAULT_NAMESPACE};

/// Flags for running the controller
///
/// Every flag can also be set through the environment variable shown in
/// `--help`; the downward API supplies `POD_NAMESPACE` and `NODE_NAME`.
#[derive(Args, Clone, Debug)]
pub struct ControllerArgs {
    /// Namespace holding instance managers, engine images and their pods
    #[arg(long, env = "POD_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Identity of this controller (the node it runs on); required unless printing CRDs
    #[arg(long, env = "NODE_NAME")]
    pub controller_id: Option<String>,

    /// Number of instance managers reconciled concurrently
    #[arg(long, env = "IMGR_WORKERS", default_value_t = 5)]
    pub workers: u16,

    /// Seconds between periodic resyncs of a healthy instance manager
    #[arg(long, env = "IMGR_RESYNC_INTERVAL_SECS", default_value_t = 30)]
    pub resync_interval_secs: u64,

    /// Failed reconciliations retried before a key is dropped
    #[arg(long, env = "IMGR_MAX_RETRIES", default_value_t = 3)]
    pub max_retries: u32,

    /// Port the instance manager daemons serve their API on
    #[arg(long, env = "IMGR_MANAGER_PORT", default_value_t = DEFAULT_MANAGER_PORT)]
    pub manager_port: u16,

    /// Pause before reopening a failed process stream or retrying a conflicted write
    #[arg(long, env = "IMGR_WATCH_BACKOFF_MS", default_value_t = 1000)]
    pub watch_backoff_ms: u64,

    /// OTLP collector endpoint for trace export
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

/// Resolved controller settings
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerConfig {
    /// Namespace the controller acts in; keys elsewhere are ignored
    pub namespace: String,
    /// This controller's node name, written into `spec.ownerID` on claim
    pub controller_id: String,
    /// Reconciliation concurrency
    pub workers: u16,
    /// Requeue interval for healthy resources
    pub resync_interval: Duration,
    /// Backoff for failed reconciliations
    pub retry: RetryConfig,
    /// Daemon API port
    pub manager_port: u16,
    /// Pause used by process watches and conflict requeues
    pub watch_backoff: Duration,
}

impl ControllerConfig {
    /// Settings with defaults for everything but identity and namespace
    pub fn new(namespace: impl Into<String>, controller_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            controller_id: controller_id.into(),
            workers: 5,
            resync_interval: Duration::from_secs(30),
            retry: RetryConfig::reconcile(3),
            manager_port: DEFAULT_MANAGER_PORT,
            watch_backoff: Duration::from_secs(1),
        }
    }
}

impl TryFrom<&ControllerArgs> for ControllerConfig {
    type Error = Error;

    fn try_from(args: &ControllerArgs) -> Result<Self, Error> {
        let controller_id = args
            .controller_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::validation("--controller-id or NODE_NAME must be set"))?;
        Ok(Self {
            namespace: args.namespace.clone(),
            controller_id,
            workers: args.workers.max(1),
            resync_interval: Duration::from_secs(args.resync_interval_secs),
            retry: RetryConfig::reconcile(args.max_retries),
            manager_port: args.manager_port,
            watch_backoff: Duration::from_millis(args.watch_backoff_ms),
        })
    }
}
