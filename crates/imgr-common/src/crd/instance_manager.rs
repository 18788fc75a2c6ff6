//! InstanceManager CRD types
//!
//! An `InstanceManager` describes one per-node daemon (engine manager or
//! replica manager). The higher-level storage manager creates it with
//! `spec.nodeID` set and populates `status.instances` with the processes it
//! wants tracked; the instance manager controller drives the backing pod and
//! folds remote process state into `status`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// InstanceManager CRD
// =============================================================================

/// Desired placement and ownership of one instance manager daemon
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "longhorn.io",
    version = "v1beta1",
    kind = "InstanceManager",
    plural = "instancemanagers",
    shortname = "lhim",
    namespaced,
    status = "InstanceManagerStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.currentState"}"#,
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".spec.nodeID"}"#,
    printcolumn = r#"{"name":"Owner","type":"string","jsonPath":".spec.ownerID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceManagerSpec {
    /// Node the daemon must run on
    #[serde(rename = "nodeID", default)]
    pub node_id: String,

    /// Controller currently responsible for this resource (empty when unowned)
    #[serde(rename = "ownerID", default)]
    pub owner_id: String,

    /// Which daemon role this manager runs
    #[serde(rename = "type")]
    pub type_: InstanceManagerType,

    /// Name of the EngineImage whose image backs the daemon pod
    #[serde(default)]
    pub engine_image: String,
}

/// Observed state of an instance manager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceManagerStatus {
    /// Lifecycle state of the daemon
    #[serde(default)]
    pub current_state: InstanceManagerState,

    /// Pod IP the daemon's management API is reachable on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Boot id of the node the pod was running on when it became ready
    #[serde(
        rename = "nodeBootID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub node_boot_id: Option<String>,

    /// Processes tracked on this daemon, keyed by process name
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceProcess>,
}

/// Daemon role of an instance manager
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceManagerType {
    /// Runs storage engine (volume frontend) processes
    Engine,
    /// Runs replica processes
    Replica,
}

impl InstanceManagerType {
    /// Name of the daemon container inside the backing pod
    pub fn container_name(self) -> &'static str {
        match self {
            Self::Engine => "engine-manager",
            Self::Replica => "replica-manager",
        }
    }

    /// Look up a role by its container name
    pub fn from_container_name(name: &str) -> Option<Self> {
        match name {
            "engine-manager" => Some(Self::Engine),
            "replica-manager" => Some(Self::Replica),
            _ => None,
        }
    }
}

impl fmt::Display for InstanceManagerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine => write!(f, "engine"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

/// Lifecycle state of an instance manager
///
/// `Unknown → Starting → Running → Error`, with `Stopped` as the resting
/// state before a pod has ever been created.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceManagerState {
    /// Pod created, daemon not ready yet
    Starting,
    /// Pod running with all containers ready
    Running,
    /// Pod or daemon failed; next reconciliation recreates it
    Error,
    /// No pod has been requested
    Stopped,
    /// State could not be determined (e.g. resource targets another node)
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for InstanceManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

impl InstanceManager {
    /// Current lifecycle state, `Unknown` when status has never been written
    pub fn current_state(&self) -> InstanceManagerState {
        self.status
            .as_ref()
            .map(|s| s.current_state)
            .unwrap_or_default()
    }

    /// Recorded pod IP, if the manager has ever become ready
    pub fn ip(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.ip.as_deref())
    }

    /// Mutable access to status, creating an empty one if absent
    pub fn status_mut(&mut self) -> &mut InstanceManagerStatus {
        self.status.get_or_insert_with(InstanceManagerStatus::default)
    }
}

// =============================================================================
// Instance processes
// =============================================================================

/// One engine or replica process running inside an instance manager daemon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProcess {
    /// Identity and lifecycle timestamps
    pub spec: InstanceProcessSpec,
    /// Runtime state reported by the daemon
    #[serde(default)]
    pub status: InstanceProcessStatus,
}

/// Identity of a process
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProcessSpec {
    /// Process name, unique within its manager
    pub name: String,

    /// Assigned at creation; distinguishes processes reusing the same name
    #[serde(default)]
    pub uuid: String,

    /// When the owning storage manager requested the process
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// When the owning storage manager requested removal; never cleared
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Runtime state of a process
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProcessStatus {
    /// Reported runtime state
    #[serde(default)]
    pub state: InstanceState,

    /// Failure description reported by the daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,

    /// Monotonic counter bumped by the daemon on every change
    #[serde(default)]
    pub resource_version: i64,

    /// First port allocated to the process
    #[serde(default)]
    pub port_start: i32,

    /// Last port allocated to the process
    #[serde(default)]
    pub port_end: i32,

    /// Frontend endpoint (engines only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Runtime state of a single process
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Process launched, not serving yet
    Starting,
    /// Process serving
    Running,
    /// Stop requested
    Stopping,
    /// Process exited cleanly
    Stopped,
    /// Process failed or its manager went away
    Error,
    /// Unrecognized or unreported state
    #[default]
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    /// Parse a daemon-reported state string; unrecognized values map to `Unknown`
    pub fn from_remote(state: &str) -> Self {
        match state {
            "starting" => Self::Starting,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}
