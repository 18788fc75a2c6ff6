//! Backing pod template and pod observation helpers

use k8s_openapi::api::core::v1::{
    Container, ExecAction, HostPathVolumeSource, Pod, PodSpec, Probe, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};

use imgr_common::crd::{EngineImage, InstanceManager, InstanceManagerType};
use imgr_common::Error;

const PROBE_INITIAL_DELAY_SECS: i32 = 1;
const PROBE_PERIOD_SECS: i32 = 1;
const LIVENESS_FAILURE_THRESHOLD: i32 = 60;
const READINESS_FAILURE_THRESHOLD: i32 = 15;
const HEALTH_PROBE_BINARY: &str = "/usr/local/bin/grpc_health_probe";

const ENGINE_BINARY_DIR_IN_CONTAINER: &str = "/engine-binaries/";
const ENGINE_BINARY_DIR_ON_HOST: &str = "/var/lib/longhorn/engine-binaries/";

/// Where a pod is placed and how its daemon is reached
#[derive(Clone, Debug)]
pub struct PodPlacement<'a> {
    /// Namespace the pod is created in
    pub namespace: &'a str,
    /// Node the pod is pinned to (this controller's identity)
    pub node_name: &'a str,
    /// Port the daemon listens on
    pub port: u16,
}

/// Build the pod that runs the daemon for `im`
///
/// The pod shares the instance manager's name and is owned by it.
pub fn manager_pod(
    im: &InstanceManager,
    image: &EngineImage,
    placement: &PodPlacement<'_>,
) -> Result<Pod, Error> {
    let owner = im
        .controller_owner_ref(&())
        .ok_or_else(|| Error::validation_for(im.name_any(), "instance manager has no uid"))?;

    let role = im.spec.type_;
    let listen = format!("0.0.0.0:{}", placement.port);
    let command = match role {
        InstanceManagerType::Engine => vec!["engine-manager", "daemon", "--listen", listen.as_str()],
        InstanceManagerType::Replica => {
            vec!["longhorn-instance-manager", "daemon", "--listen", listen.as_str()]
        }
    };
    let (volumes, mounts) = host_volumes(role);

    let probe = |failure_threshold| Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                HEALTH_PROBE_BINARY.to_string(),
                format!("-addr=:{}", placement.port),
            ]),
        }),
        initial_delay_seconds: Some(PROBE_INITIAL_DELAY_SECS),
        period_seconds: Some(PROBE_PERIOD_SECS),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(im.name_any()),
            namespace: Some(placement.namespace.to_string()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: role.container_name().to_string(),
                image: Some(image.spec.image.clone()),
                command: Some(command.into_iter().map(String::from).collect()),
                liveness_probe: Some(probe(LIVENESS_FAILURE_THRESHOLD)),
                readiness_probe: Some(probe(READINESS_FAILURE_THRESHOLD)),
                security_context: Some(SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            node_name: Some(placement.node_name.to_string()),
            restart_policy: Some("Never".to_string()),
            volumes: Some(volumes),
            ..Default::default()
        }),
        status: None,
    })
}

fn host_volumes(role: InstanceManagerType) -> (Vec<Volume>, Vec<VolumeMount>) {
    let entries: &[(&str, &str, &str)] = match role {
        InstanceManagerType::Engine => &[
            ("dev", "/dev", "/host/dev"),
            ("proc", "/proc", "/host/proc"),
            (
                "engine-binaries",
                ENGINE_BINARY_DIR_ON_HOST,
                ENGINE_BINARY_DIR_IN_CONTAINER,
            ),
        ],
        InstanceManagerType::Replica => &[("host", "/", "/host")],
    };

    entries
        .iter()
        .map(|(name, host_path, mount_path)| {
            (
                Volume {
                    name: name.to_string(),
                    host_path: Some(HostPathVolumeSource {
                        path: host_path.to_string(),
                        type_: None,
                    }),
                    ..Default::default()
                },
                VolumeMount {
                    name: name.to_string(),
                    mount_path: mount_path.to_string(),
                    ..Default::default()
                },
            )
        })
        .unzip()
}

/// Whether a pod runs an instance manager daemon (by container name)
pub fn is_instance_manager_pod(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .any(|c| InstanceManagerType::from_container_name(&c.name).is_some())
        })
        .unwrap_or(false)
}

// =============================================================================
// Observation
// =============================================================================

/// Pod phase as reported by the kubelet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodPhase {
    /// Accepted, containers not all started
    Pending,
    /// Bound to a node with at least one container running
    Running,
    /// All containers exited successfully
    Succeeded,
    /// All containers exited, at least one failed
    Failed,
    /// Missing or unrecognized phase
    Unknown,
}

impl PodPhase {
    fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// The parts of a pod the lifecycle state machine looks at
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PodObservation {
    /// Current phase
    pub phase: PodPhase,
    /// No container reports not-ready (vacuously true without statuses)
    pub all_ready: bool,
    /// Assigned pod IP
    pub ip: Option<String>,
    /// Node the pod was scheduled to
    pub node_name: Option<String>,
}

impl PodObservation {
    /// Extract the observation from a pod
    pub fn from_pod(pod: &Pod) -> Self {
        let status = pod.status.as_ref();
        let all_ready = status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|cs| cs.iter().all(|c| c.ready))
            .unwrap_or(true);
        Self {
            phase: PodPhase::parse(status.and_then(|s| s.phase.as_deref())),
            all_ready,
            ip: status
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty()),
            node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        }
    }
}
