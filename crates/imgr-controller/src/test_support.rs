//! In-memory object store and fixtures for controller tests
//!
//! `MemoryStore` enforces resourceVersion compare-and-swap the way the API
//! server does, keeps spec and status writes separate like a status
//! subresource, and deletes a terminating object once its last finalizer is
//! gone.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Node, NodeCondition, NodeStatus, NodeSystemInfo, Pod, PodSpec,
    PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::ResourceExt;

use imgr_common::crd::{
    EngineImage, EngineImageSpec, InstanceManager, InstanceManagerSpec, InstanceManagerType,
    InstanceProcess, InstanceProcessSpec, InstanceProcessStatus, InstanceState,
};
use imgr_common::{Error, DEFAULT_NAMESPACE};

use crate::store::{InstanceManagerStore, WriteOutcome};

#[derive(Default)]
struct State {
    instance_managers: HashMap<String, InstanceManager>,
    engine_images: HashMap<String, EngineImage>,
    pods: HashMap<String, Pod>,
    nodes: HashMap<String, Node>,
    next_version: u64,
    injected_status_conflicts: u32,
    status_writes: u32,
    spec_writes: u32,
    created_pods: Vec<String>,
    deleted_pods: Vec<String>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    pub fn insert_instance_manager(&self, mut im: InstanceManager) {
        let mut state = self.lock();
        im.metadata.resource_version = Some(state.bump());
        state.instance_managers.insert(im.name_any(), im);
    }

    pub fn instance_manager(&self, name: &str) -> Option<InstanceManager> {
        self.lock().instance_managers.get(name).cloned()
    }

    pub fn insert_engine_image(&self, name: &str, image: &str) {
        let mut ei = EngineImage::new(
            name,
            EngineImageSpec {
                image: image.to_string(),
            },
        );
        ei.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
        self.lock().engine_images.insert(name.to_string(), ei);
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.lock().pods.insert(pod.name_any(), pod);
    }

    pub fn pod(&self, name: &str) -> Option<Pod> {
        self.lock().pods.get(name).cloned()
    }

    pub fn insert_node(&self, node: Node) {
        self.lock().nodes.insert(node.name_any(), node);
    }

    /// Make the next `n` status writes fail with a conflict
    pub fn fail_next_status_writes(&self, n: u32) {
        self.lock().injected_status_conflicts = n;
    }

    /// Injected conflicts not yet consumed by a status write
    pub fn pending_status_conflicts(&self) -> u32 {
        self.lock().injected_status_conflicts
    }

    pub fn status_writes(&self) -> u32 {
        self.lock().status_writes
    }

    pub fn spec_writes(&self) -> u32 {
        self.lock().spec_writes
    }

    pub fn created_pods(&self) -> Vec<String> {
        self.lock().created_pods.clone()
    }

    pub fn deleted_pods(&self) -> Vec<String> {
        self.lock().deleted_pods.clone()
    }
}

fn already_exists(name: &str) -> Error {
    Error::from(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("pods \"{name}\" already exists"),
        reason: "AlreadyExists".to_string(),
        code: 409,
    }))
}

#[async_trait]
impl InstanceManagerStore for MemoryStore {
    async fn get_instance_manager(&self, name: &str) -> Result<Option<InstanceManager>, Error> {
        Ok(self.instance_manager(name))
    }

    async fn update_instance_manager(
        &self,
        im: &InstanceManager,
    ) -> Result<WriteOutcome<InstanceManager>, Error> {
        let mut state = self.lock();
        let version = state.bump();
        let Some(stored) = state.instance_managers.get_mut(&im.name_any()) else {
            return Ok(WriteOutcome::Conflict);
        };
        if stored.metadata.resource_version != im.metadata.resource_version {
            return Ok(WriteOutcome::Conflict);
        }
        stored.metadata = im.metadata.clone();
        stored.metadata.resource_version = Some(version);
        stored.spec = im.spec.clone();
        let written = stored.clone();
        state.spec_writes += 1;
        Ok(WriteOutcome::Written(written))
    }

    async fn update_instance_manager_status(
        &self,
        im: &InstanceManager,
    ) -> Result<WriteOutcome<InstanceManager>, Error> {
        let mut state = self.lock();
        if state.injected_status_conflicts > 0 {
            state.injected_status_conflicts -= 1;
            return Ok(WriteOutcome::Conflict);
        }
        let version = state.bump();
        let Some(stored) = state.instance_managers.get_mut(&im.name_any()) else {
            return Ok(WriteOutcome::Conflict);
        };
        if stored.metadata.resource_version != im.metadata.resource_version {
            return Ok(WriteOutcome::Conflict);
        }
        stored.status = im.status.clone();
        stored.metadata.resource_version = Some(version);
        let written = stored.clone();
        state.status_writes += 1;
        Ok(WriteOutcome::Written(written))
    }

    async fn remove_finalizer(&self, name: &str, finalizer: &str) -> Result<(), Error> {
        let mut state = self.lock();
        let version = state.bump();
        let Some(stored) = state.instance_managers.get_mut(name) else {
            return Ok(());
        };
        if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != finalizer);
        }
        stored.metadata.resource_version = Some(version);
        let terminating = stored.metadata.deletion_timestamp.is_some();
        if terminating && stored.finalizers().is_empty() {
            state.instance_managers.remove(name);
        }
        Ok(())
    }

    async fn get_engine_image(&self, name: &str) -> Result<Option<EngineImage>, Error> {
        Ok(self.lock().engine_images.get(name).cloned())
    }

    async fn get_pod(&self, name: &str) -> Result<Option<Pod>, Error> {
        Ok(self.pod(name))
    }

    async fn create_pod(&self, pod: &Pod) -> Result<Pod, Error> {
        let mut state = self.lock();
        let name = pod.name_any();
        if state.pods.contains_key(&name) {
            return Err(already_exists(&name));
        }
        let mut created = pod.clone();
        created.status = Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        });
        state.pods.insert(name.clone(), created.clone());
        state.created_pods.push(name);
        Ok(created)
    }

    async fn delete_pod(&self, name: &str) -> Result<(), Error> {
        let mut state = self.lock();
        if state.pods.remove(name).is_some() {
            state.deleted_pods.push(name.to_string());
        }
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>, Error> {
        Ok(self.lock().nodes.get(name).cloned())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn instance_manager(name: &str, node: &str, type_: InstanceManagerType) -> InstanceManager {
    let mut im = InstanceManager::new(
        name,
        InstanceManagerSpec {
            node_id: node.to_string(),
            owner_id: String::new(),
            type_,
            engine_image: "ei-1".to_string(),
        },
    );
    im.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    im.metadata.uid = Some(format!("uid-{name}"));
    im
}

pub fn process(name: &str, uuid: &str, version: i64, state: InstanceState) -> InstanceProcess {
    InstanceProcess {
        spec: InstanceProcessSpec {
            name: name.to_string(),
            uuid: uuid.to_string(),
            created_at: None,
            deleted_at: None,
        },
        status: InstanceProcessStatus {
            state,
            resource_version: version,
            ..Default::default()
        },
    }
}

pub fn deleted_process(name: &str, uuid: &str, version: i64) -> InstanceProcess {
    let mut p = process(name, uuid, version, InstanceState::Running);
    p.spec.deleted_at = Some(timestamp());
    p
}

pub fn instances(entries: Vec<InstanceProcess>) -> BTreeMap<String, InstanceProcess> {
    entries
        .into_iter()
        .map(|p| (p.spec.name.clone(), p))
        .collect()
}

pub fn timestamp() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// A pod in `phase` whose single container readiness is `ready`
pub fn pod(name: &str, node: &str, phase: &str, ready: bool, ip: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(DEFAULT_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            containers: vec![Container {
                name: "engine-manager".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            pod_ip: ip.map(str::to_string),
            container_statuses: Some(vec![ContainerStatus {
                name: "engine-manager".to_string(),
                ready,
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub fn node(name: &str, ready: bool, boot_id: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            node_info: Some(NodeSystemInfo {
                boot_id: boot_id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mark an instance manager as being deleted with the storage finalizer attached
pub fn terminating(mut im: InstanceManager) -> InstanceManager {
    im.metadata.deletion_timestamp = Some(Time(timestamp()));
    im.metadata.finalizers = Some(vec![imgr_common::INSTANCE_MANAGER_FINALIZER.to_string()]);
    im
}
