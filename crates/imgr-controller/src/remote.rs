//! Clients for the management API of instance manager daemons
//!
//! Engine managers and replica managers expose the same list/watch contract
//! through different gRPC services. [`ManagerRole`] captures the per-role
//! calls and record conversion; [`RoleClient`] turns any role into the common
//! [`ProcessManagerClient`] the watch and poll code consume.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::ResourceExt;
#[cfg(test)]
use mockall::automock;
use tonic::codec::Streaming;
use tonic::transport::{Channel, Endpoint};

use imgr_common::crd::{
    InstanceManager, InstanceManagerType, InstanceProcess, InstanceProcessSpec,
    InstanceProcessStatus, InstanceState,
};
use imgr_common::Error;
use imgr_proto::engine_manager_service_client::EngineManagerServiceClient;
use imgr_proto::process_manager_service_client::ProcessManagerServiceClient;
use imgr_proto::{EngineResponse, ProcessListRequest, ProcessResponse, ProcessStatus};

pub use crate::merge::ProcessObservation;

/// Stream of process change events from one daemon
pub type ProcessEventStream = BoxStream<'static, Result<ProcessObservation, Error>>;

/// Role-independent access to one daemon's processes
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProcessManagerClient: Send + Sync {
    /// Every process the daemon currently knows, keyed by name
    async fn list(&self) -> Result<BTreeMap<String, ProcessObservation>, Error>;

    /// Subscribe to process change events; dropping the stream unsubscribes
    async fn watch(&self) -> Result<ProcessEventStream, Error>;
}

/// Builds a client for the daemon backing an instance manager
#[cfg_attr(test, automock)]
pub trait ProcessManagerConnector: Send + Sync {
    /// Create a client addressed by the manager's recorded IP
    fn connect(&self, im: &InstanceManager) -> Result<Arc<dyn ProcessManagerClient>, Error>;
}

// =============================================================================
// Role interface
// =============================================================================

/// Per-role gRPC calls and conversion into the common process record
#[async_trait]
pub trait ManagerRole: Send + Sync + 'static {
    /// Wire record for one process
    type Record: Send + 'static;

    /// Unary list call
    async fn list_records(&self) -> Result<Vec<Self::Record>, tonic::Status>;

    /// Server-streaming watch call
    async fn watch_records(&self) -> Result<Streaming<Self::Record>, tonic::Status>;

    /// Convert a wire record into the common observation
    fn observe(record: Self::Record) -> ProcessObservation;
}

/// Replica manager role (`ProcessManagerService`)
pub struct ReplicaRole {
    client: ProcessManagerServiceClient<Channel>,
}

#[async_trait]
impl ManagerRole for ReplicaRole {
    type Record = ProcessResponse;

    async fn list_records(&self) -> Result<Vec<ProcessResponse>, tonic::Status> {
        let response = self
            .client
            .clone()
            .process_list(ProcessListRequest {})
            .await?;
        Ok(response.into_inner().processes.into_values().collect())
    }

    async fn watch_records(&self) -> Result<Streaming<ProcessResponse>, tonic::Status> {
        Ok(self.client.clone().process_watch(()).await?.into_inner())
    }

    fn observe(record: ProcessResponse) -> ProcessObservation {
        let spec = record.spec.unwrap_or_default();
        ProcessObservation {
            process: InstanceProcess {
                spec: process_spec(spec.name, spec.uuid),
                status: process_status(record.status.unwrap_or_default(), None),
            },
            deleted: record.deleted,
        }
    }
}

/// Engine manager role (`EngineManagerService`)
pub struct EngineRole {
    client: EngineManagerServiceClient<Channel>,
}

#[async_trait]
impl ManagerRole for EngineRole {
    type Record = EngineResponse;

    async fn list_records(&self) -> Result<Vec<EngineResponse>, tonic::Status> {
        let response = self.client.clone().engine_list(()).await?;
        Ok(response.into_inner().engines.into_values().collect())
    }

    async fn watch_records(&self) -> Result<Streaming<EngineResponse>, tonic::Status> {
        Ok(self.client.clone().engine_watch(()).await?.into_inner())
    }

    fn observe(record: EngineResponse) -> ProcessObservation {
        let spec = record.spec.unwrap_or_default();
        let status = record.status.unwrap_or_default();
        let endpoint = Some(status.endpoint).filter(|e| !e.is_empty());
        ProcessObservation {
            process: InstanceProcess {
                spec: process_spec(spec.name, spec.uuid),
                status: process_status(status.process_status.unwrap_or_default(), endpoint),
            },
            deleted: record.deleted,
        }
    }
}

fn process_spec(name: String, uuid: String) -> InstanceProcessSpec {
    InstanceProcessSpec {
        name,
        uuid,
        created_at: None,
        deleted_at: None,
    }
}

fn process_status(status: ProcessStatus, endpoint: Option<String>) -> InstanceProcessStatus {
    InstanceProcessStatus {
        state: InstanceState::from_remote(&status.state),
        error_msg: Some(status.error_msg).filter(|m| !m.is_empty()),
        resource_version: status.resource_version,
        port_start: status.port_start,
        port_end: status.port_end,
        endpoint,
    }
}

/// Common client over any manager role
pub struct RoleClient<R> {
    instance_manager: String,
    role: R,
}

impl<R: ManagerRole> RoleClient<R> {
    fn remote_error(&self, status: tonic::Status) -> Error {
        Error::remote_for(
            &self.instance_manager,
            format!("{}: {}", status.code(), status.message()),
        )
    }
}

#[async_trait]
impl<R: ManagerRole> ProcessManagerClient for RoleClient<R> {
    async fn list(&self) -> Result<BTreeMap<String, ProcessObservation>, Error> {
        let records = self
            .role
            .list_records()
            .await
            .map_err(|s| self.remote_error(s))?;
        Ok(records
            .into_iter()
            .map(R::observe)
            .map(|obs| (obs.process.spec.name.clone(), obs))
            .collect())
    }

    async fn watch(&self) -> Result<ProcessEventStream, Error> {
        let stream = self
            .role
            .watch_records()
            .await
            .map_err(|s| self.remote_error(s))?;
        let name = self.instance_manager.clone();
        Ok(stream
            .map(move |item| {
                item.map(R::observe)
                    .map_err(|s| Error::remote_for(&name, format!("{}: {}", s.code(), s.message())))
            })
            .boxed())
    }
}

// =============================================================================
// gRPC connector
// =============================================================================

/// Connects to daemons at `http://<status.ip>:<port>`
#[derive(Clone, Debug)]
pub struct GrpcConnector {
    port: u16,
    connect_timeout: Duration,
}

impl GrpcConnector {
    /// Create a connector for daemons listening on `port`
    pub fn new(port: u16) -> Self {
        Self {
            port,
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Address of the daemon backing `im`
    pub fn address(&self, im: &InstanceManager) -> Result<String, Error> {
        let ip = im
            .ip()
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| Error::validation_for(im.name_any(), "IP was not set"))?;
        Ok(format!("http://{}:{}", ip, self.port))
    }
}

impl ProcessManagerConnector for GrpcConnector {
    fn connect(&self, im: &InstanceManager) -> Result<Arc<dyn ProcessManagerClient>, Error> {
        let name = im.name_any();
        let address = self.address(im)?;
        let channel = Endpoint::from_shared(address)
            .map_err(|e| Error::remote_for(&name, e.to_string()))?
            .connect_timeout(self.connect_timeout)
            .connect_lazy();

        let client: Arc<dyn ProcessManagerClient> = match im.spec.type_ {
            InstanceManagerType::Engine => Arc::new(RoleClient {
                instance_manager: name,
                role: EngineRole {
                    client: EngineManagerServiceClient::new(channel),
                },
            }),
            InstanceManagerType::Replica => Arc::new(RoleClient {
                instance_manager: name,
                role: ReplicaRole {
                    client: ProcessManagerServiceClient::new(channel),
                },
            }),
        };
        Ok(client)
    }
}
