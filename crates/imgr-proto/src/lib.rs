//! Protocol buffer definitions for the instance manager daemons.
//!
//! Each daemon exposes one role-specific service on its management port:
//!
//! - [`ProcessManagerService`](process_manager_service_client): replica managers
//! - [`EngineManagerService`](engine_manager_service_client): engine managers
//!
//! Both offer a unary `List` returning every process the daemon knows, keyed
//! by name, and a server-streaming `Watch` that emits one message per process
//! change. Every process record carries a UUID, a monotonically increasing
//! resource version and a `deleted` flag.
//!
//! ```rust,ignore
//! use imgr_proto::process_manager_service_client::ProcessManagerServiceClient;
//!
//! let mut client = ProcessManagerServiceClient::connect("http://10.0.0.7:8500").await?;
//! let processes = client.process_list(ProcessListRequest {}).await?.into_inner();
//! ```

// Generated protobuf code doesn't have docs
#![allow(missing_docs)]

/// Generated protobuf types from imrpc.proto
pub mod imrpc {
    include!("generated/imrpc.rs");
}

pub use imrpc::*;
