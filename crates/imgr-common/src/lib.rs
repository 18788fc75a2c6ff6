//! Common types for the instance manager controller: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the storage system's control plane runs in unless overridden
pub const DEFAULT_NAMESPACE: &str = "longhorn-system";

/// Port every instance manager daemon listens on for its management API
pub const DEFAULT_MANAGER_PORT: u16 = 8500;

/// Finalizer placed on instance managers by the higher-level storage manager
/// and removed by this controller once cleanup has finished
pub const INSTANCE_MANAGER_FINALIZER: &str = "longhorn.io";

/// Error message recorded on every tracked process when its manager is torn down
pub const INSTANCE_MANAGER_ERRORED_MSG: &str = "Instance Manager errored";
