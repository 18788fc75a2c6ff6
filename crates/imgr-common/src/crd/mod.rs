//! Custom Resource Definitions consumed by the instance manager controller
//!
//! The storage system's higher-level manager owns these schemas; the types here
//! mirror the fields this controller reads and writes.

mod engine_image;
mod instance_manager;

pub use engine_image::{EngineImage, EngineImageSpec, EngineImageStatus};
pub use instance_manager::{
    InstanceManager, InstanceManagerSpec, InstanceManagerState, InstanceManagerStatus,
    InstanceManagerType, InstanceProcess, InstanceProcessSpec, InstanceProcessStatus,
    InstanceState,
};
