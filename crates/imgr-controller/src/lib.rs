//! Instance manager controller
//!
//! Keeps each per-node instance manager daemon (engine manager or replica
//! manager) backed by exactly one healthy pod, owned by exactly one
//! controller, and folds the daemon's live process reports into the
//! `InstanceManager` status.
//!
//! # Flow
//!
//! ```text
//! InstanceManager / Pod change ─► Controller queue ─► reconcile
//!                                                      │
//!                    ownership ◄───────────────────────┤
//!                    lifecycle (pod state machine) ◄───┤
//!                                                      ▼
//!                              Running ─► watch (stream) ─┐
//!                                      └► poll (list)  ───┴► merge ─► status write
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod merge;
pub mod ownership;
pub mod pod;
pub mod poll;
pub mod remote;
pub mod runner;
pub mod store;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::ControllerConfig;
pub use controller::{error_policy, reconcile, Context};
pub use imgr_common::{Error, Result};
