//! Error types for the instance manager controller
//!
//! Errors carry the name of the instance manager they concern wherever one is
//! known, so a failed reconciliation can always be traced back to a resource.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for instance manager operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource is structurally unusable (missing field, bad reference)
    #[error("validation error for {instance_manager}: {message}")]
    Validation {
        /// Name of the offending instance manager
        instance_manager: String,
        /// Description of what's invalid
        message: String,
    },

    /// The remote instance manager daemon could not be reached or refused a call
    #[error("remote error for {instance_manager}: {message}")]
    Remote {
        /// Name of the instance manager whose daemon failed
        instance_manager: String,
        /// Description of what failed
        message: String,
    },

    /// A state the controller should never observe; reported as a bug
    #[error("BUG: invariant violated for {instance_manager}: {message}")]
    Invariant {
        /// Name of the instance manager in the unexpected state
        instance_manager: String,
        /// Description of the violated expectation
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "watch")
        context: String,
    },

    /// Any error raised while synchronizing one instance manager
    #[error("fail to sync instance manager for {instance_manager}: {source}")]
    Sync {
        /// Name of the instance manager being synchronized
        instance_manager: String,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a validation error without instance manager context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            instance_manager: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a specific instance manager
    pub fn validation_for(instance_manager: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            instance_manager: instance_manager.into(),
            message: msg.into(),
        }
    }

    /// Create a remote daemon error for a specific instance manager
    pub fn remote_for(instance_manager: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Remote {
            instance_manager: instance_manager.into(),
            message: msg.into(),
        }
    }

    /// Create an invariant violation for a specific instance manager
    pub fn invariant_for(instance_manager: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Invariant {
            instance_manager: instance_manager.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap an error with the name of the instance manager being synchronized
    ///
    /// Already-wrapped errors are returned untouched so the context is never doubled.
    pub fn sync_for(instance_manager: impl Into<String>, source: Error) -> Self {
        match source {
            Error::Sync { .. } => source,
            other => Self::Sync {
                instance_manager: instance_manager.into(),
                source: Box::new(other),
            },
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and invariant errors need a state change
    /// before another attempt can succeed. Remote and transient Kubernetes
    /// failures are retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // 409 is an optimistic-concurrency conflict and is always worth another read
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
                )
            }
            Error::Validation { .. } => false,
            Error::Remote { .. } => true,
            Error::Invariant { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            Error::Sync { source, .. } => source.is_retryable(),
        }
    }

    /// Whether the root cause is a failure talking to a remote daemon
    pub fn is_remote(&self) -> bool {
        match self {
            Error::Remote { .. } => true,
            Error::Sync { source, .. } => source.is_remote(),
            _ => false,
        }
    }

    /// Get the instance manager name if this error is associated with one
    pub fn instance_manager(&self) -> Option<&str> {
        match self {
            Error::Validation {
                instance_manager, ..
            }
            | Error::Remote {
                instance_manager, ..
            }
            | Error::Invariant {
                instance_manager, ..
            }
            | Error::Sync {
                instance_manager, ..
            } => Some(instance_manager),
            Error::Kube { .. } | Error::Serialization { .. } | Error::Internal { .. } => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
