//! Error types for the service network core.
//!
//! The taxonomy separates four very different situations:
//!
//! - validation errors, detected before any backend call — no side effects,
//!   nothing to roll back;
//! - backend/infrastructure errors, after which callers must assume the
//!   enclave is in an unknown state and resync;
//! - repository errors, always fatal for the enclosing operation;
//! - internal-bug errors, which indicate a defect in the control plane
//!   itself rather than anything an operator can act on.

use palisade_backend::BackendError;
use palisade_core::{PartitionId, ServiceName};
use thiserror::Error;

use crate::repository::RepositoryError;

/// Result type for service network operations.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors produced by the service network core.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Input rejected before any side effect happened.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No registered service matches the given identifier.
    #[error("no service found for identifier '{0}'")]
    ServiceNotFound(String),

    /// The referenced partition does not exist in the topology.
    #[error("partition '{0}' does not exist")]
    PartitionNotFound(PartitionId),

    /// Attempted to start a service that is already started.
    #[error("service '{0}' is already started")]
    AlreadyStarted(ServiceName),

    /// Partition operations were requested on an enclave that has
    /// partitioning disabled.
    #[error("network partitioning is not enabled for this enclave")]
    PartitioningDisabled,

    /// A service that needs traffic-control updates has no sidecar.
    #[error("service '{0}' needs a traffic-control update but has no networking sidecar")]
    SidecarNotFound(ServiceName),

    /// The backend call itself failed; per-service state is unknown.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The registration repository failed; fatal for the enclosing
    /// operation.
    #[error("registration repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// An outbound HTTP request to a service failed.
    #[error("HTTP request to service failed: {0}")]
    Http(String),

    /// An invariant the control plane maintains was violated.
    #[error("{0}; this is a bug in the control plane")]
    InternalBug(String),
}

impl NetworkError {
    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    /// Creates a service-not-found error from any identifier form.
    pub fn service_not_found(identifier: impl Into<String>) -> Self {
        Self::ServiceNotFound(identifier.into())
    }

    /// Creates an internal-bug error.
    pub fn internal_bug(reason: impl Into<String>) -> Self {
        Self::InternalBug(reason.into())
    }

    /// Returns true if the error was raised before any side effect, so the
    /// caller does not need to resync.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::ServiceNotFound(_)
                | Self::PartitionNotFound(_)
                | Self::AlreadyStarted(_)
                | Self::PartitioningDisabled
        )
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}
