//! Error types for backend operations.

use palisade_core::{ServiceName, ServiceUuid};
use thiserror::Error;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while driving the compute backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No service workload exists for the given UUID.
    #[error("service not found: {0}")]
    ServiceNotFound(ServiceUuid),

    /// Registration failed for a service name.
    #[error("failed to register service {name}: {reason}")]
    RegistrationFailed {
        /// The service name that failed to register.
        name: ServiceName,
        /// The reason for the failure.
        reason: String,
    },

    /// The backend could not start a service workload.
    #[error("failed to start service {uuid}: {reason}")]
    StartFailed {
        /// The service UUID.
        uuid: ServiceUuid,
        /// The reason for the failure.
        reason: String,
    },

    /// The backend could not stop a service workload.
    #[error("failed to stop service {uuid}: {reason}")]
    StopFailed {
        /// The service UUID.
        uuid: ServiceUuid,
        /// The reason for the failure.
        reason: String,
    },

    /// The backend could not destroy a service workload.
    #[error("failed to destroy service {uuid}: {reason}")]
    DestroyFailed {
        /// The service UUID.
        uuid: ServiceUuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Command transport failed. A command that ran and exited non-zero is
    /// NOT an error — it is a successful exec carrying the exit code.
    #[error("exec transport failed for service {uuid}: {reason}")]
    ExecFailed {
        /// The service UUID.
        uuid: ServiceUuid,
        /// The reason for the failure.
        reason: String,
    },

    /// Sidecar creation or control failed.
    #[error("sidecar operation failed for service {uuid}: {reason}")]
    SidecarFailed {
        /// The service the sidecar is attached to.
        uuid: ServiceUuid,
        /// The reason for the failure.
        reason: String,
    },

    /// File copy out of a service failed.
    #[error("copy from service {uuid} failed: {reason}")]
    CopyFailed {
        /// The service UUID.
        uuid: ServiceUuid,
        /// The reason for the failure.
        reason: String,
    },

    /// The enclave's address pool is exhausted.
    #[error("no free IP addresses remain in the enclave address pool")]
    IpPoolExhausted,

    /// The backend is not reachable.
    #[error("backend not connected: {0}")]
    NotConnected(String),

    /// Timeout waiting for a backend condition.
    #[error("timeout waiting for {condition}")]
    Timeout {
        /// The condition that timed out.
        condition: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for engine-specific failures.
    #[error("backend internal error: {0}")]
    Internal(String),
}

impl BackendError {
    /// Creates a registration-failed error.
    pub fn registration_failed(name: ServiceName, reason: impl Into<String>) -> Self {
        Self::RegistrationFailed {
            name,
            reason: reason.into(),
        }
    }

    /// Creates a start-failed error.
    pub fn start_failed(uuid: ServiceUuid, reason: impl Into<String>) -> Self {
        Self::StartFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates a stop-failed error.
    pub fn stop_failed(uuid: ServiceUuid, reason: impl Into<String>) -> Self {
        Self::StopFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates a destroy-failed error.
    pub fn destroy_failed(uuid: ServiceUuid, reason: impl Into<String>) -> Self {
        Self::DestroyFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates an exec-transport-failed error.
    pub fn exec_failed(uuid: ServiceUuid, reason: impl Into<String>) -> Self {
        Self::ExecFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates a sidecar-failed error.
    pub fn sidecar_failed(uuid: ServiceUuid, reason: impl Into<String>) -> Self {
        Self::SidecarFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates a copy-failed error.
    pub fn copy_failed(uuid: ServiceUuid, reason: impl Into<String>) -> Self {
        Self::CopyFailed {
            uuid,
            reason: reason.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(condition: impl Into<String>) -> Self {
        Self::Timeout {
            condition: condition.into(),
        }
    }

    /// Creates an internal backend error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Returns true if retrying the operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::NotConnected(_) | Self::Io(_) | Self::StartFailed { .. }
        )
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ServiceNotFound(_))
    }
}
