//! Handles to networking sidecar containers.

use palisade_core::{EnclaveUuid, ServiceUuid};
use serde::{Deserialize, Serialize};

/// Handle to a networking sidecar container created by the backend.
///
/// A sidecar is a helper container sharing its service's network namespace;
/// the control plane commands it (through
/// [`EnclaveBackend::run_networking_sidecar_exec_commands`]) to apply
/// traffic-control rules on the service's network path. Sidecars are
/// created alongside service start and destroyed alongside service removal.
///
/// [`EnclaveBackend::run_networking_sidecar_exec_commands`]:
///     crate::traits::EnclaveBackend::run_networking_sidecar_exec_commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarHandle {
    service_uuid: ServiceUuid,
    enclave_uuid: EnclaveUuid,
}

impl SidecarHandle {
    /// Creates a new sidecar handle.
    pub fn new(service_uuid: ServiceUuid, enclave_uuid: EnclaveUuid) -> Self {
        Self {
            service_uuid,
            enclave_uuid,
        }
    }

    /// Returns the UUID of the service this sidecar is attached to.
    pub fn service_uuid(&self) -> &ServiceUuid {
        &self.service_uuid
    }

    /// Returns the enclave this sidecar belongs to.
    pub fn enclave_uuid(&self) -> &EnclaveUuid {
        &self.enclave_uuid
    }
}
