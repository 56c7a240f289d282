//! The backend capability trait.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::io::AsyncWrite;

use palisade_core::{EnclaveUuid, Service, ServiceConfig, ServiceName, ServiceRegistration, ServiceUuid};

use crate::error::{BackendError, Result};
use crate::exec::ExecResult;
use crate::filters::ServiceFilters;
use crate::sidecar::SidecarHandle;

/// Capability interface to the compute backend that hosts service
/// workloads.
///
/// The service network core calls this trait for every side effect it
/// performs against the outside world; it never talks to a container engine
/// directly. Implementations (container engine, Kubernetes) are injected at
/// construction time and must be thread-safe.
///
/// # Bulk result convention
///
/// Bulk operations return `(successes, failures)` maps inside the
/// `Result`. See the crate-level docs for how callers must interpret
/// top-level versus per-identifier errors.
#[async_trait]
pub trait EnclaveBackend: Send + Sync {
    /// Reserves identity (UUID, private IP) for each requested service
    /// name, without starting any workload.
    ///
    /// Returns registrations for the names that could be reserved and
    /// per-name errors for the rest. A name that is already registered in
    /// the enclave must fail.
    async fn register_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_names: HashSet<ServiceName>,
    ) -> Result<(
        HashMap<ServiceName, ServiceRegistration>,
        HashMap<ServiceName, BackendError>,
    )>;

    /// Releases the identity reservations for the given UUIDs.
    async fn unregister_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuids: HashSet<ServiceUuid>,
    ) -> Result<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)>;

    /// Starts workloads for already-registered services.
    ///
    /// Each UUID must correspond to a prior successful registration in the
    /// same enclave.
    async fn start_registered_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        configs_by_uuid: HashMap<ServiceUuid, ServiceConfig>,
    ) -> Result<(
        HashMap<ServiceUuid, Service>,
        HashMap<ServiceUuid, BackendError>,
    )>;

    /// Stops the workloads matching the filters, preserving containers (and
    /// their logs).
    async fn stop_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)>;

    /// Destroys the workloads matching the filters, removing containers
    /// entirely.
    async fn destroy_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)>;

    /// Returns the runtime objects for services matching the filters.
    async fn get_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> Result<HashMap<ServiceUuid, Service>>;

    /// Runs one command inside each of the given services' containers.
    ///
    /// A command that runs and exits non-zero is a success carrying its
    /// exit code; only transport failures land in the error map.
    async fn run_user_service_exec_commands(
        &self,
        enclave_uuid: &EnclaveUuid,
        commands_by_uuid: HashMap<ServiceUuid, Vec<String>>,
    ) -> Result<(
        HashMap<ServiceUuid, ExecResult>,
        HashMap<ServiceUuid, BackendError>,
    )>;

    /// Creates a networking sidecar attached to the given service.
    async fn create_networking_sidecar(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
    ) -> Result<SidecarHandle>;

    /// Runs one command inside each of the given services' sidecars.
    async fn run_networking_sidecar_exec_commands(
        &self,
        enclave_uuid: &EnclaveUuid,
        commands_by_uuid: HashMap<ServiceUuid, Vec<String>>,
    ) -> Result<(
        HashMap<ServiceUuid, ExecResult>,
        HashMap<ServiceUuid, BackendError>,
    )>;

    /// Stops the sidecars attached to the given services.
    async fn stop_networking_sidecars(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuids: HashSet<ServiceUuid>,
    ) -> Result<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)>;

    /// Streams a TAR of `src_path` from inside the service's container into
    /// `output`.
    async fn copy_files_from_user_service(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
        src_path: &str,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;
}

/// A shared, dynamically-dispatched backend.
pub type BoxedBackend = Arc<dyn EnclaveBackend>;
