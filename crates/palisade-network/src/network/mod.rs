//! The service network orchestrator.
//!
//! [`DefaultServiceNetwork`] owns the authoritative picture of one enclave
//! and drives every lifecycle change through the backend: registering
//! services, starting them in parallel batches, attaching networking
//! sidecars, enforcing partition connectivity, and tearing everything down
//! again. Batched operations are all-or-nothing at batch granularity:
//! whatever part of a failed batch already succeeded is destroyed and
//! unregistered before the call returns.
//!
//! # Locking
//!
//! All state lives behind a single mutex held for the full duration of
//! every operation, backend round-trips included. Two operations on the
//! same enclave never interleave; concurrency exists only inside one
//! operation via the parallelizer. This includes exec calls — a
//! long-running command blocks every other operation on the enclave, a
//! deliberate simplicity-over-throughput tradeoff.
//!
//! # Rollback
//!
//! Cleanup is asynchronous backend work, so it cannot live in `Drop`
//! guards. Instead each batch operation records what it completed and
//! funnels every non-success exit through explicit rollback helpers that
//! the success path skips. When rollback cleanup itself fails, the failure
//! is logged with operator instructions and never retried automatically —
//! endless cleanup retries would only mask a stuck backend.

#[cfg(test)]
mod test_support;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use palisade_backend::{BoxedBackend, ExecResult, ServiceFilters};
use palisade_core::{
    EnclaveUuid, PartitionId, Service, ServiceConfig, ServiceIdentifiers, ServiceName,
    ServiceRegistration, ServiceStatus, ServiceUuid,
};

use crate::error::{NetworkError, Result};
use crate::parallelizer::{
    run_operations_in_parallel, Operation, OperationId, DEFAULT_MAX_CONCURRENT_OPERATIONS,
};
use crate::repository::{RepositoryError, ServiceRegistrationRepository};
use crate::sidecar::{SidecarManager, TrafficControlledSidecar};
use crate::topology::{PartitionConnection, PartitionConnectionId, PartitionTopology};

// Container engines reject memory limits below 6 megabytes.
const MIN_MEMORY_ALLOCATION_MEGABYTES: u64 = 6;

const SINGLE_SERVICE_BATCH_SIZE: usize = 1;

/// The interface the instruction layer drives the enclave through.
///
/// Implemented by [`DefaultServiceNetwork`]. Artifact storage pass-through
/// (uploads, template rendering) belongs to the storage collaborator and is
/// not part of this interface.
#[async_trait]
pub trait ServiceNetwork: Send + Sync {
    /// Registers and starts a single service. Convenience wrapper around
    /// [`add_services`](Self::add_services) with a batch of one.
    async fn add_service(&self, name: ServiceName, config: ServiceConfig) -> Result<Service>;

    /// Registers and starts a batch of services, all-or-nothing.
    ///
    /// On full success returns the started services and an empty failure
    /// map. On any failure, everything this call registered or started is
    /// rolled back and only the failure map is populated; services that
    /// were already running before the call are never touched.
    async fn add_services(
        &self,
        configs: HashMap<ServiceName, ServiceConfig>,
        batch_size: usize,
    ) -> Result<(HashMap<ServiceName, Service>, HashMap<ServiceName, NetworkError>)>;

    /// Replaces services with new configurations by destroying the old
    /// instance and starting a fresh one.
    ///
    /// There is no in-place reconfiguration and no rollback of the
    /// destruction: when re-creation fails the old instance is already
    /// gone, the service is left registered-only, and the failure is
    /// surfaced per service.
    async fn update_services(
        &self,
        configs: HashMap<ServiceName, ServiceConfig>,
        batch_size: usize,
    ) -> Result<(HashMap<ServiceName, Service>, HashMap<ServiceName, NetworkError>)>;

    /// Stops a service's workload (preserving its logs), removes its
    /// sidecar, and deletes its registration. Returns the retired UUID.
    ///
    /// Not reversible: re-adding the name produces a new UUID.
    async fn remove_service(&self, identifier: &str) -> Result<ServiceUuid>;

    /// Starts a single already-registered service.
    async fn start_service(&self, identifier: &str) -> Result<()>;

    /// Starts already-registered services in bulk.
    ///
    /// Per-service accounting: a failed service does not roll back the
    /// others. Starting an already-started service fails with
    /// [`NetworkError::AlreadyStarted`].
    async fn start_services(
        &self,
        identifiers: Vec<String>,
    ) -> Result<(HashSet<ServiceName>, HashMap<ServiceName, NetworkError>)>;

    /// Stops a single started service.
    async fn stop_service(&self, identifier: &str) -> Result<()>;

    /// Stops started services in bulk. Sidecars persist across stop/start.
    async fn stop_services(
        &self,
        identifiers: Vec<String>,
    ) -> Result<(HashSet<ServiceName>, HashMap<ServiceName, NetworkError>)>;

    /// Runs a command synchronously inside one service's container.
    ///
    /// Holds the enclave lock for the whole run; see the module docs.
    async fn run_exec(&self, identifier: &str, command: Vec<String>) -> Result<ExecResult>;

    /// Runs commands inside many services' containers, fanned out on the
    /// parallelizer.
    async fn run_execs(
        &self,
        commands_by_identifier: HashMap<String, Vec<String>>,
    ) -> Result<(HashMap<ServiceName, ExecResult>, HashMap<ServiceName, NetworkError>)>;

    /// Issues an HTTP request against one of the service's private ports.
    async fn http_request_service(
        &self,
        identifier: &str,
        port_id: &str,
        method: &str,
        content_type: Option<&str>,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<reqwest::Response>;

    /// Returns the runtime view of one service, with the repository's
    /// lifecycle status overlaid.
    async fn get_service(&self, identifier: &str) -> Result<Service>;

    /// Returns the runtime view of every started service.
    async fn get_services(&self) -> Result<Vec<Service>>;

    /// Returns the names of all currently-registered services.
    async fn get_service_names(&self) -> Result<HashSet<ServiceName>>;

    /// Returns every identifier this enclave has ever created, including
    /// those of removed services.
    async fn get_existing_and_historical_service_identifiers(
        &self,
    ) -> Result<Vec<ServiceIdentifiers>>;

    /// Streams a TAR of `src_path` from inside the service into `output`.
    async fn copy_files_from_service(
        &self,
        identifier: &str,
        src_path: &str,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()>;

    /// Returns true if partition operations are enabled for this enclave.
    fn is_network_partitioning_enabled(&self) -> bool;

    /// Sets an explicit connection override between two partitions and
    /// pushes the resulting rules to every sidecar.
    ///
    /// Referenced partitions are created on the fly. If pushing rules
    /// fails, the topology mutation (including any partition created by
    /// this call) is rolled back before the error is returned, so topology
    /// state and applied rules never diverge after a failed call.
    async fn set_connection(
        &self,
        partition1: PartitionId,
        partition2: PartitionId,
        connection: PartitionConnection,
    ) -> Result<()>;

    /// Removes the override between two partitions, reverting the pair to
    /// the default connection. Same rollback guarantee as
    /// [`set_connection`](Self::set_connection).
    async fn unset_connection(
        &self,
        partition1: PartitionId,
        partition2: PartitionId,
    ) -> Result<()>;

    /// Replaces the default connection and pushes updated rules everywhere.
    /// Same rollback guarantee as [`set_connection`](Self::set_connection).
    async fn set_default_connection(&self, connection: PartitionConnection) -> Result<()>;

    /// Atomically replaces the whole partition topology and pushes updated
    /// rules everywhere. Same rollback guarantee as
    /// [`set_connection`](Self::set_connection).
    async fn repartition(
        &self,
        partition_services: HashMap<PartitionId, HashSet<ServiceName>>,
        partition_connections: HashMap<PartitionConnectionId, PartitionConnection>,
        default_connection: PartitionConnection,
    ) -> Result<()>;
}

// Everything a started-but-not-yet-committed service carries between the
// parallel start phase and either commit or rollback.
struct StartedService {
    service: Service,
    sidecar: Option<TrafficControlledSidecar>,
}

struct NetworkState {
    topology: PartitionTopology,
    repository: ServiceRegistrationRepository,
    sidecars: HashMap<ServiceName, TrafficControlledSidecar>,
}

/// The default, repository-backed service network implementation.
///
/// The topology and sidecar maps are in-memory only and start empty on
/// construction; the repository is the only state shared across process
/// restarts.
pub struct DefaultServiceNetwork {
    enclave_uuid: EnclaveUuid,
    is_partitioning_enabled: bool,
    backend: BoxedBackend,
    inner: Mutex<NetworkState>,
}

impl DefaultServiceNetwork {
    /// Creates the service network for one enclave.
    pub fn new(
        enclave_uuid: EnclaveUuid,
        is_partitioning_enabled: bool,
        backend: BoxedBackend,
        repository: ServiceRegistrationRepository,
    ) -> Self {
        Self {
            enclave_uuid,
            is_partitioning_enabled,
            backend,
            inner: Mutex::new(NetworkState {
                topology: PartitionTopology::new(PartitionConnection::allowed()),
                repository,
                sidecars: HashMap::new(),
            }),
        }
    }

    fn sidecar_manager(&self) -> SidecarManager {
        SidecarManager::new(self.backend.clone(), self.enclave_uuid.clone())
    }

    // Persists and places one backend registration. Partitions referenced
    // by the config but absent from the topology are created on the fly
    // and recorded for rollback.
    fn place_registration(
        &self,
        state: &mut NetworkState,
        registration: &ServiceRegistration,
        subnetwork: Option<PartitionId>,
        created_partitions: &mut Vec<PartitionId>,
    ) -> Result<()> {
        let partition = subnetwork.unwrap_or_else(PartitionId::default_partition);
        if !state.topology.has_partition(&partition) {
            debug!(
                partition = %partition,
                service = %registration.name(),
                "Partition does not exist yet; creating it"
            );
            state
                .topology
                .create_empty_partition_with_default_connection(partition.clone())?;
            created_partitions.push(partition.clone());
        }
        state.repository.create(registration)?;
        if let Err(err) = state
            .topology
            .add_service(registration.name().clone(), partition)
        {
            if let Err(delete_err) = state.repository.delete(registration.name()) {
                error!(
                    service = %registration.name(),
                    error = %delete_err,
                    "Failed to delete the repository record of a service whose topology placement failed; delete it manually"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    // Destroys the containers and sidecars of services that started inside
    // a batch that subsequently failed.
    async fn rollback_started(&self, started: &mut HashMap<ServiceName, StartedService>) {
        for (name, started_service) in started.drain() {
            let uuid = started_service.service.registration().uuid().clone();
            destroy_backend_service(&self.backend, &self.enclave_uuid, &name, &uuid).await;
            if let Some(sidecar) = started_service.sidecar {
                if let Err(err) = self.sidecar_manager().remove(&sidecar).await {
                    error!(
                        service = %name,
                        error = %err,
                        "Failed to stop the networking sidecar while rolling back a batch; stop it manually"
                    );
                }
            }
        }
    }

    // Reverses the registration phase: topology, repository, and backend
    // reservations, plus partitions this batch created.
    async fn rollback_registrations(
        &self,
        state: &mut NetworkState,
        registered: &HashMap<ServiceName, ServiceRegistration>,
        created_partitions: &[PartitionId],
    ) {
        for (name, registration) in registered {
            state.topology.remove_service(name);
            if let Err(err) = state.repository.delete(name) {
                error!(
                    service = %name,
                    error = %err,
                    "Failed to delete the repository record while rolling back a batch; delete it manually"
                );
            }
            unregister_backend_registration(&self.backend, &self.enclave_uuid, registration).await;
        }
        for partition in created_partitions {
            if let Err(err) = state.topology.remove_partition(partition) {
                warn!(
                    partition = %partition,
                    error = %err,
                    "Could not remove a partition created by the failed batch; it stays in the topology"
                );
            }
        }
    }
}

#[async_trait]
impl ServiceNetwork for DefaultServiceNetwork {
    async fn add_service(&self, name: ServiceName, config: ServiceConfig) -> Result<Service> {
        let mut configs = HashMap::new();
        configs.insert(name.clone(), config);
        let (mut started, mut failed) = self
            .add_services(configs, SINGLE_SERVICE_BATCH_SIZE)
            .await?;
        if let Some(err) = failed.remove(&name) {
            return Err(err);
        }
        started.remove(&name).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "service '{name}' was reported neither started nor failed"
            ))
        })
    }

    async fn add_services(
        &self,
        configs: HashMap<ServiceName, ServiceConfig>,
        batch_size: usize,
    ) -> Result<(HashMap<ServiceName, Service>, HashMap<ServiceName, NetworkError>)> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        if configs.is_empty() {
            return Ok((HashMap::new(), HashMap::new()));
        }

        let mut failures: HashMap<ServiceName, NetworkError> = HashMap::new();
        let preexisting = state.repository.get_all_service_names()?;

        // Cheap validation before committing to anything expensive.
        let mut to_register: HashMap<ServiceName, ServiceConfig> = HashMap::new();
        for (name, config) in configs.iter() {
            if name.is_blank() {
                failures.insert(
                    name.clone(),
                    NetworkError::validation("service name must not be empty or whitespace"),
                );
                continue;
            }
            if preexisting.contains(name) {
                failures.insert(
                    name.clone(),
                    NetworkError::validation(format!("service '{name}' is already registered")),
                );
                continue;
            }
            to_register.insert(name.clone(), config.clone());
        }

        // Registration phase. Individual failures are recorded without
        // aborting the other registrations.
        let mut registered: HashMap<ServiceName, ServiceRegistration> = HashMap::new();
        let mut created_partitions: Vec<PartitionId> = Vec::new();
        if !to_register.is_empty() {
            let names: HashSet<ServiceName> = to_register.keys().cloned().collect();
            let (backend_registrations, backend_failures) = self
                .backend
                .register_user_services(&self.enclave_uuid, names)
                .await?;
            for (name, err) in backend_failures {
                failures.insert(name, err.into());
            }
            for (name, registration) in backend_registrations {
                let subnetwork = to_register[&name].subnetwork.clone();
                match self.place_registration(state, &registration, subnetwork, &mut created_partitions)
                {
                    Ok(()) => {
                        registered.insert(name, registration);
                    }
                    Err(err) => {
                        unregister_backend_registration(
                            &self.backend,
                            &self.enclave_uuid,
                            &registration,
                        )
                        .await;
                        failures.insert(name, err);
                    }
                }
            }
        }

        // Any registration failure fails the whole batch before a single
        // start call is issued.
        if !failures.is_empty() {
            self.rollback_registrations(state, &registered, &created_partitions)
                .await;
            return Ok((HashMap::new(), failures));
        }

        // Refresh the rules of services that were already running so the
        // new nodes come up already partitioned from them.
        if self.is_partitioning_enabled && !preexisting.is_empty() {
            if let Err(err) = refresh_connections(state, Some(&preexisting)).await {
                self.rollback_registrations(state, &registered, &created_partitions)
                    .await;
                return Err(err);
            }
        }

        // Parallel start phase: one operation per service, bounded by the
        // caller's batch size.
        let connection_configs = state.topology.service_connection_configs()?;
        let registrations_by_name = state.repository.get_all()?;
        let mut operations: HashMap<OperationId, Operation<StartedService>> = HashMap::new();
        let mut names_by_operation: HashMap<OperationId, ServiceName> = HashMap::new();
        for (name, registration) in &registered {
            let peer_configs = connection_configs.get(name).cloned().unwrap_or_default();
            let rules = match resolve_peers_to_ips(&peer_configs, &registrations_by_name, name) {
                Ok(rules) => rules,
                Err(err) => {
                    self.rollback_registrations(state, &registered, &created_partitions)
                        .await;
                    return Err(err);
                }
            };
            let operation_id = OperationId::new(registration.uuid().as_str());
            names_by_operation.insert(operation_id.clone(), name.clone());
            operations.insert(
                operation_id,
                build_start_operation(
                    self.backend.clone(),
                    self.enclave_uuid.clone(),
                    name.clone(),
                    registration.uuid().clone(),
                    to_register[name].clone(),
                    self.is_partitioning_enabled,
                    rules,
                ),
            );
        }
        let (started_by_operation, failed_by_operation) =
            run_operations_in_parallel(operations, batch_size).await;

        let mut started: HashMap<ServiceName, StartedService> = HashMap::new();
        for (operation_id, started_service) in started_by_operation {
            started.insert(names_by_operation[&operation_id].clone(), started_service);
        }
        for (operation_id, err) in failed_by_operation {
            failures.insert(names_by_operation[&operation_id].clone(), err);
        }

        if !failures.is_empty() {
            info!(
                failed = failures.len(),
                started = started.len(),
                "Service batch partially failed; rolling back the whole batch"
            );
            self.rollback_started(&mut started).await;
            self.rollback_registrations(state, &registered, &created_partitions)
                .await;
            return Ok((HashMap::new(), failures));
        }

        if started.len() != configs.len() {
            self.rollback_started(&mut started).await;
            self.rollback_registrations(state, &registered, &created_partitions)
                .await;
            return Err(NetworkError::internal_bug(format!(
                "the number of started services ({}) does not match the number requested ({})",
                started.len(),
                configs.len()
            )));
        }

        // Persist lifecycle state before committing anything in memory.
        let started_names: Vec<ServiceName> = started.keys().cloned().collect();
        for name in &started_names {
            if let Err(err) = state.repository.update_status_and_config(
                name,
                ServiceStatus::Started,
                Some(to_register[name].clone()),
            ) {
                self.rollback_started(&mut started).await;
                self.rollback_registrations(state, &registered, &created_partitions)
                    .await;
                return Err(err.into());
            }
        }

        let mut result = HashMap::new();
        for (name, started_service) in started {
            if let Some(sidecar) = started_service.sidecar {
                state.sidecars.insert(name.clone(), sidecar);
            }
            let identifiers =
                ServiceIdentifiers::from_registration(started_service.service.registration());
            if let Err(err) = state.repository.append_historical_identifier(&identifiers) {
                warn!(service = %name, error = %err, "Failed to append to the historical identifiers ledger");
            }
            let mut service = started_service.service;
            service.overlay_status(ServiceStatus::Started);
            info!(service = %name, uuid = %service.registration().uuid(), "Service started");
            result.insert(name, service);
        }
        Ok((result, HashMap::new()))
    }

    async fn update_services(
        &self,
        configs: HashMap<ServiceName, ServiceConfig>,
        batch_size: usize,
    ) -> Result<(HashMap<ServiceName, Service>, HashMap<ServiceName, NetworkError>)> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let mut failures: HashMap<ServiceName, NetworkError> = HashMap::new();
        let mut to_recreate: HashMap<ServiceName, (ServiceRegistration, ServiceConfig)> =
            HashMap::new();

        // Removal phase. A destroyed container cannot be un-destroyed:
        // from here on this operation rolls forward, never back.
        for (name, new_config) in configs {
            let registration = match state.repository.get(&name) {
                Ok(registration) => registration,
                Err(RepositoryError::NotFound(_)) => {
                    failures.insert(
                        name.clone(),
                        NetworkError::service_not_found(name.as_str()),
                    );
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            if registration.status() != ServiceStatus::Registered {
                let filters = ServiceFilters::for_uuid(registration.uuid().clone());
                let destroy_result = self
                    .backend
                    .destroy_user_services(&self.enclave_uuid, &filters)
                    .await;
                match destroy_result {
                    Ok((_, mut per_uuid)) => {
                        if let Some(err) = per_uuid.remove(registration.uuid()) {
                            failures.insert(name, err.into());
                            continue;
                        }
                    }
                    Err(err) => {
                        failures.insert(name, err.into());
                        continue;
                    }
                }
            }
            if let Some(sidecar) = state.sidecars.remove(&name) {
                if let Err(err) = self.sidecar_manager().remove(&sidecar).await {
                    warn!(
                        service = %name,
                        error = %err,
                        "Failed to stop the old sidecar while updating; continuing with re-creation"
                    );
                }
            }
            if let Err(err) =
                state
                    .repository
                    .update_status_and_config(&name, ServiceStatus::Registered, None)
            {
                failures.insert(name, err.into());
                continue;
            }

            // Honor a partition change requested by the new config.
            let target_partition = new_config
                .subnetwork
                .clone()
                .unwrap_or_else(PartitionId::default_partition);
            if state.topology.service_partitions().get(&name) != Some(&target_partition) {
                if !state.topology.has_partition(&target_partition) {
                    if let Err(err) = state
                        .topology
                        .create_empty_partition_with_default_connection(target_partition.clone())
                    {
                        failures.insert(name, err);
                        continue;
                    }
                }
                if let Err(err) = state.topology.move_service(&name, target_partition) {
                    failures.insert(name, err);
                    continue;
                }
            }
            to_recreate.insert(name, (registration, new_config));
        }

        if to_recreate.is_empty() {
            return Ok((HashMap::new(), failures));
        }

        // Peers may have watched partitions change; refresh them before the
        // replacements come up.
        if self.is_partitioning_enabled {
            let peers: HashSet<ServiceName> = state
                .sidecars
                .keys()
                .filter(|name| !to_recreate.contains_key(*name))
                .cloned()
                .collect();
            if !peers.is_empty() {
                refresh_connections(state, Some(&peers)).await?;
            }
        }

        // Re-creation phase: the same pipeline new services go through.
        let connection_configs = state.topology.service_connection_configs()?;
        let registrations_by_name = state.repository.get_all()?;
        let mut operations: HashMap<OperationId, Operation<StartedService>> = HashMap::new();
        let mut names_by_operation: HashMap<OperationId, ServiceName> = HashMap::new();
        for (name, (registration, new_config)) in &to_recreate {
            let peer_configs = connection_configs.get(name).cloned().unwrap_or_default();
            let rules = resolve_peers_to_ips(&peer_configs, &registrations_by_name, name)?;
            let operation_id = OperationId::new(registration.uuid().as_str());
            names_by_operation.insert(operation_id.clone(), name.clone());
            operations.insert(
                operation_id,
                build_start_operation(
                    self.backend.clone(),
                    self.enclave_uuid.clone(),
                    name.clone(),
                    registration.uuid().clone(),
                    new_config.clone(),
                    self.is_partitioning_enabled,
                    rules,
                ),
            );
        }
        let (started_by_operation, failed_by_operation) =
            run_operations_in_parallel(operations, batch_size).await;

        for (operation_id, err) in failed_by_operation {
            let name = names_by_operation[&operation_id].clone();
            warn!(
                service = %name,
                error = %err,
                "Old instance destroyed but the replacement did not come up; service is left registered-only"
            );
            failures.insert(name, err);
        }

        let mut result = HashMap::new();
        for (operation_id, started_service) in started_by_operation {
            let name = names_by_operation[&operation_id].clone();
            let (_, new_config) = &to_recreate[&name];
            if let Err(err) = state.repository.update_status_and_config(
                &name,
                ServiceStatus::Started,
                Some(new_config.clone()),
            ) {
                // Bookkeeping failed after the replacement came up; tear it
                // down so books and backend agree the service is down.
                let uuid = started_service.service.registration().uuid().clone();
                destroy_backend_service(&self.backend, &self.enclave_uuid, &name, &uuid).await;
                if let Some(sidecar) = started_service.sidecar {
                    if let Err(sidecar_err) = self.sidecar_manager().remove(&sidecar).await {
                        error!(service = %name, error = %sidecar_err, "Failed to stop the replacement's sidecar; stop it manually");
                    }
                }
                failures.insert(name, err.into());
                continue;
            }
            if let Some(sidecar) = started_service.sidecar {
                state.sidecars.insert(name.clone(), sidecar);
            }
            let mut service = started_service.service;
            service.overlay_status(ServiceStatus::Started);
            info!(service = %name, "Service updated");
            result.insert(name, service);
        }
        Ok((result, failures))
    }

    async fn remove_service(&self, identifier: &str) -> Result<ServiceUuid> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let registrations = state.repository.get_all()?;
        let name = resolve_service_name(&registrations, identifier)?;
        let registration = &registrations[&name];
        let uuid = registration.uuid().clone();

        let partition = state.topology.service_partitions().get(&name).cloned();
        state.topology.remove_service(&name);
        if let Some(partition) = partition {
            if !partition.is_default()
                && state
                    .topology
                    .partition_services()
                    .get(&partition)
                    .is_some_and(HashSet::is_empty)
            {
                if let Err(err) = state.topology.remove_partition(&partition) {
                    warn!(
                        partition = %partition,
                        error = %err,
                        "Could not remove the partition left empty by the removed service"
                    );
                }
            }
        }
        state.repository.delete(&name)?;

        // Stop rather than destroy, so the service's logs stay around.
        let filters = ServiceFilters::for_uuid(uuid.clone());
        let (_, mut per_uuid) = self
            .backend
            .stop_user_services(&self.enclave_uuid, &filters)
            .await?;
        if let Some(err) = per_uuid.remove(&uuid) {
            return Err(err.into());
        }

        if let Some(sidecar) = state.sidecars.remove(&name) {
            // Peer rules still referencing this IP are harmless: nothing
            // answers on it, and every sidecar's rules get fully replaced
            // on the next add or repartition call.
            self.sidecar_manager().remove(&sidecar).await?;
        }

        info!(service = %name, uuid = %uuid, "Service removed");
        Ok(uuid)
    }

    async fn start_service(&self, identifier: &str) -> Result<()> {
        let (_, mut failed) = self.start_services(vec![identifier.to_string()]).await?;
        if let Some((_, err)) = failed.drain().next() {
            return Err(err);
        }
        Ok(())
    }

    async fn start_services(
        &self,
        identifiers: Vec<String>,
    ) -> Result<(HashSet<ServiceName>, HashMap<ServiceName, NetworkError>)> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let registrations = state.repository.get_all()?;
        let mut failures: HashMap<ServiceName, NetworkError> = HashMap::new();
        let mut to_start: HashMap<ServiceUuid, (ServiceName, ServiceConfig)> = HashMap::new();
        for identifier in identifiers {
            let name = match resolve_service_name(&registrations, &identifier) {
                Ok(name) => name,
                Err(err) => {
                    failures.insert(ServiceName::new(identifier), err);
                    continue;
                }
            };
            let registration = &registrations[&name];
            if registration.status() == ServiceStatus::Started {
                failures.insert(name.clone(), NetworkError::AlreadyStarted(name));
                continue;
            }
            let Some(config) = registration.config().cloned() else {
                failures.insert(
                    name.clone(),
                    NetworkError::validation(format!(
                        "service '{name}' has no stored config; it was registered but never started"
                    )),
                );
                continue;
            };
            to_start.insert(registration.uuid().clone(), (name, config));
        }
        if to_start.is_empty() {
            return Ok((HashSet::new(), failures));
        }

        let configs: HashMap<ServiceUuid, ServiceConfig> = to_start
            .iter()
            .map(|(uuid, (_, config))| (uuid.clone(), config.clone()))
            .collect();
        let (started_uuids, mut failed_uuids) = self
            .backend
            .start_registered_user_services(&self.enclave_uuid, configs)
            .await?;

        let mut succeeded = HashSet::new();
        for (uuid, (name, _)) in to_start {
            if let Some(err) = failed_uuids.remove(&uuid) {
                failures.insert(name, err.into());
                continue;
            }
            if !started_uuids.contains_key(&uuid) {
                failures.insert(
                    name.clone(),
                    NetworkError::internal_bug(format!(
                        "service '{name}' was reported neither started nor failed"
                    )),
                );
                continue;
            }
            match state.repository.update_status(&name, ServiceStatus::Started) {
                Ok(()) => {
                    info!(service = %name, "Service started");
                    succeeded.insert(name);
                }
                Err(err) => {
                    // Books could not record the start; bring the backend
                    // back in line with the books.
                    let filters = ServiceFilters::for_uuid(uuid.clone());
                    if let Err(stop_err) = self
                        .backend
                        .stop_user_services(&self.enclave_uuid, &filters)
                        .await
                    {
                        error!(
                            service = %name,
                            error = %stop_err,
                            "Failed to stop a service whose start could not be recorded; stop it manually"
                        );
                    }
                    failures.insert(name, err.into());
                }
            }
        }
        Ok((succeeded, failures))
    }

    async fn stop_service(&self, identifier: &str) -> Result<()> {
        let (_, mut failed) = self.stop_services(vec![identifier.to_string()]).await?;
        if let Some((_, err)) = failed.drain().next() {
            return Err(err);
        }
        Ok(())
    }

    async fn stop_services(
        &self,
        identifiers: Vec<String>,
    ) -> Result<(HashSet<ServiceName>, HashMap<ServiceName, NetworkError>)> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let registrations = state.repository.get_all()?;
        let mut failures: HashMap<ServiceName, NetworkError> = HashMap::new();
        let mut to_stop: HashMap<ServiceUuid, ServiceName> = HashMap::new();
        for identifier in identifiers {
            let name = match resolve_service_name(&registrations, &identifier) {
                Ok(name) => name,
                Err(err) => {
                    failures.insert(ServiceName::new(identifier), err);
                    continue;
                }
            };
            let registration = &registrations[&name];
            if registration.status() != ServiceStatus::Started {
                failures.insert(
                    name.clone(),
                    NetworkError::validation(format!(
                        "service '{name}' is not started (status: {})",
                        registration.status().as_str()
                    )),
                );
                continue;
            }
            to_stop.insert(registration.uuid().clone(), name);
        }
        if to_stop.is_empty() {
            return Ok((HashSet::new(), failures));
        }

        let filters = ServiceFilters::for_uuids(to_stop.keys().cloned());
        let (_, mut failed_uuids) = self
            .backend
            .stop_user_services(&self.enclave_uuid, &filters)
            .await?;

        let mut succeeded = HashSet::new();
        for (uuid, name) in to_stop {
            if let Some(err) = failed_uuids.remove(&uuid) {
                failures.insert(name, err.into());
                continue;
            }
            match state.repository.update_status(&name, ServiceStatus::Stopped) {
                Ok(()) => {
                    info!(service = %name, "Service stopped");
                    succeeded.insert(name);
                }
                Err(err) => {
                    // Books could not record the stop; restart the backend
                    // workload so reality matches what the books still say.
                    let config = registrations[&name].config().cloned();
                    if let Some(config) = config {
                        let mut configs = HashMap::new();
                        configs.insert(uuid.clone(), config);
                        if let Err(start_err) = self
                            .backend
                            .start_registered_user_services(&self.enclave_uuid, configs)
                            .await
                        {
                            error!(
                                service = %name,
                                error = %start_err,
                                "Failed to restart a service whose stop could not be recorded; resolve manually"
                            );
                        }
                    }
                    failures.insert(name, err.into());
                }
            }
        }
        Ok((succeeded, failures))
    }

    async fn run_exec(&self, identifier: &str, command: Vec<String>) -> Result<ExecResult> {
        // Deliberately holds the enclave lock for the whole run.
        let guard = self.inner.lock().await;
        let registrations = guard.repository.get_all()?;
        let name = resolve_service_name(&registrations, identifier)?;
        let uuid = registrations[&name].uuid().clone();

        let mut commands = HashMap::new();
        commands.insert(uuid.clone(), command);
        let (mut successes, mut failures) = self
            .backend
            .run_user_service_exec_commands(&self.enclave_uuid, commands)
            .await?;
        if let Some(err) = failures.remove(&uuid) {
            return Err(err.into());
        }
        successes.remove(&uuid).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "exec against service '{name}' reported neither result nor error"
            ))
        })
    }

    async fn run_execs(
        &self,
        commands_by_identifier: HashMap<String, Vec<String>>,
    ) -> Result<(HashMap<ServiceName, ExecResult>, HashMap<ServiceName, NetworkError>)> {
        let guard = self.inner.lock().await;
        let registrations = guard.repository.get_all()?;

        let mut failures: HashMap<ServiceName, NetworkError> = HashMap::new();
        let mut operations: HashMap<OperationId, Operation<ExecResult>> = HashMap::new();
        let mut names_by_operation: HashMap<OperationId, ServiceName> = HashMap::new();
        for (identifier, command) in commands_by_identifier {
            let name = match resolve_service_name(&registrations, &identifier) {
                Ok(name) => name,
                Err(err) => {
                    failures.insert(ServiceName::new(identifier), err);
                    continue;
                }
            };
            let uuid = registrations[&name].uuid().clone();
            let backend = self.backend.clone();
            let enclave_uuid = self.enclave_uuid.clone();
            let operation_id = OperationId::new(name.as_str());
            names_by_operation.insert(operation_id.clone(), name.clone());
            operations.insert(
                operation_id,
                Box::pin(async move {
                    let mut commands = HashMap::new();
                    commands.insert(uuid.clone(), command);
                    let (mut successes, mut per_uuid) = backend
                        .run_user_service_exec_commands(&enclave_uuid, commands)
                        .await?;
                    if let Some(err) = per_uuid.remove(&uuid) {
                        return Err(err.into());
                    }
                    successes.remove(&uuid).ok_or_else(|| {
                        NetworkError::internal_bug(format!(
                            "exec against service '{name}' reported neither result nor error"
                        ))
                    })
                }),
            );
        }

        let (successes, operation_failures) =
            run_operations_in_parallel(operations, DEFAULT_MAX_CONCURRENT_OPERATIONS).await;
        let mut results = HashMap::new();
        for (operation_id, result) in successes {
            results.insert(names_by_operation[&operation_id].clone(), result);
        }
        for (operation_id, err) in operation_failures {
            failures.insert(names_by_operation[&operation_id].clone(), err);
        }
        Ok((results, failures))
    }

    async fn http_request_service(
        &self,
        identifier: &str,
        port_id: &str,
        method: &str,
        content_type: Option<&str>,
        endpoint: &str,
        body: Option<String>,
    ) -> Result<reqwest::Response> {
        let service = self.get_service(identifier).await?;
        let port = service.private_ports().get(port_id).ok_or_else(|| {
            NetworkError::validation(format!(
                "service '{identifier}' has no private port with ID '{port_id}'"
            ))
        })?;
        let url = format!(
            "http://{}:{}{}",
            service.registration().private_ip(),
            port.number,
            endpoint
        );
        debug!(url = %url, method = %method, "Issuing HTTP request to service");

        let client = reqwest::Client::new();
        let response = match method {
            "GET" => client.get(&url).send().await?,
            "POST" => {
                let mut request = client.post(&url).body(body.unwrap_or_default());
                if let Some(content_type) = content_type {
                    request = request.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                request.send().await?
            }
            other => {
                return Err(NetworkError::validation(format!(
                    "unsupported HTTP method '{other}'; only GET and POST are supported"
                )))
            }
        };
        Ok(response)
    }

    async fn get_service(&self, identifier: &str) -> Result<Service> {
        let guard = self.inner.lock().await;
        let registrations = guard.repository.get_all()?;
        let name = resolve_service_name(&registrations, identifier)?;
        let registration = &registrations[&name];
        let uuid = registration.uuid().clone();

        let filters = ServiceFilters::for_uuid(uuid.clone());
        let mut matching = self
            .backend
            .get_user_services(&self.enclave_uuid, &filters)
            .await?;
        if matching.is_empty() {
            return Err(NetworkError::validation(format!(
                "a registration exists for service '{name}' but no workload was found; the service was registered but never started"
            )));
        }
        if matching.len() > 1 {
            return Err(NetworkError::internal_bug(format!(
                "found {} service objects matching UUID '{uuid}'",
                matching.len()
            )));
        }
        let mut service = matching.remove(&uuid).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "found exactly one service object but it did not match UUID '{uuid}'"
            ))
        })?;
        service.overlay_status(registration.status());
        Ok(service)
    }

    async fn get_services(&self) -> Result<Vec<Service>> {
        let guard = self.inner.lock().await;
        let registrations = guard.repository.get_all()?;
        if registrations.is_empty() {
            return Ok(Vec::new());
        }

        let statuses_by_uuid: HashMap<ServiceUuid, ServiceStatus> = registrations
            .values()
            .map(|registration| (registration.uuid().clone(), registration.status()))
            .collect();
        let filters = ServiceFilters::for_uuids(statuses_by_uuid.keys().cloned());
        let services = self
            .backend
            .get_user_services(&self.enclave_uuid, &filters)
            .await?;

        let mut result = Vec::with_capacity(services.len());
        for (uuid, mut service) in services {
            if let Some(status) = statuses_by_uuid.get(&uuid) {
                service.overlay_status(*status);
            }
            result.push(service);
        }
        Ok(result)
    }

    async fn get_service_names(&self) -> Result<HashSet<ServiceName>> {
        let guard = self.inner.lock().await;
        Ok(guard.repository.get_all_service_names()?)
    }

    async fn get_existing_and_historical_service_identifiers(
        &self,
    ) -> Result<Vec<ServiceIdentifiers>> {
        let guard = self.inner.lock().await;
        Ok(guard.repository.get_historical_identifiers()?)
    }

    async fn copy_files_from_service(
        &self,
        identifier: &str,
        src_path: &str,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<()> {
        let guard = self.inner.lock().await;
        let registrations = guard.repository.get_all()?;
        let name = resolve_service_name(&registrations, identifier)?;
        let uuid = registrations[&name].uuid().clone();
        self.backend
            .copy_files_from_user_service(&self.enclave_uuid, &uuid, src_path, output)
            .await?;
        Ok(())
    }

    fn is_network_partitioning_enabled(&self) -> bool {
        self.is_partitioning_enabled
    }

    async fn set_connection(
        &self,
        partition1: PartitionId,
        partition2: PartitionId,
        connection: PartitionConnection,
    ) -> Result<()> {
        if !self.is_partitioning_enabled {
            return Err(NetworkError::PartitioningDisabled);
        }
        if partition1 == partition2 {
            return Err(NetworkError::validation(format!(
                "cannot set a connection between partition '{partition1}' and itself"
            )));
        }
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let mut created_partitions: Vec<PartitionId> = Vec::new();
        for partition in [&partition1, &partition2] {
            if !state.topology.has_partition(partition) {
                debug!(partition = %partition, "Partition referenced by set_connection does not exist; creating it");
                state
                    .topology
                    .create_empty_partition_with_default_connection(partition.clone())?;
                created_partitions.push(partition.clone());
            }
        }

        let (was_overridden, previous_connection) = state
            .topology
            .get_partition_connection(&partition1, &partition2)?;
        state
            .topology
            .set_connection(partition1.clone(), partition2.clone(), connection)?;

        if let Err(err) = refresh_connections(state, None).await {
            let restore = if was_overridden {
                state.topology.set_connection(
                    partition1.clone(),
                    partition2.clone(),
                    previous_connection,
                )
            } else {
                state
                    .topology
                    .unset_connection(partition1.clone(), partition2.clone())
            };
            if let Err(restore_err) = restore {
                error!(
                    error = %restore_err,
                    "Failed to restore the previous connection after a failed rule push; topology and applied rules may diverge"
                );
            }
            rollback_created_partitions(state, &created_partitions);
            repush_rules_after_rollback(state).await;
            return Err(err);
        }
        info!(
            partition1 = %partition1,
            partition2 = %partition2,
            "Partition connection updated"
        );
        Ok(())
    }

    async fn unset_connection(
        &self,
        partition1: PartitionId,
        partition2: PartitionId,
    ) -> Result<()> {
        if !self.is_partitioning_enabled {
            return Err(NetworkError::PartitioningDisabled);
        }
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        for partition in [&partition1, &partition2] {
            if !state.topology.has_partition(partition) {
                warn!(
                    partition = %partition,
                    "Unsetting a connection involving a partition that does not exist; nothing to do"
                );
                return Ok(());
            }
        }
        let (was_overridden, previous_connection) = state
            .topology
            .get_partition_connection(&partition1, &partition2)?;
        if !was_overridden {
            debug!("Connection is already the default; nothing to do");
            return Ok(());
        }

        state
            .topology
            .unset_connection(partition1.clone(), partition2.clone())?;
        if let Err(err) = refresh_connections(state, None).await {
            if let Err(restore_err) = state.topology.set_connection(
                partition1.clone(),
                partition2.clone(),
                previous_connection,
            ) {
                error!(
                    error = %restore_err,
                    "Failed to restore the previous connection after a failed rule push; topology and applied rules may diverge"
                );
            }
            repush_rules_after_rollback(state).await;
            return Err(err);
        }
        Ok(())
    }

    async fn set_default_connection(&self, connection: PartitionConnection) -> Result<()> {
        if !self.is_partitioning_enabled {
            return Err(NetworkError::PartitioningDisabled);
        }
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let previous = state.topology.default_connection();
        state.topology.set_default_connection(connection);
        if let Err(err) = refresh_connections(state, None).await {
            state.topology.set_default_connection(previous);
            repush_rules_after_rollback(state).await;
            return Err(err);
        }
        Ok(())
    }

    async fn repartition(
        &self,
        partition_services: HashMap<PartitionId, HashSet<ServiceName>>,
        partition_connections: HashMap<PartitionConnectionId, PartitionConnection>,
        default_connection: PartitionConnection,
    ) -> Result<()> {
        if !self.is_partitioning_enabled {
            return Err(NetworkError::PartitioningDisabled);
        }
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;

        let snapshot = state.topology.clone();
        state
            .topology
            .repartition(partition_services, partition_connections, default_connection)?;
        if let Err(err) = refresh_connections(state, None).await {
            state.topology = snapshot;
            repush_rules_after_rollback(state).await;
            return Err(err);
        }
        info!("Network repartitioned");
        Ok(())
    }
}

// ==========================================================================
//                          Free helper functions
// ==========================================================================

// Resolves a raw identifier — full UUID, 12-character shortened UUID, or
// service name, in that precedence order — to a registered service name.
fn resolve_service_name(
    registrations: &HashMap<ServiceName, ServiceRegistration>,
    identifier: &str,
) -> Result<ServiceName> {
    for registration in registrations.values() {
        if registration.uuid().as_str() == identifier {
            return Ok(registration.name().clone());
        }
    }

    let shortened_matches: Vec<&ServiceName> = registrations
        .values()
        .filter(|registration| registration.uuid().shortened() == identifier)
        .map(ServiceRegistration::name)
        .collect();
    match shortened_matches.len() {
        0 => {}
        1 => return Ok(shortened_matches[0].clone()),
        _ => {
            return Err(NetworkError::validation(format!(
                "shortened UUID '{identifier}' matches multiple services; use the full UUID"
            )))
        }
    }

    let as_name = ServiceName::new(identifier);
    if registrations.contains_key(&as_name) {
        return Ok(as_name);
    }
    Err(NetworkError::service_not_found(identifier))
}

// Sidecars operate at the IP level, not the name level: translate the
// topology's per-peer connection map into a per-IP one.
fn resolve_peers_to_ips(
    peer_configs: &HashMap<ServiceName, PartitionConnection>,
    registrations: &HashMap<ServiceName, ServiceRegistration>,
    service: &ServiceName,
) -> Result<HashMap<IpAddr, PartitionConnection>> {
    let mut rules = HashMap::new();
    for (peer, connection) in peer_configs {
        let registration = registrations.get(peer).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "service '{service}' needs a rule toward peer '{peer}', but that peer has no registration"
            ))
        })?;
        rules.insert(registration.private_ip(), *connection);
    }
    Ok(rules)
}

// Reads the current topology and pushes a full-replace rule set to the
// sidecar of every target service (all services when `targets` is None).
async fn refresh_connections(
    state: &mut NetworkState,
    targets: Option<&HashSet<ServiceName>>,
) -> Result<()> {
    let connection_configs = state.topology.service_connection_configs()?;
    let registrations = state.repository.get_all()?;
    let target_names: Vec<ServiceName> = match targets {
        Some(targets) => targets.iter().cloned().collect(),
        None => connection_configs.keys().cloned().collect(),
    };
    for name in target_names {
        let peer_configs = connection_configs.get(&name).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "service '{name}' needs a traffic-control update but is missing from the connection config map"
            ))
        })?;
        let rules = resolve_peers_to_ips(peer_configs, &registrations, &name)?;
        let sidecar = state
            .sidecars
            .get_mut(&name)
            .ok_or_else(|| NetworkError::SidecarNotFound(name.clone()))?;
        sidecar.update_traffic_control(&rules).await?;
    }
    Ok(())
}

// After a failed rule push rolled the topology back, push the restored
// rules back out so applied sidecar state matches the topology again. The
// backend just failed a push, so this may fail too; then the divergence is
// logged for the operator instead of being silently retried.
async fn repush_rules_after_rollback(state: &mut NetworkState) {
    if let Err(err) = refresh_connections(state, None).await {
        error!(
            error = %err,
            "Failed to re-apply the rolled-back topology to the sidecars; applied rules may diverge until the next successful partition operation"
        );
    }
}

fn rollback_created_partitions(state: &mut NetworkState, created_partitions: &[PartitionId]) {
    for partition in created_partitions {
        if let Err(err) = state.topology.remove_partition(partition) {
            error!(
                partition = %partition,
                error = %err,
                "Partition was created by the failed call and should be removed, but removal failed; it stays in the topology"
            );
        }
    }
}

// One unit of the parallel start phase: start the workload, then (when
// partitioning is enabled) attach and program its sidecar. On sidecar
// failure the freshly-started workload is destroyed again so the batch
// rollback only ever sees consistent survivors.
fn build_start_operation(
    backend: BoxedBackend,
    enclave_uuid: EnclaveUuid,
    name: ServiceName,
    uuid: ServiceUuid,
    config: ServiceConfig,
    partitioning_enabled: bool,
    rules: HashMap<IpAddr, PartitionConnection>,
) -> Operation<StartedService> {
    Box::pin(async move {
        if config.memory_allocation_megabytes != 0
            && config.memory_allocation_megabytes < MIN_MEMORY_ALLOCATION_MEGABYTES
        {
            return Err(NetworkError::validation(format!(
                "memory allocation {}MB for service '{name}' is below the backend minimum of {MIN_MEMORY_ALLOCATION_MEGABYTES}MB",
                config.memory_allocation_megabytes
            )));
        }

        debug!(service = %name, "Starting service");
        let mut configs = HashMap::new();
        configs.insert(uuid.clone(), config);
        let (mut successes, mut failures) = backend
            .start_registered_user_services(&enclave_uuid, configs)
            .await?;
        if let Some(err) = failures.remove(&uuid) {
            return Err(err.into());
        }
        let service = successes.remove(&uuid).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "service '{name}' was reported neither started nor failed by the backend"
            ))
        })?;

        if !partitioning_enabled {
            return Ok(StartedService {
                service,
                sidecar: None,
            });
        }

        let manager = SidecarManager::new(backend.clone(), enclave_uuid.clone());
        let sidecar_result = async {
            let mut sidecar = manager.create(&name, &uuid).await?;
            sidecar.initialize_traffic_control().await?;
            sidecar.update_traffic_control(&rules).await?;
            Ok::<TrafficControlledSidecar, NetworkError>(sidecar)
        }
        .await;
        match sidecar_result {
            Ok(sidecar) => Ok(StartedService {
                service,
                sidecar: Some(sidecar),
            }),
            Err(err) => {
                destroy_backend_service(&backend, &enclave_uuid, &name, &uuid).await;
                Err(err)
            }
        }
    })
}

// Destroys one service's workload, logging loudly instead of failing when
// the destroy itself errors: automatic retry of cleanup would only mask a
// stuck backend.
async fn destroy_backend_service(
    backend: &BoxedBackend,
    enclave_uuid: &EnclaveUuid,
    name: &ServiceName,
    uuid: &ServiceUuid,
) {
    let filters = ServiceFilters::for_uuid(uuid.clone());
    match backend.destroy_user_services(enclave_uuid, &filters).await {
        Ok((_, per_uuid)) => {
            if let Some(err) = per_uuid.get(uuid) {
                error!(
                    service = %name,
                    uuid = %uuid,
                    error = %err,
                    "Tried to destroy the service during rollback but failed; destroy it manually"
                );
            }
        }
        Err(err) => {
            error!(
                service = %name,
                uuid = %uuid,
                error = %err,
                "Tried to destroy the service during rollback but the backend call failed; destroy it manually"
            );
        }
    }
}

// Releases one backend identity reservation, logging on failure.
async fn unregister_backend_registration(
    backend: &BoxedBackend,
    enclave_uuid: &EnclaveUuid,
    registration: &ServiceRegistration,
) {
    let uuid = registration.uuid().clone();
    match backend
        .unregister_user_services(enclave_uuid, [uuid.clone()].into_iter().collect())
        .await
    {
        Ok((_, per_uuid)) => {
            if let Some(err) = per_uuid.get(&uuid) {
                error!(
                    service = %registration.name(),
                    error = %err,
                    "Failed to unregister the service; it may still be reserved in the enclave"
                );
            }
        }
        Err(err) => {
            error!(
                service = %registration.name(),
                error = %err,
                "Failed to unregister the service; it may still be reserved in the enclave"
            );
        }
    }
}
