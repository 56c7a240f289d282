//! Programmable in-memory backend used by the service network tests.
//!
//! The fake keeps a registration table, a container table, and a sidecar
//! set, hands out private IPs from a [`FreeIpAddrTracker`], and can be told
//! to fail specific operations for specific service names. It records every
//! destroy call and every sidecar exec so tests can assert on rollback
//! behavior and on the traffic-control payloads that were pushed.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use palisade_backend::{
    BackendError, EnclaveBackend, ExecResult, FreeIpAddrTracker, Result as BackendResult,
    ServiceFilters, SidecarHandle,
};
use palisade_core::{
    ContainerStatus, EnclaveUuid, Service, ServiceConfig, ServiceName, ServiceRegistration,
    ServiceUuid,
};

#[derive(Default)]
struct FakeBackendState {
    registrations: HashMap<ServiceUuid, ServiceRegistration>,
    containers: HashMap<ServiceUuid, ContainerStatus>,
    sidecars: HashSet<ServiceUuid>,

    fail_registration_of: HashSet<ServiceName>,
    fail_start_of: HashSet<ServiceName>,
    fail_sidecar_create_for: HashSet<ServiceName>,
    fail_sidecar_exec_for: HashSet<ServiceName>,
    exec_results: HashMap<ServiceName, ExecResult>,

    destroy_calls: Vec<HashSet<ServiceUuid>>,
    sidecar_exec_log: Vec<(ServiceUuid, Vec<String>)>,
}

pub(crate) struct FakeBackend {
    ip_tracker: Mutex<FreeIpAddrTracker>,
    state: Mutex<FakeBackendState>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            ip_tracker: Mutex::new(FreeIpAddrTracker::new(Ipv4Addr::new(172, 28, 0, 0), 16)),
            state: Mutex::new(FakeBackendState::default()),
        }
    }

    pub(crate) fn fail_registration_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_registration_of
            .insert(ServiceName::new(name));
    }

    pub(crate) fn fail_start_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_start_of
            .insert(ServiceName::new(name));
    }

    pub(crate) fn fail_sidecar_create_for(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_sidecar_create_for
            .insert(ServiceName::new(name));
    }

    pub(crate) fn fail_sidecar_exec_for(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_sidecar_exec_for
            .insert(ServiceName::new(name));
    }

    pub(crate) fn clear_sidecar_exec_failures(&self) {
        self.state.lock().unwrap().fail_sidecar_exec_for.clear();
    }

    pub(crate) fn set_exec_result(&self, name: &str, result: ExecResult) {
        self.state
            .lock()
            .unwrap()
            .exec_results
            .insert(ServiceName::new(name), result);
    }

    pub(crate) fn registered_names(&self) -> HashSet<ServiceName> {
        self.state
            .lock()
            .unwrap()
            .registrations
            .values()
            .map(|registration| registration.name().clone())
            .collect()
    }

    pub(crate) fn container_status(&self, uuid: &ServiceUuid) -> Option<ContainerStatus> {
        self.state.lock().unwrap().containers.get(uuid).copied()
    }

    pub(crate) fn has_sidecar(&self, uuid: &ServiceUuid) -> bool {
        self.state.lock().unwrap().sidecars.contains(uuid)
    }

    pub(crate) fn destroyed_uuids(&self) -> HashSet<ServiceUuid> {
        self.state
            .lock()
            .unwrap()
            .destroy_calls
            .iter()
            .flatten()
            .cloned()
            .collect()
    }

    pub(crate) fn sidecar_exec_log(&self) -> Vec<(ServiceUuid, Vec<String>)> {
        self.state.lock().unwrap().sidecar_exec_log.clone()
    }

    fn matching_uuids(state: &FakeBackendState, filters: &ServiceFilters) -> Vec<ServiceUuid> {
        state
            .registrations
            .values()
            .filter(|registration| {
                filters.matches(
                    registration.name(),
                    registration.uuid(),
                    registration.status(),
                )
            })
            .map(|registration| registration.uuid().clone())
            .collect()
    }

    fn service_for(state: &FakeBackendState, uuid: &ServiceUuid) -> Option<Service> {
        let registration = state.registrations.get(uuid)?;
        let container_status = state.containers.get(uuid)?;
        let private_ports = registration
            .config()
            .map(|config| config.private_ports.clone())
            .unwrap_or_default();
        Some(Service::new(
            registration.clone(),
            *container_status,
            private_ports,
            None,
            None,
        ))
    }
}

#[async_trait]
impl EnclaveBackend for FakeBackend {
    async fn register_user_services(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_names: HashSet<ServiceName>,
    ) -> BackendResult<(
        HashMap<ServiceName, ServiceRegistration>,
        HashMap<ServiceName, BackendError>,
    )> {
        let mut state = self.state.lock().unwrap();
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        for name in service_names {
            if state.fail_registration_of.contains(&name) {
                failures.insert(
                    name.clone(),
                    BackendError::registration_failed(name, "injected registration failure"),
                );
                continue;
            }
            let ip = self.ip_tracker.lock().unwrap().get_free_ip_addr()?;
            let registration = ServiceRegistration::new(
                name.clone(),
                ServiceUuid::random(),
                enclave_uuid.clone(),
                IpAddr::V4(ip),
            );
            state
                .registrations
                .insert(registration.uuid().clone(), registration.clone());
            successes.insert(name, registration);
        }
        Ok((successes, failures))
    }

    async fn unregister_user_services(
        &self,
        _enclave_uuid: &EnclaveUuid,
        service_uuids: HashSet<ServiceUuid>,
    ) -> BackendResult<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)> {
        let mut state = self.state.lock().unwrap();
        let mut successes = HashSet::new();
        for uuid in service_uuids {
            if let Some(registration) = state.registrations.remove(&uuid) {
                if let IpAddr::V4(ip) = registration.private_ip() {
                    self.ip_tracker.lock().unwrap().release(ip);
                }
            }
            successes.insert(uuid);
        }
        Ok((successes, HashMap::new()))
    }

    async fn start_registered_user_services(
        &self,
        _enclave_uuid: &EnclaveUuid,
        configs_by_uuid: HashMap<ServiceUuid, ServiceConfig>,
    ) -> BackendResult<(
        HashMap<ServiceUuid, Service>,
        HashMap<ServiceUuid, BackendError>,
    )> {
        let mut state = self.state.lock().unwrap();
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        for (uuid, config) in configs_by_uuid {
            let Some(registration) = state.registrations.get(&uuid).cloned() else {
                failures.insert(uuid.clone(), BackendError::ServiceNotFound(uuid));
                continue;
            };
            if state.fail_start_of.contains(registration.name()) {
                failures.insert(
                    uuid.clone(),
                    BackendError::start_failed(uuid, "injected start failure"),
                );
                continue;
            }
            state.containers.insert(uuid.clone(), ContainerStatus::Running);
            if let Some(stored) = state.registrations.get_mut(&uuid) {
                stored.set_config(Some(config.clone()));
            }
            let mut registration = registration;
            registration.set_config(Some(config.clone()));
            let service = Service::new(
                registration,
                ContainerStatus::Running,
                config.private_ports.clone(),
                None,
                None,
            );
            successes.insert(uuid, service);
        }
        Ok((successes, failures))
    }

    async fn stop_user_services(
        &self,
        _enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> BackendResult<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)> {
        let mut state = self.state.lock().unwrap();
        let uuids = Self::matching_uuids(&state, filters);
        let mut successes = HashSet::new();
        for uuid in uuids {
            if let Some(status) = state.containers.get_mut(&uuid) {
                *status = ContainerStatus::Stopped;
            }
            successes.insert(uuid);
        }
        Ok((successes, HashMap::new()))
    }

    async fn destroy_user_services(
        &self,
        _enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> BackendResult<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)> {
        let mut state = self.state.lock().unwrap();
        let uuids = Self::matching_uuids(&state, filters);
        let call: HashSet<ServiceUuid> = uuids.iter().cloned().collect();
        state.destroy_calls.push(call.clone());
        for uuid in &uuids {
            state.containers.remove(uuid);
        }
        Ok((call, HashMap::new()))
    }

    async fn get_user_services(
        &self,
        _enclave_uuid: &EnclaveUuid,
        filters: &ServiceFilters,
    ) -> BackendResult<HashMap<ServiceUuid, Service>> {
        let state = self.state.lock().unwrap();
        let mut services = HashMap::new();
        for uuid in Self::matching_uuids(&state, filters) {
            if let Some(service) = Self::service_for(&state, &uuid) {
                services.insert(uuid, service);
            }
        }
        Ok(services)
    }

    async fn run_user_service_exec_commands(
        &self,
        _enclave_uuid: &EnclaveUuid,
        commands_by_uuid: HashMap<ServiceUuid, Vec<String>>,
    ) -> BackendResult<(
        HashMap<ServiceUuid, ExecResult>,
        HashMap<ServiceUuid, BackendError>,
    )> {
        let state = self.state.lock().unwrap();
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        for (uuid, _command) in commands_by_uuid {
            let Some(registration) = state.registrations.get(&uuid) else {
                failures.insert(uuid.clone(), BackendError::ServiceNotFound(uuid));
                continue;
            };
            let result = state
                .exec_results
                .get(registration.name())
                .cloned()
                .unwrap_or_else(|| ExecResult::new(0, ""));
            successes.insert(uuid, result);
        }
        Ok((successes, failures))
    }

    async fn create_networking_sidecar(
        &self,
        enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
    ) -> BackendResult<SidecarHandle> {
        let mut state = self.state.lock().unwrap();
        let Some(registration) = state.registrations.get(service_uuid) else {
            return Err(BackendError::ServiceNotFound(service_uuid.clone()));
        };
        if state.fail_sidecar_create_for.contains(registration.name()) {
            return Err(BackendError::sidecar_failed(
                service_uuid.clone(),
                "injected sidecar creation failure",
            ));
        }
        state.sidecars.insert(service_uuid.clone());
        Ok(SidecarHandle::new(
            service_uuid.clone(),
            enclave_uuid.clone(),
        ))
    }

    async fn run_networking_sidecar_exec_commands(
        &self,
        _enclave_uuid: &EnclaveUuid,
        commands_by_uuid: HashMap<ServiceUuid, Vec<String>>,
    ) -> BackendResult<(
        HashMap<ServiceUuid, ExecResult>,
        HashMap<ServiceUuid, BackendError>,
    )> {
        let mut state = self.state.lock().unwrap();
        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        for (uuid, command) in commands_by_uuid {
            let Some(registration) = state.registrations.get(&uuid) else {
                failures.insert(uuid.clone(), BackendError::ServiceNotFound(uuid));
                continue;
            };
            if state.fail_sidecar_exec_for.contains(registration.name()) {
                failures.insert(
                    uuid.clone(),
                    BackendError::sidecar_failed(uuid, "injected sidecar exec failure"),
                );
                continue;
            }
            state.sidecar_exec_log.push((uuid.clone(), command));
            successes.insert(uuid, ExecResult::new(0, ""));
        }
        Ok((successes, failures))
    }

    async fn stop_networking_sidecars(
        &self,
        _enclave_uuid: &EnclaveUuid,
        service_uuids: HashSet<ServiceUuid>,
    ) -> BackendResult<(HashSet<ServiceUuid>, HashMap<ServiceUuid, BackendError>)> {
        let mut state = self.state.lock().unwrap();
        for uuid in &service_uuids {
            state.sidecars.remove(uuid);
        }
        Ok((service_uuids, HashMap::new()))
    }

    async fn copy_files_from_user_service(
        &self,
        _enclave_uuid: &EnclaveUuid,
        service_uuid: &ServiceUuid,
        src_path: &str,
        output: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> BackendResult<()> {
        {
            let state = self.state.lock().unwrap();
            if !state.registrations.contains_key(service_uuid) {
                return Err(BackendError::ServiceNotFound(service_uuid.clone()));
            }
        }
        let payload = format!("fake-tar:{src_path}");
        output.write_all(payload.as_bytes()).await?;
        Ok(())
    }
}
