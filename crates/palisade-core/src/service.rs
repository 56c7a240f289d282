//! Service object model: registrations, configurations, and runtime state.
//!
//! A [`ServiceRegistration`] is the durable identity record created before a
//! service's workload ever starts. A [`Service`] is the backend-observed
//! runtime projection of a started service. The registration's
//! [`ServiceStatus`] is the source of truth for lifecycle state — the
//! backend's container view may lag behind control-plane intent, so readers
//! always overlay the registration status onto runtime objects.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::ids::{EnclaveUuid, PartitionId, ServiceName, ServiceUuid};

/// Control-plane lifecycle state of a service.
///
/// Transitions: `Registered -> Started -> Stopped -> Started -> ...` until
/// the service is removed, which deletes the registration entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceStatus {
    /// Identity reserved (UUID, IP, partition), workload not yet started.
    Registered,

    /// Workload started through the backend.
    Started,

    /// Workload stopped; the registration and its sidecar are kept.
    Stopped,
}

impl ServiceStatus {
    /// Returns the lowercase display name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }
}

/// Backend-reported container state for a started service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// The container is running.
    Running,

    /// The container exists but is not running (stopped or exited).
    Stopped,
}

/// Transport protocol of a service port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
    /// SCTP.
    Sctp,
}

/// Specification of a single service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port number.
    pub number: u16,

    /// Transport protocol.
    pub transport_protocol: TransportProtocol,

    /// Optional application protocol hint (e.g. "http", "grpc").
    pub maybe_application_protocol: Option<String>,
}

impl PortSpec {
    /// Creates a TCP port spec.
    pub fn tcp(number: u16) -> Self {
        Self {
            number,
            transport_protocol: TransportProtocol::Tcp,
            maybe_application_protocol: None,
        }
    }

    /// Creates a UDP port spec.
    pub fn udp(number: u16) -> Self {
        Self {
            number,
            transport_protocol: TransportProtocol::Udp,
            maybe_application_protocol: None,
        }
    }

    /// Sets the application protocol hint.
    pub fn application_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.maybe_application_protocol = Some(protocol.into());
        self
    }
}

/// Resolved configuration used to start a service's workload.
///
/// Configurations arrive at the control plane fully resolved — image tags,
/// ports, and environment are already concrete values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Container image to run.
    pub container_image_name: String,

    /// Private ports exposed inside the enclave, keyed by port ID.
    pub private_ports: BTreeMap<String, PortSpec>,

    /// Ports requested to be reachable from outside the enclave, keyed by
    /// port ID. Must be one-to-one with `private_ports` when non-empty.
    pub public_ports: BTreeMap<String, PortSpec>,

    /// Entrypoint override, if any.
    pub entrypoint_args: Vec<String>,

    /// Command arguments.
    pub cmd_args: Vec<String>,

    /// Environment variables.
    pub env_vars: BTreeMap<String, String>,

    /// CPU allocation in millicpus (0 = unlimited).
    pub cpu_allocation_millicpus: u64,

    /// Memory allocation in megabytes (0 = unlimited).
    pub memory_allocation_megabytes: u64,

    /// Partition the service should be placed in. `None` means the default
    /// partition.
    pub subnetwork: Option<PartitionId>,
}

impl ServiceConfig {
    /// Creates a builder for a config running the given image.
    pub fn builder(container_image_name: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder::new(container_image_name)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Creates a new builder.
    pub fn new(container_image_name: impl Into<String>) -> Self {
        Self {
            config: ServiceConfig {
                container_image_name: container_image_name.into(),
                private_ports: BTreeMap::new(),
                public_ports: BTreeMap::new(),
                entrypoint_args: Vec::new(),
                cmd_args: Vec::new(),
                env_vars: BTreeMap::new(),
                cpu_allocation_millicpus: 0,
                memory_allocation_megabytes: 0,
                subnetwork: None,
            },
        }
    }

    /// Adds a private port.
    pub fn private_port(mut self, id: impl Into<String>, spec: PortSpec) -> Self {
        self.config.private_ports.insert(id.into(), spec);
        self
    }

    /// Adds a public port.
    pub fn public_port(mut self, id: impl Into<String>, spec: PortSpec) -> Self {
        self.config.public_ports.insert(id.into(), spec);
        self
    }

    /// Sets the entrypoint override.
    pub fn entrypoint_args(mut self, args: Vec<String>) -> Self {
        self.config.entrypoint_args = args;
        self
    }

    /// Sets the command arguments.
    pub fn cmd_args(mut self, args: Vec<String>) -> Self {
        self.config.cmd_args = args;
        self
    }

    /// Adds an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env_vars.insert(key.into(), value.into());
        self
    }

    /// Sets the CPU allocation in millicpus.
    pub fn cpu_allocation_millicpus(mut self, millicpus: u64) -> Self {
        self.config.cpu_allocation_millicpus = millicpus;
        self
    }

    /// Sets the memory allocation in megabytes.
    pub fn memory_allocation_megabytes(mut self, megabytes: u64) -> Self {
        self.config.memory_allocation_megabytes = megabytes;
        self
    }

    /// Places the service in the given partition instead of the default.
    pub fn subnetwork(mut self, partition: PartitionId) -> Self {
        self.config.subnetwork = Some(partition);
        self
    }

    /// Builds the service config.
    pub fn build(self) -> ServiceConfig {
        self.config
    }
}

/// Identity record for a logical service.
///
/// Created at registration, before the workload starts. The UUID is
/// immutable and never reused; the name is unique among currently-registered
/// services in the enclave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    name: ServiceName,
    uuid: ServiceUuid,
    enclave_uuid: EnclaveUuid,
    private_ip: IpAddr,
    status: ServiceStatus,
    config: Option<ServiceConfig>,
}

impl ServiceRegistration {
    /// Creates a new registration in the `Registered` state with no config.
    pub fn new(
        name: ServiceName,
        uuid: ServiceUuid,
        enclave_uuid: EnclaveUuid,
        private_ip: IpAddr,
    ) -> Self {
        Self {
            name,
            uuid,
            enclave_uuid,
            private_ip,
            status: ServiceStatus::Registered,
            config: None,
        }
    }

    /// Returns the service name.
    pub fn name(&self) -> &ServiceName {
        &self.name
    }

    /// Returns the service UUID.
    pub fn uuid(&self) -> &ServiceUuid {
        &self.uuid
    }

    /// Returns the enclave this service belongs to.
    pub fn enclave_uuid(&self) -> &EnclaveUuid {
        &self.enclave_uuid
    }

    /// Returns the private IP address reserved for the service.
    pub fn private_ip(&self) -> IpAddr {
        self.private_ip
    }

    /// Returns the control-plane lifecycle status.
    pub fn status(&self) -> ServiceStatus {
        self.status
    }

    /// Returns the last-applied service config, if the service has started.
    pub fn config(&self) -> Option<&ServiceConfig> {
        self.config.as_ref()
    }

    /// Sets the lifecycle status.
    pub fn set_status(&mut self, status: ServiceStatus) {
        self.status = status;
    }

    /// Sets or clears the last-applied config.
    pub fn set_config(&mut self, config: Option<ServiceConfig>) {
        self.config = config;
    }
}

/// Backend-observed runtime state of a started service.
///
/// Owned by the backend; the control plane treats it as a read-mostly
/// projection, refreshed on demand and never mutated except to overlay the
/// authoritative status from the registration repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    registration: ServiceRegistration,
    container_status: ContainerStatus,
    private_ports: BTreeMap<String, PortSpec>,
    maybe_public_ip: Option<IpAddr>,
    maybe_public_ports: Option<BTreeMap<String, PortSpec>>,
}

impl Service {
    /// Creates a new runtime service object.
    pub fn new(
        registration: ServiceRegistration,
        container_status: ContainerStatus,
        private_ports: BTreeMap<String, PortSpec>,
        maybe_public_ip: Option<IpAddr>,
        maybe_public_ports: Option<BTreeMap<String, PortSpec>>,
    ) -> Self {
        Self {
            registration,
            container_status,
            private_ports,
            maybe_public_ip,
            maybe_public_ports,
        }
    }

    /// Returns the identity registration of this service.
    pub fn registration(&self) -> &ServiceRegistration {
        &self.registration
    }

    /// Returns the backend-reported container status.
    pub fn container_status(&self) -> ContainerStatus {
        self.container_status
    }

    /// Returns the resolved private ports.
    pub fn private_ports(&self) -> &BTreeMap<String, PortSpec> {
        &self.private_ports
    }

    /// Returns the host-reachable IP, if any port is exposed.
    pub fn maybe_public_ip(&self) -> Option<IpAddr> {
        self.maybe_public_ip
    }

    /// Returns the host-reachable ports, if exposed.
    pub fn maybe_public_ports(&self) -> Option<&BTreeMap<String, PortSpec>> {
        self.maybe_public_ports.as_ref()
    }

    /// Overlays the authoritative lifecycle status from the registration
    /// repository onto this runtime view.
    pub fn overlay_status(&mut self, status: ServiceStatus) {
        self.registration.set_status(status);
    }
}

/// Name/UUID pair kept in the historical identifiers ledger.
///
/// The ledger is append-only and survives service removal, so stable
/// identifier lookup keeps working across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentifiers {
    /// Service name at the time of creation.
    pub name: ServiceName,

    /// Immutable service UUID.
    pub uuid: ServiceUuid,

    /// Shortened UUID form.
    pub shortened_uuid: String,
}

impl ServiceIdentifiers {
    /// Builds the ledger entry for a registration.
    pub fn from_registration(registration: &ServiceRegistration) -> Self {
        Self {
            name: registration.name().clone(),
            uuid: registration.uuid().clone(),
            shortened_uuid: registration.uuid().shortened().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_registration() -> ServiceRegistration {
        ServiceRegistration::new(
            ServiceName::new("api"),
            ServiceUuid::new("abcdef0123456789abcdef0123456789"),
            EnclaveUuid::new("test-enclave"),
            IpAddr::V4(Ipv4Addr::new(172, 28, 0, 2)),
        )
    }

    #[test]
    fn test_registration_starts_registered_without_config() {
        let registration = test_registration();
        assert_eq!(registration.status(), ServiceStatus::Registered);
        assert!(registration.config().is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = ServiceConfig::builder("redis:7-alpine")
            .private_port("client", PortSpec::tcp(6379))
            .env("REDIS_PORT", "6379")
            .memory_allocation_megabytes(256)
            .subnetwork(PartitionId::new("cache"))
            .build();

        assert_eq!(config.container_image_name, "redis:7-alpine");
        assert_eq!(config.private_ports["client"].number, 6379);
        assert_eq!(config.env_vars["REDIS_PORT"], "6379");
        assert_eq!(config.subnetwork, Some(PartitionId::new("cache")));
    }

    #[test]
    fn test_status_overlay_wins_over_backend_view() {
        let mut registration = test_registration();
        registration.set_status(ServiceStatus::Stopped);

        // Backend still reports the container as running.
        let mut service = Service::new(
            test_registration(),
            ContainerStatus::Running,
            BTreeMap::new(),
            None,
            None,
        );
        service.overlay_status(registration.status());

        assert_eq!(service.registration().status(), ServiceStatus::Stopped);
        assert_eq!(service.container_status(), ContainerStatus::Running);
    }

    #[test]
    fn test_identifiers_from_registration() {
        let registration = test_registration();
        let identifiers = ServiceIdentifiers::from_registration(&registration);
        assert_eq!(identifiers.name, ServiceName::new("api"));
        assert_eq!(identifiers.shortened_uuid, "abcdef012345");
    }

    #[test]
    fn test_registration_serde_round_trip() {
        let mut registration = test_registration();
        registration.set_status(ServiceStatus::Started);
        registration.set_config(Some(ServiceConfig::builder("nginx:1.25").build()));

        let json = serde_json::to_string(&registration).unwrap();
        let decoded: ServiceRegistration = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, registration);
    }
}
