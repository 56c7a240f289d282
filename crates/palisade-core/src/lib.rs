//! Shared types for the Palisade control plane.
//!
//! This crate defines the identifier newtypes and service object model used
//! by every other Palisade crate:
//!
//! - [`ids`]: enclave, service, and partition identifiers
//! - [`service`]: service registrations, configurations, and runtime objects
//!
//! The types here carry no I/O and no behavior beyond construction,
//! accessors, and serialization. The service network core
//! (`palisade-network`) owns all state transitions.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod ids;
pub mod service;

pub use ids::{EnclaveUuid, PartitionId, ServiceName, ServiceUuid};
pub use service::{
    ContainerStatus, PortSpec, Service, ServiceConfig, ServiceConfigBuilder, ServiceIdentifiers,
    ServiceRegistration, ServiceStatus, TransportProtocol,
};
