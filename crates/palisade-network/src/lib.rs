//! Service network core for the Palisade control plane.
//!
//! This crate owns the authoritative model of an enclave: which services
//! exist, in what lifecycle state, in which network partition, and with
//! what connectivity toward each other. It drives multi-step, partially
//! failable lifecycle operations (register, start, sidecar-attach,
//! partition-enforce) against an unreliable compute backend while keeping
//! strict rollback and consistency guarantees under concurrent access.
//!
//! # Architecture
//!
//! - [`parallelizer`]: bounded fan-out of independent fallible operations
//!   with per-operation success/failure accounting
//! - [`topology`]: the partition graph and the per-service connectivity
//!   computation derived from it
//! - [`repository`]: the durable record of service registrations, the
//!   source of truth for lifecycle state
//! - [`sidecar`]: translation of connectivity policies into traffic-control
//!   command sets executed inside networking sidecars
//! - [`network`]: the orchestrator tying it all together behind a single
//!   coarse lock
//! - [`error`]: the error taxonomy shared by the above
//!
//! # Concurrency model
//!
//! The orchestrator serializes all mutating operations on one enclave
//! behind a single mutex held for the full duration of each call, backend
//! round-trips included. Parallelism exists only *inside* an operation,
//! where independent per-service backend calls fan out on a bounded worker
//! pool. This trades intra-enclave throughput for rollback correctness;
//! do not fine-grain the lock without re-deriving the rollback invariants
//! documented on [`network::DefaultServiceNetwork`].

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod network;
pub mod parallelizer;
pub mod repository;
pub mod sidecar;
pub mod topology;

pub use error::{NetworkError, Result};
pub use network::{DefaultServiceNetwork, ServiceNetwork};
pub use parallelizer::{run_operations_in_parallel, Operation, OperationId};
pub use repository::{RepositoryError, ServiceRegistrationRepository};
pub use topology::{PacketDelayDistribution, PartitionConnection, PartitionTopology};
