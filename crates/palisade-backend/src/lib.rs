//! Backend capability interface for the Palisade control plane.
//!
//! The service network core drives service lifecycles through a compute
//! backend — a container engine, Kubernetes, or anything else that can
//! register, start, stop, and destroy service workloads. This crate defines
//! the boundary between the two: the [`EnclaveBackend`] trait plus the
//! object types that cross it.
//!
//! The trait is deliberately narrow. It contains only the operations the
//! core actually calls, not a mirror of everything a container engine can
//! do. Implementations live outside this workspace and are injected at
//! construction time.
//!
//! # Bulk result convention
//!
//! Every bulk operation returns a pair of per-identifier maps — successes
//! and failures — plus a top-level `Result`. A top-level error means the
//! backend call itself failed and nothing can be said about individual
//! identifiers; per-identifier errors mean the call went through and some
//! items failed. Callers must treat the two very differently: per-item
//! failures are rolled back precisely, top-level failures leave state
//! unknown.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod exec;
pub mod filters;
pub mod ip;
pub mod sidecar;
pub mod traits;

pub use error::{BackendError, Result};
pub use exec::ExecResult;
pub use filters::ServiceFilters;
pub use ip::FreeIpAddrTracker;
pub use sidecar::SidecarHandle;
pub use traits::{BoxedBackend, EnclaveBackend};
