//! Identifier types for enclaves, services, and partitions.
//!
//! All identifiers are thin newtype wrappers so the compiler keeps the
//! different namespaces apart. Service UUIDs are immutable once assigned
//! and never reused; names are unique only among currently-registered
//! services, so a deleted name may be claimed again with a fresh UUID.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of leading hex characters used for the shortened UUID form.
pub const SHORTENED_UUID_LENGTH: usize = 12;

/// Identifier of the partition every service lands in unless it asks for
/// another one. The default partition always exists and cannot be removed.
const DEFAULT_PARTITION_ID: &str = "default";

/// Unique identifier for an enclave.
///
/// An enclave is an isolated group of services with its own network
/// namespace and partitioning scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnclaveUuid(String);

impl EnclaveUuid {
    /// Wraps an existing enclave UUID string.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnclaveUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EnclaveUuid {
    fn from(uuid: &str) -> Self {
        Self(uuid.to_string())
    }
}

/// Human-readable name of a service, unique within an enclave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceName(String);

impl ServiceName {
    /// Wraps a service name string.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name is empty or whitespace-only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Globally unique, immutable identifier assigned to a service at
/// registration time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceUuid(String);

impl ServiceUuid {
    /// Wraps an existing UUID string.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self(uuid.into())
    }

    /// Generates a fresh random UUID (32 lowercase hex characters).
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the UUID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the shortened form used for human-friendly lookup.
    ///
    /// UUIDs shorter than the shortened length are returned unchanged.
    pub fn shortened(&self) -> &str {
        if self.0.len() > SHORTENED_UUID_LENGTH {
            &self.0[..SHORTENED_UUID_LENGTH]
        } else {
            &self.0
        }
    }
}

impl fmt::Display for ServiceUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceUuid {
    fn from(uuid: &str) -> Self {
        Self(uuid.to_string())
    }
}

/// Name of a network partition within an enclave.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(String);

impl PartitionId {
    /// Wraps a partition name string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier of the always-present default partition.
    pub fn default_partition() -> Self {
        Self(DEFAULT_PARTITION_ID.to_string())
    }

    /// Returns true if this is the default partition.
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_PARTITION_ID
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PartitionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_uuid_shortened() {
        let uuid = ServiceUuid::new("abcdef0123456789abcdef0123456789");
        assert_eq!(uuid.shortened(), "abcdef012345");

        let short = ServiceUuid::new("abc");
        assert_eq!(short.shortened(), "abc");
    }

    #[test]
    fn test_service_uuid_random_is_unique() {
        let a = ServiceUuid::random();
        let b = ServiceUuid::random();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_default_partition() {
        let default = PartitionId::default_partition();
        assert!(default.is_default());
        assert!(!PartitionId::new("edge").is_default());
    }

    #[test]
    fn test_service_name_blank() {
        assert!(ServiceName::new("").is_blank());
        assert!(ServiceName::new("   ").is_blank());
        assert!(!ServiceName::new("api").is_blank());
    }
}
