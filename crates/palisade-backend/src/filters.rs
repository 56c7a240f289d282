//! Filter criteria for selecting services inside an enclave.

use palisade_core::{ServiceName, ServiceStatus, ServiceUuid};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Criteria for selecting services in bulk backend operations.
///
/// Empty criteria match everything; each populated field narrows the match.
/// All populated fields must match for a service to be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceFilters {
    /// Match only these service names (empty = any name).
    pub names: HashSet<ServiceName>,

    /// Match only these service UUIDs (empty = any UUID).
    pub uuids: HashSet<ServiceUuid>,

    /// Match only these lifecycle statuses (empty = any status).
    pub statuses: HashSet<ServiceStatus>,
}

impl ServiceFilters {
    /// Creates filters that match every service in the enclave.
    pub fn all() -> Self {
        Self::default()
    }

    /// Creates filters matching exactly one UUID.
    pub fn for_uuid(uuid: ServiceUuid) -> Self {
        let mut uuids = HashSet::new();
        uuids.insert(uuid);
        Self {
            names: HashSet::new(),
            uuids,
            statuses: HashSet::new(),
        }
    }

    /// Creates filters matching a set of UUIDs.
    pub fn for_uuids(uuids: impl IntoIterator<Item = ServiceUuid>) -> Self {
        Self {
            names: HashSet::new(),
            uuids: uuids.into_iter().collect(),
            statuses: HashSet::new(),
        }
    }

    /// Returns true if a service with the given attributes matches.
    pub fn matches(&self, name: &ServiceName, uuid: &ServiceUuid, status: ServiceStatus) -> bool {
        (self.names.is_empty() || self.names.contains(name))
            && (self.uuids.is_empty() || self.uuids.contains(uuid))
            && (self.statuses.is_empty() || self.statuses.contains(&status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filters_match_everything() {
        let filters = ServiceFilters::all();
        assert!(filters.matches(
            &ServiceName::new("api"),
            &ServiceUuid::new("u1"),
            ServiceStatus::Started,
        ));
    }

    #[test]
    fn test_uuid_filter() {
        let filters = ServiceFilters::for_uuid(ServiceUuid::new("u1"));
        assert!(filters.matches(
            &ServiceName::new("api"),
            &ServiceUuid::new("u1"),
            ServiceStatus::Stopped,
        ));
        assert!(!filters.matches(
            &ServiceName::new("api"),
            &ServiceUuid::new("u2"),
            ServiceStatus::Stopped,
        ));
    }
}
