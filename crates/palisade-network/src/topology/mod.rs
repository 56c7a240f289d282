//! Partition topology: the graph of named partitions and their
//! connectivity.
//!
//! The topology is a pure in-memory model — no I/O, no backend calls. It
//! tracks which partition every service belongs to (exactly one at a time),
//! the default connection applied between any two partitions without an
//! explicit override, and the set of pairwise overrides. The orchestrator
//! mutates it under the enclave lock and derives concrete traffic-control
//! configuration from it.
//!
//! The per-service connectivity query is O(services²) by design: pairwise
//! connectivity is inherent to the domain, and enclaves are expected to
//! hold tens to low hundreds of services. This is a known scaling boundary,
//! not an oversight.

mod connection;

pub use connection::{PacketDelayDistribution, PartitionConnection, PartitionConnectionId};

use std::collections::{HashMap, HashSet};

use palisade_core::{PartitionId, ServiceName};

use crate::error::{NetworkError, Result};

/// Graph of partitions, service membership, and pairwise connection
/// overrides.
#[derive(Debug, Clone)]
pub struct PartitionTopology {
    default_connection: PartitionConnection,
    service_partitions: HashMap<ServiceName, PartitionId>,
    partition_connections: HashMap<PartitionConnectionId, PartitionConnection>,
    partition_services: HashMap<PartitionId, HashSet<ServiceName>>,
}

impl PartitionTopology {
    /// Creates a topology containing only the default partition.
    pub fn new(default_connection: PartitionConnection) -> Self {
        let mut partition_services = HashMap::new();
        partition_services.insert(PartitionId::default_partition(), HashSet::new());
        Self {
            default_connection,
            service_partitions: HashMap::new(),
            partition_connections: HashMap::new(),
            partition_services,
        }
    }

    /// Returns true if the partition exists.
    pub fn has_partition(&self, partition: &PartitionId) -> bool {
        self.partition_services.contains_key(partition)
    }

    /// Creates a new, empty partition implicitly connected to every other
    /// partition via the default connection.
    ///
    /// Fails if a partition with this ID already exists.
    pub fn create_empty_partition_with_default_connection(
        &mut self,
        partition: PartitionId,
    ) -> Result<()> {
        if self.partition_services.contains_key(&partition) {
            return Err(NetworkError::validation(format!(
                "cannot create partition '{partition}': it already exists"
            )));
        }
        self.partition_services.insert(partition, HashSet::new());
        Ok(())
    }

    /// Removes an empty, non-default partition along with any connection
    /// overrides referencing it. Removing an absent partition is a no-op.
    pub fn remove_partition(&mut self, partition: &PartitionId) -> Result<()> {
        if partition.is_default() {
            return Err(NetworkError::validation(
                "the default partition cannot be removed",
            ));
        }
        match self.partition_services.get(partition) {
            None => Ok(()),
            Some(services) if services.is_empty() => {
                self.partition_services.remove(partition);
                self.partition_connections
                    .retain(|id, _| id.first() != partition && id.second() != partition);
                Ok(())
            }
            Some(services) => Err(NetworkError::validation(format!(
                "cannot remove partition '{partition}': it still contains {} service(s)",
                services.len()
            ))),
        }
    }

    /// Places a service in a partition. The service must not already be
    /// placed, and the partition must exist.
    pub fn add_service(&mut self, service: ServiceName, partition: PartitionId) -> Result<()> {
        if let Some(existing) = self.service_partitions.get(&service) {
            return Err(NetworkError::validation(format!(
                "cannot add service '{service}' to partition '{partition}': it is already in partition '{existing}'"
            )));
        }
        let members = self
            .partition_services
            .get_mut(&partition)
            .ok_or_else(|| NetworkError::PartitionNotFound(partition.clone()))?;
        members.insert(service.clone());
        self.service_partitions.insert(service, partition);
        Ok(())
    }

    /// Moves a service to another partition, rolling back to its previous
    /// partition if the move fails.
    pub fn move_service(&mut self, service: &ServiceName, partition: PartitionId) -> Result<()> {
        let previous = self
            .service_partitions
            .get(service)
            .cloned()
            .ok_or_else(|| NetworkError::service_not_found(service.as_str()))?;
        if previous == partition {
            return Ok(());
        }
        if !self.partition_services.contains_key(&partition) {
            return Err(NetworkError::PartitionNotFound(partition));
        }
        self.remove_service(service);
        // Cannot fail: the target partition was checked above and the
        // service is no longer placed anywhere.
        self.add_service(service.clone(), partition)
    }

    /// Removes a service from the topology. No-op if the service is not
    /// placed anywhere.
    pub fn remove_service(&mut self, service: &ServiceName) {
        let Some(partition) = self.service_partitions.remove(service) else {
            return;
        };
        if let Some(members) = self.partition_services.get_mut(&partition) {
            members.remove(service);
        }
    }

    /// Sets an explicit connection override between two partitions,
    /// creating either partition on the fly if it does not exist yet.
    ///
    /// Auto-creation is documented behavior: it lets callers connect a
    /// partition to one that will only receive services later. Idempotent.
    pub fn set_connection(
        &mut self,
        partition1: PartitionId,
        partition2: PartitionId,
        connection: PartitionConnection,
    ) -> Result<()> {
        if partition1 == partition2 {
            return Err(NetworkError::validation(format!(
                "cannot set a connection between partition '{partition1}' and itself"
            )));
        }
        for partition in [&partition1, &partition2] {
            if !self.partition_services.contains_key(partition) {
                self.partition_services
                    .insert(partition.clone(), HashSet::new());
            }
        }
        self.partition_connections
            .insert(PartitionConnectionId::new(partition1, partition2), connection);
        Ok(())
    }

    /// Removes the explicit override between two partitions, reverting the
    /// pair to the default connection. Creates absent partitions on the
    /// fly, like [`set_connection`](Self::set_connection). Idempotent.
    pub fn unset_connection(
        &mut self,
        partition1: PartitionId,
        partition2: PartitionId,
    ) -> Result<()> {
        if partition1 == partition2 {
            return Err(NetworkError::validation(format!(
                "cannot unset a connection between partition '{partition1}' and itself"
            )));
        }
        for partition in [&partition1, &partition2] {
            if !self.partition_services.contains_key(partition) {
                self.partition_services
                    .insert(partition.clone(), HashSet::new());
            }
        }
        self.partition_connections
            .remove(&PartitionConnectionId::new(partition1, partition2));
        Ok(())
    }

    /// Returns the effective connection between two partitions and whether
    /// it comes from an explicit override.
    pub fn get_partition_connection(
        &self,
        partition1: &PartitionId,
        partition2: &PartitionId,
    ) -> Result<(bool, PartitionConnection)> {
        for partition in [partition1, partition2] {
            if !self.partition_services.contains_key(partition) {
                return Err(NetworkError::PartitionNotFound(partition.clone()));
            }
        }
        let id = PartitionConnectionId::new(partition1.clone(), partition2.clone());
        match self.partition_connections.get(&id) {
            Some(connection) => Ok((true, *connection)),
            None => Ok((false, self.default_connection)),
        }
    }

    /// Sets the connection applied between partition pairs lacking an
    /// explicit override.
    pub fn set_default_connection(&mut self, connection: PartitionConnection) {
        self.default_connection = connection;
    }

    /// Returns the current default connection.
    pub fn default_connection(&self) -> PartitionConnection {
        self.default_connection
    }

    /// Atomically replaces the entire topology.
    ///
    /// Fails — leaving the current topology untouched — if the new layout
    /// has no partitions, leaves a known service unallocated, references an
    /// unknown service, allocates a service twice, or wires a connection to
    /// an undefined partition.
    pub fn repartition(
        &mut self,
        new_partition_services: HashMap<PartitionId, HashSet<ServiceName>>,
        new_partition_connections: HashMap<PartitionConnectionId, PartitionConnection>,
        new_default_connection: PartitionConnection,
    ) -> Result<()> {
        if new_partition_services.is_empty() {
            return Err(NetworkError::validation(
                "cannot repartition with no partitions",
            ));
        }

        let mut needing_allocation: HashSet<&ServiceName> =
            self.service_partitions.keys().collect();
        let mut allocated: HashSet<&ServiceName> = HashSet::new();
        let mut unknown: Vec<&ServiceName> = Vec::new();
        let mut duplicated: Vec<&ServiceName> = Vec::new();
        for services in new_partition_services.values() {
            for service in services {
                if !allocated.insert(service) {
                    duplicated.push(service);
                }
                if !self.service_partitions.contains_key(service) {
                    unknown.push(service);
                }
                needing_allocation.remove(service);
            }
        }
        if !needing_allocation.is_empty() {
            return Err(NetworkError::validation(format!(
                "every service must be allocated to a partition when repartitioning, but these were not: {}",
                join_names(needing_allocation.into_iter())
            )));
        }
        if !unknown.is_empty() {
            return Err(NetworkError::validation(format!(
                "these services have partition allocations but are not registered: {}",
                join_names(unknown.into_iter())
            )));
        }
        if !duplicated.is_empty() {
            return Err(NetworkError::validation(format!(
                "these services are allocated to more than one partition: {}",
                join_names(duplicated.into_iter())
            )));
        }

        for connection_id in new_partition_connections.keys() {
            for partition in [connection_id.first(), connection_id.second()] {
                if !new_partition_services.contains_key(partition) {
                    return Err(NetworkError::validation(format!(
                        "partition '{partition}' in connection '{}' <-> '{}' is not defined",
                        connection_id.first(),
                        connection_id.second()
                    )));
                }
            }
        }

        let mut new_service_partitions = HashMap::new();
        for (partition, services) in &new_partition_services {
            for service in services {
                new_service_partitions.insert(service.clone(), partition.clone());
            }
        }

        self.partition_services = new_partition_services;
        self.service_partitions = new_service_partitions;
        self.partition_connections = new_partition_connections;
        self.default_connection = new_default_connection;
        Ok(())
    }

    /// Computes, for every service, the effective connection toward every
    /// other service in a *different* partition.
    ///
    /// Services sharing a partition never appear in each other's maps:
    /// same-partition traffic is always fully open and needs no shaping
    /// rule. O(services²); see the module docs.
    pub fn service_connection_configs(
        &self,
    ) -> Result<HashMap<ServiceName, HashMap<ServiceName, PartitionConnection>>> {
        let mut result = HashMap::new();
        for (partition, services) in &self.partition_services {
            for service in services {
                let mut peers = HashMap::new();
                for (other_partition, other_services) in &self.partition_services {
                    if partition == other_partition {
                        continue;
                    }
                    let (_, connection) =
                        self.get_partition_connection(partition, other_partition)?;
                    for other_service in other_services {
                        peers.insert(other_service.clone(), connection);
                    }
                }
                result.insert(service.clone(), peers);
            }
        }
        Ok(result)
    }

    /// Returns the partition membership map.
    pub fn partition_services(&self) -> &HashMap<PartitionId, HashSet<ServiceName>> {
        &self.partition_services
    }

    /// Returns the service-to-partition map.
    pub fn service_partitions(&self) -> &HashMap<ServiceName, PartitionId> {
        &self.service_partitions
    }
}

fn join_names<'a>(names: impl Iterator<Item = &'a ServiceName>) -> String {
    let mut sorted: Vec<&str> = names.map(ServiceName::as_str).collect();
    sorted.sort_unstable();
    sorted.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn svc(i: usize) -> ServiceName {
        ServiceName::new(format!("svc-{i}"))
    }

    fn part(name: &str) -> PartitionId {
        PartitionId::new(name)
    }

    fn topology_with_services(count: usize) -> PartitionTopology {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        for i in 0..count {
            topology
                .add_service(svc(i), PartitionId::default_partition())
                .unwrap();
        }
        topology
    }

    #[test]
    fn test_create_partition_rejects_duplicates() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .create_empty_partition_with_default_connection(part("edge"))
            .unwrap();
        let err = topology
            .create_empty_partition_with_default_connection(part("edge"))
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_default_partition_cannot_be_removed() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        let err = topology
            .remove_partition(&PartitionId::default_partition())
            .unwrap_err();
        assert!(err.to_string().contains("default partition"));
    }

    #[test]
    fn test_service_lives_in_exactly_one_partition() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .create_empty_partition_with_default_connection(part("edge"))
            .unwrap();
        topology.add_service(svc(0), part("edge")).unwrap();

        let err = topology
            .add_service(svc(0), PartitionId::default_partition())
            .unwrap_err();
        assert!(err.to_string().contains("already in partition"));

        topology
            .move_service(&svc(0), PartitionId::default_partition())
            .unwrap();
        assert_eq!(
            topology.service_partitions()[&svc(0)],
            PartitionId::default_partition()
        );
        assert!(topology.partition_services()[&part("edge")].is_empty());
    }

    #[test]
    fn test_set_connection_auto_creates_partitions() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .set_connection(part("a"), part("b"), PartitionConnection::blocked())
            .unwrap();
        assert!(topology.has_partition(&part("a")));
        assert!(topology.has_partition(&part("b")));

        let (overridden, connection) = topology
            .get_partition_connection(&part("a"), &part("b"))
            .unwrap();
        assert!(overridden);
        assert_eq!(connection, PartitionConnection::blocked());
    }

    #[test]
    fn test_unset_reverts_to_default() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .set_connection(part("a"), part("b"), PartitionConnection::blocked())
            .unwrap();
        topology.unset_connection(part("b"), part("a")).unwrap();

        let (overridden, connection) = topology
            .get_partition_connection(&part("a"), &part("b"))
            .unwrap();
        assert!(!overridden);
        assert_eq!(connection, PartitionConnection::allowed());
    }

    #[test]
    fn test_default_change_applies_to_all_non_overridden_pairs() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .create_empty_partition_with_default_connection(part("a"))
            .unwrap();
        topology
            .create_empty_partition_with_default_connection(part("b"))
            .unwrap();
        topology
            .set_connection(
                part("a"),
                PartitionId::default_partition(),
                PartitionConnection::blocked(),
            )
            .unwrap();

        let softened = PartitionConnection::with_packet_loss(30.0);
        topology.set_default_connection(softened);

        // Non-overridden pair picks up the new default retroactively.
        let (overridden, connection) = topology
            .get_partition_connection(&part("a"), &part("b"))
            .unwrap();
        assert!(!overridden);
        assert_eq!(connection, softened);

        // The override is untouched.
        let (overridden, connection) = topology
            .get_partition_connection(&part("a"), &PartitionId::default_partition())
            .unwrap();
        assert!(overridden);
        assert_eq!(connection, PartitionConnection::blocked());
    }

    #[test]
    fn test_same_partition_pairs_are_never_listed() {
        let topology = topology_with_services(3);
        let configs = topology.service_connection_configs().unwrap();
        for i in 0..3 {
            assert!(configs[&svc(i)].is_empty());
        }
    }

    #[test]
    fn test_connection_configs_are_deterministic_for_repeated_set() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .create_empty_partition_with_default_connection(part("a"))
            .unwrap();
        topology
            .create_empty_partition_with_default_connection(part("b"))
            .unwrap();
        topology.add_service(svc(0), part("a")).unwrap();
        topology.add_service(svc(1), part("b")).unwrap();

        let connection = PartitionConnection::with_packet_loss(40.0);
        topology.set_connection(part("a"), part("b"), connection).unwrap();
        let first = topology.service_connection_configs().unwrap();
        topology.set_connection(part("a"), part("b"), connection).unwrap();
        let second = topology.service_connection_configs().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_line_topology_blocks_exactly_non_adjacent_peers() {
        // Ten services on a line: service i may talk only to i-1 and i+1.
        let mut topology = PartitionTopology::new(PartitionConnection::blocked());
        for i in 0..10 {
            let partition = part(&format!("p{i}"));
            topology
                .create_empty_partition_with_default_connection(partition.clone())
                .unwrap();
            topology.add_service(svc(i), partition).unwrap();
        }
        for i in 0..9 {
            topology
                .set_connection(
                    part(&format!("p{i}")),
                    part(&format!("p{}", i + 1)),
                    PartitionConnection::allowed(),
                )
                .unwrap();
        }

        let configs = topology.service_connection_configs().unwrap();
        for i in 0..10usize {
            let peers = &configs[&svc(i)];
            assert_eq!(peers.len(), 9, "service {i} must see every other service");
            for j in 0..10usize {
                if j == i {
                    continue;
                }
                let connection = peers[&svc(j)];
                let adjacent = j + 1 == i || j == i + 1;
                if adjacent {
                    assert!(
                        connection.is_fully_open(),
                        "service {i} must reach adjacent service {j}"
                    );
                } else {
                    assert_eq!(
                        connection.packet_loss_percentage(),
                        100.0,
                        "service {i} must be blocked from non-adjacent service {j}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_repartition_replaces_everything() {
        let mut topology = topology_with_services(2);

        let mut new_services = HashMap::new();
        new_services.insert(part("left"), HashSet::from([svc(0)]));
        new_services.insert(part("right"), HashSet::from([svc(1)]));
        let mut new_connections = HashMap::new();
        new_connections.insert(
            PartitionConnectionId::new(part("left"), part("right")),
            PartitionConnection::blocked(),
        );

        topology
            .repartition(new_services, new_connections, PartitionConnection::allowed())
            .unwrap();

        assert_eq!(topology.service_partitions()[&svc(0)], part("left"));
        let (overridden, connection) = topology
            .get_partition_connection(&part("left"), &part("right"))
            .unwrap();
        assert!(overridden);
        assert_eq!(connection, PartitionConnection::blocked());
    }

    #[test]
    fn test_repartition_failure_leaves_topology_untouched() {
        let mut topology = topology_with_services(2);
        let before_partitions = topology.partition_services().clone();

        // svc-1 is left unallocated.
        let mut incomplete = HashMap::new();
        incomplete.insert(part("solo"), HashSet::from([svc(0)]));
        let err = topology
            .repartition(incomplete, HashMap::new(), PartitionConnection::allowed())
            .unwrap_err();
        assert!(err.to_string().contains("svc-1"));

        // Unknown service.
        let mut unknown = HashMap::new();
        unknown.insert(
            PartitionId::default_partition(),
            HashSet::from([svc(0), svc(1), svc(99)]),
        );
        let err = topology
            .repartition(unknown, HashMap::new(), PartitionConnection::allowed())
            .unwrap_err();
        assert!(err.to_string().contains("svc-99"));

        // Connection referencing an undefined partition.
        let mut services = HashMap::new();
        services.insert(
            PartitionId::default_partition(),
            HashSet::from([svc(0), svc(1)]),
        );
        let mut bad_connections = HashMap::new();
        bad_connections.insert(
            PartitionConnectionId::new(PartitionId::default_partition(), part("ghost")),
            PartitionConnection::blocked(),
        );
        let err = topology
            .repartition(services, bad_connections, PartitionConnection::allowed())
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));

        assert_eq!(topology.partition_services(), &before_partitions);
    }

    #[test]
    fn test_remove_partition_drops_its_overrides() {
        let mut topology = PartitionTopology::new(PartitionConnection::allowed());
        topology
            .set_connection(part("a"), part("b"), PartitionConnection::blocked())
            .unwrap();
        topology.remove_partition(&part("b")).unwrap();
        assert!(!topology.has_partition(&part("b")));

        // Re-creating the partition starts from the default connection.
        topology
            .create_empty_partition_with_default_connection(part("b"))
            .unwrap();
        let (overridden, _) = topology
            .get_partition_connection(&part("a"), &part("b"))
            .unwrap();
        assert!(!overridden);
    }
}
