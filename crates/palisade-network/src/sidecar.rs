//! Traffic-control enforcement through networking sidecars.
//!
//! Each started service gets a sidecar container sharing its network
//! namespace. This module turns a service's connectivity map (peer IP →
//! [`PartitionConnection`]) into `tc` command sets executed inside that
//! sidecar.
//!
//! Rule updates are always a full replace, never an incremental diff, so
//! every push is idempotent and self-correcting regardless of prior state.
//! To make the replace atomic, two HTB qdiscs are maintained under the
//! root: rules are rebuilt on whichever qdisc is currently in the
//! background, then the root filter is swapped to point at it. When no
//! peer needs shaping at all, both qdiscs are torn down and recreated in
//! the pass-through state.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, info};

use palisade_backend::{BackendError, BoxedBackend, SidecarHandle};
use palisade_core::{EnclaveUuid, ServiceName, ServiceUuid};

use crate::error::{NetworkError, Result};
use crate::topology::{PacketDelayDistribution, PartitionConnection};

// Traffic inside the enclave runs over the container's second interface;
// the first one carries the engine's own plumbing.
const ENCLAVE_NETWORK_INTERFACE: &str = "eth1";

const ROOT_QDISC_ID: &str = "1:";
const ROOT_FILTER_ID: &str = "1:0";
const ROOT_CLASS_A_ID: &str = "1:1";
const ROOT_CLASS_B_ID: &str = "1:2";
const QDISC_A_ID: &str = "2:";
const QDISC_B_ID: &str = "3:";

// Major numbers 1-3 are taken by the root qdisc and the A/B pair; per-peer
// netem qdiscs start after that, even majors under A and odd under B.
const LAST_RESERVED_QDISC_MAJOR: u32 = 3;

const FULL_RATE: &str = "100%";

/// Which of the two alternating HTB qdiscs currently carries the live
/// rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActiveQdisc {
    A,
    B,
}

impl ActiveQdisc {
    fn id(self) -> &'static str {
        match self {
            Self::A => QDISC_A_ID,
            Self::B => QDISC_B_ID,
        }
    }

    fn root_class_id(self) -> &'static str {
        match self {
            Self::A => ROOT_CLASS_A_ID,
            Self::B => ROOT_CLASS_B_ID,
        }
    }

    fn background(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Handle for driving one service's traffic-control rules through its
/// networking sidecar.
///
/// Not internally synchronized: callers guarantee exclusive access (the
/// service network holds its lock, and freshly-created sidecars are owned
/// by exactly one start operation until they are handed over).
pub struct TrafficControlledSidecar {
    service_name: ServiceName,
    handle: SidecarHandle,
    enclave_uuid: EnclaveUuid,
    backend: BoxedBackend,
    active_qdisc: Option<ActiveQdisc>,
}

impl TrafficControlledSidecar {
    /// Wraps a backend sidecar handle.
    pub fn new(
        service_name: ServiceName,
        handle: SidecarHandle,
        enclave_uuid: EnclaveUuid,
        backend: BoxedBackend,
    ) -> Self {
        Self {
            service_name,
            handle,
            enclave_uuid,
            backend,
            active_qdisc: None,
        }
    }

    /// Returns the UUID of the service this sidecar shapes traffic for.
    pub fn service_uuid(&self) -> &ServiceUuid {
        self.handle.service_uuid()
    }

    /// Returns the name of the service this sidecar shapes traffic for.
    pub fn service_name(&self) -> &ServiceName {
        &self.service_name
    }

    /// Installs the root qdisc scaffolding. Idempotent: calling it on an
    /// already-initialized sidecar is a no-op.
    pub async fn initialize_traffic_control(&mut self) -> Result<()> {
        if self.active_qdisc.is_some() {
            return Ok(());
        }
        let init_cmd = generate_init_command();
        self.exec(init_cmd, "tc init").await?;
        self.active_qdisc = Some(ActiveQdisc::A);
        Ok(())
    }

    /// Replaces the full rule set with one derived from the given
    /// connectivity map.
    pub async fn update_traffic_control(
        &mut self,
        connection_configs_by_ip: &HashMap<IpAddr, PartitionConnection>,
    ) -> Result<()> {
        let Some(active) = self.active_qdisc else {
            return Err(NetworkError::internal_bug(format!(
                "traffic control for service '{}' was updated before being initialized",
                self.service_name
            )));
        };

        // Sort for a deterministic command set: pushing the same map twice
        // must produce the same payload.
        let mut shaped: Vec<(IpAddr, PartitionConnection)> = connection_configs_by_ip
            .iter()
            .filter(|(_, connection)| !connection.is_fully_open())
            .map(|(ip, connection)| (*ip, *connection))
            .collect();
        shaped.sort_by_key(|(ip, _)| *ip);

        if shaped.is_empty() {
            // Nothing needs shaping; tear both qdiscs down to pass-through.
            let reinit_cmd = generate_reinit_command();
            self.exec(reinit_cmd, "tc reinit").await?;
            self.active_qdisc = Some(ActiveQdisc::A);
            return Ok(());
        }

        let background = active.background();
        let update_cmd = generate_update_command(background, &shaped);
        self.exec(update_cmd, "tc update").await?;
        self.active_qdisc = Some(background);
        Ok(())
    }

    async fn exec(&self, cmd: Vec<String>, description: &str) -> Result<()> {
        debug!(
            service = %self.service_name,
            command = %cmd.join(" "),
            "Running {description} command in networking sidecar"
        );

        let uuid = self.handle.service_uuid().clone();
        let mut commands = HashMap::new();
        commands.insert(uuid.clone(), cmd);
        let (mut successes, mut failures) = self
            .backend
            .run_networking_sidecar_exec_commands(&self.enclave_uuid, commands)
            .await?;

        if let Some(err) = failures.remove(&uuid) {
            return Err(err.into());
        }
        let result = successes.remove(&uuid).ok_or_else(|| {
            NetworkError::internal_bug(format!(
                "sidecar exec for service '{}' reported neither success nor failure",
                self.service_name
            ))
        })?;
        if !result.success() {
            return Err(NetworkError::Backend(BackendError::sidecar_failed(
                uuid,
                format!(
                    "{description} command exited with code {}: {}",
                    result.exit_code(),
                    result.output()
                ),
            )));
        }
        Ok(())
    }
}

/// Creates and removes networking sidecars through the backend.
pub struct SidecarManager {
    backend: BoxedBackend,
    enclave_uuid: EnclaveUuid,
}

impl SidecarManager {
    /// Creates a manager for the given enclave.
    pub fn new(backend: BoxedBackend, enclave_uuid: EnclaveUuid) -> Self {
        Self {
            backend,
            enclave_uuid,
        }
    }

    /// Creates a sidecar attached to the given service.
    pub async fn create(
        &self,
        service_name: &ServiceName,
        service_uuid: &ServiceUuid,
    ) -> Result<TrafficControlledSidecar> {
        let handle = self
            .backend
            .create_networking_sidecar(&self.enclave_uuid, service_uuid)
            .await?;
        info!(service = %service_name, "Created networking sidecar");
        Ok(TrafficControlledSidecar::new(
            service_name.clone(),
            handle,
            self.enclave_uuid.clone(),
            self.backend.clone(),
        ))
    }

    /// Stops the sidecar's container.
    pub async fn remove(&self, sidecar: &TrafficControlledSidecar) -> Result<()> {
        let uuid = sidecar.service_uuid().clone();
        let (_, mut failures) = self
            .backend
            .stop_networking_sidecars(&self.enclave_uuid, [uuid.clone()].into_iter().collect())
            .await?;
        if let Some(err) = failures.remove(&uuid) {
            return Err(err.into());
        }
        info!(service = %sidecar.service_name(), "Removed networking sidecar");
        Ok(())
    }
}

// ==========================================================================
//                          Command generation
// ==========================================================================

fn generate_init_command() -> Vec<String> {
    merge_commands(vec![
        tc_add_root_qdisc(),
        tc_add_class(ROOT_QDISC_ID, ROOT_CLASS_A_ID),
        tc_add_class(ROOT_QDISC_ID, ROOT_CLASS_B_ID),
        tc_add_root_filter(),
        tc_add_qdisc(ROOT_CLASS_A_ID, QDISC_A_ID, "htb"),
        tc_add_qdisc(ROOT_CLASS_B_ID, QDISC_B_ID, "htb"),
    ])
}

fn generate_reinit_command() -> Vec<String> {
    merge_commands(vec![
        tc_remove_qdisc(ROOT_CLASS_A_ID, QDISC_A_ID),
        tc_remove_qdisc(ROOT_CLASS_B_ID, QDISC_B_ID),
        tc_add_qdisc(ROOT_CLASS_A_ID, QDISC_A_ID, "htb"),
        tc_add_qdisc(ROOT_CLASS_B_ID, QDISC_B_ID, "htb"),
    ])
}

// Rebuilds the background qdisc with one class + filter + netem qdisc per
// shaped peer, then swaps the root filter to it.
fn generate_update_command(
    background: ActiveQdisc,
    shaped_peers: &[(IpAddr, PartitionConnection)],
) -> Vec<String> {
    let background_qdisc = background.id();
    let mut commands = vec![
        tc_remove_qdisc(background.root_class_id(), background_qdisc),
        tc_add_qdisc(background.root_class_id(), background_qdisc, "htb"),
    ];

    let mut class_minor: u32 = 1;
    let mut previous_major = LAST_RESERVED_QDISC_MAJOR;
    for (ip, connection) in shaped_peers {
        let class_id = format!("{background_qdisc}{class_minor:x}");
        class_minor += 1;
        let netem_qdisc_major = next_netem_qdisc_major(background, previous_major);
        previous_major = netem_qdisc_major;
        let netem_qdisc_id = format!("{netem_qdisc_major:x}:");

        commands.push(tc_add_class(background_qdisc, &class_id));
        commands.push(tc_add_filter_by_dst_ip(background_qdisc, &class_id, *ip));
        commands.push(tc_add_netem_qdisc(&class_id, &netem_qdisc_id, connection));
    }

    commands.push(tc_replace_root_filter(background.root_class_id()));
    merge_commands(commands)
}

// Children of qdisc A get even major numbers, children of B odd ones, so
// the two rule generations can never collide.
fn next_netem_qdisc_major(background: ActiveQdisc, previous_major: u32) -> u32 {
    let mut major = previous_major + 1;
    let wants_even = background == ActiveQdisc::A;
    if (major % 2 == 0) != wants_even {
        major += 1;
    }
    major
}

fn tc_add_root_qdisc() -> Vec<String> {
    to_strings(&[
        "tc", "qdisc", "add", "dev", ENCLAVE_NETWORK_INTERFACE, "root", "handle", ROOT_QDISC_ID,
        "htb",
    ])
}

fn tc_add_root_filter() -> Vec<String> {
    to_strings(&[
        "tc",
        "filter",
        "add",
        "dev",
        ENCLAVE_NETWORK_INTERFACE,
        "parent",
        ROOT_QDISC_ID,
        "handle",
        ROOT_FILTER_ID,
        "basic",
        "flowid",
        ROOT_CLASS_A_ID,
    ])
}

fn tc_replace_root_filter(class_id: &str) -> Vec<String> {
    to_strings(&[
        "tc",
        "filter",
        "replace",
        "dev",
        ENCLAVE_NETWORK_INTERFACE,
        "parent",
        ROOT_QDISC_ID,
        "handle",
        ROOT_FILTER_ID,
        "basic",
        "flowid",
        class_id,
    ])
}

fn tc_add_class(parent_qdisc_id: &str, class_id: &str) -> Vec<String> {
    to_strings(&[
        "tc",
        "class",
        "add",
        "dev",
        ENCLAVE_NETWORK_INTERFACE,
        "parent",
        parent_qdisc_id,
        "classid",
        class_id,
        "htb",
        "rate",
        FULL_RATE,
    ])
}

fn tc_add_qdisc(parent_class_id: &str, qdisc_id: &str, qdisc_type: &str) -> Vec<String> {
    to_strings(&[
        "tc",
        "qdisc",
        "add",
        "dev",
        ENCLAVE_NETWORK_INTERFACE,
        "parent",
        parent_class_id,
        "handle",
        qdisc_id,
        qdisc_type,
    ])
}

fn tc_remove_qdisc(parent_class_id: &str, qdisc_id: &str) -> Vec<String> {
    to_strings(&[
        "tc",
        "qdisc",
        "del",
        "dev",
        ENCLAVE_NETWORK_INTERFACE,
        "parent",
        parent_class_id,
        "handle",
        qdisc_id,
        "htb",
    ])
}

fn tc_add_filter_by_dst_ip(parent_qdisc_id: &str, class_id: &str, ip: IpAddr) -> Vec<String> {
    to_strings(&[
        "tc",
        "filter",
        "add",
        "dev",
        ENCLAVE_NETWORK_INTERFACE,
        "parent",
        parent_qdisc_id,
        "protocol",
        "ip",
        "prio",
        "1",
        "u32",
        "flowid",
        class_id,
        "match",
        "ip",
        "dst",
        &ip.to_string(),
    ])
}

fn tc_add_netem_qdisc(
    parent_class_id: &str,
    qdisc_id: &str,
    connection: &PartitionConnection,
) -> Vec<String> {
    let mut cmd = tc_add_qdisc(parent_class_id, qdisc_id, "netem");
    if connection.packet_loss_percentage() > 0.0 {
        cmd.push("loss".to_string());
        cmd.push(format!("{}%", connection.packet_loss_percentage()));
    }
    match connection.packet_delay_distribution() {
        PacketDelayDistribution::Uniform { value_ms } if value_ms > 0 => {
            cmd.push("delay".to_string());
            cmd.push(format!("{value_ms}ms"));
        }
        PacketDelayDistribution::Normal {
            mean_ms,
            std_dev_ms,
            correlation,
        } if mean_ms > 0 => {
            cmd.push("delay".to_string());
            cmd.push(format!("{mean_ms}ms"));
            cmd.push(format!("{std_dev_ms}ms"));
            cmd.push(format!("{correlation}%"));
            cmd.push("distribution".to_string());
            cmd.push("normal".to_string());
        }
        _ => {}
    }
    cmd
}

fn merge_commands(commands: Vec<Vec<String>>) -> Vec<String> {
    let mut merged = Vec::new();
    for (index, command) in commands.into_iter().enumerate() {
        if index > 0 {
            merged.push("&&".to_string());
        }
        merged.extend(command);
    }
    merged
}

fn to_strings(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(last_octet: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(172, 28, 0, last_octet))
    }

    #[test]
    fn test_init_command_builds_root_scaffolding() {
        let cmd = generate_init_command().join(" ");
        assert!(cmd.starts_with("tc qdisc add dev eth1 root handle 1: htb"));
        assert!(cmd.contains("classid 1:1"));
        assert!(cmd.contains("classid 1:2"));
        assert!(cmd.contains("handle 2: htb"));
        assert!(cmd.contains("handle 3: htb"));
        // Root filter initially points at class A.
        assert!(cmd.contains("basic flowid 1:1"));
    }

    #[test]
    fn test_update_command_full_replace_with_loss_and_delay() {
        let shaped = vec![
            (ip(5), PartitionConnection::with_packet_loss(50.0)),
            (
                ip(6),
                PartitionConnection::allowed()
                    .packet_delay(PacketDelayDistribution::uniform(100)),
            ),
        ];
        let cmd = generate_update_command(ActiveQdisc::B, &shaped).join(" ");

        // Background qdisc is flushed and rebuilt before new rules land.
        assert!(cmd.starts_with("tc qdisc del dev eth1 parent 1:2 handle 3: htb"));
        assert!(cmd.contains("loss 50%"));
        assert!(cmd.contains("delay 100ms"));
        assert!(cmd.contains("match ip dst 172.28.0.5"));
        assert!(cmd.contains("match ip dst 172.28.0.6"));
        // The swap to the rebuilt qdisc happens last.
        assert!(cmd.ends_with("tc filter replace dev eth1 parent 1: handle 1:0 basic flowid 1:2"));
    }

    #[test]
    fn test_update_command_normal_delay_distribution() {
        let shaped = vec![(
            ip(9),
            PartitionConnection::allowed()
                .packet_delay(PacketDelayDistribution::normal(200, 20, 25.0)),
        )];
        let cmd = generate_update_command(ActiveQdisc::A, &shaped).join(" ");
        assert!(cmd.contains("delay 200ms 20ms 25% distribution normal"));
    }

    #[test]
    fn test_update_command_is_deterministic() {
        let shaped = vec![
            (ip(5), PartitionConnection::blocked()),
            (ip(6), PartitionConnection::blocked()),
        ];
        assert_eq!(
            generate_update_command(ActiveQdisc::B, &shaped),
            generate_update_command(ActiveQdisc::B, &shaped),
        );
    }

    #[test]
    fn test_netem_qdisc_majors_alternate_parity() {
        // Children of A are even, children of B odd, starting after 3.
        assert_eq!(next_netem_qdisc_major(ActiveQdisc::A, 3), 4);
        assert_eq!(next_netem_qdisc_major(ActiveQdisc::A, 4), 6);
        assert_eq!(next_netem_qdisc_major(ActiveQdisc::B, 3), 5);
        assert_eq!(next_netem_qdisc_major(ActiveQdisc::B, 5), 7);
    }

    #[test]
    fn test_reinit_command_recreates_both_qdiscs() {
        let cmd = generate_reinit_command().join(" ");
        assert!(cmd.contains("tc qdisc del dev eth1 parent 1:1 handle 2: htb"));
        assert!(cmd.contains("tc qdisc del dev eth1 parent 1:2 handle 3: htb"));
        assert!(cmd.contains("tc qdisc add dev eth1 parent 1:1 handle 2: htb"));
        assert!(cmd.contains("tc qdisc add dev eth1 parent 1:2 handle 3: htb"));
    }
}
