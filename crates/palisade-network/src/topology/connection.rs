//! Connectivity policies between partitions.

use palisade_core::PartitionId;
use serde::{Deserialize, Serialize};

/// Artificial packet delay applied between two partitions.
///
/// Rendered into a netem `delay` clause by the sidecar layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PacketDelayDistribution {
    /// Constant delay.
    Uniform {
        /// Delay applied to every packet, in milliseconds.
        value_ms: u32,
    },

    /// Normally-distributed delay.
    Normal {
        /// Mean delay in milliseconds.
        mean_ms: u32,
        /// Standard deviation in milliseconds.
        std_dev_ms: u32,
        /// How much each packet's delay depends on the previous packet's,
        /// as a percentage.
        correlation: f32,
    },
}

impl PacketDelayDistribution {
    /// No delay at all.
    pub fn none() -> Self {
        Self::Uniform { value_ms: 0 }
    }

    /// Constant delay of `value_ms` milliseconds.
    pub fn uniform(value_ms: u32) -> Self {
        Self::Uniform { value_ms }
    }

    /// Normally-distributed delay.
    pub fn normal(mean_ms: u32, std_dev_ms: u32, correlation: f32) -> Self {
        Self::Normal {
            mean_ms,
            std_dev_ms,
            correlation,
        }
    }

    /// Returns true if this distribution adds no delay.
    pub fn is_zero(&self) -> bool {
        match self {
            Self::Uniform { value_ms } => *value_ms == 0,
            Self::Normal { mean_ms, .. } => *mean_ms == 0,
        }
    }
}

impl Default for PacketDelayDistribution {
    fn default() -> Self {
        Self::none()
    }
}

/// Symmetric, undirected connectivity policy between two partitions.
///
/// Applied in both directions; the pair `(A, B)` and `(B, A)` are the same
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartitionConnection {
    packet_loss_percentage: f32,
    packet_delay: PacketDelayDistribution,
}

impl PartitionConnection {
    /// Full connectivity: no loss, no delay. This is what services within
    /// one partition always get toward each other.
    pub fn allowed() -> Self {
        Self {
            packet_loss_percentage: 0.0,
            packet_delay: PacketDelayDistribution::none(),
        }
    }

    /// No connectivity: 100% packet loss.
    pub fn blocked() -> Self {
        Self {
            packet_loss_percentage: 100.0,
            packet_delay: PacketDelayDistribution::none(),
        }
    }

    /// Creates a connection with the given packet loss percentage.
    pub fn with_packet_loss(packet_loss_percentage: f32) -> Self {
        Self {
            packet_loss_percentage: packet_loss_percentage.clamp(0.0, 100.0),
            packet_delay: PacketDelayDistribution::none(),
        }
    }

    /// Sets the packet delay distribution.
    pub fn packet_delay(mut self, delay: PacketDelayDistribution) -> Self {
        self.packet_delay = delay;
        self
    }

    /// Returns the packet loss percentage.
    pub fn packet_loss_percentage(&self) -> f32 {
        self.packet_loss_percentage
    }

    /// Returns the packet delay distribution.
    pub fn packet_delay_distribution(&self) -> PacketDelayDistribution {
        self.packet_delay
    }

    /// Returns true if traffic passes completely unshaped.
    pub fn is_fully_open(&self) -> bool {
        self.packet_loss_percentage == 0.0 && self.packet_delay.is_zero()
    }
}

impl Default for PartitionConnection {
    fn default() -> Self {
        Self::allowed()
    }
}

/// Key identifying the connection between two partitions.
///
/// The pair is unordered: constructing the ID from `(A, B)` or `(B, A)`
/// yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionConnectionId {
    first: PartitionId,
    second: PartitionId,
}

impl PartitionConnectionId {
    /// Creates the canonical key for the unordered pair.
    pub fn new(a: PartitionId, b: PartitionId) -> Self {
        if a <= b {
            Self {
                first: a,
                second: b,
            }
        } else {
            Self {
                first: b,
                second: a,
            }
        }
    }

    /// Returns the lexicographically-smaller partition of the pair.
    pub fn first(&self) -> &PartitionId {
        &self.first
    }

    /// Returns the lexicographically-larger partition of the pair.
    pub fn second(&self) -> &PartitionId {
        &self.second
    }
}
