//! Agent identity, capabilities, and addresses
//!
//! Agents are identified by a numeric id that is unique across the mesh.
//! Id `0` is reserved as the broadcast destination.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// Numeric identity of an agent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl AgentId {
    /// Destination id meaning "every agent"
    pub const BROADCAST: AgentId = AgentId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == 0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            write!(f, "*")
        } else {
            write!(f, "agent-{}", self.0)
        }
    }
}

impl From<u32> for AgentId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Capability bitmask advertised by an agent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Capabilities(pub u32);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Symbolic expression evaluation
    pub const EVALUATE: Capabilities = Capabilities(0x01);
    /// Pattern encoding and transformation
    pub const PATTERN: Capabilities = Capabilities(0x02);
    /// Probabilistic inference
    pub const INFERENCE: Capabilities = Capabilities(0x04);
    /// Numeric tensor kernels
    pub const TENSOR: Capabilities = Capabilities(0x08);
    /// Attention allocation
    pub const ATTENTION: Capabilities = Capabilities(0x10);
    /// Holds membrane replicas
    pub const MEMBRANE: Capabilities = Capabilities(0x20);
    pub const ALL: Capabilities = Capabilities(u32::MAX);

    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True if any requested bit is present
    pub fn intersects(&self, other: Capabilities) -> bool {
        self.0 & other.0 != 0
    }

    /// True if every requested bit is present
    pub fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Network address an agent advertises for itself
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentAddress {
    pub host: String,
    pub port: u16,
}

impl AgentAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
