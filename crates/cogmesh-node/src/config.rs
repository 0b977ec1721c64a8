//! Node configuration
//!
//! Loaded from TOML; every section and field has a default, so a config
//! file only needs the values that differ. Durations are milliseconds.
//!
//! ```toml
//! [agent]
//! agent_id = 3
//! hostname = "10.0.0.3"
//! port = 7400
//! capabilities = 0x25
//!
//! [sync]
//! round_interval_ms = 2000
//!
//! [transport]
//! bind = "0.0.0.0:7400"
//! seeds = ["10.0.0.1:7400"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cogmesh_core::{AgentAddress, AgentId, Capabilities};
use cogmesh_logging::LogConfig;
use cogmesh_sync::AttentionConfig;

use crate::error::{NodeError, NodeResult};

/// Default UDP port
pub const DEFAULT_PORT: u16 = 7400;

/// Configuration for a cogmesh node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NodeConfig {
    pub agent: AgentConfig,
    pub sync: SyncConfig,
    pub attention: AttentionConfig,
    pub transport: TransportConfig,
    pub features: FeatureFlags,
    pub log: LogConfig,
}

/// Identity this agent announces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Unique across the mesh; 0 is reserved
    pub agent_id: u32,
    /// Host other agents should send to
    pub hostname: String,
    /// Advertised port; 0 means the port actually bound
    pub port: u16,
    pub capabilities: u32,
    /// Initial load factor, lower is more available
    pub load_factor: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: 1,
            hostname: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            capabilities: (Capabilities::EVALUATE
                | Capabilities::PATTERN
                | Capabilities::INFERENCE
                | Capabilities::ATTENTION
                | Capabilities::MEMBRANE)
                .bits(),
            load_factor: 0,
        }
    }
}

/// Timing and queue sizes of the sync coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Period of discovery/heartbeat/attention/membrane rounds
    pub round_interval_ms: u64,
    /// Silence after which a peer is stale
    pub heartbeat_timeout_ms: u64,
    /// Silence after which a peer is evicted; must exceed the heartbeat timeout
    pub eviction_timeout_ms: u64,
    /// How long to wait for a reply
    pub round_trip_timeout_ms: u64,
    /// Unanswered exchanges before an active peer is marked stale
    pub max_missed_replies: u32,
    pub merge_queue_capacity: usize,
    /// Inbound command and inference requests waiting for the collaborator
    pub request_queue_capacity: usize,
    pub event_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            round_interval_ms: 5_000,
            heartbeat_timeout_ms: 15_000,
            eviction_timeout_ms: 45_000,
            round_trip_timeout_ms: 3_000,
            max_missed_replies: 3,
            merge_queue_capacity: 256,
            request_queue_capacity: 64,
            event_channel_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn round_interval(&self) -> Duration {
        Duration::from_millis(self.round_interval_ms)
    }

    pub fn round_trip_timeout(&self) -> Duration {
        Duration::from_millis(self.round_trip_timeout_ms)
    }

    /// Heartbeat timeout at clock resolution, rounded up
    pub fn heartbeat_timeout_secs(&self) -> u32 {
        ms_to_secs(self.heartbeat_timeout_ms)
    }

    /// Eviction timeout at clock resolution, rounded up
    pub fn eviction_timeout_secs(&self) -> u32 {
        ms_to_secs(self.eviction_timeout_ms)
    }

    pub fn round_trip_timeout_secs(&self) -> u32 {
        ms_to_secs(self.round_trip_timeout_ms)
    }
}

fn ms_to_secs(ms: u64) -> u32 {
    u32::try_from(ms.div_ceil(1000)).unwrap_or(u32::MAX)
}

/// UDP socket settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Local socket address to bind
    pub bind: String,
    /// Addresses that receive discovery broadcasts before any peer is known
    pub seeds: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            seeds: Vec::new(),
        }
    }
}

/// Runtime capability switches
///
/// A disabled feature makes the matching collaborator calls return
/// `CollaboratorError::Unsupported`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Pattern engine (encode/infer/transform)
    pub grammar: bool,
    /// Expression evaluator
    pub scheme: bool,
    /// Tensor kernels
    pub tensor: bool,
    /// Bind the UDP transport; off means the agent runs alone
    pub distributed: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            grammar: true,
            scheme: true,
            tensor: true,
            distributed: true,
        }
    }
}

impl NodeConfig {
    /// Parse a TOML document and validate it
    pub fn from_toml_str(input: &str) -> NodeResult<Self> {
        let config: NodeConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> NodeResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&input)
    }

    /// Check values that would break the coordinator
    pub fn validate(&self) -> NodeResult<()> {
        if self.agent.agent_id == 0 {
            return Err(NodeError::Config(
                "agent_id 0 is reserved for broadcast".into(),
            ));
        }
        if self.sync.eviction_timeout_ms <= self.sync.heartbeat_timeout_ms {
            return Err(NodeError::Config(format!(
                "eviction_timeout_ms ({}) must be greater than heartbeat_timeout_ms ({})",
                self.sync.eviction_timeout_ms, self.sync.heartbeat_timeout_ms
            )));
        }
        if self.sync.round_interval_ms == 0 {
            return Err(NodeError::Config("round_interval_ms must be positive".into()));
        }
        if self.sync.round_trip_timeout_ms == 0 {
            return Err(NodeError::Config(
                "round_trip_timeout_ms must be positive".into(),
            ));
        }
        if self.sync.merge_queue_capacity == 0
            || self.sync.request_queue_capacity == 0
            || self.sync.event_channel_capacity == 0
        {
            return Err(NodeError::Config("channel capacities must be positive".into()));
        }
        if self.agent.hostname.is_empty() {
            return Err(NodeError::Config("hostname must not be empty".into()));
        }
        Ok(())
    }

    pub fn agent_id(&self) -> AgentId {
        AgentId::new(self.agent.agent_id)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::new(self.agent.capabilities)
    }

    /// Address advertised in discovery and heartbeat messages
    pub fn address(&self) -> AgentAddress {
        AgentAddress::new(self.agent.hostname.clone(), self.agent.port)
    }

    pub fn with_agent_id(mut self, agent_id: u32) -> Self {
        self.agent.agent_id = agent_id;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.agent.capabilities = capabilities.bits();
        self
    }

    pub fn with_advertised_address(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.agent.hostname = hostname.into();
        self.agent.port = port;
        self
    }

    pub fn with_bind(mut self, bind: impl Into<String>) -> Self {
        self.transport.bind = bind.into();
        self
    }

    /// Add a seed address
    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.transport.seeds.push(peer.into());
        self
    }

    pub fn with_round_interval_ms(mut self, ms: u64) -> Self {
        self.sync.round_interval_ms = ms;
        self
    }

    /// Set heartbeat and eviction timeouts together
    pub fn with_timeouts_ms(mut self, heartbeat: u64, eviction: u64) -> Self {
        self.sync.heartbeat_timeout_ms = heartbeat;
        self.sync.eviction_timeout_ms = eviction;
        self
    }

    pub fn with_round_trip_timeout_ms(mut self, ms: u64) -> Self {
        self.sync.round_trip_timeout_ms = ms;
        self
    }

    pub fn with_features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log.default_level = level.into();
        self
    }
}

/// Parse a capability mask given as decimal or `0x` hex
pub fn parse_capability_mask(input: &str) -> Result<u32, String> {
    let input = input.trim();
    let parsed = match input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|e| format!("invalid capability mask {input:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = NodeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sync.round_interval_ms, 5_000);
        assert_eq!(config.sync.heartbeat_timeout_secs(), 15);
        assert_eq!(config.sync.eviction_timeout_secs(), 45);
        assert!(config.capabilities().contains(Capabilities::MEMBRANE));
        assert!(config.features.distributed);
    }

    #[test]
    fn test_eviction_must_exceed_heartbeat() {
        let config = NodeConfig::default().with_timeouts_ms(10_000, 10_000);
        assert!(matches!(config.validate(), Err(NodeError::Config(_))));

        let config = NodeConfig::default().with_timeouts_ms(10_000, 10_001);
        config.validate().unwrap();
    }

    #[test]
    fn test_broadcast_id_rejected() {
        let config = NodeConfig::default().with_agent_id(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            [agent]
            agent_id = 9
            capabilities = 0x21

            [sync]
            round_interval_ms = 250

            [features]
            tensor = false

            [log]
            default_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.agent_id(), AgentId::new(9));
        assert_eq!(config.capabilities(), Capabilities::new(0x21));
        assert_eq!(config.agent.hostname, "127.0.0.1");
        assert_eq!(config.sync.round_interval(), Duration::from_millis(250));
        assert_eq!(config.sync.eviction_timeout_ms, 45_000);
        assert!(!config.features.tensor);
        assert!(config.features.scheme);
        assert_eq!(config.log.default_level, "debug");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = NodeConfig::from_toml_str("[sync]\nheartbeat_timeout_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[transport]\nbind = \"127.0.0.1:0\"\nseeds = [\"127.0.0.1:7401\"]"
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.transport.bind, "127.0.0.1:0");
        assert_eq!(config.transport.seeds, vec!["127.0.0.1:7401".to_string()]);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = NodeConfig::load("/nonexistent/cogmesh.toml").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn test_builders() {
        let config = NodeConfig::default()
            .with_agent_id(4)
            .with_bind("127.0.0.1:0")
            .with_peer("127.0.0.1:7401")
            .with_round_interval_ms(100)
            .with_round_trip_timeout_ms(1_500);
        assert_eq!(config.agent.agent_id, 4);
        assert_eq!(config.transport.seeds.len(), 1);
        assert_eq!(config.sync.round_trip_timeout_secs(), 2);
    }

    #[test]
    fn test_parse_capability_mask() {
        assert_eq!(parse_capability_mask("0x25"), Ok(0x25));
        assert_eq!(parse_capability_mask("37"), Ok(37));
        assert!(parse_capability_mask("0xZZ").is_err());
    }
}
