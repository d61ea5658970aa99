//! Hub configuration
//!
//! Everything the orchestrator needs at construction time: bus naming, the
//! optional seed passphrase, and the protocol timing knobs. Durations
//! serialize in humantime form ("3s", "750ms") so config files stay
//! readable.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default scan window before picking a bridge candidate
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Default spacing between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default discovery sweep / examine window
pub const DEFAULT_QUERY_WINDOW: Duration = Duration::from_secs(5);

/// Default claim handshake ceiling
pub const DEFAULT_ASSOCIATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default window in which repeated brightness commands skip the mesh
pub const DEFAULT_RAPID_DIM_THRESHOLD: Duration = Duration::from_millis(750);

/// Hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Node name used in discovery unique ids
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Topic prefix for light and management topics
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Seed passphrase; only applied when storage has none yet
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Scan window before picking a bridge candidate
    #[serde(with = "humantime_serde", default = "default_scan_window")]
    pub scan_window: Duration,

    /// Spacing between reconnection attempts
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,

    /// Discovery sweep window
    #[serde(with = "humantime_serde", default = "default_query_window")]
    pub discovery_window: Duration,

    /// Examine query deadline
    #[serde(with = "humantime_serde", default = "default_query_window")]
    pub examine_timeout: Duration,

    /// Claim handshake ceiling
    #[serde(with = "humantime_serde", default = "default_association_timeout")]
    pub association_timeout: Duration,

    /// Repeated brightness commands inside this window skip the mesh
    #[serde(with = "humantime_serde", default = "default_rapid_dim")]
    pub rapid_dim_threshold: Duration,
}

fn default_node_name() -> String {
    "avion-hub".to_string()
}

fn default_topic_prefix() -> String {
    "avion".to_string()
}

fn default_scan_window() -> Duration {
    DEFAULT_SCAN_WINDOW
}

fn default_reconnect_delay() -> Duration {
    DEFAULT_RECONNECT_DELAY
}

fn default_query_window() -> Duration {
    DEFAULT_QUERY_WINDOW
}

fn default_association_timeout() -> Duration {
    DEFAULT_ASSOCIATION_TIMEOUT
}

fn default_rapid_dim() -> Duration {
    DEFAULT_RAPID_DIM_THRESHOLD
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            topic_prefix: default_topic_prefix(),
            passphrase: None,
            scan_window: DEFAULT_SCAN_WINDOW,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            discovery_window: DEFAULT_QUERY_WINDOW,
            examine_timeout: DEFAULT_QUERY_WINDOW,
            association_timeout: DEFAULT_ASSOCIATION_TIMEOUT,
            rapid_dim_threshold: DEFAULT_RAPID_DIM_THRESHOLD,
        }
    }
}

/// Builder for [`HubConfig`]
#[derive(Debug, Default)]
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    /// Create a builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the node name
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.config.node_name = name.into();
        self
    }

    /// Set the topic prefix
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Set the seed passphrase
    pub fn passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.config.passphrase = Some(passphrase.into());
        self
    }

    /// Set the reconnect spacing
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set discovery/examine windows together
    pub fn query_window(mut self, window: Duration) -> Self {
        self.config.discovery_window = window;
        self.config.examine_timeout = window;
        self
    }

    /// Set the claim handshake ceiling
    pub fn association_timeout(mut self, timeout: Duration) -> Self {
        self.config.association_timeout = timeout;
        self
    }

    /// Build the configuration
    pub fn build(self) -> HubConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
