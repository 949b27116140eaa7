//! Connection configuration.
//!
//! All structs deserialize from JSON with every field optional; durations are
//! written in milliseconds under `*_ms` keys.

use std::time::Duration;

use mosprims_frame::{FrameConfig, DEFAULT_MAX_DOCUMENT_CHARS};
use mosprims_model::{MachineInfo, PortType, Strictness};
use serde::{Deserialize, Deserializer};

/// Default command timeout: 5 seconds.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default delay between reconnection attempts: 3 seconds.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Default heartbeat interval: 5 seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Per-channel behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a command may wait for its reply (and, unsent, in the queue).
    #[serde(rename = "command_timeout_ms", deserialize_with = "millis")]
    pub command_timeout: Duration,
    /// Minimum spacing of connection attempts, and the reconnect timer period.
    #[serde(rename = "reconnect_delay_ms", deserialize_with = "millis")]
    pub reconnect_delay: Duration,
    /// Give up after this many timer-driven attempts in a row. 0 = never.
    pub reconnect_attempts: u32,
    pub auto_reconnect: bool,
    #[serde(rename = "connect_timeout_ms", deserialize_with = "millis")]
    pub connect_timeout: Duration,
    /// How long ids of timed-out commands are remembered to absorb late replies.
    #[serde(rename = "timed_out_retention_ms", deserialize_with = "millis")]
    pub timed_out_retention: Duration,
    pub max_document_chars: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_attempts: 0,
            auto_reconnect: true,
            connect_timeout: Duration::from_secs(3),
            timed_out_retention: Duration::from_secs(3600),
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }
}

impl ClientConfig {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            max_document_chars: self.max_document_chars,
        }
    }
}

/// TCP port of each channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ChannelPorts {
    pub lower: u16,
    pub upper: u16,
    pub query: u16,
}

impl Default for ChannelPorts {
    fn default() -> Self {
        Self {
            lower: 10540,
            upper: 10541,
            query: 10542,
        }
    }
}

impl ChannelPorts {
    pub fn port(&self, port: PortType) -> u16 {
        match port {
            PortType::Lower => self.lower,
            PortType::Upper => self.upper,
            PortType::Query => self.query,
        }
    }
}

/// One logical connection to an NCS.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// The NCS id; also written as `ncsID` in every envelope.
    pub id: String,
    pub host: String,
    pub ports: ChannelPorts,
    /// Channels to open. All of them must be up for the connection to count as connected.
    pub channels: Vec<PortType>,
    #[serde(rename = "heartbeat_interval_ms", deserialize_with = "millis")]
    pub heartbeat_interval: Duration,
    pub client: ClientConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            id: "primary".to_string(),
            host: "127.0.0.1".to_string(),
            ports: ChannelPorts::default(),
            channels: vec![PortType::Lower, PortType::Upper],
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            client: ClientConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_ports(mut self, ports: ChannelPorts) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_channels(mut self, channels: impl IntoIterator<Item = PortType>) -> Self {
        self.channels = channels.into_iter().collect();
        self
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// A device (MOS) talking to one NCS, optionally through a hot-standby pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Our id, written as `mosID` in every envelope.
    pub mos_id: String,
    pub strict: bool,
    pub primary: ConnectionConfig,
    pub secondary: Option<ConnectionConfig>,
    /// Keep the secondary connected but silent until the primary fails.
    pub hot_standby: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            mos_id: "mosprims".to_string(),
            strict: true,
            primary: ConnectionConfig::default(),
            secondary: None,
            hot_standby: false,
        }
    }
}

impl DeviceConfig {
    pub fn strictness(&self) -> Strictness {
        Strictness::from_strict(self.strict)
    }
}

/// Server role: which parties we answer and what we say about ourselves.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub mos_id: String,
    /// Accepted NCS ids. Empty accepts any.
    pub ncs_ids: Vec<String>,
    pub strict: bool,
    #[serde(skip)]
    pub machine_info: Option<MachineInfo>,
    pub max_document_chars: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            mos_id: "mosprims".to_string(),
            ncs_ids: Vec::new(),
            strict: true,
            machine_info: None,
            max_document_chars: DEFAULT_MAX_DOCUMENT_CHARS,
        }
    }
}
