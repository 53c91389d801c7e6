//! Configuration for ringkv nodes

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "ringkv.toml";

/// Prefix for environment overrides (`RINGKV_FORWARD_TIMEOUT_MS=500`)
pub const ENV_PREFIX: &str = "RINGKV";

/// Key ownership strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementKind {
    /// `hash(key) mod |members|` over the sorted member ids
    #[default]
    Modulo,
    /// Highest random weight over (key, id)
    Rendezvous,
}

impl std::str::FromStr for PlacementKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "modulo" | "mod" => Ok(PlacementKind::Modulo),
            "rendezvous" | "hrw" => Ok(PlacementKind::Rendezvous),
            other => Err(Error::InvalidConfig(format!(
                "unknown placement strategy: {}",
                other
            ))),
        }
    }
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node ID, chosen by the launcher (usually supplied on the command line)
    #[serde(default)]
    pub node_id: u64,

    /// Bind address for the client-facing API
    #[serde(default = "default_api_addr")]
    pub api_addr: SocketAddr,

    /// Bind address for peer traffic (join, ping, forwarded operations)
    #[serde(default = "default_cluster_addr")]
    pub cluster_addr: SocketAddr,

    /// Address peers should use for the client API, if different from the bound one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_api: Option<String>,

    /// Address peers should use for cluster traffic, if different from the bound one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_cluster: Option<String>,

    /// Key ownership strategy
    #[serde(default)]
    pub placement: PlacementKind,

    /// Timeout for a forwarded operation or a join handshake
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_ms: u64,

    /// Timeout for a liveness probe
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_ms: u64,

    /// Interval between background probe rounds (0 disables probing)
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// How long an evicted id is ignored when it shows up in a peer's snapshot
    #[serde(default = "default_departed_ttl")]
    pub departed_ttl_secs: u64,

    /// Retry once against the recomputed owner after evicting an unreachable one
    #[serde(default = "default_true")]
    pub retry_on_failover: bool,

    /// Ping the owner before forwarding to it
    #[serde(default)]
    pub probe_before_forward: bool,

    /// Push keys to their new owner after membership changes
    #[serde(default = "default_true")]
    pub handoff: bool,

    /// Max request body size in bytes
    #[serde(default = "default_max_body")]
    pub max_body_bytes: usize,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}
fn default_cluster_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9080))
}
fn default_forward_timeout() -> u64 {
    2_000
}
fn default_ping_timeout() -> u64 {
    500
}
fn default_probe_interval() -> u64 {
    2_000
}
fn default_departed_ttl() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_max_body() -> usize {
    1024 * 1024
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            api_addr: default_api_addr(),
            cluster_addr: default_cluster_addr(),
            advertise_api: None,
            advertise_cluster: None,
            placement: PlacementKind::default(),
            forward_timeout_ms: default_forward_timeout(),
            ping_timeout_ms: default_ping_timeout(),
            probe_interval_ms: default_probe_interval(),
            departed_ttl_secs: default_departed_ttl(),
            retry_on_failover: true,
            probe_before_forward: false,
            handoff: true,
            max_body_bytes: default_max_body(),
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// Config for a node listening on the given addresses, defaults elsewhere
    pub fn new(node_id: u64, api_addr: SocketAddr, cluster_addr: SocketAddr) -> Self {
        Self {
            node_id,
            api_addr,
            cluster_addr,
            ..Default::default()
        }
    }

    /// Load from `ringkv.toml` (if present) and `RINGKV_*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file (optional) layered under the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let cfg: NodeConfig = settings.try_deserialize()?;
        Ok(cfg)
    }

    /// Reject configurations the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.api_addr == self.cluster_addr && self.api_addr.port() != 0 {
            return Err(Error::InvalidConfig(format!(
                "api and cluster listeners share {}",
                self.api_addr
            )));
        }
        if self.forward_timeout_ms == 0 || self.ping_timeout_ms == 0 {
            return Err(Error::InvalidConfig("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// `None` when background probing is disabled
    pub fn probe_interval(&self) -> Option<Duration> {
        (self.probe_interval_ms > 0).then(|| Duration::from_millis(self.probe_interval_ms))
    }

    pub fn departed_ttl(&self) -> Duration {
        Duration::from_secs(self.departed_ttl_secs)
    }
}
