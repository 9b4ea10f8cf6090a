use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::{DEFAULT_DISCOVERY_PORT, DEFAULT_SERVER_PORT, PROTOCOL_VERSION};
use crate::registry::DEFAULT_CAPACITY;

/// Well-known name whose address records list candidate cloudlets.
pub const DEFAULT_DISCOVERY_NAME: &str = "search.findcloudlet.org";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    pub max_connections: usize,
    pub protocol_version: String,
    pub max_payload_bytes: usize,
    pub read_timeout_ms: u64,
    pub full_backoff_ms: u64,
    pub send_acks: bool,
    pub provision_timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provision_script: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVER_PORT)),
            bind_ip: None,
            max_connections: DEFAULT_CAPACITY,
            protocol_version: PROTOCOL_VERSION.into(),
            max_payload_bytes: 16 * 1024 * 1024,
            read_timeout_ms: 30_000,
            full_backoff_ms: 100,
            send_acks: false,
            provision_timeout_ms: 600_000,
            provision_script: None,
        }
    }
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn full_backoff(&self) -> Duration {
        Duration::from_millis(self.full_backoff_ms)
    }

    /// Upper bound on a single provisioning script run.
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    pub dns_name: String,
    pub port: u16,
    /// Nameserver to query instead of the system resolver configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameserver: Option<SocketAddr>,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_payload_bytes: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            dns_name: DEFAULT_DISCOVERY_NAME.into(),
            port: DEFAULT_DISCOVERY_PORT,
            nameserver: None,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 5_000,
            max_payload_bytes: 1024 * 1024,
        }
    }
}

impl DiscoveryConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("cloudlet.toml"))
                .merge(Json::file("cloudlet.json"))
                .merge(Env::prefixed("CLOUDLET_").split("__")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // If bind_ip is set, override the IP part of the server bind address
        if let Some(ref ip) = config.server.bind_ip {
            let port = config.server.bind.port();
            config.server.bind = format!("{}:{}", ip, port)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid bind_ip: {}", e))?;
        }

        if config.server.max_connections == 0 {
            anyhow::bail!("server.max_connections must be at least 1");
        }

        Ok(config)
    }
}
