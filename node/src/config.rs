//! Node configuration with TOML file support.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use gatehouse_rpc::GuardConfig;
use gatehouse_types::NetworkId;
use gatehouse_utils::LogFormat;
use serde::{Deserialize, Serialize};

use crate::NodeError;

/// Configuration for the node front door.
///
/// Can be loaded from a TOML file via [`NodeConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Which network the node serves.
    #[serde(default)]
    pub network: NetworkId,

    /// Interface the HTTP listeners bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// JSON-RPC listener port. No listener when unset; 0 picks a free port.
    #[serde(default)]
    pub rpc_port: Option<u16>,

    /// REST listener port. No listener when unset; 0 picks a free port.
    #[serde(default)]
    pub rest_port: Option<u16>,

    /// Serve the extended RPC API behind the credential guard.
    #[serde(default)]
    pub extended_rpc: bool,

    /// Let requests without credentials through to the base API when the
    /// RPC listener is guarded.
    #[serde(default = "default_true")]
    pub allow_anonymous: bool,

    /// Ledger persistence cadence.
    #[serde(default = "default_persist_interval_ms")]
    pub persist_interval_ms: u64,

    /// Wallet block-processing cadence.
    #[serde(default = "default_wallet_sync_interval_ms")]
    pub wallet_sync_interval_ms: u64,

    /// Height monitor cadence.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    /// Upper bound on waiting for tasks and listeners to drain on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Log level filter: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Credential guard tuning.
    #[serde(default)]
    pub auth: GuardConfig,
}

// ── Serde default helpers ──────────────────────────────────────────────

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_persist_interval_ms() -> u64 {
    100
}

fn default_wallet_sync_interval_ms() -> u64 {
    1000
}

fn default_monitor_interval_secs() -> u64 {
    15
}

fn default_shutdown_timeout_secs() -> u64 {
    5
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// ── Impl ───────────────────────────────────────────────────────────────

impl NodeConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, NodeError> {
        toml::from_str(s).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> Result<String, NodeError> {
        toml::to_string_pretty(self).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Check cross-field rules.
    pub fn validate(&self) -> Result<(), NodeError> {
        if let (Some(rpc), Some(rest)) = (self.rpc_port, self.rest_port) {
            if rpc != 0 && rpc == rest {
                return Err(NodeError::Config(format!(
                    "rpc_port and rest_port must differ (both are {rpc})"
                )));
            }
        }
        if self.extended_rpc && self.rpc_port.is_none() {
            return Err(NodeError::Config(
                "extended_rpc requires rpc_port to be set".into(),
            ));
        }
        self.host_addr()?;
        self.log_format()?;
        for (name, value) in [
            ("persist_interval_ms", self.persist_interval_ms),
            ("wallet_sync_interval_ms", self.wallet_sync_interval_ms),
            ("monitor_interval_secs", self.monitor_interval_secs),
        ] {
            if value == 0 {
                return Err(NodeError::Config(format!("{name} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn log_format(&self) -> Result<LogFormat, NodeError> {
        LogFormat::from_str(&self.log_format).map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Install the global tracing subscriber described by this config.
    pub fn init_logging(&self) -> Result<(), NodeError> {
        gatehouse_utils::init_logging(self.log_format()?, &self.log_level)?;
        Ok(())
    }

    pub fn host_addr(&self) -> Result<IpAddr, NodeError> {
        self.host
            .parse()
            .map_err(|e| NodeError::Config(format!("invalid host {:?}: {e}", self.host)))
    }

    pub fn rpc_addr(&self) -> Result<Option<SocketAddr>, NodeError> {
        let host = self.host_addr()?;
        Ok(self.rpc_port.map(|port| SocketAddr::new(host, port)))
    }

    pub fn rest_addr(&self) -> Result<Option<SocketAddr>, NodeError> {
        let host = self.host_addr()?;
        Ok(self.rest_port.map(|port| SocketAddr::new(host, port)))
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_millis(self.persist_interval_ms)
    }

    pub fn wallet_sync_interval(&self) -> Duration {
        Duration::from_millis(self.wallet_sync_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: NetworkId::default(),
            host: default_host(),
            rpc_port: None,
            rest_port: None,
            extended_rpc: false,
            allow_anonymous: default_true(),
            persist_interval_ms: default_persist_interval_ms(),
            wallet_sync_interval_ms: default_wallet_sync_interval_ms(),
            monitor_interval_secs: default_monitor_interval_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            auth: GuardConfig::default(),
        }
    }
}
