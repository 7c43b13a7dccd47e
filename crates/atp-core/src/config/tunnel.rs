//! Tunnel configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::opt_duration_secs;
use crate::error::ConfigError;

/// Complete configuration for one tunnel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// SSH server carrying the tunnel
    pub ssh: SshConfig,

    /// Address the SSH server listens on for us
    pub bind: BindConfig,

    /// Service every accepted connection is forwarded to
    pub target: TargetConfig,

    /// Wallet sent to the target ahead of relayed traffic
    pub wallet: Option<WalletConfig>,
}

impl TunnelConfig {
    /// Check that every field the tunnel core relies on is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssh.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("ssh.hostname is empty".into()));
        }
        if self.ssh.port == 0 {
            return Err(ConfigError::Invalid("ssh.port must be non-zero".into()));
        }
        if self.ssh.username.trim().is_empty() {
            return Err(ConfigError::Invalid("ssh.username is empty".into()));
        }
        if self.bind.address.trim().is_empty() {
            return Err(ConfigError::Invalid("bind.address is empty".into()));
        }
        if self.target.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("target.hostname is empty".into()));
        }
        if self.target.port == 0 {
            return Err(ConfigError::Invalid("target.port must be non-zero".into()));
        }
        if let Some(wallet) = &self.wallet {
            if wallet.name.trim().is_empty() {
                return Err(ConfigError::Invalid("wallet.name is empty".into()));
            }
        }
        Ok(())
    }
}

/// SSH endpoint and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// SSH server hostname
    pub hostname: String,

    /// SSH server port
    pub port: u16,

    /// Username for SSH authentication
    pub username: String,

    /// Expected server key fingerprint (`SHA256:...`); any key is accepted when unset
    pub host_key_fingerprint: Option<String>,

    /// Agent socket, defaults to `~/.ssh/agent.sock`
    pub agent_socket: Option<PathBuf>,

    /// Limit on TCP dial plus handshake
    #[serde(with = "opt_duration_secs")]
    pub connect_timeout: Option<Duration>,

    /// Interval between SSH keepalive requests
    #[serde(with = "opt_duration_secs")]
    pub keepalive_interval: Option<Duration>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: 22,
            username: whoami::username(),
            host_key_fingerprint: None,
            agent_socket: None,
            connect_timeout: Some(Duration::from_secs(30)),
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl SshConfig {
    /// `host:port` of the SSH server
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Remote-bound listen address requested over the session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BindConfig {
    /// Address on the SSH server side
    pub address: String,

    /// Port on the SSH server side; 0 lets the server choose
    pub port: u16,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            address: "localhost".to_string(),
            port: 1522,
        }
    }
}

impl BindConfig {
    /// `host:port` requested from the SSH server
    pub fn address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// Target service endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Target hostname
    pub hostname: String,

    /// Target port
    pub port: u16,

    /// Limit on each target dial
    #[serde(with = "opt_duration_secs")]
    pub connect_timeout: Option<Duration>,
}

impl TargetConfig {
    /// Build a target from `host:port`
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::Invalid(format!("target '{}' is not host:port", value)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| ConfigError::Invalid(format!("target port '{}' is not a number", port)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self {
            hostname: host.to_string(),
            port,
            connect_timeout: None,
        })
    }

    /// `host:port` dialed for every forwarded connection
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

/// Location of the wallet file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Directory containing the wallet
    pub path: PathBuf,

    /// Wallet file name inside `path`
    pub name: String,
}

impl WalletConfig {
    /// Full path of the wallet file
    pub fn file_path(&self) -> PathBuf {
        self.path.join(&self.name)
    }
}
