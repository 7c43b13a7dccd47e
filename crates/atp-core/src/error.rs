//! Core error types for atp-tunnel

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for a tunnel run
///
/// Every variant is fatal to the process. Per-connection failures are
/// reported as [`ForwardError`] and never surface here.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Wallet could not be loaded
    #[error("Wallet error: {0}")]
    Preamble(#[from] PreambleError),

    /// Agent authentication error
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// SSH transport error
    #[error("Connection error: {0}")]
    Conn(#[from] ConnError),
}

/// Errors obtaining identities from the SSH agent
#[derive(Error, Debug)]
pub enum AuthError {
    /// The invoking user's home directory could not be resolved
    #[error("Could not resolve the current user's home directory")]
    HomeUnresolved,

    /// The agent socket could not be dialed
    #[error("SSH agent unavailable at {path}: {source}")]
    AgentUnavailable {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The agent answered with something other than an identity list
    #[error("SSH agent protocol error: {0}")]
    Agent(#[source] anyhow::Error),

    /// The agent holds no usable identities
    #[error("SSH agent at {path} has no identities loaded")]
    NoIdentities { path: PathBuf },
}

/// SSH transport errors
#[derive(Error, Debug)]
pub enum ConnError {
    /// TCP dial to the SSH server failed or timed out
    #[error("Failed to connect to {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// Key exchange or host key verification failed
    #[error("SSH handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    /// None of the agent identities were accepted
    #[error("Authentication rejected for user '{username}' ({tried} identities tried)")]
    AuthRejected { username: String, tried: usize },

    /// The agent could not be reached for signing
    #[error("SSH agent lost during authentication: {0}")]
    Agent(#[source] anyhow::Error),

    /// The server refused the remote forward request
    #[error("Remote listen on {address} refused: {source}")]
    ListenRefused {
        address: String,
        #[source]
        source: anyhow::Error,
    },

    /// The remote listener stopped producing connections
    #[error("Remote listener closed")]
    ListenerClosed,
}

/// Errors scoped to one forwarded connection
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Target dial failed
    #[error("Failed to connect to target {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Target dial did not complete in time
    #[error("Timed out connecting to target {target}")]
    DialTimeout { target: String },

    /// Writing the preamble to the target failed
    #[error("Failed to write preamble to target: {0}")]
    Preamble(#[source] std::io::Error),

    /// A relay direction failed
    #[error("Relay {direction} failed: {source}")]
    Relay {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A relay task panicked or was cancelled
    #[error("Relay task failed: {0}")]
    Task(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file could not be read
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A field is present but unusable
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors loading the wallet preamble
#[derive(Error, Debug)]
pub enum PreambleError {
    /// Wallet file could not be read
    #[error("Failed to read wallet file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
