//! atp-core: Shared configuration and error types for atp-tunnel
//!
//! This crate holds the data the tunnel core is handed at startup: the
//! parsed configuration, the wallet preamble, and the error taxonomy used
//! by the authenticator, establisher and forwarder.

pub mod config;
pub mod error;
pub mod preamble;

pub use config::TunnelConfig;
pub use error::{AuthError, ConfigError, ConnError, ForwardError, PreambleError, TunnelError};
pub use preamble::Preamble;
