//! atp-tunnel: SSH remote-forward tunnel in front of a database
//!
//! Authenticates through the local SSH agent, asks the SSH server to
//! listen on our behalf, and relays every connection it hands back to a
//! fixed target, writing the wallet preamble first.

pub mod auth;
pub mod forward;
pub mod run;
pub mod serve;
pub mod tunnel;

pub use auth::{authenticate, default_agent_socket, Credential};
pub use forward::{Forwarder, RelayStats};
pub use run::run;
pub use serve::{serve, Accepted, ServeSummary, StreamListener};
pub use tunnel::{establish, RemoteListener, SecureSession};
