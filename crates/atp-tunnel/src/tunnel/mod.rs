//! SSH session and remote-bound listener

mod connector;
mod listener;

pub use connector::{establish, SecureSession};
pub use listener::RemoteListener;
