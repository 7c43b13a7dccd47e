//! Top-level tunnel lifecycle
//!
//! Owns the session and listener for the duration of one run and releases
//! them when the accept loop ends, whether through cancellation or a fatal
//! transport error.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use atp_core::{Preamble, TunnelConfig, TunnelError};

use crate::auth::{authenticate, default_agent_socket};
use crate::forward::Forwarder;
use crate::serve::serve;
use crate::tunnel::establish;

/// Authenticate, establish the tunnel and forward until cancelled
///
/// Returns `Ok` only after `cancel` fires. Every error is fatal.
pub async fn run(config: TunnelConfig, cancel: CancellationToken) -> Result<(), TunnelError> {
    config.validate()?;

    let socket = match &config.ssh.agent_socket {
        Some(path) => path.clone(),
        None => default_agent_socket()?,
    };
    let credential = authenticate(&socket).await?;

    let preamble = match &config.wallet {
        Some(wallet) => {
            let path = wallet.file_path();
            let preamble = Preamble::load(&path)?;
            tracing::info!("Loaded wallet {} ({} bytes)", path.display(), preamble.len());
            preamble
        }
        None => {
            tracing::info!("No wallet configured, forwarding without preamble");
            Preamble::empty()
        }
    };

    let (session, listener) = establish(&config.ssh, credential, &config.bind).await?;
    tracing::info!(
        "Port forwarding started on {}:{}",
        listener.address(),
        listener.port()
    );

    let forwarder = Arc::new(Forwarder::new(config.target.clone(), preamble));
    let result = serve(listener, forwarder, cancel).await;

    tracing::debug!("Closing session to {}", session.endpoint());
    session.close().await;

    let summary = result?;
    tracing::info!(
        "Tunnel closed after {} connections ({} failed)",
        summary.accepted,
        summary.failed
    );
    Ok(())
}
