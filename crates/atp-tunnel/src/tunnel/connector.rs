//! Outbound SSH connector
//!
//! Opens the session, authenticates through the agent and registers the
//! remote forward.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, Disconnect};
use russh_keys::key::PublicKey;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use atp_core::config::{BindConfig, SshConfig};
use atp_core::ConnError;

use super::listener::{ForwardedChannel, RemoteListener};
use crate::auth::{connect_agent, Credential};

/// Forwarded connections buffered between the SSH session and the accept loop.
const FORWARDED_CHANNEL_CAPACITY: usize = 256;

/// The authenticated SSH session carrying the tunnel
pub struct SecureSession {
    handle: Handle<TunnelHandler>,
    endpoint: String,
}

impl SecureSession {
    /// SSH server this session is connected to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Disconnect the session, which also tears down the remote listener
    pub async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "tunnel closing", "en")
            .await
        {
            tracing::debug!("Disconnect from {} failed: {}", self.endpoint, e);
        }
    }
}

/// Open the SSH session and request the remote-bound listener
pub async fn establish(
    ssh: &SshConfig,
    credential: Credential,
    bind: &BindConfig,
) -> Result<(SecureSession, RemoteListener), ConnError> {
    let endpoint = ssh.address();

    tracing::debug!("Connecting to {}", endpoint);
    let stream = with_timeout(
        ssh.connect_timeout,
        TcpStream::connect((ssh.hostname.as_str(), ssh.port)),
    )
    .await
    .and_then(|r| r.map_err(anyhow::Error::from))
    .map_err(|source| ConnError::Dial {
        endpoint: endpoint.clone(),
        source,
    })?;

    let ssh_config = Arc::new(Config {
        keepalive_interval: ssh.keepalive_interval,
        ..Default::default()
    });

    let (forwarded_tx, forwarded_rx) = mpsc::channel(FORWARDED_CHANNEL_CAPACITY);
    let requested = u32::from(bind.port);
    let bound_port = Arc::new(AtomicU32::new(requested));
    let handler = TunnelHandler::new(
        ssh.host_key_fingerprint.clone(),
        Arc::clone(&bound_port),
        forwarded_tx,
    );

    let mut handle = with_timeout(
        ssh.connect_timeout,
        client::connect_stream(ssh_config, stream, handler),
    )
    .await
    .and_then(|r| r)
    .map_err(|source| ConnError::Handshake {
        endpoint: endpoint.clone(),
        source,
    })?;

    authenticate_session(&mut handle, &ssh.username, credential).await?;
    tracing::info!("Authenticated to {} as '{}'", endpoint, ssh.username);

    let assigned = handle
        .tcpip_forward(bind.address.clone(), requested)
        .await
        .map_err(|e| ConnError::ListenRefused {
            address: bind.address(),
            source: anyhow::anyhow!("{}", e),
        })?;
    let port = if assigned != 0 { assigned } else { requested };
    bound_port.store(port, Ordering::Release);

    tracing::info!(
        "Remote listener bound on {}:{} via {}",
        bind.address,
        port,
        endpoint
    );

    Ok((
        SecureSession { handle, endpoint },
        RemoteListener::new(bind.address.clone(), port, forwarded_rx),
    ))
}

/// Try each agent identity in order until the server accepts one
///
/// The agent connection used for signing is dropped on return.
async fn authenticate_session(
    handle: &mut Handle<TunnelHandler>,
    username: &str,
    credential: Credential,
) -> Result<(), ConnError> {
    let (socket, identities) = credential.into_parts();
    let tried = identities.len();

    let mut agent = connect_agent(&socket)
        .await
        .map_err(|e| ConnError::Agent(anyhow::Error::from(e)))?;

    for identity in identities {
        let fingerprint = identity.fingerprint();
        tracing::debug!("Trying identity {}", fingerprint);

        let (returned, result) = handle.authenticate_future(username, identity, agent).await;
        agent = returned;

        match result {
            Ok(true) => return Ok(()),
            Ok(false) => tracing::debug!("Identity {} rejected", fingerprint),
            Err(e) => tracing::warn!("Signing with identity {} failed: {:?}", fingerprint, e),
        }
    }

    Err(ConnError::AuthRejected {
        username: username.to_string(),
        tried,
    })
}

async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> anyhow::Result<T>
where
    F: std::future::Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::anyhow!("timed out after {:?}", limit)),
        None => Ok(fut.await),
    }
}

/// Strip the `SHA256:` prefix so both notations compare equal
fn normalize_fingerprint(fingerprint: &str) -> &str {
    fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint)
}

/// Whether a forwarded channel belongs to the forward we requested
///
/// A bound port of 0 means the server has not reported its choice yet.
fn is_bound_port(bound: u32, connected: u32) -> bool {
    bound == 0 || bound == connected
}

/// SSH client handler for the tunnel session
struct TunnelHandler {
    /// Pinned server key fingerprint
    expected_host_key: Option<String>,
    /// Port of the remote forward, 0 until the server assigns one
    bound_port: Arc<AtomicU32>,
    /// Forwarded connections for the remote listener
    forwarded_tx: mpsc::Sender<ForwardedChannel>,
}

impl TunnelHandler {
    fn new(
        expected_host_key: Option<String>,
        bound_port: Arc<AtomicU32>,
        forwarded_tx: mpsc::Sender<ForwardedChannel>,
    ) -> Self {
        Self {
            expected_host_key,
            bound_port,
            forwarded_tx,
        }
    }
}

#[async_trait]
impl client::Handler for TunnelHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        tracing::debug!("Server host key: SHA256:{}", fingerprint);

        match &self.expected_host_key {
            Some(expected) if normalize_fingerprint(expected) != fingerprint => {
                tracing::error!(
                    "Host key mismatch: expected {}, got SHA256:{}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            Some(_) => {
                tracing::debug!("Host key matches pinned fingerprint");
                Ok(true)
            }
            None => {
                tracing::warn!(
                    "No host key pinned, accepting SHA256:{}",
                    fingerprint
                );
                Ok(true)
            }
        }
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        tracing::debug!(
            "Forwarded connection on {}:{} from {}:{}",
            connected_address,
            connected_port,
            originator_address,
            originator_port
        );

        let bound = self.bound_port.load(Ordering::Acquire);
        if !is_bound_port(bound, connected_port) {
            tracing::debug!(
                "Rejecting forwarded connection for {}:{}, bound port is {}",
                connected_address,
                connected_port,
                bound
            );
            if let Err(e) = channel.close().await {
                tracing::trace!("Closing rejected channel failed: {}", e);
            }
            return Ok(());
        }

        let forwarded = ForwardedChannel {
            channel,
            originator: format!("{}:{}", originator_address, originator_port),
        };
        if self.forwarded_tx.send(forwarded).await.is_err() {
            tracing::warn!("Remote listener dropped, refusing forwarded connection");
        }
        Ok(())
    }
}
