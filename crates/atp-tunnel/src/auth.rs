//! SSH agent authentication
//!
//! Asks the local agent for its identities. The agent connection used
//! for that request is closed before returning; signing during the session
//! handshake goes through a fresh connection opened by the establisher.

use std::path::{Path, PathBuf};

use russh_keys::agent::client::AgentClient;
use russh_keys::key::PublicKey;
use tokio::net::UnixStream;

use atp_core::AuthError;

/// Identities offered by the agent, in the order the agent listed them
#[derive(Debug)]
pub struct Credential {
    socket: PathBuf,
    identities: Vec<PublicKey>,
}

impl Credential {
    /// Agent socket the identities came from
    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn identities(&self) -> &[PublicKey] {
        &self.identities
    }

    pub(crate) fn into_parts(self) -> (PathBuf, Vec<PublicKey>) {
        (self.socket, self.identities)
    }
}

/// `~/.ssh/agent.sock` for the invoking user
pub fn default_agent_socket() -> Result<PathBuf, AuthError> {
    let home = dirs::home_dir().ok_or(AuthError::HomeUnresolved)?;
    Ok(home.join(".ssh").join("agent.sock"))
}

/// Dial the agent and collect every identity it holds
pub async fn authenticate(socket: &Path) -> Result<Credential, AuthError> {
    tracing::debug!("Querying SSH agent at {}", socket.display());

    let mut agent = connect_agent(socket).await?;
    let identities = agent
        .request_identities()
        .await
        .map_err(|e| AuthError::Agent(anyhow::anyhow!("Failed to list identities: {}", e)))?;
    drop(agent);

    if identities.is_empty() {
        return Err(AuthError::NoIdentities {
            path: socket.to_path_buf(),
        });
    }

    for identity in &identities {
        tracing::debug!("Agent identity: {}", identity.fingerprint());
    }
    tracing::info!("SSH agent offered {} identities", identities.len());

    Ok(Credential {
        socket: socket.to_path_buf(),
        identities,
    })
}

pub(crate) async fn connect_agent(socket: &Path) -> Result<AgentClient<UnixStream>, AuthError> {
    AgentClient::connect_uds(socket)
        .await
        .map_err(|e| AuthError::AgentUnavailable {
            path: socket.to_path_buf(),
            source: anyhow::anyhow!("{}", e),
        })
}
