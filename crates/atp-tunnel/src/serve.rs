//! Accept loop
//!
//! Accepts streams from a listener and hands each one to its own
//! forwarding task. Forwarding results come back to this loop as values
//! and are logged here; a failed connection never stops the loop.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use atp_core::{ConnError, ForwardError};

use crate::forward::{Forwarder, RelayStats};

/// A stream handed out by a [`StreamListener`]
pub struct Accepted<S> {
    pub stream: S,
    /// Originator of the connection, for logging
    pub peer: String,
}

/// Source of accepted streams
#[async_trait]
pub trait StreamListener: Send {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection; an error means no more will come
    ///
    /// Must be cancel-safe: the accept loop drops a pending call whenever
    /// a forward finishes or shutdown is requested.
    async fn accept(&mut self) -> Result<Accepted<Self::Stream>, ConnError>;
}

/// Counters for a finished accept loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Connections accepted and dispatched
    pub accepted: u64,
    /// Forwards that ended in an error
    pub failed: u64,
}

type ForwardOutcome = (u64, String, Result<RelayStats, ForwardError>);

/// Run the accept loop until the listener fails or `cancel` fires
///
/// Listener failure is returned as an error. Cancellation aborts every
/// in-flight forward and returns the summary.
pub async fn serve<L>(
    mut listener: L,
    forwarder: Arc<Forwarder>,
    cancel: CancellationToken,
) -> Result<ServeSummary, ConnError>
where
    L: StreamListener,
{
    let mut summary = ServeSummary::default();
    let mut forwards: JoinSet<ForwardOutcome> = JoinSet::new();

    tracing::info!(
        "Forwarding connections to {}",
        forwarder.target().address()
    );

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Accept loop shutting down");
                break Ok(summary);
            }

            Some(joined) = forwards.join_next(), if !forwards.is_empty() => {
                match joined {
                    Ok((id, peer, outcome)) => record(&mut summary, id, &peer, outcome),
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => {
                        summary.failed += 1;
                        tracing::error!("Forwarding task panicked: {}", e);
                    }
                }
            }

            accepted = listener.accept() => {
                let Accepted { stream, peer } = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                        break Err(e);
                    }
                };

                summary.accepted += 1;
                let id = summary.accepted;
                tracing::debug!("Connection #{} accepted from {}", id, peer);

                let forwarder = Arc::clone(&forwarder);
                forwards.spawn(async move {
                    let outcome = forwarder.forward(stream).await;
                    (id, peer, outcome)
                });
            }
        }
    };

    forwards.shutdown().await;
    result
}

fn record(
    summary: &mut ServeSummary,
    id: u64,
    peer: &str,
    outcome: Result<RelayStats, ForwardError>,
) {
    match outcome {
        Ok(stats) => {
            tracing::debug!(
                "Connection #{} from {} closed ({} bytes up, {} bytes down)",
                id,
                peer,
                stats.upstream,
                stats.downstream
            );
        }
        Err(e) => {
            summary.failed += 1;
            tracing::warn!("Connection #{} from {} failed: {}", id, peer, e);
        }
    }
}
