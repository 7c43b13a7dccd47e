//! Per-connection forwarding
//!
//! Dials the target, writes the preamble, then relays both directions in
//! their own tasks. A direction that reaches end-of-stream shuts down the
//! write half of its destination and the forwarder waits for the other
//! one. A direction that fails aborts the other, and dropping the forward
//! future aborts both.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use atp_core::config::TargetConfig;
use atp_core::{ForwardError, Preamble};

/// Bytes moved by one forwarded connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Accepted stream to target, not counting the preamble
    pub upstream: u64,
    /// Target to accepted stream
    pub downstream: u64,
}

/// Forwards accepted streams to a fixed target
#[derive(Debug, Clone)]
pub struct Forwarder {
    target: TargetConfig,
    preamble: Preamble,
}

impl Forwarder {
    pub fn new(target: TargetConfig, preamble: Preamble) -> Self {
        Self { target, preamble }
    }

    pub fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Forward one accepted stream until both directions finish
    ///
    /// Both streams are dropped, and so closed, before this returns or when
    /// the returned future is dropped.
    pub async fn forward<S>(&self, accepted: S) -> Result<RelayStats, ForwardError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut target = self.dial().await?;

        if !self.preamble.is_empty() {
            target
                .write_all(self.preamble.as_bytes())
                .await
                .map_err(ForwardError::Preamble)?;
            target.flush().await.map_err(ForwardError::Preamble)?;
        }

        relay(accepted, target).await
    }

    async fn dial(&self) -> Result<TcpStream, ForwardError> {
        let connect = TcpStream::connect((self.target.hostname.as_str(), self.target.port));
        let result = match self.target.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| ForwardError::DialTimeout {
                    target: self.target.address(),
                })?,
            None => connect.await,
        };

        let stream = result.map_err(|source| ForwardError::Dial {
            target: self.target.address(),
            source,
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::trace!("set_nodelay on {} failed: {}", self.target.address(), e);
        }
        Ok(stream)
    }
}

const UPSTREAM: &str = "client->target";
const DOWNSTREAM: &str = "target->client";

async fn relay<S>(accepted: S, target: TcpStream) -> Result<RelayStats, ForwardError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (accepted_rd, accepted_wr) = tokio::io::split(accepted);
    let (target_rd, target_wr) = target.into_split();

    // Both directions die with the set, whether relay returns early or is
    // itself dropped mid-flight.
    let mut directions = JoinSet::new();
    directions.spawn(async move { (UPSTREAM, pipe(accepted_rd, target_wr, UPSTREAM).await) });
    directions.spawn(async move { (DOWNSTREAM, pipe(target_rd, accepted_wr, DOWNSTREAM).await) });

    let mut stats = RelayStats::default();
    while let Some(joined) = directions.join_next().await {
        let (direction, result) = joined.map_err(|e| ForwardError::Task(e.to_string()))?;
        let copied = result?;
        if direction == UPSTREAM {
            stats.upstream = copied;
        } else {
            stats.downstream = copied;
        }
    }

    Ok(stats)
}

/// Copy until EOF, then propagate EOF to the destination
async fn pipe<R, W>(mut reader: R, mut writer: W, direction: &'static str) -> Result<u64, ForwardError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let relay_err = |source| ForwardError::Relay { direction, source };

    let copied = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(relay_err)?;
    tracing::trace!("{} reached EOF after {} bytes", direction, copied);

    if let Err(e) = writer.shutdown().await {
        // The peer may already be gone; the data has been delivered.
        tracing::trace!("{} shutdown failed: {}", direction, e);
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn target_for(addr: std::net::SocketAddr) -> TargetConfig {
        TargetConfig {
            hostname: addr.ip().to_string(),
            port: addr.port(),
            connect_timeout: None,
        }
    }

    #[tokio::test]
    async fn test_empty_preamble_writes_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let forwarder = Forwarder::new(target_for(listener.local_addr().unwrap()), Preamble::empty());

        let target = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        let (mut client, accepted) = tokio::io::duplex(64);
        let forward = tokio::spawn(async move { forwarder.forward(accepted).await });

        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(target.await.unwrap(), b"ping");
        let stats = forward.await.unwrap().unwrap();
        assert_eq!(stats.upstream, 4);
        assert_eq!(stats.downstream, 0);
    }

    #[tokio::test]
    async fn test_pipe_shuts_down_destination_on_eof() {
        let (mut src_far, src_near) = tokio::io::duplex(64);
        let (dst_near, mut dst_far) = tokio::io::duplex(64);

        src_far.write_all(b"abc").await.unwrap();
        drop(src_far);

        let copied = pipe(src_near, dst_near, UPSTREAM).await.unwrap();
        assert_eq!(copied, 3);

        let mut out = Vec::new();
        dst_far.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn test_aborted_forward_closes_both_streams() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let forwarder = Forwarder::new(target_for(listener.local_addr().unwrap()), Preamble::empty());

        let (mut client, accepted) = tokio::io::duplex(64);
        let forward = tokio::spawn(async move { forwarder.forward(accepted).await });

        let (mut socket, _) = listener.accept().await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut ping = [0u8; 4];
        socket.read_exact(&mut ping).await.unwrap();
        assert_eq!(&ping, b"ping");

        forward.abort();
        assert!(forward.await.unwrap_err().is_cancelled());

        let limit = std::time::Duration::from_secs(5);
        let mut rest = Vec::new();
        let read = tokio::time::timeout(limit, socket.read_to_end(&mut rest))
            .await
            .expect("target should see EOF")
            .unwrap();
        assert_eq!(read, 0);

        let read = tokio::time::timeout(limit, client.read_to_end(&mut rest))
            .await
            .expect("client should see EOF")
            .unwrap();
        assert_eq!(read, 0);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let forwarder = Forwarder::new(target_for(addr), Preamble::from(&b"W"[..]));
        let (_client, accepted) = tokio::io::duplex(64);
        let err = forwarder.forward(accepted).await.unwrap_err();
        assert!(matches!(err, ForwardError::Dial { .. }));
    }
}
