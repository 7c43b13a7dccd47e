//! Remote-bound listener fed by forwarded-tcpip channel opens

use async_trait::async_trait;
use russh::client::Msg;
use russh::{Channel, ChannelStream};
use tokio::sync::mpsc;

use atp_core::ConnError;

use crate::serve::{Accepted, StreamListener};

/// A forwarded-tcpip channel opened by the SSH server
pub(crate) struct ForwardedChannel {
    pub channel: Channel<Msg>,
    pub originator: String,
}

/// Listener on the SSH server side
///
/// Each connection the server accepts on the bound address arrives here as
/// a channel. The sequence ends only when the session does.
pub struct RemoteListener {
    address: String,
    port: u32,
    incoming: mpsc::Receiver<ForwardedChannel>,
}

impl RemoteListener {
    pub(crate) fn new(
        address: String,
        port: u32,
        incoming: mpsc::Receiver<ForwardedChannel>,
    ) -> Self {
        Self {
            address,
            port,
            incoming,
        }
    }

    /// Bound address on the SSH server
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Bound port, as assigned by the server when 0 was requested
    pub fn port(&self) -> u32 {
        self.port
    }
}

#[async_trait]
impl StreamListener for RemoteListener {
    type Stream = ChannelStream<Msg>;

    async fn accept(&mut self) -> Result<Accepted<Self::Stream>, ConnError> {
        let forwarded = self.incoming.recv().await.ok_or(ConnError::ListenerClosed)?;
        Ok(Accepted {
            stream: forwarded.channel.into_stream(),
            peer: forwarded.originator,
        })
    }
}
