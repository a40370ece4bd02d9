//! CoT transport senders
//!
//! Three interchangeable ways to hand an encoded event to a TAK consumer,
//! all using short-lived sockets: plain UDP unicast, UDP with broadcast
//! enabled (for broadcast or multicast targets), and one TCP connection per
//! send. Selection happens once at configuration time.

use std::io;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tracing::trace;

#[derive(Error, Debug)]
pub enum SendError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown output protocol: {0}")]
    UnknownProtocol(String),
}

/// Outbound transport selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
    Broadcast,
}

impl Protocol {
    pub fn parse(value: &str) -> Result<Self, SendError> {
        match value.to_ascii_lowercase().as_str() {
            "udp" => Ok(Self::Udp),
            "tcp" => Ok(Self::Tcp),
            "broadcast" => Ok(Self::Broadcast),
            other => Err(SendError::UnknownProtocol(other.to_string())),
        }
    }

    /// Target used when the configuration does not override address/port
    pub fn default_target(&self) -> (&'static str, u16) {
        match self {
            Self::Udp => ("127.0.0.1", 8999),
            Self::Tcp => ("127.0.0.1", 8099),
            Self::Broadcast => ("239.2.3.1", 6969),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Udp => "udp",
            Self::Tcp => "tcp",
            Self::Broadcast => "broadcast",
        };
        write!(f, "{name}")
    }
}

/// A resolved output target
#[derive(Debug, Clone)]
pub struct CotSender {
    protocol: Protocol,
    address: String,
    port: u16,
}

impl CotSender {
    /// Resolve a sender, falling back to the protocol's default target for
    /// any unset part.
    pub fn new(protocol: Protocol, address: Option<String>, port: Option<u16>) -> Self {
        let (default_addr, default_port) = protocol.default_target();
        Self {
            protocol,
            address: address.unwrap_or_else(|| default_addr.to_string()),
            port: port.unwrap_or(default_port),
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Deliver one encoded event. Fire and forget: no response is awaited
    /// and a failed payload is not retried.
    pub async fn send(&self, data: &[u8]) -> Result<(), SendError> {
        trace!(
            proto = %self.protocol,
            target = %self.target(),
            bytes = data.len(),
            "Sending CoT event"
        );
        match self.protocol {
            Protocol::Udp => self.send_datagram(data, false).await,
            Protocol::Broadcast => self.send_datagram(data, true).await,
            Protocol::Tcp => self.send_stream(data).await,
        }
    }

    async fn send_datagram(&self, data: &[u8], broadcast: bool) -> Result<(), SendError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        socket
            .send_to(data, (self.address.as_str(), self.port))
            .await?;
        Ok(())
    }

    async fn send_stream(&self, data: &[u8]) -> Result<(), SendError> {
        let mut stream = TcpStream::connect((self.address.as_str(), self.port)).await?;
        stream.write_all(data).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
