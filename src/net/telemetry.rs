// Fire-and-forget telemetry datagrams

use std::net::SocketAddr;

use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::messages::{to_datagram, Envelope, Telemetry};

pub struct TelemetryClient {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl TelemetryClient {
    pub async fn connect(peer: &str) -> std::io::Result<Self> {
        let peer = lookup_host(peer).await?.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no address for telemetry peer {peer}"),
            )
        })?;
        let bind = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one packet; failures are logged and dropped
    pub async fn send(&self, packet: Telemetry) {
        let bytes = match to_datagram(&Envelope::Telemetry(packet)) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("Failed to encode telemetry: {}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&bytes, self.peer).await {
            debug!("Failed to send telemetry to {}: {}", self.peer, e);
        }
    }
}
