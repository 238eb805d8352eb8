//! UDP transport shared by discovery and command dispatch.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use log::{trace, warn};
use uuid::Uuid;

use crate::codec::{self, Packet};
use crate::config::Config;
use crate::errors::Error;
use crate::runtime::{self, AsyncUdpSocket, UdpSocket};

type Result<T> = std::result::Result<T, Error>;

const RECV_BUFFER_SIZE: usize = 4096;
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A broadcast-enabled UDP socket plus the identifiers stamped on packets.
///
/// All methods take `&self`; share the transport behind an `Arc` between
/// the receive task and any number of concurrent senders.
pub struct Transport<S: AsyncUdpSocket = UdpSocket> {
    socket: S,
    broadcast_addr: SocketAddr,
    source: u32,
    sequence: AtomicU8,
}

impl Transport<UdpSocket> {
    /// Bind a UDP socket on the configured local address.
    ///
    /// Bind failures are fatal for the client and returned as-is.
    pub async fn bind(config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|e| Error::socket("bind", e))?;
        Self::from_socket(socket, config)
    }
}

impl<S: AsyncUdpSocket> Transport<S> {
    /// Wrap an already bound socket.
    pub fn from_socket(socket: S, config: &Config) -> Result<Self> {
        socket
            .set_broadcast(true)
            .map_err(|e| Error::socket("set_broadcast", e))?;

        Ok(Transport {
            socket,
            broadcast_addr: config.broadcast_addr,
            source: config.source.unwrap_or_else(random_source),
            sequence: AtomicU8::new(0),
        })
    }

    /// Client identifier carried in every outgoing header.
    pub fn source(&self) -> u32 {
        self.source
    }

    /// Next wrapping sequence number.
    pub fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        self.broadcast_addr
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))
    }

    /// Send one datagram.
    pub async fn send(&self, bytes: &[u8], addr: SocketAddr) -> Result<()> {
        trace!("sending {} bytes to {}", bytes.len(), addr);
        self.socket
            .send_to(bytes, addr)
            .await
            .map_err(|e| Error::socket("send_to", e))?;
        Ok(())
    }

    pub async fn send_packet(&self, packet: &Packet, addr: SocketAddr) -> Result<()> {
        self.send(&codec::encode(packet), addr).await
    }

    /// Send a packet to the configured broadcast address.
    pub async fn broadcast(&self, packet: &Packet) -> Result<()> {
        self.send_packet(packet, self.broadcast_addr).await
    }

    /// Deliver every inbound datagram to `on_packet`.
    ///
    /// Never returns: receive errors are logged and the loop keeps going.
    /// Cancel it by dropping the future.
    pub async fn receive_loop<F>(&self, mut on_packet: F)
    where
        F: FnMut(&[u8], SocketAddr),
    {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((size, from)) => {
                    trace!("received {} bytes from {}", size, from);
                    on_packet(&buffer[..size], from);
                }
                Err(e) => {
                    warn!("receive error: {}", e);
                    runtime::sleep(RECV_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Random non-zero source; zero would ask devices to broadcast their replies.
fn random_source() -> u32 {
    let bytes = Uuid::new_v4().into_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).max(1)
}
