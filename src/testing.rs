//! In-memory socket for network-free tests.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};

use crate::codec::{self, Header, Message, Packet};
use crate::runtime::{self, AsyncUdpSocket};
use crate::types::DeviceId;

type Datagram = io::Result<(Vec<u8>, SocketAddr)>;

/// Records outgoing datagrams and replays injected inbound ones.
///
/// Clones share state, so a test keeps one clone while the transport owns
/// the other.
#[derive(Clone)]
pub(crate) struct MockSocket {
    inner: Arc<Inner>,
}

struct Inner {
    local: SocketAddr,
    sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
    failing: Mutex<HashSet<SocketAddr>>,
    broadcast: AtomicBool,
    inbound_tx: UnboundedSender<Datagram>,
    inbound_rx: futures::lock::Mutex<UnboundedReceiver<Datagram>>,
}

impl MockSocket {
    pub(crate) fn new() -> Self {
        Self::with_local(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 50000)))
    }

    fn with_local(local: SocketAddr) -> Self {
        let (inbound_tx, inbound_rx) = unbounded();
        MockSocket {
            inner: Arc::new(Inner {
                local,
                sent: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
                broadcast: AtomicBool::new(false),
                inbound_tx,
                inbound_rx: futures::lock::Mutex::new(inbound_rx),
            }),
        }
    }

    /// Make every send to `addr` fail.
    pub(crate) fn fail_sends_to(&self, addr: SocketAddr) {
        self.inner.failing.lock().unwrap().insert(addr);
    }

    pub(crate) fn inject(&self, bytes: Vec<u8>, from: SocketAddr) {
        self.inner.inbound_tx.unbounded_send(Ok((bytes, from))).unwrap();
    }

    pub(crate) fn inject_packet(&self, packet: &Packet, from: SocketAddr) {
        self.inject(codec::encode(packet), from);
    }

    pub(crate) fn inject_error(&self) {
        self.inner
            .inbound_tx
            .unbounded_send(Err(io::Error::other("injected")))
            .unwrap();
    }

    pub(crate) fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
        self.inner.sent.lock().unwrap().clone()
    }

    /// Successfully sent datagrams, decoded.
    pub(crate) fn sent_packets(&self) -> Vec<(Packet, SocketAddr)> {
        self.sent()
            .into_iter()
            .map(|(bytes, to)| (codec::decode(&bytes).unwrap(), to))
            .collect()
    }

    pub(crate) fn broadcast_enabled(&self) -> bool {
        self.inner.broadcast.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` datagrams were sent.
    pub(crate) async fn wait_for_sent(&self, count: usize) {
        let wait = async {
            while self.sent().len() < count {
                runtime::sleep(Duration::from_millis(5)).await;
            }
        };
        runtime::timeout(Duration::from_secs(2), wait)
            .await
            .expect("timed out waiting for outgoing datagrams");
    }

    /// Wait for the first sent packet matching `predicate`.
    pub(crate) async fn wait_for_packet<P>(&self, predicate: P) -> (Packet, SocketAddr)
    where
        P: Fn(&Packet) -> bool,
    {
        let wait = async {
            loop {
                if let Some(found) = self.sent_packets().into_iter().find(|(p, _)| predicate(p)) {
                    return found;
                }
                runtime::sleep(Duration::from_millis(5)).await;
            }
        };
        runtime::timeout(Duration::from_secs(2), wait)
            .await
            .expect("timed out waiting for a matching packet")
    }
}

impl AsyncUdpSocket for MockSocket {
    async fn bind(addr: SocketAddr) -> io::Result<Self> {
        Ok(MockSocket::with_local(addr))
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if self.inner.failing.lock().unwrap().contains(&addr) {
            return Err(io::Error::other("network unreachable"));
        }
        self.inner.sent.lock().unwrap().push((buf.to_vec(), addr));
        Ok(buf.len())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.inner.inbound_rx.lock().await;
        match rx.next().await {
            Some(Ok((bytes, from))) => {
                let len = bytes.len().min(buf.len());
                buf[..len].copy_from_slice(&bytes[..len]);
                Ok((len, from))
            }
            Some(Err(e)) => Err(e),
            None => futures::future::pending().await,
        }
    }

    fn set_broadcast(&self, broadcast: bool) -> io::Result<()> {
        self.inner.broadcast.store(broadcast, Ordering::SeqCst);
        Ok(())
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.inner.local)
    }
}

/// Address of the n-th fake device on the LAN.
pub(crate) fn addr(n: u8) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, n), 56700))
}

pub(crate) fn device(n: u8) -> DeviceId {
    DeviceId::new([0xd0, 0x73, 0xd5, 0x00, 0x00, n])
}

/// A reply as a device would send it.
pub(crate) fn reply(from: DeviceId, source: u32, sequence: u8, message: Message) -> Packet {
    Packet::new(Header::unicast(from, source, sequence), message)
}

/// The `StateService` reply a bulb sends for a discovery request.
pub(crate) fn state_service(from: DeviceId) -> Packet {
    reply(
        from,
        0,
        0,
        Message::StateService {
            service: codec::SERVICE_UDP,
            port: codec::DEFAULT_PORT as u32,
        },
    )
}
