//! async-std runtime implementation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_std::net::UdpSocket as AsyncStdUdpSocket;

use super::{AsyncUdpSocket, Spawner, TimedOut};

/// async-std-based UDP socket.
pub struct UdpSocket(AsyncStdUdpSocket);

impl AsyncUdpSocket for UdpSocket {
    async fn bind(addr: SocketAddr) -> io::Result<Self> {
        AsyncStdUdpSocket::bind(addr).await.map(UdpSocket)
    }

    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.0.send_to(buf, addr).await
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.0.recv_from(buf).await
    }

    fn set_broadcast(&self, broadcast: bool) -> io::Result<()> {
        self.0.set_broadcast(broadcast)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.local_addr()
    }
}

/// async-std task spawner.
pub struct AsyncStdSpawner;

impl Spawner for AsyncStdSpawner {
    type JoinHandle<T: Send + 'static> = AsyncStdJoinHandle<T>;

    fn spawn<F, T>(future: F) -> Self::JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        AsyncStdJoinHandle(async_std::task::spawn(future))
    }
}

/// Wrapper around async-std's JoinHandle.
pub struct AsyncStdJoinHandle<T>(async_std::task::JoinHandle<T>);

impl<T> Future for AsyncStdJoinHandle<T> {
    type Output = T;

    fn poll(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        std::pin::Pin::new(&mut self.0).poll(cx)
    }
}

/// Sleep for the specified duration using async-std.
pub async fn sleep_impl(duration: Duration) {
    async_std::task::sleep(duration).await
}

/// Run a future with a timeout using async-std.
pub async fn timeout_impl<F, T>(duration: Duration, future: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    async_std::future::timeout(duration, future)
        .await
        .map_err(|_| TimedOut)
}

/// Spawn a task using async-std.
pub fn spawn<F, T>(future: F) -> AsyncStdJoinHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    AsyncStdSpawner::spawn(future)
}
