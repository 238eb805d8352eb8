//! Runtime-agnostic async abstractions.
//!
//! The discovery engine and the command dispatcher only talk to the network
//! and the clock through this module, so the crate runs on any of the
//! supported executors.
//!
//! # Feature Flags
//!
//! Enable one of the following features to select your runtime:
//!
//! - `runtime-tokio` (default) - Use the tokio runtime
//! - `runtime-async-std` - Use the async-std runtime
//! - `runtime-smol` - Use the smol runtime
//!
//! # Example
//!
//! ```toml
//! [dependencies]
//! # Using async-std
//! lifx-lights-rs = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//!
//! # Using smol
//! lifx-lights-rs = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! ```

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[cfg(feature = "runtime-tokio")]
mod tokio_impl;

#[cfg(feature = "runtime-async-std")]
mod async_std_impl;

#[cfg(feature = "runtime-smol")]
mod smol_impl;

// Re-export the active runtime's types
#[cfg(feature = "runtime-tokio")]
pub use tokio_impl::*;

#[cfg(feature = "runtime-async-std")]
pub use async_std_impl::*;

#[cfg(feature = "runtime-smol")]
pub use smol_impl::*;

/// Trait for async UDP socket operations.
///
/// Every method takes `&self`, so one socket can be shared between the
/// receive task and any number of concurrent senders.
pub trait AsyncUdpSocket: Send + Sync + Sized + 'static {
    /// Bind to the specified address.
    fn bind(addr: SocketAddr) -> impl Future<Output = io::Result<Self>> + Send;

    /// Send a datagram to a specific address.
    fn send_to(&self, buf: &[u8], addr: SocketAddr)
    -> impl Future<Output = io::Result<usize>> + Send;

    /// Receive a datagram and its source address.
    fn recv_from(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<(usize, SocketAddr)>> + Send;

    /// Enable or disable broadcast mode.
    fn set_broadcast(&self, broadcast: bool) -> io::Result<()>;

    /// The local address this socket is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Trait for async task spawning.
pub trait Spawner {
    /// A handle to a spawned task.
    type JoinHandle<T: Send + 'static>: Future<Output = T> + Send;

    /// Spawn a future as a background task.
    fn spawn<F, T>(future: F) -> Self::JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

/// Sleep for the specified duration.
pub async fn sleep(duration: Duration) {
    sleep_impl(duration).await
}

/// Run a future with a timeout.
///
/// Returns `Err(TimedOut)` if the timeout expires before the future completes.
pub async fn timeout<F, T>(duration: Duration, future: F) -> Result<T, TimedOut>
where
    F: Future<Output = T>,
{
    timeout_impl(duration, future).await
}

/// Error returned when a timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

impl std::fmt::Display for TimedOut {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimedOut {}

// JoinHandle type alias for task spawning
#[cfg(feature = "runtime-tokio")]
pub type JoinHandle<T> = tokio_impl::TokioJoinHandle<T>;

#[cfg(feature = "runtime-async-std")]
pub type JoinHandle<T> = async_std_impl::AsyncStdJoinHandle<T>;

#[cfg(feature = "runtime-smol")]
pub type JoinHandle<T> = smol_impl::SmolJoinHandle<T>;

// Compile-time check to ensure exactly one runtime is selected
#[cfg(not(any(
    feature = "runtime-tokio",
    feature = "runtime-async-std",
    feature = "runtime-smol"
)))]
compile_error!(
    "One of \"runtime-tokio\", \"runtime-async-std\", or \"runtime-smol\" features must be enabled"
);

#[cfg(all(feature = "runtime-tokio", feature = "runtime-async-std"))]
compile_error!("Features \"runtime-tokio\" and \"runtime-async-std\" are mutually exclusive");

#[cfg(all(feature = "runtime-tokio", feature = "runtime-smol"))]
compile_error!("Features \"runtime-tokio\" and \"runtime-smol\" are mutually exclusive");

#[cfg(all(feature = "runtime-async-std", feature = "runtime-smol"))]
compile_error!("Features \"runtime-async-std\" and \"runtime-smol\" are mutually exclusive");
