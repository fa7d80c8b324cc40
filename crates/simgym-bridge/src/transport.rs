//! Channel abstraction for simulation bridges
//!
//! A channel is one unidirectional server endpoint the simulation connects
//! to. The coordinator drives both channels only through this trait so a
//! recording fake can stand in for the TCP implementation in tests.

use async_trait::async_trait;
use simgym_core::Result;
use std::net::SocketAddr;
use std::time::Duration;

/// Connection state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No listener, no peer
    Closed,
    /// Listening, background accept in flight
    Connecting,
    /// Peer connected and accept completed
    Connected,
    /// Accept window expired without a peer
    TimedOut,
    /// Accept failed for another reason
    Failed,
}

/// One server endpoint with asynchronous, timeout-bounded connection establishment
#[async_trait]
pub trait Channel: Send {
    /// Name used in log messages
    fn name(&self) -> &str;

    /// Start listening and accept one peer in the background
    ///
    /// Returns immediately. A no-op if the channel is already connected or
    /// connecting.
    fn open(&mut self, timeout: Duration) -> Result<()>;

    /// Current connection state
    fn state(&mut self) -> ChannelState;

    /// Whether a peer is connected and the accept has completed
    fn is_connected(&mut self) -> bool {
        self.state() == ChannelState::Connected
    }

    /// Address the listener is bound to, once opened
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Wait for the background accept to finish, or for `timeout` to elapse
    async fn wait_for_connection(&mut self, timeout: Option<Duration>) -> Result<()>;

    /// Write one complete message
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Read one message; an empty buffer means the peer ended the stream
    async fn receive(&mut self) -> Result<Vec<u8>>;

    /// Tear down peer connection and listener. Idempotent, never fails.
    async fn close(&mut self);
}
