//! TCP channel implementation for simulation bridges
//!
//! [`ChannelSocket`] is a server endpoint: the simulation connects to it.
//! Every episode binds a fresh listener and accepts exactly one peer in a
//! spawned task so the caller can start the simulation while the accept is
//! pending.

use crate::protocol::MAX_FRAME_SIZE;
use crate::transport::{Channel, ChannelState};
use async_trait::async_trait;
use simgym_core::{Result, SimGymError};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of one background accept
enum AcceptOutcome {
    Accepted {
        stream: TcpStream,
        listener: TcpListener,
        peer_addr: SocketAddr,
    },
    TimedOut,
    Failed(io::Error),
}

/// Background accept in flight
struct PendingAccept {
    task: JoinHandle<()>,
    outcome: oneshot::Receiver<AcceptOutcome>,
}

/// Established peer connection; the listener is kept until close
struct Peer {
    stream: TcpStream,
    _listener: TcpListener,
    addr: SocketAddr,
}

/// TCP server endpoint accepting one simulation peer per episode
pub struct ChannelSocket {
    name: String,
    addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    accept_timeout: Duration,
    pending: Option<PendingAccept>,
    peer: Option<Peer>,
    state: ChannelState,
}

impl ChannelSocket {
    /// Create a closed channel for `addr`; nothing is bound until [`Channel::open`]
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            local_addr: None,
            accept_timeout: Duration::ZERO,
            pending: None,
            peer: None,
            state: ChannelState::Closed,
        }
    }

    /// Configured listening address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Address of the connected peer
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().map(|peer| peer.addr)
    }

    /// Pick up the outcome of a finished background accept
    fn poll_pending(&mut self) {
        let polled = match self.pending.as_mut() {
            Some(pending) => pending.outcome.try_recv(),
            None => return,
        };
        match polled {
            Ok(outcome) => {
                self.pending = None;
                self.apply(outcome);
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Closed) => {
                self.pending = None;
                self.state = ChannelState::Failed;
            }
        }
    }

    fn apply(&mut self, outcome: AcceptOutcome) {
        match outcome {
            AcceptOutcome::Accepted {
                stream,
                listener,
                peer_addr,
            } => {
                info!("{}: Connected to {}", self.name, peer_addr);
                self.peer = Some(Peer {
                    stream,
                    _listener: listener,
                    addr: peer_addr,
                });
                self.state = ChannelState::Connected;
            }
            AcceptOutcome::TimedOut => {
                self.local_addr = None;
                self.state = ChannelState::TimedOut;
            }
            AcceptOutcome::Failed(e) => {
                error!("{}: Accept failed: {}", self.name, e);
                self.local_addr = None;
                self.state = ChannelState::Failed;
            }
        }
    }

    fn connection_error(&self) -> SimGymError {
        match self.state {
            ChannelState::TimedOut => SimGymError::ConnectTimeout {
                channel: self.name.clone(),
                timeout: self.accept_timeout,
            },
            ChannelState::Connecting => {
                SimGymError::NotConnected(format!("{}: still waiting for connection", self.name))
            }
            _ => SimGymError::NotConnected(format!("{}: socket not connected", self.name)),
        }
    }
}

/// Bind a reusable listener with a backlog of one
fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1)
}

async fn accept_one(listener: TcpListener, timeout: Duration, name: String) -> AcceptOutcome {
    match tokio::time::timeout(timeout, listener.accept()).await {
        Ok(Ok((stream, peer_addr))) => {
            // Disable Nagle's algorithm, messages are small and lock-stepped
            if let Err(e) = stream.set_nodelay(true) {
                debug!("{}: Failed to set TCP_NODELAY: {}", name, e);
            }
            AcceptOutcome::Accepted {
                stream,
                listener,
                peer_addr,
            }
        }
        Ok(Err(e)) => AcceptOutcome::Failed(e),
        Err(_) => {
            warn!("{}: No connection within {:?}, listener closed", name, timeout);
            AcceptOutcome::TimedOut
        }
    }
}

#[async_trait]
impl Channel for ChannelSocket {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, timeout: Duration) -> Result<()> {
        match self.state() {
            ChannelState::Connected => {
                info!("{}: Socket already connected", self.name);
                return Ok(());
            }
            ChannelState::Connecting => {
                warn!("{}: Socket already opened, waiting for connection", self.name);
                return Ok(());
            }
            _ => {}
        }

        let listener = bind_listener(self.addr).map_err(|e| {
            SimGymError::IpcError(format!("{}: bind {} failed: {}", self.name, self.addr, e))
        })?;
        self.local_addr = listener.local_addr().ok();
        self.accept_timeout = timeout;

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let outcome = accept_one(listener, timeout, name).await;
            // Receiver gone means the channel was closed meanwhile
            let _ = outcome_tx.send(outcome);
        });

        self.pending = Some(PendingAccept {
            task,
            outcome: outcome_rx,
        });
        self.state = ChannelState::Connecting;
        debug!("{}: Listening on {:?}", self.name, self.local_addr);
        Ok(())
    }

    fn state(&mut self) -> ChannelState {
        self.poll_pending();
        self.state
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn wait_for_connection(&mut self, timeout: Option<Duration>) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            let received = match timeout {
                Some(limit) => match tokio::time::timeout(limit, &mut pending.outcome).await {
                    Ok(received) => received,
                    Err(_) => return Err(self.connection_error()),
                },
                None => (&mut pending.outcome).await,
            };
            self.pending = None;
            match received {
                Ok(outcome) => self.apply(outcome),
                Err(_) => self.state = ChannelState::Failed,
            }
        }

        match self.state {
            ChannelState::Connected => Ok(()),
            _ => Err(self.connection_error()),
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.state() != ChannelState::Connected {
            warn!("{}: Socket not connected, data not sent", self.name);
            return Err(self.connection_error());
        }
        let Some(peer) = self.peer.as_mut() else {
            return Err(self.connection_error());
        };

        peer.stream
            .write_all(data)
            .await
            .map_err(|e| SimGymError::IpcError(format!("{}: send failed: {}", self.name, e)))?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        if self.state() != ChannelState::Connected {
            warn!("{}: Socket not connected, nothing to receive", self.name);
            return Err(self.connection_error());
        }
        let Some(peer) = self.peer.as_mut() else {
            return Err(self.connection_error());
        };

        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        match peer.stream.read(&mut buf).await {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof
                ) =>
            {
                debug!("{}: Peer dropped the connection: {}", self.name, e);
                Ok(Vec::new())
            }
            Err(e) => Err(SimGymError::IpcError(format!(
                "{}: receive failed: {}",
                self.name, e
            ))),
        }
    }

    async fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.task.abort();
            // Cancellation is the expected outcome here
            let _ = pending.task.await;
            let mut outcome = pending.outcome;
            if let Ok(outcome) = outcome.try_recv() {
                self.apply(outcome);
            }
        }

        match self.peer.take() {
            Some(mut peer) => {
                // The simulation may already have closed its end
                if let Err(e) = peer.stream.shutdown().await {
                    info!(
                        "{}: Something went wrong while closing socket ({}, {}): {}",
                        self.name, peer.addr, self.addr, e
                    );
                }
                debug!("{}: Closed connection to {}", self.name, peer.addr);
            }
            None => debug!("{}: Socket not connected, nothing to close", self.name),
        }

        self.local_addr = None;
        self.state = ChannelState::Closed;
    }
}

impl Drop for ChannelSocket {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.as_ref() {
            pending.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_action, encode_state};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio_test::{assert_err, assert_ok, assert_pending};

    fn ephemeral(name: &str) -> ChannelSocket {
        ChannelSocket::new(name, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
    }

    async fn connected(name: &str) -> (ChannelSocket, TcpStream) {
        let mut socket = ephemeral(name);
        socket.open(Duration::from_secs(10)).unwrap();
        let addr = socket.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        assert_ok!(socket.wait_for_connection(Some(Duration::from_secs(5))).await);
        (socket, peer)
    }

    #[tokio::test]
    async fn test_not_connected_after_construction() {
        let mut socket = ephemeral("recv_socket");
        assert_eq!(socket.state(), ChannelState::Closed);
        assert!(!socket.is_connected());
        assert!(socket.local_addr().is_none());
        assert!(matches!(
            socket.send(&[0u8; 8]).await,
            Err(SimGymError::NotConnected(_))
        ));
        assert!(matches!(
            socket.receive().await,
            Err(SimGymError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_not_connected_while_accepting() {
        let mut socket = ephemeral("send_socket");
        socket.open(Duration::from_secs(10)).unwrap();
        assert_eq!(socket.state(), ChannelState::Connecting);
        assert!(!socket.is_connected());

        {
            let mut wait = tokio_test::task::spawn(socket.wait_for_connection(None));
            assert_pending!(wait.poll());
        }
        assert_err!(
            socket
                .wait_for_connection(Some(Duration::from_millis(20)))
                .await
        );
        assert!(!socket.is_connected());

        let _peer = TcpStream::connect(socket.local_addr().unwrap())
            .await
            .unwrap();
        assert_ok!(socket.wait_for_connection(None).await);
        assert!(socket.is_connected());
        assert!(socket.peer_addr().is_some());
        socket.close().await;
    }

    #[tokio::test]
    async fn test_accept_timeout_tears_down_listener() {
        let mut socket = ephemeral("recv_socket");
        socket.open(Duration::from_millis(30)).unwrap();
        let result = socket.wait_for_connection(None).await;
        assert!(matches!(result, Err(SimGymError::ConnectTimeout { .. })));
        assert_eq!(socket.state(), ChannelState::TimedOut);
        assert!(socket.local_addr().is_none());

        // A timed-out channel can be opened again for the next episode
        socket.open(Duration::from_secs(10)).unwrap();
        assert_eq!(socket.state(), ChannelState::Connecting);
        socket.close().await;
        assert_eq!(socket.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_open_when_connected_is_noop() {
        let (mut socket, _peer) = connected("send_socket").await;
        let addr = socket.local_addr();
        assert_ok!(socket.open(Duration::from_secs(1)));
        assert!(socket.is_connected());
        assert_eq!(socket.local_addr(), addr);
        socket.close().await;
    }

    #[tokio::test]
    async fn test_exchange_and_peer_close() {
        let (mut socket, mut peer) = connected("recv_socket").await;

        let message = encode_state(&[1.0, 2.0], 0.1);
        peer.write_all(&message).await.unwrap();
        let received = socket.receive().await.unwrap();
        assert_eq!(received, message);

        socket.send(&encode_action(false, &[3.0])).await.unwrap();
        let mut buf = [0u8; 16];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[8..], &3.0f64.to_le_bytes());

        // Peer ends the episode on its own schedule
        drop(peer);
        assert!(socket.receive().await.unwrap().is_empty());

        socket.close().await;
        socket.close().await;
        assert_eq!(socket.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_close_cancels_pending_accept() {
        let mut socket = ephemeral("send_socket");
        socket.open(Duration::from_secs(300)).unwrap();
        assert_ok!(tokio::time::timeout(Duration::from_secs(1), socket.close()).await);
        assert_eq!(socket.state(), ChannelState::Closed);
        assert!(!socket.is_connected());
    }

    #[tokio::test]
    async fn test_fixed_port_action_bytes() {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let mut send_socket = ChannelSocket::new("send_socket", SocketAddr::new(localhost, 42313));
        let mut recv_socket = ChannelSocket::new("recv_socket", SocketAddr::new(localhost, 42312));
        send_socket.open(Duration::from_secs(10)).unwrap();
        recv_socket.open(Duration::from_secs(10)).unwrap();

        let mut action_peer = TcpStream::connect((localhost, 42313)).await.unwrap();
        let mut state_peer = TcpStream::connect((localhost, 42312)).await.unwrap();
        assert_ok!(send_socket.wait_for_connection(None).await);
        assert_ok!(recv_socket.wait_for_connection(None).await);

        send_socket.send(&encode_action(false, &[1.0])).await.unwrap();
        let mut buf = [0u8; 16];
        action_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(
            buf,
            [
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF0, 0x3F,
            ]
        );

        send_socket.send(&encode_action(false, &[0.0, 1.0])).await.unwrap();
        let mut buf = [0u8; 24];
        action_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[..16], &[0u8; 16]);
        assert_eq!(&buf[16..], &[0, 0, 0, 0, 0, 0, 0xF0, 0x3F]);

        state_peer.write_all(&encode_state(&[0.5], 0.01)).await.unwrap();
        assert_eq!(recv_socket.receive().await.unwrap().len(), 16);

        send_socket.close().await;
        recv_socket.close().await;
    }
}
