//! Connection handle and per-connection metadata.
//!
//! Each connection owns a bounded outbound channel; other tasks that want to
//! send it a line enqueue onto that channel and return immediately instead
//! of writing to the socket directly. This is what lets the broadcaster in
//! `registry.rs` fan out to many peers without a single slow reader
//! blocking the whole server (see SPEC_FULL.md §5).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::rate_limit::RateLimiter;

/// Unique identifier for a connection, assigned by the registry at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// A line queued for delivery to a connection's socket, or a request to close it.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// A complete line, without the trailing `\n` (the write loop appends it).
    Line(String),
    /// Close the connection; carries no payload, just a signal.
    Close,
}

/// Generates the next [`ConnectionId`] for a registry.
#[derive(Debug, Default)]
pub struct ConnectionIdGen(AtomicU64);

impl ConnectionIdGen {
    #[must_use]
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Mutable bookkeeping for a connection, mirroring the statistics fields
/// tracked by the original server's `client_info` dict.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub address: SocketAddr,
    pub name: Option<String>,
    pub connected_at: Instant,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub chat_partner: Option<ConnectionId>,
    pub groups: HashSet<String>,
}

impl ConnectionInfo {
    #[must_use]
    pub fn new(address: SocketAddr, connected_at: Instant) -> Self {
        Self {
            address,
            name: None,
            connected_at,
            messages_sent: 0,
            messages_received: 0,
            chat_partner: None,
            groups: HashSet::new(),
        }
    }
}

/// Handle to a single connection, shared across tasks via `Arc`.
///
/// The handler that owns the socket holds the receiving end of `tx`'s
/// channel and drains it into the socket; every other task that wants to
/// speak to this connection goes through `try_send`/`send`.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::Sender<OutboundMessage>,
    pub info: Mutex<ConnectionInfo>,
    pub rate_limiter: Mutex<RateLimiter>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(
        id: ConnectionId,
        tx: mpsc::Sender<OutboundMessage>,
        info: ConnectionInfo,
    ) -> Self {
        Self {
            id,
            tx,
            info: Mutex::new(info),
            rate_limiter: Mutex::new(RateLimiter::new()),
        }
    }

    /// Best-effort, non-blocking send. Returns `false` if the channel is
    /// full or the connection's write loop has already exited -- the caller
    /// logs and moves on, per the spec's "best-effort" broadcast rule.
    pub fn try_send_line(&self, line: impl Into<String>) -> bool {
        self.tx.try_send(OutboundMessage::Line(line.into())).is_ok()
    }

    /// Requests the connection close itself. Best-effort, same semantics as
    /// `try_send_line`.
    pub fn try_close(&self) -> bool {
        self.tx.try_send(OutboundMessage::Close).is_ok()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.info.lock().name.clone()
    }
}

/// Creates a fresh outbound channel for a newly-accepted connection.
///
/// `capacity` bounds backpressure: a connection whose reader can't keep up
/// will see best-effort sends to it start failing rather than growing memory
/// without bound.
#[must_use]
pub fn outbound_channel(capacity: usize) -> (mpsc::Sender<OutboundMessage>, mpsc::Receiver<OutboundMessage>) {
    mpsc::channel(capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1234)
    }

    #[test]
    fn id_gen_increments_from_one() {
        let gen = ConnectionIdGen::new();
        assert_eq!(gen.next(), ConnectionId(1));
        assert_eq!(gen.next(), ConnectionId(2));
    }

    #[tokio::test]
    async fn try_send_line_succeeds_then_fails_when_full() {
        let (tx, _rx) = outbound_channel(1);
        let handle = ConnectionHandle::new(ConnectionId(1), tx, ConnectionInfo::new(addr(), Instant::now()));

        assert!(handle.try_send_line("hi"));
        assert!(!handle.try_send_line("overflow"));
    }

    #[tokio::test]
    async fn is_open_false_after_receiver_dropped() {
        let (tx, rx) = outbound_channel(4);
        let handle = ConnectionHandle::new(ConnectionId(1), tx, ConnectionInfo::new(addr(), Instant::now()));
        assert!(handle.is_open());
        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.try_send_line("gone"));
    }

    #[test]
    fn name_reflects_info() {
        let (tx, _rx) = outbound_channel(4);
        let mut info = ConnectionInfo::new(addr(), Instant::now());
        info.name = Some("Alice".into());
        let handle = ConnectionHandle::new(ConnectionId(1), tx, info);
        assert_eq!(handle.name(), Some("Alice".to_string()));
    }
}
