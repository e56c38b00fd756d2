//! Transport port
//!
//! The gateway never owns sockets. It writes encoded frames through a
//! [`Transport`] supplied by the embedding server (a WebSocket adapter, or
//! the in-process [`ChannelTransport`]).

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Delivery side of the client connections
///
/// Sends are fire-and-forget: a `false` return means the connection is
/// unknown or already gone, which the gateway treats as routine.
pub trait Transport: Send + Sync {
    fn send_to(&self, connection_id: &str, frame: &str) -> bool;

    /// Send to several connections, returning how many accepted the frame
    fn send_to_many(&self, connection_ids: &[String], frame: &str) -> usize {
        connection_ids
            .iter()
            .filter(|id| self.send_to(id, frame))
            .count()
    }

    /// Send to every open connection
    fn broadcast(&self, frame: &str) -> usize {
        self.send_to_many(&self.connection_ids(), frame)
    }

    fn close_connection(&self, connection_id: &str, code: u16, reason: &str) -> bool;

    fn has_connection(&self, connection_id: &str) -> bool;

    fn connection_ids(&self) -> Vec<String>;
}

/// What a [`ChannelTransport`] connection receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Frame(String),
    Close { code: u16, reason: String },
}

impl TransportMessage {
    pub fn as_frame(&self) -> Option<&str> {
        match self {
            TransportMessage::Frame(text) => Some(text),
            TransportMessage::Close { .. } => None,
        }
    }
}

/// In-process transport backed by one unbounded mpsc channel per connection
#[derive(Debug, Default)]
pub struct ChannelTransport {
    connections: DashMap<String, mpsc::UnboundedSender<TransportMessage>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection and return the receiving end of its frames.
    ///
    /// Opening an id that is already open replaces the old channel.
    pub fn open(
        &self,
        connection_id: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<TransportMessage> {
        let connection_id = connection_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection_id = %connection_id, "connection opened");
        self.connections.insert(connection_id, tx);
        rx
    }

    /// Drop a connection without sending a close frame
    pub fn remove(&self, connection_id: &str) -> bool {
        self.connections.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Transport for ChannelTransport {
    fn send_to(&self, connection_id: &str, frame: &str) -> bool {
        let Some(tx) = self.connections.get(connection_id) else {
            trace!(connection_id, "send to unknown connection");
            return false;
        };
        if tx.send(TransportMessage::Frame(frame.to_string())).is_ok() {
            return true;
        }
        // Receiver dropped: the peer is gone
        drop(tx);
        self.connections.remove(connection_id);
        false
    }

    fn close_connection(&self, connection_id: &str, code: u16, reason: &str) -> bool {
        match self.connections.remove(connection_id) {
            Some((_, tx)) => {
                debug!(connection_id, code, reason, "closing connection");
                let _ = tx.send(TransportMessage::Close {
                    code,
                    reason: reason.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn has_connection(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    fn connection_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
