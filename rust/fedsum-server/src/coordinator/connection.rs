//! Handles to the outbound side of participant connections.

use derive_more::{Display, From};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use fedsum_core::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, From)]
/// Identifies a websocket connection for its whole lifetime.
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Creates a new random connection identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
/// A handle to send messages to a connected participant.
///
/// The messages are queued and written to the socket by the connection's writer task, so sending
/// never blocks the coordinator.
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
}

impl Connection {
    /// Creates a new connection handle and the receiving end the writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: ConnectionId::new(),
            tx,
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues a message for the participant.
    ///
    /// Returns `false` if the connection is already closed, in which case the message is dropped.
    pub fn send(&self, message: Message) -> bool {
        match self.tx.send(message) {
            Ok(()) => true,
            Err(mpsc::error::SendError(message)) => {
                debug!(
                    "connection {} closed, dropping {} message",
                    self.id,
                    message.method_name()
                );
                false
            }
        }
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
