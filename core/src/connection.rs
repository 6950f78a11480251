use std::fmt;

use livecc_protocol::ServerFrame;
use livecc_protocol::WireFrame;
use tokio::sync::mpsc;

use crate::error::LiveccErr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Handle for writing frames to one client connection.
///
/// Frames are queued whole onto a channel that a single writer task drains
/// into the socket, so concurrent producers (pumps, the exit waiter, error
/// paths) can never interleave partial frames. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Outbound {
    connection_id: ConnectionId,
    tx: mpsc::Sender<WireFrame>,
}

impl Outbound {
    pub fn channel(connection_id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<WireFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { connection_id, tx }, rx)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub async fn send(&self, frame: ServerFrame) -> Result<(), LiveccErr> {
        self.tx
            .send(WireFrame::from(frame))
            .await
            .map_err(|_| LiveccErr::ConnectionClosed)
    }

    /// For producers running on blocking threads (the pty reader).
    pub fn blocking_send(&self, frame: ServerFrame) -> Result<(), LiveccErr> {
        self.tx
            .blocking_send(WireFrame::from(frame))
            .map_err(|_| LiveccErr::ConnectionClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
