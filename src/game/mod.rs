//! Game simulation modules

pub mod combat;
pub mod data;
pub mod entity;
pub mod map;
pub mod r#match;
pub mod packet;
pub mod physics;
pub mod player;
pub mod visibility;
pub mod zone;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, MatchState};

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::ClientMsg;

/// Fire-and-forget transport handle for one connection.
///
/// The tick loop pushes frames here; the socket writer task drains them.
/// A closed or full channel is a transient per-entity fault and is ignored,
/// so one unresponsive client never stalls the match.
#[derive(Clone, Debug)]
pub struct PlayerSocket {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl PlayerSocket {
    pub fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A socket that drops everything; used for disconnected players
    pub fn closed() -> Self {
        Self { tx: None }
    }

    pub fn send(&self, frame: Bytes) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(frame);
        }
    }
}

/// Commands delivered to a match task from the socket layer
#[derive(Debug)]
pub enum MatchCommand {
    /// A connection wants to join the match
    Join {
        conn: Uuid,
        name: String,
        outfit: String,
        socket: PlayerSocket,
    },
    /// A control message from a joined connection
    Client { conn: Uuid, msg: ClientMsg },
    /// The connection dropped
    Disconnect { conn: Uuid },
    /// External stop signal
    Stop,
}
