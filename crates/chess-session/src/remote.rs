//! Connection state for an online game.
//!
//! This is bookkeeping only; the socket itself belongs to the runtime. The
//! machine never reconnects on its own and never re-authenticates an open
//! connection.

use chess_core::Candidate;
use tracing::{debug, info, warn};

use crate::protocol::ClientFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    Error,
    Closed,
}

#[derive(Debug)]
pub struct RemoteSync {
    status: ConnectionStatus,
    room: Option<String>,
    token: Option<String>,
}

impl Default for RemoteSync {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Idle,
            room: None,
            token: None,
        }
    }
}

impl RemoteSync {
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// A socket is open or being opened.
    pub fn is_busy(&self) -> bool {
        matches!(self.status, ConnectionStatus::Connecting | ConnectionStatus::Open)
    }

    pub fn is_open(&self) -> bool {
        self.status == ConnectionStatus::Open
    }

    /// Store a token. An open connection keeps using the one it authenticated with.
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|t| !t.is_empty());
    }

    /// Target a room. Only allowed while not connecting or connected.
    pub fn set_room(&mut self, room: String) -> bool {
        if self.is_busy() {
            warn!(room = %room, status = ?self.status, "already connected; ignoring room change");
            return false;
        }
        self.room = Some(room);
        self.status = ConnectionStatus::Idle;
        true
    }

    /// Move to `Connecting` if a connection may be opened now: both token and
    /// room are known and nothing is open or in flight.
    pub fn begin_connect(&mut self) -> bool {
        let ready = self.token.is_some() && self.room.is_some() && self.status == ConnectionStatus::Idle;
        if ready {
            self.status = ConnectionStatus::Connecting;
            info!(room = ?self.room, "connecting");
        }
        ready
    }

    /// Transport opened. Returns the authentication frame to send first.
    pub fn on_open(&mut self) -> Option<ClientFrame> {
        if self.status != ConnectionStatus::Connecting {
            debug!(status = ?self.status, "open event without pending connect");
            return None;
        }
        let (Some(token), Some(room)) = (self.token.clone(), self.room.clone()) else {
            return None;
        };
        self.status = ConnectionStatus::Open;
        info!(room = %room, "connection open");
        Some(ClientFrame::Auth { token, room })
    }

    /// Outbound move frame; `None` unless the connection is open.
    pub fn move_frame(&self, candidate: &Candidate) -> Option<ClientFrame> {
        if !self.is_open() {
            return None;
        }
        Some(ClientFrame::Move {
            token: self.token.clone().unwrap_or_default(),
            room: self.room.clone().unwrap_or_default(),
            from: candidate.from.to_string(),
            to: candidate.to.to_string(),
            promotion: candidate.promotion_str(),
        })
    }

    pub fn on_error(&mut self) {
        if self.status != ConnectionStatus::Closed {
            self.status = ConnectionStatus::Error;
        }
    }

    pub fn on_closed(&mut self) {
        if self.status != ConnectionStatus::Error {
            self.status = ConnectionStatus::Closed;
        }
    }

    /// Forget the room and mark the connection closed. Returns true when a
    /// socket was open or opening and must be closed by the caller.
    pub fn teardown(&mut self) -> bool {
        let had_socket = matches!(self.status, ConnectionStatus::Connecting | ConnectionStatus::Open);
        self.room = None;
        if self.status != ConnectionStatus::Idle || had_socket {
            self.status = ConnectionStatus::Closed;
        }
        had_socket
    }
}
