//! JSON frames exchanged with the game server.

use serde::{Deserialize, Serialize};

// ---- Message types ----

/// Client → Server messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Auth {
        token: String,
        room: String,
    },
    Move {
        token: String,
        room: String,
        from: String,
        to: String,
        /// Empty when the move is not a promotion.
        promotion: String,
    },
}

/// Server → Client messages
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    GameState {
        /// `"BOT"` when the server plays black, otherwise the black player's id.
        #[serde(default)]
        black: Option<String>,
    },
    Move {
        from: String,
        to: String,
        #[serde(default)]
        promotion: Option<String>,
    },
    GameOver {
        #[serde(default)]
        result: GameResult,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GameResult {
    /// `"white"` or `"black"`; absent for a draw.
    #[serde(default)]
    pub winner: Option<String>,
}

pub const BOT_ID: &str = "BOT";
pub const JWT_EXPIRED: &str = "jwt expired";

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
