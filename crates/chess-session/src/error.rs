//! Session error types

use chess_core::ChessError;
use thiserror::Error;

/// Why a move was not committed. Always returned as a value; the host decides
/// how to surface it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("Illegal move: {0}")]
    Illegal(#[from] ChessError),

    #[error("Board is locked until the incorrect move is acknowledged")]
    Locked,

    #[error("No game in progress")]
    NotPlaying,

    #[error("A promotion choice is pending")]
    PromotionPending,

    #[error("No promotion is pending")]
    NoPendingPromotion,

    #[error("Timeline entry {0} could not be replayed")]
    Replay(usize),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("Chess error: {0}")]
    Chess(#[from] ChessError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Not authorized")]
    Unauthorized,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Runtime has shut down")]
    Closed,
}
