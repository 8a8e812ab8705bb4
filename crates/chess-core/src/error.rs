//! Error types for move parsing and application.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChessError {
    #[error("Invalid FEN: {0}")]
    InvalidFen(String),

    #[error("Invalid UCI move: {0}")]
    InvalidUci(String),

    #[error("Invalid SAN move: {0}")]
    InvalidSan(String),

    #[error("Illegal move {mv} in position {fen}")]
    IllegalMove { mv: String, fen: String },
}
