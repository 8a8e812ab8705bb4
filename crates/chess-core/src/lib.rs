pub mod applier;
pub mod error;
pub mod geometry;
pub mod notation;
pub mod pgn;

pub use applier::{AppliedMove, GameStatus, LegalMove, MoveApplier, MoveFlags, StandardRules, STANDARD_START_FEN};
pub use error::ChessError;
pub use geometry::is_plausible_premove;
pub use notation::{parse_promotion, Candidate};
pub use pgn::{extract_san_moves, format_movetext, format_movetext_for, move_rows, MoveRow};

pub use shakmaty::{Chess, Color, Role, Square};
