//! Rules-engine seam: validate and apply candidate moves against a position.
//!
//! Everything in here is stateless. Callers own the positions; an applier
//! only answers questions about them and produces new ones.

use shakmaty::fen::Fen;
use shakmaty::san::San;
use shakmaty::{CastlingMode, Chess, Color, EnPassantMode, File, Move, Piece, Position, Role, Square};

use crate::error::ChessError;
use crate::notation::Candidate;

pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Move characteristics hosts use for feedback (sound, highlight).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveFlags {
    pub capture: bool,
    pub en_passant: bool,
    pub castle: bool,
    pub promotion: bool,
    pub double_push: bool,
}

/// A legal move in the verbose form the session layer works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegalMove {
    pub from: Square,
    /// King destination for castling (g/c file), not the rook square.
    pub to: Square,
    pub role: Role,
    pub promotion: Option<Role>,
    pub captured: Option<Role>,
    pub flags: MoveFlags,
}

impl LegalMove {
    pub fn candidate(&self) -> Candidate {
        Candidate {
            from: self.from,
            to: self.to,
            promotion: self.promotion,
        }
    }

    pub fn uci(&self) -> String {
        self.candidate().uci()
    }
}

/// Descriptor of a move that was accepted and played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub san: String,
    pub uci: String,
    pub from: Square,
    pub to: Square,
    pub role: Role,
    pub captured: Option<Role>,
    pub flags: MoveFlags,
    pub is_check: bool,
}

/// Rules verdict for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameStatus {
    Ongoing,
    Checkmate { winner: Color },
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

impl GameStatus {
    pub fn is_over(&self) -> bool {
        !matches!(self, GameStatus::Ongoing)
    }

    pub fn winner(&self) -> Option<Color> {
        match self {
            GameStatus::Checkmate { winner } => Some(*winner),
            _ => None,
        }
    }

    pub fn is_draw(&self) -> bool {
        self.is_over() && self.winner().is_none()
    }
}

/// The rules-engine contract consumed by the timeline.
pub trait MoveApplier {
    fn parse_fen(&self, fen: &str) -> Result<Chess, ChessError>;

    fn to_fen(&self, pos: &Chess) -> String;

    /// Legal moves of the side to move, optionally restricted to one origin square.
    fn legal_moves(&self, pos: &Chess, square: Option<Square>) -> Vec<LegalMove>;

    /// Validate `candidate` against `pos`. On success returns the position
    /// after the move together with its descriptor.
    fn apply_move(&self, pos: &Chess, candidate: &Candidate) -> Result<(Chess, AppliedMove), ChessError>;

    /// Resolve a SAN token to the candidate it denotes in `pos`.
    fn candidate_from_san(&self, pos: &Chess, san: &str) -> Result<Candidate, ChessError>;

    /// Replay a move previously produced by `apply_move` from its SAN.
    fn replay_san(&self, pos: &Chess, san: &str) -> Result<Chess, ChessError>;

    fn status(&self, pos: &Chess) -> GameStatus;

    fn is_check(&self, pos: &Chess) -> bool {
        pos.is_check()
    }

    fn find_piece(&self, pos: &Chess, color: Color, role: Role) -> Option<Square> {
        pos.board().by_piece(Piece { color, role }).first()
    }

    /// True when `from`-`to` is a legal move that needs a promotion piece.
    fn requires_promotion(&self, pos: &Chess, from: Square, to: Square) -> bool {
        self.legal_moves(pos, Some(from))
            .iter()
            .any(|m| m.to == to && m.promotion.is_some())
    }

    /// Identity of a position for repetition counting: placement, side to
    /// move, castling rights and a capturable en passant square.
    fn position_key(&self, pos: &Chess) -> String {
        self.to_fen(pos)
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Resolve a move token of unknown notation. UCI is tried first, with a
    /// queen promotion added when the bare move needs one; anything else is
    /// read as SAN.
    fn resolve_token(&self, pos: &Chess, token: &str) -> Result<Candidate, ChessError> {
        let token = token.trim();
        if let Ok(uci) = token.parse::<Candidate>() {
            if self.apply_move(pos, &uci).is_ok() {
                return Ok(uci);
            }
            if uci.promotion.is_none() && self.requires_promotion(pos, uci.from, uci.to) {
                return Ok(uci.with_promotion(Role::Queen));
            }
        }
        self.candidate_from_san(pos, token)
    }
}

/// `shakmaty`-backed rules for standard chess.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardRules;

impl MoveApplier for StandardRules {
    fn parse_fen(&self, fen: &str) -> Result<Chess, ChessError> {
        let parsed: Fen = fen
            .trim()
            .parse()
            .map_err(|_| ChessError::InvalidFen(fen.to_string()))?;
        parsed
            .into_position::<Chess>(CastlingMode::Standard)
            .map_err(|_| ChessError::InvalidFen(fen.to_string()))
    }

    fn to_fen(&self, pos: &Chess) -> String {
        Fen::from_position(pos, EnPassantMode::Legal).to_string()
    }

    fn legal_moves(&self, pos: &Chess, square: Option<Square>) -> Vec<LegalMove> {
        pos.legal_moves()
            .into_iter()
            .filter(|m| square.is_none() || m.from() == square)
            .filter_map(|m| describe(&m))
            .collect()
    }

    fn apply_move(&self, pos: &Chess, candidate: &Candidate) -> Result<(Chess, AppliedMove), ChessError> {
        let illegal = || ChessError::IllegalMove {
            mv: candidate.uci(),
            fen: self.to_fen(pos),
        };

        let mv = pos
            .legal_moves()
            .into_iter()
            .find(|m| matches_candidate(m, candidate))
            .ok_or_else(illegal)?;
        let legal = describe(&mv).ok_or_else(illegal)?;

        let san = San::from_move(pos, mv.clone()).to_string();
        let mut after = pos.clone();
        after.play_unchecked(mv);

        let is_check = after.is_check();
        let suffix = if after.is_checkmate() {
            "#"
        } else if is_check {
            "+"
        } else {
            ""
        };

        let applied = AppliedMove {
            san: format!("{san}{suffix}"),
            uci: legal.uci(),
            from: legal.from,
            to: legal.to,
            role: legal.role,
            captured: legal.captured,
            flags: legal.flags,
            is_check,
        };
        Ok((after, applied))
    }

    fn candidate_from_san(&self, pos: &Chess, san: &str) -> Result<Candidate, ChessError> {
        let mv = self.san_to_move(pos, san)?;
        describe(&mv)
            .map(|m| m.candidate())
            .ok_or_else(|| ChessError::InvalidSan(san.to_string()))
    }

    fn replay_san(&self, pos: &Chess, san: &str) -> Result<Chess, ChessError> {
        let mv = self.san_to_move(pos, san)?;
        let mut after = pos.clone();
        after.play_unchecked(mv);
        Ok(after)
    }

    fn status(&self, pos: &Chess) -> GameStatus {
        if pos.is_checkmate() {
            GameStatus::Checkmate { winner: !pos.turn() }
        } else if pos.is_stalemate() {
            GameStatus::Stalemate
        } else if pos.is_insufficient_material() {
            GameStatus::InsufficientMaterial
        } else if pos.halfmoves() >= 100 {
            GameStatus::FiftyMoveRule
        } else {
            GameStatus::Ongoing
        }
    }
}

impl StandardRules {
    fn san_to_move(&self, pos: &Chess, san: &str) -> Result<Move, ChessError> {
        let core = san.trim().trim_end_matches(['+', '#', '!', '?']);
        let parsed: San = core
            .parse()
            .map_err(|_| ChessError::InvalidSan(san.to_string()))?;
        parsed.to_move(pos).map_err(|_| ChessError::IllegalMove {
            mv: san.to_string(),
            fen: self.to_fen(pos),
        })
    }
}

/// King destination of a castling move in coordinate notation.
fn castle_target(king: Square, rook: Square) -> Square {
    let file = if rook.file() > king.file() { File::G } else { File::C };
    Square::from_coords(file, king.rank())
}

fn matches_candidate(mv: &Move, candidate: &Candidate) -> bool {
    match mv {
        Move::Castle { king, rook } => {
            *king == candidate.from && (candidate.to == castle_target(*king, *rook) || candidate.to == *rook)
        }
        Move::Normal {
            from, to, promotion, ..
        } => {
            *from == candidate.from
                && *to == candidate.to
                // A promotion letter on a non-promotion move is ignored.
                && (promotion.is_none() || *promotion == candidate.promotion)
        }
        Move::EnPassant { from, to } => *from == candidate.from && *to == candidate.to,
        Move::Put { .. } => false,
    }
}

fn describe(mv: &Move) -> Option<LegalMove> {
    match mv {
        Move::Normal {
            role,
            from,
            capture,
            to,
            promotion,
        } => {
            let rank_delta = (to.rank() as i32 - from.rank() as i32).abs();
            Some(LegalMove {
                from: *from,
                to: *to,
                role: *role,
                promotion: *promotion,
                captured: *capture,
                flags: MoveFlags {
                    capture: capture.is_some(),
                    promotion: promotion.is_some(),
                    double_push: *role == Role::Pawn && rank_delta == 2,
                    ..MoveFlags::default()
                },
            })
        }
        Move::EnPassant { from, to } => Some(LegalMove {
            from: *from,
            to: *to,
            role: Role::Pawn,
            promotion: None,
            captured: Some(Role::Pawn),
            flags: MoveFlags {
                capture: true,
                en_passant: true,
                ..MoveFlags::default()
            },
        }),
        Move::Castle { king, rook } => Some(LegalMove {
            from: *king,
            to: castle_target(*king, *rook),
            role: Role::King,
            promotion: None,
            captured: None,
            flags: MoveFlags {
                castle: true,
                ..MoveFlags::default()
            },
        }),
        Move::Put { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> Chess {
        Chess::default()
    }

    #[test]
    fn test_apply_opening_move() {
        let rules = StandardRules;
        let (after, applied) = rules.apply_move(&start(), &"e2e4".parse().unwrap()).unwrap();
        assert_eq!(applied.san, "e4");
        assert_eq!(applied.uci, "e2e4");
        assert!(applied.flags.double_push);
        assert!(!applied.is_check);
        assert_eq!(after.turn(), Color::Black);
    }

    #[test]
    fn test_illegal_move_is_rejected() {
        let rules = StandardRules;
        let err = rules.apply_move(&start(), &"e2e5".parse().unwrap()).unwrap_err();
        assert!(matches!(err, ChessError::IllegalMove { .. }));
    }

    #[test]
    fn test_legal_moves_for_square() {
        let rules = StandardRules;
        let moves = rules.legal_moves(&start(), Some(Square::G1));
        let mut targets: Vec<String> = moves.iter().map(|m| m.to.to_string()).collect();
        targets.sort();
        assert_eq!(targets, vec!["f3", "h3"]);
        assert_eq!(rules.legal_moves(&start(), None).len(), 20);
    }

    #[test]
    fn test_castling_accepts_both_encodings() {
        let rules = StandardRules;
        let pos = rules
            .parse_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1")
            .unwrap();
        let (_, short) = rules.apply_move(&pos, &"e1g1".parse().unwrap()).unwrap();
        assert_eq!(short.san, "O-O");
        assert!(short.flags.castle);
        let (_, rook_form) = rules.apply_move(&pos, &"e1a1".parse().unwrap()).unwrap();
        assert_eq!(rook_form.san, "O-O-O");
        assert_eq!(rook_form.uci, "e1c1");
    }

    #[test]
    fn test_promotion_requires_piece() {
        let rules = StandardRules;
        let pos = rules.parse_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        assert!(rules.requires_promotion(&pos, Square::E7, Square::E8));
        assert!(rules.apply_move(&pos, &"e7e8".parse().unwrap()).is_err());
        let (_, applied) = rules.apply_move(&pos, &"e7e8n".parse().unwrap()).unwrap();
        assert_eq!(applied.san, "e8=N");
        assert!(applied.flags.promotion);
    }

    #[test]
    fn test_check_suffix_and_replay() {
        let rules = StandardRules;
        let mut pos = start();
        let mut sans = Vec::new();
        for uci in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            let (after, applied) = rules.apply_move(&pos, &uci.parse().unwrap()).unwrap();
            sans.push(applied.san);
            pos = after;
        }
        assert_eq!(sans.last().map(String::as_str), Some("Qh4#"));
        assert_eq!(rules.status(&pos), GameStatus::Checkmate { winner: Color::Black });

        let mut replayed = start();
        for san in &sans {
            replayed = rules.replay_san(&replayed, san).unwrap();
        }
        assert_eq!(rules.to_fen(&replayed), rules.to_fen(&pos));
    }

    #[test]
    fn test_candidate_from_san() {
        let rules = StandardRules;
        let c = rules.candidate_from_san(&start(), "Nf3").unwrap();
        assert_eq!(c.uci(), "g1f3");
        assert!(rules.candidate_from_san(&start(), "Nf5").is_err());
    }

    #[test]
    fn test_find_piece() {
        let rules = StandardRules;
        assert_eq!(rules.find_piece(&start(), Color::White, Role::King), Some(Square::E1));
        assert_eq!(rules.find_piece(&start(), Color::Black, Role::Queen), Some(Square::D8));
    }

    #[test]
    fn test_resolve_token_accepts_either_notation() {
        let rules = StandardRules;
        assert_eq!(rules.resolve_token(&start(), "g1f3").unwrap().uci(), "g1f3");
        assert_eq!(rules.resolve_token(&start(), "Nf3").unwrap().uci(), "g1f3");
        assert!(rules.resolve_token(&start(), "Ke2").is_err());

        let pos = rules.parse_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        assert_eq!(rules.resolve_token(&pos, "e7e8").unwrap().uci(), "e7e8q");
        assert_eq!(rules.resolve_token(&pos, "e7e8n").unwrap().uci(), "e7e8n");
        assert_eq!(rules.resolve_token(&pos, "e8=R").unwrap().uci(), "e7e8r");
    }

    #[test]
    fn test_position_key_ignores_move_counters() {
        let rules = StandardRules;
        let a = rules.parse_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let b = rules.parse_fen("4k3/8/8/8/8/8/8/4K3 w - - 12 40").unwrap();
        assert_eq!(rules.position_key(&a), rules.position_key(&b));
        assert_eq!(rules.position_key(&a), "4k3/8/8/8/8/8/8/4K3 w - -");
    }

    #[test]
    fn test_invalid_fen() {
        assert!(StandardRules.parse_fen("not a fen").is_err());
    }
}
