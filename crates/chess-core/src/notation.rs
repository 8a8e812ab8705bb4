//! Coordinate (UCI) notation for candidate moves.

use std::fmt;
use std::str::FromStr;

use shakmaty::{Role, Square};

use crate::error::ChessError;

/// A move as the user or a peer proposes it: squares plus an optional
/// promotion piece. Nothing about legality is known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl Candidate {
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from,
            to,
            promotion: None,
        }
    }

    pub fn with_promotion(mut self, role: Role) -> Self {
        self.promotion = Some(role);
        self
    }

    /// Build from the loose string parts used on the wire (`promotion` may be
    /// empty).
    pub fn from_parts(from: &str, to: &str, promotion: Option<&str>) -> Result<Self, ChessError> {
        let from_sq = parse_square(from)?;
        let to_sq = parse_square(to)?;
        let promotion = match promotion.map(str::trim) {
            None | Some("") => None,
            Some(p) => Some(parse_promotion(p)?),
        };
        Ok(Self {
            from: from_sq,
            to: to_sq,
            promotion,
        })
    }

    /// UCI text, e.g. `e2e4` or `e7e8q`.
    pub fn uci(&self) -> String {
        self.to_string()
    }

    /// Promotion letter as sent on the wire, empty when there is none.
    pub fn promotion_str(&self) -> String {
        self.promotion
            .map(|r| r.char().to_string())
            .unwrap_or_default()
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(role) = self.promotion {
            write!(f, "{}", role.char())?;
        }
        Ok(())
    }
}

impl FromStr for Candidate {
    type Err = ChessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.is_ascii() || !(s.len() == 4 || s.len() == 5) {
            return Err(ChessError::InvalidUci(s.to_string()));
        }
        let promotion = if s.len() == 5 { Some(&s[4..5]) } else { None };
        Self::from_parts(&s[0..2], &s[2..4], promotion)
            .map_err(|_| ChessError::InvalidUci(s.to_string()))
    }
}

fn parse_square(s: &str) -> Result<Square, ChessError> {
    s.trim()
        .parse::<Square>()
        .map_err(|_| ChessError::InvalidUci(s.to_string()))
}

/// Parse a promotion letter; only knight, bishop, rook and queen are valid.
pub fn parse_promotion(s: &str) -> Result<Role, ChessError> {
    let mut chars = s.chars();
    let role = match (chars.next(), chars.next()) {
        (Some(c), None) => Role::from_char(c.to_ascii_lowercase()),
        _ => None,
    };
    match role {
        Some(r @ (Role::Knight | Role::Bishop | Role::Rook | Role::Queen)) => Ok(r),
        _ => Err(ChessError::InvalidUci(s.to_string())),
    }
}
