//! A single pending move made while the opponent is to move.

use chess_core::{Candidate, LegalMove};
use shakmaty::{Role, Square};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Premove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Role>,
}

impl From<Candidate> for Premove {
    fn from(c: Candidate) -> Self {
        Self {
            from: c.from,
            to: c.to,
            promotion: c.promotion,
        }
    }
}

/// What to do with a staged premove once the turn has come back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing was staged.
    Idle,
    Commit(Candidate),
    /// Legal, but the promotion piece still has to be chosen.
    NeedsPromotion { from: Square, to: Square },
    /// No longer legal; dropped without error.
    Discarded,
}

#[derive(Debug, Default)]
pub struct PremoveQueue {
    staged: Option<Premove>,
}

impl PremoveQueue {
    /// Stage `premove`, replacing anything staged before.
    pub fn stage(&mut self, premove: Premove) {
        debug!(from = %premove.from, to = %premove.to, "premove staged");
        self.staged = Some(premove);
    }

    pub fn staged(&self) -> Option<Premove> {
        self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_none()
    }

    /// Drop the staged move. Returns true if there was one.
    pub fn discard(&mut self, reason: &'static str) -> bool {
        match self.staged.take() {
            Some(p) => {
                debug!(from = %p.from, to = %p.to, reason, "premove discarded");
                true
            }
            None => false,
        }
    }

    /// Re-validate the staged move against the legal moves of the position
    /// where it is now the player's turn. The queue is empty afterwards.
    pub fn resolve(&mut self, legal: &[LegalMove]) -> Resolution {
        let Some(p) = self.staged.take() else {
            return Resolution::Idle;
        };

        let mut matching = legal.iter().filter(|m| m.from == p.from && m.to == p.to).peekable();
        let Some(first) = matching.peek().copied() else {
            debug!(from = %p.from, to = %p.to, "premove no longer legal");
            return Resolution::Discarded;
        };

        if first.promotion.is_none() {
            return Resolution::Commit(Candidate::new(p.from, p.to));
        }
        match p.promotion {
            Some(role) if matching.any(|m| m.promotion == Some(role)) => {
                Resolution::Commit(Candidate::new(p.from, p.to).with_promotion(role))
            }
            _ => Resolution::NeedsPromotion { from: p.from, to: p.to },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::{MoveApplier, StandardRules};

    fn premove(uci: &str) -> Premove {
        uci.parse::<Candidate>().unwrap().into()
    }

    #[test]
    fn test_stage_replaces_previous() {
        let mut q = PremoveQueue::default();
        q.stage(premove("e2e4"));
        q.stage(premove("d2d4"));
        assert_eq!(q.staged().map(|p| p.from), Some(Square::D2));
        assert!(q.discard("cancel"));
        assert!(!q.discard("cancel"));
    }

    #[test]
    fn test_resolve_legal_commits() {
        let rules = StandardRules;
        let legal = rules.legal_moves(&shakmaty::Chess::default(), None);
        let mut q = PremoveQueue::default();
        q.stage(premove("g1f3"));
        assert_eq!(q.resolve(&legal), Resolution::Commit("g1f3".parse().unwrap()));
        assert!(q.is_empty());
    }

    #[test]
    fn test_resolve_illegal_discards() {
        let rules = StandardRules;
        let legal = rules.legal_moves(&shakmaty::Chess::default(), None);
        let mut q = PremoveQueue::default();
        q.stage(premove("e2e5"));
        assert_eq!(q.resolve(&legal), Resolution::Discarded);
        assert_eq!(q.resolve(&legal), Resolution::Idle);
    }

    #[test]
    fn test_resolve_promotion() {
        let rules = StandardRules;
        let pos = rules.parse_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        let legal = rules.legal_moves(&pos, None);

        let mut q = PremoveQueue::default();
        q.stage(premove("e7e8"));
        assert_eq!(
            q.resolve(&legal),
            Resolution::NeedsPromotion {
                from: Square::E7,
                to: Square::E8
            }
        );

        q.stage(premove("e7e8r"));
        assert_eq!(q.resolve(&legal), Resolution::Commit("e7e8r".parse().unwrap()));
    }
}
