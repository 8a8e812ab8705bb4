//! The committed move list, the navigation cursor, and the position derived
//! from them.
//!
//! Entries are only ever appended after the rules engine has accepted them,
//! so replaying any prefix from the initial position always succeeds. The
//! displayed position is rebuilt by replay on every navigation; it is never
//! patched incrementally.

use chess_core::{
    AppliedMove, Candidate, ChessError, GameStatus, LegalMove, MoveApplier, MoveFlags, StandardRules,
};
use shakmaty::{Chess, Color, Position, Role, Square};
use tracing::{debug, warn};

use crate::error::CommitError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub san: String,
    pub uci: String,
    pub from: Square,
    pub to: Square,
    pub flags: MoveFlags,
}

impl From<&AppliedMove> for TimelineEntry {
    fn from(m: &AppliedMove) -> Self {
        Self {
            san: m.san.clone(),
            uci: m.uci.clone(),
            from: m.from,
            to: m.to,
            flags: m.flags,
        }
    }
}

pub struct TimelineStore {
    rules: Box<dyn MoveApplier + Send + Sync>,
    initial: Chess,
    initial_fen: String,
    entries: Vec<TimelineEntry>,
    cursor: usize,
    position: Chess,
    /// Position key after each ply; index 0 is the initial position.
    keys: Vec<String>,
}

impl std::fmt::Debug for TimelineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineStore")
            .field("initial_fen", &self.initial_fen)
            .field("entries", &self.entries)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Default for TimelineStore {
    fn default() -> Self {
        Self::new(Box::new(StandardRules))
    }
}

impl TimelineStore {
    pub fn new(rules: Box<dyn MoveApplier + Send + Sync>) -> Self {
        let initial = Chess::default();
        let initial_fen = rules.to_fen(&initial);
        let keys = vec![rules.position_key(&initial)];
        Self {
            keys,
            rules,
            position: initial.clone(),
            initial,
            initial_fen,
            entries: Vec::new(),
            cursor: 0,
        }
    }

    pub fn rules(&self) -> &dyn MoveApplier {
        self.rules.as_ref()
    }

    /// Drop every entry and start over from the standard position.
    pub fn reset(&mut self) {
        self.set_initial(Chess::default());
    }

    /// Drop every entry and start over from `fen`. On a bad FEN the store is
    /// left as it was.
    pub fn reset_to(&mut self, fen: &str) -> Result<(), ChessError> {
        let pos = self.rules.parse_fen(fen)?;
        self.set_initial(pos);
        Ok(())
    }

    fn set_initial(&mut self, pos: Chess) {
        self.initial_fen = self.rules.to_fen(&pos);
        self.keys = vec![self.rules.position_key(&pos)];
        self.position = pos.clone();
        self.initial = pos;
        self.entries.clear();
        self.cursor = 0;
    }

    /// Validate and append a move at the tip.
    ///
    /// When the cursor is behind the tip it is first fast-forwarded; browsing
    /// history never truncates the line. A move that was legal at the browsed
    /// position may therefore be rejected here. On rejection nothing is
    /// appended and the cursor stays at the tip.
    pub fn commit(&mut self, candidate: &Candidate) -> Result<AppliedMove, CommitError> {
        if !self.at_tip() {
            debug!(cursor = self.cursor, len = self.entries.len(), "fast-forwarding to tip before commit");
            self.navigate(self.entries.len())?;
        }

        let (after, applied) = self.rules.apply_move(&self.position, candidate)?;
        self.keys.push(self.rules.position_key(&after));
        self.entries.push(TimelineEntry::from(&applied));
        self.cursor = self.entries.len();
        self.position = after;
        debug!(ply = self.cursor, san = %applied.san, uci = %applied.uci, "move committed");
        Ok(applied)
    }

    /// Move the cursor to `ply`, clamped to `[0, len]`, and rebuild the
    /// position by replaying from the initial position. Returns the new cursor.
    pub fn navigate(&mut self, ply: usize) -> Result<usize, CommitError> {
        let target = ply.min(self.entries.len());
        self.position = self.replay(target)?;
        self.cursor = target;
        Ok(target)
    }

    /// Step back up to `n` plies. Returns the number of plies actually moved.
    pub fn undo(&mut self, n: usize) -> Result<usize, CommitError> {
        let before = self.cursor;
        let after = self.navigate(before.saturating_sub(n))?;
        Ok(before - after)
    }

    /// Step forward up to `n` plies. Returns the number of plies actually moved.
    pub fn redo(&mut self, n: usize) -> Result<usize, CommitError> {
        let before = self.cursor;
        let after = self.navigate(before.saturating_add(n))?;
        Ok(after - before)
    }

    /// Remove the last entry. This is the only operation that deletes from
    /// the timeline; the cursor ends up at the new tip.
    pub fn retract_tip(&mut self) -> Result<Option<TimelineEntry>, CommitError> {
        let removed = self.entries.pop();
        if removed.is_some() {
            self.keys.pop();
            self.navigate(self.entries.len())?;
        }
        Ok(removed)
    }

    /// Import a line for review. Tokens may be SAN or UCI and are replayed in
    /// order; import stops at the first one that cannot be played. The
    /// cursor is left at ply 0. Returns the number of plies imported.
    pub fn load_line(&mut self, fen: Option<&str>, tokens: &[String]) -> Result<usize, ChessError> {
        let start = match fen {
            Some(f) => self.rules.parse_fen(f)?,
            None => Chess::default(),
        };
        self.set_initial(start);

        for token in tokens {
            let step = self
                .rules
                .resolve_token(&self.position, token)
                .and_then(|c| self.rules.apply_move(&self.position, &c));
            match step {
                Ok((after, applied)) => {
                    self.keys.push(self.rules.position_key(&after));
                    self.entries.push(TimelineEntry::from(&applied));
                    self.position = after;
                }
                Err(e) => {
                    warn!(token = %token, ply = self.entries.len() + 1, error = %e, "stopping line import");
                    break;
                }
            }
        }

        let imported = self.entries.len();
        self.position = self.initial.clone();
        self.cursor = 0;
        Ok(imported)
    }

    fn replay(&self, ply: usize) -> Result<Chess, CommitError> {
        let mut pos = self.initial.clone();
        for (i, entry) in self.entries[..ply].iter().enumerate() {
            pos = self
                .rules
                .replay_san(&pos, &entry.san)
                .map_err(|_| CommitError::Replay(i + 1))?;
        }
        Ok(pos)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn at_tip(&self) -> bool {
        self.cursor == self.entries.len()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn initial_position(&self) -> &Chess {
        &self.initial
    }

    pub fn initial_fen(&self) -> &str {
        &self.initial_fen
    }

    pub fn fen(&self) -> String {
        self.rules.to_fen(&self.position)
    }

    /// Side to move at the displayed position.
    pub fn turn(&self) -> Color {
        self.position.turn()
    }

    /// Side to move at the tip, wherever the cursor is.
    pub fn tip_turn(&self) -> Color {
        if self.entries.len() % 2 == 0 {
            self.initial.turn()
        } else {
            !self.initial.turn()
        }
    }

    /// SANs up to the cursor.
    pub fn visible(&self) -> Vec<String> {
        self.entries[..self.cursor].iter().map(|e| e.san.clone()).collect()
    }

    pub fn sans(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.san.clone()).collect()
    }

    /// Origin and destination of the move that produced the displayed position.
    pub fn last_move_squares(&self) -> Option<(Square, Square)> {
        self.cursor
            .checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .map(|e| (e.from, e.to))
    }

    pub fn legal_moves(&self, square: Option<Square>) -> Vec<LegalMove> {
        self.rules.legal_moves(&self.position, square)
    }

    /// Rules status of the displayed position. Repetition counts only the
    /// plies up to the cursor.
    pub fn status(&self) -> GameStatus {
        let status = self.rules.status(&self.position);
        if status.is_over() {
            return status;
        }
        let seen = &self.keys[..=self.cursor];
        let current = &seen[self.cursor];
        if seen.iter().filter(|k| *k == current).count() >= 3 {
            GameStatus::ThreefoldRepetition
        } else {
            status
        }
    }

    pub fn is_check(&self) -> bool {
        self.rules.is_check(&self.position)
    }

    /// Square of the side-to-move's king when it is in check.
    pub fn checked_king(&self) -> Option<Square> {
        if self.is_check() {
            self.rules.find_piece(&self.position, self.turn(), Role::King)
        } else {
            None
        }
    }
}
