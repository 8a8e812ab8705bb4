//! Puzzle solution checking.
//!
//! Judgement is optimistic and local: the player's move is compared with the
//! expected solution move right away, while the authoritative server check
//! runs on the side and only updates display state.

use chess_core::Candidate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Puzzle {
    pub id: String,
    pub fen: String,
    /// UCI moves, starting with the side to move in `fen`.
    #[serde(alias = "solution")]
    pub moves: Vec<String>,
    #[serde(default)]
    pub rating: Option<i32>,
    #[serde(default)]
    pub themes: Vec<String>,
}

/// Server verdict for one submitted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub correct: bool,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub new_rating: Option<i32>,
    #[serde(default)]
    pub rating_change: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuzzlePhase {
    WaitingPlayerMove,
    Locked,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No puzzle loaded; every move passes.
    Permissive,
    Correct { finished: bool },
    Incorrect,
}

#[derive(Debug)]
pub struct PuzzleValidator {
    puzzle: Option<Puzzle>,
    solved_index: usize,
    locked_at_ply: Option<usize>,
    phase: PuzzlePhase,
    last_report: Option<VerificationReport>,
    rating: Option<i32>,
    rating_change: Option<i32>,
    hint: Option<String>,
}

impl Default for PuzzleValidator {
    fn default() -> Self {
        Self {
            puzzle: None,
            solved_index: 0,
            locked_at_ply: None,
            phase: PuzzlePhase::WaitingPlayerMove,
            last_report: None,
            rating: None,
            rating_change: None,
            hint: None,
        }
    }
}

impl PuzzleValidator {
    pub fn load(&mut self, puzzle: Puzzle) {
        info!(puzzle_id = %puzzle.id, moves = puzzle.moves.len(), "puzzle loaded");
        let rating = self.rating;
        *self = Self {
            rating,
            ..Self::default()
        };
        self.puzzle = Some(puzzle);
    }

    pub fn clear(&mut self) {
        let rating = self.rating;
        *self = Self {
            rating,
            ..Self::default()
        };
    }

    pub fn puzzle(&self) -> Option<&Puzzle> {
        self.puzzle.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.puzzle.is_some()
    }

    pub fn phase(&self) -> PuzzlePhase {
        self.phase
    }

    pub fn is_locked(&self) -> bool {
        self.phase == PuzzlePhase::Locked
    }

    pub fn is_finished(&self) -> bool {
        self.phase == PuzzlePhase::Finished
    }

    pub fn solved_index(&self) -> usize {
        self.solved_index
    }

    pub fn solution_len(&self) -> usize {
        self.puzzle.as_ref().map_or(0, |p| p.moves.len())
    }

    pub fn locked_at_ply(&self) -> Option<usize> {
        self.locked_at_ply
    }

    /// Latest assistant commentary for this attempt.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn set_hint(&mut self, text: String) {
        self.hint = Some(text);
    }

    pub fn last_report(&self) -> Option<&VerificationReport> {
        self.last_report.as_ref()
    }

    pub fn rating(&self) -> Option<i32> {
        self.rating
    }

    pub fn rating_change(&self) -> Option<i32> {
        self.rating_change
    }

    /// The solution move expected next, as UCI.
    pub fn expected(&self) -> Option<&str> {
        self.puzzle
            .as_ref()
            .and_then(|p| p.moves.get(self.solved_index))
            .map(String::as_str)
    }

    pub fn expected_candidate(&self) -> Option<Candidate> {
        self.expected().and_then(|uci| uci.parse().ok())
    }

    /// Judge a player move that has already been committed at `ply`.
    pub fn judge(&mut self, uci: &str, ply: usize) -> Verdict {
        let Some(expected) = self.expected() else {
            if self.is_loaded() {
                // Script exhausted; nothing left to compare against.
                return Verdict::Incorrect;
            }
            return Verdict::Permissive;
        };

        if expected.eq_ignore_ascii_case(uci) {
            self.solved_index += 1;
            let finished = self.solved_index >= self.solution_len();
            if finished {
                self.phase = PuzzlePhase::Finished;
            }
            debug!(uci, solved_index = self.solved_index, finished, "puzzle move correct");
            Verdict::Correct { finished }
        } else {
            debug!(uci, expected, ply, "puzzle move incorrect");
            self.phase = PuzzlePhase::Locked;
            self.locked_at_ply = Some(ply);
            Verdict::Incorrect
        }
    }

    /// Clear the lock. Returns true when there was one; the caller then takes
    /// back exactly one ply.
    pub fn acknowledge(&mut self) -> bool {
        if !self.is_locked() {
            return false;
        }
        self.phase = PuzzlePhase::WaitingPlayerMove;
        self.locked_at_ply = None;
        true
    }

    /// Record that the scripted reply was played. Returns true when that
    /// completed the solution.
    pub fn record_opponent_reply(&mut self) -> bool {
        let len = self.solution_len();
        self.solved_index = (self.solved_index + 1).min(len);
        if self.solved_index >= len {
            self.phase = PuzzlePhase::Finished;
            return true;
        }
        false
    }

    pub fn apply_report(&mut self, report: VerificationReport) {
        if let Some(r) = report.new_rating {
            self.rating = Some(r);
        }
        self.rating_change = if report.correct && !report.finished {
            None
        } else {
            report.rating_change
        };
        if report.finished {
            self.phase = PuzzlePhase::Finished;
        }
        self.last_report = Some(report);
    }
}
