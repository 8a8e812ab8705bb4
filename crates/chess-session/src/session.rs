//! `GameSession`: the single writer over one game.
//!
//! Every input (player move, fired timer, inbound frame, finished REST call)
//! is a method call that runs to completion. Outward actions are not
//! performed here; they are queued as [`Effect`]s for the host to drain and
//! execute.

use std::time::Duration;

use chess_core::{is_plausible_premove, AppliedMove, Candidate, ChessError, GameStatus, MoveFlags};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use shakmaty::{Color, Position, Role, Square};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::CommitError;
use crate::opponent::{choose_random, DriverContext, DriverDecision, DriverKind, OpponentDriver};
use crate::premove::{Premove, PremoveQueue, Resolution};
use crate::protocol::{ClientFrame, ServerFrame, BOT_ID, JWT_EXPIRED};
use crate::puzzle::{Puzzle, PuzzleValidator, VerificationReport, Verdict};
use crate::api::Bot;
use crate::remote::{ConnectionStatus, RemoteSync};
use crate::review::{GameAnalysis, ReviewSheet};
use crate::scheduler::TaskToken;
use crate::timeline::TimelineStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Playing,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerSide {
    White,
    Black,
    Unresolved,
}

impl PlayerSide {
    pub fn color(self) -> Option<Color> {
        match self {
            PlayerSide::White => Some(Color::White),
            PlayerSide::Black => Some(Color::Black),
            PlayerSide::Unresolved => None,
        }
    }
}

impl From<Color> for PlayerSide {
    fn from(c: Color) -> Self {
        match c {
            Color::White => PlayerSide::White,
            Color::Black => PlayerSide::Black,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SideChoice {
    White,
    Black,
    Random,
}

impl SideChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            SideChoice::White => "white",
            SideChoice::Black => "black",
            SideChoice::Random => "random",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    /// The player moves both sides.
    Analysis,
    Bot,
    Puzzle,
    Online,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Lose,
    Draw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSource {
    Player,
    Premove,
    Bot,
    PuzzleScript,
    Remote,
}

/// Result of a player move that was not rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Committed(AppliedMove),
    PremoveStaged,
    AwaitingPromotion { from: Square, to: Square },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged(Phase),
    SideResolved(PlayerSide),
    MoveCommitted {
        source: MoveSource,
        san: String,
        uci: String,
        flags: MoveFlags,
        is_check: bool,
    },
    MoveRejected {
        uci: String,
        /// King of the side to move, when it is in check.
        checked_king: Option<Square>,
    },
    PromotionRequired { from: Square, to: Square },
    PremoveStaged { from: Square, to: Square },
    PremoveDiscarded,
    PuzzleIncorrect { locked_at_ply: usize },
    PuzzleUnlocked,
    PuzzleSolved,
    PuzzleReport(VerificationReport),
    /// Assistant commentary on the last puzzle move.
    PuzzleHint(String),
    /// A game analysis was imported for review.
    ReviewLoaded { code: String, plies: usize },
    BotsListed(Vec<Bot>),
    /// A local game reached a terminal position.
    GameFinished { status: GameStatus, outcome: Outcome },
    /// Terminal position in an online game; the server has the final word.
    StatusReported(GameStatus),
    /// Server-declared end of an online game.
    GameOver { outcome: Outcome },
    Connection(ConnectionStatus),
    ServerError(String),
    RoomCreated { code: String },
    RequestFailed { request: &'static str, reason: String },
}

/// Outward actions queued for the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Connect,
    Send(ClientFrame),
    Close,
    ScheduleOpponent { token: TaskToken, delay: Duration },
    CancelOpponent,
    VerifyPuzzleMove { puzzle_id: String, uci: String, step: usize },
    RequestPuzzleHint { puzzle_id: String, uci: String, step: usize },
    RefreshToken,
    PassGame { room: String },
    Notify(SessionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingPromotion {
    from: Square,
    to: Square,
    source: MoveSource,
}

pub struct GameSession {
    timeline: TimelineStore,
    premoves: PremoveQueue,
    driver: OpponentDriver,
    puzzle: PuzzleValidator,
    remote: RemoteSync,
    review: Option<ReviewSheet>,
    phase: Phase,
    side: PlayerSide,
    mode: GameMode,
    promotion: Option<PendingPromotion>,
    rng: StdRng,
    effects: Vec<Effect>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("phase", &self.phase)
            .field("side", &self.side)
            .field("mode", &self.mode)
            .field("timeline", &self.timeline)
            .finish()
    }
}

impl GameSession {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_timeline(config, TimelineStore::default())
    }

    /// Build around an existing timeline, e.g. one backed by other rules.
    pub fn with_timeline(config: SessionConfig, timeline: TimelineStore) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            timeline,
            premoves: PremoveQueue::default(),
            driver: OpponentDriver::new(config.bot_delay, config.puzzle_reply_delay),
            puzzle: PuzzleValidator::default(),
            remote: RemoteSync::default(),
            review: None,
            phase: Phase::Idle,
            side: PlayerSide::Unresolved,
            mode: GameMode::Analysis,
            promotion: None,
            rng,
            effects: Vec::new(),
        }
    }

    // ---- Accessors ----

    pub fn timeline(&self) -> &TimelineStore {
        &self.timeline
    }

    pub fn puzzle(&self) -> &PuzzleValidator {
        &self.puzzle
    }

    pub fn remote(&self) -> &RemoteSync {
        &self.remote
    }

    /// The loaded game analysis, while reviewing one.
    pub fn review(&self) -> Option<&ReviewSheet> {
        self.review.as_ref()
    }

    pub fn driver(&self) -> &OpponentDriver {
        &self.driver
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn side(&self) -> PlayerSide {
        self.side
    }

    pub fn mode(&self) -> GameMode {
        self.mode
    }

    pub fn staged_premove(&self) -> Option<Premove> {
        self.premoves.staged()
    }

    pub fn pending_promotion(&self) -> Option<(Square, Square)> {
        self.promotion.map(|p| (p.from, p.to))
    }

    /// True when the player may move at the tip now.
    pub fn is_player_turn(&self) -> bool {
        if self.phase != Phase::Playing {
            return false;
        }
        match self.mode {
            GameMode::Analysis => true,
            _ => self.side.color() == Some(self.timeline.tip_turn()),
        }
    }

    /// Take every queued effect, oldest first.
    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    // ---- Starting and stopping ----

    /// Fresh game against the random bot.
    pub fn start_game(&mut self, choice: SideChoice) {
        self.begin_local(GameMode::Bot, Some(DriverKind::RandomBot));
        self.timeline.reset();
        let side = self.resolve_choice(choice);
        self.set_side(side);
        info!(side = ?self.side, "game started");
        self.set_phase(Phase::Playing);
        self.settle();
    }

    /// Game against the random bot from `fen`. The player takes `side`, or the
    /// side to move when none is given.
    pub fn start_from_fen(&mut self, fen: &str, side: Option<Color>) -> Result<(), ChessError> {
        self.timeline.reset_to(fen)?;
        self.begin_local(GameMode::Bot, Some(DriverKind::RandomBot));
        let side = side.unwrap_or_else(|| self.timeline.position().turn());
        self.set_side(PlayerSide::from(side));
        info!(fen, side = ?self.side, "game started from position");
        self.set_phase(Phase::Playing);
        self.settle();
        Ok(())
    }

    /// Free board where the player moves both sides.
    pub fn start_analysis(&mut self, fen: Option<&str>) -> Result<(), ChessError> {
        match fen {
            Some(f) => self.timeline.reset_to(f)?,
            None => self.timeline.reset(),
        }
        self.begin_local(GameMode::Analysis, None);
        let side = self.timeline.position().turn();
        self.set_side(PlayerSide::from(side));
        self.set_phase(Phase::Playing);
        self.settle();
        Ok(())
    }

    /// Load a line for browsing only. Returns the number of plies imported.
    pub fn load_review(&mut self, fen: Option<&str>, sans: &[String]) -> Result<usize, ChessError> {
        let imported = self.timeline.load_line(fen, sans)?;
        self.begin_local(GameMode::Analysis, None);
        self.set_side(PlayerSide::White);
        self.set_phase(Phase::Idle);
        Ok(imported)
    }

    /// Review a finished game from its server analysis. Moves are imported
    /// up to the first one that cannot be played; each imported ply carries
    /// its quality mark. Returns the number of plies imported.
    pub fn load_game_analysis(&mut self, code: &str, analysis: GameAnalysis) -> Result<usize, ChessError> {
        let tokens = analysis.tokens();
        let imported = self.load_review(analysis.base_fen(), &tokens)?;
        if imported < tokens.len() {
            warn!(code, imported, total = tokens.len(), "analysis only partly imported");
        }
        info!(code, plies = imported, "game analysis loaded");
        self.review = Some(ReviewSheet::new(code, analysis, imported));
        self.notify(SessionEvent::ReviewLoaded {
            code: code.to_string(),
            plies: imported,
        });
        Ok(imported)
    }

    /// Start a puzzle. The player plays the side to move in its FEN.
    pub fn load_puzzle(&mut self, puzzle: Puzzle) -> Result<(), ChessError> {
        self.timeline.reset_to(&puzzle.fen)?;
        self.begin_local(GameMode::Puzzle, Some(DriverKind::PuzzleScript));
        let side = self.timeline.position().turn();
        self.set_side(PlayerSide::from(side));
        self.puzzle.load(puzzle);
        self.set_phase(Phase::Playing);
        self.settle();
        Ok(())
    }

    /// Target an online room. The connection opens as soon as a token is
    /// known too. A random side stays unresolved until the server says.
    ///
    /// Refused, with the session untouched, while a connection is open or
    /// opening; forfeit or reset first.
    pub fn join_room(&mut self, room: &str, choice: SideChoice) -> bool {
        if self.remote.is_busy() {
            warn!(room, current = ?self.remote.room(), "join refused; already connected");
            return false;
        }
        self.cancel_opponent();
        self.driver.set_kind(None);
        self.puzzle.clear();
        self.review = None;
        self.premoves.discard("mode change");
        self.promotion = None;
        self.mode = GameMode::Online;
        self.set_phase(Phase::Idle);
        let side = match choice {
            SideChoice::White => PlayerSide::White,
            SideChoice::Black => PlayerSide::Black,
            SideChoice::Random => PlayerSide::Unresolved,
        };
        self.set_side(side);
        if self.remote.set_room(room.to_string()) {
            self.maybe_connect();
        }
        true
    }

    /// Remember a new access token. An open connection is left alone.
    pub fn set_token(&mut self, token: Option<String>) {
        self.remote.set_token(token);
        self.maybe_connect();
    }

    /// Back to `idle` with an empty board.
    pub fn reset(&mut self) {
        self.close_connection();
        self.cancel_opponent();
        self.driver.set_kind(None);
        self.puzzle.clear();
        self.review = None;
        self.premoves.discard("reset");
        self.promotion = None;
        self.timeline.reset();
        self.mode = GameMode::Analysis;
        self.set_side(PlayerSide::Unresolved);
        self.set_phase(Phase::Idle);
    }

    /// Give up the current online game.
    pub fn forfeit(&mut self) {
        if let Some(room) = self.remote.room().map(str::to_string) {
            info!(room = %room, "forfeiting");
            self.effects.push(Effect::PassGame { room });
        }
        self.close_connection();
        self.end_online();
    }

    /// Owner is going away: stop timers and close the socket.
    pub fn teardown(&mut self) {
        self.cancel_opponent();
        self.close_connection();
    }

    fn begin_local(&mut self, mode: GameMode, driver: Option<DriverKind>) {
        self.close_connection();
        self.cancel_opponent();
        self.premoves.discard("new game");
        self.promotion = None;
        self.puzzle.clear();
        self.review = None;
        self.mode = mode;
        self.driver.set_kind(driver);
    }

    fn resolve_choice(&mut self, choice: SideChoice) -> PlayerSide {
        match choice {
            SideChoice::White => PlayerSide::White,
            SideChoice::Black => PlayerSide::Black,
            SideChoice::Random => {
                if self.rng.gen_bool(0.5) {
                    PlayerSide::White
                } else {
                    PlayerSide::Black
                }
            }
        }
    }

    // ---- Player input ----

    /// A move made on the board by the player.
    pub fn player_move(&mut self, candidate: Candidate) -> Result<MoveOutcome, CommitError> {
        if self.promotion.is_some() {
            return Err(CommitError::PromotionPending);
        }
        if self.phase != Phase::Playing {
            return Err(CommitError::NotPlaying);
        }
        if self.puzzle.is_locked() {
            return Err(CommitError::Locked);
        }

        if !self.is_player_turn() {
            return self.try_stage_premove(candidate);
        }

        if !self.timeline.at_tip() {
            self.navigate(self.timeline.len())?;
        }

        if candidate.promotion.is_none()
            && self
                .timeline
                .rules()
                .requires_promotion(self.timeline.position(), candidate.from, candidate.to)
        {
            self.await_promotion(candidate.from, candidate.to, MoveSource::Player);
            return Ok(MoveOutcome::AwaitingPromotion {
                from: candidate.from,
                to: candidate.to,
            });
        }

        self.commit_player(candidate, MoveSource::Player)
            .map(MoveOutcome::Committed)
    }

    /// Finish a move waiting for its promotion piece.
    pub fn choose_promotion(&mut self, role: Role) -> Result<MoveOutcome, CommitError> {
        let Some(pending) = self.promotion.take() else {
            return Err(CommitError::NoPendingPromotion);
        };
        let candidate = Candidate::new(pending.from, pending.to).with_promotion(role);
        self.commit_player(candidate, pending.source)
            .map(MoveOutcome::Committed)
    }

    pub fn cancel_promotion(&mut self) -> bool {
        let cancelled = self.promotion.take().is_some();
        if cancelled {
            self.settle();
        }
        cancelled
    }

    pub fn cancel_premove(&mut self) -> bool {
        let dropped = self.premoves.discard("cancelled");
        if dropped {
            self.notify(SessionEvent::PremoveDiscarded);
        }
        dropped
    }

    fn try_stage_premove(&mut self, candidate: Candidate) -> Result<MoveOutcome, CommitError> {
        let plausible = match self.side.color() {
            Some(color) if self.timeline.at_tip() => {
                is_plausible_premove(self.timeline.position(), color, candidate.from, candidate.to)
            }
            _ => false,
        };
        if !plausible {
            let err = ChessError::IllegalMove {
                mv: candidate.uci(),
                fen: self.timeline.fen(),
            };
            self.notify(SessionEvent::MoveRejected {
                uci: candidate.uci(),
                checked_king: None,
            });
            return Err(CommitError::Illegal(err));
        }
        self.premoves.stage(Premove::from(candidate));
        self.notify(SessionEvent::PremoveStaged {
            from: candidate.from,
            to: candidate.to,
        });
        Ok(MoveOutcome::PremoveStaged)
    }

    fn await_promotion(&mut self, from: Square, to: Square, source: MoveSource) {
        self.promotion = Some(PendingPromotion { from, to, source });
        self.notify(SessionEvent::PromotionRequired { from, to });
    }

    fn commit_player(&mut self, candidate: Candidate, source: MoveSource) -> Result<AppliedMove, CommitError> {
        let applied = match self.timeline.commit(&candidate) {
            Ok(applied) => applied,
            Err(e) => {
                let checked_king = self.timeline.checked_king();
                debug!(uci = %candidate.uci(), error = %e, "player move rejected");
                self.notify(SessionEvent::MoveRejected {
                    uci: candidate.uci(),
                    checked_king,
                });
                return Err(e);
            }
        };
        self.announce(&applied, source);

        if self.mode == GameMode::Online {
            let sent: Candidate = Candidate {
                from: applied.from,
                to: applied.to,
                promotion: candidate.promotion,
            };
            if let Some(frame) = self.remote.move_frame(&sent) {
                self.effects.push(Effect::Send(frame));
            }
        } else {
            self.judge_puzzle_move(&applied);
        }

        self.settle();
        Ok(applied)
    }

    fn judge_puzzle_move(&mut self, applied: &AppliedMove) {
        let step = self.puzzle.solved_index();
        let ply = self.timeline.len();
        match self.puzzle.judge(&applied.uci, ply) {
            Verdict::Permissive => return,
            Verdict::Correct { finished } => {
                if finished {
                    info!(uci = %applied.uci, "puzzle solved");
                    self.notify(SessionEvent::PuzzleSolved);
                    self.set_phase(Phase::Finished);
                }
            }
            Verdict::Incorrect => {
                info!(uci = %applied.uci, ply, "puzzle move incorrect; board locked");
                self.cancel_opponent();
                self.notify(SessionEvent::PuzzleIncorrect { locked_at_ply: ply });
            }
        }
        if let Some(puzzle_id) = self.puzzle.puzzle().map(|p| p.id.clone()) {
            self.effects.push(Effect::VerifyPuzzleMove {
                puzzle_id: puzzle_id.clone(),
                uci: applied.uci.clone(),
                step,
            });
            self.effects.push(Effect::RequestPuzzleHint {
                puzzle_id,
                uci: applied.uci.clone(),
                step,
            });
        }
    }

    /// Clear the puzzle lock and take back the incorrect move.
    pub fn acknowledge_puzzle(&mut self) -> Result<bool, CommitError> {
        if !self.puzzle.acknowledge() {
            return Ok(false);
        }
        if let Some(entry) = self.timeline.retract_tip()? {
            debug!(san = %entry.san, "incorrect puzzle move taken back");
        }
        self.notify(SessionEvent::PuzzleUnlocked);
        self.settle();
        Ok(true)
    }

    // ---- Navigation ----

    pub fn navigate(&mut self, ply: usize) -> Result<usize, CommitError> {
        let cursor = self.timeline.navigate(ply)?;
        self.after_navigation();
        Ok(cursor)
    }

    pub fn undo(&mut self, n: usize) -> Result<usize, CommitError> {
        let moved = self.timeline.undo(n)?;
        self.after_navigation();
        Ok(moved)
    }

    pub fn redo(&mut self, n: usize) -> Result<usize, CommitError> {
        let moved = self.timeline.redo(n)?;
        self.after_navigation();
        Ok(moved)
    }

    fn after_navigation(&mut self) {
        if !self.timeline.at_tip() && self.premoves.discard("left tip") {
            self.notify(SessionEvent::PremoveDiscarded);
        }
        self.settle();
    }

    // ---- Opponent ----

    /// A scheduled opponent timer fired.
    pub fn on_opponent_timer(&mut self, token: TaskToken) {
        if !self.driver.fire(token) {
            debug!(generation = token.generation, ply = token.ply, "stale opponent timer ignored");
            return;
        }
        if token.ply != self.timeline.len() || !self.timeline.at_tip() || self.phase != Phase::Playing {
            debug!(ply = token.ply, "opponent timer for a superseded position");
            return;
        }

        match self.driver.kind() {
            Some(DriverKind::RandomBot) => {
                let legal = self.timeline.legal_moves(None);
                if let Some(candidate) = choose_random(&mut self.rng, &legal) {
                    if self.commit_opponent(candidate, MoveSource::Bot) {
                        self.settle();
                    }
                }
            }
            Some(DriverKind::PuzzleScript) => {
                let Some(candidate) = self.puzzle.expected_candidate() else {
                    return;
                };
                if self.commit_opponent(candidate, MoveSource::PuzzleScript) {
                    if self.puzzle.record_opponent_reply() {
                        info!("puzzle solved");
                        self.notify(SessionEvent::PuzzleSolved);
                        self.set_phase(Phase::Finished);
                    }
                    self.settle();
                }
            }
            None => {}
        }
    }

    fn commit_opponent(&mut self, candidate: Candidate, source: MoveSource) -> bool {
        match self.timeline.commit(&candidate) {
            Ok(applied) => {
                self.announce(&applied, source);
                true
            }
            Err(e) => {
                warn!(uci = %candidate.uci(), source = ?source, error = %e, "opponent move rejected");
                false
            }
        }
    }

    fn cancel_opponent(&mut self) {
        if self.driver.cancel().is_some() {
            self.effects.push(Effect::CancelOpponent);
        }
    }

    // ---- Remote ----

    /// The transport finished opening.
    pub fn on_connected(&mut self) {
        let Some(auth) = self.remote.on_open() else {
            return;
        };
        self.effects.push(Effect::Send(auth));
        self.notify(SessionEvent::Connection(ConnectionStatus::Open));
        if self.driver.set_active(false).is_some() {
            self.effects.push(Effect::CancelOpponent);
        }
        self.timeline.reset();
        self.set_phase(Phase::Playing);
        self.settle();
    }

    pub fn on_connection_error(&mut self, reason: &str) {
        warn!(reason, "connection error");
        self.remote.on_error();
        self.notify(SessionEvent::Connection(self.remote.status()));
    }

    pub fn on_connection_closed(&mut self) {
        let before = self.remote.status();
        self.remote.on_closed();
        if self.remote.status() != before {
            info!("connection closed");
            self.notify(SessionEvent::Connection(self.remote.status()));
        }
    }

    /// One inbound text frame.
    pub fn on_frame(&mut self, text: &str) {
        if !self.remote.is_open() {
            debug!("frame received while not open; ignored");
            return;
        }
        let frame = match ServerFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "unparseable frame ignored");
                return;
            }
        };

        match frame {
            ServerFrame::Move { from, to, promotion } => self.on_remote_move(&from, &to, promotion.as_deref()),
            ServerFrame::GameState { black } => {
                if self.side == PlayerSide::Unresolved {
                    let side = if black.as_deref() == Some(BOT_ID) {
                        PlayerSide::White
                    } else {
                        PlayerSide::Black
                    };
                    info!(side = ?side, "side resolved by server");
                    self.set_side(side);
                    self.settle();
                }
            }
            ServerFrame::GameOver { result } => {
                let winner = match result.winner.as_deref() {
                    Some("white") => Some(Color::White),
                    Some("black") => Some(Color::Black),
                    _ => None,
                };
                let outcome = match winner {
                    None => Outcome::Draw,
                    Some(w) if self.side.color() == Some(w) => Outcome::Win,
                    Some(_) => Outcome::Lose,
                };
                info!(outcome = ?outcome, "game over");
                self.notify(SessionEvent::GameOver { outcome });
                self.close_connection();
                self.end_online();
            }
            ServerFrame::Error { message } => {
                if message == JWT_EXPIRED {
                    info!("access token expired; requesting refresh");
                    self.effects.push(Effect::RefreshToken);
                } else {
                    warn!(message = %message, "server error");
                    self.notify(SessionEvent::ServerError(message));
                }
            }
            ServerFrame::Unknown => debug!("unknown frame type ignored"),
        }
    }

    fn on_remote_move(&mut self, from: &str, to: &str, promotion: Option<&str>) {
        let candidate = match Candidate::from_parts(from, to, promotion) {
            Ok(c) => c,
            Err(e) => {
                warn!(from, to, error = %e, "malformed remote move dropped");
                return;
            }
        };
        // Trusted, but still checked; a rejected move is dropped without resync.
        match self.timeline.commit(&candidate) {
            Ok(applied) => {
                self.announce(&applied, MoveSource::Remote);
                self.settle();
            }
            Err(e) => warn!(uci = %candidate.uci(), error = %e, "remote move rejected locally; dropped"),
        }
    }

    /// Result of a token refresh. The new token is stored only.
    pub fn on_token_refreshed(&mut self, token: Option<String>) {
        match token {
            Some(t) => self.remote.set_token(Some(t)),
            None => {
                warn!("token refresh returned no token");
                self.notify(SessionEvent::RequestFailed {
                    request: "refresh_token",
                    reason: "no token returned".to_string(),
                });
            }
        }
    }

    /// Authoritative puzzle verdict. Display state only.
    ///
    /// `puzzle_id` and `step` are the ones the request was sent with. A
    /// report for another puzzle, or for a step the current attempt has not
    /// reached, is stale and ignored.
    pub fn on_puzzle_verified(&mut self, puzzle_id: &str, step: usize, report: VerificationReport) {
        let current = self.puzzle.puzzle().map(|p| p.id.as_str());
        if current != Some(puzzle_id) || step > self.puzzle.solved_index() {
            debug!(puzzle_id, step, current = ?current, "stale puzzle verification ignored");
            return;
        }
        debug!(correct = report.correct, finished = report.finished, "puzzle verification received");
        let finished = report.finished;
        self.puzzle.apply_report(report.clone());
        self.notify(SessionEvent::PuzzleReport(report));
        if finished && self.phase == Phase::Playing {
            self.set_phase(Phase::Finished);
            self.settle();
        }
    }

    /// Assistant commentary arrived. Dropped when another puzzle is loaded.
    pub fn on_puzzle_hint(&mut self, puzzle_id: &str, text: String) {
        if self.puzzle.puzzle().map(|p| p.id.as_str()) != Some(puzzle_id) {
            debug!(puzzle_id, "hint for another puzzle ignored");
            return;
        }
        self.puzzle.set_hint(text.clone());
        self.notify(SessionEvent::PuzzleHint(text));
    }

    pub fn on_bots_listed(&mut self, bots: Vec<Bot>) {
        debug!(count = bots.len(), "bots listed");
        self.notify(SessionEvent::BotsListed(bots));
    }

    pub fn on_room_created(&mut self, code: &str, choice: SideChoice) {
        info!(room = code, "room created");
        self.notify(SessionEvent::RoomCreated { code: code.to_string() });
        if !self.join_room(code, choice) {
            self.on_request_failed("join_room", format!("room {code} created but a game is still connected"));
        }
    }

    pub fn on_request_failed(&mut self, request: &'static str, reason: String) {
        warn!(request, reason = %reason, "request failed");
        self.notify(SessionEvent::RequestFailed { request, reason });
    }

    fn maybe_connect(&mut self) {
        if self.mode == GameMode::Online && self.remote.begin_connect() {
            self.effects.push(Effect::Connect);
            self.notify(SessionEvent::Connection(ConnectionStatus::Connecting));
        }
    }

    fn close_connection(&mut self) {
        if self.remote.teardown() {
            self.effects.push(Effect::Close);
            self.notify(SessionEvent::Connection(ConnectionStatus::Closed));
        }
    }

    fn end_online(&mut self) {
        self.premoves.discard("game over");
        self.promotion = None;
        self.set_side(PlayerSide::Unresolved);
        self.set_phase(Phase::Idle);
    }

    // ---- Shared transitions ----

    fn set_phase(&mut self, phase: Phase) {
        if self.phase == phase {
            return;
        }
        debug!(from = ?self.phase, to = ?phase, "phase change");
        self.phase = phase;
        if phase != Phase::Playing {
            self.premoves.discard("phase change");
            self.promotion = None;
            self.cancel_opponent();
        }
        self.notify(SessionEvent::PhaseChanged(phase));
    }

    fn set_side(&mut self, side: PlayerSide) {
        if self.side != side {
            self.side = side;
            if side != PlayerSide::Unresolved {
                self.notify(SessionEvent::SideResolved(side));
            }
        }
    }

    fn announce(&mut self, applied: &AppliedMove, source: MoveSource) {
        self.notify(SessionEvent::MoveCommitted {
            source,
            san: applied.san.clone(),
            uci: applied.uci.clone(),
            flags: applied.flags,
            is_check: applied.is_check,
        });
    }

    fn notify(&mut self, event: SessionEvent) {
        self.effects.push(Effect::Notify(event));
    }

    /// Run the follow-ups of any state change: game end, premove resolution,
    /// and the opponent driver.
    fn settle(&mut self) {
        self.check_game_end();
        self.resolve_premove();
        self.drive_opponent();
    }

    fn check_game_end(&mut self) {
        // A locked puzzle tip is taken back on acknowledgement, never scored.
        if self.phase != Phase::Playing || !self.timeline.at_tip() || self.puzzle.is_locked() {
            return;
        }
        let status = self.timeline.status();
        if !status.is_over() {
            return;
        }
        if self.mode == GameMode::Online {
            self.notify(SessionEvent::StatusReported(status));
            return;
        }
        let outcome = match status.winner() {
            None => Outcome::Draw,
            Some(w) if self.side.color() == Some(w) => Outcome::Win,
            Some(_) => Outcome::Lose,
        };
        info!(status = ?status, outcome = ?outcome, "game finished");
        self.set_phase(Phase::Finished);
        self.notify(SessionEvent::GameFinished { status, outcome });
    }

    fn resolve_premove(&mut self) {
        if self.premoves.is_empty() || !self.timeline.at_tip() || !self.is_player_turn() {
            return;
        }
        let legal = self.timeline.legal_moves(None);
        match self.premoves.resolve(&legal) {
            Resolution::Idle => {}
            Resolution::Commit(candidate) => {
                // An illegal premove is dropped silently.
                let _ = self.commit_player(candidate, MoveSource::Premove);
            }
            Resolution::NeedsPromotion { from, to } => self.await_promotion(from, to, MoveSource::Premove),
            Resolution::Discarded => self.notify(SessionEvent::PremoveDiscarded),
        }
    }

    fn drive_opponent(&mut self) {
        let ctx = DriverContext {
            phase: self.phase,
            at_tip: self.timeline.at_tip(),
            ply: self.timeline.len(),
            turn: self.timeline.tip_turn(),
            player: self.side,
            blocked: self.puzzle.is_locked() || self.puzzle.is_finished() || self.promotion.is_some(),
        };
        match self.driver.on_state_change(&ctx) {
            DriverDecision::Nothing => {}
            DriverDecision::Cancelled(_) => self.effects.push(Effect::CancelOpponent),
            DriverDecision::Scheduled { token, delay } if delay.is_zero() => self.on_opponent_timer(token),
            DriverDecision::Scheduled { token, delay } => {
                self.effects.push(Effect::ScheduleOpponent { token, delay });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(uci: &str) -> Candidate {
        uci.parse().unwrap()
    }

    fn session() -> GameSession {
        GameSession::new(SessionConfig {
            seed: Some(42),
            ..SessionConfig::default()
        })
    }

    fn scheduled(effects: &[Effect]) -> Option<TaskToken> {
        effects.iter().rev().find_map(|e| match e {
            Effect::ScheduleOpponent { token, .. } => Some(*token),
            _ => None,
        })
    }

    fn events(effects: &[Effect]) -> Vec<SessionEvent> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(ev) => Some(ev.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_bot_replies_after_timer() {
        let mut s = session();
        s.start_game(SideChoice::White);
        s.drain_effects();

        s.player_move(mv("e2e4")).unwrap();
        let token = scheduled(&s.drain_effects()).expect("bot move scheduled");
        assert_eq!(token.ply, 1);

        s.on_opponent_timer(token);
        assert_eq!(s.timeline().len(), 2);
        assert!(s.is_player_turn());

        // A second firing of the same token does nothing.
        s.on_opponent_timer(token);
        assert_eq!(s.timeline().len(), 2);
    }

    #[test]
    fn test_playing_black_bot_moves_first() {
        let mut s = session();
        s.start_game(SideChoice::Black);
        let token = scheduled(&s.drain_effects()).expect("bot opens");
        s.on_opponent_timer(token);
        assert_eq!(s.timeline().len(), 1);
        assert_eq!(s.side(), PlayerSide::Black);
    }

    #[test]
    fn test_premove_applies_when_turn_returns() {
        let mut s = session();
        s.start_game(SideChoice::White);
        s.player_move(mv("e2e4")).unwrap();
        let token = scheduled(&s.drain_effects()).unwrap();

        assert_eq!(s.player_move(mv("g1f3")).unwrap(), MoveOutcome::PremoveStaged);
        s.on_opponent_timer(token);

        assert_eq!(s.timeline().len(), 3);
        assert_eq!(s.timeline().entries()[2].uci, "g1f3");
        assert!(s.staged_premove().is_none());
    }

    #[test]
    fn test_premove_discarded_when_leaving_tip() {
        let mut s = session();
        s.start_game(SideChoice::White);
        s.player_move(mv("e2e4")).unwrap();
        s.player_move(mv("d2d4")).unwrap();
        s.drain_effects();

        s.undo(1).unwrap();
        assert!(s.staged_premove().is_none());
        let effects = s.drain_effects();
        assert!(events(&effects).contains(&SessionEvent::PremoveDiscarded));
        assert!(effects.contains(&Effect::CancelOpponent));
    }

    #[test]
    fn test_implausible_premove_rejected() {
        let mut s = session();
        s.start_game(SideChoice::White);
        s.player_move(mv("e2e4")).unwrap();
        assert!(matches!(s.player_move(mv("b1b3")), Err(CommitError::Illegal(_))));
        assert!(s.staged_premove().is_none());
    }

    #[test]
    fn test_direct_promotion_waits_for_piece() {
        let mut s = session();
        s.start_analysis(Some("8/4P3/8/8/8/8/k7/4K3 w - - 0 1")).unwrap();
        let outcome = s.player_move(mv("e7e8")).unwrap();
        assert_eq!(
            outcome,
            MoveOutcome::AwaitingPromotion {
                from: Square::E7,
                to: Square::E8
            }
        );
        assert_eq!(s.player_move(mv("e1d1")), Err(CommitError::PromotionPending));
        match s.choose_promotion(Role::Knight).unwrap() {
            MoveOutcome::Committed(applied) => assert_eq!(applied.san, "e8=N"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.choose_promotion(Role::Queen), Err(CommitError::NoPendingPromotion));
    }

    #[test]
    fn test_rejected_move_reports_checked_king() {
        let mut s = session();
        s.start_analysis(None).unwrap();
        for m in ["e2e4", "f7f6", "d1h5"] {
            s.player_move(mv(m)).unwrap();
        }
        s.drain_effects();
        assert!(s.player_move(mv("a7a6")).is_err());
        assert!(events(&s.drain_effects()).contains(&SessionEvent::MoveRejected {
            uci: "a7a6".to_string(),
            checked_king: Some(Square::E8),
        }));
    }

    #[test]
    fn test_local_checkmate_finishes_game() {
        let mut s = session();
        s.start_analysis(None).unwrap();
        for m in ["f2f3", "e7e5", "g2g4", "d8h4"] {
            s.player_move(mv(m)).unwrap();
        }
        assert_eq!(s.phase(), Phase::Finished);
        let evs = events(&s.drain_effects());
        assert!(evs.iter().any(|e| matches!(
            e,
            SessionEvent::GameFinished {
                status: GameStatus::Checkmate { winner: Color::Black },
                ..
            }
        )));
        assert_eq!(s.player_move(mv("a2a3")), Err(CommitError::NotPlaying));
    }

    #[test]
    fn test_idle_session_rejects_moves() {
        let mut s = session();
        assert_eq!(s.player_move(mv("e2e4")), Err(CommitError::NotPlaying));
    }

    #[test]
    fn test_random_side_is_resolved_locally() {
        let mut s = session();
        s.start_game(SideChoice::Random);
        assert_ne!(s.side(), PlayerSide::Unresolved);
    }

    #[test]
    fn test_start_from_fen_defaults_to_side_to_move() {
        let mut s = session();
        s.start_from_fen("4k3/8/8/8/8/8/8/4K2R b K - 0 1", None).unwrap();
        assert_eq!(s.side(), PlayerSide::Black);
        assert!(s.is_player_turn());
        assert!(s.start_from_fen("garbage", None).is_err());
    }

    #[test]
    fn test_online_flow() {
        let mut s = session();
        s.join_room("ROOM", SideChoice::Random);
        assert!(s.drain_effects().iter().all(|e| *e != Effect::Connect));

        s.set_token(Some("tok".into()));
        assert!(s.drain_effects().contains(&Effect::Connect));

        s.on_connected();
        let effects = s.drain_effects();
        assert!(effects.contains(&Effect::Send(ClientFrame::Auth {
            token: "tok".into(),
            room: "ROOM".into()
        })));
        assert_eq!(s.phase(), Phase::Playing);

        s.on_frame(r#"{"type":"game_state","black":"BOT"}"#);
        assert_eq!(s.side(), PlayerSide::White);

        s.player_move(mv("e2e4")).unwrap();
        assert!(s.drain_effects().iter().any(|e| matches!(e, Effect::Send(ClientFrame::Move { from, .. }) if from == "e2")));

        s.on_frame(r#"{"type":"move","from":"e7","to":"e5","promotion":""}"#);
        assert_eq!(s.timeline().len(), 2);

        // Desynced move is dropped.
        s.on_frame(r#"{"type":"move","from":"e7","to":"e5"}"#);
        assert_eq!(s.timeline().len(), 2);
    }

    #[test]
    fn test_jwt_expired_requests_refresh_only() {
        let mut s = session();
        s.set_token(Some("tok".into()));
        s.join_room("ROOM", SideChoice::White);
        s.on_connected();
        s.drain_effects();

        s.on_frame(r#"{"type":"error","message":"jwt expired"}"#);
        assert_eq!(s.drain_effects(), vec![Effect::RefreshToken]);

        s.on_token_refreshed(Some("fresh".into()));
        assert!(s.drain_effects().is_empty());
        assert_eq!(s.remote().token(), Some("fresh"));
        assert_eq!(s.remote().status(), ConnectionStatus::Open);
    }

    #[test]
    fn test_forfeit_passes_game_and_closes() {
        let mut s = session();
        s.set_token(Some("tok".into()));
        s.join_room("ROOM", SideChoice::White);
        s.on_connected();
        s.drain_effects();

        s.forfeit();
        let effects = s.drain_effects();
        assert_eq!(effects[0], Effect::PassGame { room: "ROOM".into() });
        assert!(effects.contains(&Effect::Close));
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn test_created_room_refused_while_connected() {
        let mut s = session();
        s.set_token(Some("tok".into()));
        s.join_room("ROOM", SideChoice::White);
        s.on_connected();
        s.drain_effects();

        s.on_room_created("NEW1", SideChoice::Black);
        let evs = events(&s.drain_effects());
        assert!(evs.contains(&SessionEvent::RoomCreated { code: "NEW1".into() }));
        assert!(evs
            .iter()
            .any(|e| matches!(e, SessionEvent::RequestFailed { request: "join_room", .. })));
        assert_eq!(s.remote().room(), Some("ROOM"));
        assert_eq!(s.side(), PlayerSide::White);
    }

    #[test]
    fn test_join_allowed_again_after_close() {
        let mut s = session();
        s.set_token(Some("tok".into()));
        assert!(s.join_room("ROOM", SideChoice::White));
        s.on_connected();
        s.forfeit();
        s.drain_effects();

        assert!(s.join_room("NEXT", SideChoice::Black));
        assert_eq!(s.remote().room(), Some("NEXT"));
        assert!(s.drain_effects().contains(&Effect::Connect));
    }
}
