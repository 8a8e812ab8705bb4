//! Async shell around [`GameSession`].
//!
//! One task owns the session and processes one event at a time: a host
//! command, a fired timer, a socket frame, or a finished REST call. After
//! each event the queued effects are executed and an [`Update`] is published.

use std::sync::Arc;

use chess_core::{format_movetext_for, Candidate, GameStatus};
use shakmaty::{Color, Role, Square};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Bot, CreateRoomRequest, SessionApi};
use crate::error::SessionError;
use crate::puzzle::{Puzzle, VerificationReport};
use crate::remote::ConnectionStatus;
use crate::review::{GameAnalysis, Severity, SeverityCounts};
use crate::scheduler::TaskToken;
use crate::session::{Effect, GameMode, GameSession, Phase, PlayerSide, SessionEvent, SideChoice};
use crate::transport::Connector;

/// Host requests.
#[derive(Debug, Clone)]
pub enum Command {
    StartGame(SideChoice),
    StartFromFen { fen: String, side: Option<Color> },
    StartAnalysis { fen: Option<String> },
    LoadReview { fen: Option<String>, sans: Vec<String> },
    /// Fetch the analysis of a finished game and review it.
    LoadAnalysis { code: String },
    ListBots,
    /// Fetch and start a puzzle; a random one when `id` is `None`.
    LoadPuzzle { id: Option<String> },
    Move(Candidate),
    Promote(Role),
    CancelPromotion,
    CancelPremove,
    Navigate(usize),
    Undo(usize),
    Redo(usize),
    AcknowledgePuzzle,
    JoinRoom { room: String, side: SideChoice },
    CreateRoom(CreateRoomRequest),
    SetToken(String),
    Forfeit,
    Reset,
    Shutdown,
}

/// Everything a host needs to draw the current state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub fen: String,
    pub cursor: usize,
    pub len: usize,
    pub movetext: String,
    pub last_move: Option<(Square, Square)>,
    pub checked_king: Option<Square>,
    pub status: GameStatus,
    pub phase: Phase,
    pub side: PlayerSide,
    pub mode: GameMode,
    pub connection: ConnectionStatus,
    pub premove: Option<(Square, Square)>,
    pub pending_promotion: Option<(Square, Square)>,
    pub puzzle_locked: bool,
    /// Solved moves and solution length.
    pub puzzle_progress: Option<(usize, usize)>,
    pub rating: Option<i32>,
    pub rating_change: Option<i32>,
    pub puzzle_hint: Option<String>,
    /// Quality mark of each reviewed ply, when a game analysis is loaded.
    pub review_marks: Option<Vec<Option<Severity>>>,
    pub review_counts: Option<SeverityCounts>,
    /// Mark and comment for the move that led to the displayed position.
    pub current_mark: Option<Severity>,
    pub current_comment: Option<String>,
}

impl SessionSnapshot {
    pub fn capture(session: &GameSession) -> Self {
        let timeline = session.timeline();
        let puzzle = session.puzzle();
        let review = session.review();
        let reviewed = review.and_then(|r| r.entry_at(timeline.cursor()));
        Self {
            fen: timeline.fen(),
            cursor: timeline.cursor(),
            len: timeline.len(),
            movetext: format_movetext_for(timeline.initial_position(), &timeline.sans()),
            last_move: timeline.last_move_squares(),
            checked_king: timeline.checked_king(),
            status: timeline.status(),
            phase: session.phase(),
            side: session.side(),
            mode: session.mode(),
            connection: session.remote().status(),
            premove: session.staged_premove().map(|p| (p.from, p.to)),
            pending_promotion: session.pending_promotion(),
            puzzle_locked: puzzle.is_locked(),
            puzzle_progress: puzzle
                .is_loaded()
                .then(|| (puzzle.solved_index(), puzzle.solution_len())),
            rating: puzzle.rating(),
            rating_change: puzzle.rating_change(),
            puzzle_hint: puzzle.hint().map(str::to_string),
            review_marks: review.map(|r| r.marks()),
            review_counts: review.map(|r| r.counts()),
            current_mark: reviewed.and_then(|e| e.severity),
            current_comment: reviewed.and_then(|e| e.comment()).map(str::to_string),
        }
    }
}

/// Published after every processed event.
#[derive(Debug, Clone)]
pub struct Update {
    pub events: Vec<SessionEvent>,
    pub snapshot: SessionSnapshot,
    /// Why the command just processed was refused, if it was.
    pub error: Option<String>,
}

#[derive(Debug)]
enum LinkEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed,
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug)]
enum Internal {
    TimerFired(TaskToken),
    Link { id: u64, event: LinkEvent },
    Verified {
        puzzle_id: String,
        step: usize,
        report: VerificationReport,
    },
    Hint { puzzle_id: String, text: String },
    TokenRefreshed(Option<String>),
    PuzzleFetched(Puzzle),
    AnalysisFetched { code: String, analysis: GameAnalysis },
    BotsListed(Vec<Bot>),
    RoomCreated { code: String, side: SideChoice },
    RequestFailed { request: &'static str, reason: String },
}

pub struct SessionRuntime {
    session: GameSession,
    api: Arc<dyn SessionApi>,
    connector: Arc<dyn Connector>,
    ws_url: String,
    timer: Option<JoinHandle<()>>,
    link: Option<(u64, mpsc::UnboundedSender<Outbound>)>,
    next_link_id: u64,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: Option<mpsc::UnboundedReceiver<Internal>>,
    updates: mpsc::UnboundedSender<Update>,
}

impl SessionRuntime {
    /// Returns the runtime and the stream of updates it will publish.
    pub fn new(
        session: GameSession,
        api: Arc<dyn SessionApi>,
        connector: Arc<dyn Connector>,
        ws_url: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Update>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let runtime = Self {
            session,
            api,
            connector,
            ws_url: ws_url.into(),
            timer: None,
            link: None,
            next_link_id: 0,
            internal_tx,
            internal_rx: Some(internal_rx),
            updates,
        };
        (runtime, updates_rx)
    }

    pub fn session(&self) -> &GameSession {
        &self.session
    }

    /// Process events until `Shutdown` arrives or the command channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Result<(), SessionError> {
        let mut internal = self.internal_rx.take().ok_or(SessionError::Closed)?;
        info!(ws_url = %self.ws_url, "session runtime started");

        loop {
            let error = tokio::select! {
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(event) = internal.recv() => {
                    self.handle_internal(event);
                    None
                }
            };
            self.flush(error);
        }

        self.session.teardown();
        self.flush(None);
        self.abort_timer();
        info!("session runtime stopped");
        Ok(())
    }

    fn handle_command(&mut self, cmd: Command) -> Option<String> {
        debug!(command = ?cmd, "command");
        let result: Result<(), String> = match cmd {
            Command::StartGame(side) => {
                self.session.start_game(side);
                Ok(())
            }
            Command::StartFromFen { fen, side } => self.session.start_from_fen(&fen, side).map_err(|e| e.to_string()),
            Command::StartAnalysis { fen } => self.session.start_analysis(fen.as_deref()).map_err(|e| e.to_string()),
            Command::LoadReview { fen, sans } => self
                .session
                .load_review(fen.as_deref(), &sans)
                .map(|_| ())
                .map_err(|e| e.to_string()),
            Command::LoadAnalysis { code } => {
                self.spawn_fetch_analysis(code);
                Ok(())
            }
            Command::ListBots => {
                self.spawn_list_bots();
                Ok(())
            }
            Command::LoadPuzzle { id } => {
                self.spawn_fetch_puzzle(id);
                Ok(())
            }
            Command::Move(candidate) => self.session.player_move(candidate).map(|_| ()).map_err(|e| e.to_string()),
            Command::Promote(role) => self.session.choose_promotion(role).map(|_| ()).map_err(|e| e.to_string()),
            Command::CancelPromotion => {
                self.session.cancel_promotion();
                Ok(())
            }
            Command::CancelPremove => {
                self.session.cancel_premove();
                Ok(())
            }
            Command::Navigate(ply) => self.session.navigate(ply).map(|_| ()).map_err(|e| e.to_string()),
            Command::Undo(n) => self.session.undo(n).map(|_| ()).map_err(|e| e.to_string()),
            Command::Redo(n) => self.session.redo(n).map(|_| ()).map_err(|e| e.to_string()),
            Command::AcknowledgePuzzle => self.session.acknowledge_puzzle().map(|_| ()).map_err(|e| e.to_string()),
            Command::JoinRoom { room, side } => {
                if self.session.join_room(&room, side) {
                    Ok(())
                } else {
                    Err("already connected to a room; forfeit or reset first".to_string())
                }
            }
            Command::CreateRoom(req) => {
                self.spawn_create_room(req);
                Ok(())
            }
            Command::SetToken(token) => {
                self.api.set_token(Some(token.clone()));
                self.session.set_token(Some(token));
                Ok(())
            }
            Command::Forfeit => {
                self.session.forfeit();
                Ok(())
            }
            Command::Reset => {
                self.session.reset();
                Ok(())
            }
            Command::Shutdown => Ok(()),
        };
        result.err()
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::TimerFired(token) => {
                self.timer = None;
                self.session.on_opponent_timer(token);
            }
            Internal::Link { id, event } => {
                if self.link.as_ref().map(|(current, _)| *current) != Some(id) {
                    debug!(link = id, event = ?event, "event from a retired link ignored");
                    return;
                }
                match event {
                    LinkEvent::Opened => self.session.on_connected(),
                    LinkEvent::Frame(text) => self.session.on_frame(&text),
                    LinkEvent::Error(reason) => {
                        self.link = None;
                        self.session.on_connection_error(&reason);
                    }
                    LinkEvent::Closed => {
                        self.link = None;
                        self.session.on_connection_closed();
                    }
                }
            }
            Internal::Verified { puzzle_id, step, report } => {
                self.session.on_puzzle_verified(&puzzle_id, step, report)
            }
            Internal::Hint { puzzle_id, text } => self.session.on_puzzle_hint(&puzzle_id, text),
            Internal::TokenRefreshed(token) => self.session.on_token_refreshed(token),
            Internal::AnalysisFetched { code, analysis } => {
                if let Err(e) = self.session.load_game_analysis(&code, analysis) {
                    self.session
                        .on_request_failed("fetch_game_analysis", format!("analysis of {code} has a bad position: {e}"));
                }
            }
            Internal::BotsListed(bots) => self.session.on_bots_listed(bots),
            Internal::PuzzleFetched(puzzle) => {
                let id = puzzle.id.clone();
                if let Err(e) = self.session.load_puzzle(puzzle) {
                    self.session
                        .on_request_failed("fetch_puzzle", format!("puzzle {id} has a bad position: {e}"));
                }
            }
            Internal::RoomCreated { code, side } => self.session.on_room_created(&code, side),
            Internal::RequestFailed { request, reason } => self.session.on_request_failed(request, reason),
        }
    }

    fn flush(&mut self, error: Option<String>) {
        let mut events = Vec::new();
        for effect in self.session.drain_effects() {
            match effect {
                Effect::Notify(event) => events.push(event),
                other => self.execute(other),
            }
        }
        let update = Update {
            events,
            snapshot: SessionSnapshot::capture(&self.session),
            error,
        };
        if self.updates.send(update).is_err() {
            debug!("update receiver dropped");
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::Connect => self.open_link(),
            Effect::Send(frame) => match frame.to_json() {
                Ok(text) => match &self.link {
                    Some((_, tx)) => {
                        let _ = tx.send(Outbound::Text(text));
                    }
                    None => debug!("no link; frame dropped"),
                },
                Err(e) => warn!(error = %e, "failed to encode frame"),
            },
            Effect::Close => {
                if let Some((id, tx)) = self.link.take() {
                    debug!(link = id, "closing link");
                    let _ = tx.send(Outbound::Close);
                }
            }
            Effect::ScheduleOpponent { token, delay } => {
                self.abort_timer();
                let tx = self.internal_tx.clone();
                self.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Internal::TimerFired(token));
                }));
            }
            Effect::CancelOpponent => self.abort_timer(),
            Effect::VerifyPuzzleMove { puzzle_id, uci, step } => {
                // Fire-and-forget: survives teardown, failures only logged.
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    match api.check_puzzle_move(&puzzle_id, &uci, step).await {
                        Ok(report) => {
                            let _ = tx.send(Internal::Verified { puzzle_id, step, report });
                        }
                        Err(e) => warn!(puzzle_id = %puzzle_id, uci = %uci, error = %e, "puzzle verification failed"),
                    }
                });
            }
            Effect::RequestPuzzleHint { puzzle_id, uci, step } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    match api.analyze_puzzle_move(&puzzle_id, &uci, step).await {
                        Ok(Some(text)) => {
                            let _ = tx.send(Internal::Hint { puzzle_id, text });
                        }
                        Ok(None) => debug!(puzzle_id = %puzzle_id, "assistant had no comment"),
                        Err(e) => warn!(puzzle_id = %puzzle_id, uci = %uci, error = %e, "puzzle assistant failed"),
                    }
                });
            }
            Effect::RefreshToken => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let event = match api.refresh_token().await {
                        Ok(token) => Internal::TokenRefreshed(token),
                        Err(e) => Internal::RequestFailed {
                            request: "refresh_token",
                            reason: e.to_string(),
                        },
                    };
                    let _ = tx.send(event);
                });
            }
            Effect::PassGame { room } => {
                let api = Arc::clone(&self.api);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    match api.pass_game(&room).await {
                        Ok(resp) => info!(room = %room, success = resp.success, "game passed"),
                        Err(e) => {
                            let _ = tx.send(Internal::RequestFailed {
                                request: "pass_game",
                                reason: e.to_string(),
                            });
                        }
                    }
                });
            }
            Effect::Notify(_) => {}
        }
    }

    fn open_link(&mut self) {
        self.next_link_id += 1;
        let id = self.next_link_id;
        let (tx, rx) = mpsc::unbounded_channel();
        self.link = Some((id, tx));
        tokio::spawn(run_link(
            id,
            Arc::clone(&self.connector),
            self.ws_url.clone(),
            rx,
            self.internal_tx.clone(),
        ));
    }

    fn abort_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    fn spawn_fetch_puzzle(&self, id: Option<String>) {
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match api.fetch_puzzle(id.as_deref()).await {
                Ok(puzzle) => Internal::PuzzleFetched(puzzle),
                Err(e) => Internal::RequestFailed {
                    request: "fetch_puzzle",
                    reason: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }

    fn spawn_fetch_analysis(&self, code: String) {
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match api.fetch_game_analysis(&code).await {
                Ok(analysis) => Internal::AnalysisFetched { code, analysis },
                Err(e) => Internal::RequestFailed {
                    request: "fetch_game_analysis",
                    reason: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }

    fn spawn_list_bots(&self) {
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match api.fetch_bots().await {
                Ok(bots) => Internal::BotsListed(bots),
                Err(e) => Internal::RequestFailed {
                    request: "fetch_bots",
                    reason: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }

    fn spawn_create_room(&self, req: CreateRoomRequest) {
        let api = Arc::clone(&self.api);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let event = match api.create_room(&req).await {
                Ok(resp) => Internal::RoomCreated {
                    code: resp.code,
                    side: req.side,
                },
                Err(e) => Internal::RequestFailed {
                    request: "create_room",
                    reason: e.to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }
}

/// Owns one socket: connects, then pumps frames both ways until either side
/// closes.
async fn run_link(
    id: u64,
    connector: Arc<dyn Connector>,
    url: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<Internal>,
) {
    let emit = |event: LinkEvent| {
        let _ = events.send(Internal::Link { id, event });
    };

    let mut transport = match connector.connect(&url).await {
        Ok(t) => t,
        Err(e) => {
            emit(LinkEvent::Error(e.to_string()));
            return;
        }
    };
    emit(LinkEvent::Opened);

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = transport.send(text).await {
                        emit(LinkEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = transport.close().await {
                        debug!(link = id, error = %e, "close failed");
                    }
                    emit(LinkEvent::Closed);
                    break;
                }
            },
            incoming = transport.recv() => match incoming {
                Some(Ok(text)) => emit(LinkEvent::Frame(text)),
                Some(Err(e)) => {
                    emit(LinkEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    emit(LinkEvent::Closed);
                    break;
                }
            },
        }
    }
}
