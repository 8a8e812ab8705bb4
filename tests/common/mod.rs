#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chess_core::Candidate;
use chess_session::{
    Bot, Connector, CreateRoomRequest, CreateRoomResponse, Effect, GameAnalysis, GameSession, PassGameResponse, Puzzle,
    SessionApi, SessionConfig, SessionError, SessionEvent, Transport, Update, VerificationReport,
};
use tokio::sync::mpsc;

pub const WS_URL: &str = "ws://test.invalid/ws";

/// Session with a fixed seed and the default delays.
pub fn session() -> GameSession {
    GameSession::new(SessionConfig {
        seed: Some(7),
        ..SessionConfig::default()
    })
}

pub fn mv(uci: &str) -> Candidate {
    uci.parse().unwrap()
}

pub fn puzzle(id: &str, fen: &str, moves: &[&str]) -> Puzzle {
    Puzzle {
        id: id.to_string(),
        fen: fen.to_string(),
        moves: moves.iter().map(|m| m.to_string()).collect(),
        rating: Some(1500),
        themes: vec![],
    }
}

/// Notifications among a batch of drained effects.
pub fn events(effects: &[Effect]) -> Vec<SessionEvent> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Notify(ev) => Some(ev.clone()),
            _ => None,
        })
        .collect()
}

// ---- Scripted socket ----

/// What the client did on the mock socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wire {
    Sent(String),
    Closed,
}

/// Handles held by a test: push server frames in, observe client traffic.
pub struct MockServer {
    pub frames: mpsc::UnboundedSender<String>,
    pub wire: mpsc::UnboundedReceiver<Wire>,
}

impl MockServer {
    pub fn push(&self, frame: serde_json::Value) {
        self.frames.send(frame.to_string()).unwrap();
    }

    pub async fn next_wire(&mut self) -> Wire {
        tokio::time::timeout(Duration::from_secs(30), self.wire.recv())
            .await
            .expect("timed out waiting for socket traffic")
            .expect("mock socket dropped")
    }

    /// Next frame the client sent, parsed.
    pub async fn next_sent(&mut self) -> serde_json::Value {
        match self.next_wire().await {
            Wire::Sent(text) => serde_json::from_str(&text).unwrap(),
            Wire::Closed => panic!("socket closed while a frame was expected"),
        }
    }
}

/// Hands out one scripted transport.
pub struct MockConnector {
    inbound: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    wire: mpsc::UnboundedSender<Wire>,
    pub urls: Mutex<Vec<String>>,
}

pub fn mock_socket() -> (Arc<MockConnector>, MockServer) {
    let (frames, inbound) = mpsc::unbounded_channel();
    let (wire_tx, wire) = mpsc::unbounded_channel();
    let connector = Arc::new(MockConnector {
        inbound: Mutex::new(Some(inbound)),
        wire: wire_tx,
        urls: Mutex::new(Vec::new()),
    });
    (connector, MockServer { frames, wire })
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SessionError> {
        self.urls.lock().unwrap().push(url.to_string());
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SessionError::Transport("mock socket already used".into()))?;
        Ok(Box::new(MockTransport {
            inbound,
            wire: self.wire.clone(),
        }))
    }
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<String>,
    wire: mpsc::UnboundedSender<Wire>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), SessionError> {
        self.wire
            .send(Wire::Sent(text))
            .map_err(|_| SessionError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let _ = self.wire.send(Wire::Closed);
        Ok(())
    }
}

// ---- REST fake ----

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    CreateRoom,
    FetchPuzzle(Option<String>),
    CheckMove { puzzle_id: String, uci: String, step: usize },
    PassGame(String),
    Bots,
    Analysis(String),
    Assistant { puzzle_id: String, uci: String, step: usize },
    Refresh,
    SetToken(Option<String>),
}

pub struct FakeApi {
    pub calls: Mutex<Vec<ApiCall>>,
    pub puzzle: Puzzle,
    pub report: VerificationReport,
    pub room_code: String,
    /// Served for the room code `analysis_code`; other codes are 404.
    pub analysis: GameAnalysis,
    pub analysis_code: String,
}

impl FakeApi {
    pub fn new(puzzle: Puzzle) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            puzzle,
            report: VerificationReport {
                correct: true,
                finished: false,
                new_rating: Some(1512),
                rating_change: Some(12),
            },
            room_code: "W41H60".to_string(),
            analysis: serde_json::from_value(serde_json::json!({
                "game": {"white": "alice", "black": "bot"},
                "analyses": [
                    {"move": "e2e4", "severity": "great", "llmShort": "Central pawn."},
                    {"move": "e5", "severity": "inaccuracy"},
                    {"move": "g1f3", "severity": "brilliant"},
                    {"move": "Zz9", "severity": "blunder"}
                ]
            }))
            .unwrap(),
            analysis_code: "AN4LYZ".to_string(),
        })
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SessionApi for FakeApi {
    async fn create_room(&self, _req: &CreateRoomRequest) -> Result<CreateRoomResponse, SessionError> {
        self.record(ApiCall::CreateRoom);
        Ok(CreateRoomResponse {
            code: self.room_code.clone(),
        })
    }

    async fn fetch_puzzle(&self, id: Option<&str>) -> Result<Puzzle, SessionError> {
        self.record(ApiCall::FetchPuzzle(id.map(str::to_string)));
        match id {
            Some(id) if id != self.puzzle.id => Err(SessionError::Api {
                status: 404,
                body: "not found".into(),
            }),
            _ => Ok(self.puzzle.clone()),
        }
    }

    async fn check_puzzle_move(&self, puzzle_id: &str, uci: &str, step: usize) -> Result<VerificationReport, SessionError> {
        self.record(ApiCall::CheckMove {
            puzzle_id: puzzle_id.to_string(),
            uci: uci.to_string(),
            step,
        });
        Ok(self.report.clone())
    }

    async fn pass_game(&self, room: &str) -> Result<PassGameResponse, SessionError> {
        self.record(ApiCall::PassGame(room.to_string()));
        Ok(PassGameResponse { success: true })
    }

    async fn fetch_bots(&self) -> Result<Vec<Bot>, SessionError> {
        self.record(ApiCall::Bots);
        Ok(vec![
            Bot {
                id: 1,
                name: "Pawnstorm".into(),
                avatar: None,
            },
            Bot {
                id: 2,
                name: "Rookie".into(),
                avatar: Some("/bots/rookie.png".into()),
            },
        ])
    }

    async fn fetch_game_analysis(&self, code: &str) -> Result<GameAnalysis, SessionError> {
        self.record(ApiCall::Analysis(code.to_string()));
        if code == self.analysis_code {
            Ok(self.analysis.clone())
        } else {
            Err(SessionError::Api {
                status: 404,
                body: "no analysis".into(),
            })
        }
    }

    async fn analyze_puzzle_move(&self, puzzle_id: &str, uci: &str, step: usize) -> Result<Option<String>, SessionError> {
        self.record(ApiCall::Assistant {
            puzzle_id: puzzle_id.to_string(),
            uci: uci.to_string(),
            step,
        });
        Ok(Some(format!("{uci} looks natural here.")))
    }

    async fn refresh_token(&self) -> Result<Option<String>, SessionError> {
        self.record(ApiCall::Refresh);
        Ok(Some("fresh-token".to_string()))
    }

    fn set_token(&self, token: Option<String>) {
        self.record(ApiCall::SetToken(token));
    }
}

/// Wait for the first update that satisfies `pred`.
pub async fn wait_for<F>(updates: &mut mpsc::UnboundedReceiver<Update>, mut pred: F) -> Update
where
    F: FnMut(&Update) -> bool,
{
    loop {
        let update = tokio::time::timeout(Duration::from_secs(30), updates.recv())
            .await
            .expect("timed out waiting for an update")
            .expect("runtime stopped");
        if pred(&update) {
            return update;
        }
    }
}

/// Let spawned request tasks run until `call` shows up on the fake.
pub async fn wait_for_call(api: &FakeApi, call: &ApiCall) -> bool {
    for _ in 0..100 {
        if api.calls().contains(call) {
            return true;
        }
        tokio::task::yield_now().await;
    }
    false
}
