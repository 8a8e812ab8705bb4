pub mod api;
pub mod config;
pub mod error;
pub mod opponent;
pub mod premove;
pub mod protocol;
pub mod puzzle;
pub mod remote;
pub mod review;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod timeline;
pub mod transport;

pub use api::{Bot, CreateRoomRequest, CreateRoomResponse, HttpApi, PassGameResponse, RoomMode, SessionApi};
pub use config::{ClientConfig, SessionConfig};
pub use error::{CommitError, SessionError};
pub use puzzle::{Puzzle, VerificationReport};
pub use remote::ConnectionStatus;
pub use review::{GameAnalysis, MoveAnalysis, ReviewSheet, Severity, SeverityCounts};
pub use runtime::{Command, SessionRuntime, SessionSnapshot, Update};
pub use session::{Effect, GameMode, GameSession, MoveOutcome, MoveSource, Outcome, Phase, PlayerSide, SessionEvent, SideChoice};
pub use timeline::{TimelineEntry, TimelineStore};
pub use transport::{Connector, Transport};
