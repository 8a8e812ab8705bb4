//! REST collaborators: rooms, bots, game analysis, puzzles, forfeits and
//! token refresh.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::puzzle::{Puzzle, VerificationReport};
use crate::review::GameAnalysis;
use crate::session::SideChoice;

const REFRESH_PATH: &str = "/auth/refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomMode {
    Pvp,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub mode: RoomMode,
    pub side: SideChoice,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub bot_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateRoomResponse {
    /// Room code, e.g. `W41H60`.
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PassGameResponse {
    #[serde(default)]
    pub success: bool,
}

/// A computer opponent offered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Bot {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotsResponse {
    #[serde(default)]
    bots: Vec<Bot>,
}

#[derive(Debug, Deserialize)]
struct AssistantResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    #[serde(default)]
    token: Option<String>,
}

#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_room(&self, req: &CreateRoomRequest) -> Result<CreateRoomResponse, SessionError>;

    /// A specific puzzle, or a random one when `id` is `None`.
    async fn fetch_puzzle(&self, id: Option<&str>) -> Result<Puzzle, SessionError>;

    async fn check_puzzle_move(&self, puzzle_id: &str, uci: &str, step: usize) -> Result<VerificationReport, SessionError>;

    async fn pass_game(&self, room: &str) -> Result<PassGameResponse, SessionError>;

    async fn fetch_bots(&self) -> Result<Vec<Bot>, SessionError>;

    /// Engine analysis of a finished game, by room code.
    async fn fetch_game_analysis(&self, code: &str) -> Result<GameAnalysis, SessionError>;

    /// Assistant commentary on a submitted puzzle move. `Ok(None)` when the
    /// assistant had nothing to say.
    async fn analyze_puzzle_move(&self, puzzle_id: &str, uci: &str, step: usize) -> Result<Option<String>, SessionError>;

    /// Ask for a new access token. `Ok(None)` when the server declined.
    async fn refresh_token(&self) -> Result<Option<String>, SessionError>;

    fn set_token(&self, token: Option<String>);
}

pub struct HttpApi {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
    /// Refresh cookie sent explicitly, for sessions started outside this
    /// process. Cookies the server sets are kept by the client's own store.
    refresh_cookie: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, SessionError> {
        let client = Client::builder()
            .user_agent("ChessClient/1.0")
            .timeout(timeout)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(token),
            refresh_cookie: None,
        })
    }

    /// Send `cookie` (a `name=value` pair) with every refresh request.
    pub fn with_refresh_cookie(mut self, cookie: Option<String>) -> Self {
        self.refresh_cookie = cookie.filter(|c| !c.trim().is_empty());
        self
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, SessionError> {
        Ok(Self::new(&config.api_base_url, config.http_timeout, config.access_token.clone())?
            .with_refresh_cookie(config.refresh_cookie.clone()))
    }

    pub fn token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store_token(&self, token: Option<String>) {
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, body: Option<&Value>, token: Option<&str>) -> RequestBuilder {
        let mut req = self.client.request(method, self.url(path));
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        req
    }

    /// Bearer-authenticated request. A 401 triggers one refresh and, if that
    /// yields a token, one retry.
    async fn authed(&self, method: Method, path: &str, body: Option<Value>) -> Result<Response, SessionError> {
        let token = self.token().ok_or(SessionError::Unauthorized)?;
        let resp = self
            .request(method.clone(), path, body.as_ref(), Some(&token))
            .send()
            .await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!(path, "401 from API; refreshing token");
        match self.refresh().await? {
            Some(fresh) => Ok(self.request(method, path, body.as_ref(), Some(&fresh)).send().await?),
            None => Err(SessionError::Unauthorized),
        }
    }

    fn refresh_request(&self) -> RequestBuilder {
        let req = self.request(Method::POST, REFRESH_PATH, None, None);
        match &self.refresh_cookie {
            Some(cookie) => req.header(COOKIE, cookie.as_str()),
            None => req,
        }
    }

    async fn refresh(&self) -> Result<Option<String>, SessionError> {
        let resp = self.refresh_request().send().await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "token refresh rejected");
            return Ok(None);
        }
        let parsed: RefreshResponse = read_json(resp).await?;
        let token = parsed.data.and_then(|d| d.token).filter(|t| !t.is_empty());
        self.store_token(token.clone());
        info!(refreshed = token.is_some(), "access token refresh finished");
        Ok(token)
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, SessionError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(SessionError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let text = resp.text().await?;
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl SessionApi for HttpApi {
    async fn create_room(&self, req: &CreateRoomRequest) -> Result<CreateRoomResponse, SessionError> {
        let body = serde_json::to_value(req)?;
        let resp = self.authed(Method::POST, "/rooms/create", Some(body)).await?;
        read_json(resp).await
    }

    async fn fetch_puzzle(&self, id: Option<&str>) -> Result<Puzzle, SessionError> {
        let path = match id {
            Some(id) => format!("/puzzles/{id}"),
            None => "/puzzle/random".to_string(),
        };
        let resp = self.request(Method::GET, &path, None, None).send().await?;
        read_json(resp).await
    }

    async fn check_puzzle_move(&self, puzzle_id: &str, uci: &str, step: usize) -> Result<VerificationReport, SessionError> {
        let body = json!({ "move": uci, "step": step });
        let token = self.token();
        let resp = self
            .request(Method::POST, &format!("/puzzles/{puzzle_id}/move"), Some(&body), token.as_deref())
            .send()
            .await?;
        read_json(resp).await
    }

    async fn pass_game(&self, room: &str) -> Result<PassGameResponse, SessionError> {
        let resp = self
            .authed(Method::POST, "/games/pass", Some(json!({ "code": room })))
            .await?;
        read_json(resp).await
    }

    async fn fetch_bots(&self) -> Result<Vec<Bot>, SessionError> {
        let resp = self.request(Method::GET, "/rooms/bots", None, None).send().await?;
        let parsed: BotsResponse = read_json(resp).await?;
        Ok(parsed.bots)
    }

    async fn fetch_game_analysis(&self, code: &str) -> Result<GameAnalysis, SessionError> {
        let token = self.token();
        let resp = self
            .request(Method::GET, &format!("/rooms/analyze/{code}"), None, token.as_deref())
            .send()
            .await?;
        read_json(resp).await
    }

    async fn analyze_puzzle_move(&self, puzzle_id: &str, uci: &str, step: usize) -> Result<Option<String>, SessionError> {
        let body = json!({ "move": uci, "step": step, "isGreeting": false });
        let token = self.token();
        let resp = self
            .request(Method::POST, &format!("/puzzles/{puzzle_id}/analyze"), Some(&body), token.as_deref())
            .send()
            .await?;
        let parsed: AssistantResponse = read_json(resp).await?;
        Ok(parsed.text.filter(|t| !t.trim().is_empty()))
    }

    async fn refresh_token(&self) -> Result<Option<String>, SessionError> {
        self.refresh().await
    }

    fn set_token(&self, token: Option<String>) {
        self.store_token(token);
    }
}
