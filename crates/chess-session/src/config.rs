use std::env;
use std::time::Duration;

use crate::error::SessionError;

/// Engine-level knobs handed to a `GameSession`.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Delay before the random bot answers.
    pub bot_delay: Duration,
    /// Delay before a scripted puzzle reply; zero plays it immediately.
    pub puzzle_reply_delay: Duration,
    /// Seed for the bot and random side choice. `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bot_delay: Duration::from_millis(1500),
            puzzle_reply_delay: Duration::ZERO,
            seed: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub ws_url: String,
    pub access_token: Option<String>,
    /// `name=value` cookie sent with token refresh requests.
    pub refresh_cookie: Option<String>,
    pub http_timeout: Duration,
    pub session: SessionConfig,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, SessionError> {
        let api_base_url = env::var("API_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:4000".to_string())
            .trim_end_matches('/')
            .to_string();
        let ws_url = env::var("WS_URL").unwrap_or_else(|_| "ws://localhost:4000/ws".to_string());

        if !(ws_url.starts_with("ws://") || ws_url.starts_with("wss://")) {
            return Err(SessionError::Config("WS_URL must use ws:// or wss://"));
        }

        Ok(Self {
            api_base_url,
            ws_url,
            access_token: env::var("ACCESS_TOKEN").ok().filter(|t| !t.trim().is_empty()),
            refresh_cookie: env::var("REFRESH_COOKIE").ok().filter(|c| !c.trim().is_empty()),
            http_timeout: Duration::from_secs(
                env::var("HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            session: SessionConfig {
                bot_delay: Duration::from_millis(
                    env::var("BOT_DELAY_MS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(1500),
                ),
                puzzle_reply_delay: Duration::from_millis(
                    env::var("PUZZLE_REPLY_DELAY_MS")
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                ),
                seed: env::var("BOT_SEED").ok().and_then(|v| v.parse().ok()),
            },
        })
    }
}
