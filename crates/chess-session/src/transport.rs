//! Socket seam. The runtime only ever speaks text frames.

use async_trait::async_trait;

use crate::error::SessionError;

#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), SessionError>;

    /// Next inbound text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<Result<String, SessionError>>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, SessionError>;
}
