//! Upstream event feed abstraction.

use std::pin::Pin;

use async_trait::async_trait;
use dockward_events::{EventEnvelope, EventError};
use futures_core::Stream;
use thiserror::Error;

/// Failures of the upstream feed. All of them are recovered by reconnecting.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to connect to event feed: {0}")]
    Connect(String),

    #[error("event feed rejected the request with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("event feed read failed: {0}")]
    Read(String),

    #[error("undecodable event: {0}")]
    Decode(#[from] EventError),
}

/// A live, possibly endless feed. Ends (or yields an error) on disconnect.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope, UpstreamError>> + Send>>;

/// Something the hub can open an event feed on.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a fresh feed. Called again after every disconnect.
    async fn open(&self) -> Result<EventStream, UpstreamError>;
}
