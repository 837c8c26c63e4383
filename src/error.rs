//! Error taxonomy shared by the media and weather monitors.

use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },
    #[error("Transport is not open")]
    NotOpen,
    #[error("No API key supplied")]
    MissingApiKey,
    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl MonitorError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        MonitorError::Protocol(msg.into())
    }
}
