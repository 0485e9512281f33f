//! Push-stream variant of entity synchronization.
//!
//! Some exchanges push order state over a websocket instead of being
//! polled. The "cursor" here is the server-side session (listen key) the
//! socket is bound to; it is refreshed on a timer and replaced on every
//! reconnect.

mod connection;
mod report;
mod session;

pub use connection::{OrderStream, OrderTranslator};
pub use report::ExecutionReportTranslator;
pub use session::{ListenKeySession, SessionProvider};

use thiserror::Error;

use crate::error::PluginError;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream already running")]
    AlreadyRunning,

    #[error("stream was stopped")]
    Stopped,

    #[error("session error: {0}")]
    Session(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StreamError {
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::AlreadyRunning => "STREAM_ALREADY_RUNNING",
            StreamError::Stopped => "STREAM_STOPPED",
            StreamError::Session(_) => "STREAM_SESSION_ERROR",
            StreamError::WebSocket(_) => "STREAM_WEBSOCKET_ERROR",
            StreamError::Http(_) => "STREAM_HTTP_ERROR",
        }
    }
}

impl From<StreamError> for PluginError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Http(e) => e.into(),
            StreamError::AlreadyRunning | StreamError::Stopped => {
                PluginError::InvalidRequest(err.to_string())
            }
            other => PluginError::upstream(other.to_string()),
        }
    }
}
