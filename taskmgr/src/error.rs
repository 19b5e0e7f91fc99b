//! Error taxonomy shared across the bridge, decoders, identity cache and kill workflow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("session is not bound")]
    NotBound,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("privileged source closed the session")]
    Closed,
    #[error("unexpected reply frame: {0}")]
    UnexpectedFrame(String),
    #[error("request abandoned before the reply arrived")]
    Abandoned,
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => BridgeError::Closed,
            other => BridgeError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot payload is not a json object")]
    NotAnObject,
    #[error("empty payload")]
    Empty,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no application registered for {0}")]
    NotFound(String),
    #[error("lookup failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KillError {
    #[error("a kill review is already pending")]
    ReviewPending,
    #[error("a candidate scan is already running")]
    ScanInProgress,
    #[error("privileged source unavailable")]
    Unavailable,
    #[error("no kill review is pending")]
    NoReview,
    #[error("kill scan was cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid bridge url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
