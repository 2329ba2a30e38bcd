use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("Unknown frame type: {0}")]
    UnknownFrame(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Cannot derive a push endpoint from a {0} URL")]
    UnsupportedScheme(String),

    #[error("No bearer token available")]
    Unauthenticated,

    #[error("Notification hub has stopped")]
    HubStopped,
}

pub type Result<T> = std::result::Result<T, NotifyError>;
