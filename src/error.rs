use thiserror::Error;

use crate::session::SessionId;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("message is empty")]
    InvalidInput,

    #[error("session {0} already has an exchange in flight")]
    Busy(SessionId),

    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("stream closed before the reply completed")]
    Incomplete,

    #[error("exchange cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// True for failures that happened on the wire, where resubmitting may help.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::Incomplete
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {err}"))
        } else if err.is_connect() {
            Self::Transport(format!("cannot connect to server: {err}"))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
