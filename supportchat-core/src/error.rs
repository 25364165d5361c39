use thiserror::Error;

/// Notice shown to the person chatting whenever the assistant cannot be reached.
pub const UNREACHABLE_NOTICE: &str = "Could not reach the assistant, please try again.";

/// Core error type for supportchat.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("an exchange is already in flight")]
    Busy,

    #[error("assistant endpoint unreachable: {endpoint}")]
    Unreachable { endpoint: String },

    #[error("rate limited by {endpoint}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<u64>,
    },

    #[error("upstream error from {endpoint}: {code} {message}")]
    UpstreamStatus {
        endpoint: String,
        code: u16,
        message: String,
    },

    #[error("response from {endpoint} had no readable body")]
    MissingBody { endpoint: String },

    #[error("stream interrupted after {received} bytes")]
    StreamInterrupted { received: usize },

    #[error("exchange cancelled")]
    Cancelled,

    #[error("history store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// True for every failure that means "the assistant did not answer":
    /// refused connections, non-2xx statuses, empty bodies and broken streams.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::RateLimited { .. }
                | Self::UpstreamStatus { .. }
                | Self::MissingBody { .. }
                | Self::StreamInterrupted { .. }
        )
    }

    /// The text to surface to the end user, if any. Transport detail never leaks.
    pub fn user_message(&self) -> Option<&'static str> {
        match self {
            Self::Busy => Some("Please wait for the current reply to finish."),
            Self::Validation(_) | Self::Cancelled | Self::Store(_) => None,
            Self::Unreachable { .. }
            | Self::RateLimited { .. }
            | Self::UpstreamStatus { .. }
            | Self::MissingBody { .. }
            | Self::StreamInterrupted { .. }
            | Self::Io(_)
            | Self::Other(_) => Some(UNREACHABLE_NOTICE),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, ChatError>;
