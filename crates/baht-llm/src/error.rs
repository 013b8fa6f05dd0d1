use thiserror::Error;

/// Failure of a call to the vision model, classified so callers know whether
/// trying again can help.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("AI receipt reading is not configured")]
    NotConfigured,

    #[error("AI API rejected the credentials: {0}")]
    Auth(String),

    #[error("AI API quota exhausted: {0}")]
    Quota(String),

    #[error("AI API blocked the request: {0}")]
    Safety(String),

    #[error("AI API server error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("AI API returned status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error talking to AI API: {0}")]
    Transport(String),

    #[error("AI API returned no content")]
    EmptyResponse,

    #[error("could not understand AI response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Whether the same request may succeed if sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Server { .. } | LlmError::Transport(_) | LlmError::EmptyResponse
        )
    }

    /// Classify a non-success HTTP status and its body. A `RESOURCE_EXHAUSTED`
    /// body means quota whatever the status.
    pub fn from_status(status: u16, message: String) -> Self {
        if message.contains("RESOURCE_EXHAUSTED") {
            return LlmError::Quota(message);
        }
        match status {
            401 | 403 => LlmError::Auth(message),
            429 => LlmError::Quota(message),
            400 if message.contains("API key") => LlmError::Auth(message),
            500..=599 => LlmError::Server { status, message },
            _ => LlmError::Api { status, message },
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        LlmError::Transport(e.to_string())
    }
}
