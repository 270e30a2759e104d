//! Error types for the conversation engine.

use thiserror::Error;

/// Broad classification used to decide how a failure is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected locally before any network call.
    Validation,
    /// Remote store unreachable, non-success status, or a broken stream.
    Connectivity,
    /// Local attachment could not be read or encoded.
    Attachment,
    /// Bad configuration or client construction.
    Config,
}

/// Errors that can occur in conversation operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Draft is blank and no attachment is present.
    #[error("Nothing to send: draft is empty and no attachment is attached")]
    EmptySubmission,

    /// An attachment is still being encoded.
    #[error("Attachment is still encoding")]
    AttachmentEncoding,

    /// Another send is still streaming.
    #[error("A send is already in flight")]
    SendInFlight,

    /// Operation needs both history loading and sending to be idle.
    #[error("Conversation is busy: {0}")]
    Busy(&'static str),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Remote store answered with a non-success status.
    #[error("Remote store returned status {0}")]
    HttpStatus(u16),

    /// The response stream broke off mid-way.
    #[error("Stream error: {0}")]
    Transport(String),

    /// A complete stream line was not a valid record.
    #[error("Malformed stream record: {0}")]
    MalformedRecord(String),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Attachment source could not be read.
    #[error("Attachment could not be read: {0}")]
    AttachmentRead(#[from] std::io::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP client configuration error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConversationError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptySubmission | Self::AttachmentEncoding | Self::SendInFlight | Self::Busy(_) => {
                ErrorKind::Validation
            }
            Self::HttpRequest(_)
            | Self::HttpStatus(_)
            | Self::Transport(_)
            | Self::MalformedRecord(_)
            | Self::JsonParse(_) => ErrorKind::Connectivity,
            Self::AttachmentRead(_) => ErrorKind::Attachment,
            Self::InvalidUrl(_) | Self::HttpClient(_) | Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the user can simply try again by hand.
    ///
    /// Nothing is retried automatically; this only informs the notice text.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connectivity)
    }
}

/// Convenience result alias for conversation operations.
pub type ConversationResult<T> = Result<T, ConversationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_kinds() {
        assert_eq!(ConversationError::EmptySubmission.kind(), ErrorKind::Validation);
        assert_eq!(ConversationError::AttachmentEncoding.kind(), ErrorKind::Validation);
        assert_eq!(ConversationError::SendInFlight.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_connectivity_kinds() {
        assert_eq!(ConversationError::HttpStatus(502).kind(), ErrorKind::Connectivity);
        let err = ConversationError::MalformedRecord("{oops".to_string());
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ConversationError::HttpStatus(401);
        assert!(err.to_string().contains("401"));
        let err = ConversationError::Transport("reset by peer".to_string());
        assert!(err.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_io_error_is_attachment() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.png");
        let err: ConversationError = io.into();
        assert_eq!(err.kind(), ErrorKind::Attachment);
        assert!(!err.is_retryable());
    }
}
