/// Failures while opening or reading a chat stream.
///
/// These never escape a `StreamSession`: the session converts them into a
/// terminal `ChatEvent::Error` carrying `user_message()`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Backend answered with a non-success HTTP status.
    #[error("Server error {status}: {}", display_body(.body))]
    Status { status: u16, body: String },
    /// Request never produced a response (DNS, refused connection, TLS).
    #[error("connect failed: {message}")]
    Connect { message: String },
    /// Response body failed mid-stream (connection reset, truncated chunk).
    #[error("stream read failed: {message}")]
    Read { message: String },
}

impl StreamError {
    /// Creates a non-success status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// Creates a connection-level error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Creates a body read error.
    pub fn read(message: impl Into<String>) -> Self {
        Self::Read {
            message: message.into(),
        }
    }

    /// Human-readable text shown in place of the assistant reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { .. } => self.to_string(),
            Self::Connect { message } => fallback(message, "Connection failed"),
            Self::Read { message } => fallback(message, "Stream failed"),
        }
    }
}

fn display_body(body: &str) -> &str {
    if body.trim().is_empty() {
        "Unknown"
    } else {
        body
    }
}

fn fallback(message: &str, default: &str) -> String {
    if message.trim().is_empty() {
        default.to_string()
    } else {
        message.to_string()
    }
}

/// Top-level error type for the public client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Rejected draft, request or option value.
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport failure surfaced outside a running session.
    #[error(transparent)]
    Transport(#[from] StreamError),
}
