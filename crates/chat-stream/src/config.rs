use std::time::Duration;

use crate::errors::ChatError;

/// Configuration for the HTTP chat backend.
#[derive(Clone, Debug)]
pub struct ChatClientConfig {
    /// Base URL of the chat API (for example `https://api.example.com`).
    pub base_url: String,
    /// Time allowed to establish the connection.
    ///
    /// Only the connect phase is bounded; an open stream may stay silent
    /// indefinitely until the caller cancels it.
    pub connect_timeout: Duration,
    /// Optional bearer token.
    pub bearer_token: Option<String>,
    /// Optional raw `Cookie` header carrying the user's session.
    pub cookie: Option<String>,
}

impl ChatClientConfig {
    /// Creates a config with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(30),
            bearer_token: None,
            cookie: None,
        }
    }

    /// Builds a config from `CHAT_API_URL` and the optional `CHAT_API_TOKEN`.
    pub fn from_env() -> Result<Self, ChatError> {
        let base_url = std::env::var("CHAT_API_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ChatError::Config("missing CHAT_API_URL for chat client".into()));
        }
        let mut config = Self::new(base_url);
        if let Ok(token) = std::env::var("CHAT_API_TOKEN")
            && !token.trim().is_empty()
        {
            config.bearer_token = Some(token);
        }
        Ok(config)
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets a bearer token sent with every request.
    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Sets the session cookie sent with every request.
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub(crate) fn stream_url(&self) -> String {
        format!("{}/chat/stream", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(ChatError::Config("base_url must not be empty".into()));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ChatError::Config(format!(
                "base_url must be an http(s) URL, got {base}"
            )));
        }
        Ok(())
    }
}
