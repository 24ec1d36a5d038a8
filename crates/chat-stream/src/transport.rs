use std::pin::Pin;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, COOKIE};
use tracing::debug;

use crate::config::ChatClientConfig;
use crate::errors::{ChatError, StreamError};

/// Raw response body chunks of one chat stream.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Body of a `POST /chat/stream` request.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub thread_id: String,
    pub query: String,
    pub image_url: Option<String>,
    pub ocr_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edit_message_id: Option<i64>,
}

impl ChatRequest {
    /// Creates a request with a trimmed query.
    pub fn new(thread_id: impl Into<String>, query: &str) -> Result<Self, ChatError> {
        let thread_id = thread_id.into();
        if thread_id.trim().is_empty() {
            return Err(ChatError::Validation("thread_id must not be empty".into()));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(ChatError::Validation("query must not be empty".into()));
        }
        Ok(Self {
            thread_id,
            query: query.to_string(),
            image_url: None,
            ocr_text: None,
            edit_message_id: None,
        })
    }

    /// Attaches an uploaded image.
    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    /// Attaches text extracted from the image.
    pub fn ocr_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into()).filter(|t: &String| !t.trim().is_empty());
        self
    }

    /// Marks the request as an edit of the user message with this server id.
    pub fn edit_message_id(mut self, id: i64) -> Self {
        self.edit_message_id = Some(id);
        self
    }
}

/// Opens the response stream for one chat request.
///
/// `HttpTransport` is the production implementation; tests substitute
/// in-memory streams.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends the request and returns the body as a byte stream.
    ///
    /// A non-success status must be reported as `StreamError::Status`.
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, StreamError>;
}

/// reqwest-backed transport for the chat backend.
pub struct HttpTransport {
    client: reqwest::Client,
    config: ChatClientConfig,
}

impl HttpTransport {
    /// Creates a transport from explicit configuration.
    pub fn new(config: ChatClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a transport from `CHAT_API_URL` / `CHAT_API_TOKEN`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(ChatClientConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn open(&self, request: &ChatRequest) -> Result<ByteStream, StreamError> {
        debug!(thread_id = %request.thread_id, edit = ?request.edit_message_id, "opening chat stream");

        let mut http_req = self
            .client
            .post(self.config.stream_url())
            .header(ACCEPT, "text/event-stream")
            .json(request);
        if let Some(token) = &self.config.bearer_token {
            http_req = http_req.bearer_auth(token);
        }
        if let Some(cookie) = &self.config.cookie {
            http_req = http_req.header(COOKIE, cookie);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| StreamError::connect(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::status(status.as_u16(), body));
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| StreamError::read(e.to_string())));
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_trims_query_and_serializes_nulls() {
        let request = ChatRequest::new("thread-1", "  hello \n").expect("request");
        let body = serde_json::to_value(&request).expect("json");
        assert_eq!(
            body,
            serde_json::json!({
                "thread_id": "thread-1",
                "query": "hello",
                "image_url": null,
                "ocr_text": null,
            })
        );
    }

    #[test]
    fn request_includes_optional_fields_when_set() {
        let request = ChatRequest::new("t", "q")
            .expect("request")
            .image_url("https://img/1.png")
            .ocr_text("receipt total 12.00")
            .edit_message_id(42);
        let body = serde_json::to_value(&request).expect("json");
        assert_eq!(body["image_url"], "https://img/1.png");
        assert_eq!(body["ocr_text"], "receipt total 12.00");
        assert_eq!(body["edit_message_id"], 42);
    }

    #[test]
    fn request_rejects_blank_query_or_thread() {
        assert!(matches!(
            ChatRequest::new("t", "   "),
            Err(ChatError::Validation(msg)) if msg.contains("query")
        ));
        assert!(matches!(
            ChatRequest::new(" ", "q"),
            Err(ChatError::Validation(msg)) if msg.contains("thread_id")
        ));
    }

    #[test]
    fn http_transport_rejects_invalid_config() {
        assert!(matches!(
            HttpTransport::new(ChatClientConfig::new("not a url")),
            Err(ChatError::Config(_))
        ));
        assert!(HttpTransport::new(ChatClientConfig::new("http://127.0.0.1:9")).is_ok());
    }
}
