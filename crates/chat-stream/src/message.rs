use std::fmt;

/// Client-local message identity. Generated once and never reused.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct MessageKey(String);

impl MessageKey {
    /// Creates a fresh key for a message that has no server id yet.
    pub fn fresh(role: Role) -> Self {
        Self(format!("{}-{}", role.as_str(), uuid::Uuid::new_v4()))
    }

    /// Key for a message loaded from thread history.
    pub fn from_server_id(id: i64) -> Self {
        Self(format!("server-{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// User-visible annotation on a message bubble.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Error,
}

/// Addresses a message either by local key or by server id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageRef {
    Key(MessageKey),
    Server(i64),
}

impl From<MessageKey> for MessageRef {
    fn from(value: MessageKey) -> Self {
        Self::Key(value)
    }
}

impl From<i64> for MessageRef {
    fn from(value: i64) -> Self {
        Self::Server(value)
    }
}

/// One entry of the conversation list.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ConversationMessage {
    pub key: MessageKey,
    pub server_id: Option<i64>,
    pub role: Role,
    pub text: String,
    pub image_url: Option<String>,
    pub streaming: bool,
    pub status: Option<MessageStatus>,
}

impl ConversationMessage {
    pub(crate) fn user(text: String, image_url: Option<String>) -> Self {
        Self {
            key: MessageKey::fresh(Role::User),
            server_id: None,
            role: Role::User,
            text,
            image_url,
            streaming: false,
            status: Some(MessageStatus::Sending),
        }
    }

    pub(crate) fn assistant_placeholder() -> Self {
        Self {
            key: MessageKey::fresh(Role::Assistant),
            server_id: None,
            role: Role::Assistant,
            text: String::new(),
            image_url: None,
            streaming: true,
            status: None,
        }
    }

    /// Returns true if `target` addresses this message.
    pub fn matches(&self, target: &MessageRef) -> bool {
        match target {
            MessageRef::Key(key) => &self.key == key,
            MessageRef::Server(id) => self.server_id == Some(*id),
        }
    }
}

/// Message shape returned by the thread history endpoint.
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl From<HistoryMessage> for ConversationMessage {
    fn from(value: HistoryMessage) -> Self {
        Self {
            key: MessageKey::from_server_id(value.id),
            server_id: Some(value.id),
            role: value.role,
            text: value.content,
            image_url: value.image_url,
            streaming: false,
            status: None,
        }
    }
}
