//! Common imports for typical chat client usage.
pub use crate::{
    CancelHandle, ChatClientConfig, ChatError, ChatEvent, ChatRequest, ChatTransport, Composer,
    Conversation, ConversationMessage, Draft, HttpTransport, MessageKey, MessageRef, SessionOptions,
    SessionOutcome, StreamSession, TurnState, TurnUpdate,
};
