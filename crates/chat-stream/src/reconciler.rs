//! Conversation state driven by stream events.
//!
//! `Conversation` owns the ordered message list. A turn starts with
//! `begin_turn`, which either appends an assistant placeholder or reuses an
//! existing assistant message (edit/regenerate), and ends with exactly one
//! terminal transition applied from the session's events.

use tracing::{debug, warn};

use crate::event::ChatEvent;
use crate::message::{
    ConversationMessage, HistoryMessage, MessageKey, MessageRef, MessageStatus, Role,
};

const ERROR_FALLBACK_TEXT: &str = "Something went wrong. Please try again.";

/// Lifecycle of one turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Streaming,
    Finished,
    Errored,
    Interrupted,
    /// Superseded by a newer turn or cancelled by the caller.
    Cancelled,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Streaming)
    }
}

#[derive(Debug)]
struct Turn {
    key: MessageKey,
    user_key: Option<MessageKey>,
    buffer: String,
    state: TurnState,
    server_id_assigned: bool,
}

/// Ordered message list plus the state of the current turn.
#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
    waiting_for_backend: bool,
    pending_user: Option<MessageKey>,
    turn: Option<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a settled conversation from server history.
    pub fn from_history(history: impl IntoIterator<Item = HistoryMessage>) -> Self {
        Self {
            messages: history.into_iter().map(ConversationMessage::from).collect(),
            ..Self::default()
        }
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    pub fn message(&self, key: &MessageKey) -> Option<&ConversationMessage> {
        self.messages.iter().find(|m| &m.key == key)
    }

    /// True between `begin_turn` and the turn's terminal transition.
    pub fn is_waiting_for_backend(&self) -> bool {
        self.waiting_for_backend
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn.as_ref().map_or(TurnState::Idle, |turn| turn.state)
    }

    /// Key of the assistant message the current turn writes to.
    pub fn turn_key(&self) -> Option<&MessageKey> {
        self.turn.as_ref().map(|turn| &turn.key)
    }

    /// Appends a user message, or rewrites the one with server id `edit` in place.
    pub fn add_user_message(
        &mut self,
        text: impl Into<String>,
        image_url: Option<String>,
        edit: Option<i64>,
    ) -> MessageKey {
        let text = text.into();
        if let Some(id) = edit
            && let Some(existing) = self
                .messages
                .iter_mut()
                .find(|m| m.role == Role::User && m.server_id == Some(id))
        {
            existing.text = text;
            if image_url.is_some() {
                existing.image_url = image_url;
            }
            self.pending_user = Some(existing.key.clone());
            return existing.key.clone();
        }

        let message = ConversationMessage::user(text, image_url);
        let key = message.key.clone();
        self.messages.push(message);
        self.pending_user = Some(key.clone());
        key
    }

    /// First assistant message answering the user message with server id `user_id`.
    pub fn assistant_reply_to(&self, user_id: i64) -> Option<MessageKey> {
        let idx = self
            .messages
            .iter()
            .position(|m| m.role == Role::User && m.server_id == Some(user_id))?;
        self.messages
            .get(idx + 1)
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.key.clone())
    }

    /// Text and server id of the user prompt that produced `assistant`.
    pub fn retry_source(&self, assistant: &MessageRef) -> Option<(String, Option<i64>)> {
        let idx = self
            .messages
            .iter()
            .position(|m| m.role == Role::Assistant && m.matches(assistant))?;
        self.messages[..idx]
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| (m.text.clone(), m.server_id))
    }

    /// Starts a turn and returns the key of the assistant message it streams into.
    ///
    /// A still-streaming previous turn is cancelled first. A missing edit target
    /// falls back to a new assistant message.
    pub fn begin_turn(&mut self, edit_target: Option<&MessageRef>) -> MessageKey {
        self.cancel_turn();

        let reused = edit_target.and_then(|target| {
            let found = self
                .messages
                .iter_mut()
                .find(|m| m.role == Role::Assistant && m.matches(target));
            if found.is_none() {
                warn!(?target, "edit target not found, appending a new assistant message");
            }
            found.map(|message| {
                message.text.clear();
                message.streaming = true;
                message.status = None;
                message.key.clone()
            })
        });

        let key = match reused {
            Some(key) => key,
            None => {
                let message = ConversationMessage::assistant_placeholder();
                let key = message.key.clone();
                self.messages.push(message);
                key
            }
        };

        debug!(message = %key, edit = edit_target.is_some(), "turn started");
        self.waiting_for_backend = true;
        self.turn = Some(Turn {
            key: key.clone(),
            user_key: self.pending_user.take(),
            buffer: String::new(),
            state: TurnState::Streaming,
            server_id_assigned: false,
        });
        key
    }

    /// Applies one session event to the current turn and returns the turn state.
    ///
    /// Events arriving outside a streaming turn are ignored.
    pub fn apply(&mut self, event: &ChatEvent) -> TurnState {
        let Some(turn) = self.turn.as_mut() else {
            return TurnState::Idle;
        };
        if turn.state != TurnState::Streaming {
            return turn.state;
        }
        let Some(message) = self.messages.iter_mut().find(|m| m.key == turn.key) else {
            return turn.state;
        };

        match event {
            ChatEvent::Token { text } => {
                turn.buffer.push_str(text);
                message.text.clone_from(&turn.buffer);
                return turn.state;
            }
            ChatEvent::MessageCreated { id } => {
                if !turn.server_id_assigned {
                    turn.server_id_assigned = true;
                    message.server_id = Some(*id);
                }
                return turn.state;
            }
            ChatEvent::Telemetry { .. } => return turn.state,
            ChatEvent::Done => {
                message.text = turn.buffer.trim_end().to_string();
                turn.state = TurnState::Finished;
            }
            ChatEvent::Error { message: text } => {
                message.text = if text.trim().is_empty() {
                    ERROR_FALLBACK_TEXT.to_string()
                } else {
                    text.clone()
                };
                message.status = Some(MessageStatus::Error);
                turn.state = TurnState::Errored;
            }
            ChatEvent::Interrupt { payload } => {
                turn.buffer = payload.display_text().to_string();
                message.text.clone_from(&turn.buffer);
                turn.state = TurnState::Interrupted;
            }
        }

        message.streaming = false;
        let state = turn.state;
        self.settle_turn();
        state
    }

    /// Ends the current turn with an error that did not come from the stream.
    pub fn fail_turn(&mut self, message: impl Into<String>) -> TurnState {
        self.apply(&ChatEvent::Error {
            message: message.into(),
        })
    }

    /// Stops a streaming turn without a terminal event. Safe to call repeatedly.
    pub fn cancel_turn(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.state != TurnState::Streaming {
            return;
        }
        turn.state = TurnState::Cancelled;
        if let Some(message) = self.messages.iter_mut().find(|m| m.key == turn.key) {
            message.streaming = false;
        }
        debug!(message = %turn.key, "turn cancelled");
        self.settle_turn();
    }

    fn settle_turn(&mut self) {
        self.waiting_for_backend = false;
        let user_key = self.turn.as_mut().and_then(|turn| turn.user_key.take());
        if let Some(user_key) = user_key
            && let Some(user) = self.messages.iter_mut().find(|m| m.key == user_key)
            && user.status == Some(MessageStatus::Sending)
        {
            user.status = None;
        }
    }
}
