use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::ChatError;
use crate::event::ChatEvent;
use crate::message::{HistoryMessage, MessageKey, MessageRef};
use crate::reconciler::{Conversation, TurnState};
use crate::session::{SessionOptions, StreamSession};
use crate::transport::{ChatRequest, ChatTransport};

/// User input collected for one send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub image_url: Option<String>,
    pub ocr_text: Option<String>,
    /// Server id of the user message being edited.
    pub edit_message_id: Option<i64>,
}

impl Draft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn image_url(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }

    pub fn ocr_text(mut self, text: impl Into<String>) -> Self {
        self.ocr_text = Some(text.into());
        self
    }

    /// Resends as an edit of the user message with this server id.
    pub fn edit_of(mut self, user_message_id: i64) -> Self {
        self.edit_message_id = Some(user_message_id);
        self
    }
}

/// One event applied to the conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnUpdate {
    /// Assistant message the event was applied to.
    pub key: MessageKey,
    pub event: ChatEvent,
    /// Turn state after applying the event.
    pub state: TurnState,
}

/// Ties user sends to stream sessions and the conversation they update.
///
/// Holds at most one active session: every send cancels the previous one
/// first, and dropping the composer cancels whatever is still running.
pub struct Composer {
    transport: Arc<dyn ChatTransport>,
    thread_id: String,
    options: SessionOptions,
    conversation: Conversation,
    active: Option<StreamSession>,
}

impl Composer {
    pub fn new(transport: Arc<dyn ChatTransport>, thread_id: impl Into<String>) -> Self {
        Self {
            transport,
            thread_id: thread_id.into(),
            options: SessionOptions::default(),
            conversation: Conversation::new(),
            active: None,
        }
    }

    /// Overrides session options for subsequent sends.
    pub fn with_options(mut self, options: SessionOptions) -> Result<Self, ChatError> {
        options.validate()?;
        self.options = options;
        Ok(self)
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// True while a session is attached and its turn is still streaming.
    pub fn is_streaming(&self) -> bool {
        self.active.is_some() && self.conversation.turn_state() == TurnState::Streaming
    }

    /// Starts a turn for `draft` and returns the assistant message key.
    ///
    /// Any running session is cancelled before the new one starts. An empty
    /// draft is rejected without touching the conversation.
    pub fn send(&mut self, draft: Draft) -> Result<MessageKey, ChatError> {
        let mut request = ChatRequest::new(self.thread_id.clone(), &draft.text)?;
        if let Some(url) = &draft.image_url {
            request = request.image_url(url.clone());
        }
        if let Some(text) = &draft.ocr_text {
            request = request.ocr_text(text.clone());
        }
        if let Some(id) = draft.edit_message_id {
            request = request.edit_message_id(id);
        }

        self.cancel();

        self.conversation.add_user_message(
            request.query.clone(),
            draft.image_url.clone(),
            draft.edit_message_id,
        );
        let edit_target = draft.edit_message_id.and_then(|id| {
            let reply = self.conversation.assistant_reply_to(id);
            if reply.is_none() {
                warn!(user_message_id = id, "edited message has no assistant reply to overwrite");
            }
            reply.map(MessageRef::Key)
        });
        let key = self.conversation.begin_turn(edit_target.as_ref());

        match StreamSession::start(self.transport.clone(), request, &self.options) {
            Ok(session) => {
                debug!(session_id = %session.session_id(), message = %key, "send started");
                self.active = Some(session);
                Ok(key)
            }
            Err(err) => {
                self.conversation.fail_turn(err.to_string());
                Err(err)
            }
        }
    }

    /// Waits for the next event of the active session and applies it.
    ///
    /// Returns `None` when no session is active or the session ended without
    /// another event.
    pub async fn next_update(&mut self) -> Option<TurnUpdate> {
        let session = self.active.as_mut()?;
        let Some(event) = session.next_event().await else {
            let cancelled = session.cancel_handle().is_cancelled();
            self.active = None;
            if !cancelled {
                self.conversation.fail_turn("Stream failed");
            }
            return None;
        };

        let state = self.conversation.apply(&event);
        if state.is_terminal() {
            self.active = None;
        }
        let key = self.conversation.turn_key()?.clone();
        Some(TurnUpdate { key, event, state })
    }

    /// Applies events until the current turn reaches a terminal state.
    pub async fn run_turn(&mut self) -> TurnState {
        while let Some(update) = self.next_update().await {
            if update.state.is_terminal() {
                return update.state;
            }
        }
        self.conversation.turn_state()
    }

    /// Cancels the active session and stops its message from streaming.
    ///
    /// Safe to call at any time, any number of times.
    pub fn cancel(&mut self) {
        if let Some(session) = self.active.take() {
            session.cancel();
        }
        self.conversation.cancel_turn();
    }

    /// Regenerates `assistant` by resending the user prompt that preceded it.
    pub fn retry(&mut self, assistant: &MessageRef) -> Result<MessageKey, ChatError> {
        let (text, user_id) = self.conversation.retry_source(assistant).ok_or_else(|| {
            ChatError::Validation("no user prompt precedes the message to retry".into())
        })?;
        let draft = match user_id {
            Some(id) => Draft::new(text).edit_of(id),
            None => Draft::new(text),
        };
        self.send(draft)
    }

    /// Cancels any active session and loads another thread's history.
    pub fn switch_thread(
        &mut self,
        thread_id: impl Into<String>,
        history: impl IntoIterator<Item = HistoryMessage>,
    ) {
        self.cancel();
        self.thread_id = thread_id.into();
        self.conversation = Conversation::from_history(history);
    }
}

impl Drop for Composer {
    fn drop(&mut self) {
        if let Some(session) = self.active.take() {
            session.cancel();
        }
    }
}
