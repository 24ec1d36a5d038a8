//! Streaming chat client for an SSE chat backend.
//!
//! A [`StreamSession`] turns one `POST /chat/stream` response into an ordered
//! channel of [`ChatEvent`]s. A [`Conversation`] folds those events into the
//! message list, and a [`Composer`] ties both together for one thread.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let transport = Arc::new(HttpTransport::from_env()?);
//! let mut composer = Composer::new(transport, "thread-1");
//!
//! let reply = composer.send(Draft::new("Summarize my expenses"))?;
//! while let Some(update) = composer.next_update().await {
//!     if let ChatEvent::Token { text } = &update.event {
//!         print!("{text}");
//!     }
//! }
//!
//! let message = composer.conversation().message(&reply);
//! println!("\n{:?}", message.map(|m| &m.text));
//! # Ok(())
//! # }
//! ```

/// Composer tying user sends to sessions and the conversation.
pub mod composer;
/// HTTP client configuration.
pub mod config;
/// Public error types.
pub mod errors;
/// Typed chat events and payload interpretation.
pub mod event;
/// SSE block framing and UTF-8 chunk decoding.
pub mod frame;
/// Conversation messages and their identities.
pub mod message;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Folds session events into the conversation.
pub mod reconciler;
/// Stream session lifecycle and cancellation.
pub mod session;
/// Request body and transport seam.
pub mod transport;

pub use composer::{Composer, Draft, TurnUpdate};
pub use config::ChatClientConfig;
pub use errors::{ChatError, StreamError};
pub use event::{ChatEvent, EventInterpreter, InterruptPayload, TelemetryEvent, TelemetryKind};
pub use message::{ConversationMessage, HistoryMessage, MessageKey, MessageRef, MessageStatus, Role};
pub use observability::{ObservabilityConfig, init_observability};
pub use reconciler::{Conversation, TurnState};
pub use session::{CancelHandle, SessionOptions, SessionOutcome, StreamSession};
pub use transport::{ByteStream, ChatRequest, ChatTransport, HttpTransport};
