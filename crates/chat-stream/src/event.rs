use serde_json::Value;
use tracing::warn;

/// Literal payload that ends a stream. It is not JSON.
pub const DONE_SENTINEL: &str = "[DONE]";

const INTERRUPT_FALLBACK_TEXT: &str = "Awaiting your input...";

/// Typed application event decoded from one `data:` payload.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatEvent {
    /// Incremental assistant text.
    Token { text: String },
    /// Backend persisted the assistant message under this id.
    MessageCreated { id: i64 },
    /// Backend paused the turn and needs a user decision. Terminal.
    Interrupt { payload: InterruptPayload },
    /// Backend or transport failure. Terminal.
    Error { message: String },
    /// Best-effort UI notifications.
    Telemetry { events: Vec<TelemetryEvent> },
    /// Stream finished normally. Terminal.
    Done,
}

impl ChatEvent {
    /// Returns true for `Done`, `Error` and `Interrupt`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error { .. } | Self::Interrupt { .. })
    }

    /// Short, stable name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::MessageCreated { .. } => "message_created",
            Self::Interrupt { .. } => "interrupt",
            Self::Error { .. } => "error",
            Self::Telemetry { .. } => "telemetry",
            Self::Done => "done",
        }
    }
}

/// Body of an `interrupt` payload.
#[derive(Clone, Debug, PartialEq)]
pub struct InterruptPayload {
    /// Backend-specific interrupt kind (for example `confirm_expense`).
    pub interrupt_type: Option<String>,
    /// Prompt shown to the user.
    pub message: Option<String>,
    /// Choices offered to the user, if any.
    pub candidates: Vec<Value>,
    /// The full JSON object as received.
    pub raw: Value,
}

impl InterruptPayload {
    fn from_value(value: &Value) -> Self {
        Self {
            interrupt_type: string_field(value, "interrupt_type"),
            message: string_field(value, "message"),
            candidates: value
                .get("candidates")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            raw: value.clone(),
        }
    }

    /// Text displayed in the paused assistant message.
    pub fn display_text(&self) -> &str {
        self.message
            .as_deref()
            .filter(|message| !message.trim().is_empty())
            .unwrap_or(INTERRUPT_FALLBACK_TEXT)
    }
}

/// Closed vocabulary of telemetry notifications.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryKind {
    MemoryUsed,
    MemoryUpdated,
    PrivacyProtected,
    ConversationCompacted,
    ModelDegraded,
}

impl TelemetryKind {
    /// Parses a wire sub-type; unknown names yield `None`.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "memory_used" => Some(Self::MemoryUsed),
            "memory_updated" => Some(Self::MemoryUpdated),
            "privacy_protected" => Some(Self::PrivacyProtected),
            "conversation_compacted" => Some(Self::ConversationCompacted),
            "model_degraded" => Some(Self::ModelDegraded),
            _ => None,
        }
    }
}

/// One recognized entry of a telemetry payload's `ui_events` list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TelemetryEvent {
    pub kind: TelemetryKind,
    pub severity: Option<String>,
}

/// Top-level shape of a parsed payload, in precedence order.
enum PayloadKind<'a> {
    Interrupt(&'a Value),
    Error(String),
    Telemetry(Vec<TelemetryEvent>),
    Token(&'a str),
    Unrecognized,
}

fn classify(value: &Value) -> PayloadKind<'_> {
    let kind = value.get("type").and_then(Value::as_str);
    if kind == Some("interrupt") {
        return PayloadKind::Interrupt(value);
    }
    if let Some(message) = value.get("error").and_then(error_message) {
        return PayloadKind::Error(message);
    }
    if kind == Some("telemetry")
        && let Some(items) = value.get("ui_events").and_then(Value::as_array)
    {
        return PayloadKind::Telemetry(telemetry_events(items));
    }
    match value.get("token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => PayloadKind::Token(token),
        _ => PayloadKind::Unrecognized,
    }
}

/// Maps decoded `data:` payloads to `ChatEvent`s for one session.
///
/// Holds the one-time `message_created` handshake flag, so a single interpreter
/// must be used per stream.
#[derive(Debug, Default)]
pub struct EventInterpreter {
    message_id_received: bool,
    malformed_payloads: usize,
}

impl EventInterpreter {
    /// Interprets one payload. Malformed JSON is logged and yields no events.
    pub fn interpret(&mut self, payload: &str) -> Vec<ChatEvent> {
        if payload == DONE_SENTINEL {
            return vec![ChatEvent::Done];
        }

        let value: Value = match serde_json::from_str(payload) {
            Ok(value) => value,
            Err(err) => {
                self.malformed_payloads += 1;
                warn!(error = %err, payload, "skipping malformed stream payload");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        match classify(&value) {
            PayloadKind::Interrupt(raw) => {
                events.push(ChatEvent::Interrupt {
                    payload: InterruptPayload::from_value(raw),
                });
                return events;
            }
            PayloadKind::Error(message) => {
                events.push(ChatEvent::Error { message });
                return events;
            }
            PayloadKind::Telemetry(recognized) => {
                if !recognized.is_empty() {
                    events.push(ChatEvent::Telemetry { events: recognized });
                }
            }
            PayloadKind::Token(text) => events.push(ChatEvent::Token {
                text: text.to_string(),
            }),
            PayloadKind::Unrecognized => {}
        }

        // Independent of the token branch: both may come from one payload.
        if value.get("type").and_then(Value::as_str) == Some("message_created")
            && !self.message_id_received
            && let Some(id) = value.get("message_id").and_then(Value::as_i64)
        {
            self.message_id_received = true;
            events.push(ChatEvent::MessageCreated { id });
        }

        events
    }

    /// Whether the server id handshake already happened.
    pub fn message_id_received(&self) -> bool {
        self.message_id_received
    }

    /// Number of payloads skipped because they were not valid JSON.
    pub fn malformed_payloads(&self) -> usize {
        self.malformed_payloads
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) if message.is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(fields) => Some(
            fields
                .get("message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .unwrap_or_else(|| error.to_string()),
        ),
        other => Some(other.to_string()),
    }
}

fn telemetry_events(items: &[Value]) -> Vec<TelemetryEvent> {
    items
        .iter()
        .filter_map(|item| {
            let kind = item
                .get("type")
                .and_then(Value::as_str)
                .and_then(TelemetryKind::from_wire)?;
            Some(TelemetryEvent {
                kind,
                severity: string_field(item, "severity"),
            })
        })
        .collect()
}
