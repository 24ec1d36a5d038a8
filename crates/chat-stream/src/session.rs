use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::errors::ChatError;
use crate::event::{ChatEvent, EventInterpreter, InterruptPayload};
use crate::frame::{FrameDecoder, Utf8ChunkDecoder, data_payload};
use crate::transport::{ChatRequest, ChatTransport};

/// Generic per-session options.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Bounded event buffer size between the network task and the consumer.
    pub stream_buffer_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            stream_buffer_capacity: 128,
        }
    }
}

impl SessionOptions {
    pub fn stream_buffer_capacity(mut self, capacity: usize) -> Self {
        self.stream_buffer_capacity = capacity;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ChatError> {
        if self.stream_buffer_capacity == 0 {
            return Err(ChatError::Validation(
                "stream_buffer_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// How a session ended. Produced exactly once per session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionOutcome {
    /// `[DONE]` received, or the body ended cleanly.
    Completed,
    /// Backend error payload or transport failure; carries the displayed text.
    Failed { message: String },
    /// Backend paused the turn.
    Interrupted { payload: InterruptPayload },
    /// The caller cancelled; no terminal event was dispatched.
    Cancelled,
}

/// Handle used to cancel a running session.
///
/// Cancelling is idempotent and never fails, including after the session
/// already finished.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    aborted: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let handle = Self {
            aborted: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        };
        (handle, rx)
    }

    /// Requests cancellation and drops any event not yet delivered.
    pub fn cancel(&self) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            self.tx.send_replace(true);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }
}

/// One outstanding chat request and its decoded event stream.
///
/// Events are yielded in wire order through `next_event()`. At most one
/// terminal event (`Done`, `Error`, `Interrupt`) is ever yielded, and nothing
/// follows it.
pub struct StreamSession {
    session_id: uuid::Uuid,
    rx: mpsc::Receiver<ChatEvent>,
    outcome_rx: oneshot::Receiver<SessionOutcome>,
    cancel: CancelHandle,
    saw_terminal: bool,
}

impl StreamSession {
    /// Spawns the network task for `request` on the current tokio runtime.
    pub fn start(
        transport: Arc<dyn ChatTransport>,
        request: ChatRequest,
        options: &SessionOptions,
    ) -> Result<Self, ChatError> {
        options.validate()?;

        let session_id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(options.stream_buffer_capacity);
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel, cancel_rx) = CancelHandle::new();

        debug!(%session_id, thread_id = %request.thread_id, "starting chat stream session");
        tokio::spawn(session_task(
            session_id, transport, request, tx, outcome_tx, cancel_rx,
        ));

        Ok(Self {
            session_id,
            rx,
            outcome_rx,
            cancel,
            saw_terminal: false,
        })
    }

    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Returns a handle that can cancel this session.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancels the session. Same as `cancel_handle().cancel()`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the terminal event was yielded, after cancellation,
    /// or when the task ended.
    pub async fn next_event(&mut self) -> Option<ChatEvent> {
        if self.saw_terminal || self.cancel.is_cancelled() {
            return None;
        }
        let event = self.rx.recv().await?;
        if self.cancel.is_cancelled() {
            return None;
        }
        if event.is_terminal() {
            self.saw_terminal = true;
        }
        Some(event)
    }

    /// Drains remaining events and returns the session outcome.
    ///
    /// Once the terminal event was yielded its outcome is returned even if the
    /// session was cancelled afterwards.
    pub async fn finish(mut self) -> SessionOutcome {
        while self.next_event().await.is_some() {}
        if !self.saw_terminal && self.cancel.is_cancelled() {
            return SessionOutcome::Cancelled;
        }
        match (&mut self.outcome_rx).await {
            Ok(outcome) => outcome,
            Err(_) => SessionOutcome::Failed {
                message: "Stream failed".into(),
            },
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Resolves once cancellation was requested. Pends forever if every handle was
/// dropped without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|aborted| *aborted).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn session_task(
    session_id: uuid::Uuid,
    transport: Arc<dyn ChatTransport>,
    request: ChatRequest,
    tx: mpsc::Sender<ChatEvent>,
    outcome_tx: oneshot::Sender<SessionOutcome>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let opened = tokio::select! {
        biased;
        _ = cancelled(&mut cancel_rx) => {
            debug!(%session_id, "session cancelled before response");
            let _ = outcome_tx.send(SessionOutcome::Cancelled);
            return;
        }
        opened = transport.open(&request) => opened,
    };

    let mut body = match opened {
        Ok(body) => body,
        Err(err) => {
            let message = err.user_message();
            debug!(%session_id, error = %err, "chat stream request failed");
            let _ = send_event(&tx, ChatEvent::Error { message: message.clone() }).await;
            let _ = outcome_tx.send(SessionOutcome::Failed { message });
            return;
        }
    };

    let mut utf8 = Utf8ChunkDecoder::default();
    let mut frames = FrameDecoder::default();
    let mut interpreter = EventInterpreter::default();
    loop {
        let next = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => {
                debug!(%session_id, "session cancelled");
                let _ = outcome_tx.send(SessionOutcome::Cancelled);
                return;
            }
            next = body.next() => next,
        };

        let events = match next {
            Some(Ok(chunk)) => {
                let text = utf8.decode(&chunk);
                let mut events = Vec::new();
                for block in frames.push(&text) {
                    if let Some(payload) = data_payload(&block) {
                        events.extend(interpreter.interpret(payload));
                    }
                }
                events
            }
            Some(Err(err)) => {
                debug!(%session_id, error = %err, "chat stream read failed");
                vec![ChatEvent::Error {
                    message: err.user_message(),
                }]
            }
            None => {
                debug!(%session_id, pending = frames.pending().len(), "chat stream ended without [DONE]");
                vec![ChatEvent::Done]
            }
        };

        for event in events {
            debug!(%session_id, kind = event.kind(), "dispatching chat event");
            let outcome = terminal_outcome(&event);
            let sent = tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    debug!(%session_id, "session cancelled");
                    let _ = outcome_tx.send(SessionOutcome::Cancelled);
                    return;
                }
                sent = send_event(&tx, event) => sent,
            };
            if !sent {
                debug!(%session_id, "session receiver dropped");
                return;
            }
            if let Some(outcome) = outcome {
                debug!(%session_id, ?outcome, "chat stream session finished");
                let _ = outcome_tx.send(outcome);
                return;
            }
        }
    }
}

fn terminal_outcome(event: &ChatEvent) -> Option<SessionOutcome> {
    match event {
        ChatEvent::Done => Some(SessionOutcome::Completed),
        ChatEvent::Error { message } => Some(SessionOutcome::Failed {
            message: message.clone(),
        }),
        ChatEvent::Interrupt { payload } => Some(SessionOutcome::Interrupted {
            payload: payload.clone(),
        }),
        ChatEvent::Token { .. } | ChatEvent::MessageCreated { .. } | ChatEvent::Telemetry { .. } => {
            None
        }
    }
}

async fn send_event(tx: &mpsc::Sender<ChatEvent>, event: ChatEvent) -> bool {
    tx.send(event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StreamError;
    use crate::transport::ByteStream;
    use futures::channel::mpsc as chunk_channel;
    use futures::stream;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    enum FakeBehavior {
        Chunks(Vec<Result<&'static str, StreamError>>),
        Raw(Vec<Vec<u8>>),
        OpenError(StreamError),
        Pending,
        Channel(Mutex<Option<chunk_channel::UnboundedReceiver<Result<bytes::Bytes, StreamError>>>>),
    }

    struct FakeTransport {
        opens: AtomicUsize,
        behavior: FakeBehavior,
    }

    impl FakeTransport {
        fn new(behavior: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                behavior,
            })
        }
    }

    #[async_trait::async_trait]
    impl ChatTransport for FakeTransport {
        async fn open(&self, _request: &ChatRequest) -> Result<ByteStream, StreamError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                FakeBehavior::Chunks(chunks) => {
                    let items: Vec<Result<bytes::Bytes, StreamError>> = chunks
                        .iter()
                        .map(|chunk| {
                            chunk
                                .clone()
                                .map(|text| bytes::Bytes::from_static(text.as_bytes()))
                        })
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                FakeBehavior::Raw(chunks) => {
                    let items: Vec<Result<bytes::Bytes, StreamError>> = chunks
                        .iter()
                        .map(|chunk| Ok(bytes::Bytes::from(chunk.clone())))
                        .collect();
                    Ok(Box::pin(stream::iter(items)))
                }
                FakeBehavior::OpenError(err) => Err(err.clone()),
                FakeBehavior::Pending => Ok(Box::pin(stream::pending::<
                    Result<bytes::Bytes, StreamError>,
                >())),
                FakeBehavior::Channel(slot) => {
                    let rx = slot.lock().expect("lock").take().expect("single open");
                    Ok(Box::pin(rx))
                }
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new("thread-1", "hello").expect("request")
    }

    fn start(transport: Arc<FakeTransport>) -> StreamSession {
        StreamSession::start(transport, request(), &SessionOptions::default()).expect("start")
    }

    async fn collect(session: &mut StreamSession) -> Vec<ChatEvent> {
        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }
        events
    }

    fn terminal_count(events: &[ChatEvent]) -> usize {
        events.iter().filter(|event| event.is_terminal()).count()
    }

    #[tokio::test]
    async fn token_then_done() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: {\"token\":\"Hi\"}\n\n"),
            Ok("data: [DONE]\n\n"),
        ])));
        let events = collect(&mut session).await;
        assert_eq!(
            events,
            vec![ChatEvent::Token { text: "Hi".into() }, ChatEvent::Done]
        );
        assert_eq!(session.finish().await, SessionOutcome::Completed);
    }

    #[tokio::test]
    async fn tokens_keep_wire_order_across_split_chunks() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: {\"token\":\"Hel\"}\n\ndata: {\"tok"),
            Ok("en\":\"lo\"}\n"),
            Ok("\ndata: {\"token\":\" world\"}\n\ndata: [DONE]\n\n"),
        ])));
        let texts: Vec<String> = collect(&mut session)
            .await
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::Token { text } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(texts, ["Hel", "lo", " world"]);
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks_survives() {
        let wire = "data: {\"token\":\"🦀\"}\n\ndata: [DONE]\n\n".as_bytes();
        let split = wire.iter().position(|b| *b == 0xF0).expect("crab") + 2;
        let mut session = start(FakeTransport::new(FakeBehavior::Raw(vec![
            wire[..split].to_vec(),
            wire[split..].to_vec(),
        ])));
        let events = collect(&mut session).await;
        assert_eq!(events[0], ChatEvent::Token { text: "🦀".into() });
    }

    #[tokio::test]
    async fn error_payload_is_terminal() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![Ok(
            "data: {\"error\":\"rate limited\"}\n\ndata: {\"token\":\"late\"}\n\ndata: [DONE]\n\n",
        )])));
        let events = collect(&mut session).await;
        assert_eq!(
            events,
            vec![ChatEvent::Error {
                message: "rate limited".into()
            }]
        );
        assert_eq!(
            session.finish().await,
            SessionOutcome::Failed {
                message: "rate limited".into()
            }
        );
    }

    #[tokio::test]
    async fn interrupt_is_the_only_terminal_event() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![Ok(
            "data: {\"type\":\"interrupt\",\"message\":\"Confirm expense?\"}\n\ndata: [DONE]\n\n",
        )])));
        let events = collect(&mut session).await;
        assert_eq!(events.len(), 1);
        assert_eq!(terminal_count(&events), 1);
        assert!(matches!(
            session.finish().await,
            SessionOutcome::Interrupted { payload } if payload.display_text() == "Confirm expense?"
        ));
    }

    #[tokio::test]
    async fn malformed_block_is_skipped() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: {not json\n\n"),
            Ok("data: {\"token\":\"ok\"}\n\n"),
            Ok("data: [DONE]\n\n"),
        ])));
        let events = collect(&mut session).await;
        assert_eq!(
            events,
            vec![ChatEvent::Token { text: "ok".into() }, ChatEvent::Done]
        );
    }

    #[tokio::test]
    async fn non_success_status_becomes_error_event() {
        let mut session = start(FakeTransport::new(FakeBehavior::OpenError(
            StreamError::status(503, "overloaded"),
        )));
        let events = collect(&mut session).await;
        assert_eq!(
            events,
            vec![ChatEvent::Error {
                message: "Server error 503: overloaded".into()
            }]
        );
    }

    #[tokio::test]
    async fn read_failure_uses_fallback_message() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: {\"token\":\"a\"}\n\n"),
            Err(StreamError::read("")),
        ])));
        let events = collect(&mut session).await;
        assert_eq!(
            events,
            vec![
                ChatEvent::Token { text: "a".into() },
                ChatEvent::Error {
                    message: "Stream failed".into()
                }
            ]
        );
    }

    #[tokio::test]
    async fn clean_end_without_done_sentinel_completes() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![Ok(
            "data: {\"token\":\"a\"}\n\n",
        )])));
        let events = collect(&mut session).await;
        assert_eq!(events.last(), Some(&ChatEvent::Done));
        assert_eq!(terminal_count(&events), 1);
    }

    #[tokio::test]
    async fn cancel_while_waiting_yields_no_events() {
        let transport = FakeTransport::new(FakeBehavior::Pending);
        let mut session = start(transport.clone());
        let handle = session.cancel_handle();
        handle.cancel();
        handle.cancel();

        assert_eq!(session.next_event().await, None);
        assert!(handle.is_cancelled());
        assert_eq!(session.finish().await, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn chunks_arriving_after_cancel_are_dropped() {
        let (chunk_tx, chunk_rx) = chunk_channel::unbounded();
        let transport = FakeTransport::new(FakeBehavior::Channel(Mutex::new(Some(chunk_rx))));
        let mut session = start(transport.clone());

        chunk_tx
            .unbounded_send(Ok(bytes::Bytes::from_static(b"data: {\"token\":\"a\"}\n\n")))
            .expect("send");
        assert_eq!(
            session.next_event().await,
            Some(ChatEvent::Token { text: "a".into() })
        );

        session.cancel();
        let _ = chunk_tx.unbounded_send(Ok(bytes::Bytes::from_static(
            b"data: {\"token\":\"b\"}\n\ndata: [DONE]\n\n",
        )));
        assert_eq!(session.next_event().await, None);
        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(session.finish().await, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn cancel_after_completion_is_a_no_op() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![Ok(
            "data: [DONE]\n\n",
        )])));
        let handle = session.cancel_handle();
        assert_eq!(collect(&mut session).await, vec![ChatEvent::Done]);

        handle.cancel();
        handle.cancel();
        assert_eq!(session.next_event().await, None);
    }

    #[tokio::test]
    async fn cancel_after_done_keeps_completed_outcome() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![
            Ok("data: {\"token\":\"Hi\"}\n\n"),
            Ok("data: [DONE]\n\n"),
        ])));
        assert_eq!(
            collect(&mut session).await,
            vec![
                ChatEvent::Token { text: "Hi".into() },
                ChatEvent::Done
            ]
        );

        session.cancel();
        assert_eq!(session.finish().await, SessionOutcome::Completed);
    }

    #[tokio::test]
    async fn cancel_before_terminal_reports_cancelled() {
        let session = start(FakeTransport::new(FakeBehavior::Pending));
        session.cancel();
        assert_eq!(session.finish().await, SessionOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropping_session_stops_its_task() {
        let transport = FakeTransport::new(FakeBehavior::Pending);
        let session = start(transport.clone());
        while transport.opens.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        drop(session);
        for _ in 0..100 {
            if Arc::strong_count(&transport) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(Arc::strong_count(&transport), 1);
    }

    #[tokio::test]
    async fn message_created_twice_keeps_first_only() {
        let mut session = start(FakeTransport::new(FakeBehavior::Chunks(vec![Ok(
            "data: {\"type\":\"message_created\",\"message_id\":1}\n\ndata: {\"type\":\"message_created\",\"message_id\":2}\n\ndata: [DONE]\n\n",
        )])));
        let events = collect(&mut session).await;
        assert_eq!(
            events,
            vec![ChatEvent::MessageCreated { id: 1 }, ChatEvent::Done]
        );
    }

    #[tokio::test]
    async fn zero_buffer_capacity_is_rejected() {
        let result = StreamSession::start(
            FakeTransport::new(FakeBehavior::Pending),
            request(),
            &SessionOptions::default().stream_buffer_capacity(0),
        );
        assert!(matches!(result, Err(ChatError::Validation(msg)) if msg.contains("stream_buffer_capacity")));
    }
}
