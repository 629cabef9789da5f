use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::api::{BackendClient, ChatTransport};
use crate::errors::AppError;
use crate::models::{ChatMessage, ChatRequest, ChatSettings, ContextMessage, MessageRole};
use crate::stream::{StreamDecoder, StreamUpdate};

/// Status shown between sending a turn and the first status line from the backend.
pub const INITIAL_STATUS: &str = "Initializing...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The stream ended normally and the assistant message was finalized.
    Completed,
    /// The turn was stopped; the message keeps whatever had been applied.
    Cancelled,
}

/// Stops the turn that is currently streaming, from any task.
/// Stopping twice, or after the turn already finished, does nothing.
#[derive(Debug, Clone)]
pub struct StopHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}

/// Owns one chat session's messages and drives its streaming turns.
pub struct ChatService<T: ChatTransport = BackendClient> {
    transport: T,
    settings: ChatSettings,
    session_id: String,
    messages: Vec<ChatMessage>,
    status_tx: watch::Sender<Option<String>>,
    delta_sink: Option<mpsc::UnboundedSender<String>>,
    current_turn: Arc<Mutex<CancellationToken>>,
}

impl<T: ChatTransport> ChatService<T> {
    pub fn new(transport: T, settings: ChatSettings, session_id: impl Into<String>) -> Self {
        let (status_tx, _) = watch::channel(None);
        let idle = CancellationToken::new();
        idle.cancel();
        Self {
            transport,
            settings,
            session_id: session_id.into(),
            messages: Vec::new(),
            status_tx,
            delta_sink: None,
            current_turn: Arc::new(Mutex::new(idle)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut ChatSettings {
        &mut self.settings
    }

    /// The "thinking" indicator: the latest status line of the running turn.
    pub fn subscribe_status(&self) -> watch::Receiver<Option<String>> {
        self.status_tx.subscribe()
    }

    /// Mirrors every display delta to `sink` as it is applied.
    pub fn set_delta_sink(&mut self, sink: mpsc::UnboundedSender<String>) {
        self.delta_sink = Some(sink);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { current: Arc::clone(&self.current_turn) }
    }

    /// Replaces the conversation, stopping any turn in progress.
    pub fn start_session(&mut self, session_id: impl Into<String>, messages: Vec<ChatMessage>) {
        self.stop_handle().stop();
        self.session_id = session_id.into();
        self.messages = messages;
        self.status_tx.send_replace(None);
    }

    /// Cancels the previous turn and installs a fresh token for the next one.
    fn begin_turn(&self) -> CancellationToken {
        let mut current = self
            .current_turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        current.cancel();
        *current = CancellationToken::new();
        current.clone()
    }

    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome, AppError> {
        if text.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "message".to_string() });
        }
        let mut context: Vec<ContextMessage> =
            self.messages.iter().map(ChatMessage::as_context).collect();
        let user_message = ChatMessage::user(text);
        context.push(user_message.as_context());
        self.messages.push(user_message);
        self.run_turn(context).await
    }

    /// Streams a fresh answer to the last user message, replacing the
    /// assistant message that followed it.
    pub async fn regenerate(&mut self) -> Result<TurnOutcome, AppError> {
        if self.messages.last().is_some_and(|m| m.role == MessageRole::Assistant) {
            self.messages.pop();
        }
        if !self.messages.last().is_some_and(|m| m.role == MessageRole::User) {
            return Err(AppError::NothingToRegenerate);
        }
        let context = self.messages.iter().map(ChatMessage::as_context).collect();
        self.run_turn(context).await
    }

    async fn run_turn(&mut self, context: Vec<ContextMessage>) -> Result<TurnOutcome, AppError> {
        let token = self.begin_turn();
        let assistant = ChatMessage::assistant_placeholder();
        let assistant_id = assistant.id.clone();
        self.messages.push(assistant);

        let request = ChatRequest::new(&self.session_id, context, &self.settings);
        self.status_tx.send_replace(Some(INITIAL_STATUS.to_string()));
        let result = self.stream_turn(&assistant_id, &request, &token).await;
        self.status_tx.send_replace(None);

        match &result {
            Ok(outcome) => info!(session_id = %self.session_id, ?outcome, "turn finished"),
            Err(e) => error!(session_id = %self.session_id, "turn failed: {e}"),
        }
        result
    }

    async fn stream_turn(
        &mut self,
        assistant_id: &str,
        request: &ChatRequest,
        token: &CancellationToken,
    ) -> Result<TurnOutcome, AppError> {
        let started = Instant::now();
        let mut stream = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(TurnOutcome::Cancelled),
            opened = self.transport.open_chat_stream(request) => opened?,
        };

        let mut decoder = StreamDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("turn cancelled; dropping the response stream");
                    return Ok(TurnOutcome::Cancelled);
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    let update = decoder.consume_chunk(&chunk);
                    self.apply(assistant_id, update);
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        let update = decoder.finish();
        self.apply(assistant_id, update);

        let latency = started.elapsed().as_secs_f64();
        let source = format!("Streaming ({})", self.settings.provider);
        if let Some(message) = self.message_mut(assistant_id) {
            message.latency_seconds = latency;
            message.source_label = source;
        }
        Ok(TurnOutcome::Completed)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn apply(&mut self, assistant_id: &str, update: StreamUpdate) {
        if let Some(status) = update.status() {
            self.status_tx.send_replace(Some(status.to_string()));
        }
        let finished = update.citations.is_some();
        if let Some(sink) = self.delta_sink.as_ref().filter(|_| !update.display_delta.is_empty()) {
            // A closed receiver only means nobody is watching.
            let _ = sink.send(update.display_delta.clone());
        }
        if let Some(message) = self.message_mut(assistant_id) {
            message.content.push_str(&update.display_delta);
            if let Some(citations) = update.citations {
                message.citations = citations;
            }
        }
        if finished {
            self.status_tx.send_replace(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChunkStream;
    use crate::models::Provider;
    use futures_util::stream;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    /// Replies to each request with the next scripted list of chunks.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Vec<Result<String, AppError>>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn with_replies(replies: Vec<Vec<&str>>) -> Self {
            let replies = replies
                .into_iter()
                .map(|chunks| chunks.into_iter().map(|c| Ok(c.to_string())).collect())
                .collect();
            Self { replies: Mutex::new(replies), requests: Mutex::default() }
        }
    }

    impl ChatTransport for ScriptedTransport {
        async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, AppError> {
            self.requests.lock().unwrap().push(request.clone());
            let chunks = self.replies.lock().unwrap().pop_front().unwrap_or_default();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    /// Hands out a stream fed by the test through a channel.
    struct ChannelTransport {
        rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    }

    impl ChatTransport for ChannelTransport {
        async fn open_chat_stream(&self, _request: &ChatRequest) -> Result<ChunkStream, AppError> {
            let rx = self.rx.lock().unwrap().take().expect("single turn");
            Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|chunk| (Ok(chunk), rx))
            })))
        }
    }

    fn service<T: ChatTransport>(transport: T) -> ChatService<T> {
        let settings = ChatSettings { provider: Provider::Groq, ..ChatSettings::default() };
        ChatService::new(transport, settings, "session-1")
    }

    #[tokio::test]
    async fn completed_turn_is_finalized() {
        let transport = ScriptedTransport::with_replies(vec![vec![
            "Par",
            "is is the __STATUS__: thinking\ncapital of France.__MET",
            "ADATA__[{\"content\":\"Paris is capital\",\"metadata\":{\"page_label\":\"12\",\"file_path\":\"/docs/geo.pdf\"}}]",
        ]]);
        let mut chat = service(transport);
        let status = chat.subscribe_status();

        let outcome = chat.submit("What is the capital of France?").await.unwrap();
        assert_eq!(outcome, TurnOutcome::Completed);

        let messages = chat.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        let answer = &messages[1];
        assert_eq!(answer.role, MessageRole::Assistant);
        assert_eq!(answer.content, "Paris is the capital of France.");
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].file_name(), Some("geo.pdf"));
        assert_eq!(answer.source_label, "Streaming (groq)");
        assert!(answer.latency_seconds > 0.0);
        assert_eq!(*status.borrow(), None);
    }

    #[tokio::test]
    async fn deltas_are_mirrored_to_the_sink() {
        let transport = ScriptedTransport::with_replies(vec![vec!["Hel", "lo __STATUS__: x\n", "there"]]);
        let mut chat = service(transport);
        let (tx, mut rx) = mpsc::unbounded_channel();
        chat.set_delta_sink(tx);
        chat.submit("q").await.unwrap();

        let mut deltas = Vec::new();
        while let Ok(delta) = rx.try_recv() {
            deltas.push(delta);
        }
        assert_eq!(deltas, vec!["Hel", "lo ", "there"]);
    }

    #[tokio::test]
    async fn request_carries_history_and_settings() {
        let transport = ScriptedTransport::with_replies(vec![vec!["one"], vec!["two"]]);
        let mut chat = service(transport);
        chat.submit("first").await.unwrap();
        chat.submit("second").await.unwrap();

        let requests = chat.transport.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 2);
        let last = &requests[1];
        assert_eq!(last.session_id, "session-1");
        assert_eq!(last.provider, Provider::Groq);
        assert!(last.stream);
        let contents: Vec<&str> = last.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "one", "second"]);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_side_effects() {
        let mut chat = service(ScriptedTransport::default());
        let err = chat.submit("   ").await.unwrap_err();
        assert!(err.is_validation());
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn regenerate_replaces_last_answer() {
        let transport = ScriptedTransport::with_replies(vec![vec!["first answer"], vec!["second answer"]]);
        let mut chat = service(transport);
        chat.submit("question").await.unwrap();
        let first_id = chat.messages()[1].id.clone();

        chat.regenerate().await.unwrap();
        let messages = chat.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "second answer");
        assert_ne!(messages[1].id, first_id);

        let requests = chat.transport.requests.lock().unwrap().clone();
        let contents: Vec<&str> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["question"]);
    }

    #[tokio::test]
    async fn regenerate_needs_a_user_message() {
        let mut chat = service(ScriptedTransport::default());
        assert!(matches!(chat.regenerate().await, Err(AppError::NothingToRegenerate)));
    }

    #[tokio::test]
    async fn status_updates_replace_each_other() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut chat = service(ChannelTransport { rx: Mutex::new(Some(rx)) });
        let mut status = chat.subscribe_status();

        let driver = async move {
            tx.send("__STATUS__: A\n".to_string()).unwrap();
            status.wait_for(|s| s.as_deref() == Some("A")).await.unwrap();
            tx.send("__STATUS__: B\n".to_string()).unwrap();
            status.wait_for(|s| s.as_deref() == Some("B")).await.unwrap();
            tx.send("done".to_string()).unwrap();
        };
        let (outcome, ()) = tokio::join!(chat.submit("q"), driver);

        assert_eq!(outcome.unwrap(), TurnOutcome::Completed);
        assert_eq!(chat.messages()[1].content, "done");
        assert_eq!(*chat.subscribe_status().borrow(), None);
    }

    #[tokio::test]
    async fn stopping_keeps_partial_answer_unfinalized() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut chat = service(ChannelTransport { rx: Mutex::new(Some(rx)) });
        let mut status = chat.subscribe_status();
        let stop = chat.stop_handle();

        let driver = async move {
            tx.send("__STATUS__: working\nHello ".to_string()).unwrap();
            status.wait_for(|s| s.as_deref() == Some("working")).await.unwrap();
            stop.stop();
            stop.stop();
            // Keep the sender alive so the stream would otherwise stay open.
            tx
        };
        let (outcome, _tx) = tokio::join!(chat.submit("q"), driver);

        assert_eq!(outcome.unwrap(), TurnOutcome::Cancelled);
        let answer = &chat.messages()[1];
        assert_eq!(answer.content, "Hello ");
        assert_eq!(answer.latency_seconds, 0.0);
        assert!(answer.source_label.is_empty());
        assert!(!answer.is_finalized());
    }

    #[tokio::test]
    async fn transport_failure_preserves_partial_message() {
        let transport = ScriptedTransport::default();
        transport.replies.lock().unwrap().push_back(vec![
            Ok("partial ".to_string()),
            Err(AppError::StreamFailed { message: "reset by peer".to_string() }),
        ]);
        let mut chat = service(transport);

        let err = chat.submit("q").await.unwrap_err();
        assert!(err.is_stream_failure());
        assert_eq!(chat.messages()[1].content, "partial ");
        assert_eq!(chat.messages()[1].latency_seconds, 0.0);
    }

    #[tokio::test]
    async fn stop_after_completion_is_a_no_op() {
        let transport = ScriptedTransport::with_replies(vec![vec!["a"], vec!["b"]]);
        let mut chat = service(transport);
        let stop = chat.stop_handle();
        chat.submit("one").await.unwrap();
        stop.stop();
        stop.stop();
        assert_eq!(chat.submit("two").await.unwrap(), TurnOutcome::Completed);
        assert_eq!(chat.messages()[3].content, "b");
    }

    #[test]
    fn new_turn_cancels_the_previous_one() {
        let chat = service(ScriptedTransport::default());
        let first = chat.begin_turn();
        let second = chat.begin_turn();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        chat.stop_handle().stop();
        assert!(second.is_cancelled());
    }

    #[test]
    fn starting_a_session_stops_the_running_turn() {
        let mut chat = service(ScriptedTransport::default());
        let turn = chat.begin_turn();
        chat.start_session("session-2", Vec::new());
        assert!(turn.is_cancelled());
        assert_eq!(chat.session_id(), "session-2");
    }
}
