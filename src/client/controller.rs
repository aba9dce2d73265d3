use std::sync::Arc;

use futures::StreamExt;
use log::{ debug, warn };
use tokio::sync::watch;

use super::{ ChatTransport, ClientError };
use crate::models::chat::{ ChatTurnRequest, HistoryEntry };
use crate::models::message::Message;
use crate::text::Utf8Decoder;

/// Everything a chat view renders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ConversationState {
    /// Completed messages only; a placeholder still streaming is never sent
    /// back as context.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.messages
            .iter()
            .filter(|m| !m.is_streaming)
            .map(Message::to_history_entry)
            .collect()
    }

    #[cfg(test)]
    fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming).count()
    }
}

#[derive(Debug)]
pub enum TurnOutcome {
    /// Blank input, or another turn was still in flight.
    Skipped,
    Completed,
    Failed(ClientError),
}

/// Owns the conversation and drives one turn at a time through a transport.
///
/// State lives in a `watch` channel so views can `subscribe` and redraw on
/// every change, including each appended chunk.
#[derive(Clone)]
pub struct ChatController {
    transport: Arc<dyn ChatTransport>,
    state: Arc<watch::Sender<ConversationState>>,
}

impl ChatController {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        let (state, _) = watch::channel(ConversationState::default());
        Self { transport, state: Arc::new(state) }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ConversationState {
        self.state.borrow().clone()
    }

    pub async fn send_message(&self, text: &str) -> TurnOutcome {
        if text.trim().is_empty() {
            return TurnOutcome::Skipped;
        }

        // Check-and-set of the busy flag happens under the channel's lock, so
        // two concurrent calls cannot both start a turn.
        let mut started = None;
        self.state.send_if_modified(|state| {
            if state.is_loading {
                return false;
            }
            let history = state.history();
            let placeholder = Message::assistant_placeholder();
            started = Some((placeholder.id.clone(), history));

            state.error = None;
            state.messages.push(Message::user(text));
            state.messages.push(placeholder);
            state.is_loading = true;
            true
        });

        let Some((assistant_id, history)) = started else {
            debug!("send_message ignored: a turn is already in flight");
            return TurnOutcome::Skipped;
        };

        let request = ChatTurnRequest { message: text.to_string(), history };
        match self.stream_reply(&assistant_id, &request).await {
            Ok(()) => {
                self.state.send_modify(|state| {
                    if let Some(msg) = state.messages.iter_mut().find(|m| m.id == assistant_id) {
                        msg.is_streaming = false;
                    }
                    state.is_loading = false;
                });
                TurnOutcome::Completed
            }
            Err(e) => {
                warn!("Chat turn failed: {}", e);
                self.state.send_modify(|state| {
                    state.error = Some(e.user_message().to_string());
                    state.messages.retain(|m| m.id != assistant_id);
                    state.is_loading = false;
                });
                TurnOutcome::Failed(e)
            }
        }
    }

    pub fn clear_chat(&self) {
        self.state.send_modify(|state| state.messages.clear());
    }

    async fn stream_reply(
        &self,
        assistant_id: &str,
        request: &ChatTurnRequest
    ) -> Result<(), ClientError> {
        let mut body = self.transport.send_turn(request).await?;
        let mut decoder = Utf8Decoder::new();

        while let Some(chunk) = body.next().await {
            let text = decoder.decode(&chunk?);
            self.append(assistant_id, &text);
        }
        let tail = decoder.finish();
        self.append(assistant_id, &tail);

        Ok(())
    }

    fn append(&self, assistant_id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        self.state.send_if_modified(|state| {
            match state.messages.iter_mut().find(|m| m.id == assistant_id && m.is_streaming) {
                Some(msg) => {
                    msg.content.push_str(text);
                    true
                }
                // cleared mid-stream
                None => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ByteStream;
    use crate::models::message::Role;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    enum Reply {
        Stream(mpsc::Receiver<Result<Bytes, ClientError>>),
        Fail(ClientError),
    }

    struct QueuedTransport {
        requests: Mutex<Vec<ChatTurnRequest>>,
        replies: Mutex<VecDeque<Reply>>,
    }

    impl QueuedTransport {
        fn with(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self { requests: Mutex::new(Vec::new()), replies: Mutex::new(replies.into()) })
        }

        fn requests(&self) -> Vec<ChatTurnRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatTransport for QueuedTransport {
        async fn send_turn(&self, request: &ChatTurnRequest) -> Result<ByteStream, ClientError> {
            self.requests.lock().unwrap().push(request.clone());
            let reply = self.replies.lock().unwrap().pop_front().expect("no reply queued");
            match reply {
                Reply::Stream(rx) => Ok(Box::pin(ReceiverStream::new(rx))),
                Reply::Fail(e) => Err(e),
            }
        }
    }

    fn finished_reply(chunks: &[&str]) -> Reply {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.try_send(Ok(Bytes::from(chunk.to_string()))).unwrap();
        }
        Reply::Stream(rx)
    }

    #[tokio::test]
    async fn blank_input_makes_no_call_and_changes_nothing() {
        let transport = QueuedTransport::with(vec![]);
        let controller = ChatController::new(transport.clone());

        assert!(matches!(controller.send_message("   ").await, TurnOutcome::Skipped));
        assert!(matches!(controller.send_message("").await, TurnOutcome::Skipped));
        assert!(transport.requests().is_empty());
        assert_eq!(controller.snapshot(), ConversationState::default());
    }

    #[tokio::test]
    async fn placeholder_is_appended_before_reply_and_completed_after() {
        let (tx, rx) = mpsc::channel(8);
        let transport = QueuedTransport::with(vec![Reply::Stream(rx)]);
        let controller = ChatController::new(transport.clone());
        let mut watcher = controller.subscribe();

        let sender = controller.clone();
        let turn = tokio::spawn(async move { sender.send_message("hi").await });

        {
            let state = watcher.wait_for(|s| s.messages.len() == 2).await.unwrap();
            assert_eq!(state.messages[0].role, Role::User);
            assert_eq!(state.messages[0].content, "hi");
            assert!(!state.messages[0].is_streaming);
            assert_eq!(state.messages[1].role, Role::Assistant);
            assert_eq!(state.messages[1].content, "");
            assert!(state.messages[1].is_streaming);
            assert!(state.is_loading);
        }

        for chunk in ["Hel", "lo, ", "world"] {
            tx.send(Ok(Bytes::from(chunk))).await.unwrap();
        }
        drop(tx);

        assert!(matches!(turn.await.unwrap(), TurnOutcome::Completed));
        let state = controller.snapshot();
        assert_eq!(state.messages[1].content, "Hello, world");
        assert!(!state.messages[1].is_streaming);
        assert!(!state.is_loading);
        assert_eq!(state.error, None);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].message, "hi");
        assert!(requests[0].history.is_empty());
    }

    #[tokio::test]
    async fn second_send_while_in_flight_is_ignored() {
        let (tx, rx) = mpsc::channel(8);
        let transport = QueuedTransport::with(vec![Reply::Stream(rx)]);
        let controller = ChatController::new(transport.clone());
        let mut watcher = controller.subscribe();

        let sender = controller.clone();
        let turn = tokio::spawn(async move { sender.send_message("first").await });
        watcher.wait_for(|s| s.is_loading).await.unwrap();

        assert!(matches!(controller.send_message("second").await, TurnOutcome::Skipped));
        let state = controller.snapshot();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.streaming_count(), 1);

        drop(tx);
        assert!(matches!(turn.await.unwrap(), TurnOutcome::Completed));
        assert_eq!(transport.requests().len(), 1);
        assert_eq!(controller.snapshot().streaming_count(), 0);
    }

    #[tokio::test]
    async fn later_turns_send_completed_history_in_order() {
        let transport = QueuedTransport::with(vec![
            finished_reply(&["Hello"]),
            finished_reply(&["Fine"])
        ]);
        let controller = ChatController::new(transport.clone());

        controller.send_message("hi").await;
        controller.send_message("how are you?").await;

        let requests = transport.requests();
        assert_eq!(requests[1].history, vec![
            HistoryEntry { role: "USER".into(), content: "hi".into() },
            HistoryEntry { role: "ASSISTANT".into(), content: "Hello".into() }
        ]);
        assert_eq!(controller.snapshot().messages.len(), 4);
    }

    #[test]
    fn history_skips_streaming_placeholder() {
        let mut state = ConversationState::default();
        state.messages.push(Message::user("a"));
        let mut reply = Message::assistant_placeholder();
        reply.content = "b".into();
        reply.is_streaming = false;
        state.messages.push(reply);
        state.messages.push(Message::user("c"));
        state.messages.push(Message::assistant_placeholder());

        let history = state.history();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|h| h.content.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn failed_call_drops_placeholder_but_keeps_user_message() {
        let transport = QueuedTransport::with(vec![Reply::Fail(ClientError::Status(500))]);
        let controller = ChatController::new(transport);

        let outcome = controller.send_message("hi").await;
        assert!(matches!(outcome, TurnOutcome::Failed(ClientError::Status(500))));

        let state = controller.snapshot();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
        assert_eq!(state.error.as_deref(), Some("The server returned an error."));
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn body_error_mid_stream_is_a_transport_failure() {
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(Ok(Bytes::from("par"))).unwrap();
        tx.try_send(Err(ClientError::Body("connection reset".into()))).unwrap();
        drop(tx);

        let controller = ChatController::new(QueuedTransport::with(vec![Reply::Stream(rx)]));
        assert!(matches!(controller.send_message("hi").await, TurnOutcome::Failed(ClientError::Body(_))));

        let state = controller.snapshot();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.error.as_deref(), Some("Could not connect to the server."));
    }

    #[tokio::test]
    async fn new_send_clears_previous_error() {
        let transport = QueuedTransport::with(vec![
            Reply::Fail(ClientError::Status(502)),
            finished_reply(&["ok"])
        ]);
        let controller = ChatController::new(transport.clone());

        controller.send_message("one").await;
        assert!(controller.snapshot().error.is_some());

        controller.send_message("two").await;
        let state = controller.snapshot();
        assert_eq!(state.error, None);
        assert_eq!(
            state.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["one", "two", "ok"]
        );
        // The failed turn's user message is still part of the context.
        assert_eq!(transport.requests()[1].history.len(), 1);
    }

    #[tokio::test]
    async fn multibyte_characters_split_across_chunks() {
        let bytes = "¿Qué tal?".as_bytes();
        let (tx, rx) = mpsc::channel(bytes.len());
        for b in bytes {
            tx.try_send(Ok(Bytes::copy_from_slice(std::slice::from_ref(b)))).unwrap();
        }
        drop(tx);

        let controller = ChatController::new(QueuedTransport::with(vec![Reply::Stream(rx)]));
        controller.send_message("hola").await;
        assert_eq!(controller.snapshot().messages[1].content, "¿Qué tal?");
    }

    #[tokio::test]
    async fn clear_chat_empties_the_conversation() {
        let controller = ChatController::new(QueuedTransport::with(vec![finished_reply(&["x"])]));
        controller.send_message("hi").await;
        assert_eq!(controller.snapshot().messages.len(), 2);

        controller.clear_chat();
        assert!(controller.snapshot().messages.is_empty());
    }
}
