use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{ header, StatusCode },
    response::{ IntoResponse, Response },
};
use bytes::Bytes;
use futures::{ stream, Stream, StreamExt };
use log::{ debug, error, info };
use uuid::Uuid;

use crate::error::RelayError;
use crate::llm::chat::{ to_upstream_history, ChatClient, TextStream };
use crate::models::chat::ChatTurnRequest;

/// Relays chat turns to the upstream model.
///
/// A turn runs in two phases. `begin_turn` validates the request and waits
/// for the upstream to accept the call; any failure there is a `RelayError`
/// with its own status code. The `ReplyStream` it hands back is the committed
/// phase: it always answers 200 and can only be turned into a body.
#[derive(Clone)]
pub struct RelayAgent {
    chat_client: Arc<dyn ChatClient>,
    initiation_timeout: Duration,
}

impl RelayAgent {
    pub fn new(chat_client: Arc<dyn ChatClient>, initiation_timeout: Duration) -> Self {
        Self { chat_client, initiation_timeout }
    }

    pub async fn begin_turn(&self, request: ChatTurnRequest) -> Result<ReplyStream, RelayError> {
        if request.message.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        let turn_id = Uuid::new_v4().to_string();
        let history = to_upstream_history(&request.history);
        info!(
            "Turn {}: opening upstream stream (model={}, history_len={})",
            turn_id,
            self.chat_client.get_model(),
            history.len()
        );

        let initiation = self.chat_client.stream_chat(&history, &request.message);
        let upstream = match tokio::time::timeout(self.initiation_timeout, initiation).await {
            Ok(Ok(upstream)) => upstream,
            Ok(Err(e)) => {
                error!("[Upstream Error] turn {}: {}", turn_id, e);
                return Err(RelayError::UpstreamInitiation(e));
            }
            Err(_) => {
                error!(
                    "[Upstream Error] turn {}: no response within {:?}",
                    turn_id,
                    self.initiation_timeout
                );
                return Err(RelayError::UpstreamTimeout(self.initiation_timeout));
            }
        };

        Ok(ReplyStream { turn_id, upstream })
    }
}

/// An upstream stream that has been accepted and whose response status is
/// therefore fixed at 200.
pub struct ReplyStream {
    turn_id: String,
    upstream: TextStream,
}

struct DrainState {
    turn_id: String,
    upstream: TextStream,
    chunks: usize,
    bytes: usize,
}

impl ReplyStream {
    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    /// Converts the upstream into body chunks.
    ///
    /// Text is forwarded verbatim and in order; empty units are dropped. A
    /// mid-stream upstream error ends the body cleanly and is only logged.
    pub fn into_body_stream(self) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
        let state = DrainState {
            turn_id: self.turn_id,
            upstream: self.upstream,
            chunks: 0,
            bytes: 0,
        };

        stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            loop {
                match state.upstream.next().await {
                    Some(Ok(text)) if text.is_empty() => continue,
                    Some(Ok(text)) => {
                        state.chunks += 1;
                        state.bytes += text.len();
                        return Some((Ok(Bytes::from(text)), Some(state)));
                    }
                    Some(Err(e)) => {
                        error!(
                            "[Stream Error] turn {}: {} (after {} chunks, {} bytes)",
                            state.turn_id,
                            e,
                            state.chunks,
                            state.bytes
                        );
                        return None;
                    }
                    None => {
                        debug!(
                            "Turn {} completed: {} chunks, {} bytes",
                            state.turn_id,
                            state.chunks,
                            state.bytes
                        );
                        return None;
                    }
                }
            }
        })
    }
}

impl IntoResponse for ReplyStream {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(self.into_body_stream()),
        ).into_response()
    }
}
