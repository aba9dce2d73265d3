pub mod gemini;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use serde::{ Deserialize, Serialize };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use log::debug;

use super::LlmConfig;
use super::sse::SseBuffer;
use self::gemini::GeminiChatClient;
use crate::error::UpstreamError;
use crate::models::chat::HistoryEntry;
use crate::text::Utf8Decoder;

/// Incremental text produced by the upstream model, in generation order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, UpstreamError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamRole {
    User,
    Model,
}

impl UpstreamRole {
    /// Only "assistant" (any case) maps to the model; everything else is
    /// treated as the user.
    pub fn from_client_role(role: &str) -> Self {
        if role.to_lowercase() == "assistant" {
            UpstreamRole::Model
        } else {
            UpstreamRole::User
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTurn {
    pub role: UpstreamRole,
    pub content: String,
}

pub fn to_upstream_history(history: &[HistoryEntry]) -> Vec<UpstreamTurn> {
    history
        .iter()
        .map(|entry| UpstreamTurn {
            role: UpstreamRole::from_client_role(&entry.role),
            content: entry.content.clone(),
        })
        .collect()
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Opens a streaming completion for `message` on top of `history`.
    ///
    /// Resolves once the upstream has accepted the request (status and headers
    /// received). Errors after that point arrive as items of the stream.
    async fn stream_chat(
        &self,
        history: &[UpstreamTurn],
        message: &str
    ) -> Result<TextStream, UpstreamError>;

    fn get_model(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Arc<dyn ChatClient> {
    Arc::new(GeminiChatClient::from_config(config))
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

fn extract_error_message(body: &str) -> Option<String> {
    serde_json
        ::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|e| e.error.message)
        .or_else(|| {
            serde_json
                ::from_str::<Vec<ApiErrorEnvelope>>(body)
                .ok()
                .and_then(|v| v.into_iter().next())
                .and_then(|e| e.error.message)
        })
        .filter(|m| !m.trim().is_empty())
}

/// POSTs `payload` and relays the server-sent events of the response.
///
/// The request is sent and its status checked before this returns, so a
/// rejected call surfaces as `Err` rather than as a stream item. Each SSE
/// payload goes through `event_parser`; `Ok(None)` skips the event. The
/// reader task stops as soon as the returned stream is dropped.
pub async fn http_stream_generate(
    client: &reqwest::Client,
    url: &str,
    payload: impl Serialize,
    headers: Vec<(String, String)>,
    event_parser: fn(&str) -> Result<Option<String>, UpstreamError>
) -> Result<TextStream, UpstreamError> {
    let mut req = client.post(url).json(&payload);
    for (name, value) in headers {
        req = req.header(name, value);
    }

    let resp = req.send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(UpstreamError::Api {
            status: status.as_u16(),
            message: extract_error_message(&body),
        });
    }

    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut decoder = Utf8Decoder::new();
        let mut events = SseBuffer::new();

        loop {
            let chunk = tokio::select! {
                _ = tx.closed() => {
                    debug!("Upstream reader stopped: downstream dropped");
                    return;
                }
                chunk = bytes.next() => chunk,
            };

            let (payloads, finished) = match chunk {
                Some(Ok(buf)) => (events.push(&decoder.decode(&buf)), false),
                Some(Err(e)) => {
                    let _ = tx.send(Err(UpstreamError::Request(e))).await;
                    return;
                }
                None => {
                    let tail = decoder.finish();
                    let mut payloads = events.push(&tail);
                    payloads.extend(events.finish());
                    (payloads, true)
                }
            };

            for data in payloads {
                match event_parser(&data) {
                    Ok(Some(text)) => {
                        if tx.send(Ok(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if finished {
                return;
            }
        }
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_assistant_maps_to_model() {
        for role in ["ASSISTANT", "assistant", "Assistant", "aSsIsTaNt"] {
            assert_eq!(UpstreamRole::from_client_role(role), UpstreamRole::Model, "{}", role);
        }
        for role in ["USER", "user", "system", "", "assistant ", "bot"] {
            assert_eq!(UpstreamRole::from_client_role(role), UpstreamRole::User, "{:?}", role);
        }
    }

    #[test]
    fn history_keeps_order_and_content() {
        let history = vec![
            HistoryEntry { role: "USER".into(), content: "hi".into() },
            HistoryEntry { role: "ASSISTANT".into(), content: "hello".into() },
            HistoryEntry { role: "tool".into(), content: "?".into() }
        ];
        let turns = to_upstream_history(&history);
        assert_eq!(turns, vec![
            UpstreamTurn { role: UpstreamRole::User, content: "hi".into() },
            UpstreamTurn { role: UpstreamRole::Model, content: "hello".into() },
            UpstreamTurn { role: UpstreamRole::User, content: "?".into() }
        ]);
    }

    #[test]
    fn extracts_google_error_messages() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(extract_error_message(body).as_deref(), Some("API key not valid."));

        let body = r#"[{"error":{"code":429,"message":"Quota exceeded"}}]"#;
        assert_eq!(extract_error_message(body).as_deref(), Some("Quota exceeded"));

        assert_eq!(extract_error_message("<html>bad gateway</html>"), None);
        assert_eq!(extract_error_message(r#"{"error":{"message":"  "}}"#), None);
    }
}
