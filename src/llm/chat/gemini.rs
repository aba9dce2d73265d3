use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use log::{ info, warn };

use super::{ http_stream_generate, ChatClient, TextStream, UpstreamRole, UpstreamTurn };
use crate::error::UpstreamError;
use crate::llm::{ LlmConfig, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL };

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiInstruction>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: UpstreamRole,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize)]
struct GoogleChunk {
    candidates: Option<Vec<GoogleCandidate>>,
    error: Option<GoogleError>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GoogleError {
    message: Option<String>,
}

/// Pulls the generated text out of one `streamGenerateContent` SSE payload.
fn parse_gemini_event(data: &str) -> Result<Option<String>, UpstreamError> {
    let chunk = match serde_json::from_str::<GoogleChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("Skipping unparseable Gemini event: {}", e);
            return Ok(None);
        }
    };

    if let Some(error) = chunk.error {
        return Err(
            UpstreamError::Stream(
                error.message.unwrap_or_else(|| "Gemini reported an error mid-stream".to_string())
            )
        );
    }

    let text: String = chunk.candidates
        .unwrap_or_default()
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content.parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

pub struct GeminiChatClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    system_instruction: Option<String>,
}

impl GeminiChatClient {
    pub fn new(
        api_key: Option<String>,
        model: Option<String>,
        base_url: Option<String>,
        system_instruction: Option<String>
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            system_instruction: system_instruction.filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.completion_model.clone(),
            config.base_url.clone(),
            config.system_instruction.clone()
        )
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn build_request(&self, history: &[UpstreamTurn], message: &str) -> GeminiStreamRequest {
        let mut contents: Vec<GeminiContent> = history
            .iter()
            .map(|turn| GeminiContent {
                role: turn.role,
                parts: vec![GeminiPart { text: turn.content.clone() }],
            })
            .collect();
        contents.push(GeminiContent {
            role: UpstreamRole::User,
            parts: vec![GeminiPart { text: message.to_string() }],
        });

        GeminiStreamRequest {
            contents,
            system_instruction: self.system_instruction.as_ref().map(|text| GeminiInstruction {
                parts: vec![GeminiPart { text: text.clone() }],
            }),
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn stream_chat(
        &self,
        history: &[UpstreamTurn],
        message: &str
    ) -> Result<TextStream, UpstreamError> {
        let api_key = self.api_key.clone().ok_or(UpstreamError::MissingApiKey)?;

        info!(
            "GeminiChatClient::stream_chat() → model={} history_len={}",
            self.model,
            history.len()
        );

        let payload = self.build_request(history, message);
        let headers = vec![("x-goog-api-key".to_string(), api_key)];

        http_stream_generate(
            &self.http,
            &self.stream_url(),
            payload,
            headers,
            parse_gemini_event
        ).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
