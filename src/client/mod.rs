pub mod controller;
pub mod markdown;
pub mod terminal;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{ Stream, StreamExt };
use log::debug;
use std::pin::Pin;
use thiserror::Error;
use url::Url;

use crate::models::chat::ChatTurnRequest;

pub use controller::{ ChatController, ConversationState, TurnOutcome };
pub use markdown::render_markdown;

/// Raw response body chunks, in arrival order.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to the relay: {0}")]
    Connect(#[source] reqwest::Error),

    #[error("relay answered with HTTP {0}")]
    Status(u16),

    #[error("response body interrupted: {0}")]
    Body(String),
}

impl ClientError {
    /// Text shown to the user. Only two cases are distinguished.
    pub fn user_message(&self) -> &'static str {
        match self {
            ClientError::Status(_) => "The server returned an error.",
            ClientError::Connect(_) | ClientError::Body(_) => "Could not connect to the server.",
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends one chat turn. Resolves with the body stream once a 2xx status
    /// has been received.
    async fn send_turn(&self, request: &ChatTurnRequest) -> Result<ByteStream, ClientError>;
}

pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpTransport {
    pub fn new(server_url: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(server_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: base.join("api/chat")?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn send_turn(&self, request: &ChatTurnRequest) -> Result<ByteStream, ClientError> {
        debug!("POST {} (history_len={})", self.endpoint, request.history.len());
        let resp = self.http
            .post(self.endpoint.clone())
            .json(request)
            .send().await
            .map_err(ClientError::Connect)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }

        Ok(Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(|e| ClientError::Body(e.to_string())))))
    }
}
