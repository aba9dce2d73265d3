use std::time::Duration;

use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use thiserror::Error;

use crate::models::chat::ErrorBody;

/// Failures talking to the upstream model API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("GEMINI_API_KEY is not configured")]
    MissingApiKey,

    #[error("{0}")]
    Request(#[from] reqwest::Error),

    #[error("{}", api_message(.status, .message))]
    Api {
        status: u16,
        message: Option<String>,
    },

    #[error("{0}")]
    Stream(String),
}

fn api_message(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(m) => m.clone(),
        None => format!("upstream request failed with status {}", status),
    }
}

/// Failures of a chat turn that happen before the response is committed.
///
/// Once a `ReplyStream` exists the status is fixed at 200, so this is the
/// only type that gets to pick a status code.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("{0}")]
    UpstreamInitiation(#[from] UpstreamError),

    #[error("upstream did not respond within {}s", .0.as_secs())]
    UpstreamTimeout(Duration),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::EmptyMessage | RelayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RelayError::UpstreamInitiation(_) | RelayError::UpstreamTimeout(_) =>
                StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.to_string() };
        (self.status_code(), Json(body)).into_response()
    }
}
