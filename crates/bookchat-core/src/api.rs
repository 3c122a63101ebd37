use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::{ChatResponse, ChatTurn};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

const SEND_FAILED: &str = "Failed to send message";
const HISTORY_FAILED: &str = "Failed to fetch history";
const FEEDBACK_FAILED: &str = "Failed to submit feedback";

/// Failure talking to the chat service. `Display` is the text shown to the reader.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Non-success HTTP status; `message` is the server's `detail` when it sent one
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("Could not reach the chat service: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("Unexpected response from the chat service: {0}")]
    Decode(String),
    #[error("Rating must be between 1 and 5, got {0}")]
    InvalidRating(u8),
    #[error("{0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RequestError::Decode(err.to_string())
        } else {
            RequestError::Transport(err)
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    question: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected_text: Option<&'a str>,
}

#[derive(Serialize)]
struct FeedbackRequest<'a> {
    chat_id: &'a str,
    rating: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<&'a str>,
}

#[derive(Deserialize)]
struct HistoryResponse {
    history: Vec<ChatTurn>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

/// Anything that can answer a question. The conversation state only needs this.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn send_message(
        &self,
        question: &str,
        selected_text: Option<&str>,
    ) -> Result<ChatResponse, RequestError>;
}

/// Stateless REST client for the chat service
#[derive(Clone)]
pub struct ChatApiClient {
    client: Client,
    base_url: String,
}

impl ChatApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask a question, optionally scoped to selected book text
    pub async fn send_message(
        &self,
        question: &str,
        selected_text: Option<&str>,
    ) -> Result<ChatResponse, RequestError> {
        let url = format!("{}/chat", self.base_url);
        debug!(%url, selected = selected_text.is_some(), "sending chat request");

        let request = ChatRequest {
            question,
            selected_text,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            return Err(status_error(response, SEND_FAILED).await);
        }

        let chat_response: ChatResponse = response.json().await?;
        debug!(
            chat_id = %chat_response.chat_id,
            sources = chat_response.sources.len(),
            "chat request answered"
        );
        Ok(chat_response)
    }

    pub async fn get_history(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatTurn>, RequestError> {
        let url = format!("{}/chat/history", self.base_url);
        let limit = limit.to_string();

        let response = self
            .client
            .get(&url)
            .query(&[("user_id", user_id), ("limit", limit.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "history request failed");
            return Err(RequestError::Status {
                status: response.status().as_u16(),
                message: HISTORY_FAILED.to_string(),
            });
        }

        let history: HistoryResponse = response.json().await?;
        Ok(history.history)
    }

    pub async fn submit_feedback(
        &self,
        chat_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<(), RequestError> {
        if !(1..=5).contains(&rating) {
            return Err(RequestError::InvalidRating(rating));
        }

        let url = format!("{}/feedback", self.base_url);
        let request = FeedbackRequest {
            chat_id,
            rating,
            comment,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "feedback request failed");
            return Err(RequestError::Status {
                status: response.status().as_u16(),
                message: FEEDBACK_FAILED.to_string(),
            });
        }

        Ok(())
    }

    /// Liveness probe; the body is returned as-is for diagnostics
    pub async fn check_health(&self) -> Result<serde_json::Value, RequestError> {
        let url = format!("{}/health", self.base_url);
        let response = self.client.get(&url).send().await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ChatBackend for ChatApiClient {
    async fn send_message(
        &self,
        question: &str,
        selected_text: Option<&str>,
    ) -> Result<ChatResponse, RequestError> {
        ChatApiClient::send_message(self, question, selected_text).await
    }
}

/// Build a status error, preferring the server's `detail` string
async fn status_error(response: Response, fallback: &str) -> RequestError {
    let status = response.status();
    let detail = response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|body| body.detail)
        .and_then(|detail| match detail {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        });

    warn!(%status, detail = detail.as_deref().unwrap_or(""), "chat service returned an error");

    RequestError::Status {
        status: status.as_u16(),
        message: detail.unwrap_or_else(|| fallback.to_string()),
    }
}
