//! Conversation state for one chat widget
//!
//! [`ChatSession`] is the single writer of the turn list, the loading flag and
//! the error banner text. Sending is an optimistic three-phase operation:
//!
//! 1. [`ChatSession::begin_send`] validates the question and appends a pending turn
//! 2. the host awaits the backend (inline or on a spawned task)
//! 3. [`ChatSession::complete_send`] commits the answer or rolls the turn back
//!
//! Sends are serialized: only one may be in flight at a time.

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{ChatBackend, RequestError};
use crate::state::{ChatResponse, ChatTurn, RetrievalMode};

pub const EMPTY_QUESTION_MESSAGE: &str = "Please enter a question";
pub const GENERIC_FAILURE_MESSAGE: &str = "Failed to send message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendRejected {
    #[error("{}", EMPTY_QUESTION_MESSAGE)]
    EmptyQuestion,
    #[error("A question is already being answered")]
    Busy,
}

/// Ticket for an in-flight send, handed back to [`ChatSession::complete_send`]
#[derive(Debug)]
#[must_use = "a pending send must be completed or loading never clears"]
pub struct PendingSend {
    ticket: u64,
    question: String,
    selected_text: Option<String>,
}

impl PendingSend {
    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn selected_text(&self) -> Option<&str> {
        self.selected_text.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Answered,
    Failed,
    /// A clear happened while the request was out; the result was dropped
    Abandoned,
}

#[derive(Debug, Default)]
pub struct ChatSession {
    turns: Vec<ChatTurn>,
    loading: bool,
    error: Option<String>,
    in_flight: Option<u64>,
    next_ticket: u64,
    revision: u64,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Bumped every time the turn list changes
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Most recent turn that has an answer and a service-issued id
    pub fn last_answered(&self) -> Option<&ChatTurn> {
        self.turns
            .iter()
            .rev()
            .find(|turn| !turn.is_pending() && turn.chat_id.is_some())
    }

    /// Validate and optimistically append the question.
    ///
    /// An empty question sets the error and returns without touching the
    /// turns. A send while another is in flight is rejected with no state change.
    pub fn begin_send(
        &mut self,
        question: &str,
        selected_text: Option<&str>,
    ) -> Result<PendingSend, SendRejected> {
        if question.trim().is_empty() {
            self.error = Some(EMPTY_QUESTION_MESSAGE.to_string());
            return Err(SendRejected::EmptyQuestion);
        }
        if self.in_flight.is_some() {
            warn!("send rejected, another question is in flight");
            return Err(SendRejected::Busy);
        }

        self.loading = true;
        self.error = None;

        let mode = RetrievalMode::for_selection(selected_text);
        self.turns.push(ChatTurn::pending(
            question,
            mode,
            Utc::now().to_rfc3339(),
        ));
        self.revision += 1;

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(ticket);

        debug!(ticket, mode = mode.as_str(), "question appended");

        Ok(PendingSend {
            ticket,
            question: question.to_string(),
            selected_text: selected_text.map(str::to_string),
        })
    }

    /// Commit the answer in place of the pending turn, or roll it back.
    /// `loading` is always false afterwards.
    pub fn complete_send(
        &mut self,
        pending: PendingSend,
        outcome: Result<ChatResponse, RequestError>,
    ) -> SendOutcome {
        if self.in_flight != Some(pending.ticket) {
            debug!(ticket = pending.ticket, "dropping result of abandoned send");
            return SendOutcome::Abandoned;
        }
        self.in_flight = None;

        let result = match outcome {
            Ok(response) => {
                let turn = ChatTurn::answered(pending.question, response);
                info!(
                    chat_id = turn.chat_id.as_deref().unwrap_or(""),
                    sources = turn.sources.len(),
                    "answer received"
                );
                match self.turns.last_mut() {
                    Some(last) => *last = turn,
                    None => self.turns.push(turn),
                }
                SendOutcome::Answered
            }
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "send failed, rolling back question");
                self.error = Some(if message.trim().is_empty() {
                    GENERIC_FAILURE_MESSAGE.to_string()
                } else {
                    message
                });
                self.turns.pop();
                SendOutcome::Failed
            }
        };

        self.revision += 1;
        self.loading = false;
        result
    }

    /// Begin, await and complete in one call
    pub async fn send_message<B>(
        &mut self,
        backend: &B,
        question: &str,
        selected_text: Option<&str>,
    ) -> Result<SendOutcome, SendRejected>
    where
        B: ChatBackend + ?Sized,
    {
        let pending = self.begin_send(question, selected_text)?;
        let outcome = backend
            .send_message(pending.question(), pending.selected_text())
            .await;
        Ok(self.complete_send(pending, outcome))
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Start over. An in-flight send is abandoned and its result ignored.
    pub fn clear_messages(&mut self) {
        if self.in_flight.take().is_some() {
            info!("conversation cleared with a question in flight");
        }
        self.turns.clear();
        self.loading = false;
        self.revision += 1;
    }
}
