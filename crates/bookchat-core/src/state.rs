//! UI-agnostic conversation types
//!
//! These are the shapes exchanged with the chat service and held by
//! [`ChatSession`](crate::session::ChatSession). They don't depend on any
//! specific UI framework.

use serde::{Deserialize, Serialize};

/// Which retrieval strategy produced (or will produce) an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Answer retrieved from the whole book
    #[default]
    Default,
    /// Answer scoped to text the reader selected
    Selected,
}

impl RetrievalMode {
    pub fn for_selection(selected_text: Option<&str>) -> Self {
        if selected_text.is_some() {
            RetrievalMode::Selected
        } else {
            RetrievalMode::Default
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Default => "default",
            RetrievalMode::Selected => "selected",
        }
    }
}

/// A book chunk the service cited as a source for an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReference {
    pub chunk_id: String,
    pub chapter_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_title: Option<String>,
    pub score: f64,
    pub text_preview: String,
}

impl ChunkReference {
    /// Relevance score scaled to a whole percentage
    pub fn relevance_percent(&self) -> u32 {
        (self.score.clamp(0.0, 1.0) * 100.0).round() as u32
    }

    /// "Chapter - Section", or just the chapter when there is no section
    pub fn display_title(&self) -> String {
        match &self.section_title {
            Some(section) if !section.is_empty() => {
                format!("{} - {}", self.chapter_title, section)
            }
            _ => self.chapter_title.clone(),
        }
    }
}

/// One question and its answer.
///
/// A turn whose `answer` is empty is a pending placeholder for a question
/// that is still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<ChunkReference>,
    pub timestamp: String,
    pub retrieval_mode: RetrievalMode,
}

impl ChatTurn {
    pub fn pending(question: &str, retrieval_mode: RetrievalMode, timestamp: String) -> Self {
        Self {
            chat_id: None,
            question: question.to_string(),
            answer: String::new(),
            sources: Vec::new(),
            timestamp,
            retrieval_mode,
        }
    }

    /// Finalize a question with the service's answer
    pub fn answered(question: String, response: ChatResponse) -> Self {
        Self {
            chat_id: Some(response.chat_id),
            question,
            answer: response.answer,
            sources: response.sources,
            timestamp: response.timestamp,
            retrieval_mode: response.retrieval_mode,
        }
    }

    /// Structural check used by the view: no answer yet means the turn is
    /// still the reader's own question.
    pub fn is_pending(&self) -> bool {
        self.answer.is_empty()
    }
}

/// Successful response from `POST /chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub chat_id: String,
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<ChunkReference>,
    pub retrieval_mode: RetrievalMode,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(score: f64, section: Option<&str>) -> ChunkReference {
        ChunkReference {
            chunk_id: "c1".to_string(),
            chapter_title: "Ch.3".to_string(),
            section_title: section.map(str::to_string),
            score,
            text_preview: "Inverse kinematics solves...".to_string(),
        }
    }

    #[test]
    fn test_relevance_percent_rounds() {
        assert_eq!(chunk(0.92, None).relevance_percent(), 92);
        assert_eq!(chunk(0.895, None).relevance_percent(), 90);
        assert_eq!(chunk(0.0, None).relevance_percent(), 0);
        assert_eq!(chunk(1.0, None).relevance_percent(), 100);
    }

    #[test]
    fn test_display_title_with_and_without_section() {
        assert_eq!(chunk(0.5, None).display_title(), "Ch.3");
        assert_eq!(
            chunk(0.5, Some("Jacobians")).display_title(),
            "Ch.3 - Jacobians"
        );
        assert_eq!(chunk(0.5, Some("")).display_title(), "Ch.3");
    }

    #[test]
    fn test_retrieval_mode_for_selection() {
        assert_eq!(RetrievalMode::for_selection(None), RetrievalMode::Default);
        assert_eq!(
            RetrievalMode::for_selection(Some("a passage")),
            RetrievalMode::Selected
        );
    }

    #[test]
    fn test_chat_response_wire_format() {
        let body = r#"{
            "chat_id": "123e4567-e89b-12d3-a456-426614174000",
            "answer": "According to Chapter 2...",
            "sources": [{
                "chunk_id": "c1",
                "chapter_title": "Chapter 2: Robot Locomotion",
                "section_title": "Forward Kinematics",
                "score": 0.89,
                "text_preview": "Forward kinematics is the process of..."
            }],
            "retrieval_mode": "selected",
            "timestamp": "2025-12-26T10:00:00"
        }"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.retrieval_mode, RetrievalMode::Selected);
        assert_eq!(response.sources.len(), 1);
        assert_eq!(
            response.sources[0].section_title.as_deref(),
            Some("Forward Kinematics")
        );
    }

    #[test]
    fn test_history_item_without_sources_is_a_turn() {
        let body = r#"{
            "chat_id": "abc",
            "question": "What is a servo?",
            "answer": "A servo is...",
            "timestamp": "2025-12-26T10:00:00",
            "retrieval_mode": "default"
        }"#;
        let turn: ChatTurn = serde_json::from_str(body).unwrap();
        assert!(turn.sources.is_empty());
        assert!(!turn.is_pending());
        assert_eq!(turn.chat_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_pending_turn_is_pending() {
        let turn = ChatTurn::pending("Why?", RetrievalMode::Default, "now".to_string());
        assert!(turn.is_pending());
        assert!(turn.sources.is_empty());
    }
}
