use bookchat_core::{
    Book, ChatApiClient, ChatResponse, ChatSession, Config, HostEvent, HostEvents, PendingSend,
    ReleaseKind, RequestError, SelectionObserver, SendOutcome, SendRejected,
};
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reader::{layout_chapter, rows_u16, ReaderLine, TextPoint, TextSelection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Chapters,
    Reader,
    Chat,
    Sources,
}

/// A question out on the network, with the ticket needed to settle it
struct InFlight {
    pending: PendingSend,
    task: JoinHandle<Result<ChatResponse, RequestError>>,
}

struct FeedbackInFlight {
    rating: u8,
    task: JoinHandle<Result<(), RequestError>>,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,
    pub status: Option<String>,

    // Book
    pub book: Book,
    pub chapter_state: ListState,
    pub current_chapter: usize,

    // Reader state
    pub reader_lines: Vec<ReaderLine>,
    pub reader_width: u16,
    pub reader_height: u16,
    pub reader_scroll: u16,
    pub selection: Option<TextSelection>,
    pub dragging: bool,
    /// Row where a keyboard line selection started
    pub visual_anchor: Option<usize>,
    pub visual_cursor: usize,

    // Selection capture
    pub host_events: HostEvents,
    pub observer: SelectionObserver,

    // Chat widget
    pub chat_open: bool,
    pub chat: Option<ChatSession>,
    pub input: String,
    pub input_cursor: usize,
    pub max_question_length: usize,
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub follow_latest: bool,
    pub seen_revision: u64,
    pub sources_state: ListState,
    pub animation_frame: u8,

    // Panel areas for mouse hit-testing (updated during render)
    pub chapters_area: Option<Rect>,
    pub reader_area: Option<Rect>,
    pub chat_area: Option<Rect>,

    // Service
    pub client: ChatApiClient,
    in_flight: Option<InFlight>,
    feedback: Option<FeedbackInFlight>,
}

impl App {
    pub fn new(book: Book, config: &Config) -> Self {
        let client = ChatApiClient::new(&config.api_base_url());
        let host_events = HostEvents::new();
        let observer = SelectionObserver::attach(&host_events, config.max_selection_length);

        let mut chapter_state = ListState::default();
        if !book.is_empty() {
            chapter_state.select(Some(0));
        }

        let mut app = Self {
            should_quit: false,
            input_mode: InputMode::Normal,
            focus: FocusPane::Chapters,
            status: None,

            book,
            chapter_state,
            current_chapter: 0,

            reader_lines: Vec::new(),
            reader_width: 0,
            reader_height: 0,
            reader_scroll: 0,
            selection: None,
            dragging: false,
            visual_anchor: None,
            visual_cursor: 0,

            host_events,
            observer,

            chat_open: false,
            chat: None,
            input: String::new(),
            input_cursor: 0,
            max_question_length: config.max_question_length,
            chat_scroll: 0,
            chat_height: 0,
            follow_latest: true,
            seen_revision: 0,
            sources_state: ListState::default(),
            animation_frame: 0,

            chapters_area: None,
            reader_area: None,
            chat_area: None,

            client,
            in_flight: None,
            feedback: None,
        };
        app.open_chapter(0);
        app
    }

    // Book navigation

    pub fn chapter_title(&self) -> String {
        self.book
            .chapter(self.current_chapter)
            .map(|c| c.title.clone())
            .unwrap_or_else(|| "No chapter".to_string())
    }

    pub fn open_chapter(&mut self, idx: usize) {
        if idx >= self.book.len() {
            return;
        }
        self.current_chapter = idx;
        self.chapter_state.select(Some(idx));
        self.reader_scroll = 0;
        self.clear_reader_selection();
        self.relayout_reader();
        debug!(chapter = idx, "chapter opened");
    }

    pub fn next_chapter(&mut self) {
        if self.current_chapter + 1 < self.book.len() {
            self.open_chapter(self.current_chapter + 1);
        }
    }

    pub fn prev_chapter(&mut self) {
        if self.current_chapter > 0 {
            self.open_chapter(self.current_chapter - 1);
        }
    }

    pub fn chapters_nav_down(&mut self) {
        let len = self.book.len();
        if len > 0 {
            let i = self.chapter_state.selected().unwrap_or(0);
            self.chapter_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn chapters_nav_up(&mut self) {
        let i = self.chapter_state.selected().unwrap_or(0);
        self.chapter_state.select(Some(i.saturating_sub(1)));
    }

    pub fn open_selected_chapter(&mut self) {
        if let Some(i) = self.chapter_state.selected() {
            self.open_chapter(i);
            self.focus = FocusPane::Reader;
        }
    }

    /// Re-wrap the current chapter; called on open and whenever the pane width changes
    pub fn relayout_reader(&mut self) {
        let width = if self.reader_width > 0 {
            self.reader_width as usize
        } else {
            80
        };
        self.reader_lines = self
            .book
            .chapter(self.current_chapter)
            .map(|c| layout_chapter(&c.lines, width))
            .unwrap_or_default();
        let max = self.max_reader_scroll();
        self.reader_scroll = self.reader_scroll.min(max);
    }

    pub fn set_reader_width(&mut self, width: u16) {
        if width != self.reader_width {
            self.reader_width = width;
            self.clear_reader_selection();
            self.relayout_reader();
        }
    }

    fn max_reader_scroll(&self) -> u16 {
        rows_u16(self.reader_lines.len()).saturating_sub(self.reader_height.max(1))
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.reader_scroll = self
            .reader_scroll
            .saturating_add(lines)
            .min(self.max_reader_scroll());
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.reader_scroll = self.reader_scroll.saturating_sub(lines);
    }

    pub fn scroll_half_page_down(&mut self) {
        self.scroll_down((self.reader_height / 2).max(1));
    }

    pub fn scroll_half_page_up(&mut self) {
        self.scroll_up((self.reader_height / 2).max(1));
    }

    pub fn scroll_to_top(&mut self) {
        self.reader_scroll = 0;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.reader_scroll = self.max_reader_scroll();
    }

    // Reader selection

    /// Map a terminal cell to a reader position, if it is inside the reader text
    pub fn reader_point_at(&self, x: u16, y: u16) -> Option<TextPoint> {
        let area = self.reader_area?;
        if x < area.x || x >= area.x + area.width || y < area.y || y >= area.y + area.height {
            return None;
        }
        if self.reader_lines.is_empty() {
            return None;
        }
        let line = ((y - area.y) + self.reader_scroll) as usize;
        Some(TextPoint {
            line: line.min(self.reader_lines.len() - 1),
            col: (x - area.x) as usize,
        })
    }

    pub fn start_drag(&mut self, point: TextPoint) {
        self.visual_anchor = None;
        self.selection = Some(TextSelection::at(point));
        self.dragging = true;
    }

    pub fn extend_drag(&mut self, point: TextPoint) {
        if let (true, Some(selection)) = (self.dragging, self.selection.as_mut()) {
            selection.focus = point;
        }
    }

    /// Mouse released: hand whatever is selected to the host event source
    pub fn finish_drag(&mut self) {
        if !self.dragging {
            return;
        }
        self.dragging = false;
        let text = self.selection.and_then(|s| s.text(&self.reader_lines));
        if text.is_none() {
            self.selection = None;
        }
        self.release_selection(ReleaseKind::Pointer, text);
    }

    /// Begin a keyboard line selection at the top visible row
    pub fn start_visual(&mut self) {
        if self.reader_lines.is_empty() {
            return;
        }
        let row = (self.reader_scroll as usize).min(self.reader_lines.len() - 1);
        self.visual_anchor = Some(row);
        self.visual_cursor = row;
        self.selection = Some(TextSelection::lines(row, row));
    }

    pub fn move_visual(&mut self, down: bool) {
        let Some(anchor) = self.visual_anchor else {
            return;
        };
        let last = self.reader_lines.len().saturating_sub(1);
        self.visual_cursor = if down {
            (self.visual_cursor + 1).min(last)
        } else {
            self.visual_cursor.saturating_sub(1)
        };
        self.selection = Some(TextSelection::lines(anchor, self.visual_cursor));

        // Keep the moving end on screen
        let cursor = rows_u16(self.visual_cursor);
        if cursor < self.reader_scroll {
            self.reader_scroll = cursor;
        } else if self.reader_height > 0
            && cursor >= self.reader_scroll.saturating_add(self.reader_height)
        {
            self.reader_scroll = cursor.saturating_add(1).saturating_sub(self.reader_height);
        }
    }

    pub fn confirm_visual(&mut self) {
        if self.visual_anchor.take().is_none() {
            return;
        }
        let text = self.selection.and_then(|s| s.text(&self.reader_lines));
        self.release_selection(ReleaseKind::Keyboard, text);
    }

    pub fn is_visual(&self) -> bool {
        self.visual_anchor.is_some()
    }

    pub fn clear_reader_selection(&mut self) {
        self.selection = None;
        self.dragging = false;
        self.visual_anchor = None;
    }

    fn release_selection(&mut self, kind: ReleaseKind, selection: Option<String>) {
        self.host_events.emit(HostEvent::Released { kind, selection });
        if self.observer.take_open_request() {
            self.open_chat();
        }
    }

    /// Drop the captured selection context (explicit dismissal)
    pub fn dismiss_selection(&mut self) {
        self.observer.clear();
        self.clear_reader_selection();
    }

    // Chat widget

    pub fn open_chat(&mut self) {
        if !self.chat_open {
            info!("chat widget opened");
        }
        self.chat_open = true;
        // Conversation state is created on first open and kept for the session
        self.chat.get_or_insert_with(ChatSession::new);
        self.focus = FocusPane::Chat;
    }

    pub fn toggle_chat(&mut self) {
        if self.chat_open {
            self.chat_open = false;
            self.input_mode = InputMode::Normal;
            if matches!(self.focus, FocusPane::Chat | FocusPane::Sources) {
                self.focus = FocusPane::Reader;
            }
        } else {
            self.open_chat();
        }
        if let Some(chat) = self.chat.as_mut() {
            chat.clear_error();
        }
    }

    pub fn loading(&self) -> bool {
        self.chat.as_ref().is_some_and(|c| c.loading())
    }

    pub fn can_submit(&self) -> bool {
        !self.input.trim().is_empty() && !self.loading()
    }

    pub fn remaining_chars(&self) -> usize {
        self.max_question_length
            .saturating_sub(self.input.chars().count())
    }

    pub fn submit_question(&mut self) {
        if !self.can_submit() {
            return;
        }
        let question = self.input.trim().to_string();
        let selected = self.observer.context();
        let session = self.chat.get_or_insert_with(ChatSession::new);

        match session.begin_send(&question, selected.as_deref()) {
            Ok(pending) => {
                self.input.clear();
                self.input_cursor = 0;
                self.follow_latest = true;

                let client = self.client.clone();
                let question = pending.question().to_string();
                let selected = pending.selected_text().map(str::to_string);
                let task = tokio::spawn(async move {
                    client.send_message(&question, selected.as_deref()).await
                });
                self.in_flight = Some(InFlight { pending, task });
            }
            Err(SendRejected::EmptyQuestion) => {}
            Err(SendRejected::Busy) => {
                self.status = Some("Still waiting for the previous answer".to_string());
            }
        }
    }

    /// Settle a finished request, if any. Called on every tick.
    pub async fn poll_send(&mut self) {
        let finished = self
            .in_flight
            .as_ref()
            .is_some_and(|f| f.task.is_finished());
        if !finished {
            return;
        }
        let Some(InFlight { pending, task }) = self.in_flight.take() else {
            return;
        };

        let outcome = match task.await {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "chat request task failed");
                Err(RequestError::Unexpected(format!("Request failed: {}", err)))
            }
        };
        self.settle(pending, outcome);
    }

    fn settle(&mut self, pending: PendingSend, outcome: Result<ChatResponse, RequestError>) {
        let question = pending.question().to_string();
        let selected = pending.selected_text().map(str::to_string);
        let session = self.chat.get_or_insert_with(ChatSession::new);

        match session.complete_send(pending, outcome) {
            SendOutcome::Answered => {
                if let Some(text) = selected {
                    if self.observer.consume_if(&text) {
                        self.clear_reader_selection();
                    }
                }
                self.sources_state.select(None);
            }
            SendOutcome::Failed => {
                // Give the question back so it can be resent
                if self.input.is_empty() {
                    self.input_cursor = question.chars().count();
                    self.input = question;
                }
            }
            SendOutcome::Abandoned => {}
        }
    }

    pub fn clear_conversation(&mut self) {
        if let Some(chat) = self.chat.as_mut() {
            chat.clear_messages();
        }
        self.chat_scroll = 0;
        self.sources_state.select(None);
        if self.focus == FocusPane::Sources {
            self.focus = FocusPane::Chat;
        }
    }

    pub fn clear_chat_error(&mut self) {
        if let Some(chat) = self.chat.as_mut() {
            chat.clear_error();
        }
    }

    // Sources of the latest answer

    pub fn latest_sources(&self) -> &[bookchat_core::ChunkReference] {
        self.chat
            .as_ref()
            .and_then(|c| c.last_answered())
            .map(|t| t.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn sources_nav_down(&mut self) {
        let len = self.latest_sources().len();
        if len > 0 {
            let i = self.sources_state.selected().unwrap_or(0);
            self.sources_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn sources_nav_up(&mut self) {
        let i = self.sources_state.selected().unwrap_or(0);
        self.sources_state.select(Some(i.saturating_sub(1)));
    }

    /// Open the chapter a cited source came from
    pub fn jump_to_selected_source(&mut self) {
        let Some(source) = self
            .sources_state
            .selected()
            .and_then(|i| self.latest_sources().get(i))
            .cloned()
        else {
            return;
        };

        match self.book.find_chapter(&source.chapter_title) {
            Some(idx) => {
                self.open_chapter(idx);
                self.focus = FocusPane::Reader;
                self.status = Some(format!("Opened {}", source.chapter_title));
            }
            None => {
                self.status = Some(format!("\"{}\" is not in this book", source.chapter_title));
            }
        }
    }

    // Feedback

    pub fn rate_latest_answer(&mut self, rating: u8) {
        if self.feedback.is_some() {
            return;
        }
        let Some(chat_id) = self
            .chat
            .as_ref()
            .and_then(|c| c.last_answered())
            .and_then(|t| t.chat_id.clone())
        else {
            self.status = Some("Nothing to rate yet".to_string());
            return;
        };

        let client = self.client.clone();
        let task = tokio::spawn(async move { client.submit_feedback(&chat_id, rating, None).await });
        self.feedback = Some(FeedbackInFlight { rating, task });
        self.status = Some(format!("Sending rating {}/5...", rating));
    }

    /// Settle whatever background requests have finished
    pub async fn poll_tasks(&mut self) {
        self.poll_send().await;
        self.poll_feedback().await;
    }

    pub async fn poll_feedback(&mut self) {
        let finished = self
            .feedback
            .as_ref()
            .is_some_and(|f| f.task.is_finished());
        if !finished {
            return;
        }
        let Some(FeedbackInFlight { rating, task }) = self.feedback.take() else {
            return;
        };

        self.status = Some(match task.await {
            Ok(Ok(())) => format!("Thanks for the feedback ({}/5)", rating),
            Ok(Err(err)) => err.to_string(),
            Err(err) => format!("Feedback failed: {}", err),
        });
    }

    // Chat history scrolling

    pub fn chat_scroll_down(&mut self, lines: u16) {
        self.follow_latest = false;
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn chat_scroll_up(&mut self, lines: u16) {
        self.follow_latest = false;
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
    }

    /// Called by the view with the wrapped height of the chat history
    pub fn sync_chat_scroll(&mut self, total_lines: u16) {
        let revision = self.chat.as_ref().map(|c| c.revision()).unwrap_or(0);
        if revision != self.seen_revision {
            self.seen_revision = revision;
            self.follow_latest = true;
        }

        let max = total_lines.saturating_sub(self.chat_height);
        if self.follow_latest {
            self.chat_scroll = max;
        } else {
            self.chat_scroll = self.chat_scroll.min(max);
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.loading() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookchat_core::Chapter;
    use std::path::PathBuf;

    fn book() -> Book {
        Book::from_chapters(vec![
            Chapter {
                title: "Chapter 1: Introduction".to_string(),
                path: PathBuf::from("01.md"),
                lines: vec!["# Chapter 1: Introduction".into(), "".into(), "Robots sense and act.".into()],
            },
            Chapter {
                title: "Chapter 3: Kinematics".to_string(),
                path: PathBuf::from("03.md"),
                lines: vec!["# Chapter 3: Kinematics".into(), "".into(), "Inverse kinematics solves for joints.".into()],
            },
        ])
    }

    fn app() -> App {
        let mut config = Config::new();
        config.api_base_url = Some("http://127.0.0.1:1/api".to_string());
        let mut app = App::new(book(), &config);
        app.reader_area = Some(Rect::new(10, 2, 40, 10));
        app.reader_height = 10;
        app
    }

    #[test]
    fn test_mouse_drag_captures_selection_and_opens_chat() {
        let mut app = app();
        assert!(!app.chat_open);
        assert!(app.chat.is_none());

        // Row 2 of the reader is "Robots sense and act."
        let start = app.reader_point_at(10, 4).unwrap();
        let end = app.reader_point_at(16, 4).unwrap();
        app.start_drag(start);
        app.extend_drag(end);
        app.finish_drag();

        assert_eq!(app.observer.context().as_deref(), Some("Robots"));
        assert!(app.chat_open);
        assert!(app.chat.is_some());
        assert_eq!(app.focus, FocusPane::Chat);
    }

    #[test]
    fn test_click_without_drag_does_not_open_chat() {
        let mut app = app();
        let point = app.reader_point_at(12, 4).unwrap();
        app.start_drag(point);
        app.finish_drag();

        assert!(app.observer.context().is_none());
        assert!(!app.chat_open);
        assert!(app.selection.is_none());
    }

    #[test]
    fn test_keyboard_selection_captures_lines() {
        let mut app = app();
        app.reader_scroll = 2;
        app.start_visual();
        app.confirm_visual();

        assert_eq!(app.observer.context().as_deref(), Some("Robots sense and act."));
        assert!(app.chat_open);
        assert!(!app.is_visual());
    }

    #[test]
    fn test_point_outside_reader_is_ignored() {
        let app = app();
        assert!(app.reader_point_at(0, 0).is_none());
        assert!(app.reader_point_at(50, 4).is_none());
    }

    #[test]
    fn test_toggle_chat_creates_session_once() {
        let mut app = app();
        app.toggle_chat();
        assert!(app.chat_open);
        app.chat.as_mut().unwrap().begin_send("  ", None).unwrap_err();
        assert!(app.chat.as_ref().unwrap().error().is_some());

        app.toggle_chat();
        assert!(!app.chat_open);
        // Closing clears the error banner but keeps the conversation object
        assert!(app.chat.as_ref().unwrap().error().is_none());
    }

    #[test]
    fn test_cannot_submit_blank_input() {
        let mut app = app();
        app.open_chat();
        app.input = "   ".to_string();
        assert!(!app.can_submit());
        app.submit_question();
        assert!(app.chat.as_ref().unwrap().turns().is_empty());
    }

    #[test]
    fn test_failed_send_restores_question_and_keeps_selection() {
        let mut app = app();
        app.open_chat();
        app.host_events.emit(HostEvent::Released {
            kind: ReleaseKind::Pointer,
            selection: Some("Inverse kinematics".to_string()),
        });

        let pending = app
            .chat
            .as_mut()
            .unwrap()
            .begin_send("What is this?", app.observer.context().as_deref())
            .unwrap();
        app.settle(
            pending,
            Err(RequestError::Status {
                status: 500,
                message: "upstream unavailable".to_string(),
            }),
        );

        let chat = app.chat.as_ref().unwrap();
        assert!(chat.turns().is_empty());
        assert_eq!(chat.error(), Some("upstream unavailable"));
        assert_eq!(app.input, "What is this?");
        assert_eq!(app.input_cursor, 13);
        assert_eq!(app.observer.context().as_deref(), Some("Inverse kinematics"));
    }

    #[test]
    fn test_successful_selected_send_consumes_selection() {
        let mut app = app();
        app.open_chat();
        app.host_events.emit(HostEvent::Released {
            kind: ReleaseKind::Pointer,
            selection: Some("Inverse kinematics".to_string()),
        });

        let pending = app
            .chat
            .as_mut()
            .unwrap()
            .begin_send("What is this?", app.observer.context().as_deref())
            .unwrap();
        app.settle(
            pending,
            Ok(ChatResponse {
                chat_id: "chat-9".to_string(),
                answer: "It solves for joint angles.".to_string(),
                sources: vec![bookchat_core::ChunkReference {
                    chunk_id: "c1".to_string(),
                    chapter_title: "Chapter 3: Kinematics".to_string(),
                    section_title: None,
                    score: 0.8,
                    text_preview: "...".to_string(),
                }],
                retrieval_mode: bookchat_core::RetrievalMode::Selected,
                timestamp: "2024-01-01T00:00:00Z".to_string(),
            }),
        );

        assert!(app.observer.context().is_none());
        assert_eq!(app.chat.as_ref().unwrap().turns().len(), 1);

        // The cited chapter can be opened from the sources list
        app.sources_state.select(Some(0));
        app.jump_to_selected_source();
        assert_eq!(app.current_chapter, 1);
        assert_eq!(app.focus, FocusPane::Reader);
    }

    #[test]
    fn test_remaining_chars_counts_characters() {
        let mut app = app();
        app.input = "héllo".to_string();
        assert_eq!(app.remaining_chars(), 495);
    }

    #[test]
    fn test_very_long_chapter_scroll_saturates() {
        let mut app = app();
        let row = app.reader_lines[2].clone();
        app.reader_lines = vec![row; 70_000];

        app.scroll_to_bottom();
        assert_eq!(app.reader_scroll, u16::MAX - app.reader_height);
        app.scroll_down(100);
        assert_eq!(app.reader_scroll, u16::MAX - app.reader_height);

        app.visual_anchor = Some(69_990);
        app.visual_cursor = 69_990;
        app.move_visual(true);
        assert_eq!(app.visual_cursor, 69_991);
        assert_eq!(app.reader_scroll, u16::MAX - app.reader_height);
    }

    #[test]
    fn test_sync_chat_scroll_follows_new_turns() {
        let mut app = app();
        app.open_chat();
        app.chat_height = 5;

        app.chat_scroll_up(3);
        assert!(!app.follow_latest);
        let pending = app.chat.as_mut().unwrap().begin_send("Why?", None).unwrap();
        app.sync_chat_scroll(20);
        assert!(app.follow_latest);
        assert_eq!(app.chat_scroll, 15);

        app.settle(pending, Err(RequestError::Unexpected("boom".to_string())));
    }
}
