use bookchat_core::{ChatTurn, ChunkReference, RetrievalMode};
use chrono::{DateTime, Local, NaiveDateTime};
use ratatui::{
    layout::{Constraint, Layout, Margin, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{
        Block, Borders, List, ListItem, Paragraph, Scrollbar, ScrollbarOrientation,
        ScrollbarState,
    },
    Frame,
};

use crate::app::{App, FocusPane, InputMode};
use crate::reader::{rows_u16, wrap_text_to_width, LineKind};

/// Characters of the captured selection shown in the banner
const SELECTION_PREVIEW_CHARS: usize = 100;

/// Parse a line of text and convert **bold** markdown to styled spans
fn parse_markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("**") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("**") else {
            break;
        };
        if end == 0 {
            // "****" is literal
            spans.push(Span::raw(rest[..start + 4].to_string()));
            rest = &after[2..];
            continue;
        }
        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(
            after[..end].to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
        rest = &after[end + 2..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }

    if spans.is_empty() {
        Line::default()
    } else {
        Line::from(spans)
    }
}

/// `"Chapter 3 - Inverse Kinematics (relevance: 92%)"`
pub fn format_source(source: &ChunkReference) -> String {
    format!(
        "{} (relevance: {}%)",
        source.display_title(),
        source.relevance_percent()
    )
}

/// Render an ISO-8601 timestamp as local wall-clock time, or as given if it won't parse.
/// Timestamps without an offset are already local.
pub fn format_local_time(timestamp: &str) -> String {
    if let Ok(t) = DateTime::parse_from_rfc3339(timestamp) {
        return t.with_timezone(&Local).format("%H:%M").to_string();
    }
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|_| timestamp.to_string())
}

fn selection_preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > SELECTION_PREVIEW_CHARS {
        let cut: String = flat.chars().take(SELECTION_PREVIEW_CHARS).collect();
        format!("\"{}...\"", cut)
    } else {
        format!("\"{}\"", flat)
    }
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, frame, header_area);

    let [chapters_area, reader_area, chat_area] = if app.chat_open {
        Layout::horizontal([
            Constraint::Length(28),
            Constraint::Min(30),
            Constraint::Percentage(42),
        ])
        .areas(body_area)
    } else {
        Layout::horizontal([
            Constraint::Length(28),
            Constraint::Min(30),
            Constraint::Length(0),
        ])
        .areas(body_area)
    };

    render_chapters(app, frame, chapters_area);
    render_reader(app, frame, reader_area);
    if app.chat_open {
        render_chat(app, frame, chat_area);
    } else {
        app.chat_area = None;
    }

    render_footer(app, frame, footer_area);
}

fn render_header(app: &App, frame: &mut Frame, area: Rect) {
    let mut spans = vec![
        Span::styled(" bookchat ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
        Span::raw("  "),
        Span::styled(app.chapter_title(), Style::default().fg(Color::White)),
    ];
    if app.observer.has_context() {
        spans.push(Span::styled(
            "  [selection captured]",
            Style::default().fg(Color::Yellow),
        ));
    }

    let header = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    let mode_style = match app.input_mode {
        InputMode::Normal => Style::default().bg(Color::Blue).fg(Color::White),
        InputMode::Editing => Style::default().bg(Color::Yellow).fg(Color::Black),
    };

    let mode_text = match (app.input_mode, app.focus) {
        (InputMode::Editing, _) => " ASK ",
        (_, FocusPane::Reader) if app.is_visual() => " VISUAL ",
        (_, FocusPane::Chapters) | (_, FocusPane::Reader) => " READ ",
        (_, FocusPane::Chat) | (_, FocusPane::Sources) => " CHAT ",
    };

    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    let hint = |key: &'static str, label: &'static str| {
        [
            Span::styled(format!(" {} ", key), key_style),
            Span::styled(format!(" {} ", label), label_style),
        ]
    };

    let mut hints: Vec<Span> = Vec::new();
    match (app.input_mode, app.focus) {
        (InputMode::Editing, _) => {
            hints.extend(hint("Enter", "send"));
            hints.extend(hint("Esc", "stop typing"));
        }
        (_, FocusPane::Chapters) => {
            hints.extend(hint("j/k", "nav"));
            hints.extend(hint("Enter", "open"));
        }
        (_, FocusPane::Reader) if app.is_visual() => {
            hints.extend(hint("j/k", "extend"));
            hints.extend(hint("y", "ask about lines"));
            hints.extend(hint("Esc", "cancel"));
        }
        (_, FocusPane::Reader) => {
            hints.extend(hint("j/k", "scroll"));
            hints.extend(hint("n/p", "chapter"));
            hints.extend(hint("v", "select"));
            if app.observer.has_context() {
                hints.extend(hint("x", "drop selection"));
            }
        }
        (_, FocusPane::Chat) => {
            hints.extend(hint("i", "ask"));
            hints.extend(hint("j/k", "scroll"));
            if app.chat.as_ref().is_some_and(|c| c.last_answered().is_some()) {
                hints.extend(hint("1-5", "rate"));
            }
            hints.extend(hint("C", "clear"));
        }
        (_, FocusPane::Sources) => {
            hints.extend(hint("j/k", "nav"));
            hints.extend(hint("Enter", "jump"));
        }
    }

    if app.input_mode == InputMode::Normal {
        hints.extend(hint("Tab", "focus"));
        hints.extend(hint("c", if app.chat_open { "close chat" } else { "chat" }));
        hints.extend(hint("q", "quit"));
    }

    let mut spans = vec![
        Span::styled(mode_text, mode_style),
        Span::styled(" ", label_style),
    ];
    spans.extend(hints);
    if let Some(status) = &app.status {
        spans.push(Span::styled(
            format!("  {}", status),
            Style::default().bg(Color::Black).fg(Color::Yellow),
        ));
    }

    let footer = Paragraph::new(Line::from(spans)).style(Style::default().bg(Color::Black));
    frame.render_widget(footer, area);
}

fn render_chapters(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Chapters;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Chapters ");
    app.chapters_area = Some(area);

    let current = app.current_chapter;
    let items: Vec<ListItem> = app
        .book
        .chapters()
        .iter()
        .enumerate()
        .map(|(i, chapter)| {
            let style = if i == current {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            ListItem::new(Span::styled(chapter.title.clone(), style))
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Cyan)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, area, &mut app.chapter_state);
}

fn render_reader(app: &mut App, frame: &mut Frame, area: Rect) {
    let focused = app.focus == FocusPane::Reader;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(format!(" {} ", app.chapter_title()));

    // One column is kept free for the scrollbar
    let inner = block.inner(area);
    let text_area = Rect {
        width: inner.width.saturating_sub(1),
        ..inner
    };
    app.reader_area = Some(text_area);
    app.reader_height = text_area.height;
    app.set_reader_width(text_area.width);

    frame.render_widget(block, area);

    if app.reader_lines.is_empty() {
        let placeholder =
            Paragraph::new("This chapter is empty").style(Style::default().fg(Color::DarkGray));
        frame.render_widget(placeholder, text_area);
        return;
    }

    let selected_style = Style::default().bg(Color::Blue).fg(Color::White);
    let start = app.reader_scroll as usize;
    let end = (start + text_area.height as usize).min(app.reader_lines.len());

    let mut lines: Vec<Line> = Vec::with_capacity(end.saturating_sub(start));
    for idx in start..end {
        let row = &app.reader_lines[idx];
        let base = match row.kind {
            LineKind::Heading => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            LineKind::Code => Style::default().fg(Color::Green),
            LineKind::Body | LineKind::Blank => Style::default(),
        };

        match app.selection.filter(|s| !s.is_empty()) {
            Some(selection) => {
                // Per-character styling only on rows the selection touches
                let (from, to) = selection.normalized();
                if idx < from.line || idx > to.line {
                    lines.push(Line::from(Span::styled(row.text.clone(), base)));
                } else {
                    let spans: Vec<Span> = row
                        .text
                        .chars()
                        .enumerate()
                        .map(|(col, c)| {
                            let style = if selection.contains(idx, col) {
                                selected_style
                            } else {
                                base
                            };
                            Span::styled(c.to_string(), style)
                        })
                        .collect();
                    lines.push(Line::from(spans));
                }
            }
            None => lines.push(Line::from(Span::styled(row.text.clone(), base))),
        }
    }

    frame.render_widget(Paragraph::new(lines), text_area);

    let total = rows_u16(app.reader_lines.len());
    if total > app.reader_height {
        let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight)
            .begin_symbol(Some("^"))
            .end_symbol(Some("v"));
        let mut scrollbar_state =
            ScrollbarState::new(total as usize).position(app.reader_scroll as usize);

        frame.render_stateful_widget(
            scrollbar,
            area.inner(Margin {
                vertical: 1,
                horizontal: 0,
            }),
            &mut scrollbar_state,
        );
    }
}

/// Build the wrapped chat transcript for the given width
pub fn chat_lines(turns: &[ChatTurn], loading: bool, animation_frame: u8, width: usize) -> Vec<Line<'static>> {
    let mut lines: Vec<Line<'static>> = Vec::new();

    if turns.is_empty() && !loading {
        for row in wrap_text_to_width(
            "Ask a question about the book. Select text in the reader to ask about a passage.",
            width,
        ) {
            lines.push(Line::from(Span::styled(row, Style::default().fg(Color::DarkGray))));
        }
        return lines;
    }

    let you_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let assistant_style = Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD);
    let dim = Style::default().fg(Color::DarkGray);

    for turn in turns {
        lines.push(Line::from(vec![
            Span::styled("You", you_style),
            Span::styled(format!("  {}", format_local_time(&turn.timestamp)), dim),
        ]));
        for row in wrap_text_to_width(&turn.question, width) {
            lines.push(Line::from(row));
        }
        lines.push(Line::default());

        if turn.is_pending() {
            continue;
        }

        lines.push(Line::from(Span::styled("Assistant", assistant_style)));
        if turn.retrieval_mode == RetrievalMode::Selected {
            lines.push(Line::from(Span::styled(
                "Answer based on selected text",
                Style::default().fg(Color::Magenta).add_modifier(Modifier::ITALIC),
            )));
        }
        for paragraph in turn.answer.lines() {
            for row in wrap_text_to_width(paragraph, width) {
                lines.push(parse_markdown_line(&row));
            }
        }

        if !turn.sources.is_empty() {
            lines.push(Line::from(Span::styled(
                "Sources:",
                Style::default().add_modifier(Modifier::BOLD),
            )));
            for source in &turn.sources {
                for row in wrap_text_to_width(&format!("- {}", format_source(source)), width) {
                    lines.push(Line::from(Span::styled(row, dim)));
                }
            }
        }
        lines.push(Line::default());
    }

    if loading {
        lines.push(Line::from(Span::styled("Assistant", assistant_style)));
        // Animated ellipsis: cycles through ".", "..", "..."
        let dots = ".".repeat((animation_frame as usize) + 1);
        lines.push(Line::from(Span::styled(
            format!("Thinking{}", dots),
            dim.add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

fn render_chat(app: &mut App, frame: &mut Frame, area: Rect) {
    app.chat_area = Some(area);
    let focused = matches!(app.focus, FocusPane::Chat | FocusPane::Sources)
        || app.input_mode == InputMode::Editing;
    let border_color = if focused { Color::Cyan } else { Color::DarkGray };

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(" Book Assistant ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let error = app.chat.as_ref().and_then(|c| c.error()).map(str::to_string);
    let selection = app.observer.context();
    let sources_len = app.latest_sources().len();

    let error_height = if error.is_some() { 1 } else { 0 };
    let selection_height = if selection.is_some() { 2 } else { 0 };
    let sources_height = if sources_len > 0 {
        (sources_len.min(5) + 2) as u16
    } else {
        0
    };

    let [error_area, selection_area, history_area, sources_area, input_area] =
        Layout::vertical([
            Constraint::Length(error_height),
            Constraint::Length(selection_height),
            Constraint::Min(0),
            Constraint::Length(sources_height),
            Constraint::Length(3),
        ])
        .areas(inner);

    if let Some(error) = error {
        let banner = Paragraph::new(Line::from(vec![
            Span::styled(" ! ", Style::default().bg(Color::Red).fg(Color::White).bold()),
            Span::styled(format!(" {}", error), Style::default().fg(Color::Red)),
        ]));
        frame.render_widget(banner, error_area);
    }

    if let Some(text) = selection {
        let banner = Paragraph::new(Text::from(vec![
            Line::from(Span::styled(
                "Question will be answered from selected text",
                Style::default().fg(Color::Magenta).bold(),
            )),
            Line::from(Span::styled(
                selection_preview(&text),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )),
        ]));
        frame.render_widget(banner, selection_area);
    }

    // History, wrapped here so the total height is known for scrolling
    app.chat_height = history_area.height;
    let (turns, loading) = match app.chat.as_ref() {
        Some(chat) => (chat.turns(), chat.loading()),
        None => (&[][..], false),
    };
    let lines = chat_lines(turns, loading, app.animation_frame, history_area.width as usize);
    let total = rows_u16(lines.len());
    app.sync_chat_scroll(total);

    let history = Paragraph::new(lines).scroll((app.chat_scroll, 0));
    frame.render_widget(history, history_area);

    if sources_len > 0 && sources_area.height > 0 {
        let sources_focused = app.focus == FocusPane::Sources;
        let sources_border = if sources_focused { Color::Cyan } else { Color::Magenta };

        let items: Vec<ListItem> = app
            .latest_sources()
            .iter()
            .enumerate()
            .map(|(i, source)| ListItem::new(format!(" {}. {} ", i + 1, format_source(source))))
            .collect();

        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(sources_border))
                    .title(" Sources (Tab to focus, Enter to open) "),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Magenta)
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("> ");

        frame.render_stateful_widget(list, sources_area, &mut app.sources_state);
    }

    render_input(app, frame, input_area);
}

fn render_input(app: &App, frame: &mut Frame, area: Rect) {
    let editing = app.input_mode == InputMode::Editing;
    let border_color = if editing { Color::Yellow } else { Color::DarkGray };
    let title = if app.loading() {
        " Waiting for answer... "
    } else {
        " Ask (i to type) "
    };

    let remaining = Line::from(Span::styled(
        format!(" {} characters remaining ", app.remaining_chars()),
        Style::default().fg(if app.remaining_chars() == 0 {
            Color::Red
        } else {
            Color::DarkGray
        }),
    ))
    .right_aligned();

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border_color))
        .title(title)
        .title_bottom(remaining);

    // Calculate visible portion of input with horizontal scrolling
    let inner_width = area.width.saturating_sub(2) as usize;
    let cursor_pos = app.input_cursor;
    let scroll_offset = if inner_width == 0 {
        0
    } else if cursor_pos >= inner_width {
        cursor_pos - inner_width + 1
    } else {
        0
    };

    let visible_text: String = app
        .input
        .chars()
        .skip(scroll_offset)
        .take(inner_width)
        .collect();

    let input_style = if app.loading() {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default().fg(Color::Cyan)
    };
    let input = Paragraph::new(visible_text).style(input_style).block(block);
    frame.render_widget(input, area);

    if editing {
        let cursor_x = (cursor_pos - scroll_offset) as u16;
        frame.set_cursor_position((area.x + cursor_x + 1, area.y + 1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(section: Option<&str>, score: f64) -> ChunkReference {
        ChunkReference {
            chunk_id: "c1".to_string(),
            chapter_title: "Chapter 3".to_string(),
            section_title: section.map(str::to_string),
            score,
            text_preview: String::new(),
        }
    }

    fn line_text(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn test_format_source_with_and_without_section() {
        assert_eq!(
            format_source(&source(Some("Inverse Kinematics"), 0.92)),
            "Chapter 3 - Inverse Kinematics (relevance: 92%)"
        );
        assert_eq!(format_source(&source(None, 0.5)), "Chapter 3 (relevance: 50%)");
    }

    #[test]
    fn test_unparseable_timestamp_is_shown_as_given() {
        assert_eq!(format_local_time("yesterday"), "yesterday");
        assert_eq!(format_local_time("2024-05-01T10:30:00Z").len(), 5);
    }

    #[test]
    fn test_timestamp_without_offset_is_local_time() {
        assert_eq!(format_local_time("2025-12-26T10:00:00"), "10:00");
        assert_eq!(format_local_time("2025-12-26T21:05:09.123456"), "21:05");
    }

    #[test]
    fn test_selection_preview_truncates() {
        let long = "a".repeat(150);
        let preview = selection_preview(&long);
        assert!(preview.ends_with("...\""));
        assert_eq!(preview.chars().count(), SELECTION_PREVIEW_CHARS + 5);
        assert_eq!(selection_preview("two\n lines"), "\"two lines\"");
    }

    #[test]
    fn test_parse_markdown_line_bold() {
        let line = parse_markdown_line("a **b** c **d");
        assert_eq!(line.spans.len(), 3);
        assert_eq!(line.spans[1].content, "b");
        assert!(line.spans[1].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(line.spans[2].content, " c **d");
    }

    #[test]
    fn test_empty_chat_shows_hint() {
        let lines = chat_lines(&[], false, 0, 200);
        assert_eq!(lines.len(), 1);
        assert!(line_text(&lines[0]).starts_with("Ask a question"));
    }

    #[test]
    fn test_pending_turn_renders_as_user_with_thinking() {
        let turns = vec![ChatTurn::pending(
            "What is IK?",
            RetrievalMode::Default,
            "2024-05-01T10:30:00Z".to_string(),
        )];
        let lines = chat_lines(&turns, true, 2, 80);
        let text: Vec<String> = lines.iter().map(line_text).collect();

        assert!(text[0].starts_with("You"));
        assert_eq!(text[1], "What is IK?");
        assert!(!text.iter().any(|l| l.starts_with("Sources")));
        assert_eq!(text.last().map(String::as_str), Some("Thinking..."));
    }

    #[test]
    fn test_selected_answer_shows_marker_and_sources() {
        let turn = ChatTurn {
            chat_id: Some("chat-1".to_string()),
            question: "Explain".to_string(),
            answer: "It maps poses to joints.".to_string(),
            sources: vec![source(Some("Inverse Kinematics"), 0.92)],
            timestamp: "2024-05-01T10:30:00Z".to_string(),
            retrieval_mode: RetrievalMode::Selected,
        };
        let lines = chat_lines(&[turn], false, 0, 80);
        let text: Vec<String> = lines.iter().map(line_text).collect();

        assert!(text.contains(&"Answer based on selected text".to_string()));
        assert!(text.contains(&"It maps poses to joints.".to_string()));
        assert!(text.contains(&"- Chapter 3 - Inverse Kinematics (relevance: 92%)".to_string()));
    }
}
