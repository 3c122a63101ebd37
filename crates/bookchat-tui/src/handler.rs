use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::layout::Rect;
use tracing::debug;

use crate::app::{App, FocusPane, InputMode};
use crate::tui::AppEvent;

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Mouse(mouse) => handle_mouse(app, mouse),
        AppEvent::Resize(width, height) => {
            debug!(width, height, "terminal resized");
        }
        AppEvent::Tick => {
            app.tick_animation();
        }
    }
    app.poll_tasks().await;
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    match app.input_mode {
        InputMode::Normal => handle_normal_mode(app, key),
        InputMode::Editing => handle_editing_mode(app, key),
    }
}

fn handle_normal_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('q') => {
            app.should_quit = true;
            return;
        }
        KeyCode::Char('c') => {
            app.toggle_chat();
            return;
        }
        KeyCode::Tab => {
            cycle_focus(app);
            return;
        }
        _ => {}
    }

    app.status = None;
    match app.focus {
        FocusPane::Chapters => handle_chapters(app, key),
        FocusPane::Reader => handle_reader(app, key),
        FocusPane::Chat => handle_chat(app, key),
        FocusPane::Sources => handle_sources(app, key),
    }
}

fn cycle_focus(app: &mut App) {
    let has_sources = !app.latest_sources().is_empty();
    app.focus = match app.focus {
        FocusPane::Chapters => FocusPane::Reader,
        FocusPane::Reader if app.chat_open => FocusPane::Chat,
        FocusPane::Reader => FocusPane::Chapters,
        FocusPane::Chat if has_sources => {
            if app.sources_state.selected().is_none() {
                app.sources_state.select(Some(0));
            }
            FocusPane::Sources
        }
        FocusPane::Chat | FocusPane::Sources => FocusPane::Chapters,
    };
}

fn handle_chapters(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.chapters_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.chapters_nav_up(),
        KeyCode::Char('g') => app.chapter_state.select(Some(0)),
        KeyCode::Char('G') => {
            let last = app.book.len().saturating_sub(1);
            app.chapter_state.select(Some(last));
        }
        KeyCode::Enter | KeyCode::Char('l') | KeyCode::Right => app.open_selected_chapter(),
        _ => {}
    }
}

fn handle_reader(app: &mut App, key: KeyEvent) {
    if app.is_visual() {
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => app.move_visual(true),
            KeyCode::Char('k') | KeyCode::Up => app.move_visual(false),
            KeyCode::Char('y') | KeyCode::Enter => app.confirm_visual(),
            KeyCode::Esc | KeyCode::Char('v') => app.clear_reader_selection(),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_half_page_down();
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.scroll_half_page_up();
        }
        KeyCode::Char('j') | KeyCode::Down => app.scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.scroll_up(1),
        KeyCode::PageDown | KeyCode::Char(' ') => app.scroll_half_page_down(),
        KeyCode::PageUp => app.scroll_half_page_up(),
        KeyCode::Char('g') => app.scroll_to_top(),
        KeyCode::Char('G') => app.scroll_to_bottom(),
        KeyCode::Char('n') => app.next_chapter(),
        KeyCode::Char('p') => app.prev_chapter(),
        KeyCode::Char('v') => app.start_visual(),
        KeyCode::Char('x') | KeyCode::Esc => app.dismiss_selection(),
        KeyCode::Char('h') | KeyCode::Left => app.focus = FocusPane::Chapters,
        _ => {}
    }
}

fn handle_chat(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('i') | KeyCode::Enter => {
            app.clear_chat_error();
            app.input_mode = InputMode::Editing;
        }
        KeyCode::Char('j') | KeyCode::Down => app.chat_scroll_down(1),
        KeyCode::Char('k') | KeyCode::Up => app.chat_scroll_up(1),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.chat_scroll_down((app.chat_height / 2).max(1));
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.chat_scroll_up((app.chat_height / 2).max(1));
        }
        KeyCode::Char(c @ '1'..='5') => {
            if let Some(rating) = c.to_digit(10) {
                app.rate_latest_answer(rating as u8);
            }
        }
        KeyCode::Char('C') => app.clear_conversation(),
        KeyCode::Char('x') => app.dismiss_selection(),
        KeyCode::Esc => app.clear_chat_error(),
        _ => {}
    }
}

fn handle_sources(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.sources_nav_down(),
        KeyCode::Char('k') | KeyCode::Up => app.sources_nav_up(),
        KeyCode::Enter => app.jump_to_selected_source(),
        KeyCode::Esc => app.focus = FocusPane::Chat,
        _ => {}
    }
}

fn handle_editing_mode(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::Normal;
        }
        KeyCode::Enter => {
            if app.can_submit() {
                app.submit_question();
                app.input_mode = InputMode::Normal;
            }
        }
        KeyCode::Backspace => {
            if app.input_cursor > 0 {
                app.input_cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.input_cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.input_cursor = app.input_cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.input_cursor = (app.input_cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.input_cursor = 0;
        }
        KeyCode::End => {
            app.input_cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            if app.remaining_chars() > 0 {
                let byte_pos = char_to_byte_index(&app.input, app.input_cursor);
                app.input.insert(byte_pos, c);
                app.input_cursor += 1;
            }
        }
        _ => {}
    }
}

/// Check if a point is within a rectangle
fn point_in_rect(x: u16, y: u16, rect: Rect) -> bool {
    x >= rect.x && x < rect.x + rect.width && y >= rect.y && y < rect.y + rect.height
}

fn handle_mouse(app: &mut App, mouse: MouseEvent) {
    let x = mouse.column;
    let y = mouse.row;

    let in_chapters = app.chapters_area.is_some_and(|r| point_in_rect(x, y, r));
    let in_reader = app.reader_area.is_some_and(|r| point_in_rect(x, y, r));
    let in_chat = app.chat_open && app.chat_area.is_some_and(|r| point_in_rect(x, y, r));

    match mouse.kind {
        MouseEventKind::Down(MouseButton::Left) => {
            if let Some(point) = app.reader_point_at(x, y) {
                app.focus = FocusPane::Reader;
                app.start_drag(point);
            } else if in_chapters {
                app.focus = FocusPane::Chapters;
            } else if in_chat {
                app.focus = FocusPane::Chat;
            }
        }
        MouseEventKind::Drag(MouseButton::Left) => {
            if let Some(point) = app.reader_point_at(x, y) {
                app.extend_drag(point);
            }
        }
        MouseEventKind::Up(MouseButton::Left) => {
            if let Some(point) = app.reader_point_at(x, y) {
                app.extend_drag(point);
            }
            app.finish_drag();
        }
        MouseEventKind::ScrollDown => {
            if in_reader {
                app.scroll_down(3);
            } else if in_chat {
                app.chat_scroll_down(3);
            } else if in_chapters {
                app.chapters_nav_down();
            }
        }
        MouseEventKind::ScrollUp => {
            if in_reader {
                app.scroll_up(3);
            } else if in_chat {
                app.chat_scroll_up(3);
            } else if in_chapters {
                app.chapters_nav_up();
            }
        }
        _ => {}
    }
}
