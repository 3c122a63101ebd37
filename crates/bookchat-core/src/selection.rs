//! Text selection capture
//!
//! The host (whatever renders the book) owns a [`HostEvents`] source and emits
//! a [`HostEvent`] whenever the reader releases a selection gesture. A
//! [`SelectionObserver`] subscribes to that source and keeps the most recent
//! acceptable selection as ambient context for the next question. Dropping
//! the observer unregisters it.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::debug;

pub const DEFAULT_MAX_SELECTION_LENGTH: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    /// Mouse button released after a drag
    Pointer,
    /// Keyboard selection confirmed (the terminal's touch-end)
    Keyboard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    Released {
        kind: ReleaseKind,
        /// The host's current selection, read at release time
        selection: Option<String>,
    },
}

type Listener = Box<dyn Fn(&HostEvent) + Send + Sync>;
type ListenerList = Mutex<Vec<(u64, Arc<Listener>)>>;

/// Host-side event source that observers subscribe to
#[derive(Default)]
pub struct HostEvents {
    listeners: Arc<ListenerList>,
    next_id: Mutex<u64>,
}

impl HostEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HostEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next_id = self.next_id.lock();
            *next_id += 1;
            *next_id
        };
        self.listeners.lock().push((id, Arc::new(Box::new(listener))));
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn emit(&self, event: HostEvent) {
        // Snapshot so a listener may subscribe or unsubscribe while handling
        let listeners: Vec<Arc<Listener>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Registration guard; the listener is removed when this is dropped
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerList>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Default)]
struct SelectionState {
    context: Option<String>,
    open_requested: bool,
}

/// Holds the reader's current selection for the next question
pub struct SelectionObserver {
    state: Arc<Mutex<SelectionState>>,
    _subscription: Subscription,
}

impl SelectionObserver {
    pub fn attach(events: &HostEvents, max_len: usize) -> Self {
        let state = Arc::new(Mutex::new(SelectionState::default()));
        let shared = Arc::clone(&state);

        let subscription = events.subscribe(move |event| {
            let HostEvent::Released { kind, selection } = event;
            let Some(text) = selection.as_deref().and_then(|s| accept_selection(s, max_len)) else {
                return;
            };
            debug!(?kind, chars = text.chars().count(), "selection captured");
            let mut state = shared.lock();
            state.context = Some(text);
            state.open_requested = true;
        });

        Self {
            state,
            _subscription: subscription,
        }
    }

    pub fn context(&self) -> Option<String> {
        self.state.lock().context.clone()
    }

    pub fn has_context(&self) -> bool {
        self.state.lock().context.is_some()
    }

    /// True once per capture: the host should open the chat widget
    pub fn take_open_request(&self) -> bool {
        std::mem::take(&mut self.state.lock().open_requested)
    }

    /// Explicit dismissal
    pub fn clear(&self) {
        self.state.lock().context = None;
    }

    /// Clear the context after it was used, unless a newer selection replaced it
    pub fn consume_if(&self, used: &str) -> bool {
        let mut state = self.state.lock();
        if state.context.as_deref() == Some(used) {
            state.context = None;
            true
        } else {
            false
        }
    }
}

/// Trimmed selection, if non-empty and shorter than `max_len` characters
pub fn accept_selection(selection: &str, max_len: usize) -> Option<String> {
    let trimmed = selection.trim();
    if trimmed.is_empty() || trimmed.chars().count() >= max_len {
        return None;
    }
    Some(trimmed.to_string())
}
