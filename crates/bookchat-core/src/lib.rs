pub mod api;
pub mod book;
pub mod config;
pub mod selection;
pub mod session;
pub mod state;

// Re-export main types for convenience
pub use api::{ChatApiClient, ChatBackend, RequestError, DEFAULT_API_BASE_URL, DEFAULT_HISTORY_LIMIT};
pub use book::{Book, BookError, Chapter};
pub use config::Config;
pub use selection::{accept_selection, HostEvent, HostEvents, ReleaseKind, SelectionObserver, Subscription};
pub use session::{ChatSession, PendingSend, SendOutcome, SendRejected};
pub use state::{ChatResponse, ChatTurn, ChunkReference, RetrievalMode};
