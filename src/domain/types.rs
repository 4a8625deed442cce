//! Shared domain enumerations aligned with persisted database enums.

pub use threadline_api_types::{ActivityKind, NotificationKind, RealtimeChannel, RealtimeEventKind};

/// Which of an author's threads a listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadScope {
    /// Threads without a parent.
    TopLevel,
    /// Threads that reply to another thread.
    Replies,
    All,
}
