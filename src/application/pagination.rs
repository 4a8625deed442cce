//! Shared cursor pagination helpers.
//!
//! Listings in this service are all ordered by `(created_at DESC, id DESC)`,
//! so a cursor is the position of the last row handed out. Cursors are opaque
//! to clients: JSON, then URL-safe base64.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CursorKind {
    Thread,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct CursorPayload {
    kind: CursorKind,
    created_at: OffsetDateTime,
    id: Uuid,
}

fn encode_payload(payload: CursorPayload) -> String {
    match serde_json::to_vec(&payload) {
        Ok(serialized) => URL_SAFE_NO_PAD.encode(serialized),
        // A payload of a timestamp and a uuid always serializes.
        Err(_) => String::new(),
    }
}

fn decode_payload(cursor: &str, expected: CursorKind) -> Result<CursorPayload, PaginationError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
    let payload: CursorPayload = serde_json::from_slice(&bytes)
        .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
    if payload.kind != expected {
        return Err(PaginationError::InvalidCursor(
            "cursor belongs to a different listing".to_string(),
        ));
    }
    Ok(payload)
}

/// Cursor for thread listings in reverse chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCursor {
    created_at: OffsetDateTime,
    id: Uuid,
}

impl ThreadCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> String {
        encode_payload(CursorPayload {
            kind: CursorKind::Thread,
            created_at: self.created_at,
            id: self.id,
        })
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let payload = decode_payload(cursor, CursorKind::Thread)?;
        Ok(Self::new(payload.created_at, payload.id))
    }
}

/// Cursor for the user directory, newest accounts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserCursor {
    created_at: OffsetDateTime,
    id: Uuid,
}

impl UserCursor {
    pub fn new(created_at: OffsetDateTime, id: Uuid) -> Self {
        Self { created_at, id }
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn encode(&self) -> String {
        encode_payload(CursorPayload {
            kind: CursorKind::User,
            created_at: self.created_at,
            id: self.id,
        })
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let payload = decode_payload(cursor, CursorKind::User)?;
        Ok(Self::new(payload.created_at, payload.id))
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }

    /// Limit clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn bounded_limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }
}

/// Cursor-aware page result. `next_cursor` is present exactly when more rows exist.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }

    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> CursorPage<U> {
        CursorPage {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}
