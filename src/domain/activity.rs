//! Activity view entries and the merge that orders them.

use std::cmp::Ordering;

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::entities::UserSummary;
use crate::domain::types::ActivityKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub thread_id: Uuid,
    pub thread_text: String,
    /// Thread the entry's thread replies to, for comment entries.
    pub parent_id: Option<Uuid>,
    /// The other user involved: the liker, the commenter, or the mention sender.
    pub actor: Option<UserSummary>,
    /// Author of the parent thread, for the user's own comments.
    pub parent_author: Option<UserSummary>,
    /// Read flag, carried for mention entries only.
    pub read: Option<bool>,
}

impl ActivityEntry {
    pub fn new(
        kind: ActivityKind,
        occurred_at: OffsetDateTime,
        thread_id: Uuid,
        thread_text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            occurred_at,
            thread_id,
            thread_text: thread_text.into(),
            parent_id: None,
            actor: None,
            parent_author: None,
            read: None,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_actor(mut self, actor: UserSummary) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_parent_author(mut self, author: UserSummary) -> Self {
        self.parent_author = Some(author);
        self
    }

    pub fn with_read(mut self, read: bool) -> Self {
        self.read = Some(read);
        self
    }
}

/// Concatenate activity sources and order them newest first.
///
/// Ties on timestamp fall back to thread id, then kind, so that repeated
/// requests over unchanged data render identically.
pub fn merge<I>(sources: I) -> Vec<ActivityEntry>
where
    I: IntoIterator<Item = Vec<ActivityEntry>>,
{
    let mut merged: Vec<ActivityEntry> = sources.into_iter().flatten().collect();
    merged.sort_by(compare_newest_first);
    merged
}

fn compare_newest_first(a: &ActivityEntry, b: &ActivityEntry) -> Ordering {
    b.occurred_at
        .cmp(&a.occurred_at)
        .then_with(|| b.thread_id.cmp(&a.thread_id))
        .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
}
