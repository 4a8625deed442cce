use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::application::notifications::{NotificationError, NotificationService};
use crate::application::pagination::{CursorPage, PageRequest, PaginationError, ThreadCursor};
use crate::application::realtime::{RealtimeEvent, RealtimeHub};
use crate::application::repos::{
    CreateNotificationParams, CreateThreadParams, LikesRepo, LikesWriteRepo, RepoError,
    ThreadsRepo, ThreadsWriteRepo, UpdateThreadParams,
};
use crate::application::users::UserService;
use crate::domain::entities::{ThreadRecord, UserRecord, UserSummary};
use crate::domain::error::DomainError;
use crate::domain::types::{NotificationKind, RealtimeChannel, RealtimeEventKind, ThreadScope};
use crate::domain::{mentions, threads};

pub const METRIC_THREADS_CREATED: &str = "threadline_threads_created_total";
pub const METRIC_LIKES_TOGGLED: &str = "threadline_likes_toggled_total";

const FEED_REPLY_DEPTH: usize = 1;
const DETAIL_REPLY_DEPTH: usize = 2;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("thread not found")]
    NotFound,
    #[error("only the author may change this thread")]
    Forbidden,
    #[error(transparent)]
    Pagination(#[from] PaginationError),
    #[error(transparent)]
    Repo(RepoError),
}

impl From<RepoError> for ThreadError {
    fn from(error: RepoError) -> Self {
        match error {
            RepoError::NotFound => ThreadError::NotFound,
            RepoError::Pagination(err) => ThreadError::Pagination(err),
            other => ThreadError::Repo(other),
        }
    }
}

impl From<NotificationError> for ThreadError {
    fn from(error: NotificationError) -> Self {
        match error {
            NotificationError::Repo(err) => err.into(),
            NotificationError::NotFound => ThreadError::NotFound,
            NotificationError::Forbidden => ThreadError::Forbidden,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ThreadInput {
    pub text: String,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageRemoval {
    pub thread: ThreadRecord,
    pub previous: Option<String>,
}

/// A thread with everything needed to render it.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadNode {
    #[serde(flatten)]
    pub thread: ThreadRecord,
    pub author: Option<UserSummary>,
    pub likes: Vec<UserSummary>,
    /// Users resolved from `thread.tags`.
    pub tagged: Vec<UserSummary>,
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    pub fn liked_by(&self, user_id: Uuid) -> bool {
        self.likes.iter().any(|like| like.id == user_id)
    }
}

/// One of a user's comments, shown next to what it answers.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyView {
    pub reply: ThreadNode,
    pub parent: Option<ThreadRecord>,
    pub parent_author: Option<UserSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LikeToggle {
    pub thread_id: Uuid,
    pub liked: bool,
    pub likes: Vec<UserSummary>,
}

#[derive(Clone)]
pub struct ThreadService {
    reader: Arc<dyn ThreadsRepo>,
    writer: Arc<dyn ThreadsWriteRepo>,
    likes: Arc<dyn LikesRepo>,
    likes_writer: Arc<dyn LikesWriteRepo>,
    users: Arc<UserService>,
    notifications: Arc<NotificationService>,
    realtime: RealtimeHub,
}

impl ThreadService {
    pub fn new(
        reader: Arc<dyn ThreadsRepo>,
        writer: Arc<dyn ThreadsWriteRepo>,
        likes: Arc<dyn LikesRepo>,
        likes_writer: Arc<dyn LikesWriteRepo>,
        users: Arc<UserService>,
        notifications: Arc<NotificationService>,
        realtime: RealtimeHub,
    ) -> Self {
        Self {
            reader,
            writer,
            likes,
            likes_writer,
            users,
            notifications,
            realtime,
        }
    }

    pub async fn create_thread(
        &self,
        author: &UserRecord,
        input: ThreadInput,
    ) -> Result<ThreadRecord, ThreadError> {
        self.insert(author, None, input).await
    }

    /// Reply to `parent_id`; the parent's author hears about it unless they wrote the reply.
    pub async fn add_comment(
        &self,
        author: &UserRecord,
        parent_id: Uuid,
        input: ThreadInput,
    ) -> Result<ThreadRecord, ThreadError> {
        let parent = self
            .reader
            .find_by_id(parent_id)
            .await?
            .ok_or(ThreadError::NotFound)?;

        let comment = self.insert(author, Some(parent.id), input).await?;

        self.notify(CreateNotificationParams {
            recipient_id: parent.author_id,
            sender_id: author.id,
            kind: NotificationKind::Comment,
            thread_id: Some(parent.id),
        })
        .await;

        self.realtime.publish(RealtimeEvent::new(
            RealtimeChannel::ThreadComments,
            RealtimeEventKind::CommentAdded,
            Some(parent.id),
            json!({
                "thread_id": parent.id,
                "comment_id": comment.id,
                "author": author.username,
            }),
        ));

        Ok(comment)
    }

    async fn insert(
        &self,
        author: &UserRecord,
        parent_id: Option<Uuid>,
        input: ThreadInput,
    ) -> Result<ThreadRecord, ThreadError> {
        let text = threads::validate_text(&input.text)?;
        let image_url = threads::validate_image_url(input.image_url.as_deref())?;
        let tagged = self.resolve_mentions(&text).await;

        let record = self
            .writer
            .create_thread(CreateThreadParams {
                author_id: author.id,
                parent_id,
                text,
                image_url,
                tags: tagged.iter().map(|user| user.id).collect(),
            })
            .await?;

        counter!(
            METRIC_THREADS_CREATED,
            "kind" => if record.is_reply() { "comment" } else { "thread" }
        )
        .increment(1);
        info!(
            target = "threadline::application::threads",
            thread_id = %record.id,
            author_id = %author.id,
            parent_id = ?record.parent_id,
            tags = record.tags.len(),
            "thread created"
        );

        self.notify_mentions(author.id, record.id, &record.tags).await;
        Ok(record)
    }

    pub async fn update_thread(
        &self,
        author: &UserRecord,
        id: Uuid,
        input: ThreadInput,
    ) -> Result<ThreadRecord, ThreadError> {
        let existing = self.owned_thread(author, id).await?;
        let text = threads::validate_text(&input.text)?;
        let image_url = threads::validate_image_url(input.image_url.as_deref())?;
        let tags: Vec<Uuid> = self
            .resolve_mentions(&text)
            .await
            .iter()
            .map(|user| user.id)
            .collect();

        let updated = self
            .writer
            .update_thread(UpdateThreadParams {
                id,
                text,
                image_url,
                tags,
            })
            .await?;

        let added: Vec<Uuid> = updated
            .tags
            .iter()
            .copied()
            .filter(|tag| !existing.tags.contains(tag))
            .collect();
        self.notify_mentions(author.id, updated.id, &added).await;
        Ok(updated)
    }

    /// Clear the thread's image, handing back the URL it had.
    pub async fn remove_image(
        &self,
        author: &UserRecord,
        id: Uuid,
    ) -> Result<ImageRemoval, ThreadError> {
        let previous = self.owned_thread(author, id).await?.image_url;
        let thread = self.writer.clear_image(id).await?;
        Ok(ImageRemoval { thread, previous })
    }

    /// Add tags to a thread. Only its author may do this.
    pub async fn tag_users(
        &self,
        author: &UserRecord,
        thread_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<ThreadRecord, ThreadError> {
        self.owned_thread(author, thread_id).await?;
        Ok(self.writer.add_tags(thread_id, user_ids).await?)
    }

    /// Like the thread, or take the like back if it is already there.
    pub async fn toggle_like(
        &self,
        user: &UserRecord,
        thread_id: Uuid,
    ) -> Result<LikeToggle, ThreadError> {
        let thread = self
            .reader
            .find_by_id(thread_id)
            .await?
            .ok_or(ThreadError::NotFound)?;

        let liked = if self.likes_writer.remove_like(thread.id, user.id).await? {
            false
        } else {
            self.likes_writer.add_like(thread.id, user.id).await?;
            true
        };

        counter!(METRIC_LIKES_TOGGLED, "action" => if liked { "added" } else { "removed" })
            .increment(1);

        if liked {
            self.notify(CreateNotificationParams {
                recipient_id: thread.author_id,
                sender_id: user.id,
                kind: NotificationKind::Like,
                thread_id: Some(thread.id),
            })
            .await;
        }

        let likes: Vec<UserSummary> = self
            .likes
            .list_for_threads(&[thread.id])
            .await?
            .into_iter()
            .map(|like| like.user)
            .collect();

        self.realtime.publish(RealtimeEvent::new(
            RealtimeChannel::ThreadLikes,
            if liked {
                RealtimeEventKind::LikeAdded
            } else {
                RealtimeEventKind::LikeRemoved
            },
            Some(thread.id),
            json!({
                "thread_id": thread.id,
                "user_id": user.id,
                "likes": likes.len(),
            }),
        ));

        Ok(LikeToggle {
            thread_id: thread.id,
            liked,
            likes,
        })
    }

    /// Delete a thread with its whole reply tree. Deleting something already gone is a no-op.
    pub async fn delete_thread(&self, user: &UserRecord, id: Uuid) -> Result<u64, ThreadError> {
        let Some(thread) = self.reader.find_by_id(id).await? else {
            return Ok(0);
        };
        if thread.author_id != user.id {
            return Err(ThreadError::Forbidden);
        }

        let mut doomed = vec![thread.id];
        doomed.extend(self.reader.descendant_ids(thread.id).await?);

        let notifications = self.notifications.purge_for_threads(&doomed).await?;
        let deleted = self.writer.delete_threads(&doomed).await?;
        info!(
            target = "threadline::application::threads",
            thread_id = %thread.id,
            deleted,
            notifications,
            "thread tree deleted"
        );
        Ok(deleted)
    }

    pub async fn fetch_feed(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<CursorPage<ThreadNode>, ThreadError> {
        let cursor = cursor.map(ThreadCursor::decode).transpose()?;
        let page = self
            .reader
            .list_feed(PageRequest::new(
                limit.unwrap_or(threads::FEED_PAGE_SIZE),
                cursor,
            ))
            .await?;
        let items = self.assemble(page.items, FEED_REPLY_DEPTH).await?;
        Ok(CursorPage::new(items, page.next_cursor))
    }

    /// A thread with its replies and their replies.
    pub async fn fetch_thread(&self, id: Uuid) -> Result<Option<ThreadNode>, ThreadError> {
        let Some(thread) = self.reader.find_by_id(id).await? else {
            return Ok(None);
        };
        Ok(self
            .assemble(vec![thread], DETAIL_REPLY_DEPTH)
            .await?
            .into_iter()
            .next())
    }

    pub async fn list_likers(&self, thread_id: Uuid) -> Result<Vec<UserSummary>, ThreadError> {
        if self.reader.find_by_id(thread_id).await?.is_none() {
            return Err(ThreadError::NotFound);
        }
        Ok(self
            .likes
            .list_for_threads(&[thread_id])
            .await?
            .into_iter()
            .map(|like| like.user)
            .collect())
    }

    pub async fn list_user_threads(&self, user_id: Uuid) -> Result<Vec<ThreadNode>, ThreadError> {
        let threads = self
            .reader
            .list_by_author(user_id, ThreadScope::TopLevel)
            .await?;
        Ok(self.assemble(threads, FEED_REPLY_DEPTH).await?)
    }

    pub async fn list_user_replies(&self, user_id: Uuid) -> Result<Vec<ReplyView>, ThreadError> {
        let replies = self
            .reader
            .list_by_author(user_id, ThreadScope::Replies)
            .await?;
        if replies.is_empty() {
            return Ok(Vec::new());
        }

        let mut parent_ids: Vec<Uuid> = replies.iter().filter_map(|r| r.parent_id).collect();
        parent_ids.sort_unstable();
        parent_ids.dedup();
        let parents: HashMap<Uuid, ThreadRecord> = self
            .reader
            .find_many(&parent_ids)
            .await?
            .into_iter()
            .map(|parent| (parent.id, parent))
            .collect();
        let parent_authors: Vec<Uuid> = parents.values().map(|p| p.author_id).collect();
        let authors = self.users.summaries(&parent_authors).await?;

        let nodes = self.assemble(replies, 0).await?;
        Ok(nodes
            .into_iter()
            .map(|reply| {
                let parent = reply
                    .thread
                    .parent_id
                    .and_then(|id| parents.get(&id).cloned());
                let parent_author = parent
                    .as_ref()
                    .and_then(|p| authors.get(&p.author_id).cloned());
                ReplyView {
                    reply,
                    parent,
                    parent_author,
                }
            })
            .collect())
    }

    /// Threads whose text mentions the user by name.
    pub async fn list_tagged_threads(
        &self,
        user: &UserRecord,
    ) -> Result<Vec<ThreadNode>, ThreadError> {
        let threads = self.reader.list_mentioning(&user.username).await?;
        let threads: Vec<ThreadRecord> = threads
            .into_iter()
            .filter(|thread| mentions::mentions_username(&thread.text, &user.username))
            .collect();
        Ok(self.assemble(threads, 0).await?)
    }

    /// Comments other users left on this user's threads, newest first.
    pub async fn replies_to_user(&self, user_id: Uuid) -> Result<Vec<ThreadNode>, ThreadError> {
        let own: Vec<Uuid> = self
            .reader
            .list_by_author(user_id, ThreadScope::All)
            .await?
            .into_iter()
            .map(|thread| thread.id)
            .collect();
        if own.is_empty() {
            return Ok(Vec::new());
        }
        let mut replies: Vec<ThreadRecord> = self
            .reader
            .list_children(&own)
            .await?
            .into_iter()
            .filter(|reply| reply.author_id != user_id)
            .collect();
        replies.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(self.assemble(replies, 0).await?)
    }

    async fn owned_thread(
        &self,
        author: &UserRecord,
        id: Uuid,
    ) -> Result<ThreadRecord, ThreadError> {
        let thread = self
            .reader
            .find_by_id(id)
            .await?
            .ok_or(ThreadError::NotFound)?;
        if thread.author_id != author.id {
            return Err(ThreadError::Forbidden);
        }
        Ok(thread)
    }

    async fn resolve_mentions(&self, text: &str) -> Vec<UserSummary> {
        let usernames = mentions::extract_mentions(text);
        self.users.find_by_usernames(&usernames).await
    }

    async fn notify_mentions(&self, sender_id: Uuid, thread_id: Uuid, tagged: &[Uuid]) {
        for recipient_id in tagged {
            self.notify(CreateNotificationParams {
                recipient_id: *recipient_id,
                sender_id,
                kind: NotificationKind::Mention,
                thread_id: Some(thread_id),
            })
            .await;
        }
    }

    /// Notifications never fail the action that triggered them.
    async fn notify(&self, params: CreateNotificationParams) {
        let kind = params.kind;
        let recipient_id = params.recipient_id;
        if let Err(err) = self.notifications.create(params).await {
            warn!(
                target = "threadline::application::threads",
                error = %err,
                kind = kind.as_str(),
                recipient_id = %recipient_id,
                "failed to record notification"
            );
        }
    }

    /// Load replies `depth` levels down, likes and users for `roots`, and
    /// stitch them into nodes. Root order is preserved.
    async fn assemble(
        &self,
        roots: Vec<ThreadRecord>,
        depth: usize,
    ) -> Result<Vec<ThreadNode>, RepoError> {
        if roots.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_ids: Vec<Uuid> = roots.iter().map(|thread| thread.id).collect();
        let mut user_ids: Vec<Uuid> = Vec::new();
        for thread in &roots {
            collect_user_ids(thread, &mut user_ids);
        }

        let mut children: HashMap<Uuid, Vec<ThreadRecord>> = HashMap::new();
        let mut frontier = all_ids.clone();
        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let level = self.reader.list_children(&frontier).await?;
            frontier = level.iter().map(|thread| thread.id).collect();
            for child in level {
                all_ids.push(child.id);
                collect_user_ids(&child, &mut user_ids);
                if let Some(parent_id) = child.parent_id {
                    children.entry(parent_id).or_default().push(child);
                }
            }
        }

        let mut likes: HashMap<Uuid, Vec<UserSummary>> = HashMap::new();
        for like in self.likes.list_for_threads(&all_ids).await? {
            likes.entry(like.thread_id).or_default().push(like.user);
        }
        let users = self.users.summaries(&user_ids).await?;

        Ok(roots
            .into_iter()
            .map(|root| build_node(root, &mut children, &likes, &users))
            .collect())
    }
}

fn collect_user_ids(thread: &ThreadRecord, into: &mut Vec<Uuid>) {
    into.push(thread.author_id);
    into.extend(thread.tags.iter().copied());
}

fn build_node(
    thread: ThreadRecord,
    children: &mut HashMap<Uuid, Vec<ThreadRecord>>,
    likes: &HashMap<Uuid, Vec<UserSummary>>,
    users: &HashMap<Uuid, UserSummary>,
) -> ThreadNode {
    let replies = children
        .remove(&thread.id)
        .unwrap_or_default()
        .into_iter()
        .map(|child| build_node(child, children, likes, users))
        .collect();
    ThreadNode {
        author: users.get(&thread.author_id).cloned(),
        likes: likes.get(&thread.id).cloned().unwrap_or_default(),
        tagged: thread
            .tags
            .iter()
            .filter_map(|id| users.get(id).cloned())
            .collect(),
        replies,
        thread,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::application::notifications::tests::MemoryNotifications;
    use crate::application::repos::UserLike;
    use crate::application::users::tests::{MemoryUsers, sample_user};
    use crate::domain::entities::LikeRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use time::{Duration, OffsetDateTime};

    #[derive(Default)]
    pub(crate) struct MemoryThreads {
        pub(crate) threads: Mutex<Vec<ThreadRecord>>,
    }

    #[async_trait]
    impl ThreadsRepo for MemoryThreads {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<ThreadRecord>, RepoError> {
            Ok(self.threads.lock().unwrap().iter().find(|t| t.id == id).cloned())
        }

        async fn find_many(&self, ids: &[Uuid]) -> Result<Vec<ThreadRecord>, RepoError> {
            Ok(self
                .threads
                .lock()
                .unwrap()
                .iter()
                .filter(|t| ids.contains(&t.id))
                .cloned()
                .collect())
        }

        async fn list_feed(
            &self,
            page: PageRequest<ThreadCursor>,
        ) -> Result<CursorPage<ThreadRecord>, RepoError> {
            let mut top: Vec<ThreadRecord> = self
                .threads
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.parent_id.is_none())
                .cloned()
                .collect();
            top.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            if let Some(cursor) = page.cursor {
                top.retain(|t| (t.created_at, t.id) < (cursor.created_at(), cursor.id()));
            }
            let limit = page.bounded_limit() as usize;
            let next = if top.len() > limit {
                top.truncate(limit);
                top.last()
                    .map(|t| ThreadCursor::new(t.created_at, t.id).encode())
            } else {
                None
            };
            Ok(CursorPage::new(top, next))
        }

        async fn list_children(&self, parent_ids: &[Uuid]) -> Result<Vec<ThreadRecord>, RepoError> {
            let mut found: Vec<ThreadRecord> = self
                .threads
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.parent_id.is_some_and(|p| parent_ids.contains(&p)))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(found)
        }

        async fn list_by_author(
            &self,
            author_id: Uuid,
            scope: ThreadScope,
        ) -> Result<Vec<ThreadRecord>, RepoError> {
            let mut found: Vec<ThreadRecord> = self
                .threads
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.author_id == author_id)
                .filter(|t| match scope {
                    ThreadScope::TopLevel => !t.is_reply(),
                    ThreadScope::Replies => t.is_reply(),
                    ThreadScope::All => true,
                })
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        }

        async fn list_mentioning(&self, username: &str) -> Result<Vec<ThreadRecord>, RepoError> {
            let mut found: Vec<ThreadRecord> = self
                .threads
                .lock()
                .unwrap()
                .iter()
                .filter(|t| mentions::mentions_username(&t.text, username))
                .cloned()
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        }

        async fn descendant_ids(&self, id: Uuid) -> Result<Vec<Uuid>, RepoError> {
            let threads = self.threads.lock().unwrap();
            let mut found = Vec::new();
            let mut frontier = vec![id];
            while let Some(parent) = frontier.pop() {
                for child in threads.iter().filter(|t| t.parent_id == Some(parent)) {
                    found.push(child.id);
                    frontier.push(child.id);
                }
            }
            Ok(found)
        }
    }

    #[async_trait]
    impl ThreadsWriteRepo for MemoryThreads {
        async fn create_thread(
            &self,
            params: CreateThreadParams,
        ) -> Result<ThreadRecord, RepoError> {
            let mut threads = self.threads.lock().unwrap();
            // Strictly increasing timestamps keep ordering assertions stable.
            let created_at =
                OffsetDateTime::now_utc() + Duration::milliseconds(threads.len() as i64);
            let record = ThreadRecord {
                id: Uuid::new_v4(),
                author_id: params.author_id,
                parent_id: params.parent_id,
                text: params.text,
                image_url: params.image_url,
                tags: params.tags,
                created_at,
                updated_at: created_at,
            };
            threads.push(record.clone());
            Ok(record)
        }

        async fn update_thread(
            &self,
            params: UpdateThreadParams,
        ) -> Result<ThreadRecord, RepoError> {
            let mut threads = self.threads.lock().unwrap();
            let thread = threads
                .iter_mut()
                .find(|t| t.id == params.id)
                .ok_or(RepoError::NotFound)?;
            thread.text = params.text;
            thread.image_url = params.image_url;
            thread.tags = params.tags;
            thread.updated_at = OffsetDateTime::now_utc();
            Ok(thread.clone())
        }

        async fn clear_image(&self, id: Uuid) -> Result<ThreadRecord, RepoError> {
            let mut threads = self.threads.lock().unwrap();
            let thread = threads
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(RepoError::NotFound)?;
            thread.image_url = None;
            Ok(thread.clone())
        }

        async fn add_tags(&self, id: Uuid, user_ids: &[Uuid]) -> Result<ThreadRecord, RepoError> {
            let mut threads = self.threads.lock().unwrap();
            let thread = threads
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or(RepoError::NotFound)?;
            for user_id in user_ids {
                if !thread.tags.contains(user_id) {
                    thread.tags.push(*user_id);
                }
            }
            Ok(thread.clone())
        }

        async fn delete_threads(&self, ids: &[Uuid]) -> Result<u64, RepoError> {
            let mut threads = self.threads.lock().unwrap();
            let before = threads.len();
            threads.retain(|t| !ids.contains(&t.id));
            Ok((before - threads.len()) as u64)
        }
    }

    pub(crate) struct MemoryLikes {
        pub(crate) likes: Mutex<Vec<(Uuid, Uuid, OffsetDateTime)>>,
        pub(crate) users: Arc<MemoryUsers>,
    }

    #[async_trait]
    impl LikesRepo for MemoryLikes {
        async fn list_for_threads(
            &self,
            thread_ids: &[Uuid],
        ) -> Result<Vec<LikeRecord>, RepoError> {
            let users = self.users.users.lock().unwrap();
            Ok(self
                .likes
                .lock()
                .unwrap()
                .iter()
                .filter(|(thread, _, _)| thread_ids.contains(thread))
                .filter_map(|(thread, user, at)| {
                    users.iter().find(|u| u.id == *user).map(|u| LikeRecord {
                        thread_id: *thread,
                        user: u.summary(),
                        created_at: *at,
                    })
                })
                .collect())
        }

        async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<UserLike>, RepoError> {
            let mut found: Vec<UserLike> = self
                .likes
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, user, _)| *user == user_id)
                .map(|(thread, _, at)| UserLike {
                    thread_id: *thread,
                    created_at: *at,
                })
                .collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(found)
        }
    }

    #[async_trait]
    impl LikesWriteRepo for MemoryLikes {
        async fn add_like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
            let mut likes = self.likes.lock().unwrap();
            if likes.iter().any(|(t, u, _)| *t == thread_id && *u == user_id) {
                return Ok(false);
            }
            likes.push((thread_id, user_id, OffsetDateTime::now_utc()));
            Ok(true)
        }

        async fn remove_like(&self, thread_id: Uuid, user_id: Uuid) -> Result<bool, RepoError> {
            let mut likes = self.likes.lock().unwrap();
            let before = likes.len();
            likes.retain(|(t, u, _)| !(*t == thread_id && *u == user_id));
            Ok(likes.len() != before)
        }
    }

    pub(crate) struct Harness {
        pub(crate) service: ThreadService,
        pub(crate) notifications: Arc<NotificationService>,
        pub(crate) notification_store: Arc<MemoryNotifications>,
        pub(crate) threads: Arc<MemoryThreads>,
        pub(crate) likes: Arc<MemoryLikes>,
        pub(crate) users: Arc<UserService>,
        pub(crate) hub: RealtimeHub,
    }

    pub(crate) fn harness(users: Vec<UserRecord>) -> Harness {
        let user_store = Arc::new(MemoryUsers::with(users));
        let user_service = Arc::new(UserService::new(user_store.clone(), user_store.clone()));
        let threads = Arc::new(MemoryThreads::default());
        let likes = Arc::new(MemoryLikes {
            likes: Mutex::new(Vec::new()),
            users: user_store,
        });
        let notification_store = Arc::new(MemoryNotifications::default());
        let notifications = Arc::new(NotificationService::new(
            notification_store.clone(),
            notification_store.clone(),
            threads.clone(),
            user_service.clone(),
        ));
        let hub = RealtimeHub::new(32);
        let service = ThreadService::new(
            threads.clone(),
            threads.clone(),
            likes.clone(),
            likes.clone(),
            user_service.clone(),
            notifications.clone(),
            hub.clone(),
        );
        Harness {
            service,
            notifications,
            notification_store,
            threads,
            likes,
            users: user_service,
            hub,
        }
    }

    fn input(text: &str) -> ThreadInput {
        ThreadInput {
            text: text.to_string(),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn mentions_become_tags_and_notifications() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);

        let thread = h
            .service
            .create_thread(&ada, input("hi @Bob and @ada and @nobody"))
            .await
            .expect("created");

        assert_eq!(thread.tags, vec![bob.id, ada.id]);
        let stored = h.notification_store.items.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].recipient_id, bob.id);
        assert_eq!(stored[0].kind, NotificationKind::Mention);
        assert_eq!(stored[0].thread_id, Some(thread.id));
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let ada = sample_user("ada");
        let h = harness(vec![ada.clone()]);
        let err = h
            .service
            .create_thread(&ada, input("   "))
            .await
            .expect_err("blank text rejected");
        assert!(matches!(err, ThreadError::Domain(DomainError::Validation { .. })));
    }

    #[tokio::test]
    async fn comment_notifies_parent_author_and_publishes() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);
        let mut events = h.hub.subscribe();

        let parent = h.service.create_thread(&ada, input("question")).await.unwrap();
        let comment = h
            .service
            .add_comment(&bob, parent.id, input("answer"))
            .await
            .unwrap();

        assert_eq!(comment.parent_id, Some(parent.id));
        let stored = h.notification_store.items.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::Comment);
        assert_eq!(stored[0].recipient_id, ada.id);

        let event = events.recv().await.expect("comment event");
        assert_eq!(event.event, RealtimeEventKind::CommentAdded);
        assert_eq!(event.thread_id, Some(parent.id));

        let own = h.service.add_comment(&ada, parent.id, input("thanks")).await;
        assert!(own.is_ok());
        assert_eq!(h.notification_store.items.lock().unwrap().len(), 1);

        let missing = h
            .service
            .add_comment(&bob, Uuid::new_v4(), input("lost"))
            .await
            .expect_err("unknown parent");
        assert!(matches!(missing, ThreadError::NotFound));
    }

    #[tokio::test]
    async fn toggling_like_twice_restores_state() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);
        let thread = h.service.create_thread(&ada, input("like me")).await.unwrap();

        let first = h.service.toggle_like(&bob, thread.id).await.unwrap();
        assert!(first.liked);
        assert_eq!(first.likes, vec![bob.summary()]);

        let second = h.service.toggle_like(&bob, thread.id).await.unwrap();
        assert!(!second.liked);
        assert!(second.likes.is_empty());
        assert!(h.likes.likes.lock().unwrap().is_empty());

        let stored = h.notification_store.items.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].kind, NotificationKind::Like);
    }

    #[tokio::test]
    async fn delete_removes_descendants_and_notifications() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let carl = sample_user("carl");
        let h = harness(vec![ada.clone(), bob.clone(), carl.clone()]);

        let root = h.service.create_thread(&ada, input("root")).await.unwrap();
        let child = h
            .service
            .add_comment(&bob, root.id, input("child"))
            .await
            .unwrap();
        h.service
            .add_comment(&carl, child.id, input("grandchild @ada"))
            .await
            .unwrap();
        let other = h.service.create_thread(&bob, input("unrelated")).await.unwrap();

        let err = h.service.delete_thread(&bob, root.id).await.expect_err("not author");
        assert!(matches!(err, ThreadError::Forbidden));

        let deleted = h.service.delete_thread(&ada, root.id).await.unwrap();
        assert_eq!(deleted, 3);
        let remaining: Vec<Uuid> = h.threads.threads.lock().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(remaining, vec![other.id]);
        assert!(h.notification_store.items.lock().unwrap().is_empty());

        assert_eq!(h.service.delete_thread(&ada, root.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn feed_lists_top_level_threads_with_replies() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);

        let first = h.service.create_thread(&ada, input("first")).await.unwrap();
        let second = h.service.create_thread(&bob, input("second")).await.unwrap();
        h.service
            .add_comment(&bob, first.id, input("reply"))
            .await
            .unwrap();

        let page = h.service.fetch_feed(None, Some(1)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].thread.id, second.id);
        assert!(page.has_next());

        let next = h
            .service
            .fetch_feed(page.next_cursor.as_deref(), Some(1))
            .await
            .unwrap();
        assert_eq!(next.items[0].thread.id, first.id);
        assert_eq!(next.items[0].replies.len(), 1);
        assert_eq!(
            next.items[0].replies[0].author.as_ref().map(|a| a.id),
            Some(bob.id)
        );
        assert!(!next.has_next());
    }

    #[tokio::test]
    async fn thread_detail_includes_two_reply_levels() {
        let ada = sample_user("ada");
        let h = harness(vec![ada.clone()]);
        let root = h.service.create_thread(&ada, input("root")).await.unwrap();
        let child = h.service.add_comment(&ada, root.id, input("c")).await.unwrap();
        let grandchild = h.service.add_comment(&ada, child.id, input("g")).await.unwrap();
        h.service
            .add_comment(&ada, grandchild.id, input("too deep"))
            .await
            .unwrap();

        let node = h.service.fetch_thread(root.id).await.unwrap().expect("found");
        assert_eq!(node.replies.len(), 1);
        assert_eq!(node.replies[0].replies.len(), 1);
        assert!(node.replies[0].replies[0].replies.is_empty());

        assert!(h.service.fetch_thread(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_author_may_edit_and_edit_retags() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);
        let thread = h
            .service
            .create_thread(
                &ada,
                ThreadInput {
                    text: "draft".into(),
                    image_url: Some("https://img.example.com/a.png".into()),
                },
            )
            .await
            .unwrap();

        let err = h
            .service
            .update_thread(&bob, thread.id, input("hijack"))
            .await
            .expect_err("forbidden");
        assert!(matches!(err, ThreadError::Forbidden));

        let updated = h
            .service
            .update_thread(&ada, thread.id, input("now with @bob"))
            .await
            .unwrap();
        assert_eq!(updated.tags, vec![bob.id]);
        assert_eq!(h.notifications.unread_count(bob.id).await.unwrap(), 1);

        let cleared = h.service.remove_image(&ada, thread.id).await.unwrap();
        assert!(cleared.thread.image_url.is_none());
    }

    #[tokio::test]
    async fn profile_listings() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);

        let post = h.service.create_thread(&ada, input("post by ada")).await.unwrap();
        let reply = h
            .service
            .add_comment(&bob, post.id, input("hey @ADA!"))
            .await
            .unwrap();
        h.service
            .create_thread(&bob, input("mail@adam is not a mention of ada"))
            .await
            .unwrap();

        let threads = h.service.list_user_threads(ada.id).await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].replies.len(), 1);

        let replies = h.service.list_user_replies(bob.id).await.unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].parent.as_ref().map(|p| p.id), Some(post.id));
        assert_eq!(
            replies[0].parent_author.as_ref().map(|a| a.id),
            Some(ada.id)
        );

        let tagged = h.service.list_tagged_threads(&ada).await.unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].thread.id, reply.id);

        let received = h.service.replies_to_user(ada.id).await.unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].thread.id, reply.id);
        assert!(h.service.replies_to_user(bob.id).await.unwrap().is_empty());

        let likers = h.service.list_likers(post.id).await.unwrap();
        assert!(likers.is_empty());
        assert!(h.users.fetch_by_id(ada.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn tag_users_adds_each_id_once() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);
        let thread = h.service.create_thread(&ada, input("hello")).await.unwrap();

        h.service.tag_users(&ada, thread.id, &[bob.id]).await.unwrap();
        let tagged = h
            .service
            .tag_users(&ada, thread.id, &[bob.id, ada.id])
            .await
            .unwrap();
        assert_eq!(tagged.tags, vec![bob.id, ada.id]);
    }

    #[tokio::test]
    async fn only_the_author_may_tag() {
        let ada = sample_user("ada");
        let bob = sample_user("bob");
        let h = harness(vec![ada.clone(), bob.clone()]);
        let thread = h.service.create_thread(&ada, input("hello")).await.unwrap();

        let err = h
            .service
            .tag_users(&bob, thread.id, &[bob.id])
            .await
            .unwrap_err();
        assert!(matches!(err, ThreadError::Forbidden));

        let err = h
            .service
            .tag_users(&ada, Uuid::new_v4(), &[bob.id])
            .await
            .unwrap_err();
        assert!(matches!(err, ThreadError::NotFound));
    }
}
