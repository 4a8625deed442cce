use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::application::repos::{LikesRepo, NotificationsRepo, RepoError, ThreadsRepo};
use crate::application::users::UserService;
use crate::domain::activity::{ActivityEntry, merge};
use crate::domain::entities::ThreadRecord;
use crate::domain::types::{ActivityKind, NotificationKind, ThreadScope};

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// Builds a user's activity view from threads, likes and mention notifications.
#[derive(Clone)]
pub struct ActivityService {
    threads: Arc<dyn ThreadsRepo>,
    likes: Arc<dyn LikesRepo>,
    notifications: Arc<dyn NotificationsRepo>,
    users: Arc<UserService>,
}

impl ActivityService {
    pub fn new(
        threads: Arc<dyn ThreadsRepo>,
        likes: Arc<dyn LikesRepo>,
        notifications: Arc<dyn NotificationsRepo>,
        users: Arc<UserService>,
    ) -> Self {
        Self {
            threads,
            likes,
            notifications,
            users,
        }
    }

    pub async fn user_activity(&self, user_id: Uuid) -> Result<Vec<ActivityEntry>, ActivityError> {
        let own = self.threads.list_by_author(user_id, ThreadScope::All).await?;
        let (top_level, comments): (Vec<ThreadRecord>, Vec<ThreadRecord>) =
            own.iter().cloned().partition(|thread| !thread.is_reply());
        let own_ids: Vec<Uuid> = own.iter().map(|thread| thread.id).collect();
        let top_ids: Vec<Uuid> = top_level.iter().map(|thread| thread.id).collect();

        let liked = self.likes.list_by_user(user_id).await?;
        let received_likes = if own_ids.is_empty() {
            Vec::new()
        } else {
            self.likes.list_for_threads(&own_ids).await?
        };
        let received_comments: Vec<ThreadRecord> = if top_ids.is_empty() {
            Vec::new()
        } else {
            self.threads
                .list_children(&top_ids)
                .await?
                .into_iter()
                .filter(|reply| reply.author_id != user_id)
                .collect()
        };
        let mentions: Vec<_> = self
            .notifications
            .list_for_recipient(user_id)
            .await?
            .into_iter()
            .filter(|n| n.kind == NotificationKind::Mention && n.thread_id.is_some())
            .collect();

        let mut wanted: Vec<Uuid> = liked.iter().map(|like| like.thread_id).collect();
        wanted.extend(comments.iter().filter_map(|c| c.parent_id));
        wanted.extend(mentions.iter().filter_map(|n| n.thread_id));
        wanted.sort_unstable();
        wanted.dedup();
        let mut related: HashMap<Uuid, ThreadRecord> = own
            .iter()
            .map(|thread| (thread.id, thread.clone()))
            .collect();
        let missing: Vec<Uuid> = wanted
            .into_iter()
            .filter(|id| !related.contains_key(id))
            .collect();
        if !missing.is_empty() {
            for thread in self.threads.find_many(&missing).await? {
                related.insert(thread.id, thread);
            }
        }

        let mut people: Vec<Uuid> = received_comments.iter().map(|c| c.author_id).collect();
        people.extend(mentions.iter().map(|n| n.sender_id));
        people.extend(
            comments
                .iter()
                .filter_map(|c| c.parent_id)
                .filter_map(|id| related.get(&id))
                .map(|parent| parent.author_id),
        );
        let users = self.users.summaries(&people).await?;

        let created: Vec<ActivityEntry> = top_level
            .iter()
            .map(|thread| {
                ActivityEntry::new(
                    ActivityKind::CreatedThread,
                    thread.created_at,
                    thread.id,
                    &thread.text,
                )
            })
            .collect();

        let liked_entries: Vec<ActivityEntry> = liked
            .iter()
            .filter_map(|like| {
                related.get(&like.thread_id).map(|thread| {
                    ActivityEntry::new(
                        ActivityKind::LikedThread,
                        like.created_at,
                        thread.id,
                        &thread.text,
                    )
                })
            })
            .collect();

        let received_like_entries: Vec<ActivityEntry> = received_likes
            .into_iter()
            .filter(|like| like.user.id != user_id)
            .filter_map(|like| {
                related.get(&like.thread_id).map(|thread| {
                    ActivityEntry::new(
                        ActivityKind::ReceivedLike,
                        like.created_at,
                        thread.id,
                        &thread.text,
                    )
                    .with_actor(like.user)
                })
            })
            .collect();

        let comment_entries: Vec<ActivityEntry> = comments
            .iter()
            .filter_map(|comment| {
                let parent = related.get(&comment.parent_id?)?;
                let mut entry = ActivityEntry::new(
                    ActivityKind::CreatedComment,
                    comment.created_at,
                    comment.id,
                    &comment.text,
                )
                .with_parent(parent.id);
                if let Some(author) = users.get(&parent.author_id) {
                    entry = entry.with_parent_author(author.clone());
                }
                Some(entry)
            })
            .collect();

        let received_comment_entries: Vec<ActivityEntry> = received_comments
            .iter()
            .filter_map(|reply| {
                let mut entry = ActivityEntry::new(
                    ActivityKind::ReceivedComment,
                    reply.created_at,
                    reply.id,
                    &reply.text,
                )
                .with_parent(reply.parent_id?);
                if let Some(author) = users.get(&reply.author_id) {
                    entry = entry.with_actor(author.clone());
                }
                Some(entry)
            })
            .collect();

        let mention_entries: Vec<ActivityEntry> = mentions
            .iter()
            .filter_map(|notification| {
                let thread = related.get(&notification.thread_id?)?;
                let mut entry = ActivityEntry::new(
                    ActivityKind::Mention,
                    notification.created_at,
                    thread.id,
                    &thread.text,
                )
                .with_read(notification.read);
                if let Some(sender) = users.get(&notification.sender_id) {
                    entry = entry.with_actor(sender.clone());
                }
                Some(entry)
            })
            .collect();

        Ok(merge([
            created,
            liked_entries,
            received_like_entries,
            comment_entries,
            received_comment_entries,
            mention_entries,
        ]))
    }
}
