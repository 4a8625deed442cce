use std::collections::HashSet;

use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

use crate::{
    application::{
        error::{ErrorReport, HttpError},
        notifications::NotificationView,
        threads::{ReplyView, ThreadNode},
    },
    domain::{
        activity::ActivityEntry,
        entities::{UserRecord, UserSummary},
        mentions,
        threads::excerpt,
        types::{ActivityKind, NotificationKind},
    },
};

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");
const EXCERPT_CHARS: usize = 80;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        HttpError::from_error(
            err.source,
            StatusCode::INTERNAL_SERVER_ERROR,
            err.public_message,
            &err.error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|error| {
        TemplateRenderError {
            source: "presentation::views::render_template",
            public_message: "Template rendering failed",
            error,
        }
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Error page carrying the status and a report for the response log.
pub fn render_error_response(
    layout: LayoutView,
    status: StatusCode,
    message: &str,
    source: &'static str,
) -> Response {
    let template = ErrorTemplate {
        layout,
        status: status.as_u16(),
        message: message.to_string(),
    };
    let mut response = render_template_response(template, status);
    ErrorReport::from_message(source, status, message).attach(&mut response);
    response
}

fn timestamp(at: OffsetDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).unwrap_or_default()
}

#[derive(Clone)]
pub struct ViewerView {
    pub username: String,
    pub name: String,
}

/// Page chrome shared by every template.
#[derive(Clone)]
pub struct LayoutView {
    pub title: String,
    pub viewer: Option<ViewerView>,
    pub unread: u64,
}

impl LayoutView {
    pub fn new(title: impl Into<String>, viewer: Option<&UserRecord>) -> Self {
        Self {
            title: title.into(),
            viewer: viewer.map(|user| ViewerView {
                username: user.username.clone(),
                name: user.name.clone(),
            }),
            unread: 0,
        }
    }

    pub fn with_unread(mut self, unread: u64) -> Self {
        self.unread = unread;
        self
    }
}

#[derive(Clone)]
pub struct AuthorView {
    pub username: String,
    pub name: String,
    pub image: Option<String>,
    pub initial: String,
}

impl From<&UserSummary> for AuthorView {
    fn from(user: &UserSummary) -> Self {
        Self {
            username: user.username.clone(),
            name: user.name.clone(),
            image: user.image.clone(),
            initial: user
                .name
                .chars()
                .next()
                .map(|c| c.to_uppercase().collect())
                .unwrap_or_else(|| "?".to_string()),
        }
    }
}

#[derive(Clone)]
pub struct LikeButtonView {
    pub thread_id: String,
    pub liked: bool,
    pub count: usize,
    pub enabled: bool,
}

#[derive(Clone)]
pub struct ThreadCardView {
    pub id: String,
    pub author: Option<AuthorView>,
    pub text: String,
    pub text_html: String,
    pub image_url: Option<String>,
    pub created_at: String,
    pub edited: bool,
    pub like: LikeButtonView,
    pub reply_count: usize,
    pub reply_authors: Vec<AuthorView>,
    pub replies: Vec<ThreadCardView>,
    pub parent_id: Option<String>,
    pub can_edit: bool,
}

impl ThreadCardView {
    pub fn from_node(node: &ThreadNode, viewer: Option<&UserRecord>) -> Self {
        let known: HashSet<String> = node
            .tagged
            .iter()
            .map(|user| user.username.clone())
            .collect();
        let thread = &node.thread;
        let mut reply_authors: Vec<AuthorView> = Vec::new();
        for author in node.replies.iter().filter_map(|reply| reply.author.as_ref()) {
            if !reply_authors.iter().any(|seen| seen.username == author.username) {
                reply_authors.push(author.into());
            }
        }
        reply_authors.truncate(3);

        Self {
            id: thread.id.to_string(),
            author: node.author.as_ref().map(AuthorView::from),
            text: thread.text.clone(),
            text_html: mentions::render_text_html(&thread.text, &known),
            image_url: thread.image_url.clone(),
            created_at: timestamp(thread.created_at),
            edited: thread.updated_at > thread.created_at,
            like: LikeButtonView {
                thread_id: thread.id.to_string(),
                liked: viewer.is_some_and(|user| node.liked_by(user.id)),
                count: node.likes.len(),
                enabled: viewer.is_some(),
            },
            reply_count: node.replies.len(),
            reply_authors,
            replies: node
                .replies
                .iter()
                .map(|reply| Self::from_node(reply, viewer))
                .collect(),
            parent_id: thread.parent_id.map(|id| id.to_string()),
            can_edit: viewer.is_some_and(|user| user.id == thread.author_id),
        }
    }

    pub fn from_nodes(nodes: &[ThreadNode], viewer: Option<&UserRecord>) -> Vec<Self> {
        nodes
            .iter()
            .map(|node| Self::from_node(node, viewer))
            .collect()
    }
}

#[derive(Clone)]
pub struct ReplyCardView {
    pub card: ThreadCardView,
    pub parent_id: Option<String>,
    pub parent_excerpt: Option<String>,
    pub parent_author: Option<AuthorView>,
}

impl ReplyCardView {
    pub fn from_view(view: &ReplyView, viewer: Option<&UserRecord>) -> Self {
        Self {
            card: ThreadCardView::from_node(&view.reply, viewer),
            parent_id: view.parent.as_ref().map(|p| p.id.to_string()),
            parent_excerpt: view.parent.as_ref().map(|p| excerpt(&p.text, EXCERPT_CHARS)),
            parent_author: view.parent_author.as_ref().map(AuthorView::from),
        }
    }
}

#[derive(Clone)]
pub struct ActivityItemView {
    pub summary: String,
    pub when: String,
    pub excerpt: String,
    pub thread_href: String,
    pub actor: Option<AuthorView>,
    pub unread: bool,
}

impl From<&ActivityEntry> for ActivityItemView {
    fn from(entry: &ActivityEntry) -> Self {
        let actor_name = entry
            .actor
            .as_ref()
            .map(|user| format!("@{}", user.username))
            .unwrap_or_else(|| "Someone".to_string());
        let summary = match entry.kind {
            ActivityKind::CreatedThread => "You posted".to_string(),
            ActivityKind::LikedThread => "You liked a thread".to_string(),
            ActivityKind::ReceivedLike => format!("{actor_name} liked your thread"),
            ActivityKind::CreatedComment => match &entry.parent_author {
                Some(author) => format!("You replied to @{}", author.username),
                None => "You replied".to_string(),
            },
            ActivityKind::ReceivedComment => format!("{actor_name} replied to you"),
            ActivityKind::Mention => format!("{actor_name} mentioned you"),
        };
        Self {
            summary,
            when: timestamp(entry.occurred_at),
            excerpt: excerpt(&entry.thread_text, EXCERPT_CHARS),
            thread_href: format!("/threads/{}", entry.thread_id),
            actor: entry.actor.as_ref().map(AuthorView::from),
            unread: entry.read == Some(false),
        }
    }
}

#[derive(Clone)]
pub struct NotificationItemView {
    pub id: String,
    pub message: String,
    pub sender: Option<AuthorView>,
    pub thread_href: Option<String>,
    pub excerpt: Option<String>,
    pub read: bool,
    pub when: String,
}

impl From<&NotificationView> for NotificationItemView {
    fn from(view: &NotificationView) -> Self {
        let sender = view
            .sender
            .as_ref()
            .map(|user| format!("@{}", user.username))
            .unwrap_or_else(|| "Someone".to_string());
        let message = match view.notification.kind {
            NotificationKind::Mention => format!("{sender} mentioned you"),
            NotificationKind::Like => format!("{sender} liked your thread"),
            NotificationKind::Comment => format!("{sender} replied to your thread"),
            NotificationKind::Follow => format!("{sender} followed you"),
        };
        Self {
            id: view.notification.id.to_string(),
            message,
            sender: view.sender.as_ref().map(AuthorView::from),
            thread_href: view
                .thread
                .as_ref()
                .map(|thread| format!("/threads/{}", thread.id)),
            excerpt: view
                .thread
                .as_ref()
                .map(|thread| excerpt(&thread.text, EXCERPT_CHARS)),
            read: view.notification.read,
            when: timestamp(view.notification.created_at),
        }
    }
}

#[derive(Clone)]
pub struct ProfileView {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: Option<String>,
    pub initial: String,
}

impl From<&UserRecord> for ProfileView {
    fn from(user: &UserRecord) -> Self {
        let author = AuthorView::from(&user.summary());
        Self {
            username: user.username.clone(),
            name: user.name.clone(),
            bio: user.bio.clone(),
            image: user.image.clone(),
            initial: author.initial,
        }
    }
}

#[derive(Clone)]
pub struct TabView {
    pub label: &'static str,
    pub href: String,
    pub active: bool,
}

/// Profile tabs; `notifications` only appears on the viewer's own profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProfileTab {
    #[default]
    Threads,
    Replies,
    Tagged,
    Activity,
    Notifications,
}

impl ProfileTab {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("replies") => Self::Replies,
            Some("tagged") => Self::Tagged,
            Some("activity") => Self::Activity,
            Some("notifications") => Self::Notifications,
            _ => Self::Threads,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Replies => "replies",
            Self::Tagged => "tagged",
            Self::Activity => "activity",
            Self::Notifications => "notifications",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Threads => "Threads",
            Self::Replies => "Replies",
            Self::Tagged => "Tagged",
            Self::Activity => "Activity",
            Self::Notifications => "Notifications",
        }
    }

    pub fn tabs(active: Self, username: &str, is_owner: bool) -> Vec<TabView> {
        let mut all = vec![Self::Threads, Self::Replies, Self::Tagged, Self::Activity];
        if is_owner {
            all.push(Self::Notifications);
        }
        all.into_iter()
            .map(|tab| TabView {
                label: tab.label(),
                href: format!("/profile/{username}?tab={}", tab.key()),
                active: tab == active,
            })
            .collect()
    }
}

#[derive(Clone, Default)]
pub struct OnboardingForm {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub image: String,
}

impl From<&UserRecord> for OnboardingForm {
    fn from(user: &UserRecord) -> Self {
        Self {
            username: user.username.clone(),
            name: user.name.clone(),
            bio: user.bio.clone(),
            image: user.image.clone().unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct SearchResultView {
    pub author: AuthorView,
    pub bio: String,
}

#[derive(Template)]
#[template(path = "feed.html")]
pub struct FeedTemplate {
    pub layout: LayoutView,
    pub cards: Vec<ThreadCardView>,
    pub next_href: Option<String>,
    pub can_post: bool,
}

#[derive(Template)]
#[template(path = "thread.html")]
pub struct ThreadTemplate {
    pub layout: LayoutView,
    pub card: ThreadCardView,
    pub can_reply: bool,
    pub reply_action: String,
}

#[derive(Template)]
#[template(path = "likes.html")]
pub struct LikesTemplate {
    pub layout: LayoutView,
    pub thread_href: String,
    pub likers: Vec<AuthorView>,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub layout: LayoutView,
    pub profile: ProfileView,
    pub tabs: Vec<TabView>,
    pub cards: Vec<ThreadCardView>,
    pub replies: Vec<ReplyCardView>,
    pub activity: Vec<ActivityItemView>,
    pub notifications: Vec<NotificationItemView>,
    pub is_owner: bool,
    pub empty: bool,
}

#[derive(Template)]
#[template(path = "search.html")]
pub struct SearchTemplate {
    pub layout: LayoutView,
    pub query: String,
    pub results: Vec<SearchResultView>,
    pub next_href: Option<String>,
}

#[derive(Template)]
#[template(path = "onboarding.html")]
pub struct OnboardingTemplate {
    pub layout: LayoutView,
    pub form: OnboardingForm,
    pub error: Option<String>,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub layout: LayoutView,
    pub status: u16,
    pub message: String,
}

/// The like control alone, for in-place patches.
#[derive(Template)]
#[template(path = "partials/like_button.html")]
pub struct LikeButtonTemplate {
    pub like: LikeButtonView,
}
