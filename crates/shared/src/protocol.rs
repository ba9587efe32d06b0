use serde::{Deserialize, Serialize};

use crate::{
    domain::{BlogId, Comment, CommentId, CommentKey},
    error::ApiError,
};

/// One row-level notification from the comment change feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { new: Comment },
    Update { new: Comment },
    Delete { old: CommentKey },
}

impl ChangeEvent {
    pub fn comment_id(&self) -> CommentId {
        match self {
            Self::Insert { new } | Self::Update { new } => new.id,
            Self::Delete { old } => old.id,
        }
    }

    pub fn blog_id(&self) -> &BlogId {
        match self {
            Self::Insert { new } | Self::Update { new } => &new.blog_id,
            Self::Delete { old } => &old.blog_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Frames pushed over the `/realtime` socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Subscribed { blog_id: BlogId },
    Change { event: ChangeEvent },
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCommentRequest {
    pub name: String,
    pub email: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditCommentRequest {
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsletterSubscribeRequest {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriberLookupQuery {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeQuery {
    pub blog_id: String,
}
