use async_trait::async_trait;
use shared::{
    domain::{BlogId, Comment, NewComment, NewsletterSubscriber, SubscriptionStatus},
    protocol::ChangeEvent,
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::BackendError;

/// What a change feed hands to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    Status(SubscriptionStatus),
    Change(ChangeEvent),
}

/// A live change feed. Dropping or closing it stops the reader task; the
/// receiver then yields `None`.
pub struct ChangeFeed {
    messages: mpsc::Receiver<FeedMessage>,
    reader: Option<JoinHandle<()>>,
}

impl ChangeFeed {
    pub fn new(messages: mpsc::Receiver<FeedMessage>, reader: Option<JoinHandle<()>>) -> Self {
        Self { messages, reader }
    }

    pub async fn recv(&mut self) -> Option<FeedMessage> {
        self.messages.recv().await
    }

    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.messages.close();
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.close();
    }
}

/// The hosted backend as seen by the widgets. Injected, never global.
#[async_trait]
pub trait CommentBackend: Send + Sync {
    /// All comments for `blog_id`, newest first.
    async fn fetch_comments(&self, blog_id: &BlogId) -> Result<Vec<Comment>, BackendError>;

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment, BackendError>;

    async fn find_subscriber(
        &self,
        email: &str,
    ) -> Result<Option<NewsletterSubscriber>, BackendError>;

    /// Fails with `BackendError::Conflict` when the email is already stored.
    async fn insert_subscriber(&self, email: &str) -> Result<NewsletterSubscriber, BackendError>;

    async fn open_change_feed(&self, blog_id: &BlogId) -> Result<ChangeFeed, BackendError>;
}
