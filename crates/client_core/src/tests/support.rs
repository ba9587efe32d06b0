//! In-memory `CommentBackend` used by the synchronizer and gateway tests.

use std::sync::{
    atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use shared::{
    domain::{
        normalize_email, BlogId, Comment, CommentId, NewComment, NewsletterSubscriber,
        SubscriberId, SubscriptionStatus,
    },
    protocol::ChangeEvent,
};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::{
    backend::{ChangeFeed, CommentBackend, FeedMessage},
    error::BackendError,
};

pub(crate) fn at(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().expect("timestamp")
        + Duration::seconds(offset_secs)
}

pub(crate) fn comment(id: i64, blog: &str, body: &str, offset_secs: i64) -> Comment {
    Comment {
        id: CommentId(id),
        blog_id: BlogId::new(blog),
        name: "Ana".into(),
        body: body.into(),
        created_at: at(offset_secs),
    }
}

#[derive(Default)]
pub(crate) struct FakeBackend {
    pub(crate) comments: Mutex<Vec<Comment>>,
    pub(crate) subscribers: Mutex<Vec<NewsletterSubscriber>>,
    next_id: AtomicI64,
    pub(crate) fail_fetch: AtomicBool,
    pub(crate) fail_insert: AtomicBool,
    pub(crate) fail_feed: AtomicBool,
    /// Makes the existence check miss, as a concurrent signup would.
    pub(crate) stale_existence_check: AtomicBool,
    /// Withholds auto-activation so tests can drive status by hand.
    pub(crate) manual_activation: AtomicBool,
    pub(crate) fetch_calls: AtomicUsize,
    pub(crate) insert_comment_calls: AtomicUsize,
    pub(crate) find_subscriber_calls: AtomicUsize,
    pub(crate) insert_subscriber_calls: AtomicUsize,
    feeds: Mutex<Vec<(BlogId, mpsc::Sender<FeedMessage>)>>,
    fetch_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeBackend {
    pub(crate) fn with_comments(comments: Vec<Comment>) -> Arc<Self> {
        let next = comments.iter().map(|c| c.id.0).max().unwrap_or(0);
        let backend = Self {
            comments: Mutex::new(comments),
            next_id: AtomicI64::new(next),
            ..Self::default()
        };
        Arc::new(backend)
    }

    /// The next fetch blocks until the returned sender fires.
    pub(crate) async fn hold_next_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.fetch_gate.lock().await = Some(rx);
        tx
    }

    pub(crate) async fn open_feeds(&self) -> usize {
        self.feeds
            .lock()
            .await
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    /// Delivers a raw feed message to every open feed for the event's blog.
    pub(crate) async fn push(&self, blog_id: &BlogId, message: FeedMessage) {
        let feeds = self.feeds.lock().await;
        for (feed_blog, tx) in feeds.iter() {
            if feed_blog == blog_id {
                let _ = tx.send(message.clone()).await;
            }
        }
    }

    pub(crate) async fn push_change(&self, event: ChangeEvent) {
        let blog_id = event.blog_id().clone();
        self.push(&blog_id, FeedMessage::Change(event)).await;
    }

    /// Simulates the server dropping every socket.
    pub(crate) async fn drop_feeds(&self) {
        self.feeds.lock().await.clear();
    }
}

#[async_trait]
impl CommentBackend for FakeBackend {
    async fn fetch_comments(&self, blog_id: &BlogId) -> Result<Vec<Comment>, BackendError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.fetch_gate.lock().await.take();
        let snapshot = self.comments.lock().await.clone();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("fetch refused".into()));
        }
        let mut rows: Vec<Comment> = snapshot
            .into_iter()
            .filter(|c| &c.blog_id == blog_id)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        Ok(rows)
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment, BackendError> {
        self.insert_comment_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("insert refused".into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = Comment {
            id: CommentId(id),
            blog_id: comment.blog_id.clone(),
            name: comment.name.trim().to_string(),
            body: comment.body.trim().to_string(),
            created_at: at(id * 10),
        };
        self.comments.lock().await.push(stored.clone());
        self.push_change(ChangeEvent::Insert { new: stored.clone() })
            .await;
        Ok(stored)
    }

    async fn find_subscriber(
        &self,
        email: &str,
    ) -> Result<Option<NewsletterSubscriber>, BackendError> {
        self.find_subscriber_calls.fetch_add(1, Ordering::SeqCst);
        if self.stale_existence_check.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let email = normalize_email(email);
        let subscribers = self.subscribers.lock().await;
        Ok(subscribers.iter().find(|s| s.email == email).cloned())
    }

    async fn insert_subscriber(&self, email: &str) -> Result<NewsletterSubscriber, BackendError> {
        self.insert_subscriber_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("insert refused".into()));
        }
        let email = normalize_email(email);
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.iter().any(|s| s.email == email) {
            return Err(BackendError::Conflict(format!("{email} is already subscribed")));
        }
        let subscriber = NewsletterSubscriber {
            id: SubscriberId(subscribers.len() as i64 + 1),
            email,
            subscribed_at: at(0),
        };
        subscribers.push(subscriber.clone());
        Ok(subscriber)
    }

    async fn open_change_feed(&self, blog_id: &BlogId) -> Result<ChangeFeed, BackendError> {
        if self.fail_feed.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("realtime refused".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        if !self.manual_activation.load(Ordering::SeqCst) {
            let _ = tx
                .send(FeedMessage::Status(SubscriptionStatus::Active))
                .await;
        }
        self.feeds.lock().await.push((blog_id.clone(), tx));
        Ok(ChangeFeed::new(rx, None))
    }
}
