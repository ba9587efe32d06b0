use std::sync::Arc;

use shared::{
    domain::{BlogId, Comment, SubscriptionStatus},
    protocol::ChangeEvent,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    backend::{CommentBackend, FeedMessage},
    error::SyncError,
    view::{CommentView, InsertOrdering},
};

const SYNC_EVENT_CAPACITY: usize = 256;

/// Notifications for whoever renders the comment list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    ViewChanged(Vec<Comment>),
    StatusChanged(SubscriptionStatus),
    Failed(SyncError),
}

/// Keeps one blog's comments in sync: a full fetch seeds the view and the
/// change feed keeps it current.
pub struct CommentSynchronizer {
    backend: Arc<dyn CommentBackend>,
    ordering: InsertOrdering,
    inner: Mutex<SyncState>,
    events: broadcast::Sender<SyncEvent>,
}

struct SyncState {
    view: Option<CommentView>,
    /// Bumped by teardown and remounts. Work stamped with an older value is dropped.
    generation: u64,
    status: SubscriptionStatus,
    feed: Option<ActiveFeed>,
    loads_in_flight: usize,
    /// Changes that arrived while a full fetch was running, replayed onto its result.
    deferred: Vec<ChangeEvent>,
}

struct ActiveFeed {
    blog_id: BlogId,
    task: JoinHandle<()>,
}

impl CommentSynchronizer {
    pub fn new(backend: Arc<dyn CommentBackend>) -> Arc<Self> {
        Self::with_ordering(backend, InsertOrdering::default())
    }

    pub fn with_ordering(backend: Arc<dyn CommentBackend>, ordering: InsertOrdering) -> Arc<Self> {
        let (events, _) = broadcast::channel(SYNC_EVENT_CAPACITY);
        Arc::new(Self {
            backend,
            ordering,
            inner: Mutex::new(SyncState {
                view: None,
                generation: 0,
                status: SubscriptionStatus::Closed,
                feed: None,
                loads_in_flight: 0,
                deferred: Vec::new(),
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub async fn view(&self) -> Vec<Comment> {
        let guard = self.inner.lock().await;
        guard
            .view
            .as_ref()
            .map(|view| view.comments().to_vec())
            .unwrap_or_default()
    }

    pub async fn blog_id(&self) -> Option<BlogId> {
        let guard = self.inner.lock().await;
        guard.view.as_ref().map(|view| view.blog_id().clone())
    }

    pub async fn status(&self) -> SubscriptionStatus {
        self.inner.lock().await.status
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.lock().await.loads_in_flight > 0
    }

    /// Replaces the view with a full fetch for `blog_id`, newest first.
    ///
    /// On failure the view is left empty and the call can simply be retried.
    /// Mounting a different blog closes the previous blog's feed.
    pub async fn initialize(&self, blog_id: &BlogId) -> Result<(), SyncError> {
        let generation = {
            let mut guard = self.inner.lock().await;
            let remount = guard
                .view
                .as_ref()
                .map_or(true, |view| view.blog_id() != blog_id);
            if remount {
                self.close_feed(&mut guard);
                self.mark_closed(&mut guard);
                guard.generation += 1;
                guard.view = Some(CommentView::new(blog_id.clone(), self.ordering));
                guard.deferred.clear();
            }
            guard.loads_in_flight += 1;
            guard.generation
        };

        debug!(%blog_id, "loading comments");
        let fetched = self.backend.fetch_comments(blog_id).await;

        let mut guard = self.inner.lock().await;
        guard.loads_in_flight = guard.loads_in_flight.saturating_sub(1);
        if guard.generation != generation {
            debug!(%blog_id, "discarding comment load that finished after teardown");
            return Ok(());
        }
        let deferred = if guard.loads_in_flight == 0 {
            std::mem::take(&mut guard.deferred)
        } else {
            guard.deferred.clone()
        };
        let Some(view) = guard.view.as_mut() else {
            return Ok(());
        };

        match fetched {
            Ok(rows) => {
                view.replace_all(rows);
                for event in &deferred {
                    view.apply(event);
                }
                let snapshot = view.comments().to_vec();
                info!(%blog_id, count = snapshot.len(), replayed = deferred.len(), "comments loaded");
                drop(guard);
                let _ = self.events.send(SyncEvent::ViewChanged(snapshot));
                Ok(())
            }
            Err(err) => {
                view.clear();
                drop(guard);
                warn!(%blog_id, error = %err, "failed to load comments");
                let failure = SyncError::LoadFailure {
                    blog_id: blog_id.clone(),
                    reason: err.to_string(),
                };
                let _ = self.events.send(SyncEvent::ViewChanged(Vec::new()));
                let _ = self.events.send(SyncEvent::Failed(failure.clone()));
                Err(failure)
            }
        }
    }

    /// Re-runs the full fetch for the mounted blog. This is the manual
    /// recovery path after a load failure or a dropped feed.
    pub async fn refresh(&self) -> Result<(), SyncError> {
        let Some(blog_id) = self.blog_id().await else {
            return Ok(());
        };
        self.initialize(&blog_id).await
    }

    /// Opens the change feed for `blog_id`. Call after `initialize`.
    ///
    /// Never fails synchronously: connection problems show up as
    /// `SubscriptionStatus::Errored` and are not retried.
    pub async fn subscribe(self: &Arc<Self>, blog_id: &BlogId) {
        let mut guard = self.inner.lock().await;
        if let Some(feed) = &guard.feed {
            if &feed.blog_id == blog_id && !feed.task.is_finished() {
                debug!(%blog_id, "change feed already open");
                return;
            }
        }
        self.close_feed(&mut guard);

        let mounted = guard
            .view
            .as_ref()
            .is_some_and(|view| view.blog_id() == blog_id);
        if !mounted {
            guard.generation += 1;
            guard.view = Some(CommentView::new(blog_id.clone(), self.ordering));
            guard.deferred.clear();
        }

        let generation = guard.generation;
        guard.status = SubscriptionStatus::Pending;
        let _ = self
            .events
            .send(SyncEvent::StatusChanged(SubscriptionStatus::Pending));

        let sync = Arc::clone(self);
        let feed_blog = blog_id.clone();
        let task = tokio::spawn(async move { sync.run_feed(feed_blog, generation).await });
        guard.feed = Some(ActiveFeed {
            blog_id: blog_id.clone(),
            task,
        });
    }

    /// Closes the feed. Nothing reaches the view once this returns; calling
    /// it again is harmless.
    pub async fn teardown(&self) {
        let mut guard = self.inner.lock().await;
        guard.generation += 1;
        guard.deferred.clear();
        let had_feed = self.close_feed(&mut guard);
        self.mark_closed(&mut guard);
        if had_feed {
            info!("change feed closed");
        }
    }

    fn close_feed(&self, state: &mut SyncState) -> bool {
        match state.feed.take() {
            Some(feed) => {
                feed.task.abort();
                true
            }
            None => false,
        }
    }

    /// Moves to `Closed`, notifying observers when that is a change.
    fn mark_closed(&self, state: &mut SyncState) {
        if state.status != SubscriptionStatus::Closed {
            state.status = SubscriptionStatus::Closed;
            let _ = self
                .events
                .send(SyncEvent::StatusChanged(SubscriptionStatus::Closed));
        }
    }

    async fn run_feed(self: Arc<Self>, blog_id: BlogId, generation: u64) {
        let mut feed = match self.backend.open_change_feed(&blog_id).await {
            Ok(feed) => feed,
            Err(err) => {
                warn!(%blog_id, error = %err, "change feed could not be opened");
                self.feed_failed(&blog_id, generation, err.to_string()).await;
                return;
            }
        };

        while let Some(message) = feed.recv().await {
            let applied = match message {
                FeedMessage::Status(status) => self.set_status(generation, status).await,
                FeedMessage::Change(event) => self.apply_change(generation, event).await,
            };
            if !applied {
                return;
            }
        }

        warn!(%blog_id, "change feed dropped");
        self.feed_failed(&blog_id, generation, "connection closed".to_string())
            .await;
    }

    async fn feed_failed(&self, blog_id: &BlogId, generation: u64, reason: String) {
        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            return;
        }
        guard.feed = None;
        if guard.status != SubscriptionStatus::Errored {
            guard.status = SubscriptionStatus::Errored;
            let _ = self
                .events
                .send(SyncEvent::StatusChanged(SubscriptionStatus::Errored));
        }
        let _ = self.events.send(SyncEvent::Failed(SyncError::SubscriptionFailure {
            blog_id: blog_id.clone(),
            reason,
        }));
    }

    /// Returns false once the feed's generation is stale.
    async fn set_status(&self, generation: u64, status: SubscriptionStatus) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            return false;
        }
        if guard.status != status {
            info!(%status, "change feed status");
            guard.status = status;
            let _ = self.events.send(SyncEvent::StatusChanged(status));
        }
        true
    }

    async fn apply_change(&self, generation: u64, event: ChangeEvent) -> bool {
        let mut guard = self.inner.lock().await;
        if guard.generation != generation {
            debug!(kind = event.kind(), "dropping change after teardown");
            return false;
        }
        if guard.loads_in_flight > 0 {
            guard.deferred.push(event.clone());
        }
        let Some(view) = guard.view.as_mut() else {
            return true;
        };
        if view.apply(&event) {
            debug!(
                kind = event.kind(),
                comment_id = event.comment_id().0,
                "change applied"
            );
            let snapshot = view.comments().to_vec();
            drop(guard);
            let _ = self.events.send(SyncEvent::ViewChanged(snapshot));
        }
        true
    }
}

#[cfg(test)]
#[path = "tests/sync_tests.rs"]
mod tests;
