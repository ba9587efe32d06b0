//! Comment and newsletter submission with validation and transient status.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{
    domain::{normalize_email, BlogId, NewComment},
    validation::{validate_comment, validate_newsletter_email, FieldErrors},
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    backend::CommentBackend,
    error::{BackendError, SubmitError},
};

pub const COMMENT_ADDED: &str = "Comment added successfully!";
pub const COMMENT_FAILED: &str = "Failed to add comment. Please try again.";
pub const COMMENT_FIX_FIELDS: &str = "Please fix the highlighted fields";
pub const NEWSLETTER_SUBSCRIBED: &str = "Thanks for subscribing!";
pub const NEWSLETTER_ALREADY_SUBSCRIBED: &str = "You're already subscribed!";
pub const NEWSLETTER_FAILED: &str = "Something went wrong. Please try again.";

const COMMENT_CLEAR_AFTER: Duration = Duration::from_secs(3);
const NEWSLETTER_CLEAR_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubmissionState {
    #[default]
    Idle,
    Submitting,
    Success(String),
    Failure(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentDraft {
    pub name: String,
    pub email: String,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewsletterOutcome {
    NewlySubscribed,
    AlreadySubscribed,
}

impl NewsletterOutcome {
    pub fn message(self) -> &'static str {
        match self {
            Self::NewlySubscribed => NEWSLETTER_SUBSCRIBED,
            Self::AlreadySubscribed => NEWSLETTER_ALREADY_SUBSCRIBED,
        }
    }
}

/// Status channel for one form. Messages set through `succeed` fall back to
/// `Idle` after `clear_after` unless a newer attempt has started.
struct FormStatus {
    state: watch::Sender<SubmissionState>,
    attempt: AtomicU64,
    clear_after: Duration,
}

impl FormStatus {
    fn new(clear_after: Duration) -> Arc<Self> {
        let (state, _) = watch::channel(SubmissionState::Idle);
        Arc::new(Self {
            state,
            attempt: AtomicU64::new(0),
            clear_after,
        })
    }

    fn in_flight(&self) -> bool {
        *self.state.borrow() == SubmissionState::Submitting
    }

    fn begin(&self) -> Result<(), SubmitError> {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == SubmissionState::Submitting {
                return false;
            }
            *state = SubmissionState::Submitting;
            started = true;
            true
        });
        if !started {
            return Err(SubmitError::InFlight);
        }
        self.attempt.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn fail(&self, message: &str) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.state
            .send_replace(SubmissionState::Failure(message.to_string()));
    }

    /// Success that stays on screen until the next attempt.
    fn settle(&self, message: &str) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.state
            .send_replace(SubmissionState::Success(message.to_string()));
    }

    fn succeed(self: &Arc<Self>, message: &str) {
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .send_replace(SubmissionState::Success(message.to_string()));

        let status = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(status.clear_after).await;
            if status.attempt.load(Ordering::SeqCst) != attempt {
                return;
            }
            status.state.send_if_modified(|state| {
                if matches!(state, SubmissionState::Success(_)) {
                    *state = SubmissionState::Idle;
                    true
                } else {
                    false
                }
            });
        });
    }
}

/// Validates and submits the comment form and the newsletter signup.
///
/// New comments are not added to any view here; they come back through the
/// synchronizer's change feed like everyone else's.
#[derive(Clone)]
pub struct SubmissionGateway {
    backend: Arc<dyn CommentBackend>,
    comment: Arc<FormStatus>,
    newsletter: Arc<FormStatus>,
}

impl SubmissionGateway {
    pub fn new(backend: Arc<dyn CommentBackend>) -> Self {
        Self::with_clear_delays(backend, COMMENT_CLEAR_AFTER, NEWSLETTER_CLEAR_AFTER)
    }

    pub fn with_clear_delays(
        backend: Arc<dyn CommentBackend>,
        comment: Duration,
        newsletter: Duration,
    ) -> Self {
        Self {
            backend,
            comment: FormStatus::new(comment),
            newsletter: FormStatus::new(newsletter),
        }
    }

    pub fn comment_state(&self) -> watch::Receiver<SubmissionState> {
        self.comment.state.subscribe()
    }

    pub fn newsletter_state(&self) -> watch::Receiver<SubmissionState> {
        self.newsletter.state.subscribe()
    }

    pub async fn submit_comment(
        &self,
        blog_id: &BlogId,
        draft: &CommentDraft,
    ) -> Result<(), SubmitError> {
        if self.comment.in_flight() {
            return Err(SubmitError::InFlight);
        }
        let errors = validate_comment(&draft.name, &draft.email, &draft.body);
        if !errors.is_empty() {
            debug!(%blog_id, errors = %errors.summary(), "comment rejected by validation");
            self.comment.fail(COMMENT_FIX_FIELDS);
            return Err(SubmitError::Validation(errors));
        }

        self.comment.begin()?;
        let new_comment = NewComment {
            blog_id: blog_id.clone(),
            name: draft.name.trim().to_string(),
            email: draft.email.trim().to_string(),
            body: draft.body.trim().to_string(),
        };
        match self.backend.insert_comment(&new_comment).await {
            Ok(stored) => {
                info!(%blog_id, comment_id = stored.id.0, "comment submitted");
                self.comment.succeed(COMMENT_ADDED);
                Ok(())
            }
            Err(err) => {
                warn!(%blog_id, error = %err, "comment submission failed");
                self.comment.fail(COMMENT_FAILED);
                Err(SubmitError::Submission {
                    message: COMMENT_FAILED.to_string(),
                    source: err,
                })
            }
        }
    }

    /// Signs `email` up for the newsletter unless it is already on the list.
    pub async fn subscribe_newsletter(&self, email: &str) -> Result<NewsletterOutcome, SubmitError> {
        if self.newsletter.in_flight() {
            return Err(SubmitError::InFlight);
        }
        if let Some(message) = validate_newsletter_email(email) {
            self.newsletter.fail(message);
            return Err(SubmitError::Validation(FieldErrors {
                email: Some(message.to_string()),
                ..FieldErrors::default()
            }));
        }

        self.newsletter.begin()?;
        let email = normalize_email(email);
        match self.signup(&email).await {
            Ok(outcome) => {
                info!(?outcome, "newsletter signup handled");
                match outcome {
                    NewsletterOutcome::NewlySubscribed => self.newsletter.succeed(outcome.message()),
                    NewsletterOutcome::AlreadySubscribed => self.newsletter.settle(outcome.message()),
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "newsletter signup failed");
                self.newsletter.fail(NEWSLETTER_FAILED);
                Err(SubmitError::Submission {
                    message: NEWSLETTER_FAILED.to_string(),
                    source: err,
                })
            }
        }
    }

    async fn signup(&self, email: &str) -> Result<NewsletterOutcome, BackendError> {
        if self.backend.find_subscriber(email).await?.is_some() {
            return Ok(NewsletterOutcome::AlreadySubscribed);
        }
        // A concurrent signup can land between the lookup and the insert.
        match self.backend.insert_subscriber(email).await {
            Ok(_) => Ok(NewsletterOutcome::NewlySubscribed),
            Err(BackendError::Conflict(_)) => Ok(NewsletterOutcome::AlreadySubscribed),
            Err(err) => Err(err),
        }
    }
}

/// Comment form inputs. The draft survives failed attempts and is cleared
/// only after a successful submit.
#[derive(Debug, Clone, Default)]
pub struct CommentForm {
    pub draft: CommentDraft,
    pub errors: FieldErrors,
}

impl CommentForm {
    pub async fn submit(
        &mut self,
        gateway: &SubmissionGateway,
        blog_id: &BlogId,
    ) -> Result<(), SubmitError> {
        let result = gateway.submit_comment(blog_id, &self.draft).await;
        match &result {
            Ok(()) => *self = Self::default(),
            Err(SubmitError::Validation(errors)) => self.errors = errors.clone(),
            Err(_) => self.errors = FieldErrors::default(),
        }
        result
    }
}

/// Footer signup field. The email is cleared only after a new signup.
#[derive(Debug, Clone, Default)]
pub struct NewsletterForm {
    pub email: String,
    pub error: Option<String>,
}

impl NewsletterForm {
    pub async fn submit(
        &mut self,
        gateway: &SubmissionGateway,
    ) -> Result<NewsletterOutcome, SubmitError> {
        let result = gateway.subscribe_newsletter(&self.email).await;
        match &result {
            Ok(NewsletterOutcome::NewlySubscribed) => *self = Self::default(),
            Ok(NewsletterOutcome::AlreadySubscribed) => self.error = None,
            Err(SubmitError::Validation(errors)) => self.error = errors.email.clone(),
            Err(_) => self.error = None,
        }
        result
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
