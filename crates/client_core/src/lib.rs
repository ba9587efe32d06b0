//! Client side of the comments service: a backend seam, the live comment
//! view, and the submission forms.

pub mod backend;
pub mod error;
pub mod gateway;
pub mod http;
pub mod sync;
pub mod view;

pub use backend::{ChangeFeed, CommentBackend, FeedMessage};
pub use error::{BackendError, SubmitError, SyncError};
pub use gateway::{
    CommentDraft, CommentForm, NewsletterForm, NewsletterOutcome, SubmissionGateway,
    SubmissionState,
};
pub use http::HttpBackend;
pub use sync::{CommentSynchronizer, SyncEvent};
pub use view::{reconcile, CommentView, InsertOrdering};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
