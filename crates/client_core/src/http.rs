use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{
    domain::{BlogId, Comment, CommentId, NewComment, NewsletterSubscriber, SubscriptionStatus},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{
        EditCommentRequest, NewsletterSubscribeRequest, PostCommentRequest, ServerEvent,
    },
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    backend::{ChangeFeed, CommentBackend, FeedMessage},
    error::BackendError,
};

const FEED_BUFFER: usize = 64;

/// `CommentBackend` over the server's HTTP routes and `/realtime` socket.
pub struct HttpBackend {
    http: Client,
    base_url: Url,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self, BackendError> {
        let base_url = Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| BackendError::InvalidUrl(format!("{server_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(format!(
                "{server_url}: server_url must start with http:// or https://"
            )));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn realtime_url(&self, blog_id: &BlogId) -> Result<Url, BackendError> {
        let mut url = self.endpoint(&["realtime"]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| BackendError::InvalidUrl(format!("cannot derive {scheme} url")))?;
        url.query_pairs_mut().append_pair("blog_id", blog_id.as_str());
        Ok(url)
    }

    /// Moderation edit; the change reaches subscribers as an update event.
    pub async fn update_comment(
        &self,
        comment_id: CommentId,
        body: &str,
    ) -> Result<Comment, BackendError> {
        let response = self
            .http
            .patch(self.endpoint(&["comments", &comment_id.0.to_string()]))
            .json(&EditCommentRequest {
                body: body.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }

    pub async fn delete_comment(&self, comment_id: CommentId) -> Result<(), BackendError> {
        let response = self
            .http
            .delete(self.endpoint(&["comments", &comment_id.0.to_string()]))
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }
}

#[async_trait]
impl CommentBackend for HttpBackend {
    async fn fetch_comments(&self, blog_id: &BlogId) -> Result<Vec<Comment>, BackendError> {
        let response = self
            .http
            .get(self.endpoint(&["blogs", blog_id.as_str(), "comments"]))
            .send()
            .await?;
        decode(response).await
    }

    async fn insert_comment(&self, comment: &NewComment) -> Result<Comment, BackendError> {
        let response = self
            .http
            .post(self.endpoint(&["blogs", comment.blog_id.as_str(), "comments"]))
            .json(&PostCommentRequest {
                name: comment.name.clone(),
                email: comment.email.clone(),
                body: comment.body.clone(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn find_subscriber(
        &self,
        email: &str,
    ) -> Result<Option<NewsletterSubscriber>, BackendError> {
        let response = self
            .http
            .get(self.endpoint(&["newsletter", "subscribers"]))
            .query(&[("email", email)])
            .send()
            .await?;
        match decode(response).await {
            Ok(subscriber) => Ok(Some(subscriber)),
            Err(BackendError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn insert_subscriber(&self, email: &str) -> Result<NewsletterSubscriber, BackendError> {
        let response = self
            .http
            .post(self.endpoint(&["newsletter", "subscribers"]))
            .json(&NewsletterSubscribeRequest {
                email: email.to_string(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn open_change_feed(&self, blog_id: &BlogId) -> Result<ChangeFeed, BackendError> {
        let ws_url = self.realtime_url(blog_id)?;
        let (mut ws_stream, _) = connect_async(ws_url.as_str()).await?;
        info!(%blog_id, "change feed connected");

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let feed_blog = blog_id.clone();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_stream.next().await {
                let forwarded = match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::Subscribed { .. }) => {
                            FeedMessage::Status(SubscriptionStatus::Active)
                        }
                        Ok(ServerEvent::Change { event }) => FeedMessage::Change(event),
                        Ok(ServerEvent::Error(err)) => {
                            warn!(blog_id = %feed_blog, message = %err.message, "change feed reported error");
                            let _ = tx
                                .send(FeedMessage::Status(SubscriptionStatus::Errored))
                                .await;
                            break;
                        }
                        Err(err) => {
                            warn!(blog_id = %feed_blog, %err, "ignoring malformed change frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(err) => {
                        warn!(blog_id = %feed_blog, %err, "change feed receive failed");
                        break;
                    }
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
            debug!(blog_id = %feed_blog, "change feed reader finished");
        });

        Ok(ChangeFeed::new(rx, Some(reader)))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BackendError> {
    let response = ensure_success(response).await?;
    Ok(response.json().await?)
}

async fn ensure_success(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let api_error = serde_json::from_str::<ApiError>(&body)
        .unwrap_or_else(|_| ApiError::new(ErrorCode::Internal, format!("{status}: {body}")));
    Err(match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(api_error.message),
        StatusCode::CONFLICT => BackendError::Conflict(api_error.message),
        _ => BackendError::Api(ApiException::from(api_error)),
    })
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
