use shared::{
    domain::{normalize_email, BlogId, Comment, CommentId, NewComment, NewsletterSubscriber},
    error::{ApiError, ErrorCode},
    protocol::{ChangeEvent, EditCommentRequest, PostCommentRequest},
    validation::{validate_comment, validate_newsletter_email},
};
use storage::{Storage, SubscriberInsert};
use tracing::info;

pub const MAX_BLOG_ID_BYTES: usize = 200;
pub const MAX_COMMENT_BODY_BYTES: usize = 8 * 1024;
pub const MAX_NAME_BYTES: usize = 120;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn list_comments(ctx: &ApiContext, blog_id: &BlogId) -> Result<Vec<Comment>, ApiError> {
    ensure_blog_id(blog_id)?;
    ctx.storage
        .list_comments_for_blog(blog_id)
        .await
        .map_err(internal)
}

/// Stores a new comment and returns the change notification to fan out.
pub async fn post_comment(
    ctx: &ApiContext,
    blog_id: &BlogId,
    req: PostCommentRequest,
) -> Result<(Comment, ChangeEvent), ApiError> {
    ensure_blog_id(blog_id)?;
    let errors = validate_comment(&req.name, &req.email, &req.body);
    if !errors.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, errors.summary()));
    }
    if req.name.trim().len() > MAX_NAME_BYTES {
        return Err(ApiError::new(ErrorCode::Validation, "name is too long"));
    }
    if req.body.trim().len() > MAX_COMMENT_BODY_BYTES {
        return Err(ApiError::new(ErrorCode::Validation, "comment is too long"));
    }

    let comment = ctx
        .storage
        .insert_comment(&NewComment {
            blog_id: blog_id.clone(),
            name: req.name,
            email: req.email,
            body: req.body,
        })
        .await
        .map_err(internal)?;
    info!(blog_id = %comment.blog_id, comment_id = comment.id.0, "comment stored");
    Ok((
        comment.clone(),
        ChangeEvent::Insert { new: comment },
    ))
}

pub async fn edit_comment(
    ctx: &ApiContext,
    comment_id: CommentId,
    req: EditCommentRequest,
) -> Result<(Comment, ChangeEvent), ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "body: Required"));
    }
    if req.body.trim().len() > MAX_COMMENT_BODY_BYTES {
        return Err(ApiError::new(ErrorCode::Validation, "comment is too long"));
    }
    let comment = ctx
        .storage
        .update_comment_body(comment_id, &req.body)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "comment not found"))?;
    info!(blog_id = %comment.blog_id, comment_id = comment.id.0, "comment edited");
    Ok((
        comment.clone(),
        ChangeEvent::Update { new: comment },
    ))
}

pub async fn delete_comment(
    ctx: &ApiContext,
    comment_id: CommentId,
) -> Result<ChangeEvent, ApiError> {
    let removed = ctx
        .storage
        .delete_comment(comment_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "comment not found"))?;
    info!(blog_id = %removed.blog_id, comment_id = removed.id.0, "comment deleted");
    Ok(ChangeEvent::Delete { old: removed.key() })
}

pub async fn find_subscriber(
    ctx: &ApiContext,
    email: &str,
) -> Result<Option<NewsletterSubscriber>, ApiError> {
    if let Some(message) = validate_newsletter_email(email) {
        return Err(ApiError::new(ErrorCode::Validation, message));
    }
    ctx.storage.find_subscriber(email).await.map_err(internal)
}

/// A repeat signup is reported as `Conflict`; the unique index decides, so
/// two racing requests cannot both succeed.
pub async fn subscribe_newsletter(
    ctx: &ApiContext,
    email: &str,
) -> Result<NewsletterSubscriber, ApiError> {
    if let Some(message) = validate_newsletter_email(email) {
        return Err(ApiError::new(ErrorCode::Validation, message));
    }
    match ctx.storage.insert_subscriber(email).await.map_err(internal)? {
        SubscriberInsert::Inserted(subscriber) => {
            info!(subscriber_id = subscriber.id.0, "newsletter subscriber added");
            Ok(subscriber)
        }
        SubscriberInsert::AlreadyExists => Err(ApiError::new(
            ErrorCode::Conflict,
            format!("{} is already subscribed", normalize_email(email)),
        )),
    }
}

fn ensure_blog_id(blog_id: &BlogId) -> Result<(), ApiError> {
    let raw = blog_id.as_str();
    if raw.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "blog id must not be empty"));
    }
    if raw.len() > MAX_BLOG_ID_BYTES {
        return Err(ApiError::new(ErrorCode::Validation, "blog id is too long"));
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}
