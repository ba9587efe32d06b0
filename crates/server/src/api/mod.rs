use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use shared::{
    domain::{BlogId, Comment, CommentId, NewsletterSubscriber},
    error::{ApiError, ErrorCode},
    protocol::{
        EditCommentRequest, NewsletterSubscribeRequest, PostCommentRequest, SubscriberLookupQuery,
    },
};
use tracing::warn;

use crate::app_state::AppState;

pub(crate) type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

pub(crate) fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(message = %err.message, "request failed");
    }
    (status, Json(err))
}

pub(crate) async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| error_response(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    Ok("ok")
}

pub(crate) async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(blog_id): Path<String>,
) -> ApiResult<Json<Vec<Comment>>> {
    let comments = server_api::list_comments(&state.api, &BlogId(blog_id))
        .await
        .map_err(error_response)?;
    Ok(Json(comments))
}

pub(crate) async fn post_comment(
    State(state): State<Arc<AppState>>,
    Path(blog_id): Path<String>,
    Json(req): Json<PostCommentRequest>,
) -> ApiResult<(StatusCode, Json<Comment>)> {
    let (comment, event) = server_api::post_comment(&state.api, &BlogId(blog_id), req)
        .await
        .map_err(error_response)?;
    state.publish(event);
    Ok((StatusCode::CREATED, Json(comment)))
}

pub(crate) async fn edit_comment(
    State(state): State<Arc<AppState>>,
    Path(comment_id): Path<i64>,
    Json(req): Json<EditCommentRequest>,
) -> ApiResult<Json<Comment>> {
    let (comment, event) = server_api::edit_comment(&state.api, CommentId(comment_id), req)
        .await
        .map_err(error_response)?;
    state.publish(event);
    Ok(Json(comment))
}

pub(crate) async fn delete_comment(
    State(state): State<Arc<AppState>>,
    Path(comment_id): Path<i64>,
) -> ApiResult<StatusCode> {
    let event = server_api::delete_comment(&state.api, CommentId(comment_id))
        .await
        .map_err(error_response)?;
    state.publish(event);
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn find_subscriber(
    State(state): State<Arc<AppState>>,
    Query(q): Query<SubscriberLookupQuery>,
) -> ApiResult<Json<NewsletterSubscriber>> {
    let subscriber = server_api::find_subscriber(&state.api, &q.email)
        .await
        .map_err(error_response)?
        .ok_or_else(|| {
            error_response(ApiError::new(ErrorCode::NotFound, "subscriber not found"))
        })?;
    Ok(Json(subscriber))
}

pub(crate) async fn subscribe_newsletter(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewsletterSubscribeRequest>,
) -> ApiResult<(StatusCode, Json<NewsletterSubscriber>)> {
    let subscriber = server_api::subscribe_newsletter(&state.api, &req.email)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(subscriber)))
}
