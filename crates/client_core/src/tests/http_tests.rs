use super::*;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response as AxumResponse},
    routing::{get, patch},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use shared::protocol::{RealtimeQuery, SubscriberLookupQuery};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Default)]
struct MockData {
    comments: Vec<Comment>,
    subscribers: Vec<NewsletterSubscriber>,
    posted: Vec<PostCommentRequest>,
}

#[derive(Clone, Default)]
struct MockState {
    data: Arc<Mutex<MockData>>,
}

fn stored(id: i64, blog: &str, body: &str) -> Comment {
    Comment {
        id: CommentId(id),
        blog_id: BlogId::new(blog),
        name: "Ana".into(),
        body: body.into(),
        created_at: Utc
            .with_ymd_and_hms(2025, 3, 1, 12, 0, id as u32)
            .single()
            .expect("timestamp"),
    }
}

fn api_error(status: StatusCode, code: ErrorCode, message: &str) -> AxumResponse {
    (status, Json(ApiError::new(code, message))).into_response()
}

async fn list_comments(
    State(state): State<MockState>,
    Path(blog_id): Path<String>,
) -> Json<Vec<Comment>> {
    let data = state.data.lock().await;
    Json(
        data.comments
            .iter()
            .filter(|c| c.blog_id.as_str() == blog_id)
            .cloned()
            .collect(),
    )
}

async fn post_comment(
    State(state): State<MockState>,
    Path(blog_id): Path<String>,
    Json(request): Json<PostCommentRequest>,
) -> (StatusCode, Json<Comment>) {
    let mut data = state.data.lock().await;
    let comment = stored(data.comments.len() as i64 + 1, &blog_id, &request.body);
    data.comments.insert(0, comment.clone());
    data.posted.push(request);
    (StatusCode::CREATED, Json(comment))
}

async fn edit_comment(
    State(state): State<MockState>,
    Path(comment_id): Path<i64>,
    Json(request): Json<EditCommentRequest>,
) -> AxumResponse {
    let mut data = state.data.lock().await;
    match data.comments.iter_mut().find(|c| c.id.0 == comment_id) {
        Some(comment) => {
            comment.body = request.body;
            Json(comment.clone()).into_response()
        }
        None => api_error(StatusCode::NOT_FOUND, ErrorCode::NotFound, "comment not found"),
    }
}

async fn delete_comment(
    State(state): State<MockState>,
    Path(comment_id): Path<i64>,
) -> AxumResponse {
    let mut data = state.data.lock().await;
    let before = data.comments.len();
    data.comments.retain(|c| c.id.0 != comment_id);
    if data.comments.len() == before {
        return api_error(StatusCode::NOT_FOUND, ErrorCode::NotFound, "comment not found");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn find_subscriber(
    State(state): State<MockState>,
    Query(query): Query<SubscriberLookupQuery>,
) -> AxumResponse {
    let data = state.data.lock().await;
    match data.subscribers.iter().find(|s| s.email == query.email) {
        Some(subscriber) => Json(subscriber.clone()).into_response(),
        None => api_error(StatusCode::NOT_FOUND, ErrorCode::NotFound, "not subscribed"),
    }
}

async fn add_subscriber(
    State(state): State<MockState>,
    Json(request): Json<NewsletterSubscribeRequest>,
) -> AxumResponse {
    let mut data = state.data.lock().await;
    if data.subscribers.iter().any(|s| s.email == request.email) {
        return api_error(StatusCode::CONFLICT, ErrorCode::Conflict, "already subscribed");
    }
    let subscriber = NewsletterSubscriber {
        id: shared::domain::SubscriberId(data.subscribers.len() as i64 + 1),
        email: request.email,
        subscribed_at: Utc::now(),
    };
    data.subscribers.push(subscriber.clone());
    (StatusCode::CREATED, Json(subscriber)).into_response()
}

async fn realtime(ws: WebSocketUpgrade, Query(query): Query<RealtimeQuery>) -> AxumResponse {
    ws.on_upgrade(move |socket| push_changes(socket, BlogId::new(query.blog_id)))
}

/// Acks, pushes one insert, reports an error, then hangs up.
async fn push_changes(mut socket: WebSocket, blog_id: BlogId) {
    let frames = [
        ServerEvent::Subscribed {
            blog_id: blog_id.clone(),
        },
        ServerEvent::Change {
            event: shared::protocol::ChangeEvent::Insert {
                new: stored(42, blog_id.as_str(), "live"),
            },
        },
    ];
    for frame in frames {
        let text = serde_json::to_string(&frame).expect("encode frame");
        if socket.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }
    let _ = socket.send(WsMessage::Text("not json".into())).await;
    let error = ServerEvent::Error(ApiError::new(ErrorCode::Internal, "lagged"));
    let text = serde_json::to_string(&error).expect("encode frame");
    let _ = socket.send(WsMessage::Text(text)).await;
    let _ = socket.close().await;
}

async fn spawn_mock_server(state: MockState) -> Result<String> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = Router::new()
        .route(
            "/blogs/:blog_id/comments",
            get(list_comments).post(post_comment),
        )
        .route(
            "/comments/:comment_id",
            patch(edit_comment).delete(delete_comment),
        )
        .route(
            "/newsletter/subscribers",
            get(find_subscriber).post(add_subscriber),
        )
        .route("/realtime", get(realtime))
        .with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

#[test]
fn rejects_non_http_server_urls() {
    assert!(matches!(
        HttpBackend::new("ftp://example.com"),
        Err(BackendError::InvalidUrl(_))
    ));
    assert!(matches!(
        HttpBackend::new("not a url"),
        Err(BackendError::InvalidUrl(_))
    ));
}

#[test]
fn builds_escaped_endpoints_and_realtime_url() {
    let backend = HttpBackend::new("https://comments.example.com/api/").expect("backend");
    assert_eq!(
        backend.endpoint(&["blogs", "my post", "comments"]).as_str(),
        "https://comments.example.com/api/blogs/my%20post/comments"
    );
    let ws = backend
        .realtime_url(&BlogId::new("a&b"))
        .expect("realtime url");
    assert_eq!(ws.scheme(), "wss");
    assert_eq!(ws.path(), "/api/realtime");
    assert_eq!(ws.query(), Some("blog_id=a%26b"));
}

#[tokio::test]
async fn fetch_and_insert_round_trip_through_http() {
    let state = MockState::default();
    state.data.lock().await.comments = vec![stored(1, "post", "hi"), stored(2, "other", "no")];
    let server_url = spawn_mock_server(state.clone()).await.expect("spawn server");
    let backend = HttpBackend::new(&server_url).expect("backend");
    let blog = BlogId::new("post");

    let rows = backend.fetch_comments(&blog).await.expect("fetch");
    assert_eq!(rows, vec![stored(1, "post", "hi")]);

    let created = backend
        .insert_comment(&NewComment {
            blog_id: blog.clone(),
            name: "Bo".into(),
            email: "bo@example.com".into(),
            body: "yo".into(),
        })
        .await
        .expect("insert");
    assert_eq!(created.body, "yo");

    let posted = state.data.lock().await.posted.clone();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].email, "bo@example.com");
}

#[tokio::test]
async fn subscriber_lookup_and_conflict_map_to_typed_results() {
    let server_url = spawn_mock_server(MockState::default())
        .await
        .expect("spawn server");
    let backend = HttpBackend::new(&server_url).expect("backend");

    assert!(backend
        .find_subscriber("a@b.com")
        .await
        .expect("lookup")
        .is_none());
    backend.insert_subscriber("a@b.com").await.expect("insert");
    assert!(backend
        .find_subscriber("a@b.com")
        .await
        .expect("lookup")
        .is_some());

    let err = backend
        .insert_subscriber("a@b.com")
        .await
        .expect_err("duplicate");
    assert!(matches!(err, BackendError::Conflict(ref m) if m == "already subscribed"));
}

#[tokio::test]
async fn moderation_calls_report_missing_comments() {
    let state = MockState::default();
    state.data.lock().await.comments = vec![stored(1, "post", "hi")];
    let server_url = spawn_mock_server(state.clone()).await.expect("spawn server");
    let backend = HttpBackend::new(&server_url).expect("backend");

    let edited = backend
        .update_comment(CommentId(1), "edited")
        .await
        .expect("edit");
    assert_eq!(edited.body, "edited");
    backend.delete_comment(CommentId(1)).await.expect("delete");

    let err = backend
        .delete_comment(CommentId(1))
        .await
        .expect_err("already gone");
    assert!(matches!(err, BackendError::NotFound(_)));
    let err = backend
        .update_comment(CommentId(7), "nope")
        .await
        .expect_err("missing");
    assert!(matches!(err, BackendError::NotFound(_)));
}

#[tokio::test]
async fn change_feed_forwards_ack_changes_and_error() {
    let server_url = spawn_mock_server(MockState::default())
        .await
        .expect("spawn server");
    let backend = HttpBackend::new(&server_url).expect("backend");
    let blog = BlogId::new("post");

    let mut feed = backend.open_change_feed(&blog).await.expect("open feed");
    let mut received = Vec::new();
    while let Ok(Some(message)) =
        tokio::time::timeout(std::time::Duration::from_secs(2), feed.recv()).await
    {
        received.push(message);
    }

    assert_eq!(
        received,
        vec![
            FeedMessage::Status(SubscriptionStatus::Active),
            FeedMessage::Change(shared::protocol::ChangeEvent::Insert {
                new: stored(42, "post", "live"),
            }),
            FeedMessage::Status(SubscriptionStatus::Errored),
        ]
    );
}

#[tokio::test]
async fn unreachable_server_fails_to_open_feed() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let backend = HttpBackend::new(&format!("http://{addr}")).expect("backend");
    let err = backend
        .open_change_feed(&BlogId::new("post"))
        .await
        .err()
        .expect("connect should fail");
    assert!(matches!(err, BackendError::WebSocket(_)));
}
