use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::BlogId,
    error::{ApiError, ErrorCode},
    protocol::{RealtimeQuery, ServerEvent},
};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, warn};

use crate::{
    api::{error_response, ApiResult},
    app_state::AppState,
};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<RealtimeQuery>,
) -> ApiResult<impl IntoResponse> {
    if q.blog_id.trim().is_empty() {
        return Err(error_response(ApiError::new(
            ErrorCode::Validation,
            "blog_id must not be empty",
        )));
    }
    let blog_id = BlogId(q.blog_id);
    Ok(ws.on_upgrade(move |socket| ws_connection(state, socket, blog_id)))
}

/// Streams committed changes for one blog until the peer goes away or
/// falls too far behind the fan-out buffer.
async fn ws_connection(state: Arc<AppState>, socket: WebSocket, blog_id: BlogId) {
    let (mut sender, mut receiver) = socket.split();
    // Subscribe before acknowledging so nothing committed after the ack is missed.
    let changes = BroadcastStream::new(state.changes.subscribe());
    info!(%blog_id, "change feed opened");

    let ack = ServerEvent::Subscribed {
        blog_id: blog_id.clone(),
    };
    if send_event(&mut sender, &ack).await.is_err() {
        return;
    }

    let feed_blog = blog_id.clone();
    let send_task = tokio::spawn(async move {
        let mut changes = changes;
        while let Some(item) = changes.next().await {
            let frame = match item {
                Ok(event) if event.blog_id() == &feed_blog => ServerEvent::Change { event },
                Ok(_) => continue,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(blog_id = %feed_blog, skipped, "change feed lagged; closing");
                    let _ = send_event(
                        &mut sender,
                        &ServerEvent::Error(ApiError::new(
                            ErrorCode::Internal,
                            format!("change feed lagged by {skipped} events"),
                        )),
                    )
                    .await;
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if send_event(&mut sender, &frame).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    send_task.abort();
    debug!(%blog_id, "change feed closed");
}

async fn send_event<S>(sender: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: futures::Sink<Message> + Unpin,
{
    let text = serde_json::to_string(event).map_err(|_| ())?;
    sender.send(Message::Text(text)).await.map_err(|_| ())
}
