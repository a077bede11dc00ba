//! WebSocket transport.
//!
//! One socket per authenticated connection. Inbound text frames are decoded
//! as [`ClientEvent`]s and dispatched to the chat core; outbound events are
//! drained from the connection's hub queue by a dedicated writer task.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use alumni_realtime::messages::Draft;
use alumni_realtime::ChatError;
use alumni_shared::protocol::{ClientEvent, ServerEvent};
use alumni_shared::types::{ConnectionId, MediaRef, UserId};

use crate::api::AppState;
use crate::auth::AuthUser;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: UserId) {
    let mut session = state.chat.connect(user).await;
    let conn = session.id;
    info!(user = %user, conn = %conn, "Socket connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = session.events.recv().await {
            let frame = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(conn = %conn, event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_frame(&state, conn, user, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(conn = %conn, error = %e, "Socket read failed");
                break;
            }
        }
    }

    state.chat.disconnect(conn).await;
    writer.abort();
    info!(user = %user, conn = %conn, "Socket disconnected");
}

/// Decode and run one inbound frame. Failures go back to the sender as an
/// `error` event; the connection stays open.
async fn handle_frame(state: &AppState, conn: ConnectionId, user: UserId, text: &str) {
    let event = match ClientEvent::from_json(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(conn = %conn, error = %e, "Rejected client frame");
            reply_error(state, conn, "Invalid event payload".to_string()).await;
            return;
        }
    };

    let name = event.name();
    if let Err(e) = dispatch(state, conn, user, event).await {
        match &e {
            ChatError::Internal(detail) => {
                tracing::error!(conn = %conn, event = name, error = %detail, "Event failed")
            }
            other => debug!(conn = %conn, event = name, error = %other, "Event rejected"),
        }
        reply_error(state, conn, e.public_message()).await;
    }
}

async fn reply_error(state: &AppState, conn: ConnectionId, message: String) {
    state
        .chat
        .hub()
        .send_to(conn, ServerEvent::Error { message })
        .await;
}

async fn dispatch(
    state: &AppState,
    conn: ConnectionId,
    user: UserId,
    event: ClientEvent,
) -> Result<(), ChatError> {
    let chat = &state.chat;
    match event {
        ClientEvent::JoinRoom { room_id } => {
            let room = chat.join_room_as(user, conn, room_id).await?;
            chat.hub().send_to(conn, ServerEvent::RoomUpdated { room }).await;
        }
        ClientEvent::LeaveRoom { room_id } => chat.leave_room(conn, room_id).await,
        ClientEvent::SendMessage {
            room_id,
            text,
            media_url,
        } => {
            if !state.message_limiter.check(user).await {
                warn!(user = %user, room = %room_id, "Message rate limit exceeded");
                return Err(ChatError::BadRequest("Too many messages".into()));
            }
            let draft = Draft {
                text,
                media: media_url.map(MediaRef::from_url),
            };
            chat.send_message(user, room_id, draft).await?;
        }
        ClientEvent::MarkAsRead {
            room_id,
            message_ids,
        } => {
            chat.mark_read(user, room_id, &message_ids).await?;
        }
        ClientEvent::TypingStart { room_id } => chat.typing_start(user, room_id).await?,
        ClientEvent::TypingStop { room_id } => chat.typing_stop(user, room_id).await?,
        ClientEvent::GetOnlineUsers => {
            let user_ids = chat.online_users().await;
            chat.hub().send_to(conn, ServerEvent::OnlineUsers { user_ids }).await;
        }
        ClientEvent::JoinPost { post_id } => chat.join_post(conn, post_id).await,
        ClientEvent::LeavePost { post_id } => chat.leave_post(conn, post_id).await,
        ClientEvent::PostLiked {
            post_id,
            liked_user_ids,
        } => chat.post_liked(post_id, liked_user_ids).await,
        ClientEvent::CommentLiked {
            comment_id,
            post_id,
            liked_user_ids,
        } => chat.comment_liked(post_id, comment_id, liked_user_ids).await,
    }
    Ok(())
}
