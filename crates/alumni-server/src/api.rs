use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use alumni_realtime::messages::Draft;
use alumni_realtime::rooms::LeaveOutcome;
use alumni_realtime::ChatService;
use alumni_shared::constants::DEFAULT_PAGE_SIZE;
use alumni_shared::protocol::{FeedEvent, MessageDto, RoomDto};
use alumni_shared::types::{MessageId, RoomId, UserId};

use crate::auth::{AuthUser, TokenVerifier};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::media::MediaStore;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::ws;

/// Multipart framing overhead allowed on top of the attachment itself.
const MULTIPART_SLACK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub media: Arc<MediaStore>,
    pub verifier: Arc<TokenVerifier>,
    pub rate_limiter: RateLimiter<IpAddr>,
    pub message_limiter: RateLimiter<UserId>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/chat/rooms", get(list_rooms).post(create_room))
        .route("/chat/rooms/:id/messages", get(list_messages).post(send_message))
        .route("/chat/rooms/:id/read", post(mark_read))
        .route("/chat/rooms/:id/members", post(add_members))
        .route("/chat/rooms/:id/admins", post(promote_admin))
        .route("/chat/rooms/:id/members/:member", delete(remove_member))
        .route("/chat/rooms/:id/leave", delete(leave_room))
        .route("/users/online", get(online_users))
        .route("/users/:id/presence", get(user_presence))
        .route("/media/:id", get(media_download))
        .route("/feed/events", post(feed_ingest))
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(state.media.max_size() + MULTIPART_SLACK))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    online_users: usize,
    connections: usize,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRoomRequest {
    member_ids: Vec<UserId>,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadRequest {
    message_ids: Vec<MessageId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    message_ids: Vec<MessageId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMembersRequest {
    member_ids: Vec<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromoteRequest {
    user_id: UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeaveResponse {
    room_id: RoomId,
    deleted: bool,
    promoted: Option<UserId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OnlineUsersResponse {
    user_ids: Vec<UserId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceResponse {
    user_id: UserId,
    is_online: bool,
}

#[derive(Serialize)]
struct FeedIngestResponse {
    delivered: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        online_users: state.chat.online_users().await.len(),
        connections: state.chat.hub().connection_count().await,
    })
}

async fn list_rooms(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<RoomDto>>, ServerError> {
    Ok(Json(state.chat.list_rooms(user).await?))
}

async fn create_room(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<RoomDto>, ServerError> {
    let room = state
        .chat
        .create_room(user, &req.member_ids, req.is_group, req.name)
        .await?;
    Ok(Json(room))
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<RoomId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<MessageDto>>, ServerError> {
    let page = query.page.unwrap_or(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let messages = state.chat.list_messages(user, room_id, page, limit).await?;
    Ok(Json(messages))
}

/// Multipart send: a `text` field, a `media` file field, or both.
async fn send_message(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<RoomId>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<MessageDto>), ServerError> {
    // Reject outsiders before anything is written to disk.
    state.chat.require_member(user, room_id).await?;

    let mut draft = Draft::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "text" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))?;
                draft.text = Some(text);
            }
            "media" => {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {e}")))?;
                if !data.is_empty() {
                    let stored = state.media.store(&data, content_type.as_deref()).await?;
                    info!(room = %room_id, media = %stored.id, size = stored.size, "Attachment uploaded");
                    draft.media = Some(stored.media_ref());
                }
            }
            other => debug!(field = other, "Ignoring multipart field"),
        }
    }

    let message = state.chat.send_message(user, room_id, draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<RoomId>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, ServerError> {
    let message_ids = state.chat.mark_read(user, room_id, &req.message_ids).await?;
    Ok(Json(MarkReadResponse { message_ids }))
}

async fn add_members(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<RoomId>,
    Json(req): Json<AddMembersRequest>,
) -> Result<Json<RoomDto>, ServerError> {
    Ok(Json(state.chat.add_members(user, room_id, &req.member_ids).await?))
}

async fn promote_admin(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<RoomId>,
    Json(req): Json<PromoteRequest>,
) -> Result<Json<RoomDto>, ServerError> {
    Ok(Json(state.chat.promote_admin(user, room_id, req.user_id).await?))
}

async fn remove_member(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path((room_id, member)): Path<(RoomId, UserId)>,
) -> Result<Json<RoomDto>, ServerError> {
    Ok(Json(state.chat.remove_member(user, room_id, member).await?))
}

async fn leave_room(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(room_id): Path<RoomId>,
) -> Result<Json<LeaveResponse>, ServerError> {
    let response = match state.chat.leave_group(user, room_id).await? {
        LeaveOutcome::Left { promoted, .. } => LeaveResponse {
            room_id,
            deleted: false,
            promoted,
        },
        LeaveOutcome::Deleted { room_id } => LeaveResponse {
            room_id,
            deleted: true,
            promoted: None,
        },
    };
    Ok(Json(response))
}

async fn online_users(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        user_ids: state.chat.online_users().await,
    })
}

async fn user_presence(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Path(user_id): Path<UserId>,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        user_id,
        is_online: state.chat.is_online(user_id).await,
    })
}

async fn media_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let (data, content_type) = state.media.get(id).await?;
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

/// Push endpoint for the posts service. Guarded by `FEED_INGEST_TOKEN`.
async fn feed_ingest(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(event): Json<FeedEvent>,
) -> Result<Json<FeedIngestResponse>, ServerError> {
    verify_feed_token(&headers, &state.config)?;
    let delivered = state.chat.ingest_feed_event(event).await;
    Ok(Json(FeedIngestResponse { delivered }))
}

fn verify_feed_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.feed_ingest_token else {
        return Err(ServerError::Forbidden(
            "Feed ingestion is disabled (no FEED_INGEST_TOKEN configured)".into(),
        ));
    };

    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let token = auth.strip_prefix("Bearer ").unwrap_or(auth);

    use subtle::ConstantTimeEq;
    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid feed token".into()));
    }

    Ok(())
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
