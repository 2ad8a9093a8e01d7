use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use chrono::Utc;
use serde::Deserialize;

use parley_types::api::{
    LastSeenResponse, MarkSeenRequest, MarkSeenResponse, SeenUsersResponse, UnreadCountResponse,
    UnreadCountsResponse,
};
use parley_types::models::MessageSeenSummary;

use crate::error::ApiError;
use crate::fanout;
use crate::middleware::Caller;
use crate::state::{AppState, require_member, with_db};

const DEFAULT_SEEN_USERS: usize = 50;
const MAX_SEEN_USERS: usize = 200;

#[derive(Debug, Deserialize)]
pub struct SeenUsersQuery {
    pub limit: Option<usize>,
}

pub async fn mark_seen(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<MarkSeenRequest>,
) -> Result<Json<MarkSeenResponse>, ApiError> {
    let up_to = req.up_to_message_id;
    if up_to <= 0 {
        return Err(ApiError::validation("up_to_message_id must be positive"));
    }
    let user_id = caller.user_id;
    require_member(&state, room_id, user_id).await?;

    let now = Utc::now();
    let cursor = with_db(&state, move |db| db.mark_room_seen_up_to(room_id, user_id, up_to, now)).await?;

    fanout::room_seen(&state, room_id, user_id, up_to, cursor.clone(), true);
    Ok(Json(MarkSeenResponse {
        room_id,
        up_to_message_id: up_to,
        affected: cursor.affected,
        last_seen_message_id: cursor.last_seen_message_id,
        last_seen_at: cursor.last_seen_at,
    }))
}

pub async fn last_seen(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<LastSeenResponse>, ApiError> {
    let user_id = caller.user_id;
    require_member(&state, room_id, user_id).await?;

    let (last_seen_message_id, last_seen_at) =
        with_db(&state, move |db| db.room_last_seen(room_id, user_id)).await?;
    Ok(Json(LastSeenResponse {
        room_id,
        user_id,
        last_seen_message_id,
        last_seen_at,
    }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let user_id = caller.user_id;
    require_member(&state, room_id, user_id).await?;

    let unread_count = with_db(&state, move |db| db.unread_count(room_id, user_id)).await?;
    Ok(Json(UnreadCountResponse {
        room_id,
        user_id,
        unread_count,
    }))
}

pub async fn unread_counts(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<UnreadCountsResponse>, ApiError> {
    let user_id = caller.user_id;
    let counts = with_db(&state, move |db| db.unread_counts_by_rooms(user_id)).await?;
    Ok(Json(UnreadCountsResponse { user_id, counts }))
}

/// Sender of the message, after checking the caller shares its room.
async fn message_sender(state: &AppState, message_id: i64, user_id: i64) -> Result<i64, ApiError> {
    let (room_id, sender_id) = with_db(state, move |db| db.message_room_and_sender(message_id)).await?;
    require_member(state, room_id, user_id).await?;
    Ok(sender_id)
}

pub async fn seen_summary(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<MessageSeenSummary>, ApiError> {
    let user_id = caller.user_id;
    let sender_id = message_sender(&state, message_id, user_id).await?;

    let summary =
        with_db(&state, move |db| db.message_seen_summary(message_id, user_id, Some(sender_id))).await?;
    Ok(Json(summary))
}

pub async fn seen_users(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Query(query): Query<SeenUsersQuery>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<SeenUsersResponse>, ApiError> {
    let sender_id = message_sender(&state, message_id, caller.user_id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_SEEN_USERS).clamp(1, MAX_SEEN_USERS);

    let users = with_db(&state, move |db| db.seen_users(message_id, Some(sender_id), limit)).await?;
    Ok(Json(SeenUsersResponse { message_id, users }))
}
