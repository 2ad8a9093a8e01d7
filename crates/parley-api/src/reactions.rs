use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;

use parley_types::api::{
    ReactionSummaryResponse, RemoveReactionResponse, ToggleReactionRequest, ToggleReactionResponse,
};
use parley_types::models::normalize_reaction;

use crate::error::ApiError;
use crate::fanout;
use crate::middleware::Caller;
use crate::state::{AppState, require_member, with_db};

#[derive(Debug, Deserialize)]
pub struct RemoveReactionQuery {
    /// Omitted or blank removes every reaction the caller holds.
    pub reaction: Option<String>,
}

/// Room of the message, after checking the caller belongs to it.
async fn message_room(state: &AppState, message_id: i64, user_id: i64) -> Result<i64, ApiError> {
    let (room_id, _) = with_db(state, move |db| db.message_room_and_sender(message_id)).await?;
    require_member(state, room_id, user_id).await?;
    Ok(room_id)
}

fn label(raw: &str) -> Result<String, ApiError> {
    normalize_reaction(raw).ok_or_else(|| ApiError::validation("reaction must be 1 to 64 characters"))
}

pub async fn toggle_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<ToggleReactionRequest>,
) -> Result<Json<ToggleReactionResponse>, ApiError> {
    let reaction = label(&req.reaction)?;
    let user_id = caller.user_id;
    let room_id = message_room(&state, message_id, user_id).await?;

    let r = reaction.clone();
    let added = with_db(&state, move |db| db.toggle_reaction(message_id, user_id, &r)).await?;

    fanout::reaction_updated(&state, room_id, message_id, user_id);
    Ok(Json(ToggleReactionResponse {
        message_id,
        reaction,
        added,
    }))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Query(query): Query<RemoveReactionQuery>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<RemoveReactionResponse>, ApiError> {
    let user_id = caller.user_id;
    let reaction = match query.reaction.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(label(raw)?),
        None => None,
    };
    let room_id = message_room(&state, message_id, user_id).await?;

    let r = reaction.clone();
    let removed = with_db(&state, move |db| match r {
        Some(r) => db.remove_reaction(message_id, user_id, &r),
        None => db.remove_all_reactions_by_user(message_id, user_id),
    })
    .await?;

    if removed > 0 {
        fanout::reaction_updated(&state, room_id, message_id, user_id);
    }
    Ok(Json(RemoveReactionResponse {
        message_id,
        all: reaction.is_none(),
        reaction,
        removed: removed > 0,
    }))
}

pub async fn get_reactions(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<ReactionSummaryResponse>, ApiError> {
    let user_id = caller.user_id;
    message_room(&state, message_id, user_id).await?;

    let reactions = with_db(&state, move |db| db.reaction_summary(message_id, user_id)).await?;
    Ok(Json(ReactionSummaryResponse {
        message_id,
        reactions,
    }))
}
