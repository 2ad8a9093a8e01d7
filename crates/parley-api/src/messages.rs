use axum::{
    Extension, Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use parley_db::messages::DEFAULT_PAGE_SIZE;
use parley_db::models::NewMessage;
use parley_types::api::{MessagesPage, SendMessageRequest};
use parley_types::models::{DisplayBrief, MessageKind, MessageView, normalize_content};

use crate::error::ApiError;
use crate::fanout;
use crate::middleware::Caller;
use crate::state::{AppState, require_member, with_db, with_db_until};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    /// Page strictly older than this message.
    pub before_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub caption: Option<String>,
}

/// Client-supplied message type. Defaults to text; system is reserved.
pub(crate) fn parse_kind(raw: Option<&str>) -> Result<MessageKind, ApiError> {
    let kind = match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => MessageKind::Text,
        Some(s) => s
            .parse::<MessageKind>()
            .map_err(|e| ApiError::validation(e.to_string()))?,
    };
    if kind == MessageKind::System {
        return Err(ApiError::validation("system messages cannot be sent by clients"));
    }
    Ok(kind)
}

pub(crate) fn check_reply_target(reply_to: Option<i64>) -> Result<Option<i64>, ApiError> {
    match reply_to {
        Some(id) if id <= 0 => Err(ApiError::validation("reply_to_message_id must be positive")),
        other => Ok(other),
    }
}

/// Persists the message, then hands it to fan-out. The response never waits
/// on delivery.
pub(crate) async fn post_message(state: &AppState, new: NewMessage) -> Result<MessageView, ApiError> {
    require_member(state, new.room_id, new.sender_id).await?;

    let (created, sender, system) = with_db_until(state, move |db, deadline| {
        let created = db.create_message_until(&new, deadline)?;
        let sender = db.display_brief(new.sender_id)?;
        let system = match created.day_separator {
            Some(_) => db.display_brief(parley_types::SYSTEM_USER_ID)?,
            None => None,
        };
        Ok((created, sender, system))
    })
    .await?;

    let view = created.message.into_view(sender.unwrap_or_else(unknown_sender));
    let separator = created
        .day_separator
        .map(|row| row.into_view(system.unwrap_or_else(unknown_sender)));

    debug!(room_id = view.room_id, message_id = view.id, "Message created");
    fanout::message_created(state, view.clone(), separator);
    Ok(view)
}

fn unknown_sender() -> DisplayBrief {
    DisplayBrief {
        display_name: "Unknown".to_string(),
        avatar_url: None,
    }
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(req.message_type.as_deref())?;
    let content =
        normalize_content(kind, &req.content).ok_or_else(|| ApiError::validation("content must not be empty"))?;
    let reply_to = check_reply_target(req.reply_to_message_id)?;

    let view = post_message(
        &state,
        NewMessage {
            room_id,
            sender_id: caller.user_id,
            content,
            kind,
            is_temp: false,
            reply_to,
            media: None,
            created_at: Utc::now(),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// Streams the request body into the media store, then posts it as an
/// image or file message. The caption, if any, becomes the content.
pub async fn send_media(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<MediaQuery>,
    Extension(caller): Extension<Caller>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let kind = parse_kind(query.kind.as_deref().or(Some("file")))?;
    if !kind.is_media() {
        return Err(ApiError::validation("type must be image or file"));
    }
    // Check before accepting any bytes
    require_member(&state, room_id, caller.user_id).await?;

    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let media = state.media.store(kind, mime, body.into_data_stream()).await?;

    let content = query
        .caption
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| media.url.clone());

    let view = post_message(
        &state,
        NewMessage {
            room_id,
            sender_id: caller.user_id,
            content,
            kind,
            is_temp: false,
            reply_to: None,
            media: Some(media),
            created_at: Utc::now(),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(view)))
}

/// History page, oldest first, with reaction summaries for the caller.
/// Loading the newest page marks the room seen up to its last message.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<MessagesPage>, ApiError> {
    let user_id = caller.user_id;
    require_member(&state, room_id, user_id).await?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let before_id = query.before_id;

    let (rows, mut reactions) = with_db(&state, move |db| {
        let rows = db.get_room_messages(room_id, before_id, limit)?;
        let ids: Vec<i64> = rows.iter().map(|r| r.message.id).collect();
        let reactions = db.reaction_summary_batch(&ids, user_id)?;
        Ok((rows, reactions))
    })
    .await?;

    let messages: Vec<MessageView> = rows
        .into_iter()
        .map(|row| {
            let mut view = row.message.into_view(row.sender);
            view.reactions = reactions.remove(&view.id).unwrap_or_default();
            view
        })
        .collect();

    if before_id.is_none() {
        if let Some(newest) = messages.iter().map(|m| m.id).max() {
            let now = Utc::now();
            let cursor =
                with_db(&state, move |db| db.mark_room_seen_up_to(room_id, user_id, newest, now)).await?;
            if cursor.affected > 0 {
                fanout::room_seen(&state, room_id, user_id, newest, cursor, false);
            }
        }
    }

    Ok(Json(MessagesPage { messages }))
}
