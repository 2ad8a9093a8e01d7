use std::collections::BTreeSet;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parley_types::SYSTEM_USER_ID;
use parley_types::api::{
    AddMembersRequest, AddMembersResponse, CreateGroupRequest, RoomMembersResponse, RoomResponse,
};
use parley_types::models::{MemberRole, RoomKind, RoomListItem};

use crate::error::ApiError;
use crate::fanout;
use crate::middleware::Caller;
use crate::state::{AppState, require_member, with_db};

const ROOM_NAME_MAX_CHARS: usize = 100;

pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<RoomListItem>>, ApiError> {
    let user_id = caller.user_id;
    let rooms = with_db(&state, move |db| db.list_rooms_for_user(user_id)).await?;
    Ok(Json(rooms))
}

/// Returns the direct room with `other`, creating it on first use.
pub async fn create_direct(
    State(state): State<AppState>,
    Path(other): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let me = caller.user_id;
    if other == me {
        return Err(ApiError::validation("cannot open a direct room with yourself"));
    }
    if other == SYSTEM_USER_ID {
        return Err(ApiError::NotFound("user"));
    }

    let (room, direct) = with_db(&state, move |db| {
        if !db.user_exists(other)? {
            return Ok(None);
        }
        let direct = db.create_direct_room(me, other)?;
        Ok(db.room_display_info(direct.room.id, me)?.map(|info| (info, direct)))
    })
    .await?
    .ok_or(ApiError::NotFound("user"))?;

    let created = direct.created;
    let status = if created {
        info!(room_id = room.id, "Direct room {} <-> {} created", me, other);
        fanout::room_joined(&state, room.id, vec![other]);
        StatusCode::CREATED
    } else {
        if !direct.joined.is_empty() {
            info!(room_id = room.id, "Direct room reopened, rejoined {:?}", direct.joined);
            fanout::members_added(&state, room.id, me, direct.joined);
        }
        StatusCode::OK
    };
    Ok((status, Json(RoomResponse { room, created })))
}

pub async fn create_group(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() || name.chars().count() > ROOM_NAME_MAX_CHARS {
        return Err(ApiError::validation("room name must be 1 to 100 characters"));
    }
    let owner = caller.user_id;
    let members: Vec<i64> = req
        .member_ids
        .into_iter()
        .filter(|&id| id != owner)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let lookup = members.clone();
    let unknown = with_db(&state, move |db| {
        for id in lookup {
            if id == SYSTEM_USER_ID || !db.user_exists(id)? {
                return Ok(Some(id));
            }
        }
        Ok(None)
    })
    .await?;
    if let Some(id) = unknown {
        return Err(ApiError::validation(format!("unknown user {id}")));
    }

    let ids = members.clone();
    let room = with_db(&state, move |db| {
        let row = db.create_group_room(&name, owner, &ids)?;
        db.room_display_info(row.id, owner)
    })
    .await?
    .ok_or(ApiError::NotFound("room"))?;

    info!(room_id = room.id, "Group room created by {}", owner);
    fanout::room_joined(&state, room.id, members);
    Ok((StatusCode::CREATED, Json(RoomResponse { room, created: true })))
}

pub async fn list_members(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<RoomMembersResponse>, ApiError> {
    require_member(&state, room_id, caller.user_id).await?;
    let members = with_db(&state, move |db| db.list_room_members(room_id)).await?;
    Ok(Json(RoomMembersResponse { members }))
}

/// Any member may add people to a group room. Unknown users and existing
/// members are reported as skipped.
pub async fn add_members(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<AddMembersRequest>,
) -> Result<Json<AddMembersResponse>, ApiError> {
    if req.user_ids.is_empty() {
        return Err(ApiError::validation("user_ids must not be empty"));
    }
    let actor = caller.user_id;
    require_member(&state, room_id, actor).await?;

    let candidates: BTreeSet<i64> = req.user_ids.into_iter().collect();
    let (added, skipped) = with_db(&state, move |db| {
        let room = db.get_room(room_id)?.ok_or(parley_db::StoreError::RoomNotFound)?;
        if room.kind != RoomKind::Group {
            return Ok(None);
        }

        let mut added = Vec::new();
        let mut skipped = Vec::new();
        for id in candidates {
            if id != SYSTEM_USER_ID && db.user_exists(id)? && db.add_member(room_id, id)? {
                added.push(id);
            } else {
                skipped.push(id);
            }
        }
        Ok(Some((added, skipped)))
    })
    .await?
    .ok_or_else(|| ApiError::validation("members can only be added to group rooms"))?;

    if !added.is_empty() {
        fanout::members_added(&state, room_id, actor, added.clone());
    }
    Ok(Json(AddMembersResponse { added, skipped }))
}

/// The owner may remove anyone but themselves; members may only leave.
pub async fn remove_member(
    State(state): State<AppState>,
    Path((room_id, user_id)): Path<(i64, i64)>,
    Extension(caller): Extension<Caller>,
) -> Result<StatusCode, ApiError> {
    let actor = caller.user_id;
    let membership = with_db(&state, move |db| db.membership(room_id, actor)).await?;
    let role = membership.map(|m| m.role).ok_or(ApiError::NotMember)?;

    match role {
        MemberRole::Owner if user_id == actor => {
            return Err(ApiError::Forbidden(
                "the owner cannot leave; delete the room instead".to_string(),
            ));
        }
        MemberRole::Member if user_id != actor => {
            return Err(ApiError::Forbidden("only the owner can remove members".to_string()));
        }
        _ => {}
    }

    let removed = with_db(&state, move |db| db.remove_member(room_id, user_id)).await?;
    if !removed {
        return Err(ApiError::NotFound("member"));
    }

    fanout::member_removed(&state, room_id, actor, user_id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_room(
    State(state): State<AppState>,
    Path(room_id): Path<i64>,
    Extension(caller): Extension<Caller>,
) -> Result<StatusCode, ApiError> {
    let actor = caller.user_id;
    let room = with_db(&state, move |db| db.get_room(room_id))
        .await?
        .ok_or(ApiError::NotFound("room"))?;
    if room.owner_id != actor {
        return Err(ApiError::Forbidden("only the owner can delete the room".to_string()));
    }

    let former = with_db(&state, move |db| db.delete_room(room_id)).await?;
    info!(room_id, "Room deleted by {}", actor);
    fanout::room_deleted(&state, room_id, actor, former);
    Ok(StatusCode::NO_CONTENT)
}

