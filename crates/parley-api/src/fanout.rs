//! Realtime side effects of writes. Each runs as its own task with its own
//! time budget, after the response has been sent; nothing here can fail a
//! request.

use std::future::Future;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use parley_db::Database;
use parley_db::models::SeenCursor;
use parley_types::events::{Envelope, GatewayEvent, RoomBrief};
use parley_types::models::{DisplayBrief, MessageView, RoomKind};

use crate::state::AppState;

/// Spawns `work` bounded by the fan-out timeout.
fn spawn<F>(state: &AppState, label: &'static str, work: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let budget = state.limits.fanout_timeout;
    tokio::spawn(async move {
        if timeout(budget, work).await.is_err() {
            warn!(task = label, "Fan-out timed out");
        }
    });
}

/// Store call from a fan-out task. Failures are logged and yield `None`.
async fn load<F, T>(state: &AppState, what: &'static str, f: F) -> Option<T>
where
    F: FnOnce(&Database) -> parley_db::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let st = state.clone();
    match tokio::task::spawn_blocking(move || f(&st.db)).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            error!(query = what, "Fan-out query failed: {}", e);
            None
        }
        Err(e) => {
            error!(query = what, "spawn_blocking join error: {}", e);
            None
        }
    }
}

/// Room identity per recipient. Direct rooms are named after the other
/// participant, so each member gets their own brief.
async fn room_briefs(state: &AppState, room_id: i64, members: Vec<i64>) -> Vec<(RoomBrief, Vec<i64>)> {
    let Some(first) = members.first().copied() else {
        return Vec::new();
    };
    let Some(info) = load(state, "room_display_info", move |db| db.room_display_info(room_id, first)).await.flatten()
    else {
        return Vec::new();
    };

    if info.kind == RoomKind::Group {
        let brief = RoomBrief {
            id: info.id,
            kind: info.kind,
            name: info.name,
        };
        return vec![(brief, members)];
    }

    let mut out = Vec::with_capacity(members.len());
    for user_id in members {
        if let Some(info) = load(state, "room_display_info", move |db| db.room_display_info(room_id, user_id))
            .await
            .flatten()
        {
            let brief = RoomBrief {
                id: info.id,
                kind: info.kind,
                name: info.name,
            };
            out.push((brief, vec![user_id]));
        }
    }
    out
}

/// `message_created` to every member, delivered receipts for recipients
/// reached, then a `room_unread_update` to each recipient.
pub fn message_created(state: &AppState, message: MessageView, day_separator: Option<MessageView>) {
    let st = state.clone();
    spawn(state, "message_created", async move {
        let room_id = message.room_id;
        let sender_id = message.sender_id;
        let message_id = message.id;

        let Some(members) = load(&st, "room_member_ids", move |db| db.room_member_ids(room_id)).await else {
            return;
        };

        let mut reached = Vec::new();
        for (brief, users) in room_briefs(&st, room_id, members.clone()).await {
            if let Some(separator) = &day_separator {
                let env = Envelope::for_room(
                    room_id,
                    GatewayEvent::MessageCreated {
                        message: separator.clone(),
                        room: Some(brief.clone()),
                    },
                );
                st.dispatcher.send_to_users(users.iter().copied(), &env).await;
            }

            let env = Envelope::for_room(
                room_id,
                GatewayEvent::MessageCreated {
                    message: message.clone(),
                    room: Some(brief),
                },
            );
            reached.extend(st.dispatcher.send_to_users(users, &env).await);
        }

        let recipients: Vec<i64> = reached.into_iter().filter(|&u| u != sender_id).collect();
        if !recipients.is_empty() {
            let now = Utc::now();
            load(&st, "mark_delivered", move |db| {
                for user_id in recipients {
                    db.mark_delivered(message_id, user_id, now)?;
                }
                Ok(())
            })
            .await;
        }

        for user_id in members.into_iter().filter(|&u| u != sender_id) {
            let Some(unread_count) = load(&st, "unread_count", move |db| db.unread_count(room_id, user_id)).await
            else {
                continue;
            };
            let env = Envelope::for_room(
                room_id,
                GatewayEvent::RoomUnreadUpdate {
                    user_id,
                    unread_count,
                    last_message: Some(message.clone()),
                },
            );
            st.dispatcher.send_to_user(user_id, &env).await;
        }
        debug!(room_id, message_id, "Message fan-out done");
    });
}

/// Recomputed reaction summary to every member of the message's room.
pub fn reaction_updated(state: &AppState, room_id: i64, message_id: i64, actor_id: i64) {
    let st = state.clone();
    spawn(state, "reaction_updated", async move {
        let loaded = load(&st, "reaction_summary", move |db| {
            Ok((db.reaction_summary(message_id, actor_id)?, db.room_member_ids(room_id)?))
        })
        .await;
        let Some((reactions, members)) = loaded else {
            return;
        };

        let env = Envelope::for_room(
            room_id,
            GatewayEvent::ReactionUpdated {
                message_id,
                actor_id,
                reactions,
            },
        );
        st.dispatcher.send_to_users(members, &env).await;
    });
}

/// The reader's new cursor to the room. With `include_reader` the reader's
/// other devices get it too.
pub fn room_seen(
    state: &AppState,
    room_id: i64,
    user_id: i64,
    up_to_message_id: i64,
    cursor: SeenCursor,
    include_reader: bool,
) {
    let st = state.clone();
    spawn(state, "room_seen_update", async move {
        let loaded = load(&st, "room_seen", move |db| {
            let targets = if include_reader {
                db.room_member_ids(room_id)?
            } else {
                db.room_member_ids_except(room_id, user_id)?
            };
            Ok((db.display_brief(user_id)?, targets))
        })
        .await;
        let Some((brief, targets)) = loaded else {
            return;
        };
        let brief = brief.unwrap_or_else(|| DisplayBrief {
            display_name: "Unknown".to_string(),
            avatar_url: None,
        });

        let env = Envelope::for_room(
            room_id,
            GatewayEvent::RoomSeenUpdate {
                user_id,
                display_name: brief.display_name,
                avatar_url: brief.avatar_url,
                last_seen_message_id: cursor.last_seen_message_id,
                last_seen_at: cursor.last_seen_at,
                up_to_message_id,
            },
        );
        st.dispatcher.send_to_users(targets, &env).await;
    });
}

/// `room.member_added` to the room and `room.joined` to each newcomer.
pub fn members_added(state: &AppState, room_id: i64, added_by: i64, user_ids: Vec<i64>) {
    let st = state.clone();
    spawn(state, "member_added", async move {
        let Some(members) = load(&st, "room_member_ids", move |db| db.room_member_ids(room_id)).await else {
            return;
        };

        let env = Envelope::for_room(
            room_id,
            GatewayEvent::MemberAdded {
                user_ids: user_ids.clone(),
                added_by,
            },
        );
        st.dispatcher.send_to_users(members, &env).await;

        for user_id in user_ids {
            room_joined_one(&st, room_id, user_id).await;
        }
    });
}

/// `room.joined` to the given users, each with the room as they see it.
pub fn room_joined(state: &AppState, room_id: i64, user_ids: Vec<i64>) {
    let st = state.clone();
    spawn(state, "room_joined", async move {
        for user_id in user_ids {
            room_joined_one(&st, room_id, user_id).await;
        }
    });
}

async fn room_joined_one(state: &AppState, room_id: i64, user_id: i64) {
    let room = load(state, "room_display_info", move |db| db.room_display_info(room_id, user_id)).await;
    if let Some(Some(room)) = room {
        let env = Envelope::for_room(room_id, GatewayEvent::RoomJoined { room });
        state.dispatcher.send_to_user(user_id, &env).await;
    }
}

/// `room.member_removed` to the remaining members and the removed user.
pub fn member_removed(state: &AppState, room_id: i64, removed_by: i64, user_id: i64) {
    let st = state.clone();
    spawn(state, "member_removed", async move {
        let Some(mut targets) = load(&st, "room_member_ids", move |db| db.room_member_ids(room_id)).await else {
            return;
        };
        targets.push(user_id);

        let env = Envelope::for_room(room_id, GatewayEvent::MemberRemoved { user_id, removed_by });
        st.dispatcher.send_to_users(targets, &env).await;
    });
}

/// `room.deleted` to everyone who was a member.
pub fn room_deleted(state: &AppState, room_id: i64, deleted_by: i64, former_members: Vec<i64>) {
    let st = state.clone();
    spawn(state, "room_deleted", async move {
        let env = Envelope::for_room(room_id, GatewayEvent::RoomDeleted { deleted_by });
        st.dispatcher.send_to_users(former_members, &env).await;
    });
}
