use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessageView, ReactionSummaryItem, RoomInfo, RoomKind};

/// Envelope pushed over the realtime gateway.
///
/// Serializes as `{"type": ..., "data": ..., "room_id": ..., "ts": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: GatewayEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<i64>,
    /// Milliseconds since the epoch at which the envelope was built.
    pub ts: i64,
}

impl Envelope {
    pub fn new(room_id: Option<i64>, event: GatewayEvent) -> Self {
        Self {
            event,
            room_id,
            ts: Utc::now().timestamp_millis(),
        }
    }

    pub fn for_room(room_id: i64, event: GatewayEvent) -> Self {
        Self::new(Some(room_id), event)
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }
}

/// Room identity attached to room-scoped events so clients can update their
/// sidebar without a fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBrief {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// First envelope on every connection
    #[serde(rename = "ready")]
    Ready { user_id: i64 },

    #[serde(rename = "message_created")]
    MessageCreated {
        message: MessageView,
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<RoomBrief>,
    },

    /// Recomputed reaction summary; `reacted_by_me` is relative to `actor_id`.
    #[serde(rename = "reaction_updated")]
    ReactionUpdated {
        message_id: i64,
        actor_id: i64,
        reactions: Vec<ReactionSummaryItem>,
    },

    #[serde(rename = "room_seen_update")]
    RoomSeenUpdate {
        user_id: i64,
        display_name: String,
        avatar_url: Option<String>,
        last_seen_message_id: i64,
        last_seen_at: Option<DateTime<Utc>>,
        up_to_message_id: i64,
    },

    /// Per-recipient unread badge. Only ever sent to `user_id`.
    #[serde(rename = "room_unread_update")]
    RoomUnreadUpdate {
        user_id: i64,
        unread_count: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_message: Option<MessageView>,
    },

    #[serde(rename = "room.member_added")]
    MemberAdded { user_ids: Vec<i64>, added_by: i64 },

    #[serde(rename = "room.member_removed")]
    MemberRemoved { user_id: i64, removed_by: i64 },

    #[serde(rename = "room.joined")]
    RoomJoined { room: RoomInfo },

    #[serde(rename = "room.deleted")]
    RoomDeleted { deleted_by: i64 },
}

impl GatewayEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::MessageCreated { .. } => "message_created",
            Self::ReactionUpdated { .. } => "reaction_updated",
            Self::RoomSeenUpdate { .. } => "room_seen_update",
            Self::RoomUnreadUpdate { .. } => "room_unread_update",
            Self::MemberAdded { .. } => "room.member_added",
            Self::MemberRemoved { .. } => "room.member_removed",
            Self::RoomJoined { .. } => "room.joined",
            Self::RoomDeleted { .. } => "room.deleted",
        }
    }
}
