//! Row types as stored. Views handed to clients live in `parley_types`.

use chrono::{DateTime, Utc};
use parley_types::models::{
    DisplayBrief, MediaRef, MemberRole, MessageKind, MessageView, ReplyInfo, RoomKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRow {
    pub id: i64,
    pub name: Option<String>,
    pub kind: RoomKind,
    pub owner_id: i64,
    pub direct_key: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipRow {
    pub room_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub last_seen_message_id: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub kind: MessageKind,
    pub is_temp: bool,
    pub reply: Option<ReplyInfo>,
    pub media: Option<MediaRef>,
    /// Set only on day separators.
    pub separator_day: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageRow {
    pub fn into_view(self, sender: DisplayBrief) -> MessageView {
        MessageView {
            id: self.id,
            room_id: self.room_id,
            sender_id: self.sender_id,
            sender_name: sender.display_name,
            sender_avatar_url: sender.avatar_url,
            content: self.content,
            message_type: self.kind,
            is_temp: self.is_temp,
            reply: self.reply,
            media: self.media,
            reactions: Vec::new(),
            created_at: self.created_at,
        }
    }
}

/// A message joined with its sender's current display brief.
#[derive(Debug, Clone)]
pub struct MessageWithSender {
    pub message: MessageRow,
    pub sender: DisplayBrief,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub kind: MessageKind,
    pub is_temp: bool,
    pub reply_to: Option<i64>,
    pub media: Option<MediaRef>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatedMessage {
    pub message: MessageRow,
    /// Separator inserted ahead of the message, when this was the first
    /// message of its calendar day in the room.
    pub day_separator: Option<MessageRow>,
}

#[derive(Debug, Clone)]
pub struct DirectRoom {
    pub room: RoomRow,
    /// True when this call created the room.
    pub created: bool,
    /// Participants who were not members before this call.
    pub joined: Vec<i64>,
}

/// Membership cursor after a mark-seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenCursor {
    pub affected: i64,
    pub last_seen_message_id: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Explicit per-column profile update. `None` leaves a column unchanged;
/// `avatar_url: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub display_name: Option<String>,
    pub avatar_url: Option<Option<String>>,
}

impl ProfilePatch {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.avatar_url.is_none()
    }
}
