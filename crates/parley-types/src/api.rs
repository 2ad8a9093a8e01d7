use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{DisplayBrief, MessageView, ReactionSummaryItem, RoomInfo, RoomMember, SeenUser};

// -- JWT Claims --

/// Claims carried by caller tokens. Tokens are issued elsewhere; this service
/// only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessagesPage {
    pub messages: Vec<MessageView>,
}

// -- Reactions --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub reaction: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleReactionResponse {
    pub message_id: i64,
    pub reaction: String,
    pub added: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveReactionResponse {
    pub message_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
    pub removed: bool,
    pub all: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReactionSummaryResponse {
    pub message_id: i64,
    pub reactions: Vec<ReactionSummaryItem>,
}

// -- Receipts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkSeenRequest {
    pub up_to_message_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkSeenResponse {
    pub room_id: i64,
    pub up_to_message_id: i64,
    pub affected: i64,
    pub last_seen_message_id: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LastSeenResponse {
    pub room_id: i64,
    pub user_id: i64,
    pub last_seen_message_id: i64,
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub room_id: i64,
    pub user_id: i64,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountsResponse {
    pub user_id: i64,
    pub counts: HashMap<i64, i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SeenUsersResponse {
    pub message_id: i64,
    pub users: Vec<SeenUser>,
}

// -- Rooms --

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomResponse {
    pub room: RoomInfo,
    pub created: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMembersRequest {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddMembersResponse {
    pub added: Vec<i64>,
    pub skipped: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RoomMembersResponse {
    pub members: Vec<RoomMember>,
}

// -- Profile --

/// Partial profile update. A missing field is left unchanged; for
/// `avatar_url`, an explicit `null` clears it.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePatchRequest {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub avatar_url: Option<Option<String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub user_id: i64,
    #[serde(flatten)]
    pub profile: DisplayBrief,
}

fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}
