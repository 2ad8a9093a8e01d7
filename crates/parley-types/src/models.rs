use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest reply preview kept on a message, counted in characters.
pub const REPLY_PREVIEW_MAX_CHARS: usize = 300;

/// Longest reaction label accepted from a client, counted in characters.
pub const REACTION_MAX_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::System => "system",
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, Self::Image | Self::File)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant '{}'", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "file" => Ok(Self::File),
            "system" => Ok(Self::System),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Direct,
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

impl FromStr for RoomKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "group" => Ok(Self::Group),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Member,
    Owner,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Owner => "owner",
        }
    }
}

impl FromStr for MemberRole {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" => Ok(Self::Member),
            "owner" => Ok(Self::Owner),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Delivered,
    Seen,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

impl FromStr for ReceiptStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A room member as listed to the other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub user_id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Name and avatar shown next to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayBrief {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// Denormalized snapshot of the message being replied to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyInfo {
    pub message_id: i64,
    pub preview: String,
    pub sender_name: String,
    pub message_type: MessageKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub url: String,
    pub mime: String,
    pub size: i64,
}

/// A message as clients see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub room_id: i64,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_avatar_url: Option<String>,
    pub content: String,
    pub message_type: MessageKind,
    pub is_temp: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reactions: Vec<ReactionSummaryItem>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionSummaryItem {
    pub reaction: String,
    pub count: i64,
    pub reacted_by_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSeenSummary {
    pub message_id: i64,
    pub seen_count: i64,
    pub seen_by_me: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenUser {
    pub user_id: i64,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Room as rendered for a particular viewer. Direct rooms carry the other
/// participant's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub name: String,
    pub owner_id: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomListItem {
    #[serde(flatten)]
    pub room: RoomInfo,
    pub unread_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessageView>,
}

/// Trims content and rejects it when empty, except for system messages.
pub fn normalize_content(kind: MessageKind, content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() && kind != MessageKind::System {
        return None;
    }
    Some(trimmed.to_string())
}

/// Trims a reaction label; `None` when empty or too long.
pub fn normalize_reaction(label: &str) -> Option<String> {
    let trimmed = label.trim();
    if trimmed.is_empty() || trimmed.chars().count() > REACTION_MAX_CHARS {
        return None;
    }
    Some(trimmed.to_string())
}

/// Preview text stored alongside a reply. Media collapse to an icon label,
/// everything else keeps the first `REPLY_PREVIEW_MAX_CHARS` characters.
pub fn reply_preview(kind: MessageKind, content: &str) -> String {
    match kind {
        MessageKind::Image => "📷 Image".to_string(),
        MessageKind::File => "📎 File".to_string(),
        MessageKind::Text | MessageKind::System => {
            let text: String = content
                .trim()
                .chars()
                .take(REPLY_PREVIEW_MAX_CHARS)
                .collect();
            text.trim_end().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_counts_characters_not_bytes() {
        let long = "é".repeat(REPLY_PREVIEW_MAX_CHARS + 20);
        let preview = reply_preview(MessageKind::Text, &long);
        assert_eq!(preview.chars().count(), REPLY_PREVIEW_MAX_CHARS);
    }

    #[test]
    fn preview_uses_icon_for_media() {
        assert_eq!(reply_preview(MessageKind::Image, "https://x/y.png"), "📷 Image");
        assert_eq!(reply_preview(MessageKind::File, "report.pdf"), "📎 File");
    }

    #[test]
    fn preview_of_blank_text_is_empty() {
        assert_eq!(reply_preview(MessageKind::Text, "   \n "), "");
    }

    #[test]
    fn content_rules() {
        assert_eq!(normalize_content(MessageKind::Text, "  hi "), Some("hi".into()));
        assert_eq!(normalize_content(MessageKind::Text, "   "), None);
        assert_eq!(normalize_content(MessageKind::System, ""), Some(String::new()));
    }

    #[test]
    fn message_kind_parses_known_names_only() {
        assert_eq!("image".parse::<MessageKind>(), Ok(MessageKind::Image));
        assert!("video".parse::<MessageKind>().is_err());
    }
}
