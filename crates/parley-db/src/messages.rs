use std::time::Instant;

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use parley_types::SYSTEM_USER_ID;
use parley_types::models::{DisplayBrief, MediaRef, MessageKind, ReplyInfo, reply_preview};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use crate::models::{CreatedMessage, MessageRow, MessageWithSender, NewMessage};
use crate::rooms::touch_room;
use crate::sql::{get_parsed, get_ts, pick_name, ts};
use crate::{Database, Result, StoreError};

/// Default and maximum history page sizes.
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 200;

const MESSAGE_COLUMNS: &str = "m.id, m.room_id, m.sender_id, m.content, m.message_type, m.is_temp,
     m.reply_to_message_id, m.reply_preview, m.reply_sender_name, m.reply_message_type,
     m.media_url, m.media_mime, m.media_size, m.separator_day, m.created_at";

/// Number of columns in `MESSAGE_COLUMNS`; joined columns follow.
const MESSAGE_WIDTH: usize = 15;

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    let reply_to: Option<i64> = row.get(6)?;
    let reply = match reply_to {
        Some(message_id) => {
            let kind: Option<String> = row.get(9)?;
            Some(ReplyInfo {
                message_id,
                preview: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
                sender_name: row
                    .get::<_, Option<String>>(8)?
                    .unwrap_or_else(|| "Unknown".to_string()),
                message_type: kind
                    .as_deref()
                    .and_then(|k| k.parse().ok())
                    .unwrap_or(MessageKind::Text),
            })
        }
        None => None,
    };

    let media_url: Option<String> = row.get(10)?;
    let media = match media_url {
        Some(url) => Some(MediaRef {
            url,
            mime: row.get::<_, Option<String>>(11)?.unwrap_or_default(),
            size: row.get::<_, Option<i64>>(12)?.unwrap_or(0),
        }),
        None => None,
    };

    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        content: row.get(3)?,
        kind: get_parsed(row, 4)?,
        is_temp: row.get(5)?,
        reply,
        media,
        separator_day: row.get(13)?,
        created_at: get_ts(row, 14)?,
    })
}

fn message_with_sender(row: &Row<'_>) -> rusqlite::Result<MessageWithSender> {
    let message = message_from_row(row)?;
    let sender = DisplayBrief {
        display_name: pick_name(row.get(MESSAGE_WIDTH)?, row.get(MESSAGE_WIDTH + 1)?),
        avatar_url: row.get(MESSAGE_WIDTH + 2)?,
    };
    Ok(MessageWithSender { message, sender })
}

impl Database {
    /// Persists a message in one transaction: resolves the reply snapshot,
    /// inserts the day separator if this is the first message of its day in
    /// the room, then inserts the message itself.
    ///
    /// Membership and content checks are the caller's job.
    pub fn create_message(&self, new: &NewMessage) -> Result<CreatedMessage> {
        let offset = self.day_offset();
        self.with_conn_mut(|conn| create_in(conn, new, offset, None))
    }

    /// `create_message` bounded by `deadline`: fails with `DeadlineExceeded`
    /// and writes nothing unless the commit starts before it.
    pub fn create_message_until(&self, new: &NewMessage, deadline: Instant) -> Result<CreatedMessage> {
        let offset = self.day_offset();
        self.with_conn_mut_until(deadline, |conn| create_in(conn, new, offset, Some(deadline)))
    }

    /// Room and sender of a message.
    pub fn message_room_and_sender(&self, message_id: i64) -> Result<(i64, i64)> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT room_id, sender_id FROM messages WHERE id = ?1",
                params![message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(StoreError::MessageNotFound)
        })
    }

    /// One history page in ascending order. Without a cursor this is the
    /// newest page; with one it is the page strictly older than the cursor
    /// message by `(created_at, id)`.
    pub fn get_room_messages(
        &self,
        room_id: i64,
        before_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<MessageWithSender>> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE) as i64;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT * FROM (
                    SELECT {MESSAGE_COLUMNS}, u.display_name, u.username, u.avatar_url
                    FROM messages m
                    LEFT JOIN users u ON u.id = m.sender_id
                    WHERE m.room_id = ?1
                      AND (?2 IS NULL OR (m.created_at, m.id) < (
                          SELECT c.created_at, c.id FROM messages c
                          WHERE c.id = ?2 AND c.room_id = ?1))
                    ORDER BY m.created_at DESC, m.id DESC
                    LIMIT ?3
                 ) ORDER BY created_at ASC, id ASC"
            ))?;

            let page = stmt
                .query_map(params![room_id, before_id, limit], message_with_sender)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(page)
        })
    }

    /// Newest non-system message in the room with its sender.
    pub fn last_message(&self, room_id: i64) -> Result<Option<MessageWithSender>> {
        self.with_conn(|conn| query_last_message(conn, room_id))
    }
}

fn create_in(
    conn: &mut Connection,
    new: &NewMessage,
    offset: FixedOffset,
    deadline: Option<Instant>,
) -> Result<CreatedMessage> {
    let tx = conn.transaction()?;

    let reply = match new.reply_to {
        Some(target) => Some(resolve_reply(&tx, new.room_id, target)?),
        None => None,
    };

    let day_separator = if new.kind != MessageKind::System {
        ensure_day_separator(&tx, new.room_id, new.created_at, offset)?
    } else {
        None
    };

    let id = insert_message(&tx, new, reply.as_ref())?;
    let message = query_message(&tx, id)?.ok_or(StoreError::MessageNotFound)?;
    touch_room(&tx, new.room_id, &ts(new.created_at))?;

    // Dropping the transaction rolls it back
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(StoreError::DeadlineExceeded);
    }
    tx.commit()?;
    Ok(CreatedMessage {
        message,
        day_separator,
    })
}

pub(crate) fn query_last_message(conn: &Connection, room_id: i64) -> Result<Option<MessageWithSender>> {
    let last = conn
        .query_row(
            &format!(
                "SELECT {MESSAGE_COLUMNS}, u.display_name, u.username, u.avatar_url
                 FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.room_id = ?1 AND m.message_type <> 'system'
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT 1"
            ),
            params![room_id],
            message_with_sender,
        )
        .optional()?;
    Ok(last)
}

fn query_message(conn: &Connection, message_id: i64) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1"),
            params![message_id],
            message_from_row,
        )
        .optional()?;
    Ok(row)
}

/// Looks up the reply target within the same room and snapshots its preview.
fn resolve_reply(conn: &Connection, room_id: i64, target_id: i64) -> Result<ReplyInfo> {
    let target = conn
        .query_row(
            "SELECT m.content, m.message_type, u.display_name, u.username
             FROM messages m
             LEFT JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1 AND m.room_id = ?2",
            params![target_id, room_id],
            |row| {
                let kind: MessageKind = get_parsed(row, 1)?;
                let content: String = row.get(0)?;
                Ok(ReplyInfo {
                    message_id: target_id,
                    preview: reply_preview(kind, &content),
                    sender_name: pick_name(row.get(2)?, row.get(3)?),
                    message_type: kind,
                })
            },
        )
        .optional()?;

    target.ok_or(StoreError::InvalidReplyTarget)
}

/// Inserts the separator for the message's calendar day unless the room
/// already has one. The partial unique index turns a lost race into a no-op.
fn ensure_day_separator(
    conn: &Connection,
    room_id: i64,
    created_at: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Option<MessageRow>> {
    let day = created_at.with_timezone(&offset).date_naive();
    let day_key = day.format("%Y-%m-%d").to_string();

    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE room_id = ?1 AND separator_day = ?2)",
        params![room_id, day_key],
        |row| row.get(0),
    )?;
    if exists {
        return Ok(None);
    }

    let start_of_day = (day.and_time(NaiveTime::MIN)
        - Duration::seconds(i64::from(offset.local_minus_utc())))
    .and_utc();

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO messages
            (room_id, sender_id, content, message_type, is_temp, separator_day, created_at)
         VALUES (?1, ?2, ?3, 'system', 0, ?3, ?4)",
        params![room_id, SYSTEM_USER_ID, day_key, ts(start_of_day)],
    )?;
    if inserted == 0 {
        return Ok(None);
    }

    debug!(room_id, day = %day_key, "Inserted day separator");
    query_message(conn, conn.last_insert_rowid())
}

fn insert_message(conn: &Connection, new: &NewMessage, reply: Option<&ReplyInfo>) -> Result<i64> {
    conn.execute(
        "INSERT INTO messages (
            room_id, sender_id, content, message_type, is_temp,
            reply_to_message_id, reply_preview, reply_sender_name, reply_message_type,
            media_url, media_mime, media_size, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            new.room_id,
            new.sender_id,
            new.content,
            new.kind.as_str(),
            new.is_temp,
            reply.map(|r| r.message_id),
            reply.map(|r| r.preview.as_str()),
            reply.map(|r| r.sender_name.as_str()),
            reply.map(|r| r.message_type.as_str()),
            new.media.as_ref().map(|m| m.url.as_str()),
            new.media.as_ref().map(|m| m.mime.as_str()),
            new.media.as_ref().map(|m| m.size),
            ts(new.created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}
