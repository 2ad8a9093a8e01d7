use std::collections::BTreeSet;

use chrono::Utc;
use parley_types::models::{MemberRole, RoomInfo, RoomKind, RoomListItem, RoomMember};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::messages::query_last_message;
use crate::models::{DirectRoom, MembershipRow, RoomRow};
use crate::sql::{get_opt_ts, get_parsed, get_ts, pick_name, ts};
use crate::users::query_display_brief;
use crate::{Database, Result, StoreError};

const ROOM_COLUMNS: &str =
    "r.id, r.name, r.kind, r.owner_id, r.direct_key, r.is_active, r.created_at, r.updated_at";

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: get_parsed(row, 2)?,
        owner_id: row.get(3)?,
        direct_key: row.get(4)?,
        is_active: row.get(5)?,
        created_at: get_ts(row, 6)?,
        updated_at: get_ts(row, 7)?,
    })
}

/// Canonical key for the unordered pair.
pub fn direct_key(a: i64, b: i64) -> String {
    format!("{}:{}", a.min(b), a.max(b))
}

impl Database {
    /// Returns the direct room for the pair, creating it if needed. A
    /// participant who left is added back.
    pub fn create_direct_room(&self, a: i64, b: i64) -> Result<DirectRoom> {
        let key = direct_key(a, b);
        let now = ts(Utc::now());

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO rooms (name, kind, owner_id, direct_key, created_at, updated_at)
                 VALUES (NULL, 'direct', ?1, ?2, ?3, ?3)",
                params![a, key, now],
            )?;

            let room = tx.query_row(
                &format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.direct_key = ?1"),
                params![key],
                room_from_row,
            )?;

            let mut joined = Vec::new();
            for user in [a, b] {
                if insert_member(&tx, room.id, user, MemberRole::Member, &now)? {
                    joined.push(user);
                }
            }
            if inserted == 0 && !joined.is_empty() {
                touch_room(&tx, room.id, &now)?;
            }
            tx.commit()?;
            Ok(DirectRoom {
                room,
                created: inserted == 1,
                joined,
            })
        })
    }

    /// Owner joins as `owner`; the remaining ids are deduplicated and join as
    /// `member`.
    pub fn create_group_room(&self, name: &str, owner_id: i64, member_ids: &[i64]) -> Result<RoomRow> {
        let now = ts(Utc::now());
        let members: BTreeSet<i64> = member_ids.iter().copied().filter(|&id| id != owner_id).collect();

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO rooms (name, kind, owner_id, created_at, updated_at)
                 VALUES (?1, 'group', ?2, ?3, ?3)",
                params![name, owner_id, now],
            )?;
            let room_id = tx.last_insert_rowid();

            insert_member(&tx, room_id, owner_id, MemberRole::Owner, &now)?;
            for user in members {
                insert_member(&tx, room_id, user, MemberRole::Member, &now)?;
            }

            let room = query_room(&tx, room_id)?.ok_or(StoreError::RoomNotFound)?;
            tx.commit()?;
            Ok(room)
        })
    }

    pub fn get_room(&self, room_id: i64) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| query_room(conn, room_id))
    }

    /// Adds a member. Returns false if they already belonged to the room.
    pub fn add_member(&self, room_id: i64, user_id: i64) -> Result<bool> {
        let now = ts(Utc::now());
        self.with_conn(|conn| {
            let added = insert_member(conn, room_id, user_id, MemberRole::Member, &now)?;
            if added {
                touch_room(conn, room_id, &now)?;
            }
            Ok(added)
        })
    }

    pub fn remove_member(&self, room_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
            )?;
            Ok(removed == 1)
        })
    }

    /// Deletes the room and everything hanging off it. Returns the ids of the
    /// members it had.
    pub fn delete_room(&self, room_id: i64) -> Result<Vec<i64>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let members = query_member_ids(&tx, room_id)?;
            let deleted = tx.execute("DELETE FROM rooms WHERE id = ?1", params![room_id])?;
            if deleted == 0 {
                return Err(StoreError::RoomNotFound);
            }
            tx.commit()?;
            Ok(members)
        })
    }

    pub fn membership(&self, room_id: i64, user_id: i64) -> Result<Option<MembershipRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT room_id, user_id, role, joined_at, last_seen_message_id, last_seen_at
                     FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| {
                        Ok(MembershipRow {
                            room_id: row.get(0)?,
                            user_id: row.get(1)?,
                            role: get_parsed(row, 2)?,
                            joined_at: get_ts(row, 3)?,
                            last_seen_message_id: row.get(4)?,
                            last_seen_at: get_opt_ts(row, 5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// True when the user belongs to an active room.
    pub fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let member = conn.query_row(
                "SELECT EXISTS(
                    SELECT 1 FROM room_members rm
                    JOIN rooms r ON r.id = rm.room_id
                    WHERE rm.room_id = ?1 AND rm.user_id = ?2 AND r.is_active = 1
                 )",
                params![room_id, user_id],
                |row| row.get(0),
            )?;
            Ok(member)
        })
    }

    /// Members in join order, with their roles.
    pub fn list_room_members(&self, room_id: i64) -> Result<Vec<RoomMember>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT rm.user_id, u.display_name, u.username, u.avatar_url,
                        rm.role, rm.joined_at, rm.last_seen_at
                 FROM room_members rm
                 LEFT JOIN users u ON u.id = rm.user_id
                 WHERE rm.room_id = ?1
                 ORDER BY rm.joined_at ASC, rm.user_id ASC",
            )?;
            let members = stmt
                .query_map(params![room_id], |row| {
                    Ok(RoomMember {
                        user_id: row.get(0)?,
                        display_name: pick_name(row.get(1)?, row.get(2)?),
                        avatar_url: row.get(3)?,
                        role: get_parsed(row, 4)?,
                        joined_at: get_ts(row, 5)?,
                        last_seen_at: get_opt_ts(row, 6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(members)
        })
    }

    pub fn room_member_ids(&self, room_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| query_member_ids(conn, room_id))
    }

    pub fn room_member_ids_except(&self, room_id: i64, except: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM room_members
                 WHERE room_id = ?1 AND user_id <> ?2 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map(params![room_id, except], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<i64>>>()?;
            Ok(ids)
        })
    }

    /// Room as `viewer_id` sees it.
    pub fn room_display_info(&self, room_id: i64, viewer_id: i64) -> Result<Option<RoomInfo>> {
        self.with_conn(|conn| match query_room(conn, room_id)? {
            Some(room) => room_info(conn, room, viewer_id).map(Some),
            None => Ok(None),
        })
    }

    /// Rooms the user belongs to, most recently active first, with unread
    /// counts and the newest message for the sidebar preview.
    pub fn list_rooms_for_user(&self, user_id: i64) -> Result<Vec<RoomListItem>> {
        let counts = self.unread_counts_by_rooms(user_id)?;

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ROOM_COLUMNS} FROM rooms r
                 JOIN room_members rm ON rm.room_id = r.id
                 WHERE rm.user_id = ?1 AND r.is_active = 1
                 ORDER BY r.updated_at DESC, r.id DESC"
            ))?;
            let rooms = stmt
                .query_map(params![user_id], room_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rooms
                .into_iter()
                .map(|room| {
                    let unread_count = counts.get(&room.id).copied().unwrap_or(0);
                    let last_message =
                        query_last_message(conn, room.id)?.map(|m| m.message.into_view(m.sender));
                    Ok(RoomListItem {
                        room: room_info(conn, room, user_id)?,
                        unread_count,
                        last_message,
                    })
                })
                .collect()
        })
    }
}

fn insert_member(
    conn: &Connection,
    room_id: i64,
    user_id: i64,
    role: MemberRole,
    now: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id, role, joined_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![room_id, user_id, role.as_str(), now],
    )?;
    Ok(inserted == 1)
}

pub(crate) fn touch_room(conn: &Connection, room_id: i64, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE rooms SET updated_at = ?2 WHERE id = ?1 AND updated_at < ?2",
        params![room_id, now],
    )?;
    Ok(())
}

fn query_room(conn: &Connection, room_id: i64) -> Result<Option<RoomRow>> {
    let room = conn
        .query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM rooms r WHERE r.id = ?1"),
            params![room_id],
            room_from_row,
        )
        .optional()?;
    Ok(room)
}

fn query_member_ids(conn: &Connection, room_id: i64) -> Result<Vec<i64>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM room_members WHERE room_id = ?1 ORDER BY user_id")?;
    let ids = stmt
        .query_map(params![room_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}

fn room_info(conn: &Connection, room: RoomRow, viewer_id: i64) -> Result<RoomInfo> {
    let name = match (room.kind, room.direct_key.as_deref()) {
        (RoomKind::Direct, Some(key)) => {
            let other = other_participant(key, viewer_id);
            match other {
                Some(id) => query_display_brief(conn, id)?
                    .map(|b| b.display_name)
                    .unwrap_or_else(|| "Unknown".to_string()),
                None => "Unknown".to_string(),
            }
        }
        _ => room.name.clone().unwrap_or_default(),
    };

    Ok(RoomInfo {
        id: room.id,
        kind: room.kind,
        name,
        owner_id: room.owner_id,
        is_active: room.is_active,
        created_at: room.created_at,
        updated_at: room.updated_at,
    })
}

fn other_participant(key: &str, viewer_id: i64) -> Option<i64> {
    let (a, b) = key.split_once(':')?;
    let (a, b): (i64, i64) = (a.parse().ok()?, b.parse().ok()?);
    Some(if a == viewer_id { b } else { a })
}
