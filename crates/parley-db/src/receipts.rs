use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parley_types::models::{MessageSeenSummary, ReceiptStatus, SeenUser};
use rusqlite::{OptionalExtension, params};

use crate::models::SeenCursor;
use crate::sql::{get_opt_ts, get_parsed, get_ts, pick_name, ts};
use crate::{Database, Result};

/// Display snapshot of `?1` written into new receipt rows.
const SNAPSHOT_NAME: &str = "(SELECT COALESCE(NULLIF(TRIM(u.display_name), ''), u.username)
                              FROM users u WHERE u.id = ?1)";
const SNAPSHOT_AVATAR: &str = "(SELECT u.avatar_url FROM users u WHERE u.id = ?1)";

impl Database {
    /// Marks every non-system message from other senders with id up to
    /// `up_to` as seen by `user_id`, then advances the membership cursor.
    /// Neither the receipts nor the cursor ever move backward.
    pub fn mark_room_seen_up_to(
        &self,
        room_id: i64,
        user_id: i64,
        up_to: i64,
        now: DateTime<Utc>,
    ) -> Result<SeenCursor> {
        let now = ts(now);

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let affected = tx.execute(
                &format!(
                    "INSERT INTO message_receipts
                        (room_id, message_id, user_id, status, seen_at, display_name, avatar_url)
                     SELECT m.room_id, m.id, ?1, 'seen', ?4, {SNAPSHOT_NAME}, {SNAPSHOT_AVATAR}
                     FROM messages m
                     WHERE m.room_id = ?2 AND m.id <= ?3
                       AND m.sender_id <> ?1 AND m.message_type <> 'system'
                     ON CONFLICT(message_id, user_id) DO UPDATE SET
                        status = 'seen',
                        seen_at = MAX(message_receipts.seen_at, excluded.seen_at)
                     WHERE message_receipts.status <> 'seen'
                        OR excluded.seen_at > message_receipts.seen_at"
                ),
                params![user_id, room_id, up_to, now],
            )?;

            // The cursor only lands on a message of this room. Its time also
            // covers the newest message being marked, so a sender clock ahead
            // of ours cannot leave it unread.
            tx.execute(
                "UPDATE room_members SET
                    last_seen_message_id = MAX(
                        last_seen_message_id,
                        COALESCE((SELECT MAX(id) FROM messages
                                  WHERE room_id = ?1 AND id <= ?3), 0)),
                    last_seen_at = MAX(
                        COALESCE(last_seen_at, ''),
                        ?4,
                        COALESCE((SELECT MAX(created_at) FROM messages
                                  WHERE room_id = ?1 AND id <= ?3), ''))
                 WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id, up_to, now],
            )?;

            let (last_seen_message_id, last_seen_at) = tx
                .query_row(
                    "SELECT last_seen_message_id, last_seen_at FROM room_members
                     WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| Ok((row.get(0)?, get_opt_ts(row, 1)?)),
                )
                .optional()?
                .unwrap_or((0, None));

            tx.commit()?;
            Ok(SeenCursor {
                affected: affected as i64,
                last_seen_message_id,
                last_seen_at,
            })
        })
    }

    /// Records delivery to `user_id`. An existing `seen` receipt is left
    /// as is. Returns true if a row changed.
    pub fn mark_delivered(&self, message_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool> {
        let now = ts(now);
        self.with_conn(|conn| {
            let changed = conn.execute(
                &format!(
                    "INSERT INTO message_receipts
                        (room_id, message_id, user_id, status, seen_at, display_name, avatar_url)
                     SELECT m.room_id, m.id, ?1, 'delivered', ?3, {SNAPSHOT_NAME}, {SNAPSHOT_AVATAR}
                     FROM messages m
                     WHERE m.id = ?2
                     ON CONFLICT(message_id, user_id) DO UPDATE SET
                        seen_at = excluded.seen_at
                     WHERE message_receipts.status = 'delivered'
                       AND excluded.seen_at > message_receipts.seen_at"
                ),
                params![user_id, message_id, now],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn receipt(&self, message_id: i64, user_id: i64) -> Result<Option<(ReceiptStatus, DateTime<Utc>)>> {
        self.with_conn(|conn| {
            let receipt = conn
                .query_row(
                    "SELECT status, seen_at FROM message_receipts
                     WHERE message_id = ?1 AND user_id = ?2",
                    params![message_id, user_id],
                    |row| Ok((get_parsed(row, 0)?, get_ts(row, 1)?)),
                )
                .optional()?;
            Ok(receipt)
        })
    }

    /// Highest message id and latest time the user has a seen receipt for in
    /// the room. `(0, None)` when there are none.
    pub fn room_last_seen(&self, room_id: i64, user_id: i64) -> Result<(i64, Option<DateTime<Utc>>)> {
        self.with_conn(|conn| {
            let last = conn.query_row(
                "SELECT COALESCE(MAX(message_id), 0), MAX(seen_at) FROM message_receipts
                 WHERE room_id = ?1 AND user_id = ?2 AND status = 'seen'",
                params![room_id, user_id],
                |row| Ok((row.get(0)?, get_opt_ts(row, 1)?)),
            )?;
            Ok(last)
        })
    }

    /// Non-system messages from others newer than the membership's
    /// `last_seen_at`. Zero for non-members.
    pub fn unread_count(&self, room_id: i64, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 JOIN room_members rm ON rm.room_id = m.room_id AND rm.user_id = ?2
                 WHERE m.room_id = ?1
                   AND m.message_type <> 'system'
                   AND m.sender_id <> ?2
                   AND m.created_at > COALESCE(rm.last_seen_at, '')",
                params![room_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Unread counts across all of the user's active rooms. Rooms with
    /// nothing unread are absent.
    pub fn unread_counts_by_rooms(&self, user_id: i64) -> Result<HashMap<i64, i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.room_id, COUNT(*) FROM room_members rm
                 JOIN rooms r ON r.id = rm.room_id AND r.is_active = 1
                 JOIN messages m ON m.room_id = rm.room_id
                 WHERE rm.user_id = ?1
                   AND m.message_type <> 'system'
                   AND m.sender_id <> ?1
                   AND m.created_at > COALESCE(rm.last_seen_at, '')
                 GROUP BY m.room_id",
            )?;
            let counts = stmt
                .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<rusqlite::Result<HashMap<i64, i64>>>()?;
            Ok(counts)
        })
    }

    pub fn message_seen_summary(
        &self,
        message_id: i64,
        viewer_id: i64,
        exclude_sender: Option<i64>,
    ) -> Result<MessageSeenSummary> {
        self.with_conn(|conn| {
            let (seen_count, seen_by_me) = conn.query_row(
                "SELECT
                    COUNT(DISTINCT CASE WHEN ?3 IS NULL OR user_id <> ?3 THEN user_id END),
                    COALESCE(MAX(user_id = ?2), 0)
                 FROM message_receipts
                 WHERE message_id = ?1 AND status = 'seen'",
                params![message_id, viewer_id, exclude_sender],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(MessageSeenSummary {
                message_id,
                seen_count,
                seen_by_me,
            })
        })
    }

    /// Users who saw the message, most recent first.
    pub fn seen_users(
        &self,
        message_id: i64,
        exclude_sender: Option<i64>,
        limit: usize,
    ) -> Result<Vec<SeenUser>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, display_name, avatar_url, seen_at FROM message_receipts
                 WHERE message_id = ?1 AND status = 'seen'
                   AND (?2 IS NULL OR user_id <> ?2)
                 ORDER BY seen_at DESC, user_id ASC
                 LIMIT ?3",
            )?;
            let users = stmt
                .query_map(params![message_id, exclude_sender, limit as i64], |row| {
                    Ok(SeenUser {
                        user_id: row.get(0)?,
                        display_name: pick_name(row.get(1)?, None),
                        avatar_url: row.get(2)?,
                        seen_at: get_ts(row, 3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(users)
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_types::models::ReceiptStatus;

    use crate::Database;
    use crate::models::ProfilePatch;
    use crate::testutil::{at, db, room_with, text};

    /// Room with members 1 and 2; user 1 sends `n` messages on the 4th.
    fn seeded(n: u32) -> (Database, i64, Vec<i64>) {
        let db = db();
        let room = room_with(&db, &[1, 2]);
        let ids = (0..n)
            .map(|i| {
                db.create_message(&text(room, 1, &format!("m{i}"), at(2026, 3, 4, 9, i)))
                    .unwrap()
                    .message
                    .id
            })
            .collect();
        (db, room, ids)
    }

    #[test]
    fn unread_counts_other_senders_only() {
        let (db, room, _) = seeded(3);
        db.create_message(&text(room, 2, "mine", at(2026, 3, 4, 10, 0))).unwrap();

        assert_eq!(db.unread_count(room, 2).unwrap(), 3);
        assert_eq!(db.unread_count(room, 1).unwrap(), 1);
    }

    #[test]
    fn marking_newest_drives_unread_to_zero() {
        let (db, room, ids) = seeded(3);
        let cursor = db
            .mark_room_seen_up_to(room, 2, *ids.last().unwrap(), at(2026, 3, 4, 12, 0))
            .unwrap();

        assert_eq!(cursor.affected, 3);
        assert_eq!(cursor.last_seen_message_id, *ids.last().unwrap());
        assert_eq!(db.unread_count(room, 2).unwrap(), 0);
        assert!(db.unread_counts_by_rooms(2).unwrap().is_empty());
    }

    #[test]
    fn stale_mark_does_not_regress_cursor() {
        let (db, room, ids) = seeded(4);
        db.mark_room_seen_up_to(room, 2, ids[3], at(2026, 3, 4, 12, 0)).unwrap();
        let seen_at = db.receipt(ids[0], 2).unwrap().unwrap().1;

        let cursor = db.mark_room_seen_up_to(room, 2, ids[1], at(2026, 3, 4, 11, 0)).unwrap();
        assert_eq!(cursor.affected, 0);
        assert_eq!(cursor.last_seen_message_id, ids[3]);
        assert_eq!(cursor.last_seen_at, Some(at(2026, 3, 4, 12, 0)));
        assert_eq!(db.receipt(ids[0], 2).unwrap().unwrap().1, seen_at);
    }

    #[test]
    fn cursor_stops_at_the_newest_message_of_the_room() {
        let (db, room, ids) = seeded(2);
        let other = room_with(&db, &[1, 2]);
        let elsewhere = db.create_message(&text(other, 1, "x", at(2026, 3, 4, 11, 0))).unwrap().message.id;

        let cursor = db.mark_room_seen_up_to(room, 2, i64::MAX, at(2026, 3, 4, 12, 0)).unwrap();
        assert_eq!(cursor.last_seen_message_id, ids[1]);

        // Ids beyond the room's history do not pin the cursor ahead of it
        let next = db.create_message(&text(room, 1, "later", at(2026, 3, 4, 13, 0))).unwrap().message.id;
        assert!(next > elsewhere);
        let cursor = db.mark_room_seen_up_to(room, 2, next, at(2026, 3, 4, 14, 0)).unwrap();
        assert_eq!(cursor.last_seen_message_id, next);

        let cursor = db.mark_room_seen_up_to(other, 2, ids[0], at(2026, 3, 4, 14, 0)).unwrap();
        assert_eq!(cursor.last_seen_message_id, 0);
    }

    #[test]
    fn unread_ignores_separators_and_counts_after_cursor() {
        let (db, room, ids) = seeded(2);
        db.mark_room_seen_up_to(room, 2, ids[1], at(2026, 3, 4, 9, 30)).unwrap();

        // New day, new separator, one new message
        db.create_message(&text(room, 1, "tomorrow", at(2026, 3, 5, 8, 0))).unwrap();
        assert_eq!(db.unread_count(room, 2).unwrap(), 1);
        assert_eq!(db.unread_counts_by_rooms(2).unwrap()[&room], 1);
    }

    #[test]
    fn own_and_system_messages_get_no_receipts() {
        let (db, room, ids) = seeded(1);
        let own = db.create_message(&text(room, 2, "me", at(2026, 3, 4, 9, 5))).unwrap().message;
        db.mark_room_seen_up_to(room, 2, own.id, at(2026, 3, 4, 12, 0)).unwrap();

        assert!(db.receipt(own.id, 2).unwrap().is_none());
        assert_eq!(db.receipt(ids[0], 2).unwrap().unwrap().0, ReceiptStatus::Seen);
        // ids[0] - 1 is the separator
        assert!(db.receipt(ids[0] - 1, 2).unwrap().is_none());
    }

    #[test]
    fn delivered_never_downgrades_seen() {
        let (db, room, ids) = seeded(1);
        assert!(db.mark_delivered(ids[0], 2, at(2026, 3, 4, 9, 30)).unwrap());
        assert_eq!(db.receipt(ids[0], 2).unwrap().unwrap().0, ReceiptStatus::Delivered);

        db.mark_room_seen_up_to(room, 2, ids[0], at(2026, 3, 4, 10, 0)).unwrap();
        assert!(!db.mark_delivered(ids[0], 2, at(2026, 3, 4, 11, 0)).unwrap());

        let (status, seen_at) = db.receipt(ids[0], 2).unwrap().unwrap();
        assert_eq!(status, ReceiptStatus::Seen);
        assert_eq!(seen_at, at(2026, 3, 4, 10, 0));
    }

    #[test]
    fn last_seen_from_receipts() {
        let (db, room, ids) = seeded(3);
        assert_eq!(db.room_last_seen(room, 2).unwrap(), (0, None));

        db.mark_room_seen_up_to(room, 2, ids[1], at(2026, 3, 4, 12, 0)).unwrap();
        assert_eq!(
            db.room_last_seen(room, 2).unwrap(),
            (ids[1], Some(at(2026, 3, 4, 12, 0)))
        );
    }

    #[test]
    fn seen_summary_and_users() {
        let db = db();
        let room = room_with(&db, &[1, 2, 3]);
        let msg = db.create_message(&text(room, 1, "hi", at(2026, 3, 4, 9, 0))).unwrap().message;

        db.update_profile(
            2,
            &ProfilePatch {
                display_name: Some("Bea".into()),
                avatar_url: None,
            },
        )
        .unwrap();
        db.mark_room_seen_up_to(room, 2, msg.id, at(2026, 3, 4, 10, 0)).unwrap();
        db.mark_room_seen_up_to(room, 3, msg.id, at(2026, 3, 4, 11, 0)).unwrap();

        let summary = db.message_seen_summary(msg.id, 2, Some(1)).unwrap();
        assert_eq!(summary.seen_count, 2);
        assert!(summary.seen_by_me);
        assert!(!db.message_seen_summary(msg.id, 1, Some(1)).unwrap().seen_by_me);

        let users = db.seen_users(msg.id, Some(1), 10).unwrap();
        assert_eq!(users.iter().map(|u| u.user_id).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(users[1].display_name, "Bea");

        // Names are snapshotted when the receipt is written
        db.update_profile(
            2,
            &ProfilePatch {
                display_name: Some("Beatrice".into()),
                avatar_url: None,
            },
        )
        .unwrap();
        let users = db.seen_users(msg.id, Some(1), 1).unwrap();
        assert_eq!(users.len(), 1);
        let again = db.seen_users(msg.id, Some(1), 10).unwrap();
        assert_eq!(again[1].display_name, "Bea");
    }
}
