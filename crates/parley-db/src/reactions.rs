use std::collections::HashMap;

use chrono::Utc;
use parley_types::models::ReactionSummaryItem;
use rusqlite::{params, params_from_iter};

use crate::sql::{placeholders, ts};
use crate::{Database, Result};

impl Database {
    /// Adds the reaction, or removes it if the user already holds it.
    /// Returns true when it was added.
    pub fn toggle_reaction(&self, message_id: i64, user_id: i64, reaction: &str) -> Result<bool> {
        let now = ts(Utc::now());
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            // Try-insert first so the outcome is decided by the unique index
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO message_reactions (message_id, user_id, reaction, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![message_id, user_id, reaction, now],
            )?;

            if inserted == 0 {
                tx.execute(
                    "DELETE FROM message_reactions
                     WHERE message_id = ?1 AND user_id = ?2 AND reaction = ?3",
                    params![message_id, user_id, reaction],
                )?;
            }
            tx.commit()?;
            Ok(inserted == 1)
        })
    }

    /// Idempotent. Returns the number of rows removed.
    pub fn remove_reaction(&self, message_id: i64, user_id: i64, reaction: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM message_reactions
                 WHERE message_id = ?1 AND user_id = ?2 AND reaction = ?3",
                params![message_id, user_id, reaction],
            )?;
            Ok(removed)
        })
    }

    pub fn remove_all_reactions_by_user(&self, message_id: i64, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM message_reactions WHERE message_id = ?1 AND user_id = ?2",
                params![message_id, user_id],
            )?;
            Ok(removed)
        })
    }

    /// Per-label counts, highest count first, then by label.
    pub fn reaction_summary(&self, message_id: i64, viewer_id: i64) -> Result<Vec<ReactionSummaryItem>> {
        let mut batch = self.reaction_summary_batch(&[message_id], viewer_id)?;
        Ok(batch.remove(&message_id).unwrap_or_default())
    }

    /// Summaries for many messages. Messages without reactions are absent.
    pub fn reaction_summary_batch(
        &self,
        message_ids: &[i64],
        viewer_id: i64,
    ) -> Result<HashMap<i64, Vec<ReactionSummaryItem>>> {
        if message_ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let sql = format!(
                "SELECT message_id, reaction, COUNT(*) AS n, MAX(user_id = ?) AS mine
                 FROM message_reactions
                 WHERE message_id IN ({})
                 GROUP BY message_id, reaction
                 ORDER BY message_id, n DESC, reaction ASC",
                placeholders(message_ids.len())
            );
            let mut stmt = conn.prepare(&sql)?;

            let args = std::iter::once(viewer_id).chain(message_ids.iter().copied());
            let rows = stmt.query_map(params_from_iter(args), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    ReactionSummaryItem {
                        reaction: row.get(1)?,
                        count: row.get(2)?,
                        reacted_by_me: row.get(3)?,
                    },
                ))
            })?;

            let mut out: HashMap<i64, Vec<ReactionSummaryItem>> = HashMap::new();
            for row in rows {
                let (message_id, item) = row?;
                out.entry(message_id).or_default().push(item);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::testutil::{at, db, room_with, text};

    #[test]
    fn toggle_twice_restores_original_state() {
        let db = db();
        let room = room_with(&db, &[1, 2]);
        let msg = db.create_message(&text(room, 1, "hi", at(2026, 3, 4, 9, 0))).unwrap().message;

        assert!(db.toggle_reaction(msg.id, 2, "👍").unwrap());
        assert!(!db.toggle_reaction(msg.id, 2, "👍").unwrap());
        assert!(db.reaction_summary(msg.id, 2).unwrap().is_empty());
    }

    #[test]
    fn concurrent_toggles_never_duplicate() {
        let db = Arc::new(db());
        let room = room_with(&db, &[1, 2]);
        let msg = db.create_message(&text(room, 1, "hi", at(2026, 3, 4, 9, 0))).unwrap().message;

        let handles: Vec<_> = (0..9)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.toggle_reaction(msg.id, 2, "🔥").unwrap())
            })
            .collect();
        let added = handles.into_iter().map(|h| h.join().unwrap()).filter(|a| *a).count();

        // Odd number of toggles leaves the reaction on
        assert_eq!(added, 5);
        let summary = db.reaction_summary(msg.id, 2).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].count, 1);
    }

    #[test]
    fn summary_orders_by_count_then_label() {
        let db = db();
        let room = room_with(&db, &[1, 2, 3]);
        let msg = db.create_message(&text(room, 1, "hi", at(2026, 3, 4, 9, 0))).unwrap().message;

        db.toggle_reaction(msg.id, 1, "b").unwrap();
        db.toggle_reaction(msg.id, 2, "a").unwrap();
        db.toggle_reaction(msg.id, 2, "c").unwrap();
        db.toggle_reaction(msg.id, 3, "c").unwrap();

        let summary = db.reaction_summary(msg.id, 2).unwrap();
        let labels: Vec<&str> = summary.iter().map(|s| s.reaction.as_str()).collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
        assert_eq!(summary[0].count, 2);
        assert!(summary[0].reacted_by_me);
        assert!(summary[1].reacted_by_me);
        assert!(!summary[2].reacted_by_me);
    }

    #[test]
    fn remove_single_and_all() {
        let db = db();
        let room = room_with(&db, &[1, 2]);
        let msg = db.create_message(&text(room, 1, "hi", at(2026, 3, 4, 9, 0))).unwrap().message;

        db.toggle_reaction(msg.id, 2, "a").unwrap();
        db.toggle_reaction(msg.id, 2, "b").unwrap();
        db.toggle_reaction(msg.id, 1, "a").unwrap();

        assert_eq!(db.remove_reaction(msg.id, 2, "a").unwrap(), 1);
        assert_eq!(db.remove_reaction(msg.id, 2, "a").unwrap(), 0);
        assert_eq!(db.remove_all_reactions_by_user(msg.id, 2).unwrap(), 1);

        let summary = db.reaction_summary(msg.id, 1).unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].reaction, "a");
    }

    #[test]
    fn batch_omits_messages_without_reactions() {
        let db = db();
        let room = room_with(&db, &[1, 2]);
        let a = db.create_message(&text(room, 1, "a", at(2026, 3, 4, 9, 0))).unwrap().message;
        let b = db.create_message(&text(room, 1, "b", at(2026, 3, 4, 9, 1))).unwrap().message;
        db.toggle_reaction(a.id, 2, "x").unwrap();

        let batch = db.reaction_summary_batch(&[a.id, b.id], 1).unwrap();
        assert_eq!(batch.len(), 1);
        assert!(!batch[&a.id][0].reacted_by_me);
        assert!(db.reaction_summary_batch(&[], 1).unwrap().is_empty());
    }
}
