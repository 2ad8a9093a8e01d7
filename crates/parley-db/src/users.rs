use parley_types::models::DisplayBrief;
use rusqlite::{OptionalExtension, params};

use crate::models::ProfilePatch;
use crate::sql::pick_name;
use crate::{Database, Result};

impl Database {
    /// Mirrors a verified caller into the users table. Existing rows keep
    /// their profile fields.
    pub fn ensure_user(&self, user_id: i64, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username
                 WHERE users.username <> excluded.username",
                params![user_id, username],
            )?;
            Ok(())
        })
    }

    pub fn user_exists(&self, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn display_brief(&self, user_id: i64) -> Result<Option<DisplayBrief>> {
        self.with_conn(|conn| query_display_brief(conn, user_id))
    }

    /// Applies the fields present in `patch`. Returns the updated brief, or
    /// `None` if the user does not exist.
    pub fn update_profile(&self, user_id: i64, patch: &ProfilePatch) -> Result<Option<DisplayBrief>> {
        self.with_conn(|conn| {
            if !patch.is_empty() {
                let display_name = patch
                    .display_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty());
                let avatar_url = patch.avatar_url.clone().flatten();

                conn.execute(
                    "UPDATE users SET
                        display_name = CASE WHEN ?2 THEN ?3 ELSE display_name END,
                        avatar_url = CASE WHEN ?4 THEN ?5 ELSE avatar_url END
                     WHERE id = ?1",
                    params![
                        user_id,
                        patch.display_name.is_some(),
                        display_name,
                        patch.avatar_url.is_some(),
                        avatar_url,
                    ],
                )?;
            }
            query_display_brief(conn, user_id)
        })
    }
}

pub(crate) fn query_display_brief(
    conn: &rusqlite::Connection,
    user_id: i64,
) -> Result<Option<DisplayBrief>> {
    let brief = conn
        .query_row(
            "SELECT display_name, username, avatar_url FROM users WHERE id = ?1",
            params![user_id],
            |row| {
                Ok(DisplayBrief {
                    display_name: pick_name(row.get(0)?, row.get(1)?),
                    avatar_url: row.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(brief)
}

#[cfg(test)]
mod tests {
    use crate::models::ProfilePatch;
    use crate::testutil::db;

    #[test]
    fn ensure_user_is_idempotent_and_keeps_profile() {
        let db = db();
        db.ensure_user(5, "eve").unwrap();
        db.update_profile(
            5,
            &ProfilePatch {
                display_name: Some("Eve A.".into()),
                avatar_url: None,
            },
        )
        .unwrap();
        db.ensure_user(5, "eve").unwrap();

        let brief = db.display_brief(5).unwrap().unwrap();
        assert_eq!(brief.display_name, "Eve A.");
    }

    #[test]
    fn brief_falls_back_to_username() {
        let db = db();
        db.ensure_user(6, "frank").unwrap();
        let brief = db.display_brief(6).unwrap().unwrap();
        assert_eq!(brief.display_name, "frank");
        assert_eq!(brief.avatar_url, None);
        assert!(db.display_brief(99).unwrap().is_none());
    }

    #[test]
    fn patch_distinguishes_clear_from_unchanged() {
        let db = db();
        db.ensure_user(7, "gus").unwrap();

        let set = ProfilePatch {
            display_name: None,
            avatar_url: Some(Some("/a.png".into())),
        };
        let brief = db.update_profile(7, &set).unwrap().unwrap();
        assert_eq!(brief.avatar_url.as_deref(), Some("/a.png"));

        let rename_only = ProfilePatch {
            display_name: Some("Gus".into()),
            avatar_url: None,
        };
        let brief = db.update_profile(7, &rename_only).unwrap().unwrap();
        assert_eq!(brief.display_name, "Gus");
        assert_eq!(brief.avatar_url.as_deref(), Some("/a.png"));

        let clear = ProfilePatch {
            display_name: None,
            avatar_url: Some(None),
        };
        let brief = db.update_profile(7, &clear).unwrap().unwrap();
        assert_eq!(brief.avatar_url, None);
        assert_eq!(brief.display_name, "Gus");
    }

    #[test]
    fn system_user_is_seeded() {
        let db = db();
        let brief = db.display_brief(parley_types::SYSTEM_USER_ID).unwrap().unwrap();
        assert_eq!(brief.display_name, "System");
    }
}
