use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            username    TEXT NOT NULL,
            display_name TEXT,
            avatar_url  TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT,
            kind        TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
            owner_id    INTEGER NOT NULL REFERENCES users(id),
            direct_key  TEXT UNIQUE,
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS room_members (
            room_id     INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role        TEXT NOT NULL DEFAULT 'member' CHECK (role IN ('member', 'owner')),
            joined_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            last_seen_message_id INTEGER NOT NULL DEFAULT 0,
            last_seen_at TEXT,
            PRIMARY KEY (room_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_room_members_user
            ON room_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id             INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            sender_id           INTEGER NOT NULL REFERENCES users(id),
            content             TEXT NOT NULL,
            message_type        TEXT NOT NULL
                CHECK (message_type IN ('text', 'image', 'file', 'system')),
            is_temp             INTEGER NOT NULL DEFAULT 0,
            reply_to_message_id INTEGER REFERENCES messages(id) ON DELETE SET NULL,
            reply_preview       TEXT,
            reply_sender_name   TEXT,
            reply_message_type  TEXT,
            media_url           TEXT,
            media_mime          TEXT,
            media_size          INTEGER,
            separator_day       TEXT,
            created_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room_created
            ON messages(room_id, created_at, id);

        -- At most one day separator per room and calendar day
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_day_separator
            ON messages(room_id, separator_day) WHERE separator_day IS NOT NULL;

        CREATE TABLE IF NOT EXISTS message_reactions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            reaction    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE(message_id, user_id, reaction)
        );

        CREATE INDEX IF NOT EXISTS idx_reactions_message
            ON message_reactions(message_id);

        CREATE TABLE IF NOT EXISTS message_receipts (
            room_id     INTEGER NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            message_id  INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            status      TEXT NOT NULL CHECK (status IN ('delivered', 'seen')),
            seen_at     TEXT NOT NULL,
            display_name TEXT,
            avatar_url  TEXT,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_receipts_room_user
            ON message_receipts(room_id, user_id, status);

        -- Sender of day separators and other synthetic messages
        INSERT OR IGNORE INTO users (id, username, display_name)
            VALUES (0, 'system', 'System');
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let system: String = conn
            .query_row("SELECT username FROM users WHERE id = 0", [], |r| r.get(0))
            .unwrap();
        assert_eq!(system, "system");
    }
}
