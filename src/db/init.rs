use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meetings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            member_id TEXT,
            title TEXT NOT NULL,
            date_ms INTEGER NOT NULL,
            duration_minutes INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'scheduled',
            bot_state TEXT NOT NULL DEFAULT 'unscheduled',
            processing_status TEXT NOT NULL DEFAULT 'pending',
            calendar_event_id TEXT,
            meeting_baas_id TEXT UNIQUE,
            platform TEXT,
            platform_meeting_url TEXT,
            recording_url TEXT,
            transcript TEXT,
            summary TEXT,
            wins TEXT NOT NULL DEFAULT '[]',
            areas_for_support TEXT NOT NULL DEFAULT '[]',
            tasks TEXT NOT NULL DEFAULT '[]',
            last_synced_at_ms INTEGER,
            version INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create meetings table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meetings_calendar_event_id ON meetings(calendar_event_id)",
        [],
    )
    .context("Failed to create meetings calendar_event_id index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meetings_bot_state ON meetings(bot_state)",
        [],
    )
    .context("Failed to create meetings bot_state index")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meetings_date ON meetings(date_ms)",
        [],
    )
    .context("Failed to create meetings date index")?;

    // Audit rows outlive their meeting, so no foreign key.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meeting_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            meeting_id INTEGER NOT NULL,
            change_type TEXT NOT NULL,
            calendar_event_id TEXT,
            previous_title TEXT,
            previous_date_ms INTEGER,
            previous_duration INTEGER,
            new_title TEXT,
            new_date_ms INTEGER,
            new_duration INTEGER,
            raw_payload TEXT,
            created_at_ms INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create meeting_changes table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_meeting_changes_meeting ON meeting_changes(meeting_id, id)",
        [],
    )
    .context("Failed to create meeting_changes index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS calendar_integrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            calendar_id TEXT NOT NULL,
            raw_calendar_id TEXT NOT NULL,
            refresh_token TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            last_synced_at_ms INTEGER,
            created_at_ms INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create calendar_integrations table")?;

    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_calendar_integrations_active
            ON calendar_integrations(user_id, provider) WHERE is_active = 1",
        [],
    )
    .context("Failed to create active integration index")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS processed_events (
            key TEXT PRIMARY KEY,
            first_seen_at_ms INTEGER NOT NULL,
            expires_at_ms INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create processed_events table")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_processed_events_expires ON processed_events(expires_at_ms)",
        [],
    )
    .context("Failed to create processed_events expiry index")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        for table in [
            "meetings",
            "meeting_changes",
            "calendar_integrations",
            "processed_events",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
    }
}
