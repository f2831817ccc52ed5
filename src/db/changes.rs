//! Append-only meeting audit trail.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use super::{conversion_error, from_millis, now_millis, to_millis};
use crate::meeting::{ChangeType, MeetingChange, MeetingSnapshot, NewMeetingChange};

pub struct MeetingChangeRepository;

impl MeetingChangeRepository {
    pub fn append(conn: &Connection, change: &NewMeetingChange) -> Result<i64> {
        conn.execute(
            "INSERT INTO meeting_changes (meeting_id, change_type, calendar_event_id, \
             previous_title, previous_date_ms, previous_duration, new_title, new_date_ms, \
             new_duration, raw_payload, created_at_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                change.meeting_id,
                change.change_type.as_str(),
                change.calendar_event_id,
                change.previous.title,
                change.previous.date.as_ref().map(to_millis),
                change.previous.duration_minutes,
                change.new.title,
                change.new.date.as_ref().map(to_millis),
                change.new.duration_minutes,
                change.raw_payload,
                now_millis(),
            ],
        )
        .context("Failed to append meeting change")?;

        Ok(conn.last_insert_rowid())
    }

    /// Changes for one meeting, oldest first.
    pub fn list_for_meeting(conn: &Connection, meeting_id: i64) -> Result<Vec<MeetingChange>> {
        let mut stmt = conn
            .prepare(
                "SELECT id, meeting_id, change_type, calendar_event_id, previous_title, \
                 previous_date_ms, previous_duration, new_title, new_date_ms, new_duration, \
                 raw_payload, created_at_ms FROM meeting_changes WHERE meeting_id = ?1 ORDER BY id",
            )
            .context("Failed to prepare meeting changes query")?;

        let changes = stmt
            .query_map(params![meeting_id], Self::from_row)
            .context("Failed to query meeting changes")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map meeting changes")?;

        Ok(changes)
    }

    pub fn count_for_meeting(conn: &Connection, meeting_id: i64) -> Result<i64> {
        conn.query_row(
            "SELECT COUNT(*) FROM meeting_changes WHERE meeting_id = ?1",
            params![meeting_id],
            |row| row.get(0),
        )
        .context("Failed to count meeting changes")
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<MeetingChange> {
        let change_type: String = row.get(2)?;
        let previous_date: Option<i64> = row.get(5)?;
        let new_date: Option<i64> = row.get(8)?;

        Ok(MeetingChange {
            id: row.get(0)?,
            meeting_id: row.get(1)?,
            change_type: ChangeType::parse(&change_type).map_err(|e| conversion_error(2, e))?,
            calendar_event_id: row.get(3)?,
            previous: MeetingSnapshot {
                title: row.get(4)?,
                date: previous_date.map(from_millis).transpose()?,
                duration_minutes: row.get(6)?,
            },
            new: MeetingSnapshot {
                title: row.get(7)?,
                date: new_date.map(from_millis).transpose()?,
                duration_minutes: row.get(9)?,
            },
            raw_payload: row.get(10)?,
            created_at: from_millis(row.get(11)?)?,
        })
    }
}
