//! Meeting record persistence.
//!
//! CRUD for the `meetings` table. Writes are single-record and guarded by
//! the `version` column: a save whose version no longer matches the stored
//! row fails with [`StaleMeeting`] and changes nothing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{conversion_error, from_millis, now_millis, to_millis};
use crate::db::changes::MeetingChangeRepository;
use crate::meeting::{
    BotState, Meeting, MeetingStatus, NewMeeting, NewMeetingChange, ProcessingStatus,
};

const MEETING_COLUMNS: &str = "id, user_id, member_id, title, date_ms, duration_minutes, status, \
     bot_state, processing_status, calendar_event_id, meeting_baas_id, platform, \
     platform_meeting_url, recording_url, transcript, summary, wins, areas_for_support, tasks, \
     last_synced_at_ms, version, created_at_ms";

/// Returned when a save loses the optimistic version check.
#[derive(Debug, thiserror::Error)]
#[error("meeting {0} was modified concurrently")]
pub struct StaleMeeting(pub i64);

/// Repository for meeting records.
pub struct MeetingRepository;

impl MeetingRepository {
    /// Insert a new meeting (no bot yet). Returns the new meeting ID.
    pub fn insert(conn: &Connection, meeting: &NewMeeting) -> Result<i64> {
        let platform = meeting
            .platform_meeting_url
            .as_deref()
            .and_then(crate::meeting::detect_platform);

        conn.execute(
            "INSERT INTO meetings (user_id, member_id, title, date_ms, duration_minutes, status, \
             bot_state, processing_status, calendar_event_id, platform, platform_meeting_url, \
             created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                meeting.user_id,
                meeting.member_id,
                meeting.title,
                to_millis(&meeting.date),
                meeting.duration_minutes,
                MeetingStatus::Scheduled.as_str(),
                BotState::Unscheduled.as_str(),
                ProcessingStatus::Pending.as_str(),
                meeting.calendar_event_id,
                platform,
                meeting.platform_meeting_url,
                now_millis(),
            ],
        )
        .context("Failed to insert meeting")?;

        Ok(conn.last_insert_rowid())
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<Meeting>> {
        Self::query_one(conn, "id = ?1", params![id])
    }

    pub fn find_by_bot_id(conn: &Connection, bot_id: &str) -> Result<Option<Meeting>> {
        Self::query_one(conn, "meeting_baas_id = ?1", params![bot_id])
    }

    pub fn find_by_calendar_event_id(conn: &Connection, event_id: &str) -> Result<Option<Meeting>> {
        Self::query_one(
            conn,
            "calendar_event_id = ?1 ORDER BY id DESC LIMIT 1",
            params![event_id],
        )
    }

    /// Meetings with the given title and no linked calendar event whose
    /// start falls inside `[from, to)`.
    pub fn find_unlinked_by_title(
        conn: &Connection,
        title: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Meeting>> {
        Self::query_many(
            conn,
            "calendar_event_id IS NULL AND title = ?1 AND date_ms >= ?2 AND date_ms < ?3 \
             ORDER BY id",
            params![title, to_millis(&from), to_millis(&to)],
        )
    }

    /// Meetings whose bot is scheduled or live.
    pub fn list_with_active_bots(conn: &Connection) -> Result<Vec<Meeting>> {
        Self::query_many(
            conn,
            "meeting_baas_id IS NOT NULL AND bot_state IN ('scheduled', 'joining', 'in_progress') \
             ORDER BY date_ms",
            params![],
        )
    }

    /// Completed recordings whose transcript analysis never finished.
    pub fn list_pending_analysis(conn: &Connection) -> Result<Vec<Meeting>> {
        Self::query_many(
            conn,
            "bot_state = 'completed' AND processing_status = 'processing' ORDER BY date_ms",
            params![],
        )
    }

    /// Upcoming meetings in `[from, to)` that have a meeting URL but no bot.
    pub fn list_unscheduled_between(
        conn: &Connection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Meeting>> {
        Self::query_many(
            conn,
            "meeting_baas_id IS NULL AND bot_state = 'unscheduled' \
             AND platform_meeting_url IS NOT NULL AND date_ms >= ?1 AND date_ms < ?2 \
             ORDER BY date_ms",
            params![to_millis(&from), to_millis(&to)],
        )
    }

    /// List meetings, newest first.
    pub fn list(conn: &Connection, limit: usize) -> Result<Vec<Meeting>> {
        Self::query_many(
            conn,
            "1 = 1 ORDER BY date_ms DESC, id DESC LIMIT ?1",
            params![limit as i64],
        )
    }

    /// Persist every mutable field of `meeting`. Returns the new version.
    pub fn save(conn: &Connection, meeting: &Meeting) -> Result<i64> {
        let wins = serde_json::to_string(&meeting.wins)?;
        let areas = serde_json::to_string(&meeting.areas_for_support)?;
        let tasks = serde_json::to_string(&meeting.tasks)?;

        let updated = conn
            .execute(
                "UPDATE meetings SET member_id = ?1, title = ?2, date_ms = ?3, \
                 duration_minutes = ?4, status = ?5, bot_state = ?6, processing_status = ?7, \
                 calendar_event_id = ?8, meeting_baas_id = ?9, platform = ?10, \
                 platform_meeting_url = ?11, recording_url = ?12, transcript = ?13, \
                 summary = ?14, wins = ?15, areas_for_support = ?16, tasks = ?17, \
                 last_synced_at_ms = ?18, version = version + 1 \
                 WHERE id = ?19 AND version = ?20",
                params![
                    meeting.member_id,
                    meeting.title,
                    to_millis(&meeting.date),
                    meeting.duration_minutes,
                    meeting.status.as_str(),
                    meeting.bot_state.as_str(),
                    meeting.processing_status.as_str(),
                    meeting.calendar_event_id,
                    meeting.meeting_baas_id,
                    meeting.platform,
                    meeting.platform_meeting_url,
                    meeting.recording_url,
                    meeting.transcript,
                    meeting.summary,
                    wins,
                    areas,
                    tasks,
                    meeting.last_synced_at.as_ref().map(to_millis),
                    meeting.id,
                    meeting.version,
                ],
            )
            .context("Failed to save meeting")?;

        if updated == 0 {
            return Err(StaleMeeting(meeting.id).into());
        }

        Ok(meeting.version + 1)
    }

    /// Save the meeting and append its audit entry atomically.
    pub fn save_with_change(
        conn: &Connection,
        meeting: &Meeting,
        change: &NewMeetingChange,
    ) -> Result<i64> {
        let tx = conn
            .unchecked_transaction()
            .context("Failed to begin meeting transaction")?;
        let version = Self::save(&tx, meeting)?;
        MeetingChangeRepository::append(&tx, change)?;
        tx.commit().context("Failed to commit meeting change")?;
        Ok(version)
    }

    /// Hard delete. Returns whether a row was removed.
    pub fn delete(conn: &Connection, id: i64) -> Result<bool> {
        let deleted = conn
            .execute("DELETE FROM meetings WHERE id = ?1", params![id])
            .context("Failed to delete meeting")?;
        Ok(deleted > 0)
    }

    fn query_one(
        conn: &Connection,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Meeting>> {
        let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE {predicate}");
        conn.query_row(&sql, params, Self::from_row)
            .optional()
            .context("Failed to query meeting")
    }

    fn query_many(
        conn: &Connection,
        predicate: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Meeting>> {
        let sql = format!("SELECT {MEETING_COLUMNS} FROM meetings WHERE {predicate}");
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare meetings query")?;

        let meetings = stmt
            .query_map(params, Self::from_row)
            .context("Failed to query meetings")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map meetings")?;

        Ok(meetings)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Meeting> {
        let status: String = row.get(6)?;
        let bot_state: String = row.get(7)?;
        let processing_status: String = row.get(8)?;
        let wins: String = row.get(16)?;
        let areas: String = row.get(17)?;
        let tasks: String = row.get(18)?;
        let last_synced: Option<i64> = row.get(19)?;

        Ok(Meeting {
            id: row.get(0)?,
            user_id: row.get(1)?,
            member_id: row.get(2)?,
            title: row.get(3)?,
            date: from_millis(row.get(4)?)?,
            duration_minutes: row.get(5)?,
            status: MeetingStatus::parse(&status),
            bot_state: BotState::parse(&bot_state).map_err(|e| conversion_error(7, e))?,
            processing_status: ProcessingStatus::parse(&processing_status)
                .map_err(|e| conversion_error(8, e))?,
            calendar_event_id: row.get(9)?,
            meeting_baas_id: row.get(10)?,
            platform: row.get(11)?,
            platform_meeting_url: row.get(12)?,
            recording_url: row.get(13)?,
            transcript: row.get(14)?,
            summary: row.get(15)?,
            wins: serde_json::from_str(&wins).map_err(|e| conversion_error(16, e.into()))?,
            areas_for_support: serde_json::from_str(&areas)
                .map_err(|e| conversion_error(17, e.into()))?,
            tasks: serde_json::from_str(&tasks).map_err(|e| conversion_error(18, e.into()))?,
            last_synced_at: last_synced.map(from_millis).transpose()?,
            version: row.get(20)?,
            created_at: from_millis(row.get(21)?)?,
        })
    }
}
