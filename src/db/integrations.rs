//! Calendar integration persistence.
//!
//! At most one active integration exists per (user, provider); a partial
//! unique index enforces it and [`IntegrationRepository::activate`]
//! deactivates the previous one in the same transaction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{conversion_error, from_millis, now_millis, to_millis};
use crate::meeting::{CalendarIntegration, CalendarProvider};

const INTEGRATION_COLUMNS: &str = "id, user_id, provider, calendar_id, raw_calendar_id, \
     refresh_token, is_active, last_synced_at_ms, created_at_ms";

pub struct IntegrationRepository;

impl IntegrationRepository {
    /// Record a newly registered calendar as the active integration for
    /// (user, provider), deactivating any previous one.
    pub fn activate(
        conn: &Connection,
        user_id: &str,
        provider: CalendarProvider,
        calendar_id: &str,
        raw_calendar_id: &str,
        refresh_token: &str,
    ) -> Result<i64> {
        let tx = conn
            .unchecked_transaction()
            .context("Failed to begin integration transaction")?;

        tx.execute(
            "UPDATE calendar_integrations SET is_active = 0 \
             WHERE user_id = ?1 AND provider = ?2 AND is_active = 1",
            params![user_id, provider.as_str()],
        )
        .context("Failed to deactivate previous integration")?;

        tx.execute(
            "INSERT INTO calendar_integrations (user_id, provider, calendar_id, raw_calendar_id, \
             refresh_token, is_active, created_at_ms) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                user_id,
                provider.as_str(),
                calendar_id,
                raw_calendar_id,
                refresh_token,
                now_millis(),
            ],
        )
        .context("Failed to insert calendar integration")?;

        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit calendar integration")?;
        Ok(id)
    }

    pub fn get(conn: &Connection, id: i64) -> Result<Option<CalendarIntegration>> {
        let sql = format!("SELECT {INTEGRATION_COLUMNS} FROM calendar_integrations WHERE id = ?1");
        conn.query_row(&sql, params![id], Self::from_row)
            .optional()
            .context("Failed to query calendar integration")
    }

    pub fn find_active(
        conn: &Connection,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CalendarIntegration>> {
        let sql = format!(
            "SELECT {INTEGRATION_COLUMNS} FROM calendar_integrations \
             WHERE user_id = ?1 AND provider = ?2 AND is_active = 1"
        );
        conn.query_row(&sql, params![user_id, provider.as_str()], Self::from_row)
            .optional()
            .context("Failed to query active calendar integration")
    }

    pub fn find_active_by_calendar_id(
        conn: &Connection,
        calendar_id: &str,
    ) -> Result<Option<CalendarIntegration>> {
        let sql = format!(
            "SELECT {INTEGRATION_COLUMNS} FROM calendar_integrations \
             WHERE calendar_id = ?1 AND is_active = 1"
        );
        conn.query_row(&sql, params![calendar_id], Self::from_row)
            .optional()
            .context("Failed to query calendar integration by calendar id")
    }

    pub fn list_active(conn: &Connection) -> Result<Vec<CalendarIntegration>> {
        let sql = format!(
            "SELECT {INTEGRATION_COLUMNS} FROM calendar_integrations WHERE is_active = 1 ORDER BY id"
        );
        let mut stmt = conn
            .prepare(&sql)
            .context("Failed to prepare integrations query")?;

        let integrations = stmt
            .query_map([], Self::from_row)
            .context("Failed to query integrations")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to map integrations")?;

        Ok(integrations)
    }

    pub fn deactivate(conn: &Connection, id: i64) -> Result<bool> {
        let updated = conn
            .execute(
                "UPDATE calendar_integrations SET is_active = 0 WHERE id = ?1 AND is_active = 1",
                params![id],
            )
            .context("Failed to deactivate calendar integration")?;
        Ok(updated > 0)
    }

    pub fn touch_last_synced(conn: &Connection, id: i64, at: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "UPDATE calendar_integrations SET last_synced_at_ms = ?1 WHERE id = ?2",
            params![to_millis(&at), id],
        )
        .context("Failed to update integration sync time")?;
        Ok(())
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<CalendarIntegration> {
        let provider: String = row.get(2)?;
        let is_active: i64 = row.get(6)?;
        let last_synced: Option<i64> = row.get(7)?;

        Ok(CalendarIntegration {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: CalendarProvider::parse(&provider).map_err(|e| conversion_error(2, e))?,
            calendar_id: row.get(3)?,
            raw_calendar_id: row.get(4)?,
            refresh_token: row.get(5)?,
            is_active: is_active != 0,
            last_synced_at: last_synced.map(from_millis).transpose()?,
            created_at: from_millis(row.get(8)?)?,
        })
    }
}
