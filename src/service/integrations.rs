use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::db::{Database, IntegrationRepository};
use crate::gateway::{CalendarGateway, CleanupOutcome, RegisterCalendar};
use crate::meeting::{CalendarIntegration, CalendarProvider};

pub struct IntegrationService {
    db: Database,
    calendars: Arc<dyn CalendarGateway>,
}

impl IntegrationService {
    pub fn new(db: Database, calendars: Arc<dyn CalendarGateway>) -> Self {
        Self { db, calendars }
    }

    /// Register the user's calendar with the recording provider and make it
    /// the active integration for (user, provider).
    pub async fn connect(
        &self,
        user_id: &str,
        provider: CalendarProvider,
        refresh_token: &str,
        raw_calendar_id: Option<&str>,
    ) -> Result<CalendarIntegration> {
        // Fails fast on a bad token before anything is created remotely.
        self.calendars
            .access_token(provider, refresh_token)
            .await
            .context("Refresh token was rejected by the calendar provider")?;

        let registered = self
            .calendars
            .register_calendar(&RegisterCalendar {
                provider,
                refresh_token: refresh_token.to_string(),
                raw_calendar_id: raw_calendar_id.map(str::to_string),
            })
            .await
            .context("Failed to register calendar with the recording provider")?;

        let user = user_id.to_string();
        let token = refresh_token.to_string();
        let calendar_id = registered.uuid.clone();
        let raw_id = registered
            .raw_calendar_id
            .or_else(|| raw_calendar_id.map(str::to_string))
            .unwrap_or_else(|| "primary".to_string());

        let integration = self
            .db
            .call(move |conn| {
                let id = IntegrationRepository::activate(
                    conn,
                    &user,
                    provider,
                    &calendar_id,
                    &raw_id,
                    &token,
                )?;
                IntegrationRepository::get(conn, id)?
                    .context("Integration vanished right after insert")
            })
            .await?;

        info!(user_id, provider = %provider, calendar_id = %integration.calendar_id,
            "Connected calendar integration");
        Ok(integration)
    }

    /// Stop syncing without touching the provider side.
    pub async fn disconnect(&self, user_id: &str, provider: CalendarProvider) -> Result<bool> {
        let Some(integration) = self.find_active(user_id, provider).await? else {
            return Ok(false);
        };
        let id = integration.id;
        let deactivated = self
            .db
            .call(move |conn| IntegrationRepository::deactivate(conn, id))
            .await?;
        info!(user_id, provider = %provider, "Disconnected calendar integration");
        Ok(deactivated)
    }

    /// Remove the calendar at the recording provider, then deactivate. The
    /// remote removal is best effort; deactivation always happens.
    pub async fn cleanup(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CleanupOutcome>> {
        let Some(integration) = self.find_active(user_id, provider).await? else {
            return Ok(None);
        };

        let outcome = CleanupOutcome::from_result(
            "remove calendar",
            self.calendars.remove_calendar(&integration.calendar_id).await,
        );
        if outcome.is_warning() {
            warn!(user_id, calendar_id = %integration.calendar_id,
                "Calendar may still exist at the provider");
        }

        let id = integration.id;
        self.db
            .call(move |conn| IntegrationRepository::deactivate(conn, id))
            .await?;
        info!(user_id, provider = %provider, "Cleaned up calendar integration");
        Ok(Some(outcome))
    }

    pub async fn find_active(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CalendarIntegration>> {
        let user = user_id.to_string();
        self.db
            .call(move |conn| IntegrationRepository::find_active(conn, &user, provider))
            .await
    }
}
