use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::db::{IntegrationRepository, MeetingRepository};
use crate::gateway::{CalendarEventDraft, CleanupOutcome, GatewayError};
use crate::meeting::{CalendarIntegration, CalendarProvider, Meeting, NewMeeting};
use crate::reconciler::{Outcome, Reconciler};

/// A meeting a user books through this system.
#[derive(Debug, Clone)]
pub struct ScheduleMeeting {
    pub user_id: String,
    pub member_id: Option<String>,
    pub provider: CalendarProvider,
    pub title: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub meeting_url: String,
    pub description: Option<String>,
}

pub struct MeetingService {
    reconciler: Arc<Reconciler>,
}

impl MeetingService {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    /// Create the calendar event, persist the meeting, then try to place a
    /// bot. A bot that cannot be placed yet is left to the scheduler.
    pub async fn schedule_meeting(&self, request: ScheduleMeeting) -> Result<Meeting> {
        if request.duration_minutes <= 0 {
            bail!("Meeting duration must be positive");
        }
        let integration = self
            .active_integration(&request.user_id, request.provider)
            .await?
            .ok_or_else(|| {
                anyhow!(
                    "No active {} calendar for user {}",
                    request.provider,
                    request.user_id
                )
            })?;

        let draft = CalendarEventDraft {
            title: request.title.clone(),
            start: request.start,
            duration_minutes: request.duration_minutes,
            meeting_url: Some(request.meeting_url.clone()),
            description: request.description.clone(),
        };
        let raw_event_id = match self
            .reconciler
            .calendars()
            .create_event(&integration, &draft)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.deactivate_if_unauthorized(&integration, &err).await;
                return Err(err).context("Failed to create calendar event");
            }
        };

        let new = NewMeeting {
            user_id: request.user_id,
            member_id: request.member_id,
            title: request.title,
            date: request.start,
            duration_minutes: request.duration_minutes,
            calendar_event_id: Some(raw_event_id.clone()),
            platform_meeting_url: Some(request.meeting_url),
        };
        let meeting_id = self
            .reconciler
            .database()
            .call(move |conn| MeetingRepository::insert(conn, &new))
            .await?;
        info!(meeting_id, event_id = %raw_event_id, "Created meeting");

        if let Err(err) = self.reconciler.schedule_bot(meeting_id).await {
            warn!(meeting_id, error = %err, "Bot not scheduled yet, scheduler will retry");
        }
        self.get(meeting_id)
            .await?
            .ok_or_else(|| anyhow!("Meeting {meeting_id} disappeared after creation"))
    }

    /// Move the calendar event and the meeting, replacing its bot.
    pub async fn reschedule(
        &self,
        meeting_id: i64,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Meeting> {
        if duration_minutes <= 0 {
            bail!("Meeting duration must be positive");
        }
        let meeting = self
            .get(meeting_id)
            .await?
            .ok_or_else(|| anyhow!("Meeting {meeting_id} not found"))?;

        if let Some(event_id) = meeting.calendar_event_id.as_deref() {
            if let Some(integration) = self.integration_for(&meeting).await? {
                let raw_id = self.raw_event_id(event_id).await;
                let draft = CalendarEventDraft {
                    title: meeting.title.clone(),
                    start,
                    duration_minutes,
                    meeting_url: meeting.platform_meeting_url.clone(),
                    description: None,
                };
                if let Err(err) = self
                    .reconciler
                    .calendars()
                    .update_event(&integration, &raw_id, &draft)
                    .await
                {
                    self.deactivate_if_unauthorized(&integration, &err).await;
                    return Err(err).context("Failed to move calendar event");
                }
            }
        }

        let outcome = self
            .reconciler
            .reschedule(meeting_id, start, duration_minutes)
            .await?;
        if outcome == Outcome::Unmatched {
            bail!("Meeting {meeting_id} not found");
        }
        self.get(meeting_id)
            .await?
            .ok_or_else(|| anyhow!("Meeting {meeting_id} not found"))
    }

    /// Hard delete. The bot and calendar event are removed best effort
    /// first; their failures are reported but never block the delete.
    pub async fn delete_meeting(&self, meeting_id: i64) -> Result<Vec<CleanupOutcome>> {
        let _guard = self.reconciler.locks().lock(meeting_id).await;
        let Some(meeting) = self.get(meeting_id).await? else {
            bail!("Meeting {meeting_id} not found");
        };

        let mut outcomes = vec![self.reconciler.release_bot(&meeting, None).await];

        if let Some(event_id) = meeting.calendar_event_id.as_deref() {
            match self.integration_for(&meeting).await {
                Ok(Some(integration)) => {
                    let raw_id = self.raw_event_id(event_id).await;
                    let result = self
                        .reconciler
                        .calendars()
                        .delete_event(&integration, &raw_id)
                        .await;
                    if let Err(err) = &result {
                        self.deactivate_if_unauthorized(&integration, err).await;
                    }
                    outcomes.push(CleanupOutcome::from_result("delete calendar event", result));
                }
                Ok(None) => outcomes.push(CleanupOutcome::AlreadyGone),
                Err(err) => {
                    warn!(meeting_id, "Could not look up calendar integration: {:#}", err);
                    outcomes.push(CleanupOutcome::Warning(err.to_string()));
                }
            }
        }

        let deleted = self
            .reconciler
            .database()
            .call(move |conn| MeetingRepository::delete(conn, meeting_id))
            .await?;
        if deleted {
            info!(meeting_id, "Deleted meeting");
        }
        Ok(outcomes)
    }

    pub async fn get(&self, meeting_id: i64) -> Result<Option<Meeting>> {
        self.reconciler
            .database()
            .call(move |conn| MeetingRepository::get(conn, meeting_id))
            .await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<Meeting>> {
        self.reconciler
            .database()
            .call(move |conn| MeetingRepository::list(conn, limit))
            .await
    }

    async fn active_integration(
        &self,
        user_id: &str,
        provider: CalendarProvider,
    ) -> Result<Option<CalendarIntegration>> {
        let user = user_id.to_string();
        self.reconciler
            .database()
            .call(move |conn| IntegrationRepository::find_active(conn, &user, provider))
            .await
    }

    /// The integration whose calendar holds this meeting's event.
    async fn integration_for(&self, meeting: &Meeting) -> Result<Option<CalendarIntegration>> {
        for provider in [CalendarProvider::Google, CalendarProvider::Microsoft] {
            if let Some(integration) = self.active_integration(&meeting.user_id, provider).await? {
                return Ok(Some(integration));
            }
        }
        Ok(None)
    }

    /// Meetings are linked by the provider's event uuid once a calendar sync
    /// has seen them, but calendar writes need the calendar's own id.
    async fn raw_event_id(&self, event_id: &str) -> String {
        match self.reconciler.calendars().get_event(event_id).await {
            Ok(event) => event.raw_event_id.unwrap_or_else(|| event_id.to_string()),
            Err(_) => event_id.to_string(),
        }
    }

    async fn deactivate_if_unauthorized(&self, integration: &CalendarIntegration, err: &GatewayError) {
        if !err.is_unauthorized() {
            return;
        }
        warn!(integration_id = integration.id, user_id = %integration.user_id,
            "Calendar credentials rejected, deactivating integration");
        let id = integration.id;
        if let Err(err) = self
            .reconciler
            .database()
            .call(move |conn| IntegrationRepository::deactivate(conn, id))
            .await
        {
            warn!(integration_id = id, "Could not deactivate integration: {:#}", err);
        }
    }
}
