//! Placing and releasing bots for a meeting.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use super::{Outcome, ReconcileError, Reconciler};
use crate::gateway::{CleanupOutcome, CreateBotRequest, GatewayError, ScheduleBotRequest};
use crate::meeting::{
    BotState, ChangeType, Meeting, MeetingSnapshot, MeetingStatus, NewMeetingChange,
};

/// Whether the meeting has not ended yet.
pub(crate) fn is_upcoming(meeting: &Meeting, now: DateTime<Utc>) -> bool {
    meeting.date + Duration::minutes(meeting.duration_minutes.max(0)) > now
}

impl Reconciler {
    /// Move an unscheduled upcoming meeting to `scheduled` by placing a bot.
    pub async fn schedule_bot(&self, meeting_id: i64) -> Result<Outcome, ReconcileError> {
        let _guard = self.locks.lock(meeting_id).await;
        self.retrying(|| self.try_schedule(meeting_id)).await
    }

    async fn try_schedule(&self, meeting_id: i64) -> Result<Outcome, ReconcileError> {
        let Some(meeting) = self.load(meeting_id).await? else {
            return Ok(Outcome::Unmatched);
        };
        if meeting.meeting_baas_id.is_some()
            || meeting.bot_state != BotState::Unscheduled
            || meeting.status == MeetingStatus::Cancelled
            || !is_upcoming(&meeting, Utc::now())
        {
            return Ok(Outcome::Unchanged);
        }

        let Some(bot_id) = self.place_bot(&meeting).await? else {
            debug!(meeting_id, "Nothing to schedule a bot against");
            return Ok(Outcome::Unchanged);
        };

        let mut updated = meeting;
        updated.meeting_baas_id = Some(bot_id.clone());
        updated.bot_state = BotState::Scheduled;
        self.save(updated).await?;
        info!(meeting_id, bot_id = %bot_id, "Scheduled bot");
        Ok(Outcome::Applied)
    }

    /// Move a meeting the user rescheduled. A scheduled bot is replaced
    /// because bots are bound to their reservation window.
    pub async fn reschedule(
        &self,
        meeting_id: i64,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Outcome, ReconcileError> {
        let _guard = self.locks.lock(meeting_id).await;
        let outcome = self
            .retrying(|| self.try_reschedule(meeting_id, start, duration_minutes))
            .await?;
        if outcome == Outcome::Applied {
            if let Err(err) = self.retrying(|| self.try_schedule(meeting_id)).await {
                warn!(meeting_id, error = %err, "Could not place bot for rescheduled meeting");
            }
        }
        Ok(outcome)
    }

    async fn try_reschedule(
        &self,
        meeting_id: i64,
        start: DateTime<Utc>,
        duration_minutes: i64,
    ) -> Result<Outcome, ReconcileError> {
        let Some(meeting) = self.load(meeting_id).await? else {
            return Ok(Outcome::Unmatched);
        };
        if meeting.status == MeetingStatus::Cancelled
            || matches!(
                meeting.bot_state,
                BotState::Joining | BotState::InProgress | BotState::Completed
            )
        {
            return Err(ReconcileError::Payload(format!(
                "meeting {meeting_id} can no longer be rescheduled ({})",
                meeting.bot_state
            )));
        }
        if meeting.date.timestamp_millis() == start.timestamp_millis()
            && meeting.duration_minutes == duration_minutes
        {
            return Ok(Outcome::Unchanged);
        }

        let mut updated = meeting.clone();
        updated.date = start;
        updated.duration_minutes = duration_minutes;
        if meeting.bot_state == BotState::Scheduled {
            self.release_bot(&meeting, None).await;
            updated.meeting_baas_id = None;
            updated.bot_state = BotState::Unscheduled;
        } else if meeting.bot_state.is_terminal() {
            // A failed or cancelled bot never comes back; start over.
            updated.meeting_baas_id = None;
            updated.bot_state = BotState::Unscheduled;
        }

        let change = NewMeetingChange {
            meeting_id,
            change_type: ChangeType::Updated,
            calendar_event_id: meeting.calendar_event_id.clone(),
            previous: MeetingSnapshot::of(&meeting),
            new: MeetingSnapshot::of(&updated),
            raw_payload: None,
        };
        self.save_with_change(updated, change).await?;
        info!(meeting_id, start = %start, "Rescheduled meeting");
        Ok(Outcome::Applied)
    }

    /// Attach to the provider calendar event when it is known there, else
    /// create a bot for the meeting URL directly. Both calls are safe to
    /// repeat after a lost version race.
    async fn place_bot(&self, meeting: &Meeting) -> Result<Option<String>, GatewayError> {
        if let Some(event_id) = meeting.calendar_event_id.as_deref() {
            match self.schedule_event_bot(event_id).await {
                Ok(bot_id) => return Ok(Some(bot_id)),
                Err(err) if err.is_not_found() => {
                    debug!(meeting_id = meeting.id, event_id, "Event not known to provider yet");
                }
                Err(err) => return Err(err),
            }
        }

        let Some(meeting_url) = meeting.platform_meeting_url.clone() else {
            return Ok(None);
        };
        let request = CreateBotRequest {
            meeting_url,
            bot_name: self.settings.bot_name.clone(),
            start_time: Some(meeting.date),
            deduplication_key: format!("meeting-{}-{}", meeting.id, meeting.date.timestamp_millis()),
            webhook_url: self.settings.webhook_url.clone(),
        };
        self.bots.create_bot(&request).await.map(Some)
    }

    pub(super) async fn schedule_event_bot(&self, event_uuid: &str) -> Result<String, GatewayError> {
        let request = ScheduleBotRequest {
            bot_name: self.settings.bot_name.clone(),
            webhook_url: self.settings.webhook_url.clone(),
        };
        self.bots.schedule_for_event(event_uuid, &request).await
    }

    /// Best-effort removal of the meeting's bot at the provider.
    pub async fn release_bot(&self, meeting: &Meeting, event_uuid: Option<&str>) -> CleanupOutcome {
        let Some(bot_id) = meeting.meeting_baas_id.as_deref() else {
            return CleanupOutcome::AlreadyGone;
        };
        if meeting.bot_state.is_terminal() {
            return CleanupOutcome::AlreadyGone;
        }

        if meeting.bot_state == BotState::Scheduled {
            if let Some(uuid) = event_uuid.or(meeting.calendar_event_id.as_deref()) {
                let outcome = CleanupOutcome::from_result(
                    "unschedule bot",
                    self.bots.unschedule_for_event(uuid).await,
                );
                if outcome != CleanupOutcome::AlreadyGone {
                    return outcome;
                }
            }
        }

        CleanupOutcome::from_result("end bot", self.bots.end_bot(bot_id).await)
    }
}
