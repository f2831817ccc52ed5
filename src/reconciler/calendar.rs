//! Calendar changes: matching provider events to meetings, rescheduling
//! bots when timing moves, and cancelling on deletion.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use super::schedule::is_upcoming;
use super::{CalendarChange, Outcome, ReconcileError, Reconciler};
use crate::db::MeetingRepository;
use crate::gateway::CalendarEvent;
use crate::meeting::{
    detect_platform, BotState, ChangeType, Meeting, MeetingSnapshot, MeetingStatus,
    NewMeetingChange,
};

impl Reconciler {
    /// Apply a calendar change. `owner` is the user whose calendar produced
    /// it, when known; title matching is only attempted within that user's
    /// meetings.
    pub async fn handle_calendar_change(
        &self,
        change: &CalendarChange,
        owner: Option<&str>,
    ) -> Result<Outcome, ReconcileError> {
        match change {
            CalendarChange::Upsert(event) if event.deleted => {
                self.cancel_for_event(&event.uuid, event.raw_event_id.as_deref())
                    .await
            }
            CalendarChange::Upsert(event) => self.sync_event(event, owner).await,
            CalendarChange::Deleted {
                event_uuid,
                raw_event_id,
            } => {
                self.cancel_for_event(event_uuid, raw_event_id.as_deref())
                    .await
            }
        }
    }

    async fn sync_event(
        &self,
        event: &CalendarEvent,
        owner: Option<&str>,
    ) -> Result<Outcome, ReconcileError> {
        let Some(found) = self.match_meeting(event, owner).await? else {
            info!(
                event_id = %event.uuid,
                title = %event.title,
                has_meeting_url = event.meeting_url.is_some(),
                "Calendar event not created by this system, not tracking"
            );
            return Ok(Outcome::Unmatched);
        };

        let _guard = self.locks.lock(found.id).await;
        self.retrying(|| self.apply_event(found.id, event)).await
    }

    /// Ids are authoritative: the provider event uuid, then the raw event id
    /// written when this system created the event, then the bot. Title is a
    /// last resort and must be unambiguous.
    async fn match_meeting(
        &self,
        event: &CalendarEvent,
        owner: Option<&str>,
    ) -> Result<Option<Meeting>, ReconcileError> {
        if let Some(meeting) = self.find_by_event(&event.uuid).await? {
            return Ok(Some(meeting));
        }
        if let Some(raw) = event.raw_event_id.as_deref() {
            if let Some(meeting) = self.find_by_event(raw).await? {
                return Ok(Some(meeting));
            }
        }
        if let Some(bot_id) = event.bot_id.as_deref() {
            if let Some(meeting) = self.find_by_bot(bot_id).await? {
                return Ok(Some(meeting));
            }
        }
        match owner {
            Some(owner) => self.match_by_title(event, owner).await,
            None => Ok(None),
        }
    }

    async fn match_by_title(
        &self,
        event: &CalendarEvent,
        owner: &str,
    ) -> Result<Option<Meeting>, ReconcileError> {
        let title = event.title.trim().to_string();
        if title.is_empty() {
            return Ok(None);
        }
        let Some(day_start) = start_of_day(event.start_time) else {
            return Ok(None);
        };
        let day_end = day_start + Duration::days(1);

        let candidates = self
            .db
            .call(move |conn| {
                MeetingRepository::find_unlinked_by_title(conn, &title, day_start, day_end)
            })
            .await?;
        let mut candidates: Vec<Meeting> = candidates
            .into_iter()
            .filter(|m| m.user_id == owner)
            .collect();

        match candidates.len() {
            0 => Ok(None),
            1 => {
                let meeting = candidates.remove(0);
                info!(meeting_id = meeting.id, event_id = %event.uuid,
                    "Matched calendar event to meeting by title");
                Ok(Some(meeting))
            }
            n => {
                warn!(event_id = %event.uuid, title = %event.title, candidates = n,
                    "Ambiguous title match, skipping event");
                Ok(None)
            }
        }
    }

    async fn apply_event(
        &self,
        meeting_id: i64,
        event: &CalendarEvent,
    ) -> Result<Outcome, ReconcileError> {
        let Some(meeting) = self.load(meeting_id).await? else {
            return Ok(Outcome::Unmatched);
        };
        if meeting.status == MeetingStatus::Cancelled || meeting.bot_state == BotState::Completed {
            debug!(meeting_id, event_id = %event.uuid, "Meeting is closed, ignoring calendar event");
            return Ok(Outcome::Unchanged);
        }
        if let (Some(applied), Some(version)) = (meeting.last_synced_at, event.last_updated_at) {
            if version < applied {
                debug!(meeting_id, event_id = %event.uuid, "Older event version, ignoring");
                return Ok(Outcome::Unchanged);
            }
        }

        let mut updated = meeting.clone();
        updated.calendar_event_id = Some(event.uuid.clone());
        if !event.title.trim().is_empty() {
            updated.title = event.title.clone();
        }
        // Compared at millisecond precision, the precision the row stores.
        if !same_instant(meeting.date, event.start_time) {
            updated.date = event.start_time;
        }
        updated.duration_minutes = event.duration_minutes();
        if let Some(url) = event.meeting_url.as_deref().filter(|u| !u.is_empty()) {
            if meeting.platform_meeting_url.as_deref() != Some(url) {
                updated.platform_meeting_url = Some(url.to_string());
                updated.platform = detect_platform(url).map(str::to_string);
            }
        }
        if let Some(version) = event.last_updated_at {
            if !meeting.last_synced_at.is_some_and(|seen| same_instant(seen, version)) {
                updated.last_synced_at = Some(version);
            }
        }

        let timing_changed = !same_instant(meeting.date, updated.date)
            || meeting.duration_minutes != updated.duration_minutes;
        let content_changed = timing_changed || meeting.title != updated.title;
        let link_changed = meeting.calendar_event_id != updated.calendar_event_id
            || meeting.platform_meeting_url != updated.platform_meeting_url;

        let mut bot_error = None;
        match meeting.bot_state {
            BotState::Scheduled if timing_changed && meeting.meeting_baas_id.is_some() => {
                // Bots are bound to a reservation window: replace, never edit.
                self.release_bot(&meeting, Some(&event.uuid)).await;
                match self.schedule_event_bot(&event.uuid).await {
                    Ok(bot_id) => {
                        info!(meeting_id, bot_id = %bot_id, "Replaced bot for moved meeting");
                        updated.meeting_baas_id = Some(bot_id);
                    }
                    Err(err) => {
                        warn!(meeting_id, error = %err, "Could not reschedule bot, will retry on next poll");
                        updated.meeting_baas_id = None;
                        updated.bot_state = BotState::Unscheduled;
                        bot_error = Some(err);
                    }
                }
            }
            BotState::Unscheduled
                if meeting.meeting_baas_id.is_none()
                    && updated.platform_meeting_url.is_some()
                    && is_upcoming(&updated, Utc::now()) =>
            {
                match self.adopt_or_schedule(meeting_id, event).await {
                    Ok(bot_id) => {
                        info!(meeting_id, bot_id = %bot_id, "Scheduled bot for calendar event");
                        updated.meeting_baas_id = Some(bot_id);
                        updated.bot_state = BotState::Scheduled;
                    }
                    Err(err) => {
                        warn!(meeting_id, error = %err, "Could not schedule bot, will retry on next poll");
                        bot_error = Some(err);
                    }
                }
            }
            _ => {}
        }

        let outcome = if updated == meeting {
            Outcome::Unchanged
        } else if content_changed || link_changed {
            let change_type = if content_changed {
                ChangeType::Updated
            } else {
                ChangeType::Synced
            };
            let change = NewMeetingChange {
                meeting_id,
                change_type,
                calendar_event_id: Some(event.uuid.clone()),
                previous: MeetingSnapshot::of(&meeting),
                new: MeetingSnapshot::of(&updated),
                raw_payload: serde_json::to_string(event).ok(),
            };
            self.save_with_change(updated, change).await?;
            info!(meeting_id, event_id = %event.uuid, change = change_type.as_str(),
                "Applied calendar event");
            Outcome::Applied
        } else {
            self.save(updated).await?;
            Outcome::Applied
        };

        match bot_error {
            Some(err) => Err(err.into()),
            None => Ok(outcome),
        }
    }

    /// Reuse a bot the provider already attached to the event, unless it
    /// belongs to another meeting.
    async fn adopt_or_schedule(
        &self,
        meeting_id: i64,
        event: &CalendarEvent,
    ) -> Result<String, crate::gateway::GatewayError> {
        if let Some(bot_id) = event.bot_id.as_deref() {
            match self.find_by_bot(bot_id).await {
                Ok(None) => return Ok(bot_id.to_string()),
                Ok(Some(owner)) if owner.id == meeting_id => return Ok(bot_id.to_string()),
                _ => {}
            }
        }
        self.schedule_event_bot(&event.uuid).await
    }

    async fn cancel_for_event(
        &self,
        event_uuid: &str,
        raw_event_id: Option<&str>,
    ) -> Result<Outcome, ReconcileError> {
        let mut found = self.find_by_event(event_uuid).await?;
        if found.is_none() {
            if let Some(raw) = raw_event_id {
                found = self.find_by_event(raw).await?;
            }
        }
        let Some(found) = found else {
            info!(event_id = event_uuid, "Deleted calendar event has no meeting");
            return Ok(Outcome::Unmatched);
        };

        let _guard = self.locks.lock(found.id).await;
        self.retrying(|| self.apply_cancellation(found.id, event_uuid))
            .await
    }

    async fn apply_cancellation(
        &self,
        meeting_id: i64,
        event_uuid: &str,
    ) -> Result<Outcome, ReconcileError> {
        let Some(meeting) = self.load(meeting_id).await? else {
            return Ok(Outcome::Unmatched);
        };
        if meeting.status == MeetingStatus::Cancelled {
            return Ok(Outcome::Unchanged);
        }
        if meeting.bot_state == BotState::Completed {
            info!(meeting_id, "Calendar event deleted after the meeting was recorded, keeping it");
            return Ok(Outcome::Unchanged);
        }

        let mut updated = meeting.clone();
        updated.status = MeetingStatus::Cancelled;
        if meeting.bot_state.can_transition_to(BotState::Cancelled) {
            updated.bot_state = BotState::Cancelled;
        }

        let change = NewMeetingChange {
            meeting_id,
            change_type: ChangeType::Deleted,
            calendar_event_id: Some(event_uuid.to_string()),
            previous: MeetingSnapshot::of(&meeting),
            new: MeetingSnapshot::default(),
            raw_payload: Some(json!({ "event_uuid": event_uuid, "deleted": true }).to_string()),
        };
        self.save_with_change(updated, change).await?;
        info!(meeting_id, event_id = event_uuid, "Meeting cancelled by calendar deletion");

        if matches!(meeting.bot_state, BotState::Scheduled | BotState::Joining) {
            let outcome = self.release_bot(&meeting, Some(event_uuid)).await;
            debug!(meeting_id, ?outcome, "Released bot of cancelled meeting");
        }
        Ok(Outcome::Applied)
    }
}

fn same_instant(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp_millis() == b.timestamp_millis()
}

fn start_of_day(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let midnight = at.date_naive().and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}
