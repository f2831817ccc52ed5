//! Persisted records owned by the reconciliation engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{BotState, CalendarProvider, MeetingStatus, ProcessingStatus};

/// Canonical internal meeting record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meeting {
    pub id: i64,
    pub user_id: String,
    /// Team member the meeting is held with, used for task assignment.
    pub member_id: Option<String>,
    pub title: String,
    pub date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: MeetingStatus,
    pub bot_state: BotState,
    pub processing_status: ProcessingStatus,
    pub calendar_event_id: Option<String>,
    /// Bot/session id at the recording provider; join key for webhooks.
    pub meeting_baas_id: Option<String>,
    pub platform: Option<String>,
    pub platform_meeting_url: Option<String>,
    pub recording_url: Option<String>,
    pub transcript: Option<String>,
    pub summary: Option<String>,
    pub wins: Vec<String>,
    pub areas_for_support: Vec<String>,
    pub tasks: Vec<AssignedTask>,
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency counter, bumped on every save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Meeting {
    /// Whether the meeting still expects bot activity.
    pub fn has_active_bot(&self) -> bool {
        self.meeting_baas_id.is_some() && !self.bot_state.is_terminal()
    }
}

/// Fields needed to create a meeting.
#[derive(Debug, Clone)]
pub struct NewMeeting {
    pub user_id: String,
    pub member_id: Option<String>,
    pub title: String,
    pub date: DateTime<Utc>,
    pub duration_minutes: i64,
    pub calendar_event_id: Option<String>,
    pub platform_meeting_url: Option<String>,
}

/// An action item extracted from a transcript, optionally assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedTask {
    pub text: String,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Updated,
    Deleted,
    Synced,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Synced => "synced",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<ChangeType> {
        match s {
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            "synced" => Ok(Self::Synced),
            _ => anyhow::bail!("Invalid change type: {}", s),
        }
    }
}

/// Title/date/duration snapshot on one side of a change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MeetingSnapshot {
    pub title: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
}

impl MeetingSnapshot {
    pub fn of(meeting: &Meeting) -> Self {
        Self {
            title: Some(meeting.title.clone()),
            date: Some(meeting.date),
            duration_minutes: Some(meeting.duration_minutes),
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeetingChange {
    pub id: i64,
    pub meeting_id: i64,
    pub change_type: ChangeType,
    pub calendar_event_id: Option<String>,
    pub previous: MeetingSnapshot,
    pub new: MeetingSnapshot,
    pub raw_payload: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMeetingChange {
    pub meeting_id: i64,
    pub change_type: ChangeType,
    pub calendar_event_id: Option<String>,
    pub previous: MeetingSnapshot,
    pub new: MeetingSnapshot,
    pub raw_payload: Option<String>,
}

/// A user's connection to a calendar provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarIntegration {
    pub id: i64,
    pub user_id: String,
    pub provider: CalendarProvider,
    /// Calendar id assigned by the recording provider.
    pub calendar_id: String,
    /// Calendar id at the calendar provider itself.
    pub raw_calendar_id: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub is_active: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Guess the conferencing platform from a meeting URL.
pub fn detect_platform(url: &str) -> Option<&'static str> {
    let lower = url.to_ascii_lowercase();
    if lower.contains("meet.google.com") {
        Some("google_meet")
    } else if lower.contains("zoom.us") {
        Some("zoom")
    } else if lower.contains("teams.microsoft.com") || lower.contains("teams.live.com") {
        Some("teams")
    } else {
        None
    }
}
