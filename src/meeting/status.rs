//! Meeting lifecycle status types and the bot lifecycle state machine.

use anyhow::Result;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Lifecycle of the recording bot attached to a meeting.
///
/// ```text
/// unscheduled → scheduled → joining → in_progress → completed
///       └──────────┴──────────┴──────→ cancelled (calendar event deleted)
/// any non-terminal ──────────────────→ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Unscheduled,
    Scheduled,
    Joining,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl BotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unscheduled => "unscheduled",
            Self::Scheduled => "scheduled",
            Self::Joining => "joining",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<BotState> {
        match s {
            "unscheduled" => Ok(Self::Unscheduled),
            "scheduled" => Ok(Self::Scheduled),
            "joining" => Ok(Self::Joining),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => anyhow::bail!("Invalid bot state: {}", s),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position along the happy path; terminal side exits have no rank.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Unscheduled => Some(0),
            Self::Scheduled => Some(1),
            Self::Joining => Some(2),
            Self::InProgress => Some(3),
            Self::Completed => Some(4),
            Self::Failed | Self::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Forward moves along the happy path may skip states, since a missed
    /// webhook must not block a later one from applying. Backward moves are
    /// rejected so that late or replayed events never regress a meeting,
    /// with one exception: a scheduled bot may be released back to
    /// `unscheduled` when a reschedule could not place its replacement.
    pub fn can_transition_to(&self, next: BotState) -> bool {
        if *self == next || self.is_terminal() {
            return false;
        }

        match next {
            Self::Failed => true,
            Self::Cancelled => matches!(self, Self::Unscheduled | Self::Scheduled | Self::Joining),
            Self::Unscheduled => *self == Self::Scheduled,
            _ => match (self.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meeting status as surfaced to users. Provider status codes are mirrored
/// verbatim when they have no canonical equivalent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeetingStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Provider(String),
}

impl MeetingStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Provider(code) => code.as_str(),
        }
    }

    pub fn parse(s: &str) -> MeetingStatus {
        match s {
            "scheduled" => Self::Scheduled,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            other => Self::Provider(other.to_string()),
        }
    }

    /// True while the bot is in (or entering) the call.
    pub fn is_live(&self) -> bool {
        match self {
            Self::InProgress => true,
            Self::Provider(code) => matches!(
                BotStatusCode::parse(code).bot_state(),
                Some(BotState::Joining) | Some(BotState::InProgress)
            ),
            _ => false,
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MeetingStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MeetingStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(MeetingStatus::parse(&raw))
    }
}

/// Status of post-recording transcript analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<ProcessingStatus> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => anyhow::bail!("Invalid processing status: {}", s),
        }
    }
}

/// Status codes reported by the recording provider for a bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotStatusCode {
    JoiningCall,
    InWaitingRoom,
    InCallNotRecording,
    InCallRecording,
    RecordingPaused,
    RecordingResumed,
    CallEnded,
    Done,
    BotRejected,
    BotRemoved,
    WaitingRoomTimeout,
    InvalidMeetingUrl,
    MeetingError,
    Other(String),
}

impl BotStatusCode {
    pub fn parse(code: &str) -> BotStatusCode {
        match code {
            "joining_call" => Self::JoiningCall,
            "in_waiting_room" => Self::InWaitingRoom,
            "in_call_not_recording" => Self::InCallNotRecording,
            "in_call_recording" => Self::InCallRecording,
            "recording_paused" => Self::RecordingPaused,
            "recording_resumed" => Self::RecordingResumed,
            "call_ended" => Self::CallEnded,
            "done" | "complete" => Self::Done,
            "bot_rejected" => Self::BotRejected,
            "bot_removed" => Self::BotRemoved,
            "waiting_room_timeout" => Self::WaitingRoomTimeout,
            "invalid_meeting_url" => Self::InvalidMeetingUrl,
            "meeting_error" | "bot_error" | "failed" => Self::MeetingError,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::JoiningCall => "joining_call",
            Self::InWaitingRoom => "in_waiting_room",
            Self::InCallNotRecording => "in_call_not_recording",
            Self::InCallRecording => "in_call_recording",
            Self::RecordingPaused => "recording_paused",
            Self::RecordingResumed => "recording_resumed",
            Self::CallEnded => "call_ended",
            Self::Done => "done",
            Self::BotRejected => "bot_rejected",
            Self::BotRemoved => "bot_removed",
            Self::WaitingRoomTimeout => "waiting_room_timeout",
            Self::InvalidMeetingUrl => "invalid_meeting_url",
            Self::MeetingError => "meeting_error",
            Self::Other(code) => code.as_str(),
        }
    }

    /// Bot lifecycle state implied by this code. `call_ended` and `done` are
    /// not mapped: completion is driven by the `complete` event, which
    /// carries the recording artifacts.
    pub fn bot_state(&self) -> Option<BotState> {
        match self {
            Self::JoiningCall | Self::InWaitingRoom => Some(BotState::Joining),
            Self::InCallNotRecording
            | Self::InCallRecording
            | Self::RecordingPaused
            | Self::RecordingResumed => Some(BotState::InProgress),
            Self::BotRejected
            | Self::BotRemoved
            | Self::WaitingRoomTimeout
            | Self::InvalidMeetingUrl
            | Self::MeetingError => Some(BotState::Failed),
            Self::CallEnded | Self::Done | Self::Other(_) => None,
        }
    }
}

/// Supported calendar providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarProvider {
    Google,
    Microsoft,
}

impl CalendarProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Microsoft => "microsoft",
        }
    }

    pub fn parse(s: &str) -> Result<CalendarProvider> {
        match s {
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            _ => anyhow::bail!("Invalid calendar provider: {}", s),
        }
    }
}

impl fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert!(BotState::Unscheduled.can_transition_to(BotState::Scheduled));
        assert!(BotState::Scheduled.can_transition_to(BotState::Joining));
        assert!(BotState::Joining.can_transition_to(BotState::InProgress));
        assert!(BotState::InProgress.can_transition_to(BotState::Completed));
    }

    #[test]
    fn test_missed_events_can_be_skipped() {
        assert!(BotState::Scheduled.can_transition_to(BotState::InProgress));
        assert!(BotState::Scheduled.can_transition_to(BotState::Completed));
    }

    #[test]
    fn test_no_regression_or_self_transition() {
        assert!(!BotState::InProgress.can_transition_to(BotState::Joining));
        assert!(!BotState::Joining.can_transition_to(BotState::Joining));
        assert!(!BotState::Completed.can_transition_to(BotState::Failed));
        assert!(!BotState::Cancelled.can_transition_to(BotState::Scheduled));
    }

    #[test]
    fn test_cancel_only_before_the_call_starts() {
        assert!(BotState::Unscheduled.can_transition_to(BotState::Cancelled));
        assert!(BotState::Scheduled.can_transition_to(BotState::Cancelled));
        assert!(BotState::Joining.can_transition_to(BotState::Cancelled));
        assert!(!BotState::InProgress.can_transition_to(BotState::Cancelled));
    }

    #[test]
    fn test_failed_reachable_from_any_non_terminal() {
        for state in [
            BotState::Unscheduled,
            BotState::Scheduled,
            BotState::Joining,
            BotState::InProgress,
        ] {
            assert!(state.can_transition_to(BotState::Failed), "{state}");
        }
    }

    #[test]
    fn test_release_only_from_scheduled() {
        assert!(BotState::Scheduled.can_transition_to(BotState::Unscheduled));
        assert!(!BotState::Joining.can_transition_to(BotState::Unscheduled));
    }

    #[test]
    fn test_bot_state_round_trip() {
        for state in [
            BotState::Unscheduled,
            BotState::Scheduled,
            BotState::Joining,
            BotState::InProgress,
            BotState::Completed,
            BotState::Failed,
            BotState::Cancelled,
        ] {
            assert_eq!(BotState::parse(state.as_str()).unwrap(), state);
        }
        assert!(BotState::parse("bogus").is_err());
    }

    #[test]
    fn test_meeting_status_keeps_raw_codes() {
        assert_eq!(MeetingStatus::parse("scheduled"), MeetingStatus::Scheduled);
        let raw = MeetingStatus::parse("joining_call");
        assert_eq!(raw, MeetingStatus::Provider("joining_call".to_string()));
        assert_eq!(raw.as_str(), "joining_call");
        assert!(raw.is_live());
        assert!(!MeetingStatus::Scheduled.is_live());

        let json = serde_json::to_string(&MeetingStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }

    #[test]
    fn test_status_codes_map_to_states() {
        assert_eq!(
            BotStatusCode::parse("joining_call").bot_state(),
            Some(BotState::Joining)
        );
        assert_eq!(
            BotStatusCode::parse("in_call_recording").bot_state(),
            Some(BotState::InProgress)
        );
        assert_eq!(
            BotStatusCode::parse("bot_rejected").bot_state(),
            Some(BotState::Failed)
        );
        assert_eq!(BotStatusCode::parse("call_ended").bot_state(), None);
        assert_eq!(
            BotStatusCode::parse("something_new"),
            BotStatusCode::Other("something_new".to_string())
        );
    }

    #[test]
    fn test_processing_status_serialization() {
        let json = serde_json::to_string(&ProcessingStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
        assert_eq!(
            ProcessingStatus::parse("failed").unwrap(),
            ProcessingStatus::Failed
        );
    }
}
