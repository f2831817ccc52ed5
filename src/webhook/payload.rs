//! Inbound provider payloads, parsed into a closed set of event kinds.
//!
//! Bot events carry `event`; calendar events carry `event_type`. Anything
//! else fails to parse and is acknowledged without processing.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::gateway::CalendarEvent;
use crate::meeting::{BotStatusCode, TranscriptSegment};

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    BotStatusChange {
        bot_id: String,
        code: BotStatusCode,
    },
    BotComplete {
        bot_id: String,
        transcript: Vec<TranscriptSegment>,
        recording_url: Option<String>,
    },
    BotFailed {
        bot_id: String,
        code: Option<BotStatusCode>,
    },
    CalendarSyncEvents {
        calendar_id: String,
        affected_event_uuids: Vec<String>,
    },
    CalendarEventCreated(CalendarEventNotice),
    CalendarEventUpdated(CalendarEventNotice),
    CalendarEventDeleted {
        calendar_id: Option<String>,
        event_uuid: String,
        raw_event_id: Option<String>,
    },
}

impl WebhookEvent {
    /// Wire name, also the first component of idempotency keys.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BotStatusChange { .. } => "bot.status_change",
            Self::BotComplete { .. } => "complete",
            Self::BotFailed { .. } => "bot_error",
            Self::CalendarSyncEvents { .. } => "calendar.sync_events",
            Self::CalendarEventCreated(_) => "calendar.event_created",
            Self::CalendarEventUpdated(_) => "calendar.event_updated",
            Self::CalendarEventDeleted { .. } => "calendar.event_deleted",
        }
    }
}

/// A single-event calendar notification. `event` is set when the payload
/// carried enough fields to stand in for the provider's record.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEventNotice {
    pub calendar_id: Option<String>,
    pub event_uuid: String,
    pub event: Option<CalendarEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(String),
    #[error("unknown event type {0:?}")]
    UnknownEvent(String),
    #[error("{event} payload is missing {field}")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize, Default)]
struct BotData {
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    status: Option<StatusData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    transcript: Vec<TranscriptSegment>,
    #[serde(default)]
    mp4: Option<String>,
}

#[derive(Deserialize)]
struct StatusData {
    code: String,
}

#[derive(Deserialize, Default)]
struct CalendarData {
    #[serde(default)]
    calendar_id: Option<String>,
    #[serde(default)]
    affected_event_uuids: Vec<String>,
    #[serde(default, alias = "event_uuid")]
    uuid: Option<String>,
    #[serde(default, alias = "google_id", alias = "raw_calendar_event_id")]
    raw_event_id: Option<String>,
    #[serde(default, alias = "name")]
    title: Option<String>,
    #[serde(default)]
    start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    duration: Option<i64>,
    #[serde(default)]
    meeting_url: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    last_updated_at: Option<DateTime<Utc>>,
}

pub fn parse_event(body: &[u8]) -> Result<WebhookEvent, PayloadError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| PayloadError::Json(e.to_string()))?;

    match (envelope.event, envelope.event_type) {
        (Some(event), _) => parse_bot_event(&event, envelope.data),
        (None, Some(event_type)) => parse_calendar_event(&event_type, envelope.data),
        (None, None) => Err(PayloadError::UnknownEvent(String::new())),
    }
}

fn data<T: for<'de> Deserialize<'de> + Default>(value: serde_json::Value) -> Result<T, PayloadError> {
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value).map_err(|e| PayloadError::Json(e.to_string()))
}

fn parse_bot_event(event: &str, value: serde_json::Value) -> Result<WebhookEvent, PayloadError> {
    let data: BotData = data(value)?;
    let require_bot = |event: &'static str| {
        data.bot_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(PayloadError::MissingField {
                event,
                field: "bot_id",
            })
    };

    match event {
        "bot.status_change" => {
            let bot_id = require_bot("bot.status_change")?;
            let code = data
                .status
                .as_ref()
                .map(|s| BotStatusCode::parse(&s.code))
                .ok_or(PayloadError::MissingField {
                    event: "bot.status_change",
                    field: "status.code",
                })?;
            Ok(WebhookEvent::BotStatusChange { bot_id, code })
        }
        "complete" => Ok(WebhookEvent::BotComplete {
            bot_id: require_bot("complete")?,
            transcript: data.transcript.clone(),
            recording_url: data.mp4.clone().filter(|url| !url.is_empty()),
        }),
        "bot_error" | "failed" => Ok(WebhookEvent::BotFailed {
            bot_id: require_bot("bot_error")?,
            code: data
                .status
                .as_ref()
                .map(|s| s.code.as_str())
                .or(data.error.as_deref())
                .map(BotStatusCode::parse),
        }),
        other => Err(PayloadError::UnknownEvent(other.to_string())),
    }
}

fn parse_calendar_event(
    event_type: &str,
    value: serde_json::Value,
) -> Result<WebhookEvent, PayloadError> {
    let data: CalendarData = data(value)?;

    match event_type {
        "calendar.sync_events" => Ok(WebhookEvent::CalendarSyncEvents {
            calendar_id: data.calendar_id.ok_or(PayloadError::MissingField {
                event: "calendar.sync_events",
                field: "calendar_id",
            })?,
            affected_event_uuids: data.affected_event_uuids,
        }),
        "calendar.event_created" => Ok(WebhookEvent::CalendarEventCreated(notice(
            "calendar.event_created",
            data,
        )?)),
        "calendar.event_updated" => Ok(WebhookEvent::CalendarEventUpdated(notice(
            "calendar.event_updated",
            data,
        )?)),
        "calendar.event_deleted" => {
            let event_uuid = data.uuid.ok_or(PayloadError::MissingField {
                event: "calendar.event_deleted",
                field: "uuid",
            })?;
            Ok(WebhookEvent::CalendarEventDeleted {
                calendar_id: data.calendar_id,
                event_uuid,
                raw_event_id: data.raw_event_id,
            })
        }
        other => Err(PayloadError::UnknownEvent(other.to_string())),
    }
}

fn notice(event: &'static str, data: CalendarData) -> Result<CalendarEventNotice, PayloadError> {
    let event_uuid = data.uuid.clone().ok_or(PayloadError::MissingField {
        event,
        field: "uuid",
    })?;

    // Without a start time the payload is only a pointer to the event.
    let inline = data.start_time.map(|start_time| CalendarEvent {
        uuid: event_uuid.clone(),
        calendar_id: data.calendar_id.clone(),
        raw_event_id: data.raw_event_id.clone(),
        title: data.title.clone().unwrap_or_default(),
        start_time,
        end_time: data.end_time,
        duration: data.duration,
        meeting_url: data.meeting_url.clone(),
        deleted: false,
        bot_id: data.bot_id.clone(),
        last_updated_at: data.last_updated_at,
    });

    Ok(CalendarEventNotice {
        calendar_id: data.calendar_id,
        event_uuid,
        event: inline,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_change() {
        let event = parse_event(
            br#"{"event":"bot.status_change","data":{"bot_id":"bot-1","status":{"code":"joining_call"}}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            WebhookEvent::BotStatusChange {
                bot_id: "bot-1".to_string(),
                code: BotStatusCode::JoiningCall,
            }
        );
    }

    #[test]
    fn test_parse_complete_with_artifacts() {
        let event = parse_event(
            br#"{"event":"complete","data":{"bot_id":"bot-1","mp4":"https://x/1.mp4",
                "transcript":[{"speaker":"Ana","words":[{"word":"hi"}]}]}}"#,
        )
        .unwrap();
        let WebhookEvent::BotComplete {
            transcript,
            recording_url,
            ..
        } = event
        else {
            panic!("expected completion");
        };
        assert_eq!(transcript.len(), 1);
        assert_eq!(recording_url.as_deref(), Some("https://x/1.mp4"));
    }

    #[test]
    fn test_parse_bot_error_uses_error_code() {
        let event =
            parse_event(br#"{"event":"bot_error","data":{"bot_id":"b","error":"bot_rejected"}}"#)
                .unwrap();
        assert_eq!(
            event,
            WebhookEvent::BotFailed {
                bot_id: "b".to_string(),
                code: Some(BotStatusCode::BotRejected),
            }
        );
    }

    #[test]
    fn test_parse_calendar_events() {
        let sync = parse_event(
            br#"{"event_type":"calendar.sync_events","data":{"calendar_id":"c","affected_event_uuids":["e1","e2"]}}"#,
        )
        .unwrap();
        assert_eq!(sync.kind(), "calendar.sync_events");

        let updated = parse_event(
            br#"{"event_type":"calendar.event_updated","data":{"calendar_id":"c","uuid":"e1",
                "title":"Standup","start_time":"2024-03-01T09:00:00Z","duration":15}}"#,
        )
        .unwrap();
        let WebhookEvent::CalendarEventUpdated(notice) = updated else {
            panic!("expected update");
        };
        let event = notice.event.unwrap();
        assert_eq!(event.title, "Standup");
        assert_eq!(event.duration_minutes(), 15);

        let bare = parse_event(br#"{"event_type":"calendar.event_updated","data":{"uuid":"e1"}}"#)
            .unwrap();
        let WebhookEvent::CalendarEventUpdated(notice) = bare else {
            panic!("expected update");
        };
        assert!(notice.event.is_none());
    }

    #[test]
    fn test_rejects_unknown_and_incomplete_payloads() {
        assert!(matches!(
            parse_event(br#"{"event":"bot.teleported","data":{"bot_id":"b"}}"#),
            Err(PayloadError::UnknownEvent(_))
        ));
        assert!(matches!(
            parse_event(br#"{"event":"bot.status_change","data":{"bot_id":"b"}}"#),
            Err(PayloadError::MissingField { .. })
        ));
        assert!(matches!(parse_event(b"not json"), Err(PayloadError::Json(_))));
    }
}
