//! Recording provider bot API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::error::GatewayError;
use super::http::{endpoint, HttpClient, Retry};
use super::{BotGateway, API_KEY_HEADER};
use crate::config::ProviderConfig;
use crate::meeting::{BotStatusCode, TranscriptSegment};

#[derive(Debug, Clone, PartialEq)]
pub struct CreateBotRequest {
    pub meeting_url: String,
    pub bot_name: String,
    /// `None` joins immediately.
    pub start_time: Option<DateTime<Utc>>,
    /// Recognised by the provider, which makes the create safe to retry.
    pub deduplication_key: String,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleBotRequest {
    pub bot_name: String,
    pub webhook_url: Option<String>,
}

/// Current provider-side view of a bot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BotDetails {
    pub bot_id: String,
    pub status: Option<BotStatusCode>,
    pub ended: bool,
    pub transcript: Vec<TranscriptSegment>,
    pub recording_url: Option<String>,
}

impl BotDetails {
    /// Status to reconcile against. A bot that ended without reporting a
    /// code is treated as done.
    pub fn effective_status(&self) -> Option<BotStatusCode> {
        match &self.status {
            Some(code) => Some(code.clone()),
            None if self.ended => Some(BotStatusCode::Done),
            None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BotSummary {
    #[serde(alias = "uuid", alias = "bot_id")]
    pub id: String,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct BotPage {
    #[serde(default, alias = "recent_bots")]
    pub bots: Vec<BotSummary>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct CreatedBot {
    bot_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScheduledResponse {
    One(ScheduledEvent),
    Many(Vec<ScheduledEvent>),
}

#[derive(Deserialize)]
struct ScheduledEvent {
    #[serde(default, alias = "bot_uuid")]
    bot_id: Option<String>,
}

impl ScheduledResponse {
    fn into_bot_id(self) -> Option<String> {
        match self {
            Self::One(event) => event.bot_id,
            Self::Many(events) => events.into_iter().find_map(|e| e.bot_id),
        }
    }
}

#[derive(Deserialize)]
struct MeetingData {
    #[serde(default)]
    bot_data: BotData,
    #[serde(default)]
    mp4: Option<String>,
}

#[derive(Deserialize, Default)]
struct BotData {
    #[serde(default)]
    bot: Option<BotRecord>,
    #[serde(default)]
    transcripts: Vec<TranscriptSegment>,
}

#[derive(Deserialize)]
struct BotRecord {
    #[serde(default)]
    ended_at: Option<String>,
    #[serde(default, alias = "status_code")]
    status: Option<String>,
}

pub struct HttpBotGateway {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl HttpBotGateway {
    pub fn new(http: HttpClient, config: &ProviderConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    /// Ids from webhooks and calendars are untrusted path input; each
    /// segment is percent-encoded.
    fn request(
        &self,
        method: Method,
        segments: &[&str],
    ) -> Result<reqwest::RequestBuilder, GatewayError> {
        let url = endpoint(&self.base_url, segments)?;
        Ok(self
            .http
            .request(method, url)
            .header(API_KEY_HEADER, &self.api_key))
    }
}

#[async_trait]
impl BotGateway for HttpBotGateway {
    async fn create_bot(&self, request: &CreateBotRequest) -> Result<String, GatewayError> {
        let mut body = json!({
            "meeting_url": request.meeting_url,
            "bot_name": request.bot_name,
            "reserved": false,
            "recording_mode": "speaker_view",
            "deduplication_key": request.deduplication_key,
            "speech_to_text": { "provider": "Default" },
        });
        if let Some(start) = request.start_time {
            body["start_time"] = json!(start.timestamp_millis());
        }
        if let Some(url) = &request.webhook_url {
            body["webhook_url"] = json!(url);
        }

        let created: CreatedBot = self
            .http
            .send_json(self.request(Method::POST, &["bots"])?.json(&body), Retry::Idempotent)
            .await?;
        debug!(bot_id = %created.bot_id, "Created bot");
        Ok(created.bot_id)
    }

    async fn end_bot(&self, bot_id: &str) -> Result<(), GatewayError> {
        self.http
            .send_empty(
                self.request(Method::DELETE, &["bots", bot_id])?,
                Retry::Idempotent,
            )
            .await
    }

    async fn get_bot(&self, bot_id: &str) -> Result<BotDetails, GatewayError> {
        let data: MeetingData = self
            .http
            .send_json(
                self.request(Method::GET, &["bots", "meeting_data"])?
                    .query(&[("bot_id", bot_id)]),
                Retry::Idempotent,
            )
            .await?;

        let (ended, status) = match data.bot_data.bot {
            Some(record) => (
                record.ended_at.is_some(),
                record.status.as_deref().map(BotStatusCode::parse),
            ),
            None => (false, None),
        };

        Ok(BotDetails {
            bot_id: bot_id.to_string(),
            status,
            ended,
            transcript: data.bot_data.transcripts,
            recording_url: data.mp4.filter(|url| !url.is_empty()),
        })
    }

    async fn list_bots(&self, cursor: Option<&str>) -> Result<BotPage, GatewayError> {
        let mut builder = self.request(Method::GET, &["bots", "bots_with_metadata"])?;
        if let Some(cursor) = cursor {
            builder = builder.query(&[("cursor", cursor)]);
        }
        self.http.send_json(builder, Retry::Idempotent).await
    }

    async fn schedule_for_event(
        &self,
        event_uuid: &str,
        request: &ScheduleBotRequest,
    ) -> Result<String, GatewayError> {
        let mut body = json!({
            "bot_name": request.bot_name,
            "recording_mode": "speaker_view",
            "speech_to_text": { "provider": "Default" },
        });
        if let Some(url) = &request.webhook_url {
            body["webhook_url"] = json!(url);
        }

        // Scheduling replaces whatever bot the event had, so repeating it is safe.
        let response: ScheduledResponse = self
            .http
            .send_json(
                self.request(Method::POST, &["calendar_events", event_uuid, "bot"])?
                    .query(&[("all_occurrences", "false")])
                    .json(&body),
                Retry::Idempotent,
            )
            .await?;

        response.into_bot_id().ok_or_else(|| {
            GatewayError::Decode(format!("no bot id returned for calendar event {event_uuid}"))
        })
    }

    async fn unschedule_for_event(&self, event_uuid: &str) -> Result<(), GatewayError> {
        self.http
            .send_empty(
                self.request(Method::DELETE, &["calendar_events", event_uuid, "bot"])?
                    .query(&[("all_occurrences", "false")]),
                Retry::Idempotent,
            )
            .await
    }
}
