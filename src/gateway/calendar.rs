//! Calendar access: the recording provider's calendar registry (event
//! listing, calendar registration) and direct event writes against Google
//! Calendar or Microsoft Graph using the integration's refresh token.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::error::GatewayError;
use super::http::{endpoint, HttpClient, Retry};
use super::{CalendarGateway, API_KEY_HEADER};
use crate::config::{CalendarConfig, ProviderConfig};
use crate::meeting::{CalendarIntegration, CalendarProvider};

/// Used when an event carries neither an end time nor a duration.
pub const DEFAULT_EVENT_MINUTES: i64 = 30;

/// Upper bound on pages fetched by a single `list_events` call.
const MAX_EVENT_PAGES: usize = 50;

/// An event as tracked by the recording provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub uuid: String,
    #[serde(default, alias = "calendar_uuid")]
    pub calendar_id: Option<String>,
    /// Event id inside the user's own calendar.
    #[serde(default, alias = "google_id", alias = "raw_calendar_event_id")]
    pub raw_event_id: Option<String>,
    #[serde(default, alias = "name")]
    pub title: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Minutes.
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub meeting_url: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl CalendarEvent {
    pub fn duration_minutes(&self) -> i64 {
        self.duration
            .or_else(|| {
                self.end_time
                    .map(|end| (end - self.start_time).num_minutes())
            })
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_EVENT_MINUTES)
    }
}

/// Fields written when creating or updating an event in the user's calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEventDraft {
    pub title: String,
    pub start: DateTime<Utc>,
    pub duration_minutes: i64,
    pub meeting_url: Option<String>,
    pub description: Option<String>,
}

impl CalendarEventDraft {
    fn end(&self) -> DateTime<Utc> {
        self.start + chrono::Duration::minutes(self.duration_minutes.max(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterCalendar {
    pub provider: CalendarProvider,
    pub refresh_token: String,
    /// Defaults to the account's primary calendar.
    pub raw_calendar_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegisteredCalendar {
    pub uuid: String,
    #[serde(default, alias = "google_id", alias = "raw_calendar_id")]
    pub raw_calendar_id: Option<String>,
}

/// Base URLs of the calendar providers' own APIs.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEndpoints {
    pub google_token_url: String,
    pub google_api_base: String,
    pub microsoft_token_url: String,
    pub microsoft_api_base: String,
}

impl Default for CalendarEndpoints {
    fn default() -> Self {
        Self {
            google_token_url: "https://oauth2.googleapis.com/token".to_string(),
            google_api_base: "https://www.googleapis.com/calendar/v3".to_string(),
            microsoft_token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token"
                .to_string(),
            microsoft_api_base: "https://graph.microsoft.com/v1.0".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct EventPage {
    #[serde(default, alias = "data")]
    events: Vec<CalendarEvent>,
    #[serde(default, alias = "next")]
    next_cursor: Option<String>,
}

#[derive(Deserialize)]
struct CalendarEnvelope {
    calendar: RegisteredCalendar,
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: String,
}

pub struct HttpCalendarGateway {
    http: HttpClient,
    provider_base: String,
    api_key: String,
    oauth: CalendarConfig,
    endpoints: CalendarEndpoints,
}

impl HttpCalendarGateway {
    pub fn new(http: HttpClient, provider: &ProviderConfig, oauth: &CalendarConfig) -> Self {
        Self::with_endpoints(http, provider, oauth, CalendarEndpoints::default())
    }

    pub fn with_endpoints(
        http: HttpClient,
        provider: &ProviderConfig,
        oauth: &CalendarConfig,
        endpoints: CalendarEndpoints,
    ) -> Self {
        Self {
            http,
            provider_base: provider.base_url.trim_end_matches('/').to_string(),
            api_key: provider.api_key.clone(),
            oauth: oauth.clone(),
            endpoints,
        }
    }

    fn provider_request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.provider_base, path))
            .header(API_KEY_HEADER, &self.api_key)
    }

    fn client_credentials(&self, provider: CalendarProvider) -> (&str, &str) {
        match provider {
            CalendarProvider::Google => (
                self.oauth.google_client_id.as_str(),
                self.oauth.google_client_secret.as_str(),
            ),
            CalendarProvider::Microsoft => (
                self.oauth.microsoft_client_id.as_str(),
                self.oauth.microsoft_client_secret.as_str(),
            ),
        }
    }

    fn events_url(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: Option<&str>,
    ) -> Result<Url, GatewayError> {
        let calendar = integration.raw_calendar_id.as_str();
        match integration.provider {
            CalendarProvider::Google => {
                let mut segments = vec!["calendars", calendar, "events"];
                segments.extend(raw_event_id);
                endpoint(&self.endpoints.google_api_base, &segments)
            }
            CalendarProvider::Microsoft => match raw_event_id {
                Some(id) => endpoint(&self.endpoints.microsoft_api_base, &["me", "events", id]),
                None if calendar.is_empty() || calendar == "primary" => {
                    endpoint(&self.endpoints.microsoft_api_base, &["me", "events"])
                }
                None => endpoint(
                    &self.endpoints.microsoft_api_base,
                    &["me", "calendars", calendar, "events"],
                ),
            },
        }
    }
}

fn event_body(provider: CalendarProvider, draft: &CalendarEventDraft) -> Value {
    match provider {
        CalendarProvider::Google => {
            let mut body = json!({
                "summary": draft.title,
                "start": { "dateTime": draft.start.to_rfc3339_opts(SecondsFormat::Secs, true) },
                "end": { "dateTime": draft.end().to_rfc3339_opts(SecondsFormat::Secs, true) },
            });
            if let Some(url) = &draft.meeting_url {
                body["location"] = json!(url);
            }
            if let Some(description) = &draft.description {
                body["description"] = json!(description);
            }
            body
        }
        CalendarProvider::Microsoft => {
            let graph_time = |t: DateTime<Utc>| {
                json!({ "dateTime": t.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": "UTC" })
            };
            let mut body = json!({
                "subject": draft.title,
                "start": graph_time(draft.start),
                "end": graph_time(draft.end()),
            });
            if let Some(url) = &draft.meeting_url {
                body["location"] = json!({ "displayName": url });
            }
            if let Some(description) = &draft.description {
                body["body"] = json!({ "contentType": "text", "content": description });
            }
            body
        }
    }
}

#[async_trait]
impl CalendarGateway for HttpCalendarGateway {
    async fn access_token(
        &self,
        provider: CalendarProvider,
        refresh_token: &str,
    ) -> Result<String, GatewayError> {
        let (client_id, client_secret) = self.client_credentials(provider);
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
        ];
        let url = match provider {
            CalendarProvider::Google => &self.endpoints.google_token_url,
            CalendarProvider::Microsoft => {
                form.push(("scope", "https://graph.microsoft.com/.default offline_access"));
                &self.endpoints.microsoft_token_url
            }
        };

        let result: Result<TokenResponse, GatewayError> = self
            .http
            .send_json(self.http.request(Method::POST, url).form(&form), Retry::Idempotent)
            .await;

        match result {
            Ok(token) => Ok(token.access_token),
            // OAuth servers answer 400 invalid_grant for expired or revoked tokens.
            Err(GatewayError::Api { status, body })
                if status == StatusCode::BAD_REQUEST.as_u16() && body.contains("invalid_grant") =>
            {
                Err(GatewayError::Unauthorized(body))
            }
            Err(err) => Err(err),
        }
    }

    async fn register_calendar(
        &self,
        request: &RegisterCalendar,
    ) -> Result<RegisteredCalendar, GatewayError> {
        let (client_id, client_secret) = self.client_credentials(request.provider);
        let platform = match request.provider {
            CalendarProvider::Google => "Google",
            CalendarProvider::Microsoft => "Microsoft",
        };
        let mut body = json!({
            "oauth_client_id": client_id,
            "oauth_client_secret": client_secret,
            "oauth_refresh_token": request.refresh_token,
            "platform": platform,
        });
        if let Some(raw) = &request.raw_calendar_id {
            body["raw_calendar_id"] = json!(raw);
        }

        let envelope: CalendarEnvelope = self
            .http
            .send_json(
                self.provider_request(Method::POST, "/calendars").json(&body),
                Retry::SingleAttempt,
            )
            .await?;
        Ok(envelope.calendar)
    }

    async fn remove_calendar(&self, calendar_id: &str) -> Result<(), GatewayError> {
        self.http
            .send_empty(
                self.provider_request(Method::DELETE, &format!("/calendars/{calendar_id}")),
                Retry::Idempotent,
            )
            .await
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, GatewayError> {
        let since = since.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true));
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_EVENT_PAGES {
            let mut query: Vec<(&str, &str)> = vec![("calendar_id", calendar_id)];
            if let Some(since) = &since {
                query.push(("updated_at_gte", since.as_str()));
            }
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.as_str()));
            }

            let page: EventPage = self
                .http
                .send_json(
                    self.provider_request(Method::GET, "/calendar_events").query(&query),
                    Retry::Idempotent,
                )
                .await?;
            events.extend(page.events);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(events),
            }
        }

        debug!(calendar_id, pages = MAX_EVENT_PAGES, "Stopped paging calendar events");
        Ok(events)
    }

    async fn get_event(&self, event_uuid: &str) -> Result<CalendarEvent, GatewayError> {
        self.http
            .send_json(
                self.provider_request(Method::GET, &format!("/calendar_events/{event_uuid}")),
                Retry::Idempotent,
            )
            .await
    }

    async fn create_event(
        &self,
        integration: &CalendarIntegration,
        draft: &CalendarEventDraft,
    ) -> Result<String, GatewayError> {
        let token = self
            .access_token(integration.provider, &integration.refresh_token)
            .await?;
        let url = self.events_url(integration, None)?;

        let created: CreatedEvent = self
            .http
            .send_json(
                self.http
                    .request(Method::POST, url)
                    .bearer_auth(token)
                    .json(&event_body(integration.provider, draft)),
                Retry::SingleAttempt,
            )
            .await?;
        debug!(raw_event_id = %created.id, provider = %integration.provider, "Created calendar event");
        Ok(created.id)
    }

    async fn update_event(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<(), GatewayError> {
        let token = self
            .access_token(integration.provider, &integration.refresh_token)
            .await?;
        let url = self.events_url(integration, Some(raw_event_id))?;

        self.http
            .send_empty(
                self.http
                    .request(Method::PATCH, url)
                    .bearer_auth(token)
                    .json(&event_body(integration.provider, draft)),
                Retry::Idempotent,
            )
            .await
    }

    async fn delete_event(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: &str,
    ) -> Result<(), GatewayError> {
        let token = self
            .access_token(integration.provider, &integration.refresh_token)
            .await?;
        let url = self.events_url(integration, Some(raw_event_id))?;

        self.http
            .send_empty(
                self.http.request(Method::DELETE, url).bearer_auth(token),
                Retry::Idempotent,
            )
            .await
    }
}
