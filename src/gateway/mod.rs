//! Typed clients for the recording provider and the calendar providers.
//!
//! The reconciler only sees the [`BotGateway`] and [`CalendarGateway`]
//! traits; the HTTP implementations live in [`bot`] and [`calendar`].

pub mod bot;
pub mod calendar;
pub mod error;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use bot::{BotDetails, BotPage, BotSummary, CreateBotRequest, HttpBotGateway, ScheduleBotRequest};
pub use calendar::{
    CalendarEndpoints, CalendarEvent, CalendarEventDraft, HttpCalendarGateway, RegisterCalendar,
    RegisteredCalendar,
};
pub use error::{CleanupOutcome, GatewayError};
pub use http::{HttpClient, Retry};

use crate::meeting::{CalendarIntegration, CalendarProvider};

/// Header carrying the recording provider API key.
pub const API_KEY_HEADER: &str = "x-meeting-baas-api-key";

#[async_trait]
pub trait BotGateway: Send + Sync {
    /// Create a bot for a meeting URL. Returns the provider bot id.
    async fn create_bot(&self, request: &CreateBotRequest) -> Result<String, GatewayError>;

    /// Remove a bot from its call (or cancel it if it has not joined yet).
    async fn end_bot(&self, bot_id: &str) -> Result<(), GatewayError>;

    async fn get_bot(&self, bot_id: &str) -> Result<BotDetails, GatewayError>;

    async fn list_bots(&self, cursor: Option<&str>) -> Result<BotPage, GatewayError>;

    /// Attach a bot to a provider calendar event. Returns the bot id.
    async fn schedule_for_event(
        &self,
        event_uuid: &str,
        request: &ScheduleBotRequest,
    ) -> Result<String, GatewayError>;

    async fn unschedule_for_event(&self, event_uuid: &str) -> Result<(), GatewayError>;
}

#[async_trait]
pub trait CalendarGateway: Send + Sync {
    /// Exchange a stored refresh token for a short-lived access token.
    async fn access_token(
        &self,
        provider: CalendarProvider,
        refresh_token: &str,
    ) -> Result<String, GatewayError>;

    /// Register a user's calendar with the recording provider.
    async fn register_calendar(
        &self,
        request: &RegisterCalendar,
    ) -> Result<RegisteredCalendar, GatewayError>;

    async fn remove_calendar(&self, calendar_id: &str) -> Result<(), GatewayError>;

    /// Events of a registered calendar, optionally only those updated since `since`.
    async fn list_events(
        &self,
        calendar_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, GatewayError>;

    async fn get_event(&self, event_uuid: &str) -> Result<CalendarEvent, GatewayError>;

    /// Create an event in the user's own calendar. Returns the raw event id.
    async fn create_event(
        &self,
        integration: &CalendarIntegration,
        draft: &CalendarEventDraft,
    ) -> Result<String, GatewayError>;

    async fn update_event(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: &str,
        draft: &CalendarEventDraft,
    ) -> Result<(), GatewayError>;

    async fn delete_event(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: &str,
    ) -> Result<(), GatewayError>;
}
