#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meetsync::db::{Database, IntegrationRepository, MeetingRepository};
use meetsync::gateway::{
    BotDetails, BotGateway, BotPage, CalendarEvent, CalendarEventDraft, CalendarGateway,
    CreateBotRequest, GatewayError, RegisterCalendar, RegisteredCalendar, ScheduleBotRequest,
};
use meetsync::idempotency::{IdempotencyStore, InMemoryIdempotencyStore};
use meetsync::meeting::{CalendarIntegration, CalendarProvider, Meeting, NewMeeting};
use meetsync::reconciler::{BotSettings, Reconciler};
use meetsync::webhook::WebhookReceiver;

pub const MEETING_URL: &str = "https://zoom.us/j/123456789";

#[derive(Default)]
pub struct StubBots {
    calls: Mutex<Vec<String>>,
    scheduled: Mutex<usize>,
    unschedule_error: Mutex<Option<GatewayError>>,
    failing_events: Mutex<Vec<String>>,
}

impl StubBots {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fail_unschedule(&self, err: GatewayError) {
        *self.unschedule_error.lock().unwrap() = Some(err);
    }

    pub fn fail_event(&self, event_uuid: &str) {
        self.failing_events
            .lock()
            .unwrap()
            .push(event_uuid.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BotGateway for StubBots {
    async fn create_bot(&self, request: &CreateBotRequest) -> Result<String, GatewayError> {
        self.record(format!("create_bot:{}", request.meeting_url));
        Ok(format!("bot-{}", request.deduplication_key))
    }

    async fn end_bot(&self, bot_id: &str) -> Result<(), GatewayError> {
        self.record(format!("end_bot:{bot_id}"));
        Ok(())
    }

    async fn get_bot(&self, bot_id: &str) -> Result<BotDetails, GatewayError> {
        self.record(format!("get_bot:{bot_id}"));
        Err(GatewayError::NotFound(bot_id.to_string()))
    }

    async fn list_bots(&self, _cursor: Option<&str>) -> Result<BotPage, GatewayError> {
        Ok(BotPage::default())
    }

    async fn schedule_for_event(
        &self,
        event_uuid: &str,
        _request: &ScheduleBotRequest,
    ) -> Result<String, GatewayError> {
        self.record(format!("schedule:{event_uuid}"));
        if self
            .failing_events
            .lock()
            .unwrap()
            .iter()
            .any(|e| e == event_uuid)
        {
            return Err(GatewayError::Transport("connection reset".to_string()));
        }
        let mut scheduled = self.scheduled.lock().unwrap();
        *scheduled += 1;
        Ok(format!("bot-{event_uuid}-{scheduled}"))
    }

    async fn unschedule_for_event(&self, event_uuid: &str) -> Result<(), GatewayError> {
        self.record(format!("unschedule:{event_uuid}"));
        match self.unschedule_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct StubCalendars {
    events: Mutex<Vec<CalendarEvent>>,
}

impl StubCalendars {
    pub fn set_events(&self, events: Vec<CalendarEvent>) {
        *self.events.lock().unwrap() = events;
    }
}

#[async_trait]
impl CalendarGateway for StubCalendars {
    async fn access_token(
        &self,
        _provider: CalendarProvider,
        _refresh_token: &str,
    ) -> Result<String, GatewayError> {
        Ok("access".to_string())
    }

    async fn register_calendar(
        &self,
        request: &RegisterCalendar,
    ) -> Result<RegisteredCalendar, GatewayError> {
        Ok(RegisteredCalendar {
            uuid: "cal-1".to_string(),
            raw_calendar_id: request.raw_calendar_id.clone(),
        })
    }

    async fn remove_calendar(&self, _calendar_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn list_events(
        &self,
        _calendar_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, GatewayError> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn get_event(&self, event_uuid: &str) -> Result<CalendarEvent, GatewayError> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.uuid == event_uuid)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(event_uuid.to_string()))
    }

    async fn create_event(
        &self,
        _integration: &CalendarIntegration,
        _draft: &CalendarEventDraft,
    ) -> Result<String, GatewayError> {
        Ok("raw-1".to_string())
    }

    async fn update_event(
        &self,
        _integration: &CalendarIntegration,
        _raw_event_id: &str,
        _draft: &CalendarEventDraft,
    ) -> Result<(), GatewayError> {
        Ok(())
    }

    async fn delete_event(
        &self,
        _integration: &CalendarIntegration,
        _raw_event_id: &str,
    ) -> Result<(), GatewayError> {
        Ok(())
    }
}

pub struct World {
    pub db: Database,
    pub bots: Arc<StubBots>,
    pub calendars: Arc<StubCalendars>,
    pub reconciler: Arc<Reconciler>,
    pub store: Arc<dyn IdempotencyStore>,
    pub receiver: WebhookReceiver,
}

impl World {
    pub fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let bots = Arc::new(StubBots::default());
        let calendars = Arc::new(StubCalendars::default());
        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            bots.clone(),
            calendars.clone(),
            BotSettings {
                bot_name: "Notetaker".to_string(),
                webhook_url: None,
            },
        ));
        let store: Arc<dyn IdempotencyStore> = Arc::new(InMemoryIdempotencyStore::default());
        let receiver = WebhookReceiver::new(
            reconciler.clone(),
            store.clone(),
            Duration::from_secs(3600),
            None,
        );

        Self {
            db,
            bots,
            calendars,
            reconciler,
            store,
            receiver,
        }
    }

    pub async fn insert(&self, meeting: NewMeeting) -> i64 {
        self.db
            .call(move |conn| MeetingRepository::insert(conn, &meeting))
            .await
            .unwrap()
    }

    pub async fn save(&self, meeting: Meeting) {
        self.db
            .call(move |conn| MeetingRepository::save(conn, &meeting))
            .await
            .unwrap();
    }

    pub async fn meeting(&self, id: i64) -> Meeting {
        self.db
            .call(move |conn| MeetingRepository::get(conn, id))
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn meetings(&self) -> Vec<Meeting> {
        self.db
            .call(|conn| MeetingRepository::list(conn, 100))
            .await
            .unwrap()
    }

    pub async fn connect_calendar(&self, calendar_id: &str) -> i64 {
        let calendar_id = calendar_id.to_string();
        self.db
            .call(move |conn| {
                IntegrationRepository::activate(
                    conn,
                    "user-1",
                    CalendarProvider::Google,
                    &calendar_id,
                    "primary",
                    "refresh",
                )
            })
            .await
            .unwrap()
    }

    pub async fn deliver(&self, body: &str) -> axum::http::StatusCode {
        self.receiver
            .handle(body.as_bytes(), &axum::http::HeaderMap::new())
            .await
    }
}

pub fn at_minutes(minutes: i64) -> DateTime<Utc> {
    let at = Utc::now() + chrono::Duration::minutes(minutes);
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap()
}

pub fn new_meeting(title: &str, date: DateTime<Utc>, event_id: Option<&str>) -> NewMeeting {
    NewMeeting {
        user_id: "user-1".to_string(),
        member_id: None,
        title: title.to_string(),
        date,
        duration_minutes: 30,
        calendar_event_id: event_id.map(str::to_string),
        platform_meeting_url: Some(MEETING_URL.to_string()),
    }
}

pub fn event(uuid: &str, start: DateTime<Utc>, updated_at: Option<DateTime<Utc>>) -> CalendarEvent {
    CalendarEvent {
        uuid: uuid.to_string(),
        calendar_id: Some("cal-1".to_string()),
        raw_event_id: None,
        title: "Design review".to_string(),
        start_time: start,
        end_time: None,
        duration: Some(30),
        meeting_url: Some(MEETING_URL.to_string()),
        deleted: false,
        bot_id: None,
        last_updated_at: updated_at,
    }
}

pub fn updated_webhook(event: &CalendarEvent) -> String {
    serde_json::json!({
        "event_type": "calendar.event_updated",
        "data": {
            "calendar_id": event.calendar_id,
            "uuid": event.uuid,
            "title": event.title,
            "start_time": event.start_time,
            "duration": event.duration,
            "meeting_url": event.meeting_url,
            "last_updated_at": event.last_updated_at,
        }
    })
    .to_string()
}
