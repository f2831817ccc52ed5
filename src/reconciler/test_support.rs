//! Fakes and fixtures for unit tests across the engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{BotEvent, BotSettings, Reconciler};
use crate::analysis::{Analysis, Summarizer, TaskAssigner};
use crate::db::{Database, MeetingRepository};
use crate::gateway::{
    BotDetails, BotGateway, BotPage, CalendarEvent, CalendarEventDraft, CalendarGateway,
    CreateBotRequest, GatewayError, RegisterCalendar, RegisteredCalendar, ScheduleBotRequest,
};
use crate::meeting::{
    AssignedTask, BotState, CalendarIntegration, CalendarProvider, Meeting, MeetingStatus,
    NewMeeting, ProcessingStatus, TranscriptSegment, TranscriptWord,
};

pub(crate) const MEETING_URL: &str = "https://meet.google.com/abc-defg-hij";

#[derive(Default)]
pub(crate) struct FakeBots {
    calls: Mutex<Vec<String>>,
    created: Mutex<usize>,
    details: Mutex<HashMap<String, BotDetails>>,
    schedule_error: Mutex<Option<GatewayError>>,
    unschedule_error: Mutex<Option<GatewayError>>,
    get_error: Mutex<HashMap<String, GatewayError>>,
    event_errors: Mutex<HashMap<String, GatewayError>>,
    stalled: Mutex<Vec<String>>,
}

impl FakeBots {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn set_details(&self, bot_id: &str, details: BotDetails) {
        self.details
            .lock()
            .unwrap()
            .insert(bot_id.to_string(), details);
    }

    pub(crate) fn fail_schedule(&self, err: GatewayError) {
        *self.schedule_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_unschedule(&self, err: GatewayError) {
        *self.unschedule_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_get(&self, bot_id: &str, err: GatewayError) {
        self.get_error
            .lock()
            .unwrap()
            .insert(bot_id.to_string(), err);
    }

    pub(crate) fn fail_schedule_for(&self, event_uuid: &str, err: GatewayError) {
        self.event_errors
            .lock()
            .unwrap()
            .insert(event_uuid.to_string(), err);
    }

    pub(crate) fn clear_failures(&self) {
        self.event_errors.lock().unwrap().clear();
        *self.schedule_error.lock().unwrap() = None;
        *self.unschedule_error.lock().unwrap() = None;
    }

    /// `get_bot` for this bot never answers in time.
    pub(crate) fn stall_get(&self, bot_id: &str) {
        self.stalled.lock().unwrap().push(bot_id.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_id(&self) -> usize {
        let mut created = self.created.lock().unwrap();
        *created += 1;
        *created
    }
}

#[async_trait]
impl BotGateway for FakeBots {
    async fn create_bot(&self, request: &CreateBotRequest) -> Result<String, GatewayError> {
        self.record(format!("create_bot:{}", request.deduplication_key));
        Ok(format!("bot-direct-{}", self.next_id()))
    }

    async fn end_bot(&self, bot_id: &str) -> Result<(), GatewayError> {
        self.record(format!("end_bot:{bot_id}"));
        Ok(())
    }

    async fn get_bot(&self, bot_id: &str) -> Result<BotDetails, GatewayError> {
        self.record(format!("get_bot:{bot_id}"));
        let stalled = self.stalled.lock().unwrap().iter().any(|id| id == bot_id);
        if stalled {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
        if let Some(err) = self.get_error.lock().unwrap().get(bot_id) {
            return Err(err.clone());
        }
        self.details
            .lock()
            .unwrap()
            .get(bot_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(bot_id.to_string()))
    }

    async fn list_bots(&self, _cursor: Option<&str>) -> Result<BotPage, GatewayError> {
        self.record("list_bots".to_string());
        Ok(BotPage::default())
    }

    async fn schedule_for_event(
        &self,
        event_uuid: &str,
        _request: &ScheduleBotRequest,
    ) -> Result<String, GatewayError> {
        self.record(format!("schedule:{event_uuid}"));
        if let Some(err) = self.schedule_error.lock().unwrap().clone() {
            return Err(err);
        }
        if let Some(err) = self.event_errors.lock().unwrap().get(event_uuid).cloned() {
            return Err(err);
        }
        Ok(format!("bot-{event_uuid}-{}", self.next_id()))
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
pub(crate) struct FakeCalendars {
    calls: Mutex<Vec<String>>,
    created: Mutex<usize>,
    events: Mutex<HashMap<String, Vec<CalendarEvent>>>,
    list_errors: Mutex<HashMap<String, GatewayError>>,
    token_error: Mutex<Option<GatewayError>>,
    delete_error: Mutex<Option<GatewayError>>,
}

impl FakeCalendars {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn set_events(&self, calendar_id: &str, events: Vec<CalendarEvent>) {
        self.events
            .lock()
            .unwrap()
            .insert(calendar_id.to_string(), events);
    }

    pub(crate) fn fail_list(&self, calendar_id: &str, err: GatewayError) {
        self.list_errors
            .lock()
            .unwrap()
            .insert(calendar_id.to_string(), err);
    }

    pub(crate) fn fail_token(&self, err: GatewayError) {
        *self.token_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_delete(&self, err: GatewayError) {
        *self.delete_error.lock().unwrap() = Some(err);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl CalendarGateway for FakeCalendars {
    async fn access_token(
        &self,
        provider: CalendarProvider,
        _refresh_token: &str,
    ) -> Result<String, GatewayError> {
        self.record(format!("access_token:{provider}"));
        match self.token_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok("access-token".to_string()),
        }
    }

    async fn register_calendar(
        &self,
        request: &RegisterCalendar,
    ) -> Result<RegisteredCalendar, GatewayError> {
        self.record(format!("register:{}", request.provider));
        let mut created = self.created.lock().unwrap();
        *created += 1;
        Ok(RegisteredCalendar {
            uuid: format!("cal-{created}"),
            raw_calendar_id: request.raw_calendar_id.clone(),
        })
    }

    async fn remove_calendar(&self, calendar_id: &str) -> Result<(), GatewayError> {
        self.record(format!("remove_calendar:{calendar_id}"));
        match self.delete_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, GatewayError> {
        self.record(format!("list_events:{calendar_id}"));
        if let Some(err) = self.list_errors.lock().unwrap().get(calendar_id) {
            return Err(err.clone());
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(calendar_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_event(&self, event_uuid: &str) -> Result<CalendarEvent, GatewayError> {
        self.record(format!("get_event:{event_uuid}"));
        self.events
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|e| e.uuid == event_uuid)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(event_uuid.to_string()))
    }

    async fn create_event(
        &self,
        integration: &CalendarIntegration,
        draft: &CalendarEventDraft,
    ) -> Result<String, GatewayError> {
        self.access_token(integration.provider, &integration.refresh_token)
            .await?;
        self.record(format!("create_event:{}", draft.title));
        let mut created = self.created.lock().unwrap();
        *created += 1;
        Ok(format!("raw-{created}"))
    }

    async fn update_event(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: &str,
        _draft: &CalendarEventDraft,
    ) -> Result<(), GatewayError> {
        self.access_token(integration.provider, &integration.refresh_token)
            .await?;
        self.record(format!("update_event:{raw_event_id}"));
        Ok(())
    }

    async fn delete_event(
        &self,
        integration: &CalendarIntegration,
        raw_event_id: &str,
    ) -> Result<(), GatewayError> {
        self.access_token(integration.provider, &integration.refresh_token)
            .await?;
        self.record(format!("delete_event:{raw_event_id}"));
        match self.delete_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub(crate) struct FakeSummarizer {
    result: Result<Analysis, String>,
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn analyze(&self, _transcript: &str) -> anyhow::Result<Analysis> {
        self.result.clone().map_err(|e| anyhow!(e))
    }
}

pub(crate) struct FakeAssigner {
    fail: bool,
}

#[async_trait]
impl TaskAssigner for FakeAssigner {
    async fn assign(
        &self,
        tasks: &[String],
        _manager_id: &str,
        member_id: &str,
    ) -> anyhow::Result<Vec<AssignedTask>> {
        if self.fail {
            anyhow::bail!("assigner offline");
        }
        Ok(tasks
            .iter()
            .map(|text| AssignedTask {
                text: text.clone(),
                assigned_to: Some(member_id.to_string()),
                reasoning: Some("owns the follow-up".to_string()),
            })
            .collect())
    }
}

pub(crate) struct Harness {
    pub db: Database,
    pub bots: Arc<FakeBots>,
    pub calendars: Arc<FakeCalendars>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::build(None, false)
    }

    pub(crate) fn with_analysis(result: Result<Analysis, String>) -> Self {
        Self::build(Some(result), false)
    }

    pub(crate) fn with_failing_assigner(result: Result<Analysis, String>) -> Self {
        Self::build(Some(result), true)
    }

    fn build(analysis: Option<Result<Analysis, String>>, assigner_fails: bool) -> Self {
        let db = Database::open_in_memory().unwrap();
        let bots = Arc::new(FakeBots::default());
        let calendars = Arc::new(FakeCalendars::default());
        let settings = BotSettings {
            bot_name: "Notetaker".to_string(),
            webhook_url: None,
        };

        let mut reconciler = Reconciler::new(db.clone(), bots.clone(), calendars.clone(), settings);
        if let Some(result) = analysis {
            reconciler = reconciler.with_analysis(
                Arc::new(FakeSummarizer { result }),
                Some(Arc::new(FakeAssigner {
                    fail: assigner_fails,
                })),
            );
        }

        Self {
            db,
            bots,
            calendars,
            reconciler: Arc::new(reconciler),
        }
    }

    pub(crate) async fn insert(&self, meeting: NewMeeting) -> i64 {
        self.db
            .call(move |conn| MeetingRepository::insert(conn, &meeting))
            .await
            .unwrap()
    }

    pub(crate) async fn meeting(&self, id: i64) -> Meeting {
        self.db
            .call(move |conn| MeetingRepository::get(conn, id))
            .await
            .unwrap()
            .unwrap()
    }

    pub(crate) async fn all_meetings(&self) -> Vec<Meeting> {
        self.db
            .call(|conn| MeetingRepository::list(conn, 100))
            .await
            .unwrap()
    }

    pub(crate) async fn update(&self, meeting: Meeting) {
        self.db
            .call(move |conn| MeetingRepository::save(conn, &meeting))
            .await
            .unwrap();
    }

    /// Upcoming meeting with a URL, optionally linked to a calendar event.
    pub(crate) async fn upcoming_meeting(&self, calendar_event_id: Option<&str>) -> i64 {
        self.insert(NewMeeting {
            calendar_event_id: calendar_event_id.map(str::to_string),
            ..new_meeting("user-1", "Weekly 1:1", in_minutes(60))
        })
        .await
    }

    pub(crate) async fn meeting_with_bot(&self, bot_id: &str, state: BotState) -> i64 {
        let id = self.upcoming_meeting(None).await;
        let mut meeting = self.meeting(id).await;
        meeting.meeting_baas_id = Some(bot_id.to_string());
        meeting.bot_state = state;
        self.update(meeting).await;
        id
    }

    pub(crate) async fn meeting_for_event(&self, event: &CalendarEvent) -> i64 {
        self.meeting_with_event_id(event, &event.uuid).await
    }

    pub(crate) async fn meeting_with_event_id(&self, event: &CalendarEvent, event_id: &str) -> i64 {
        self.insert(NewMeeting {
            calendar_event_id: Some(event_id.to_string()),
            duration_minutes: event.duration_minutes(),
            platform_meeting_url: event.meeting_url.clone(),
            ..new_meeting("user-1", &event.title, event.start_time)
        })
        .await
    }

    pub(crate) async fn unlinked_meeting(&self, user_id: &str, event: &CalendarEvent) -> i64 {
        self.insert(NewMeeting {
            duration_minutes: event.duration_minutes(),
            platform_meeting_url: event.meeting_url.clone(),
            ..new_meeting(user_id, &event.title, event.start_time)
        })
        .await
    }
}

/// Now plus `minutes`, truncated to the millisecond precision rows store.
pub(crate) fn in_minutes(minutes: i64) -> DateTime<Utc> {
    let at = Utc::now() + Duration::minutes(minutes);
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap()
}

pub(crate) fn new_meeting(user_id: &str, title: &str, date: DateTime<Utc>) -> NewMeeting {
    NewMeeting {
        user_id: user_id.to_string(),
        member_id: Some("member-1".to_string()),
        title: title.to_string(),
        date,
        duration_minutes: 30,
        calendar_event_id: None,
        platform_meeting_url: Some(MEETING_URL.to_string()),
    }
}

pub(crate) fn upcoming_event(uuid: &str, minutes_from_now: i64) -> CalendarEvent {
    CalendarEvent {
        uuid: uuid.to_string(),
        calendar_id: Some("cal-1".to_string()),
        raw_event_id: None,
        title: "Weekly 1:1".to_string(),
        start_time: in_minutes(minutes_from_now),
        end_time: None,
        duration: Some(30),
        meeting_url: Some(MEETING_URL.to_string()),
        deleted: false,
        bot_id: None,
        last_updated_at: None,
    }
}

pub(crate) fn sample_meeting() -> Meeting {
    Meeting {
        id: 1,
        user_id: "user-1".to_string(),
        member_id: None,
        title: "Weekly 1:1".to_string(),
        date: in_minutes(60),
        duration_minutes: 30,
        status: MeetingStatus::Scheduled,
        bot_state: BotState::Unscheduled,
        processing_status: ProcessingStatus::Pending,
        calendar_event_id: None,
        meeting_baas_id: None,
        platform: Some("google_meet".to_string()),
        platform_meeting_url: Some(MEETING_URL.to_string()),
        recording_url: None,
        transcript: None,
        summary: None,
        wins: Vec::new(),
        areas_for_support: Vec::new(),
        tasks: Vec::new(),
        last_synced_at: None,
        version: 1,
        created_at: Utc::now(),
    }
}

pub(crate) fn segment(speaker: &str, text: &str) -> TranscriptSegment {
    TranscriptSegment {
        speaker: Some(speaker.to_string()),
        words: text
            .split_whitespace()
            .map(|w| TranscriptWord {
                word: w.to_string(),
            })
            .collect(),
    }
}

pub(crate) fn complete_event(bot_id: &str, with_payload: bool) -> BotEvent {
    if with_payload {
        BotEvent::Complete {
            bot_id: bot_id.to_string(),
            transcript: vec![segment("Ana", "Let us ship it")],
            recording_url: Some("https://cdn.example.com/1.mp4".to_string()),
        }
    } else {
        BotEvent::Complete {
            bot_id: bot_id.to_string(),
            transcript: Vec::new(),
            recording_url: None,
        }
    }
}

pub(crate) fn sample_details(bot_id: &str) -> BotDetails {
    BotDetails {
        bot_id: bot_id.to_string(),
        status: None,
        ended: true,
        transcript: vec![segment("Ben", "Pulled from provider")],
        recording_url: Some("https://cdn.example.com/pulled.mp4".to_string()),
    }
}

pub(crate) fn sample_analysis() -> Analysis {
    Analysis {
        summary: "Weekly sync".to_string(),
        wins: vec!["Shipped onboarding".to_string()],
        areas_for_support: vec!["Hiring".to_string()],
        tasks: vec!["Send recap".to_string()],
    }
}
