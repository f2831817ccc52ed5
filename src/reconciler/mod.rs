//! The reconciliation engine.
//!
//! Given a bot event or a calendar change, decide how the internal
//! [`Meeting`] and its bot lifecycle must move, persist the result, and issue
//! the gateway calls that keep the provider side in line. Webhooks and
//! scheduler polls both come through here, so repeated or out-of-order input
//! converges instead of oscillating.
//!
//! Transitions on one meeting are serialised by [`MeetingLocks`] inside the
//! process and by the row `version` across processes. A lost version race is
//! retried a few times from a fresh read.

mod bot;
mod calendar;
pub mod locks;
mod schedule;

use std::future::Future;
use std::sync::Arc;

use tracing::debug;

use crate::analysis::{Summarizer, TaskAssigner};
use crate::db::{Database, MeetingRepository, StaleMeeting};
use crate::gateway::{BotGateway, CalendarEvent, CalendarGateway, GatewayError};
use crate::meeting::{BotStatusCode, Meeting, NewMeetingChange, TranscriptSegment};

pub use locks::{InFlight, MeetingLocks};

const MAX_CONFLICT_RETRIES: usize = 3;

/// Bot activity reported by webhook or observed by polling.
#[derive(Debug, Clone, PartialEq)]
pub enum BotEvent {
    StatusChange {
        bot_id: String,
        code: BotStatusCode,
    },
    /// The recording is finished. Empty artifacts are pulled from the provider.
    Complete {
        bot_id: String,
        transcript: Vec<TranscriptSegment>,
        recording_url: Option<String>,
    },
    Failed {
        bot_id: String,
        code: Option<BotStatusCode>,
    },
}

impl BotEvent {
    pub fn bot_id(&self) -> &str {
        match self {
            Self::StatusChange { bot_id, .. }
            | Self::Complete { bot_id, .. }
            | Self::Failed { bot_id, .. } => bot_id,
        }
    }
}

/// A calendar event as last seen at the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum CalendarChange {
    Upsert(CalendarEvent),
    Deleted {
        event_uuid: String,
        raw_event_id: Option<String>,
    },
}

impl CalendarChange {
    pub fn event_uuid(&self) -> &str {
        match self {
            Self::Upsert(event) => &event.uuid,
            Self::Deleted { event_uuid, .. } => event_uuid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The meeting record changed.
    Applied,
    /// Matched a meeting but nothing differed.
    Unchanged,
    /// No meeting corresponds to the event; it was logged and dropped.
    Unmatched,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("meeting {0} kept changing concurrently")]
    Conflict(i64),
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl ReconcileError {
    /// Whether the input was not applied for infrastructure reasons and
    /// should be delivered again.
    pub fn needs_redelivery(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Conflict(_))
    }
}

impl From<anyhow::Error> for ReconcileError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<StaleMeeting>() {
            Some(stale) => Self::Conflict(stale.0),
            None => Self::Storage(err),
        }
    }
}

/// Values stamped onto every bot the engine schedules.
#[derive(Debug, Clone, Default)]
pub struct BotSettings {
    pub bot_name: String,
    pub webhook_url: Option<String>,
}

pub struct Reconciler {
    db: Database,
    bots: Arc<dyn BotGateway>,
    calendars: Arc<dyn CalendarGateway>,
    summarizer: Option<Arc<dyn Summarizer>>,
    assigner: Option<Arc<dyn TaskAssigner>>,
    settings: BotSettings,
    locks: MeetingLocks,
    analyzing: InFlight,
}

impl Reconciler {
    pub fn new(
        db: Database,
        bots: Arc<dyn BotGateway>,
        calendars: Arc<dyn CalendarGateway>,
        settings: BotSettings,
    ) -> Self {
        Self {
            db,
            bots,
            calendars,
            summarizer: None,
            assigner: None,
            settings,
            locks: MeetingLocks::default(),
            analyzing: InFlight::default(),
        }
    }

    pub fn with_analysis(
        mut self,
        summarizer: Arc<dyn Summarizer>,
        assigner: Option<Arc<dyn TaskAssigner>>,
    ) -> Self {
        self.summarizer = Some(summarizer);
        self.assigner = assigner;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn bots(&self) -> &Arc<dyn BotGateway> {
        &self.bots
    }

    pub fn calendars(&self) -> &Arc<dyn CalendarGateway> {
        &self.calendars
    }

    pub fn locks(&self) -> &MeetingLocks {
        &self.locks
    }

    /// Re-run `op` from a fresh read when it loses a version race.
    async fn retrying<T, F, Fut>(&self, mut op: F) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReconcileError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(ReconcileError::Conflict(meeting_id)) if attempt < MAX_CONFLICT_RETRIES => {
                    debug!(meeting_id, attempt, "Version conflict, retrying transition");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn load(&self, meeting_id: i64) -> Result<Option<Meeting>, ReconcileError> {
        Ok(self
            .db
            .call(move |conn| MeetingRepository::get(conn, meeting_id))
            .await?)
    }

    async fn find_by_bot(&self, bot_id: &str) -> Result<Option<Meeting>, ReconcileError> {
        let bot_id = bot_id.to_string();
        Ok(self
            .db
            .call(move |conn| MeetingRepository::find_by_bot_id(conn, &bot_id))
            .await?)
    }

    async fn find_by_event(&self, event_id: &str) -> Result<Option<Meeting>, ReconcileError> {
        let event_id = event_id.to_string();
        Ok(self
            .db
            .call(move |conn| MeetingRepository::find_by_calendar_event_id(conn, &event_id))
            .await?)
    }

    /// Compare-and-swap save. Returns the meeting at its new version.
    async fn save(&self, mut meeting: Meeting) -> Result<Meeting, ReconcileError> {
        let row = meeting.clone();
        meeting.version = self
            .db
            .call(move |conn| MeetingRepository::save(conn, &row))
            .await?;
        Ok(meeting)
    }

    async fn save_with_change(
        &self,
        mut meeting: Meeting,
        change: NewMeetingChange,
    ) -> Result<Meeting, ReconcileError> {
        let row = meeting.clone();
        meeting.version = self
            .db
            .call(move |conn| MeetingRepository::save_with_change(conn, &row, &change))
            .await?;
        Ok(meeting)
    }

    #[cfg(test)]
    async fn change_count(&self, meeting_id: i64) -> i64 {
        self.db
            .call(move |conn| crate::db::MeetingChangeRepository::count_for_meeting(conn, meeting_id))
            .await
            .unwrap()
    }
}

#[cfg(test)]
pub(crate) mod test_support;
