//! Meeting domain model.
//!
//! Records persisted by the engine (meetings, their audit trail, calendar
//! integrations) and the bot lifecycle state machine that governs them.

pub mod model;
pub mod status;
pub mod transcript;

pub use model::{
    detect_platform, AssignedTask, CalendarIntegration, ChangeType, Meeting, MeetingChange,
    MeetingSnapshot, NewMeeting, NewMeetingChange,
};
pub use status::{BotState, BotStatusCode, CalendarProvider, MeetingStatus, ProcessingStatus};
pub use transcript::{render_transcript, TranscriptSegment, TranscriptWord};
