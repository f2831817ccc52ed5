//! User-initiated flows: calendar integration setup and teardown, and
//! meetings created or removed from this system rather than discovered in
//! a calendar.

pub mod integrations;
pub mod meetings;

pub use integrations::IntegrationService;
pub use meetings::{MeetingService, ScheduleMeeting};
