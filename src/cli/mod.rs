//! Command-line surface for operators.

mod args;
pub mod integration;
pub mod meeting;
pub mod sync;

pub use args::{
    Cli, CliCommand, IntegrationCliArgs, IntegrationCommand, MeetingCliArgs, MeetingCommand,
    ProviderArg, ScheduleCliArgs, SyncCliArgs, SyncTask,
};
pub use integration::handle_integration_command;
pub use meeting::handle_meeting_command;
pub use sync::handle_sync_command;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid time '{value}', expected RFC 3339"))
}
