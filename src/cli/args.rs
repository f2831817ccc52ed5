use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};

use crate::meeting::CalendarProvider;

#[derive(Parser, Debug)]
#[command(name = "meetsync")]
#[command(about = "Keeps meetings, recording bots and calendars in sync", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the webhook server and periodic sync tasks (default)
    Serve,
    /// Run one periodic task once and exit
    Sync(SyncCliArgs),
    /// Inspect, schedule or delete meetings
    Meeting(MeetingCliArgs),
    /// Connect or disconnect calendar integrations
    Integration(IntegrationCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct SyncCliArgs {
    #[command(subcommand)]
    pub task: SyncTask,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum SyncTask {
    /// Pull bot status for every meeting with a live bot
    Bots,
    /// Pull changed events from every active calendar
    Calendars,
    /// Place bots for upcoming meetings that have none
    AutoSchedule,
    /// Finish transcript analysis left unfinished
    Analysis,
    /// Drop expired idempotency keys
    Purge,
}

#[derive(ClapArgs, Debug)]
pub struct MeetingCliArgs {
    #[command(subcommand)]
    pub command: MeetingCommand,
}

#[derive(Subcommand, Debug)]
pub enum MeetingCommand {
    /// List meetings, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show one meeting and its change history
    Show { id: i64 },
    /// Create a calendar event and schedule a bot for it
    Schedule(ScheduleCliArgs),
    /// Move a meeting to a new time
    Reschedule {
        id: i64,
        /// New start time (RFC 3339, e.g. 2024-05-01T15:00:00Z)
        #[arg(long)]
        start: String,
        #[arg(long, default_value = "30")]
        duration: i64,
    },
    /// Delete a meeting, its bot and its calendar event
    Delete { id: i64 },
}

#[derive(ClapArgs, Debug)]
pub struct ScheduleCliArgs {
    #[arg(long)]
    pub user: String,
    #[arg(long)]
    pub member: Option<String>,
    #[arg(long, value_enum, default_value = "google")]
    pub provider: ProviderArg,
    #[arg(long)]
    pub title: String,
    /// Start time (RFC 3339, e.g. 2024-05-01T15:00:00Z)
    #[arg(long)]
    pub start: String,
    /// Duration in minutes
    #[arg(long, default_value = "30")]
    pub duration: i64,
    #[arg(long)]
    pub url: String,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct IntegrationCliArgs {
    #[command(subcommand)]
    pub command: IntegrationCommand,
}

#[derive(Subcommand, Debug)]
pub enum IntegrationCommand {
    /// Register a calendar and make it the user's active integration
    Connect {
        #[arg(long)]
        user: String,
        #[arg(long, value_enum)]
        provider: ProviderArg,
        #[arg(long)]
        refresh_token: String,
        /// Calendar to sync (defaults to the primary calendar)
        #[arg(long)]
        calendar: Option<String>,
    },
    /// Stop syncing a calendar, leaving it registered at the provider
    Disconnect {
        #[arg(long)]
        user: String,
        #[arg(long, value_enum)]
        provider: ProviderArg,
    },
    /// Remove the calendar at the provider and stop syncing it
    Cleanup {
        #[arg(long)]
        user: String,
        #[arg(long, value_enum)]
        provider: ProviderArg,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ProviderArg {
    Google,
    Microsoft,
}

impl From<ProviderArg> for CalendarProvider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Google => CalendarProvider::Google,
            ProviderArg::Microsoft => CalendarProvider::Microsoft,
        }
    }
}
