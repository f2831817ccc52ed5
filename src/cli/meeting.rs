use anyhow::{anyhow, Result};

use super::{parse_time, MeetingCliArgs, MeetingCommand};
use crate::app::App;
use crate::db::MeetingChangeRepository;
use crate::gateway::CleanupOutcome;
use crate::meeting::Meeting;
use crate::service::ScheduleMeeting;

pub async fn handle_meeting_command(app: &App, args: MeetingCliArgs) -> Result<()> {
    let meetings = app.meetings();

    match args.command {
        MeetingCommand::List { limit } => {
            let list = meetings.list(limit).await?;
            if list.is_empty() {
                println!("No meetings found.");
                return Ok(());
            }
            for meeting in list {
                println!(
                    "#{:<5} {}  {:<12} {:<12} {}",
                    meeting.id,
                    meeting.date.format("%Y-%m-%d %H:%M"),
                    meeting.status,
                    meeting.bot_state,
                    meeting.title
                );
            }
        }
        MeetingCommand::Show { id } => {
            let meeting = meetings
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("Meeting {} not found", id))?;
            print_meeting(&meeting);

            let changes = app
                .db
                .call(move |conn| MeetingChangeRepository::list_for_meeting(conn, id))
                .await?;
            if !changes.is_empty() {
                println!("\nChanges:");
                for change in changes {
                    println!(
                        "  {}  {:<8} {}",
                        change.created_at.format("%Y-%m-%d %H:%M:%S"),
                        change.change_type.as_str(),
                        change.new.title.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        MeetingCommand::Schedule(args) => {
            let meeting = meetings
                .schedule_meeting(ScheduleMeeting {
                    user_id: args.user,
                    member_id: args.member,
                    provider: args.provider.into(),
                    title: args.title,
                    start: parse_time(&args.start)?,
                    duration_minutes: args.duration,
                    meeting_url: args.url,
                    description: args.description,
                })
                .await?;
            println!("Scheduled meeting #{}", meeting.id);
            print_meeting(&meeting);
        }
        MeetingCommand::Reschedule {
            id,
            start,
            duration,
        } => {
            let meeting = meetings.reschedule(id, parse_time(&start)?, duration).await?;
            println!("Rescheduled meeting #{}", meeting.id);
            print_meeting(&meeting);
        }
        MeetingCommand::Delete { id } => {
            let outcomes = meetings.delete_meeting(id).await?;
            println!("Deleted meeting #{id}");
            for outcome in outcomes {
                if let CleanupOutcome::Warning(message) = outcome {
                    println!("  warning: {message}");
                }
            }
        }
    }

    Ok(())
}

fn print_meeting(meeting: &Meeting) {
    println!("ID:          {}", meeting.id);
    println!("Title:       {}", meeting.title);
    println!("When:        {} ({} min)", meeting.date.to_rfc3339(), meeting.duration_minutes);
    println!("Status:      {}", meeting.status);
    println!("Bot:         {} {}", meeting.bot_state, meeting.meeting_baas_id.as_deref().unwrap_or(""));
    println!("Processing:  {}", meeting.processing_status.as_str());
    if let Some(event_id) = &meeting.calendar_event_id {
        println!("Event:       {event_id}");
    }
    if let Some(url) = &meeting.recording_url {
        println!("Recording:   {url}");
    }
    if let Some(summary) = &meeting.summary {
        println!("Summary:     {summary}");
    }
}
