use anyhow::Result;

use super::{SyncCliArgs, SyncTask};
use crate::app::App;
use crate::scheduler::BatchReport;

pub async fn handle_sync_command(app: &App, args: SyncCliArgs) -> Result<()> {
    let scheduler = app.scheduler();
    match args.task {
        SyncTask::Bots => print_report("Bot sync", scheduler.sync_bots().await?),
        SyncTask::Calendars => print_report("Calendar sync", scheduler.sync_calendars().await?),
        SyncTask::AutoSchedule => print_report("Auto-schedule", scheduler.auto_schedule().await?),
        SyncTask::Analysis => print_report("Analysis retry", scheduler.resume_analysis().await?),
        SyncTask::Purge => {
            let removed = scheduler.purge().await?;
            println!("Purged {removed} expired idempotency key(s)");
        }
    }
    Ok(())
}

fn print_report(task: &str, report: BatchReport) {
    println!(
        "{task}: {} applied, {} unchanged, {} failed",
        report.applied, report.unchanged, report.failed
    );
    if report.failed > 0 {
        println!("Failed items are retried on the next run; see the log for details.");
    }
}
