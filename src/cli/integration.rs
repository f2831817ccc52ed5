use anyhow::Result;

use super::{IntegrationCliArgs, IntegrationCommand};
use crate::app::App;
use crate::gateway::CleanupOutcome;
use crate::meeting::CalendarProvider;

pub async fn handle_integration_command(app: &App, args: IntegrationCliArgs) -> Result<()> {
    let integrations = app.integrations();

    match args.command {
        IntegrationCommand::Connect {
            user,
            provider,
            refresh_token,
            calendar,
        } => {
            let integration = integrations
                .connect(&user, provider.into(), &refresh_token, calendar.as_deref())
                .await?;
            println!(
                "Connected {} calendar {} for {} (integration #{})",
                integration.provider, integration.raw_calendar_id, user, integration.id
            );
        }
        IntegrationCommand::Disconnect { user, provider } => {
            let provider = CalendarProvider::from(provider);
            if integrations.disconnect(&user, provider).await? {
                println!("Disconnected {provider} calendar for {user}");
            } else {
                println!("No active {provider} calendar for {user}");
            }
        }
        IntegrationCommand::Cleanup { user, provider } => {
            let provider = CalendarProvider::from(provider);
            match integrations.cleanup(&user, provider).await? {
                None => println!("No active {provider} calendar for {user}"),
                Some(CleanupOutcome::Warning(message)) => {
                    println!("Deactivated {provider} calendar for {user}");
                    println!("  warning: {message}");
                }
                Some(_) => println!("Removed {provider} calendar for {user}"),
            }
        }
    }

    Ok(())
}
