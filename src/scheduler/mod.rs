//! Periodic reconciliation tasks.
//!
//! Each task is independent, idempotent, and safe to run alongside webhook
//! processing. Items inside a batch are isolated from one another: a failure
//! or timeout on one is logged and the batch moves on.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::db::{IntegrationRepository, MeetingRepository};
use crate::gateway::GatewayError;
use crate::idempotency::IdempotencyStore;
use crate::meeting::{BotState, BotStatusCode, CalendarIntegration, Meeting};
use crate::reconciler::{BotEvent, CalendarChange, Outcome, ReconcileError, Reconciler};

/// Tally of one task run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Items that changed a meeting.
    pub applied: usize,
    /// Items seen but already up to date, duplicates, or unmatched.
    pub unchanged: usize,
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::Unchanged | Outcome::Unmatched => self.unchanged += 1,
        }
    }

    fn merge(&mut self, other: BatchReport) {
        self.applied += other.applied;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
    }
}

pub struct Scheduler {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn IdempotencyStore>,
    config: SchedulerConfig,
    item_timeout: Duration,
}

impl Scheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn IdempotencyStore>,
        config: SchedulerConfig,
    ) -> Self {
        let item_timeout = config.item_timeout();
        Self {
            reconciler,
            store,
            config,
            item_timeout,
        }
    }

    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    /// Start every periodic task. They stop when `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(spawn_periodic(
            "bot_sync",
            self.config.bot_sync_interval(),
            shutdown.clone(),
            move || {
                let scheduler = scheduler.clone();
                async move { log_run("bot_sync", scheduler.sync_bots().await) }
            },
        ));

        let scheduler = self.clone();
        handles.push(spawn_periodic(
            "calendar_sync",
            self.config.calendar_sync_interval(),
            shutdown.clone(),
            move || {
                let scheduler = scheduler.clone();
                async move { log_run("calendar_sync", scheduler.sync_calendars().await) }
            },
        ));

        if self.config.auto_schedule_enabled {
            let scheduler = self.clone();
            handles.push(spawn_periodic(
                "auto_schedule",
                self.config.auto_schedule_interval(),
                shutdown.clone(),
                move || {
                    let scheduler = scheduler.clone();
                    async move { log_run("auto_schedule", scheduler.auto_schedule().await) }
                },
            ));
        } else {
            info!("Auto-scheduling disabled");
        }

        let scheduler = self.clone();
        handles.push(spawn_periodic(
            "analysis_retry",
            self.config.analysis_retry_interval(),
            shutdown.clone(),
            move || {
                let scheduler = scheduler.clone();
                async move { log_run("analysis_retry", scheduler.resume_analysis().await) }
            },
        ));

        let scheduler = self.clone();
        handles.push(spawn_periodic(
            "idempotency_purge",
            self.config.purge_interval(),
            shutdown,
            move || {
                let scheduler = scheduler.clone();
                async move {
                    match scheduler.purge().await {
                        Ok(removed) => debug!(removed, "Idempotency purge finished"),
                        Err(err) => error!("Idempotency purge failed: {:#}", err),
                    }
                }
            },
        ));

        handles
    }

    /// Pull the provider status of every live bot and reconcile it.
    pub async fn sync_bots(&self) -> Result<BatchReport> {
        let meetings = self
            .reconciler
            .database()
            .call(MeetingRepository::list_with_active_bots)
            .await?;

        let mut report = BatchReport::default();
        for meeting in meetings {
            let Some(bot_id) = meeting.meeting_baas_id.clone() else {
                continue;
            };
            match timeout(self.item_timeout, self.sync_bot(&meeting, &bot_id)).await {
                Ok(Ok(outcome)) => report.record(outcome),
                Ok(Err(err)) => {
                    error!(meeting_id = meeting.id, bot_id = %bot_id, "Bot sync failed: {}", err);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(meeting_id = meeting.id, bot_id = %bot_id, "Bot sync timed out, skipping");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    async fn sync_bot(&self, meeting: &Meeting, bot_id: &str) -> Result<Outcome, ReconcileError> {
        let details = match self.reconciler.bots().get_bot(bot_id).await {
            Ok(details) => details,
            Err(err) if err.is_not_found() => {
                debug!(meeting_id = meeting.id, bot_id, "Provider has no data for bot yet");
                return Ok(Outcome::Unchanged);
            }
            Err(err) => return Err(err.into()),
        };

        let Some(code) = details.effective_status() else {
            return Ok(Outcome::Unchanged);
        };
        let event = if details.ended || code == BotStatusCode::Done {
            BotEvent::Complete {
                bot_id: bot_id.to_string(),
                transcript: details.transcript,
                recording_url: details.recording_url,
            }
        } else if code.bot_state() == Some(BotState::Failed) {
            BotEvent::Failed {
                bot_id: bot_id.to_string(),
                code: Some(code),
            }
        } else {
            BotEvent::StatusChange {
                bot_id: bot_id.to_string(),
                code,
            }
        };
        self.reconciler.handle_bot_event(&event).await
    }

    /// Pull changed events for every active integration.
    pub async fn sync_calendars(&self) -> Result<BatchReport> {
        let integrations = self
            .reconciler
            .database()
            .call(IntegrationRepository::list_active)
            .await?;

        let mut report = BatchReport::default();
        for integration in integrations {
            report.merge(self.sync_integration(&integration).await);
        }
        Ok(report)
    }

    async fn sync_integration(&self, integration: &CalendarIntegration) -> BatchReport {
        let mut report = BatchReport::default();
        let batch_started = Utc::now();

        if !self.refresh_token_valid(integration).await {
            report.failed += 1;
            return report;
        }

        let listed = timeout(
            self.item_timeout,
            self.reconciler
                .calendars()
                .list_events(&integration.calendar_id, integration.last_synced_at),
        )
        .await;
        let events = match listed {
            Ok(Ok(events)) => events,
            Ok(Err(err)) => {
                error!(integration_id = integration.id, "Listing calendar events failed: {}", err);
                report.failed += 1;
                return report;
            }
            Err(_) => {
                warn!(integration_id = integration.id, "Listing calendar events timed out");
                report.failed += 1;
                return report;
            }
        };

        for event in events {
            let event_id = event.uuid.clone();
            let change = CalendarChange::Upsert(event);
            let result = timeout(
                self.item_timeout,
                self.reconciler
                    .handle_calendar_change(&change, Some(&integration.user_id)),
            )
            .await;

            let failure = match result {
                Ok(Ok(outcome)) => {
                    report.record(outcome);
                    None
                }
                Ok(Err(err)) => Some(err.to_string()),
                Err(_) => Some("timed out".to_string()),
            };
            if let Some(reason) = failure {
                error!(event_id = %event_id, integration_id = integration.id, "Calendar event sync failed: {}", reason);
                report.failed += 1;
            }
        }

        if report.failed == 0 {
            let id = integration.id;
            let touched = self
                .reconciler
                .database()
                .call(move |conn| IntegrationRepository::touch_last_synced(conn, id, batch_started))
                .await;
            if let Err(err) = touched {
                error!(integration_id = id, "Could not record calendar sync time: {:#}", err);
                report.failed += 1;
            }
        }
        debug!(integration_id = integration.id, ?report, "Calendar sync finished");
        report
    }

    /// Revoked or expired refresh tokens deactivate the integration instead
    /// of being retried forever. Other token failures do not block the sync.
    async fn refresh_token_valid(&self, integration: &CalendarIntegration) -> bool {
        let checked = timeout(
            self.item_timeout,
            self.reconciler
                .calendars()
                .access_token(integration.provider, &integration.refresh_token),
        )
        .await;

        match checked {
            Ok(Err(GatewayError::Unauthorized(reason))) => {
                warn!(integration_id = integration.id, user_id = %integration.user_id,
                    "Refresh token rejected, deactivating integration: {}", reason);
                let id = integration.id;
                if let Err(err) = self
                    .reconciler
                    .database()
                    .call(move |conn| IntegrationRepository::deactivate(conn, id))
                    .await
                {
                    error!(integration_id = id, "Could not deactivate integration: {:#}", err);
                }
                false
            }
            Ok(Err(err)) => {
                debug!(integration_id = integration.id, error = %err, "Token check failed, syncing anyway");
                true
            }
            Ok(Ok(_)) | Err(_) => true,
        }
    }

    /// Place bots for upcoming meetings that have none.
    pub async fn auto_schedule(&self) -> Result<BatchReport> {
        let now = Utc::now();
        let horizon = now + chrono::Duration::hours(self.config.auto_schedule_horizon_hours.max(0));
        let meetings = self
            .reconciler
            .database()
            .call(move |conn| MeetingRepository::list_unscheduled_between(conn, now, horizon))
            .await?;

        let mut report = BatchReport::default();
        for meeting in meetings {
            match timeout(self.item_timeout, self.reconciler.schedule_bot(meeting.id)).await {
                Ok(Ok(outcome)) => report.record(outcome),
                Ok(Err(err)) => {
                    error!(meeting_id = meeting.id, "Auto-schedule failed: {}", err);
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(meeting_id = meeting.id, "Auto-schedule timed out, skipping");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Finish analysis for completed recordings left in `processing`.
    pub async fn resume_analysis(&self) -> Result<BatchReport> {
        let meetings = self
            .reconciler
            .database()
            .call(MeetingRepository::list_pending_analysis)
            .await?;

        let mut report = BatchReport::default();
        for meeting in meetings {
            // Analysis is a slow remote call; it gets no per-item budget.
            match self.reconciler.resume_analysis(meeting.id).await {
                Ok(outcome) => report.record(outcome),
                Err(err) => {
                    error!(meeting_id = meeting.id, "Resuming analysis failed: {}", err);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    pub async fn purge(&self) -> Result<usize> {
        Ok(self.store.purge_expired().await?)
    }
}

fn log_run(task: &'static str, result: Result<BatchReport>) {
    match result {
        Ok(report) if report.failed > 0 => warn!(
            task,
            applied = report.applied,
            failed = report.failed,
            "Task finished with failures"
        ),
        Ok(report) => debug!(
            task,
            applied = report.applied,
            unchanged = report.unchanged,
            "Task finished"
        ),
        Err(err) => error!(task, "Task run failed: {:#}", err),
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, period_secs = period.as_secs(), "Starting periodic task");
        let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => run().await,
            }
        }
        info!(task = name, "Periodic task stopped");
    })
}
