//! Process wiring. Every component is built here from the loaded config
//! and handed its collaborators explicitly.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::analysis::{HttpAnalysisClient, Summarizer, TaskAssigner};
use crate::api::{ApiServer, ApiState};
use crate::config::Config;
use crate::db::Database;
use crate::gateway::{HttpBotGateway, HttpCalendarGateway, HttpClient};
use crate::idempotency::{IdempotencyStore, SqliteIdempotencyStore};
use crate::reconciler::{BotSettings, Reconciler};
use crate::scheduler::Scheduler;
use crate::service::{IntegrationService, MeetingService};
use crate::webhook::{SignatureVerifier, WebhookReceiver};

pub struct App {
    pub config: Config,
    pub db: Database,
    pub reconciler: Arc<Reconciler>,
    pub store: Arc<dyn IdempotencyStore>,
}

impl App {
    pub fn build(config: Config) -> Result<Self> {
        let db_path = config.database_path()?;
        let db = Database::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;

        let http = HttpClient::from_config(&config.http).context("Failed to build HTTP client")?;
        let bots = Arc::new(HttpBotGateway::new(http.clone(), &config.provider));
        let calendars = Arc::new(HttpCalendarGateway::new(
            http.clone(),
            &config.provider,
            &config.calendar,
        ));
        let settings = BotSettings {
            bot_name: config.provider.bot_name.clone(),
            webhook_url: config.provider.webhook_url.clone(),
        };

        let mut reconciler = Reconciler::new(db.clone(), bots, calendars, settings);
        match HttpAnalysisClient::from_config(http, &config.analysis) {
            Some(client) => {
                let client = Arc::new(client);
                let summarizer: Arc<dyn Summarizer> = client.clone();
                let assigner: Arc<dyn TaskAssigner> = client;
                reconciler = reconciler.with_analysis(summarizer, Some(assigner));
            }
            None => info!("No analysis endpoint configured, transcripts will not be summarized"),
        }

        let store: Arc<dyn IdempotencyStore> = Arc::new(SqliteIdempotencyStore::new(db.clone()));

        Ok(Self {
            config,
            db,
            reconciler: Arc::new(reconciler),
            store,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.reconciler.clone(),
            self.store.clone(),
            self.config.scheduler.clone(),
        )
    }

    pub fn meetings(&self) -> MeetingService {
        MeetingService::new(self.reconciler.clone())
    }

    pub fn integrations(&self) -> IntegrationService {
        IntegrationService::new(self.db.clone(), self.reconciler.calendars().clone())
    }

    pub fn webhook_receiver(&self) -> Result<WebhookReceiver> {
        let verifier = if self.config.webhook.verify_signatures {
            if self.config.webhook.secret.is_empty() {
                bail!(
                    "Webhook signature verification is enabled but no secret is configured \
                     (set webhook.secret or MEETSYNC_WEBHOOK_SECRET)"
                );
            }
            Some(
                SignatureVerifier::new(&self.config.webhook.secret)
                    .context("Invalid webhook secret")?,
            )
        } else {
            warn!("Webhook signature verification is disabled");
            None
        };

        Ok(WebhookReceiver::new(
            self.reconciler.clone(),
            self.store.clone(),
            self.config.webhook.idempotency_ttl(),
            verifier,
        ))
    }
}

/// Run the webhook server and periodic tasks until Ctrl-C.
pub async fn run_service(config: Config) -> Result<()> {
    info!("Starting meetsync service");

    let addr: SocketAddr = config
        .webhook
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address '{}'", config.webhook.listen_addr))?;
    let app = App::build(config)?;
    let receiver = Arc::new(app.webhook_receiver()?);

    let shutdown = CancellationToken::new();
    let tasks = Arc::new(app.scheduler()).spawn(shutdown.clone());

    let server = ApiServer::new(
        addr,
        ApiState {
            receiver,
            db: app.db.clone(),
        },
    );
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move { server.start(server_shutdown).await });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(err) => error!("Failed to listen for shutdown signal: {}", err),
        }
        signal_shutdown.cancel();
    });

    info!("meetsync is ready");

    let served = server_task.await.context("API server task panicked")?;
    // A server that failed to start takes the periodic tasks down with it.
    shutdown.cancel();
    for task in tasks {
        if let Err(err) = task.await {
            error!("Periodic task panicked: {}", err);
        }
    }

    served
}
