//! Inbound provider webhooks.
//!
//! `handle` verifies the signature, parses the payload, derives one
//! idempotency key per unit of work, and dispatches admitted work to the
//! reconciler. Answers are 200 for anything handled or deliberately dropped,
//! 401 for a bad signature, and 503 only when storage is unavailable so the
//! provider redelivers.

pub mod payload;
pub mod signature;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, error, info, warn};

use crate::db::IntegrationRepository;
use crate::gateway::CalendarEvent;
use crate::idempotency::{Admission, IdempotencyStore};
use crate::reconciler::{BotEvent, CalendarChange, ReconcileError, Reconciler};

pub use payload::{parse_event, CalendarEventNotice, PayloadError, WebhookEvent};
pub use signature::{SignatureError, SignatureVerifier, SIGNATURE_HEADERS};

/// One admitted-or-not piece of work derived from a webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub key: String,
    pub input: Input,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Bot(BotEvent),
    Calendar {
        change: CalendarChange,
        owner: Option<String>,
    },
}

pub struct WebhookReceiver {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,
    verifier: Option<SignatureVerifier>,
}

impl WebhookReceiver {
    /// `verifier` of `None` disables signature checks.
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn IdempotencyStore>,
        ttl: Duration,
        verifier: Option<SignatureVerifier>,
    ) -> Self {
        Self {
            reconciler,
            store,
            ttl,
            verifier,
        }
    }

    pub async fn handle(&self, body: &[u8], headers: &HeaderMap) -> StatusCode {
        if let Some(verifier) = &self.verifier {
            if let Err(err) = verifier.verify(body, headers) {
                warn!("Rejecting webhook: {}", err);
                return StatusCode::UNAUTHORIZED;
            }
        }

        let event = match parse_event(body) {
            Ok(event) => event,
            Err(err) => {
                warn!("Dropping unusable webhook: {}", err);
                return StatusCode::OK;
            }
        };
        debug!(kind = event.kind(), "Received webhook");

        let items = match self.work_items(event).await {
            Ok(items) => items,
            Err(err) => {
                error!("Could not resolve webhook: {}", err);
                return StatusCode::SERVICE_UNAVAILABLE;
            }
        };

        for item in items {
            match self.store.admit(&item.key, self.ttl).await {
                Ok(Admission::Duplicate) => {
                    debug!(key = %item.key, "Duplicate webhook, already handled");
                }
                Ok(Admission::Admitted) => {
                    if let Err(status) = self.process(&item).await {
                        return status;
                    }
                }
                Err(err) => {
                    error!(key = %item.key, "Failing closed: {}", err);
                    return StatusCode::SERVICE_UNAVAILABLE;
                }
            }
        }

        StatusCode::OK
    }

    async fn process(&self, item: &WorkItem) -> Result<(), StatusCode> {
        let result = match &item.input {
            Input::Bot(event) => self.reconciler.handle_bot_event(event).await,
            Input::Calendar { change, owner } => {
                self.reconciler
                    .handle_calendar_change(change, owner.as_deref())
                    .await
            }
        };

        match result {
            Ok(outcome) => {
                debug!(key = %item.key, ?outcome, "Webhook applied");
                Ok(())
            }
            Err(err) if err.needs_redelivery() => {
                error!(key = %item.key, "Webhook not applied, asking for redelivery: {}", err);
                if let Err(release_err) = self.store.release(&item.key).await {
                    error!(key = %item.key, "Could not release idempotency key: {}", release_err);
                }
                Err(StatusCode::SERVICE_UNAVAILABLE)
            }
            Err(err) => {
                // Business and provider failures are not the sender's problem;
                // polling reconciles them later.
                error!(key = %item.key, "Webhook reconciliation failed: {}", err);
                Ok(())
            }
        }
    }

    /// Resolve an event into keyed units of work.
    pub async fn work_items(&self, event: WebhookEvent) -> Result<Vec<WorkItem>, ReconcileError> {
        let kind = event.kind();
        let items = match event {
            WebhookEvent::BotStatusChange { bot_id, code } => vec![WorkItem {
                key: format!("{kind}:{bot_id}:{}", code.as_str()),
                input: Input::Bot(BotEvent::StatusChange { bot_id, code }),
            }],
            WebhookEvent::BotComplete {
                bot_id,
                transcript,
                recording_url,
            } => vec![WorkItem {
                key: format!("{kind}:{bot_id}"),
                input: Input::Bot(BotEvent::Complete {
                    bot_id,
                    transcript,
                    recording_url,
                }),
            }],
            WebhookEvent::BotFailed { bot_id, code } => vec![WorkItem {
                key: format!("{kind}:{bot_id}"),
                input: Input::Bot(BotEvent::Failed { bot_id, code }),
            }],
            WebhookEvent::CalendarSyncEvents {
                calendar_id,
                affected_event_uuids,
            } => {
                let owner = self.owner_of(Some(&calendar_id)).await?;
                let mut items = Vec::with_capacity(affected_event_uuids.len());
                for uuid in affected_event_uuids {
                    if let Some(change) = self.fetch_change(&uuid).await {
                        items.push(WorkItem {
                            key: calendar_key(kind, &calendar_id, &change),
                            input: Input::Calendar {
                                change,
                                owner: owner.clone(),
                            },
                        });
                    }
                }
                items
            }
            WebhookEvent::CalendarEventCreated(notice)
            | WebhookEvent::CalendarEventUpdated(notice) => {
                let owner = self.owner_of(notice.calendar_id.as_deref()).await?;
                // Without a version the inline copy may be stale; the provider's
                // current view is authoritative.
                let change = match notice.event {
                    Some(event) if event.last_updated_at.is_some() => {
                        Some(CalendarChange::Upsert(event))
                    }
                    _ => self.fetch_change(&notice.event_uuid).await,
                };
                let calendar_id = notice.calendar_id.unwrap_or_default();
                change
                    .map(|change| WorkItem {
                        key: calendar_key(kind, &calendar_id, &change),
                        input: Input::Calendar { change, owner },
                    })
                    .into_iter()
                    .collect()
            }
            WebhookEvent::CalendarEventDeleted {
                calendar_id,
                event_uuid,
                raw_event_id,
            } => {
                let owner = self.owner_of(calendar_id.as_deref()).await?;
                vec![WorkItem {
                    key: format!("{kind}:{}:{event_uuid}", calendar_id.unwrap_or_default()),
                    input: Input::Calendar {
                        change: CalendarChange::Deleted {
                            event_uuid,
                            raw_event_id,
                        },
                        owner,
                    },
                }]
            }
        };
        Ok(items)
    }

    /// Current provider view of an event. A vanished event is a deletion;
    /// other failures skip the event until the next calendar poll.
    async fn fetch_change(&self, event_uuid: &str) -> Option<CalendarChange> {
        match self.reconciler.calendars().get_event(event_uuid).await {
            Ok(event) => Some(CalendarChange::Upsert(event)),
            Err(err) if err.is_not_found() => Some(CalendarChange::Deleted {
                event_uuid: event_uuid.to_string(),
                raw_event_id: None,
            }),
            Err(err) => {
                warn!(event_id = event_uuid, error = %err, "Could not fetch calendar event, leaving it to the next poll");
                None
            }
        }
    }

    async fn owner_of(&self, calendar_id: Option<&str>) -> Result<Option<String>, ReconcileError> {
        let Some(calendar_id) = calendar_id.filter(|id| !id.is_empty()) else {
            return Ok(None);
        };
        let lookup = calendar_id.to_string();
        let integration = self
            .reconciler
            .database()
            .call(move |conn| IntegrationRepository::find_active_by_calendar_id(conn, &lookup))
            .await?;
        if integration.is_none() {
            info!(calendar_id, "Calendar event for unknown calendar");
        }
        Ok(integration.map(|i| i.user_id))
    }
}

/// Key for a calendar unit of work. Updates carry a version so a genuine
/// later edit is not mistaken for a redelivery.
pub fn calendar_key(kind: &str, calendar_id: &str, change: &CalendarChange) -> String {
    match change {
        CalendarChange::Upsert(event) => {
            format!("{kind}:{calendar_id}:{}:{}", event.uuid, event_version(event))
        }
        CalendarChange::Deleted { event_uuid, .. } => {
            format!("{kind}:{calendar_id}:{event_uuid}:deleted")
        }
    }
}

/// `last_updated_at` when the provider sends one, else the timing fields.
pub fn event_version(event: &CalendarEvent) -> String {
    match event.last_updated_at {
        Some(at) => at.timestamp_millis().to_string(),
        None => format!(
            "{}+{}{}",
            event.start_time.timestamp_millis(),
            event.duration_minutes(),
            if event.deleted { ":deleted" } else { "" }
        ),
    }
}
