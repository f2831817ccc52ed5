//! Transcript analysis collaborators.
//!
//! Both the summarizer and the task assigner are external black boxes that
//! may fail; the reconciler degrades `processing_status` rather than losing
//! the transcript when they do.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::gateway::{HttpClient, Retry};
use crate::meeting::AssignedTask;

/// Structured result of analysing one transcript.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Analysis {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub wins: Vec<String>,
    #[serde(default)]
    pub areas_for_support: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn analyze(&self, transcript: &str) -> Result<Analysis>;
}

#[async_trait]
pub trait TaskAssigner: Send + Sync {
    async fn assign(
        &self,
        tasks: &[String],
        manager_id: &str,
        member_id: &str,
    ) -> Result<Vec<AssignedTask>>;
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    transcript: &'a str,
}

#[derive(Serialize)]
struct AssignRequest<'a> {
    tasks: &'a [String],
    manager_id: &'a str,
    member_id: &'a str,
}

#[derive(Deserialize)]
struct AssignResponse {
    #[serde(default)]
    assignments: Vec<AssignedTask>,
}

/// HTTP analysis service implementing both collaborators.
pub struct HttpAnalysisClient {
    http: HttpClient,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpAnalysisClient {
    /// `None` when no analysis endpoint is configured.
    pub fn from_config(http: HttpClient, config: &AnalysisConfig) -> Option<Self> {
        let endpoint = config.endpoint.as_deref()?.trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return None;
        }

        info!("Using analysis service at {}", endpoint);
        Some(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(Method::POST, format!("{}{}", self.endpoint, path));
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl Summarizer for HttpAnalysisClient {
    async fn analyze(&self, transcript: &str) -> Result<Analysis> {
        debug!(chars = transcript.len(), "Requesting transcript analysis");
        self.http
            .send_json(
                self.request("/analyze").json(&AnalyzeRequest { transcript }),
                Retry::Idempotent,
            )
            .await
            .context("Transcript analysis failed")
    }
}

#[async_trait]
impl TaskAssigner for HttpAnalysisClient {
    async fn assign(
        &self,
        tasks: &[String],
        manager_id: &str,
        member_id: &str,
    ) -> Result<Vec<AssignedTask>> {
        let response: AssignResponse = self
            .http
            .send_json(
                self.request("/assign-tasks").json(&AssignRequest {
                    tasks,
                    manager_id,
                    member_id,
                }),
                Retry::Idempotent,
            )
            .await
            .context("Task assignment failed")?;
        Ok(response.assignments)
    }
}
