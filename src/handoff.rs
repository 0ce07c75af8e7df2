//! Workflow handoff: start the downstream pipeline for one document.
//!
//! The handoff is fire-and-forget. [`WorkflowLauncher::launch`] returns as
//! soon as the execution has been accepted; nothing here waits for the
//! downstream stages to finish.

use crate::auth::TokenSource;
use crate::error::HandoffError;
use crate::models::WorkflowPayload;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

const DEFAULT_ENDPOINT: &str = "https://workflowexecutions.googleapis.com";

/// Serialise the execution argument: `{"documentId": …, "pageCount": …}`.
pub fn encode_payload(payload: &WorkflowPayload) -> Result<String, serde_json::Error> {
    serde_json::to_string(payload)
}

/// Handle to a started execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRef {
    /// Full resource name,
    /// e.g. `projects/p/locations/l/workflows/w/executions/abc`.
    pub name: String,
}

impl ExecutionRef {
    /// Last path segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Starts one execution of the downstream workflow.
#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    /// Start an execution with `argument` (a JSON string) as its input.
    async fn launch(&self, argument: &str) -> Result<ExecutionRef, HandoffError>;
}

// ── Workflow Executions API ──────────────────────────────────────────────

/// Client for `POST /v1/{workflow}/executions`.
#[derive(Debug, Clone)]
pub struct WorkflowsClient {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    parent: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionResponse {
    name: String,
}

impl WorkflowsClient {
    /// `parent` is the workflow's resource name, see
    /// [`crate::IngestConfig::workflow_parent`].
    pub fn new(client: reqwest::Client, tokens: Arc<TokenSource>, parent: impl Into<String>) -> Self {
        Self {
            client,
            tokens,
            parent: parent.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn executions_url(&self) -> String {
        format!("{}/v1/{}/executions", self.endpoint, self.parent)
    }
}

#[async_trait]
impl WorkflowLauncher for WorkflowsClient {
    async fn launch(&self, argument: &str) -> Result<ExecutionRef, HandoffError> {
        let token = self.tokens.token().await?;
        let response = self
            .client
            .post(self.executions_url())
            .bearer_auth(token)
            .json(&json!({ "argument": argument }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HandoffError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let execution: ExecutionResponse = response
            .json()
            .await
            .map_err(|e| HandoffError::Decode(e.to_string()))?;
        debug!(execution = %execution.name, "Workflow execution accepted");
        Ok(ExecutionRef {
            name: execution.name,
        })
    }
}

// ── Local mode ───────────────────────────────────────────────────────────

/// Launcher that only logs the argument. Used by the CLI's local mode,
/// where no workflow service is available.
#[derive(Debug, Clone, Default)]
pub struct LoggingLauncher;

#[async_trait]
impl WorkflowLauncher for LoggingLauncher {
    async fn launch(&self, argument: &str) -> Result<ExecutionRef, HandoffError> {
        let name = format!("local/executions/{}", uuid::Uuid::new_v4().simple());
        info!(execution = %name, argument, "Workflow handoff (local, not executed)");
        Ok(ExecutionRef { name })
    }
}
