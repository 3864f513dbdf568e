//! Approval and activity sinks.
//!
//! Both are write-only from the engine's point of view: approvals are
//! resolved by an external approver, activity is advisory.

use async_trait::async_trait;
use mission_core::{ActivityEvent, ApprovalRequest};
use std::time::Duration;

use crate::trait_::Result;

/// Destination for pending-approval records.
#[async_trait]
pub trait ApprovalSink: Send + Sync {
    /// Record a pending approval.
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()>;
}

/// Destination for append-only diagnostic events.
#[async_trait]
pub trait ActivitySink: Send + Sync {
    /// Append an event.
    async fn record(&self, event: &ActivityEvent) -> Result<()>;
}

/// Activity sink that writes events to the tracing log.
#[derive(Debug, Clone, Default)]
pub struct TracingActivitySink;

#[async_trait]
impl ActivitySink for TracingActivitySink {
    async fn record(&self, event: &ActivityEvent) -> Result<()> {
        tracing::info!(
            kind = ?event.kind,
            task = event.task_id.as_ref().map(|t| t.as_str()).unwrap_or("-"),
            mission = event.mission_id.as_ref().map(|m| m.as_str()).unwrap_or("-"),
            "{}",
            event.message
        );
        Ok(())
    }
}

#[async_trait]
impl ApprovalSink for TracingActivitySink {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        tracing::warn!(
            task = %request.task_id,
            agent = %request.agent_id,
            gate = ?request.approval_gate,
            "Approval required: {}",
            request.reason
        );
        Ok(())
    }
}

/// Approval sink that POSTs each request as JSON to a webhook.
pub struct WebhookApprovalSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookApprovalSink {
    /// Create a sink for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Use a preconfigured client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ApprovalSink for WebhookApprovalSink {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        tracing::info!("Sending approval request for {} to {}", request.task_id, self.url);
        self.client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
