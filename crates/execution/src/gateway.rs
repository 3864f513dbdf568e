//! Contract with the outbound execution gateway.
//!
//! Payloads are decoded at the boundary into [`GatewayEvent`]; nothing past
//! this module looks at raw JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use mission_core::RunId;

/// Errors talking to the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The request was rejected or could not be delivered
    #[error("Send failed: {0}")]
    Send(String),

    /// An event payload did not decode
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// No connection to the gateway
    #[error("Gateway disconnected")]
    Disconnected,

    /// Local agent process failure
    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

/// A message for an agent session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    /// Agent session, `agent:<agent>:mission:<mission>`
    pub session_key: String,
    /// Prompt text
    pub message: String,
    /// Deduplicates retries; also the engine's run key
    pub idempotency_key: RunId,
}

/// Gateway acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendAck {
    /// Gateway-assigned run id, when it differs from the idempotency key
    #[serde(default)]
    pub run_id: Option<RunId>,
}

/// A streamed run event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Incremental output
    Delta {
        /// Run the chunk belongs to
        run_id: RunId,
        /// Chunk text
        #[serde(default)]
        text: String,
    },
    /// The run finished
    Final {
        /// Finished run
        run_id: RunId,
        /// Complete output; the streamed buffer is used when absent
        #[serde(default)]
        text: Option<String>,
    },
    /// The run failed
    Error {
        /// Failed run
        run_id: RunId,
        /// Error text
        #[serde(default)]
        message: String,
    },
    /// The run was cancelled
    Aborted {
        /// Cancelled run
        run_id: RunId,
    },
}

impl GatewayEvent {
    /// Decode a JSON payload.
    pub fn decode(payload: &str) -> Result<Self, GatewayError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Run the event refers to.
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Delta { run_id, .. }
            | Self::Final { run_id, .. }
            | Self::Error { run_id, .. }
            | Self::Aborted { run_id } => run_id,
        }
    }
}

/// Transport quality reported by the gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    /// Healthy
    Good,
    /// Slow or flapping
    Degraded,
    /// Disconnected
    Lost,
}

/// Everything the gateway can tell the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewaySignal {
    /// A run event
    Event(GatewayEvent),
    /// A quality change
    Quality(ConnectionQuality),
    /// The connection was re-established
    Reconnected,
}

/// Outbound execution gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Send a message to an agent session.
    async fn send(&self, request: SendRequest) -> Result<SendAck, GatewayError>;

    /// Ask the gateway to stop a run. Best effort.
    async fn abort(&self, _run_id: &RunId) -> Result<(), GatewayError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_events() {
        let delta = GatewayEvent::decode(r#"{"state":"delta","run_id":"r1","text":"ab"}"#).unwrap();
        assert_eq!(
            delta,
            GatewayEvent::Delta {
                run_id: RunId::from("r1"),
                text: "ab".into()
            }
        );

        let done = GatewayEvent::decode(r#"{"state":"final","run_id":"r1"}"#).unwrap();
        assert_eq!(
            done,
            GatewayEvent::Final {
                run_id: RunId::from("r1"),
                text: None
            }
        );
        assert_eq!(done.run_id().as_str(), "r1");
    }

    #[test]
    fn unknown_state_is_a_decode_error() {
        let err = GatewayEvent::decode(r#"{"state":"paused","run_id":"r1"}"#).unwrap_err();
        assert!(matches!(err, GatewayError::Decode(_)));
    }
}
