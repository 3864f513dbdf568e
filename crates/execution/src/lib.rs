//! Execution layer - scheduling, run tracking and the task lifecycle.
//!
//! The [`Orchestrator`] ticks over the backing store, passes each candidate
//! through its gates, launches runs on a [`Gateway`] and turns run results
//! into task transitions, reviews, revisions and failures.

#![warn(missing_docs)]

pub mod config;
pub mod dependency;
pub mod selector;
pub mod runs;
pub mod checkpoint;
pub mod gateway;
pub mod command_gateway;
pub mod claim;
pub mod mission_writer;
pub mod review;
pub mod prompt;
pub mod resilience;
pub mod engine;
mod lifecycle;

pub use config::{ConfigError, DependencyPolicy, EngineConfig, EngineSettings};
pub use dependency::{DependencyResolver, Resolution};
pub use selector::{Candidate, DefaultSelector, TaskSelector};
pub use runs::{ActiveRun, QuotaTracker, RunRegistry};
pub use checkpoint::CheckpointStore;
pub use gateway::{
    ConnectionQuality, Gateway, GatewayError, GatewayEvent, GatewaySignal, SendAck, SendRequest,
};
pub use command_gateway::CommandGateway;
pub use claim::{ClaimOutcome, ClaimProtocol};
pub use mission_writer::MissionWriter;
pub use review::{parse_review_decision, ParseSource, ReviewDecision};
pub use resilience::{ConnectionMonitor, QualityTransition};
pub use engine::{Orchestrator, OrchestratorBuilder, TickReport, RECOVERED_SUMMARY};
