//! Shared fixtures for orchestrator scenarios.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mission_core::{AgentGuardrails, AgentProfile, RunId, Task, TaskId};
use mission_execution::{
    EngineConfig, Gateway, GatewayError, GatewayEvent, GatewaySignal, Orchestrator, SendAck,
    SendRequest,
};
use mission_storage::{MemoryStorage, Storage};

/// Gateway that records every send and acknowledges it.
#[derive(Default)]
pub struct ScriptedGateway {
    sent: Mutex<Vec<SendRequest>>,
    offline: AtomicBool,
}

impl ScriptedGateway {
    pub fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn send(&self, request: SendRequest) -> Result<SendAck, GatewayError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Send("gateway offline".into()));
        }
        self.sent.lock().unwrap().push(request);
        Ok(SendAck::default())
    }
}

pub struct Harness {
    pub storage: Arc<MemoryStorage>,
    pub gateway: Arc<ScriptedGateway>,
    pub engine: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let gateway = Arc::new(ScriptedGateway::default());
        let engine = Orchestrator::builder(storage.clone(), gateway.clone())
            .with_approval_sink(storage.clone())
            .with_activity_sink(storage.clone())
            .with_config(config.with_identity("engine", "test"))
            .build();
        Self {
            storage,
            gateway,
            engine,
        }
    }

    pub async fn agent(&self, id: &str, level: u8) {
        self.storage
            .save_agent(&AgentProfile::new(id, level))
            .await
            .unwrap();
    }

    pub async fn agent_with(&self, id: &str, level: u8, guardrails: AgentGuardrails) {
        let profile = AgentProfile::new(id, level).with_guardrails(guardrails);
        self.storage.save_agent(&profile).await.unwrap();
    }

    pub async fn add(&self, task: Task) -> Task {
        self.storage.save_task(&task).await.unwrap();
        task
    }

    pub async fn load(&self, id: &TaskId) -> Task {
        self.storage.load_task(id).await.unwrap().unwrap()
    }

    pub fn last_run(&self) -> RunId {
        self.gateway
            .sent()
            .last()
            .expect("a run was sent")
            .idempotency_key
            .clone()
    }

    pub async fn delta(&self, run: &RunId, text: &str) {
        self.engine
            .handle_signal(GatewaySignal::Event(GatewayEvent::Delta {
                run_id: run.clone(),
                text: text.into(),
            }))
            .await;
    }

    pub async fn finish(&self, run: &RunId, text: &str) {
        self.engine
            .handle_signal(GatewaySignal::Event(GatewayEvent::Final {
                run_id: run.clone(),
                text: Some(text.into()),
            }))
            .await;
    }

    pub async fn fail(&self, run: &RunId, message: &str) {
        self.engine
            .handle_signal(GatewaySignal::Event(GatewayEvent::Error {
                run_id: run.clone(),
                message: message.into(),
            }))
            .await;
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.storage
            .list_tasks(&Default::default())
            .await
            .unwrap()
    }
}
