//! The orchestrator - owns scheduler state and runs the tick loop.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use mission_core::{
    ActivityEvent, ActivityKind, AgentId, AgentProfile, Mission, MissionId, RunCheckpoint, RunId,
    RunPhase, Task, TaskFilter, TaskId, TaskPatch, TaskStatus,
};
use mission_guardrails::{Action, PermissionEngine};
use mission_progress::MissionIndex;
use mission_proof::{ProofService, WorkTreeSnapshot};
use mission_storage::{ActivitySink, ApprovalSink, ChangeEvent, Storage, TracingActivitySink};

use crate::checkpoint::CheckpointStore;
use crate::claim::ClaimProtocol;
use crate::config::EngineConfig;
use crate::dependency::{task_map, DependencyResolver};
use crate::gateway::{ConnectionQuality, Gateway, GatewayEvent, GatewaySignal};
use crate::mission_writer::MissionWriter;
use crate::resilience::{stale_tasks, ConnectionMonitor, QualityTransition};
use crate::runs::{ActiveRun, QuotaTracker, RunRegistry};
use crate::selector::{Candidate, DefaultSelector, TaskSelector};

/// Diagnostic left on tasks reset by recovery.
pub const RECOVERED_SUMMARY: &str = "Recovered after restart";

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Tasks considered for launch
    pub candidates: usize,
    /// Runs launched
    pub launched: usize,
    /// Tasks that failed a gate
    pub blocked: usize,
    /// Launching stopped at the run budget
    pub at_capacity: bool,
    /// Dropped because another tick was running
    pub skipped: bool,
}

/// How a launch attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Launch {
    Started,
    Blocked,
    Deferred,
    Failed,
}

/// Why a run or task failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    /// The run never produced a result
    Transport(String),
    /// A lifecycle rule ended the task
    Policy(String),
}

impl Failure {
    pub(crate) fn message(&self) -> &str {
        match self {
            Self::Transport(m) | Self::Policy(m) => m,
        }
    }
}

/// Mutable scheduler state. Never held across storage or gateway calls.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) runs: RunRegistry,
    pub(crate) checkpoints: CheckpointStore,
    pub(crate) monitor: ConnectionMonitor,
    pub(crate) agents: HashMap<AgentId, AgentProfile>,
    pub(crate) quotas: QuotaTracker,
    pub(crate) approvals_requested: HashSet<(TaskId, Action)>,
    pub(crate) baselines: HashMap<TaskId, WorkTreeSnapshot>,
}

/// Drives tasks from `todo` to a terminal state through the gateway.
///
/// One instance owns the run registry, checkpoints, agent cache, quotas and
/// approval dedupe. Construct with [`Orchestrator::builder`].
pub struct Orchestrator {
    pub(crate) me: Weak<Orchestrator>,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) approvals: Arc<dyn ApprovalSink>,
    pub(crate) activity: Arc<dyn ActivitySink>,
    pub(crate) proof: ProofService,
    pub(crate) permissions: PermissionEngine,
    pub(crate) resolver: DependencyResolver,
    pub(crate) selector: Arc<dyn TaskSelector>,
    pub(crate) claims: ClaimProtocol,
    pub(crate) writer: MissionWriter,
    pub(crate) config: EngineConfig,
    pub(crate) state: Mutex<EngineState>,
    ticking: AtomicBool,
    tick_requested: Notify,
}

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    storage: Arc<dyn Storage>,
    gateway: Arc<dyn Gateway>,
    approvals: Option<Arc<dyn ApprovalSink>>,
    activity: Option<Arc<dyn ActivitySink>>,
    proof: ProofService,
    selector: Arc<dyn TaskSelector>,
    config: EngineConfig,
}

impl OrchestratorBuilder {
    /// Start a builder over a store and a gateway.
    pub fn new(storage: Arc<dyn Storage>, gateway: Arc<dyn Gateway>) -> Self {
        Self {
            storage,
            gateway,
            approvals: None,
            activity: None,
            proof: ProofService::default(),
            selector: Arc::new(DefaultSelector::new()),
            config: EngineConfig::default(),
        }
    }

    /// Where approval requests go. Defaults to the log.
    pub fn with_approval_sink(mut self, sink: Arc<dyn ApprovalSink>) -> Self {
        self.approvals = Some(sink);
        self
    }

    /// Where activity events go. Defaults to the log.
    pub fn with_activity_sink(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = Some(sink);
        self
    }

    /// Set the proof service.
    pub fn with_proof(mut self, proof: ProofService) -> Self {
        self.proof = proof;
        self
    }

    /// Set the candidate ranking strategy.
    pub fn with_selector(mut self, selector: Arc<dyn TaskSelector>) -> Self {
        self.selector = selector;
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> Arc<Orchestrator> {
        let config = self.config;
        let approvals = self
            .approvals
            .unwrap_or_else(|| Arc::new(TracingActivitySink));
        let activity = self
            .activity
            .unwrap_or_else(|| Arc::new(TracingActivitySink));

        Arc::new_cyclic(|me| Orchestrator {
            me: me.clone(),
            storage: self.storage,
            gateway: self.gateway,
            approvals,
            activity,
            proof: self.proof,
            permissions: PermissionEngine::new(),
            resolver: DependencyResolver::new(config.dependency_policy),
            selector: self.selector,
            claims: ClaimProtocol::new(config.claim_prefix.clone(), config.instance_id.clone()),
            writer: MissionWriter::new(),
            state: Mutex::new(EngineState {
                runs: RunRegistry::new(config.max_concurrent_runs, config.thinking_char_cap),
                checkpoints: CheckpointStore::new(),
                monitor: ConnectionMonitor::new(),
                agents: HashMap::new(),
                quotas: QuotaTracker::default(),
                approvals_requested: HashSet::new(),
                baselines: HashMap::new(),
            }),
            config,
            ticking: AtomicBool::new(false),
            tick_requested: Notify::new(),
        })
    }
}

/// Clears the tick flag however the tick ends.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Orchestrator {
    /// Start building an orchestrator.
    pub fn builder(storage: Arc<dyn Storage>, gateway: Arc<dyn Gateway>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(storage, gateway)
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Runs currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.runs.len()
    }

    /// Checkpoint of a task's in-flight run.
    pub async fn checkpoint(&self, task_id: &TaskId) -> Option<RunCheckpoint> {
        self.state.lock().await.checkpoints.get(task_id).cloned()
    }

    /// Current gateway connection quality.
    pub async fn connection_quality(&self) -> ConnectionQuality {
        self.state.lock().await.monitor.quality()
    }

    /// Ask the loop for another tick as soon as possible.
    pub fn request_tick(&self) {
        self.tick_requested.notify_one();
    }

    /// Run the scheduling loop until `shutdown` resolves.
    ///
    /// Recovery runs once before the first tick.
    pub async fn run(
        self: Arc<Self>,
        mut signals: mpsc::Receiver<GatewaySignal>,
        shutdown: impl Future<Output = ()>,
    ) -> anyhow::Result<()> {
        info!(
            "Orchestrator {}:{} starting (tick {}s, {} runs)",
            self.config.claim_prefix,
            self.config.instance_id,
            self.config.tick_interval.as_secs(),
            self.config.max_concurrent_runs
        );
        if let Err(e) = self.recover().await {
            error!("Startup recovery failed: {:#}", e);
        }

        let mut changes = self.storage.subscribe();
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let mut signals_open = true;
        let mut feed_open = true;
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down with {} runs in flight", self.in_flight().await);
                    break;
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = self.tick_requested.notified() => {
                    self.tick().await;
                }
                signal = signals.recv(), if signals_open => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        warn!("Gateway signal channel closed");
                        signals_open = false;
                    }
                },
                change = changes.recv(), if feed_open => match change {
                    Ok(change) => self.reconcile(change).await,
                    Err(RecvError::Lagged(n)) => warn!("Change feed lagged by {} events", n),
                    Err(RecvError::Closed) => {
                        warn!("Change feed closed");
                        feed_open = false;
                    }
                },
            }
        }
        Ok(())
    }

    /// Recover, tick once, then handle signals until no run is in flight.
    pub async fn run_once(&self, signals: &mut mpsc::Receiver<GatewaySignal>) -> TickReport {
        if let Err(e) = self.recover().await {
            error!("Recovery failed: {:#}", e);
        }
        let report = self.tick().await;

        while self.in_flight().await > 0 {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => break,
                },
                // Local timers resolve runs without a signal.
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
        }
        report
    }

    /// One scheduling pass. Overlapping calls return immediately.
    pub async fn tick(&self) -> TickReport {
        if self.ticking.swap(true, Ordering::AcqRel) {
            debug!("Tick already running, dropping this one");
            return TickReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = TickGuard(&self.ticking);

        match self.tick_inner().await {
            Ok(report) => {
                if report.launched > 0 || report.blocked > 0 {
                    info!(
                        "Tick: {} candidates, {} launched, {} blocked",
                        report.candidates, report.launched, report.blocked
                    );
                }
                report
            }
            Err(e) => {
                error!("Tick failed: {:#}", e);
                TickReport::default()
            }
        }
    }

    async fn tick_inner(&self) -> anyhow::Result<TickReport> {
        let tasks = self
            .storage
            .list_tasks(&TaskFilter::default())
            .await
            .context("loading tasks")?;
        let agents = self.storage.list_agents().await.context("loading agents")?;
        let mut missions: HashMap<MissionId, Mission> = self
            .storage
            .list_missions()
            .await
            .context("loading missions")?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();

        let tracked: HashSet<TaskId> = {
            let mut state = self.state.lock().await;
            state.agents = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
            if state.monitor.is_lost() {
                debug!("Connection lost, not launching");
                return Ok(TickReport::default());
            }
            state.runs.iter().map(|r| r.task_id.clone()).collect()
        };

        let index = MissionIndex::build(&tasks);
        let all = task_map(&tasks);
        let mut candidates = self.candidates(&tasks, &index, &tracked).await;
        self.selector.rank(&mut candidates);

        let mut report = TickReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        let mut claim_lost = HashSet::new();
        for candidate in candidates {
            if !self.state.lock().await.runs.has_capacity() {
                report.at_capacity = true;
                break;
            }
            let task = &candidate.task;
            let outcome = match candidate.phase {
                RunPhase::Primary => {
                    self.start_primary(task, &all, &index, &mut missions, &mut claim_lost)
                        .await
                }
                RunPhase::Review => self.start_review(task).await,
            };
            match outcome {
                Ok(Launch::Started) => report.launched += 1,
                Ok(Launch::Blocked) => report.blocked += 1,
                Ok(Launch::Deferred | Launch::Failed) => {}
                Err(e) => error!("Starting {} phase of {} failed: {:#}", candidate.phase, task.id, e),
            }
        }
        Ok(report)
    }

    async fn candidates(
        &self,
        tasks: &[Task],
        index: &MissionIndex,
        tracked: &HashSet<TaskId>,
    ) -> Vec<Candidate> {
        let state = self.state.lock().await;
        tasks
            .iter()
            .filter(|t| !index.is_placeholder(t) && !t.is_superseded() && !tracked.contains(&t.id))
            .filter_map(|task| {
                let phase = match task.status {
                    TaskStatus::Todo | TaskStatus::Blocked => RunPhase::Primary,
                    TaskStatus::Review if task.active_run_id.is_none() => RunPhase::Review,
                    _ => return None,
                };
                let agent = match phase {
                    RunPhase::Primary => task.executing_agent(),
                    RunPhase::Review => task.review_agent_id.as_ref(),
                };
                let agent_level = agent
                    .and_then(|a| state.agents.get(a))
                    .map(|p| p.level)
                    .unwrap_or_default();
                Some(Candidate {
                    task: task.clone(),
                    phase,
                    agent_level,
                })
            })
            .collect()
    }

    /// Apply one gateway signal. Errors are logged, never returned.
    pub async fn handle_signal(&self, signal: GatewaySignal) {
        match signal {
            GatewaySignal::Event(event) => self.handle_event(event).await,
            GatewaySignal::Quality(quality) => self.on_quality(quality).await,
            GatewaySignal::Reconnected => {
                let transition = self.state.lock().await.monitor.reconnected();
                debug!("Gateway reconnected ({:?})", transition);
                self.on_restored().await;
            }
        }
    }

    async fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Delta { run_id, text } => {
                let update = {
                    let mut state = self.state.lock().await;
                    match state.runs.append(&run_id, &text) {
                        Some(buffer) => {
                            let task_id = state.runs.get(&run_id).map(|r| r.task_id.clone());
                            if let Some(task_id) = &task_id {
                                state.checkpoints.update_buffer(task_id, &buffer);
                            }
                            task_id.map(|id| (id, buffer))
                        }
                        None => None,
                    }
                };
                let Some((task_id, buffer)) = update else {
                    debug!("Delta for unknown run {}", run_id);
                    return;
                };
                if let Err(e) = self
                    .storage
                    .patch_task(&task_id, &TaskPatch::new().thinking(buffer))
                    .await
                {
                    warn!("Failed to store thinking for {}: {}", task_id, e);
                }
            }
            GatewayEvent::Final { run_id, text } => {
                let Some(run) = self.take_run(&run_id).await else {
                    debug!("Final for unknown run {}", run_id);
                    return;
                };
                let output = text
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| run.output.clone());
                self.finish_with_output(run, output).await;
            }
            GatewayEvent::Error { run_id, message } => {
                let Some(run) = self.take_run(&run_id).await else {
                    debug!("Error for unknown run {}: {}", run_id, message);
                    return;
                };
                let message = if message.is_empty() {
                    "Gateway reported an error".to_string()
                } else {
                    message
                };
                self.finish_failed(run, Failure::Transport(message)).await;
            }
            GatewayEvent::Aborted { run_id } => {
                let Some(run) = self.take_run(&run_id).await else {
                    return;
                };
                self.finish_failed(run, Failure::Transport("Run aborted".into()))
                    .await;
            }
        }
    }

    /// Remove a run from the registry; whoever removes it resolves it.
    pub(crate) async fn take_run(&self, id: &RunId) -> Option<ActiveRun> {
        let mut state = self.state.lock().await;
        let run = state.runs.remove(id)?;
        state.checkpoints.remove(&run.task_id);
        Some(run)
    }

    async fn on_quality(&self, quality: ConnectionQuality) {
        let now = Instant::now();
        let max_drops = self.config.max_connection_drops;
        let (transition, in_flight, over_limit) = {
            let mut state = self.state.lock().await;
            let transition = state.monitor.report(quality, now);
            let mut over_limit = Vec::new();
            let mut in_flight = 0;
            if let QualityTransition::Lost { .. } = transition {
                let keys = state.runs.mark_lost(now);
                in_flight = keys.len();
                for key in keys {
                    let Some(task_id) = state.runs.get(&key).map(|r| r.task_id.clone()) else {
                        continue;
                    };
                    match state.checkpoints.record_drop(&task_id) {
                        Some(drops) if drops > max_drops => over_limit.push((key, drops)),
                        _ => {}
                    }
                }
            }
            (transition, in_flight, over_limit)
        };

        match transition {
            QualityTransition::Lost { epoch } => {
                warn!("Gateway connection lost with {} runs in flight", in_flight);
                self.record(ActivityEvent::new(
                    ActivityKind::ConnectionLost,
                    format!("Connection lost with {} runs in flight", in_flight),
                ))
                .await;
                for (key, drops) in over_limit {
                    if let Some(run) = self.take_run(&key).await {
                        let message = format!("Connection dropped {} times during this run", drops);
                        self.finish_failed(run, Failure::Transport(message)).await;
                    }
                }
                self.arm_grace(epoch);
            }
            QualityTransition::Restored => self.on_restored().await,
            QualityTransition::Unchanged => debug!("Connection quality {:?}", quality),
        }
    }

    fn arm_grace(&self, epoch: u64) {
        let me = self.me.clone();
        let grace = self.config.connection_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(me) = me.upgrade() {
                me.on_grace_expired(epoch).await;
            }
        });
    }

    async fn on_grace_expired(&self, epoch: u64) {
        let expired: Vec<ActiveRun> = {
            let mut state = self.state.lock().await;
            if !state.monitor.is_current_outage(epoch) {
                return;
            }
            let lost = state.runs.lost();
            lost.iter()
                .filter_map(|key| {
                    let run = state.runs.remove(key)?;
                    state.checkpoints.remove(&run.task_id);
                    Some(run)
                })
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        warn!("Connection grace expired, failing {} runs", expired.len());
        let message = format!(
            "Connection timeout: gateway did not reconnect within {}s",
            self.config.connection_grace.as_secs()
        );
        for run in expired {
            self.finish_failed(run, Failure::Transport(message.clone())).await;
        }
    }

    async fn on_restored(&self) {
        let rearm = self.state.lock().await.runs.clear_lost();
        for key in &rearm {
            self.arm_timeout(key).await;
        }
        let purged = self.purge_orphans().await;
        let recovered = match self.recover().await {
            Ok(n) => n,
            Err(e) => {
                error!("Recovery after reconnect failed: {:#}", e);
                0
            }
        };
        info!(
            "Gateway connection restored ({} resumed, {} orphans purged, {} recovered)",
            rearm.len(),
            purged,
            recovered
        );
        self.record(ActivityEvent::new(
            ActivityKind::ConnectionRestored,
            format!(
                "Connection restored: {} runs resumed, {} orphans purged, {} tasks recovered",
                rearm.len(),
                purged,
                recovered
            ),
        ))
        .await;
        self.request_tick();
    }

    /// Drop runs whose task no longer points at them, and checkpoints
    /// without a run.
    async fn purge_orphans(&self) -> usize {
        let runs: Vec<ActiveRun> = self.state.lock().await.runs.iter().cloned().collect();
        let mut orphans = Vec::new();
        for run in runs {
            match self.storage.load_task(&run.task_id).await {
                Ok(Some(task)) => {
                    let pointed = task
                        .active_run_id
                        .as_ref()
                        .map_or(false, |id| run.answers_to(id));
                    if task.status.is_terminal() || !pointed {
                        orphans.push((run.key, task.id));
                    }
                }
                Ok(None) => orphans.push((run.key, run.task_id)),
                Err(e) => warn!("Could not check run {} for orphaning: {}", run.key, e),
            }
        }

        let purged = orphans.len();
        {
            let mut state = self.state.lock().await;
            for (key, _) in &orphans {
                if let Some(run) = state.runs.remove(key) {
                    state.checkpoints.remove(&run.task_id);
                }
            }
            let stray: Vec<TaskId> = state
                .checkpoints
                .task_ids()
                .into_iter()
                .filter(|id| state.runs.by_task(id).is_none())
                .collect();
            for id in stray {
                state.checkpoints.remove(&id);
            }
        }
        for (key, task_id) in orphans {
            info!("Purged orphan run {} for {}", key, task_id);
            let mut event =
                ActivityEvent::new(ActivityKind::OrphanPurged, format!("Purged orphan run {}", key));
            event.task_id = Some(task_id);
            self.record(event).await;
        }
        purged
    }

    /// Reset running tasks whose run is gone.
    ///
    /// Only missions owned by this engine or by nobody are touched. Returns
    /// the number of tasks reset.
    pub async fn recover(&self) -> anyhow::Result<usize> {
        let filter = TaskFilter {
            status: Some(vec![TaskStatus::InProgress, TaskStatus::Review]),
            ..Default::default()
        };
        let tasks = self.storage.list_tasks(&filter).await.context("loading running tasks")?;
        let missions: HashMap<MissionId, Mission> = self
            .storage
            .list_missions()
            .await
            .context("loading missions")?
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
        let tracked: HashSet<TaskId> = self
            .state
            .lock()
            .await
            .runs
            .iter()
            .map(|r| r.task_id.clone())
            .collect();

        let now = chrono::Utc::now();
        let mut recovered = 0;
        let mut touched = HashSet::new();
        for task in stale_tasks(&tasks, &tracked, now, self.config.stale_run_threshold) {
            let mission_id = task.mission_id();
            if let Some(mission) = missions.get(&mission_id) {
                if !self.claims.may_recover(mission) {
                    debug!("Skipping recovery of {}: mission held elsewhere", task.id);
                    continue;
                }
            }
            let patch = match task.status {
                TaskStatus::InProgress => TaskPatch::new().status(TaskStatus::Todo),
                _ => TaskPatch::new(),
            }
            .clear_run()
            .summary(RECOVERED_SUMMARY);
            self.storage
                .patch_task(&task.id, &patch)
                .await
                .with_context(|| format!("resetting {}", task.id))?;

            info!("Recovered {} ({})", task.id, task.status);
            self.record(
                ActivityEvent::new(
                    ActivityKind::TaskRecovered,
                    format!("Reset stale {} task", task.status),
                )
                .for_task(task),
            )
            .await;
            touched.insert(mission_id);
            recovered += 1;
        }
        for mission_id in touched {
            self.refresh_mission(&mission_id).await;
        }
        Ok(recovered)
    }

    /// Reconcile an external row change with local run state.
    ///
    /// A write newer than the run that makes the task terminal or points it
    /// at another run drops the local run.
    pub async fn reconcile(&self, change: ChangeEvent) {
        let ChangeEvent::Task(task) = change else {
            return;
        };
        let dropped = {
            let mut state = self.state.lock().await;
            let Some(run) = state.runs.by_task(&task.id) else {
                return;
            };
            if task.updated_at <= run.registered_at {
                return;
            }
            let foreign = task
                .active_run_id
                .as_ref()
                .map_or(false, |id| !run.answers_to(id));
            if !task.status.is_terminal() && !foreign {
                return;
            }
            let key = run.key.clone();
            state.runs.remove(&key);
            state.checkpoints.remove(&task.id);
            key
        };
        info!("Task {} changed externally, dropping run {}", task.id, dropped);
        if let Err(e) = self.gateway.abort(&dropped).await {
            debug!("Abort of {} failed: {}", dropped, e);
        }
    }

    /// (Re)start the local timeout of a run.
    pub(crate) async fn arm_timeout(&self, key: &RunId) {
        let epoch = {
            let mut state = self.state.lock().await;
            let Some(run) = state.runs.get_mut(key) else {
                return;
            };
            run.timeout_epoch += 1;
            run.timeout_epoch
        };
        self.spawn_timeout(key.clone(), epoch);
    }

    fn spawn_timeout(&self, key: RunId, epoch: u64) {
        let me = self.me.clone();
        let timeout = self.config.run_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(me) = me.upgrade() {
                me.on_run_timeout(key, epoch).await;
            }
        });
    }

    async fn on_run_timeout(&self, key: RunId, epoch: u64) {
        let run = {
            let mut state = self.state.lock().await;
            if state.monitor.is_lost() {
                debug!("Timeout of {} deferred while disconnected", key);
                return;
            }
            match state.runs.get(&key) {
                Some(run) if run.timeout_epoch == epoch => {}
                _ => return,
            }
            let Some(run) = state.runs.remove(&key) else {
                return;
            };
            state.checkpoints.remove(&run.task_id);
            run
        };

        warn!("Run {} for {} timed out", run.key, run.task_id);
        let mut event = ActivityEvent::new(
            ActivityKind::RunTimedOut,
            format!(
                "{} run timed out after {}s with {} chars of output",
                run.phase,
                self.config.run_timeout.as_secs(),
                run.output.chars().count()
            ),
        )
        .for_mission(&run.mission_id)
        .by_agent(Some(&run.agent_id));
        event.task_id = Some(run.task_id.clone());
        self.record(event).await;

        if run.output.trim().is_empty() {
            let message = format!(
                "Run timed out after {}s without output",
                self.config.run_timeout.as_secs()
            );
            self.finish_failed(run, Failure::Transport(message)).await;
        } else {
            let output = run.output.clone();
            self.finish_with_output(run, output).await;
        }
    }

    /// Re-derive and store a mission's aggregate status.
    pub(crate) async fn refresh_mission(&self, mission_id: &MissionId) {
        if let Err(e) = self.writer.refresh(self.storage.as_ref(), mission_id).await {
            warn!("Failed to refresh mission {}: {}", mission_id, e);
        }
    }

    /// Record an activity event. Advisory: failures are logged.
    pub(crate) async fn record(&self, event: ActivityEvent) {
        if let Err(e) = self.activity.record(&event).await {
            warn!("Failed to record {:?} activity: {}", event.kind, e);
        }
    }
}
