//! Per-task lifecycle: gates, launches, review outcomes and failures.

use std::collections::{HashMap, HashSet};

use anyhow::Context;
use tracing::{debug, info, warn};

use mission_core::{
    ActivityEvent, ActivityKind, AgentId, AgentProfile, ApprovalRequest, CircuitBreaker, Mission,
    MissionId, ReviewAction, ReviewHistoryEntry, RunCheckpoint, RunPhase, Task, TaskFilter,
    TaskPatch, TaskStatus,
};
use mission_guardrails::{Action, PermissionCheck, PermissionResult};
use mission_progress::{MissionIndex, MissionView};

use crate::claim::ClaimOutcome;
use crate::dependency::{Resolution, TaskMap};
use crate::engine::{Failure, Launch, Orchestrator};
use crate::gateway::SendRequest;
use crate::prompt;
use crate::review::{parse_review_decision, ReviewDecision};
use crate::runs::ActiveRun;

type Result<T> = anyhow::Result<T>;

impl Orchestrator {
    /// Run the primary-phase gates in order and launch if all pass.
    pub(crate) async fn start_primary(
        &self,
        task: &Task,
        all: &TaskMap,
        index: &MissionIndex,
        missions: &mut HashMap<MissionId, Mission>,
        claim_lost: &mut HashSet<MissionId>,
    ) -> Result<Launch> {
        let mission = self.ensure_mission(task, index, missions).await?;

        if !mission.is_lifecycle_ready() {
            let reason = format!(
                "Mission lifecycle not ready (phase {}, status {})",
                mission.mission_phase.as_deref().unwrap_or("-"),
                mission.mission_phase_status.as_deref().unwrap_or("-")
            );
            return self.block(task, reason, false).await;
        }

        // A lost claim leaves the rows to their owner.
        if claim_lost.contains(&mission.id) {
            return Ok(Launch::Blocked);
        }
        match self.claims.acquire(self.storage.as_ref(), &mission).await? {
            ClaimOutcome::Owned(_) => {}
            ClaimOutcome::Claimed(claimed) => {
                self.record(
                    ActivityEvent::new(
                        ActivityKind::MissionClaimed,
                        format!("Claimed mission {}", claimed.title),
                    )
                    .for_mission(&claimed.id),
                )
                .await;
                missions.insert(claimed.id.clone(), claimed);
            }
            ClaimOutcome::Lost(reason) => {
                debug!("Skipping {}: {}", task.id, reason);
                claim_lost.insert(mission.id.clone());
                self.record(ActivityEvent::new(ActivityKind::ClaimLost, reason).for_mission(&mission.id))
                    .await;
                return Ok(Launch::Blocked);
            }
        }

        match self.resolver.check(task, all) {
            Resolution::Ready => {}
            Resolution::Blocked(ids) => {
                let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
                let reason = format!("Waiting on dependencies: {}", ids.join(", "));
                return self.block(task, reason, true).await;
            }
            Resolution::Circular(path) => {
                let path: Vec<&str> = path.iter().map(|id| id.as_str()).collect();
                let reason = format!("Circular dependency: {}", path.join(" -> "));
                return self.block(task, reason, true).await;
            }
        }

        let Some(agent_id) = task.executing_agent().cloned() else {
            return self.block(task, "No agent assigned".to_string(), true).await;
        };
        let Some(profile) = self.agent_profile(&agent_id).await? else {
            return self.block(task, format!("Unknown agent {}", agent_id), true).await;
        };

        let check = self
            .permissions
            .check(&profile, Action::TaskExecute, &task.domains);
        match check.result {
            PermissionResult::Allow => {}
            PermissionResult::Deny => {
                let reason = format!("Permission denied: {}", check.reason);
                return self.block(task, reason, true).await;
            }
            PermissionResult::ApprovalRequired | PermissionResult::Draft => {
                if !task.approval_granted {
                    self.request_approval(task, &profile, Action::TaskExecute, &check)
                        .await;
                    let reason = format!("Awaiting approval: {}", check.reason);
                    return self.block(task, reason, true).await;
                }
            }
        }

        if let Some(reason) = self.quota_exceeded(&profile, &mission.id).await {
            return self.block(task, reason, true).await;
        }

        self.launch(task, RunPhase::Primary, &agent_id, prompt::primary(task))
            .await
    }

    /// Mission row for the task, created for legacy groups that lack one.
    async fn ensure_mission(
        &self,
        task: &Task,
        index: &MissionIndex,
        missions: &mut HashMap<MissionId, Mission>,
    ) -> Result<Mission> {
        let id = task.mission_id();
        if let Some(mission) = missions.get(&id) {
            return Ok(mission.clone());
        }

        let _guard = self.writer.lock(&id).await;
        let mission = match self.storage.load_mission(&id).await? {
            Some(mission) => mission,
            None => {
                let title = index
                    .get(&id)
                    .and_then(|view| view.tasks.iter().find(|t| t.is_root()))
                    .map(|root| root.title.clone())
                    .unwrap_or_else(|| task.title.clone());
                let mission = Mission::new(id.clone(), title);
                self.storage
                    .save_mission(&mission)
                    .await
                    .with_context(|| format!("creating mission {}", id))?;
                info!("Created mission row {} for existing tasks", id);
                mission
            }
        };
        missions.insert(id, mission.clone());
        Ok(mission)
    }

    async fn quota_exceeded(&self, profile: &AgentProfile, mission_id: &MissionId) -> Option<String> {
        let guardrails = profile.guardrails.as_ref()?;
        let state = self.state.lock().await;

        if let Some(max) = guardrails.max_concurrent_missions {
            let active = state.runs.missions_for(&profile.id);
            if !active.contains(mission_id) && active.len() >= max as usize {
                return Some(format!(
                    "Agent {} is at its limit of {} concurrent missions",
                    profile.id, max
                ));
            }
        }
        if let Some(max) = guardrails.max_daily_tasks {
            if state.quotas.started_on(&profile.id, chrono::Utc::now()) >= max {
                return Some(format!(
                    "Agent {} reached its daily limit of {} tasks",
                    profile.id, max
                ));
            }
        }
        None
    }

    /// Mark a task blocked. Writes only when status or reason changed.
    async fn block(&self, task: &Task, reason: String, refresh: bool) -> Result<Launch> {
        let unchanged =
            task.status == TaskStatus::Blocked && task.active_summary.as_deref() == Some(reason.as_str());
        if unchanged {
            return Ok(Launch::Blocked);
        }

        debug!("Blocking {}: {}", task.id, reason);
        let patch = TaskPatch::new()
            .status(TaskStatus::Blocked)
            .summary(reason.clone());
        self.storage
            .patch_task(&task.id, &patch)
            .await
            .with_context(|| format!("blocking {}", task.id))?;

        if task.status != TaskStatus::Blocked {
            self.record(
                ActivityEvent::new(ActivityKind::TaskBlocked, reason)
                    .for_task(task)
                    .by_agent(task.executing_agent()),
            )
            .await;
            if refresh {
                self.refresh_mission(&task.mission_id()).await;
            }
        }
        Ok(Launch::Blocked)
    }

    /// Set the diagnostic summary if it changed.
    async fn note(&self, task: &Task, summary: String) -> Result<()> {
        if task.active_summary.as_deref() == Some(summary.as_str()) {
            return Ok(());
        }
        debug!("{}: {}", task.id, summary);
        self.storage
            .patch_task(&task.id, &TaskPatch::new().summary(summary))
            .await?;
        Ok(())
    }

    async fn agent_profile(&self, id: &AgentId) -> Result<Option<AgentProfile>> {
        if let Some(profile) = self.state.lock().await.agents.get(id) {
            return Ok(Some(profile.clone()));
        }
        let profile = self.storage.load_agent(id).await?;
        if let Some(profile) = &profile {
            self.state
                .lock()
                .await
                .agents
                .insert(profile.id.clone(), profile.clone());
        }
        Ok(profile)
    }

    /// Send one approval request per task and action.
    async fn request_approval(
        &self,
        task: &Task,
        profile: &AgentProfile,
        action: Action,
        check: &PermissionCheck,
    ) {
        let key = (task.id.clone(), action);
        if !self.state.lock().await.approvals_requested.insert(key.clone()) {
            return;
        }

        let request = ApprovalRequest {
            task_id: task.id.clone(),
            mission_id: task.mission_id(),
            agent_id: profile.id.clone(),
            agent_level: profile.level,
            reason: format!("{}: {}", action, check.reason),
            approval_gate: check.approval_gate,
            escalation_agent_id: profile
                .guardrails
                .as_ref()
                .and_then(|g| g.escalation_agent_id.clone()),
            requested_at: chrono::Utc::now(),
        };
        if let Err(e) = self.approvals.request_approval(&request).await {
            warn!("Approval request for {} failed: {}", task.id, e);
            self.state.lock().await.approvals_requested.remove(&key);
            return;
        }
        info!("Requested approval for {} ({} by {})", task.id, action, profile.id);
        self.record(
            ActivityEvent::new(ActivityKind::ApprovalRequested, request.reason.clone())
                .for_task(task)
                .by_agent(Some(&profile.id)),
        )
        .await;
    }

    /// Register, persist and send a run.
    async fn launch(
        &self,
        task: &Task,
        phase: RunPhase,
        agent_id: &AgentId,
        message: String,
    ) -> Result<Launch> {
        let mission_id = task.mission_id();

        let baseline = if phase == RunPhase::Primary && self.proof.requires_proof(task) {
            let proof = self.proof.clone();
            let snapshot_task = task.clone();
            match tokio::task::spawn_blocking(move || proof.baseline(&snapshot_task)).await {
                Ok(baseline) => baseline,
                Err(e) => {
                    warn!("Baseline snapshot for {} panicked: {}", task.id, e);
                    None
                }
            }
        } else {
            None
        };

        let run = ActiveRun::new(task.id.clone(), mission_id.clone(), phase, agent_id.clone());
        let key = run.key.clone();
        {
            let mut state = self.state.lock().await;
            if !state.runs.has_capacity() {
                return Ok(Launch::Deferred);
            }
            state.runs.insert(run);
            state.checkpoints.create(RunCheckpoint::new(
                task.id.clone(),
                phase,
                agent_id.clone(),
                message.clone(),
            ));
            if phase == RunPhase::Primary {
                state.quotas.record_start(agent_id, chrono::Utc::now());
                match baseline {
                    Some(snapshot) => state.baselines.insert(task.id.clone(), snapshot),
                    None => state.baselines.remove(&task.id),
                };
            }
        }

        let status = match phase {
            RunPhase::Primary => TaskStatus::InProgress,
            RunPhase::Review => TaskStatus::Review,
        };
        let mut patch = TaskPatch::new()
            .status(status)
            .run(key.clone(), phase)
            .clear_summary();
        if phase == RunPhase::Primary {
            patch = patch.started_at(chrono::Utc::now()).clear_error();
        }
        if let Err(e) = self.storage.patch_task(&task.id, &patch).await {
            self.take_run(&key).await;
            return Err(e).with_context(|| format!("marking {} started", task.id));
        }

        let request = SendRequest {
            session_key: prompt::session_key(agent_id, &mission_id),
            message,
            idempotency_key: key.clone(),
        };
        match self.gateway.send(request).await {
            Ok(ack) => {
                if let Some(run_id) = ack.run_id {
                    self.state.lock().await.runs.alias(run_id, &key);
                }
            }
            Err(e) => {
                warn!("Send for {} failed: {}", task.id, e);
                if let Some(run) = self.take_run(&key).await {
                    self.finish_failed(run, Failure::Transport(format!("Send failed: {}", e)))
                        .await;
                }
                return Ok(Launch::Failed);
            }
        }
        self.arm_timeout(&key).await;

        let kind = match phase {
            RunPhase::Primary => ActivityKind::TaskStarted,
            RunPhase::Review => ActivityKind::ReviewStarted,
        };
        info!("Started {} run {} for {} ({})", phase, key, task.id, agent_id);
        self.record(
            ActivityEvent::new(kind, format!("{} run started: {}", phase, task.title))
                .for_task(task)
                .by_agent(Some(agent_id)),
        )
        .await;
        if phase == RunPhase::Primary {
            self.refresh_mission(&mission_id).await;
        }
        Ok(Launch::Started)
    }

    /// Launch the review phase, or leave the task waiting in `review`.
    pub(crate) async fn start_review(&self, task: &Task) -> Result<Launch> {
        let Some(reviewer) = task.review_agent_id.clone() else {
            return Ok(Launch::Deferred);
        };
        let Some(profile) = self.agent_profile(&reviewer).await? else {
            self.note(task, format!("Unknown reviewer {}", reviewer)).await?;
            return Ok(Launch::Deferred);
        };

        let check = self
            .permissions
            .check(&profile, Action::TaskReview, &task.domains);
        match check.result {
            PermissionResult::Allow => {}
            PermissionResult::Deny => {
                let summary = format!("Reviewer {} may not review: {}", reviewer, check.reason);
                self.note(task, summary).await?;
                return Ok(Launch::Deferred);
            }
            PermissionResult::ApprovalRequired | PermissionResult::Draft => {
                if !task.approval_granted {
                    self.request_approval(task, &profile, Action::TaskReview, &check)
                        .await;
                    self.note(task, format!("Awaiting review approval: {}", check.reason))
                        .await?;
                    return Ok(Launch::Deferred);
                }
            }
        }

        self.launch(task, RunPhase::Review, &reviewer, prompt::review(task))
            .await
    }

    /// Resolve a run that produced output.
    pub(crate) async fn finish_with_output(&self, run: ActiveRun, output: String) {
        let task_id = run.task_id.clone();
        let result = match run.phase {
            RunPhase::Primary => self.on_primary_final(run, output).await,
            RunPhase::Review => self.on_review_final(run, output).await,
        };
        if let Err(e) = result {
            warn!("Finishing run for {} failed: {:#}", task_id, e);
        }
    }

    /// Resolve a run that failed.
    pub(crate) async fn finish_failed(&self, run: ActiveRun, failure: Failure) {
        let result = match self.current_task(&run).await {
            Ok(Some(task)) => self.fail_task(&task, failure).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("Failing {} failed: {:#}", run.task_id, e);
        }
    }

    /// The run's task, unless it already ended or moved to another run.
    async fn current_task(&self, run: &ActiveRun) -> Result<Option<Task>> {
        let Some(task) = self.storage.load_task(&run.task_id).await? else {
            warn!("Run {} finished for missing task {}", run.key, run.task_id);
            return Ok(None);
        };
        if task.status.is_terminal() {
            debug!("Run {} finished for {} task {}", run.key, task.status, task.id);
            return Ok(None);
        }
        if let Some(id) = &task.active_run_id {
            if !run.answers_to(id) {
                debug!("Task {} moved to run {}, ignoring {}", task.id, id, run.key);
                return Ok(None);
            }
        }
        Ok(Some(task))
    }

    async fn on_primary_final(&self, run: ActiveRun, output: String) -> Result<()> {
        let Some(task) = self.current_task(&run).await? else {
            return Ok(());
        };
        info!(
            "Primary run for {} finished with {} chars",
            task.id,
            output.chars().count()
        );

        if !(task.review_enabled && task.review_agent_id.is_some()) {
            return self.complete_task(&task, output).await;
        }

        let patch = TaskPatch::new()
            .status(TaskStatus::Review)
            .output_text(output)
            .clear_run();
        let task = self
            .storage
            .patch_task(&task.id, &patch)
            .await
            .with_context(|| format!("moving {} to review", task.id))?;
        self.refresh_mission(&task.mission_id()).await;

        if self.start_review(&task).await? != Launch::Started {
            debug!("Review of {} waits for a later tick", task.id);
        }
        Ok(())
    }

    async fn on_review_final(&self, run: ActiveRun, output: String) -> Result<()> {
        let Some(task) = self.current_task(&run).await? else {
            return Ok(());
        };

        let mut decision = parse_review_decision(&output);
        if decision.action == ReviewAction::Approve {
            if let Some(threshold) = self.auto_review_threshold(&task).await? {
                if decision.confidence < threshold {
                    info!(
                        "Approval of {} at {:.2} is below threshold {:.2}, revising",
                        task.id, decision.confidence, threshold
                    );
                    let confidence = decision.confidence;
                    decision.action = ReviewAction::Revise;
                    decision.new_instructions.get_or_insert_with(|| {
                        format!(
                            "Reviewer confidence {:.2} is below the required {:.2}; address the review and resubmit.",
                            confidence, threshold
                        )
                    });
                }
            }
        }
        debug!("Review of {}: {} via {:?}", task.id, decision.action, decision.source);

        let mut history = task.review_history.clone();
        history.push(ReviewHistoryEntry {
            round: task.revision_round,
            action: decision.action,
            summary: decision.summary.clone(),
            confidence_score: decision.confidence,
            specific_issues: decision.specific_issues.clone(),
            new_instructions: decision.new_instructions.clone(),
            reviewer_agent_id: run.agent_id.clone(),
            reviewed_at: chrono::Utc::now(),
        });
        let patch = TaskPatch::new()
            .review_notes(output)
            .review_history(history)
            .clear_run();
        let task = self
            .storage
            .patch_task(&task.id, &patch)
            .await
            .with_context(|| format!("recording review of {}", task.id))?;

        match decision.action {
            ReviewAction::Approve => {
                self.record(
                    ActivityEvent::new(ActivityKind::ReviewApproved, decision.summary.clone())
                        .for_task(&task)
                        .by_agent(Some(&run.agent_id)),
                )
                .await;
                let output = task.output_text.clone().unwrap_or_default();
                self.complete_task(&task, output).await
            }
            ReviewAction::Redo => self.supersede(&task, &decision).await,
            ReviewAction::Revise => {
                if task.max_revisions > 0 && task.revision_round >= task.max_revisions {
                    let message = format!(
                        "Revision limit reached: {} of {} revisions used",
                        task.revision_round, task.max_revisions
                    );
                    self.record(
                        ActivityEvent::new(ActivityKind::RevisionLimitReached, message.clone())
                            .for_task(&task),
                    )
                    .await;
                    self.fail_task(&task, Failure::Policy(message)).await
                } else {
                    self.supersede(&task, &decision).await
                }
            }
        }
    }

    async fn auto_review_threshold(&self, task: &Task) -> Result<Option<f32>> {
        let Some(agent) = task.executing_agent() else {
            return Ok(None);
        };
        Ok(self
            .agent_profile(agent)
            .await?
            .and_then(|p| p.guardrails)
            .and_then(|g| g.auto_review_threshold))
    }

    /// Replace a reviewed task with a follow-up and mark it superseded.
    async fn supersede(&self, task: &Task, decision: &ReviewDecision) -> Result<()> {
        let mut next = Task::new(&task.mission_id(), task.title.clone());
        next.description = task.description.clone();
        next.max_revisions = task.max_revisions;
        next.review_enabled = task.review_enabled;
        next.review_agent_id = task.review_agent_id.clone();
        next.primary_agent_id = task.primary_agent_id.clone();
        next.assignees = task.assignees.clone();
        next.domains = task.domains.clone();
        next.input_media = task.input_media.clone();
        next.due_at = task.due_at;
        next.parent_task_id = Some(task.id.clone());
        next.review_history = task.review_history.clone();
        next.input_text = prompt::follow_up_input(task, decision);

        let (kind, label) = match decision.action {
            ReviewAction::Redo => {
                next.revision_round = 0;
                if let Some(agent) = &decision.reassign_to {
                    next.primary_agent_id = Some(agent.clone());
                }
                (ActivityKind::ReviewRedo, "redo")
            }
            _ => {
                next.revision_round = task.revision_round + 1;
                next.dependency_task_ids = task.dependency_task_ids.clone();
                (ActivityKind::ReviewRevised, "revision")
            }
        };

        self.storage
            .save_task(&next)
            .await
            .with_context(|| format!("creating {} of {}", label, task.id))?;
        let patch = TaskPatch::new()
            .status(TaskStatus::Failed)
            .linked_revision(next.id.clone())
            .error(format!("Superseded by {} {}", label, next.id))
            .completed_at(chrono::Utc::now());
        self.storage
            .patch_task(&task.id, &patch)
            .await
            .with_context(|| format!("superseding {}", task.id))?;
        self.forget(task).await;

        info!(
            "Task {} superseded by {} {} (round {})",
            task.id, label, next.id, next.revision_round
        );
        self.record(
            ActivityEvent::new(
                kind,
                format!("Spawned {} {} at round {}", label, next.id, next.revision_round),
            )
            .for_task(task)
            .by_agent(task.review_agent_id.as_ref()),
        )
        .await;
        self.refresh_mission(&task.mission_id()).await;
        self.request_tick();
        Ok(())
    }

    /// Attach proof and mark the task done.
    async fn complete_task(&self, task: &Task, output: String) -> Result<()> {
        let baseline = self.state.lock().await.baselines.remove(&task.id);
        let (output, attached) = if self.proof.requires_proof(task) {
            let proof = self.proof.clone();
            let proof_task = task.clone();
            let fallback = output.clone();
            match tokio::task::spawn_blocking(move || {
                proof.attach(&proof_task, &output, baseline.as_ref())
            })
            .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!("Proof generation for {} panicked: {}", task.id, e);
                    (fallback, false)
                }
            }
        } else {
            (output, false)
        };

        let patch = TaskPatch::new()
            .status(TaskStatus::Done)
            .output_text(output)
            .clear_run()
            .clear_summary()
            .clear_error()
            .completed_at(chrono::Utc::now());
        let task = self
            .storage
            .patch_task(&task.id, &patch)
            .await
            .with_context(|| format!("completing {}", task.id))?;
        self.forget(&task).await;

        info!("Task {} done", task.id);
        self.record(
            ActivityEvent::new(ActivityKind::TaskCompleted, task.title.clone())
                .for_task(&task)
                .by_agent(task.executing_agent()),
        )
        .await;
        if attached {
            self.record(
                ActivityEvent::new(ActivityKind::ProofAttached, "Completion proof attached")
                    .for_task(&task),
            )
            .await;
        }
        self.refresh_mission(&task.mission_id()).await;
        self.request_tick();
        Ok(())
    }

    /// Mark the task failed and apply the mission's circuit breaker.
    async fn fail_task(&self, task: &Task, failure: Failure) -> Result<()> {
        let message = failure.message().to_string();
        let patch = TaskPatch::new()
            .status(TaskStatus::Failed)
            .error(message.clone())
            .clear_run()
            .completed_at(chrono::Utc::now());
        let task = self
            .storage
            .patch_task(&task.id, &patch)
            .await
            .with_context(|| format!("failing {}", task.id))?;
        {
            let mut state = self.state.lock().await;
            state.checkpoints.remove(&task.id);
        }
        self.forget(&task).await;

        match &failure {
            Failure::Transport(_) => warn!("Task {} failed: {}", task.id, message),
            Failure::Policy(_) => info!("Task {} stopped: {}", task.id, message),
        }
        self.record(
            ActivityEvent::new(ActivityKind::TaskFailed, message.clone())
                .for_task(&task)
                .by_agent(task.executing_agent()),
        )
        .await;

        if let Err(e) = self.trip_breaker(&task, &message).await {
            warn!("Circuit breaker for {} failed: {:#}", task.id, e);
        }
        self.refresh_mission(&task.mission_id()).await;
        self.request_tick();
        Ok(())
    }

    /// Force-fail pending siblings per the mission's policy. Not recursive.
    async fn trip_breaker(&self, failed: &Task, message: &str) -> Result<()> {
        let mission_id = failed.mission_id();
        let Some(mission) = self.storage.load_mission(&mission_id).await? else {
            return Ok(());
        };
        let scope = match mission.circuit_breaker {
            CircuitBreaker::Continue => return Ok(()),
            CircuitBreaker::StopPhase => "stop_phase",
            CircuitBreaker::StopMission => "stop_mission",
        };

        let tasks = self
            .storage
            .list_tasks(&TaskFilter::mission(&mission_id))
            .await?;
        let view = MissionView::new(mission_id.clone(), tasks);
        let targets: Vec<&Task> = view
            .live_tasks()
            .filter(|t| t.id != failed.id)
            .filter(|t| matches!(t.status, TaskStatus::Todo | TaskStatus::Blocked))
            .filter(|t| {
                mission.circuit_breaker == CircuitBreaker::StopMission
                    || t.parent_task_id == failed.parent_task_id
            })
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let reason = format!(
            "Circuit breaker ({}): {} failed: {}",
            scope, failed.title, message
        );
        let patch = TaskPatch::new()
            .status(TaskStatus::Failed)
            .error(reason.clone())
            .completed_at(chrono::Utc::now());
        for target in &targets {
            self.storage
                .patch_task(&target.id, &patch)
                .await
                .with_context(|| format!("stopping {}", target.id))?;
        }

        warn!(
            "Circuit breaker ({}) stopped {} tasks in mission {}",
            scope,
            targets.len(),
            mission_id
        );
        self.record(
            ActivityEvent::new(
                ActivityKind::CircuitBreaker,
                format!("{}: stopped {} tasks", reason, targets.len()),
            )
            .for_task(failed),
        )
        .await;
        Ok(())
    }

    /// Drop per-task bookkeeping once a task leaves the pipeline.
    async fn forget(&self, task: &Task) {
        let mut state = self.state.lock().await;
        state.baselines.remove(&task.id);
        state.approvals_requested.retain(|(id, _)| id != &task.id);
    }
}
