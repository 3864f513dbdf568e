//! In-flight run registry and per-agent quotas.

use std::collections::{HashMap, HashSet};
use chrono::NaiveDate;
use tokio::time::Instant;
use mission_core::{AgentId, MissionId, RunId, RunPhase, TaskId, Time};

/// A run this process launched and is still waiting on.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    /// Idempotency key sent with the request; the registry key
    pub key: RunId,
    /// Id the gateway assigned, if it differs
    pub gateway_run_id: Option<RunId>,
    /// Task being executed
    pub task_id: TaskId,
    /// Mission of the task
    pub mission_id: MissionId,
    /// Phase of the run
    pub phase: RunPhase,
    /// Executing agent
    pub agent_id: AgentId,
    /// Wall-clock registration time, compared against change-feed stamps
    pub registered_at: Time,
    /// Monotonic start time
    pub started: Instant,
    /// Streamed output, tail-capped
    pub buffer: String,
    /// Everything streamed so far, uncapped
    pub output: String,
    /// Set while the connection is lost
    pub connection_lost_at: Option<Instant>,
    /// Bumped whenever the local timeout is re-armed
    pub timeout_epoch: u64,
}

impl ActiveRun {
    /// A run about to be sent.
    pub fn new(
        task_id: TaskId,
        mission_id: MissionId,
        phase: RunPhase,
        agent_id: AgentId,
    ) -> Self {
        Self {
            key: RunId::new(),
            gateway_run_id: None,
            task_id,
            mission_id,
            phase,
            agent_id,
            registered_at: chrono::Utc::now(),
            started: Instant::now(),
            buffer: String::new(),
            output: String::new(),
            connection_lost_at: None,
            timeout_epoch: 0,
        }
    }

    /// Whether `id` refers to this run.
    pub fn answers_to(&self, id: &RunId) -> bool {
        &self.key == id || self.gateway_run_id.as_ref() == Some(id)
    }
}

/// Capacity-bounded set of in-flight runs, addressable by key or alias.
#[derive(Debug)]
pub struct RunRegistry {
    runs: HashMap<RunId, ActiveRun>,
    aliases: HashMap<RunId, RunId>,
    capacity: usize,
    thinking_cap: usize,
}

impl RunRegistry {
    /// Create a registry.
    pub fn new(capacity: usize, thinking_cap: usize) -> Self {
        Self {
            runs: HashMap::new(),
            aliases: HashMap::new(),
            capacity,
            thinking_cap,
        }
    }

    /// Whether another run fits in the budget.
    pub fn has_capacity(&self) -> bool {
        self.runs.len() < self.capacity
    }

    /// Number of in-flight runs.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Track a run.
    pub fn insert(&mut self, run: ActiveRun) {
        self.runs.insert(run.key.clone(), run);
    }

    /// Record the gateway's id for a run.
    pub fn alias(&mut self, gateway_id: RunId, key: &RunId) {
        if &gateway_id == key {
            return;
        }
        if let Some(run) = self.runs.get_mut(key) {
            run.gateway_run_id = Some(gateway_id.clone());
            self.aliases.insert(gateway_id, key.clone());
        }
    }

    /// Resolve a key or alias to the registry key.
    pub fn resolve(&self, id: &RunId) -> Option<RunId> {
        if self.runs.contains_key(id) {
            return Some(id.clone());
        }
        self.aliases.get(id).filter(|key| self.runs.contains_key(*key)).cloned()
    }

    /// Look up a run by key or alias.
    pub fn get(&self, id: &RunId) -> Option<&ActiveRun> {
        self.resolve(id).and_then(|key| self.runs.get(&key))
    }

    /// Mutable lookup by key or alias.
    pub fn get_mut(&mut self, id: &RunId) -> Option<&mut ActiveRun> {
        let key = self.resolve(id)?;
        self.runs.get_mut(&key)
    }

    /// Stop tracking a run.
    pub fn remove(&mut self, id: &RunId) -> Option<ActiveRun> {
        let key = self.resolve(id)?;
        let run = self.runs.remove(&key)?;
        if let Some(alias) = &run.gateway_run_id {
            self.aliases.remove(alias);
        }
        Some(run)
    }

    /// The run executing a task, if any.
    pub fn by_task(&self, task_id: &TaskId) -> Option<&ActiveRun> {
        self.runs.values().find(|r| &r.task_id == task_id)
    }

    /// Append streamed text, keeping at most the cap's worth of tail.
    pub fn append(&mut self, id: &RunId, text: &str) -> Option<String> {
        let cap = self.thinking_cap;
        let run = self.get_mut(id)?;
        run.output.push_str(text);
        run.buffer.push_str(text);
        let len = run.buffer.chars().count();
        if len > cap {
            run.buffer = run.buffer.chars().skip(len - cap).collect();
        }
        Some(run.buffer.clone())
    }

    /// All in-flight runs.
    pub fn iter(&self) -> impl Iterator<Item = &ActiveRun> {
        self.runs.values()
    }

    /// Mark every run as affected by a lost connection; returns their keys.
    pub fn mark_lost(&mut self, at: Instant) -> Vec<RunId> {
        self.runs
            .values_mut()
            .map(|run| {
                run.connection_lost_at.get_or_insert(at);
                run.key.clone()
            })
            .collect()
    }

    /// Clear lost-connection marks; returns the keys that were marked.
    pub fn clear_lost(&mut self) -> Vec<RunId> {
        self.runs
            .values_mut()
            .filter_map(|run| run.connection_lost_at.take().map(|_| run.key.clone()))
            .collect()
    }

    /// Keys of runs marked lost.
    pub fn lost(&self) -> Vec<RunId> {
        self.runs
            .values()
            .filter(|r| r.connection_lost_at.is_some())
            .map(|r| r.key.clone())
            .collect()
    }

    /// Distinct missions an agent currently has runs in.
    pub fn missions_for(&self, agent: &AgentId) -> HashSet<MissionId> {
        self.runs
            .values()
            .filter(|r| &r.agent_id == agent)
            .map(|r| r.mission_id.clone())
            .collect()
    }
}

/// Primary runs started per agent per UTC day.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    daily: HashMap<(AgentId, NaiveDate), u32>,
}

impl QuotaTracker {
    /// Count a primary start.
    pub fn record_start(&mut self, agent: &AgentId, at: Time) {
        let today = at.date_naive();
        self.daily.retain(|(_, day), _| *day >= today);
        *self.daily.entry((agent.clone(), at.date_naive())).or_insert(0) += 1;
    }

    /// Primary starts on the given day.
    pub fn started_on(&self, agent: &AgentId, at: Time) -> u32 {
        self.daily
            .get(&(agent.clone(), at.date_naive()))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(task: &str) -> ActiveRun {
        ActiveRun::new(
            TaskId::from(task),
            MissionId::from("m"),
            RunPhase::Primary,
            AgentId::from("a1"),
        )
    }

    #[test]
    fn capacity_is_enforced_by_caller_check() {
        let mut registry = RunRegistry::new(1, 100);
        assert!(registry.has_capacity());
        registry.insert(run("t1"));
        assert!(!registry.has_capacity());
    }

    #[test]
    fn aliases_resolve_and_are_dropped_with_run() {
        let mut registry = RunRegistry::new(4, 100);
        let r = run("t1");
        let key = r.key.clone();
        registry.insert(r);
        registry.alias(RunId::from("gw-1"), &key);

        assert_eq!(registry.resolve(&RunId::from("gw-1")), Some(key.clone()));
        assert_eq!(registry.get(&RunId::from("gw-1")).unwrap().task_id.as_str(), "t1");

        let removed = registry.remove(&RunId::from("gw-1")).unwrap();
        assert_eq!(removed.key, key);
        assert!(registry.resolve(&RunId::from("gw-1")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn buffer_keeps_tail() {
        let mut registry = RunRegistry::new(4, 5);
        let r = run("t1");
        let key = r.key.clone();
        registry.insert(r);
        registry.append(&key, "abc");
        let buffer = registry.append(&key, "défgh").unwrap();
        assert_eq!(buffer, "défgh");
        let buffer = registry.append(&key, "i").unwrap();
        assert_eq!(buffer, "éfghi");
        assert_eq!(registry.get(&key).unwrap().output, "abcdéfghi");
    }

    #[test]
    fn lost_marks_round_trip() {
        let mut registry = RunRegistry::new(4, 100);
        registry.insert(run("t1"));
        registry.insert(run("t2"));
        assert_eq!(registry.mark_lost(Instant::now()).len(), 2);
        assert_eq!(registry.lost().len(), 2);
        assert_eq!(registry.clear_lost().len(), 2);
        assert!(registry.lost().is_empty());
    }

    #[test]
    fn daily_quota_counts_per_day() {
        let mut quotas = QuotaTracker::default();
        let agent = AgentId::from("a1");
        let now = chrono::Utc::now();
        quotas.record_start(&agent, now);
        quotas.record_start(&agent, now);
        assert_eq!(quotas.started_on(&agent, now), 2);
        assert_eq!(quotas.started_on(&agent, now - chrono::Duration::days(1)), 0);
    }

    #[test]
    fn past_days_are_dropped_on_the_next_start() {
        let mut quotas = QuotaTracker::default();
        let agent = AgentId::from("a1");
        let other = AgentId::from("a2");
        let now = chrono::Utc::now();
        let yesterday = now - chrono::Duration::days(1);
        quotas.record_start(&agent, yesterday);
        quotas.record_start(&other, yesterday);
        assert_eq!(quotas.daily.len(), 2);

        quotas.record_start(&agent, now);
        assert_eq!(quotas.daily.len(), 1);
        assert_eq!(quotas.started_on(&agent, yesterday), 0);
        assert_eq!(quotas.started_on(&agent, now), 1);
    }
}
