//! JSON file storage implementation.
//!
//! Stores each row as a JSON file under a data directory and keeps small
//! per-object meta markers (version + updated_at). Approvals are written one
//! file per request; activity is appended to a daily JSON-lines file.
//!
//! Row writes from every process sharing the directory serialize on an
//! exclusive-create lockfile. A mission claim also compares the meta version
//! it read against the one on disk before writing. Writes made by other
//! processes reach [`Storage::subscribe`] through [`JsonStorage::poll_changes`]
//! or the task started by [`JsonStorage::spawn_watcher`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use async_trait::async_trait;
use mission_core::{
    ActivityEvent, AgentId, AgentProfile, ApprovalRequest, ClaimRequest, Mission, MissionId,
    MissionPatch, Task, TaskFilter, TaskId, TaskPatch,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::task::JoinHandle;

use crate::change::{ChangeEvent, ChangeFeed};
use crate::sinks::{ActivitySink, ApprovalSink};
use crate::trait_::{Result, Storage, StorageError};

const LOCK_FILE: &str = "store.lock";
const LOCK_RETRY: Duration = Duration::from_millis(10);
const LOCK_WAIT: Duration = Duration::from_secs(5);
/// A lockfile older than this belongs to a process that died mid-write.
const STALE_LOCK: Duration = Duration::from_secs(30);

/// Kinds whose rows are published on the change feed.
const WATCHED: [&str; 2] = ["tasks", "missions"];

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
    feed: ChangeFeed,
    /// Last meta version seen per `kind/id`, own writes included.
    seen: StdMutex<HashMap<String, u64>>,
}

/// Held for the duration of one row write. Removes the lockfile on drop.
struct WriteGuard<'a> {
    path: PathBuf,
    _local: MutexGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Releasing store lock {} failed: {}", self.path.display(), e);
        }
    }
}

impl JsonStorage {
    /// Create storage, creating the data and meta directories if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        for dir in ["tasks", "missions", "agents", "approvals", "activity"] {
            fs::create_dir_all(root.join(dir)).await?;
        }
        for kind in ["tasks", "missions", "agents"] {
            fs::create_dir_all(root.join("meta").join(kind)).await?;
        }

        let storage = Self {
            root,
            write_lock: Mutex::new(()),
            feed: ChangeFeed::new(),
            seen: StdMutex::new(HashMap::new()),
        };
        // Rows already on disk are not changes.
        for kind in WATCHED {
            for (id, version) in storage.versions(kind).await? {
                storage.mark_seen(kind, &id, version);
            }
        }
        Ok(storage)
    }

    /// Data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_path(&self, id: &TaskId) -> PathBuf {
        self.root.join("tasks").join(format!("{}.json", id))
    }
    fn mission_path(&self, id: &MissionId) -> PathBuf {
        self.root.join("missions").join(format!("{}.json", id))
    }
    fn agent_path(&self, id: &AgentId) -> PathBuf {
        self.root.join("agents").join(format!("{}.json", id))
    }

    fn meta_path(&self, kind: &str, id: &str) -> PathBuf {
        self.root.join("meta").join(kind).join(format!("{}.meta.json", id))
    }

    /// Take the in-process mutex, then the directory lockfile.
    async fn lock(&self) -> Result<WriteGuard<'_>> {
        let local = self.write_lock.lock().await;
        let path = self.root.join(LOCK_FILE);
        let deadline = tokio::time::Instant::now() + LOCK_WAIT;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let payload = format!(
                        "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    file.write_all(payload.as_bytes()).await?;
                    return Ok(WriteGuard { path, _local: local });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await && fs::remove_file(&path).await.is_ok() {
                        tracing::warn!("Removed stale store lock {}", path.display());
                        continue;
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(StorageError::Conflict(format!(
                            "store lock {} is held by another process",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn version(&self, kind: &str, id: &str) -> u64 {
        let Ok(s) = fs::read_to_string(self.meta_path(kind, id)).await else {
            return 0;
        };
        serde_json::from_str::<serde_json::Value>(&s)
            .ok()
            .and_then(|json| json.get("version").and_then(|v| v.as_u64()))
            .unwrap_or(0)
    }

    /// Meta versions of every row of one kind.
    async fn versions(&self, kind: &str) -> Result<Vec<(String, u64)>> {
        let mut out = Vec::new();
        let mut rd = fs::read_dir(self.root.join("meta").join(kind)).await?;
        while let Some(entry) = rd.next_entry().await? {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".meta.json")) else {
                continue;
            };
            let version = self.version(kind, id).await;
            out.push((id.to_string(), version));
        }
        Ok(out)
    }

    fn mark_seen(&self, kind: &str, id: &str, version: u64) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = seen.entry(format!("{}/{}", kind, id)).or_insert(0);
        if version > *entry {
            *entry = version;
            true
        } else {
            false
        }
    }

    /// Read and increment per-object version, return new version.
    async fn bump_version(&self, kind: &str, id: &str) -> Result<u64> {
        let version = self.version(kind, id).await + 1;
        let meta = serde_json::json!({"version": version, "updated_at": chrono::Utc::now()});
        write_json(&self.meta_path(kind, id), &meta).await?;
        self.mark_seen(kind, id, version);
        Ok(version)
    }

    async fn write_task(&self, task: &Task) -> Result<()> {
        write_json(&self.task_path(&task.id), task).await?;
        self.bump_version("tasks", task.id.as_str()).await?;
        Ok(())
    }

    async fn write_mission(&self, mission: &Mission) -> Result<()> {
        write_json(&self.mission_path(&mission.id), mission).await?;
        self.bump_version("missions", mission.id.as_str()).await?;
        Ok(())
    }

    /// Publish rows whose meta version moved since this instance last saw
    /// them. Returns how many changes were published.
    pub async fn poll_changes(&self) -> Result<usize> {
        let mut published = 0;
        for kind in WATCHED {
            for (id, version) in self.versions(kind).await? {
                if !self.mark_seen(kind, &id, version) {
                    continue;
                }
                if kind == "tasks" {
                    let path = self.task_path(&TaskId::from(id));
                    if let Some(task) = read_json::<Task>(&path).await? {
                        self.feed.task(&task);
                        published += 1;
                    }
                } else {
                    let path = self.mission_path(&MissionId::from(id));
                    if let Some(mission) = read_json::<Mission>(&path).await? {
                        self.feed.mission(&mission);
                        published += 1;
                    }
                }
            }
        }
        if published > 0 {
            tracing::debug!("Published {} external row changes", published);
        }
        Ok(published)
    }

    /// Poll for external changes every `interval` until the storage is dropped.
    pub fn spawn_watcher(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let storage = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(storage) = storage.upgrade() else {
                    break;
                };
                if let Err(e) = storage.poll_changes().await {
                    tracing::warn!("Polling {} for changes failed: {}", storage.root.display(), e);
                }
            }
        })
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|at| at.elapsed().ok())
        .is_some_and(|age| age > STALE_LOCK)
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save_task(&self, task: &Task) -> Result<()> {
        let _guard = self.lock().await?;
        self.write_task(task).await?;
        self.feed.task(task);
        Ok(())
    }

    async fn load_task(&self, id: &TaskId) -> Result<Option<Task>> {
        read_json(&self.task_path(id)).await
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = list_dir(&self.root.join("tasks"))
            .await?
            .into_iter()
            .filter(|t| filter.matches(t))
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    async fn patch_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        let _guard = self.lock().await?;
        let mut task: Task = read_json(&self.task_path(id))
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("task {}", id)))?;
        patch.apply(&mut task, chrono::Utc::now());
        self.write_task(&task).await?;
        self.feed.task(&task);
        Ok(task)
    }

    async fn save_mission(&self, mission: &Mission) -> Result<()> {
        let _guard = self.lock().await?;
        self.write_mission(mission).await?;
        self.feed.mission(mission);
        Ok(())
    }

    async fn load_mission(&self, id: &MissionId) -> Result<Option<Mission>> {
        read_json(&self.mission_path(id)).await
    }

    async fn list_missions(&self) -> Result<Vec<Mission>> {
        let mut missions: Vec<Mission> = list_dir(&self.root.join("missions")).await?;
        missions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(missions)
    }

    async fn patch_mission(&self, id: &MissionId, patch: &MissionPatch) -> Result<Mission> {
        let _guard = self.lock().await?;
        let mut mission: Mission = read_json(&self.mission_path(id))
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("mission {}", id)))?;
        patch.apply(&mut mission, chrono::Utc::now());
        self.write_mission(&mission).await?;
        self.feed.mission(&mission);
        Ok(mission)
    }

    async fn claim_mission(&self, id: &MissionId, claim: &ClaimRequest) -> Result<Option<Mission>> {
        let _guard = self.lock().await?;
        let read_at = self.version("missions", id.as_str()).await;
        let Some(mut mission) = read_json::<Mission>(&self.mission_path(id)).await? else {
            return Ok(None);
        };
        if !claim.guard_holds(&mission) {
            return Ok(None);
        }
        if self.version("missions", id.as_str()).await != read_at {
            tracing::debug!("Mission {} changed during claim", id);
            return Ok(None);
        }
        claim.apply(&mut mission, chrono::Utc::now());
        self.write_mission(&mission).await?;
        self.feed.mission(&mission);
        Ok(Some(mission))
    }

    async fn save_agent(&self, agent: &AgentProfile) -> Result<()> {
        let _guard = self.lock().await?;
        write_json(&self.agent_path(&agent.id), agent).await?;
        self.bump_version("agents", agent.id.as_str()).await?;
        Ok(())
    }

    async fn load_agent(&self, id: &AgentId) -> Result<Option<AgentProfile>> {
        read_json(&self.agent_path(id)).await
    }

    async fn list_agents(&self) -> Result<Vec<AgentProfile>> {
        let mut agents: Vec<AgentProfile> = list_dir(&self.root.join("agents")).await?;
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }
}

#[async_trait]
impl ApprovalSink for JsonStorage {
    async fn request_approval(&self, request: &ApprovalRequest) -> Result<()> {
        let path = self
            .root
            .join("approvals")
            .join(format!("{}-{}.json", request.task_id, ulid::Ulid::new()));
        write_json(&path, request).await
    }
}

#[async_trait]
impl ActivitySink for JsonStorage {
    async fn record(&self, event: &ActivityEvent) -> Result<()> {
        let path = self
            .root
            .join("activity")
            .join(format!("{}.jsonl", event.created_at.format("%Y-%m-%d")));
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Write through a temp file so readers never see a torn row.
async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json.as_bytes()).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = fs::read_dir(dir).await?;
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping unreadable row {}: {}", entry.path().display(), e),
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mission_core::{ActivityKind, AgentLevel, ApprovalGate, MissionStatus, SessionKey, TaskStatus};
    use tempfile::TempDir;

    async fn storage() -> (TempDir, JsonStorage) {
        let dir = TempDir::new().unwrap();
        let storage = JsonStorage::new(dir.path()).await.unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn task_round_trips_through_files() {
        let (_dir, storage) = storage().await;
        let task = Task::standalone("Write docs").with_agent("writer");
        storage.save_task(&task).await.unwrap();

        let loaded = storage.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded, task);
        assert!(storage.load_task(&TaskId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn patch_bumps_meta_version() {
        let (dir, storage) = storage().await;
        let task = Task::standalone("t");
        storage.save_task(&task).await.unwrap();
        storage
            .patch_task(&task.id, &TaskPatch::new().status(TaskStatus::Done))
            .await
            .unwrap();

        let meta_path = dir
            .path()
            .join("meta")
            .join("tasks")
            .join(format!("{}.meta.json", task.id));
        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta["version"], 2);

        let loaded = storage.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Done);
    }

    #[tokio::test]
    async fn claim_applies_once() {
        let (_dir, storage) = storage().await;
        let mission = Mission::new(MissionId::from("m1"), "M");
        storage.save_mission(&mission).await.unwrap();

        let first = ClaimRequest::new(SessionKey::mint("engine", "a"));
        let second = ClaimRequest::new(SessionKey::mint("engine", "b"));
        let won = storage.claim_mission(&mission.id, &first).await.unwrap();
        let lost = storage.claim_mission(&mission.id, &second).await.unwrap();

        assert_eq!(won.unwrap().status, MissionStatus::InProgress);
        assert!(lost.is_none());
        let stored = storage.load_mission(&mission.id).await.unwrap().unwrap();
        assert_eq!(stored.session_key, Some(first.session_key));
    }

    #[tokio::test]
    async fn claim_is_exclusive_across_instances() {
        let dir = TempDir::new().unwrap();
        let a = JsonStorage::new(dir.path()).await.unwrap();
        let b = JsonStorage::new(dir.path()).await.unwrap();
        let mission = Mission::new(MissionId::from("m1"), "M");
        a.save_mission(&mission).await.unwrap();

        let first = ClaimRequest::new(SessionKey::mint("engine", "a"));
        let second = ClaimRequest::new(SessionKey::mint("engine", "b"));
        let (won_a, won_b) = tokio::join!(
            a.claim_mission(&mission.id, &first),
            b.claim_mission(&mission.id, &second)
        );
        let winners = [won_a.unwrap(), won_b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();

        assert_eq!(winners, 1);
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    #[tokio::test]
    async fn writes_wait_for_a_foreign_lockfile() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(JsonStorage::new(dir.path()).await.unwrap());
        let mission = Mission::new(MissionId::from("m1"), "M");
        storage.save_mission(&mission).await.unwrap();
        std::fs::write(dir.path().join(LOCK_FILE), b"{}").unwrap();

        let claimer = {
            let storage = storage.clone();
            let id = mission.id.clone();
            tokio::spawn(async move {
                let claim = ClaimRequest::new(SessionKey::mint("engine", "a"));
                storage.claim_mission(&id, &claim).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!claimer.is_finished());

        std::fs::remove_file(dir.path().join(LOCK_FILE)).unwrap();
        let won = claimer.await.unwrap().unwrap();
        assert!(won.is_some());
    }

    #[tokio::test]
    async fn poll_publishes_writes_from_other_instances() {
        let dir = TempDir::new().unwrap();
        let a = JsonStorage::new(dir.path()).await.unwrap();
        let b = JsonStorage::new(dir.path()).await.unwrap();
        let mut rx = a.subscribe();

        let own = Task::standalone("mine");
        a.save_task(&own).await.unwrap();
        assert!(matches!(rx.recv().await.unwrap(), ChangeEvent::Task(t) if t.id == own.id));
        assert_eq!(a.poll_changes().await.unwrap(), 0);

        let foreign = Task::standalone("theirs");
        b.save_task(&foreign).await.unwrap();
        assert_eq!(a.poll_changes().await.unwrap(), 1);
        assert!(matches!(rx.recv().await.unwrap(), ChangeEvent::Task(t) if t.id == foreign.id));
        assert_eq!(a.poll_changes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rows_present_at_open_are_not_changes() {
        let dir = TempDir::new().unwrap();
        let writer = JsonStorage::new(dir.path()).await.unwrap();
        writer.save_task(&Task::standalone("old")).await.unwrap();

        let reader = JsonStorage::new(dir.path()).await.unwrap();
        assert_eq!(reader.poll_changes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sinks_write_files() {
        let (dir, storage) = storage().await;
        let task = Task::standalone("t").with_agent("a1");
        let request = ApprovalRequest {
            task_id: task.id.clone(),
            mission_id: task.mission_id(),
            agent_id: AgentId::from("a1"),
            agent_level: AgentLevel::new(1),
            reason: "L1 needs approval".into(),
            approval_gate: ApprovalGate::HumanRequired,
            escalation_agent_id: None,
            requested_at: chrono::Utc::now(),
        };
        storage.request_approval(&request).await.unwrap();
        storage
            .record(&ActivityEvent::new(ActivityKind::TaskStarted, "started").for_task(&task))
            .await
            .unwrap();
        storage
            .record(&ActivityEvent::new(ActivityKind::TaskCompleted, "done").for_task(&task))
            .await
            .unwrap();

        let approvals = std::fs::read_dir(dir.path().join("approvals")).unwrap().count();
        assert_eq!(approvals, 1);

        let activity_file = std::fs::read_dir(dir.path().join("activity"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let lines = std::fs::read_to_string(activity_file).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }
}
