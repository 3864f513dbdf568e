//! Engine configuration.

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};
use mission_core::TaskStatus;

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Which dependency statuses unblock a dependent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Only `done` satisfies a dependency
    #[default]
    DoneOnly,
    /// `done` or `failed` satisfies a dependency
    DoneOrFailed,
}

impl DependencyPolicy {
    /// Whether a dependency in `status` is satisfied.
    pub fn satisfies(self, status: TaskStatus) -> bool {
        match self {
            Self::DoneOnly => status == TaskStatus::Done,
            Self::DoneOrFailed => status.is_terminal(),
        }
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period of the scheduling tick
    pub tick_interval: Duration,
    /// Global budget of in-flight runs
    pub max_concurrent_runs: usize,
    /// Local timeout for a run
    pub run_timeout: Duration,
    /// How long a lost connection may last before runs fail
    pub connection_grace: Duration,
    /// Idle time after which an untracked running task is reclaimed
    pub stale_run_threshold: Duration,
    /// Thinking buffer cap in characters (tail kept)
    pub thinking_char_cap: usize,
    /// Connection drops a checkpoint tolerates
    pub max_connection_drops: u32,
    /// Dependency terminality
    pub dependency_policy: DependencyPolicy,
    /// Prefix stamped on this engine's claims
    pub claim_prefix: String,
    /// Identifies this engine process in claims
    pub instance_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            max_concurrent_runs: 4,
            run_timeout: Duration::from_secs(120),
            connection_grace: Duration::from_secs(300),
            stale_run_threshold: Duration::from_secs(120),
            thinking_char_cap: 4000,
            max_connection_drops: 3,
            dependency_policy: DependencyPolicy::DoneOnly,
            claim_prefix: "engine".to_string(),
            instance_id: ulid::Ulid::new().to_string().to_lowercase(),
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tick period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the run budget.
    pub fn with_max_concurrent_runs(mut self, max: usize) -> Self {
        self.max_concurrent_runs = max;
        self
    }

    /// Set the local run timeout.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Set the connection grace period.
    pub fn with_connection_grace(mut self, grace: Duration) -> Self {
        self.connection_grace = grace;
        self
    }

    /// Set the dependency policy.
    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    /// Set the thinking buffer cap.
    pub fn with_thinking_char_cap(mut self, cap: usize) -> Self {
        self.thinking_char_cap = cap;
        self
    }

    /// Set the claim identity.
    pub fn with_identity(mut self, prefix: impl Into<String>, instance: impl Into<String>) -> Self {
        self.claim_prefix = prefix.into();
        self.instance_id = instance.into();
        self
    }
}

/// File form of [`EngineConfig`]. Durations are whole seconds; every field
/// is optional and falls back to the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Tick period in seconds
    pub tick_interval_secs: Option<u64>,
    /// Run budget
    pub max_concurrent_runs: Option<usize>,
    /// Run timeout in seconds
    pub run_timeout_secs: Option<u64>,
    /// Connection grace in seconds
    pub connection_grace_secs: Option<u64>,
    /// Stale-run threshold in seconds
    pub stale_run_threshold_secs: Option<u64>,
    /// Thinking buffer cap
    pub thinking_char_cap: Option<usize>,
    /// Tolerated connection drops
    pub max_connection_drops: Option<u32>,
    /// Dependency terminality
    pub dependency_policy: Option<DependencyPolicy>,
    /// Claim prefix
    pub claim_prefix: Option<String>,
    /// Instance id
    pub instance_id: Option<String>,
}

impl EngineSettings {
    /// Load settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Overlay the settings onto `config` and validate the result.
    pub fn apply(&self, mut config: EngineConfig) -> Result<EngineConfig, ConfigError> {
        if let Some(v) = self.tick_interval_secs {
            config.tick_interval = Duration::from_secs(v);
        }
        if let Some(v) = self.max_concurrent_runs {
            config.max_concurrent_runs = v;
        }
        if let Some(v) = self.run_timeout_secs {
            config.run_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.connection_grace_secs {
            config.connection_grace = Duration::from_secs(v);
        }
        if let Some(v) = self.stale_run_threshold_secs {
            config.stale_run_threshold = Duration::from_secs(v);
        }
        if let Some(v) = self.thinking_char_cap {
            config.thinking_char_cap = v;
        }
        if let Some(v) = self.max_connection_drops {
            config.max_connection_drops = v;
        }
        if let Some(v) = self.dependency_policy {
            config.dependency_policy = v;
        }
        if let Some(v) = &self.claim_prefix {
            config.claim_prefix = v.clone();
        }
        if let Some(v) = &self.instance_id {
            config.instance_id = v.clone();
        }

        if config.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid("max_concurrent_runs must be at least 1".into()));
        }
        if config.tick_interval.is_zero() {
            return Err(ConfigError::Invalid("tick_interval_secs must be at least 1".into()));
        }
        if config.thinking_char_cap == 0 {
            return Err(ConfigError::Invalid("thinking_char_cap must be at least 1".into()));
        }
        if config.claim_prefix.is_empty() || config.claim_prefix.contains(':') {
            return Err(ConfigError::Invalid("claim_prefix must be non-empty without ':'".into()));
        }
        if config.instance_id.is_empty() || config.instance_id.contains(':') {
            return Err(ConfigError::Invalid("instance_id must be non-empty without ':'".into()));
        }
        Ok(config)
    }
}
