//! Connection-quality tracking and stale-run detection.

use std::collections::HashSet;
use std::time::Duration;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use mission_core::{Task, TaskId};

use crate::gateway::ConnectionQuality;

/// What a quality report changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTransition {
    /// The connection just went down; `epoch` identifies this outage
    Lost {
        /// Outage counter, checked when the grace timer fires
        epoch: u64,
    },
    /// The connection came back after an outage
    Restored,
    /// Nothing that affects runs
    Unchanged,
}

/// Tracks gateway connection quality across outages.
#[derive(Debug)]
pub struct ConnectionMonitor {
    quality: ConnectionQuality,
    lost_since: Option<Instant>,
    epoch: u64,
}

impl ConnectionMonitor {
    /// A monitor that starts connected.
    pub fn new() -> Self {
        Self {
            quality: ConnectionQuality::Good,
            lost_since: None,
            epoch: 0,
        }
    }

    /// Current quality.
    pub fn quality(&self) -> ConnectionQuality {
        self.quality
    }

    /// Whether the connection is down.
    pub fn is_lost(&self) -> bool {
        self.quality == ConnectionQuality::Lost
    }

    /// When the current outage began.
    pub fn lost_since(&self) -> Option<Instant> {
        self.lost_since
    }

    /// Whether `epoch` is still the ongoing outage.
    pub fn is_current_outage(&self, epoch: u64) -> bool {
        self.is_lost() && self.epoch == epoch
    }

    /// Apply a quality report.
    pub fn report(&mut self, quality: ConnectionQuality, now: Instant) -> QualityTransition {
        let was_lost = self.is_lost();
        self.quality = quality;
        match (was_lost, quality) {
            (false, ConnectionQuality::Lost) => {
                self.epoch += 1;
                self.lost_since = Some(now);
                QualityTransition::Lost { epoch: self.epoch }
            }
            (true, ConnectionQuality::Good | ConnectionQuality::Degraded) => {
                self.lost_since = None;
                QualityTransition::Restored
            }
            _ => QualityTransition::Unchanged,
        }
    }

    /// An explicit reconnect; always ends an outage.
    pub fn reconnected(&mut self) -> QualityTransition {
        let was_lost = self.is_lost();
        self.quality = ConnectionQuality::Good;
        self.lost_since = None;
        if was_lost {
            QualityTransition::Restored
        } else {
            QualityTransition::Unchanged
        }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Running tasks whose run is gone.
///
/// A task is stale when it is `in_progress` without a run id, or when its run
/// is not tracked here and it has been idle longer than `threshold`. Tasks in
/// `review` without a run are simply waiting for a reviewer and are skipped.
pub fn stale_tasks<'a>(
    tasks: impl IntoIterator<Item = &'a Task>,
    tracked: &HashSet<TaskId>,
    now: DateTime<Utc>,
    threshold: Duration,
) -> Vec<&'a Task> {
    let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
    tasks
        .into_iter()
        .filter(|t| t.status.is_running() && !t.is_superseded())
        .filter(|t| !tracked.contains(&t.id))
        .filter(|t| match &t.active_run_id {
            None => t.status == mission_core::TaskStatus::InProgress,
            Some(_) => now - t.updated_at > threshold,
        })
        .collect()
}
