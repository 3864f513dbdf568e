//! Working-tree change capture.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use git2::{Repository, StatusOptions};

use crate::Result;

/// Status of every dirty path in a working tree at one moment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkTreeSnapshot {
    entries: BTreeMap<String, u32>,
}

impl WorkTreeSnapshot {
    /// Build a snapshot from path/status pairs.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, u32)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Paths whose status differs between `self` (the baseline) and `later`.
    pub fn changed_since(&self, later: &WorkTreeSnapshot) -> Vec<String> {
        let mut changed: Vec<String> = later
            .entries
            .iter()
            .filter(|(path, status)| self.entries.get(*path) != Some(*status))
            .map(|(path, _)| path.clone())
            .collect();
        // Reverted paths disappear from the later snapshot.
        changed.extend(
            self.entries
                .keys()
                .filter(|path| !later.entries.contains_key(*path))
                .cloned(),
        );
        changed.sort();
        changed
    }

    /// Number of dirty paths.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tree was clean.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Takes snapshots of a working tree.
pub trait ChangeCapture: Send + Sync {
    /// Snapshot the current state.
    fn snapshot(&self) -> Result<WorkTreeSnapshot>;
}

/// Change capture backed by libgit2 statuses.
pub struct GitChangeCapture {
    path: PathBuf,
}

impl GitChangeCapture {
    /// Capture changes in the repository containing `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl ChangeCapture for GitChangeCapture {
    fn snapshot(&self) -> Result<WorkTreeSnapshot> {
        let repo = Repository::discover(&self.path)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = repo.statuses(Some(&mut opts))?;
        let entries = statuses
            .iter()
            .filter_map(|entry| entry.path().map(|p| (p.to_string(), entry.status().bits())))
            .collect::<Vec<_>>();
        tracing::debug!("Captured {} dirty paths in {}", entries.len(), self.path.display());
        Ok(WorkTreeSnapshot::from_entries(entries))
    }
}
