//! Proof generation service used at task completion.

use std::sync::Arc;
use mission_core::Task;

use crate::block::{ProofAssessment, ProofBlock};
use crate::capture::{ChangeCapture, WorkTreeSnapshot};
use crate::extract::{extract_summary, extract_verification};
use crate::strategy::{KeywordClassifier, ProofStrategy};

/// Classifies tasks, snapshots the working tree and builds proof blocks.
#[derive(Clone)]
pub struct ProofService {
    strategy: Arc<dyn ProofStrategy>,
    capture: Option<Arc<dyn ChangeCapture>>,
}

impl ProofService {
    /// Service with the given strategy and no change capture.
    pub fn new(strategy: Arc<dyn ProofStrategy>) -> Self {
        Self {
            strategy,
            capture: None,
        }
    }

    /// Capture working-tree changes with `capture`.
    pub fn with_capture(mut self, capture: Arc<dyn ChangeCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Whether the task needs proof.
    pub fn requires_proof(&self, task: &Task) -> bool {
        self.strategy.requires_proof(task)
    }

    /// Snapshot taken when a primary run launches. Errors are logged.
    pub fn baseline(&self, task: &Task) -> Option<WorkTreeSnapshot> {
        if !self.requires_proof(task) {
            return None;
        }
        let capture = self.capture.as_ref()?;
        match capture.snapshot() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                tracing::warn!("Baseline snapshot failed for {}: {}", task.id, e);
                None
            }
        }
    }

    /// Build a proof block for the task, or `None` if it needs none.
    pub fn build(
        &self,
        task: &Task,
        output: &str,
        baseline: Option<&WorkTreeSnapshot>,
    ) -> Option<ProofBlock> {
        if !self.requires_proof(task) {
            return None;
        }

        let mut block = ProofBlock::new(true, self.strategy.is_analysis_only(task));
        block.verification = extract_verification(output);
        block.summary = extract_summary(output);

        if let (Some(capture), Some(baseline)) = (&self.capture, baseline) {
            match capture.snapshot() {
                Ok(now) => block.changed_files = baseline.changed_since(&now),
                Err(e) => tracing::warn!("Completion snapshot failed for {}: {}", task.id, e),
            }
        }
        Some(block)
    }

    /// Append proof to the output when the task needs it.
    ///
    /// Returns the final output and whether a block was attached.
    pub fn attach(
        &self,
        task: &Task,
        output: &str,
        baseline: Option<&WorkTreeSnapshot>,
    ) -> (String, bool) {
        match self.build(task, output, baseline) {
            Some(block) => {
                let attached = block.append_to(output);
                let changed = attached != output;
                (attached, changed)
            }
            None => (output.to_string(), false),
        }
    }

    /// Assess a task's stored output.
    pub fn assess(&self, task: &Task, output: &str) -> ProofAssessment {
        ProofBlock::assess(self.requires_proof(task), output)
    }
}

impl Default for ProofService {
    fn default() -> Self {
        Self::new(Arc::new(KeywordClassifier::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedCapture {
        snapshots: Mutex<Vec<WorkTreeSnapshot>>,
    }

    impl ChangeCapture for ScriptedCapture {
        fn snapshot(&self) -> crate::Result<WorkTreeSnapshot> {
            Ok(self.snapshots.lock().unwrap().remove(0))
        }
    }

    #[test]
    fn attaches_changed_files_and_verification() {
        let capture = Arc::new(ScriptedCapture {
            snapshots: Mutex::new(vec![
                WorkTreeSnapshot::default(),
                WorkTreeSnapshot::from_entries([("src/orders.rs".to_string(), 128)]),
            ]),
        });
        let service = ProofService::default().with_capture(capture);
        let task = Task::standalone("Implement orders endpoint");

        let baseline = service.baseline(&task);
        assert!(baseline.is_some());

        let output = "Added the endpoint.\n\n✓ cargo test passes";
        let (final_output, attached) = service.attach(&task, output, baseline.as_ref());
        assert!(attached);
        assert!(final_output.starts_with(output));

        let block = ProofBlock::find_last(&final_output).unwrap().unwrap();
        assert_eq!(block.changed_files, vec!["src/orders.rs".to_string()]);
        assert_eq!(block.verification, vec!["cargo test passes".to_string()]);
        assert_eq!(service.assess(&task, &final_output), ProofAssessment::Verified);
    }

    #[test]
    fn proof_without_change_capture_is_not_verified() {
        let service = ProofService::default();
        let task = Task::standalone("Implement orders endpoint");
        let (output, attached) = service.attach(&task, "✓ cargo test passes", None);
        assert!(attached);
        assert!(matches!(service.assess(&task, &output), ProofAssessment::Invalid(_)));
    }

    #[test]
    fn non_implementation_output_is_untouched() {
        let service = ProofService::default();
        let task = Task::standalone("Write release notes");
        let (output, attached) = service.attach(&task, "Notes", None);
        assert_eq!(output, "Notes");
        assert!(!attached);
        assert_eq!(service.assess(&task, &output), ProofAssessment::NotRequired);
    }
}
