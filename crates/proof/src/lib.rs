//! Completion proof for implementation tasks.
//!
//! A task classified as implementation work gets a structured proof block
//! appended to its output: the files that changed while it ran, the
//! verification steps its agent reported, and a short summary. The block can
//! later be assessed from the stored output alone.

#![warn(missing_docs)]

pub mod strategy;
pub mod capture;
pub mod extract;
pub mod block;
pub mod service;

pub use strategy::{KeywordClassifier, ProofStrategy};
pub use capture::{ChangeCapture, GitChangeCapture, WorkTreeSnapshot};
pub use extract::{extract_summary, extract_verification};
pub use block::{ProofAssessment, ProofBlock};
pub use service::ProofService;

/// Errors from proof generation.
#[derive(Debug, thiserror::Error)]
pub enum ProofError {
    /// libgit2 failure
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for proof operations.
pub type Result<T> = std::result::Result<T, ProofError>;
