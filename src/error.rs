//! Typed failure taxonomy for the generation pipeline.
//!
//! Stages 1–4 (scope resolution, candidate selection, payload compilation,
//! reasoning call) fail fast and abort the pipeline. Stage 5
//! (materialization) distinguishes recoverable partial loss — dropped
//! selection ids, reported in metadata — from fatal loss (zero resolved ids
//! or a persistence error). Analytics failures never surface here; they are
//! logged and the previous summary stays in place.

use thiserror::Error;

use crate::models::ScopeDimension;

/// Everything that can abort a generation request.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Neither explicit filters nor attempt history yielded a usable value
    /// for the named dimension. No partial generation is attempted.
    #[error("no {0} could be resolved from explicit filters or learner history")]
    UnresolvedScope(ScopeDimension),

    /// Both candidate-selection attempts returned zero questions.
    #[error("no questions match the requested scope")]
    EmptyCandidatePool,

    /// The reasoning boundary timed out, returned an empty or malformed
    /// response, or named zero selections. Never retried automatically.
    #[error("reasoning boundary failed: {0}")]
    ReasoningBoundary(String),

    /// The reasoning boundary answered, but none of the ids it named exist
    /// in the question store.
    #[error("none of the selected question ids could be resolved")]
    NoUsableSelections,

    /// Writing the assessment and its item associations failed. The write
    /// is atomic, so no partial assessment is left behind.
    #[error("failed to persist the generated assessment")]
    Persistence(#[source] anyhow::Error),

    /// A history or question store query failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
