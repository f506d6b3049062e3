//! Trait seams for the pipeline's external collaborators.
//!
//! Every suspension point in the pipeline sits behind one of these traits:
//! the question pool, the attempt history, assessment persistence, summary
//! persistence, and the reasoning boundary. The sqlx-backed implementations
//! live in [`crate::store`]; tests substitute in-memory or scripted fakes.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │               GenerationPipeline                 │
//! │  scope → candidates → payload → reasoning → mat. │
//! └───┬──────────┬─────────────────┬───────────┬─────┘
//!     ▼          ▼                 ▼           ▼
//! HistoryStore QuestionStore ReasoningClient AssessmentStore
//! ```

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    AttemptRecord, CandidateItem, GeneratedAssessment, PerformanceSummary, QuestionDetail,
    ScopeFilter,
};

/// Read access to the question pool.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Return up to `limit` candidate projections matching the filter.
    /// Dimensions with empty id lists do not constrain the query; a fully
    /// unconstrained filter returns from the entire pool.
    ///
    /// The result order must be deterministic for a given store state so
    /// repeated requests compile identical payloads.
    async fn find_candidates(&self, filter: &ScopeFilter, limit: usize)
        -> Result<Vec<CandidateItem>>;

    /// Fetch full detail for the given question ids. Ids that do not exist
    /// are simply absent from the result; the caller decides whether that
    /// is tolerable.
    async fn get_details(&self, ids: &[i64]) -> Result<Vec<QuestionDetail>>;
}

/// Read access to the learner's completed-attempt history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The learner's most recent completed attempts, newest first.
    async fn recent_attempts(&self, learner_id: i64, count: usize) -> Result<Vec<AttemptRecord>>;

    /// The learner's most recent completed attempts for one subject
    /// (or across all subjects when `subject_id` is `None`), newest first.
    async fn attempts_for_subject(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
        count: usize,
    ) -> Result<Vec<AttemptRecord>>;
}

/// Write access for generated assessments.
#[async_trait]
pub trait AssessmentStore: Send + Sync {
    /// Persist the assessment row and its ordered item associations as a
    /// single atomic unit. On error nothing is observable — no orphaned
    /// assessment row, no dangling associations.
    async fn persist(&self, assessment: &GeneratedAssessment) -> Result<()>;
}

/// Read/write access for rolling performance summaries.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Load the summary for a (learner, optional subject) key, if one has
    /// been computed before.
    async fn load(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
    ) -> Result<Option<PerformanceSummary>>;

    /// Create or replace the summary for its (learner, subject) key.
    async fn upsert(&self, summary: &PerformanceSummary) -> Result<()>;
}

/// The reasoning boundary: one request/response exchange carrying the
/// compiled instruction document.
///
/// Implementations carry their own hard timeout and must not retry; the
/// pipeline treats a timeout identically to any other boundary failure.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Send the instruction document and return the raw response text.
    /// Parsing into a structured selection happens in
    /// [`crate::reasoning::parse_selection`].
    async fn complete(&self, document: &str) -> Result<String>;
}
