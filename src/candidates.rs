//! Candidate selection with an explicit two-attempt fallback.
//!
//! Attempt 1 queries with the full resolved scope, auto-detected values
//! included. If that yields nothing, exactly one fallback runs with the
//! caller's originally explicit subject/grade values only — auto-detected
//! values and the narrowing chapter/lesson/difficulty constraints are
//! discarded, because an over-constrained scope (say, a chapter that no
//! longer has questions) is the usual reason attempt 1 comes up empty. A
//! caller who supplied no explicit subject or grade at all falls back to the
//! entire unfiltered pool as a deliberate last resort.
//!
//! The selector never errors on an empty result; the pipeline decides that
//! an empty pool after both attempts is fatal.

use tracing::debug;

use crate::error::GenerateError;
use crate::models::{CandidateItem, GenerationRequest, ScopeFilter, ScopeOrigin};
use crate::traits::QuestionStore;

/// Absolute caps on the candidate pool, trading instruction-payload size
/// against selection diversity.
const POOL_FLOOR_CAP: usize = 100;
const POOL_CEILING_CAP: usize = 150;

/// Which of the two attempts produced the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchAttempt {
    /// Attempt 1: full resolved scope, auto-detected values included.
    FullScope,
    /// Attempt 2: explicit subject/grade only (or unfiltered if none).
    ExplicitOnly,
}

/// Candidate list plus which attempt produced it, for diagnostics and tests.
#[derive(Debug)]
pub struct CandidateOutcome {
    pub candidates: Vec<CandidateItem>,
    pub attempt: SearchAttempt,
}

/// Candidate pool bounds for a desired item count: keep at least
/// `min(2N, 100)` and at most `min(3N, 150)`, capped by what exists.
pub fn pool_bounds(desired_count: usize) -> (usize, usize) {
    (
        (desired_count * 2).min(POOL_FLOOR_CAP),
        (desired_count * 3).min(POOL_CEILING_CAP),
    )
}

/// Rebuild the filter from the caller's explicit subject/grade values only.
/// Empty when the caller supplied neither, which queries the whole pool.
fn explicit_fallback_filter(request: &GenerationRequest) -> ScopeFilter {
    let mut filter = ScopeFilter::default();
    if !request.subject_ids.is_empty() {
        filter.subject_ids = request.subject_ids.clone();
        filter.subject_origin = Some(ScopeOrigin::Explicit);
    }
    if !request.grade_ids.is_empty() {
        filter.grade_ids = request.grade_ids.clone();
        filter.grade_origin = Some(ScopeOrigin::Explicit);
    }
    filter
}

/// Run the two-attempt candidate search for a resolved scope.
pub async fn select_candidates(
    store: &dyn QuestionStore,
    scope: &ScopeFilter,
    request: &GenerationRequest,
) -> Result<CandidateOutcome, GenerateError> {
    let (floor, ceiling) = pool_bounds(request.desired_count);

    let first = store.find_candidates(scope, ceiling).await?;
    let outcome = if !first.is_empty() {
        CandidateOutcome {
            candidates: first,
            attempt: SearchAttempt::FullScope,
        }
    } else {
        let fallback = explicit_fallback_filter(request);
        debug!(
            unconstrained = fallback.is_unconstrained(),
            "scope yielded no candidates, retrying with explicit filters only"
        );
        let second = store.find_candidates(&fallback, ceiling).await?;
        CandidateOutcome {
            candidates: second,
            attempt: SearchAttempt::ExplicitOnly,
        }
    };

    // The floor is advisory, capped by what exists: a thin pool narrows the
    // boundary's choices but is not an error.
    if outcome.candidates.len() < floor {
        debug!(
            count = outcome.candidates.len(),
            floor, "candidate pool below sizing floor"
        );
    }

    Ok(outcome)
}
