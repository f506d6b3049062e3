//! Scope resolution: which slice of the question pool is in play.
//!
//! For subject and grade, explicit caller input always wins; otherwise the
//! most frequent value across the learner's recent attempts is auto-detected.
//! Chapter and lesson are never auto-detected — they constrain the query only
//! when the caller supplies them. If neither explicit input nor history
//! yields a subject or grade, resolution fails with a typed
//! unresolved-scope error instead of guessing.

use std::collections::HashMap;

use crate::error::GenerateError;
use crate::models::{GenerationRequest, ScopeDimension, ScopeFilter, ScopeOrigin};
use crate::traits::HistoryStore;

/// Resolve the effective scope filter for one generation request.
///
/// Consults the history store only when at least one auto-detectable
/// dimension (subject, grade) was left unspecified.
pub async fn resolve_scope(
    history: &dyn HistoryStore,
    request: &GenerationRequest,
) -> Result<ScopeFilter, GenerateError> {
    let mut filter = ScopeFilter {
        chapter_ids: request.chapter_ids.clone(),
        lesson_ids: request.lesson_ids.clone(),
        difficulty: request.difficulty,
        ..Default::default()
    };

    let needs_detection = request.subject_ids.is_empty() || request.grade_ids.is_empty();
    let attempts = if needs_detection {
        history
            .recent_attempts(request.learner_id, request.history_window)
            .await?
    } else {
        Vec::new()
    };

    if !request.subject_ids.is_empty() {
        filter.subject_ids = request.subject_ids.clone();
        filter.subject_origin = Some(ScopeOrigin::Explicit);
    } else if let Some(subject) = most_frequent(attempts.iter().filter_map(|a| a.subject_id)) {
        filter.subject_ids = vec![subject];
        filter.subject_origin = Some(ScopeOrigin::Detected);
    } else {
        return Err(GenerateError::UnresolvedScope(ScopeDimension::Subject));
    }

    if !request.grade_ids.is_empty() {
        filter.grade_ids = request.grade_ids.clone();
        filter.grade_origin = Some(ScopeOrigin::Explicit);
    } else if let Some(grade) = most_frequent(attempts.iter().filter_map(|a| a.grade_id)) {
        filter.grade_ids = vec![grade];
        filter.grade_origin = Some(ScopeOrigin::Detected);
    } else {
        return Err(GenerateError::UnresolvedScope(ScopeDimension::Grade));
    }

    Ok(filter)
}

/// Most frequent id in the iterator; ties break toward the smaller id so
/// detection is deterministic.
fn most_frequent(ids: impl IntoIterator<Item = i64>) -> Option<i64> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for id in ids {
        *counts.entry(id).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by(|(id_a, count_a), (id_b, count_b)| count_a.cmp(count_b).then(id_b.cmp(id_a)))
        .map(|(id, _)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttemptRecord, GenerationMode};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct FixedHistory {
        attempts: Vec<AttemptRecord>,
    }

    #[async_trait]
    impl HistoryStore for FixedHistory {
        async fn recent_attempts(
            &self,
            _learner_id: i64,
            count: usize,
        ) -> Result<Vec<AttemptRecord>> {
            Ok(self.attempts.iter().take(count).cloned().collect())
        }

        async fn attempts_for_subject(
            &self,
            _learner_id: i64,
            _subject_id: Option<i64>,
            count: usize,
        ) -> Result<Vec<AttemptRecord>> {
            Ok(self.attempts.iter().take(count).cloned().collect())
        }
    }

    fn attempt(subject: Option<i64>, grade: Option<i64>) -> AttemptRecord {
        AttemptRecord {
            id: 0,
            learner_id: 1,
            subject_id: subject,
            grade_id: grade,
            chapter_id: None,
            lesson_id: None,
            score: 70.0,
            correct_count: 7,
            incorrect_count: 3,
            time_taken_secs: 300,
            topics: BTreeMap::new(),
            completed_at: Utc::now(),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            learner_id: 1,
            desired_count: 10,
            mode: GenerationMode::Review,
            history_window: 10,
            subject_ids: vec![],
            grade_ids: vec![],
            chapter_ids: vec![],
            lesson_ids: vec![],
            difficulty: None,
        }
    }

    #[test]
    fn test_most_frequent_empty() {
        assert_eq!(most_frequent([]), None);
    }

    #[test]
    fn test_most_frequent_picks_majority() {
        assert_eq!(most_frequent([2, 3, 3, 2, 3]), Some(3));
    }

    #[test]
    fn test_most_frequent_tie_breaks_low() {
        assert_eq!(most_frequent([5, 2, 5, 2]), Some(2));
    }

    #[tokio::test]
    async fn test_explicit_filters_used_verbatim() {
        // Auto-detection must never override explicit input
        let history = FixedHistory {
            attempts: vec![attempt(Some(9), Some(9)); 5],
        };
        let mut req = request();
        req.subject_ids = vec![1, 2];
        req.grade_ids = vec![4];

        let filter = resolve_scope(&history, &req).await.unwrap();
        assert_eq!(filter.subject_ids, vec![1, 2]);
        assert_eq!(filter.grade_ids, vec![4]);
        assert_eq!(filter.subject_origin, Some(ScopeOrigin::Explicit));
        assert_eq!(filter.grade_origin, Some(ScopeOrigin::Explicit));
    }

    #[tokio::test]
    async fn test_detects_most_frequent_subject_and_grade() {
        let history = FixedHistory {
            attempts: vec![
                attempt(Some(3), Some(2)),
                attempt(Some(3), Some(2)),
                attempt(Some(7), Some(1)),
            ],
        };

        let filter = resolve_scope(&history, &request()).await.unwrap();
        assert_eq!(filter.subject_ids, vec![3]);
        assert_eq!(filter.grade_ids, vec![2]);
        assert_eq!(filter.subject_origin, Some(ScopeOrigin::Detected));
        assert_eq!(filter.grade_origin, Some(ScopeOrigin::Detected));
    }

    #[tokio::test]
    async fn test_unresolved_subject_without_history() {
        let history = FixedHistory { attempts: vec![] };

        let err = resolve_scope(&history, &request()).await.unwrap_err();
        match err {
            GenerateError::UnresolvedScope(dimension) => {
                assert_eq!(dimension, ScopeDimension::Subject)
            }
            other => panic!("expected UnresolvedScope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unresolved_grade_when_history_lacks_grades() {
        let history = FixedHistory {
            attempts: vec![attempt(Some(3), None), attempt(Some(3), None)],
        };

        let err = resolve_scope(&history, &request()).await.unwrap_err();
        match err {
            GenerateError::UnresolvedScope(dimension) => {
                assert_eq!(dimension, ScopeDimension::Grade)
            }
            other => panic!("expected UnresolvedScope, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chapter_and_lesson_never_detected() {
        let mut chaptered = attempt(Some(3), Some(2));
        chaptered.chapter_id = Some(11);
        chaptered.lesson_id = Some(21);
        let history = FixedHistory {
            attempts: vec![chaptered; 4],
        };

        let filter = resolve_scope(&history, &request()).await.unwrap();
        assert!(filter.chapter_ids.is_empty());
        assert!(filter.lesson_ids.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_chapter_and_lesson_pass_through() {
        let history = FixedHistory {
            attempts: vec![attempt(Some(3), Some(2))],
        };
        let mut req = request();
        req.chapter_ids = vec![11];
        req.lesson_ids = vec![21, 22];

        let filter = resolve_scope(&history, &req).await.unwrap();
        assert_eq!(filter.chapter_ids, vec![11]);
        assert_eq!(filter.lesson_ids, vec![21, 22]);
    }
}
