//! Result materialization: from parsed selection to persisted assessment.
//!
//! Every selected id is validated against the question store. Ids that fail
//! to resolve are dropped with a recorded drop-out count — recoverable as
//! long as at least one id resolves; zero resolved ids is fatal. Duplicate
//! ids resolve once and count as drop-outs after the first occurrence.
//! Distribution metadata is computed purely from the resolved items, and the
//! assessment row plus its ordered item associations are written as one
//! atomic unit: on any persistence error the caller receives a failure with
//! no assessment id and nothing observable in the store.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::GenerateError;
use crate::models::{
    AssessmentMetadata, GeneratedAssessment, GeneratedAssessmentResponse, GenerationRequest,
    QuestionDetail, SelectionResult,
};
use crate::traits::{AssessmentStore, QuestionStore};

/// Validate, assemble, and persist one selection result.
pub async fn materialize(
    questions: &dyn QuestionStore,
    assessments: &dyn AssessmentStore,
    request: &GenerationRequest,
    selection: SelectionResult,
) -> Result<GeneratedAssessmentResponse, GenerateError> {
    let selected_ids: Vec<i64> = selection
        .selections
        .iter()
        .map(|s| s.question_id)
        .collect();

    let details = questions.get_details(&selected_ids).await?;
    let mut by_id: HashMap<i64, QuestionDetail> =
        details.into_iter().map(|d| (d.id, d)).collect();

    // Preserve the reasoning boundary's ordering; unresolvable ids drop out
    let mut items: Vec<QuestionDetail> = Vec::with_capacity(selected_ids.len());
    let mut dropped = 0usize;
    for id in &selected_ids {
        match by_id.remove(id) {
            Some(detail) => items.push(detail),
            None => dropped += 1,
        }
    }

    if items.is_empty() {
        return Err(GenerateError::NoUsableSelections);
    }
    if dropped > 0 {
        warn!(dropped, total = selected_ids.len(), "selected ids did not resolve");
    }

    let assessment = GeneratedAssessment {
        id: Uuid::new_v4().to_string(),
        learner_id: request.learner_id,
        mode: request.mode,
        created_at: Utc::now(),
        question_ids: items.iter().map(|d| d.id).collect(),
    };

    assessments
        .persist(&assessment)
        .await
        .map_err(GenerateError::Persistence)?;

    let metadata = AssessmentMetadata {
        assessment_id: assessment.id,
        total_count: items.len(),
        mode: request.mode,
        generated_at: assessment.created_at,
        distribution_by_difficulty: distribution_by_difficulty(&items),
        distribution_by_lesson: distribution_by_lesson(&items),
        analysis: selection.analysis,
        dropped_selections: dropped,
    };

    Ok(GeneratedAssessmentResponse { items, metadata })
}

/// Count resolved items per difficulty label.
pub fn distribution_by_difficulty(items: &[QuestionDetail]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.difficulty.as_str().to_string()).or_insert(0) += 1;
    }
    counts
}

/// Count resolved items per lesson label.
pub fn distribution_by_lesson(items: &[QuestionDetail]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for item in items {
        *counts.entry(item.lesson_label.clone()).or_insert(0) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CandidateItem, DifficultyLevel, GenerationMode, ScopeFilter, Selection,
    };
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedQuestions {
        details: Vec<QuestionDetail>,
    }

    #[async_trait]
    impl QuestionStore for FixedQuestions {
        async fn find_candidates(
            &self,
            _filter: &ScopeFilter,
            _limit: usize,
        ) -> Result<Vec<CandidateItem>> {
            Ok(Vec::new())
        }

        async fn get_details(&self, ids: &[i64]) -> Result<Vec<QuestionDetail>> {
            Ok(self
                .details
                .iter()
                .filter(|d| ids.contains(&d.id))
                .cloned()
                .collect())
        }
    }

    struct CapturingAssessments {
        persisted: Mutex<Vec<GeneratedAssessment>>,
        fail: bool,
    }

    impl CapturingAssessments {
        fn new() -> Self {
            Self {
                persisted: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                persisted: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl AssessmentStore for CapturingAssessments {
        async fn persist(&self, assessment: &GeneratedAssessment) -> Result<()> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.persisted.lock().unwrap().push(assessment.clone());
            Ok(())
        }
    }

    fn detail(id: i64, difficulty: DifficultyLevel, lesson: &str) -> QuestionDetail {
        QuestionDetail {
            id,
            content: format!("question {}", id),
            difficulty,
            subject_label: "Math".to_string(),
            grade_label: "Grade 9".to_string(),
            lesson_label: lesson.to_string(),
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

    fn selection(ids: &[i64]) -> SelectionResult {
        SelectionResult {
            selections: ids
                .iter()
                .map(|&id| Selection {
                    question_id: id,
                    rationale: format!("reason {}", id),
                })
                .collect(),
            analysis: "learner is improving".to_string(),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_ids_drop_out_with_count() {
        // 10 selected, 2 unknown: success with 8 items and dropped count 2
        let questions = FixedQuestions {
            details: (1..=8)
                .map(|i| detail(i, DifficultyLevel::Medium, "Fractions"))
                .collect(),
        };
        let assessments = CapturingAssessments::new();
        let ids: Vec<i64> = (1..=10).collect();

        let response = materialize(&questions, &assessments, &request(), selection(&ids))
            .await
            .unwrap();

        assert_eq!(response.items.len(), 8);
        assert_eq!(response.metadata.dropped_selections, 2);
        assert_eq!(response.metadata.total_count, 8);
        assert_eq!(assessments.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_resolved_ids_is_fatal() {
        let questions = FixedQuestions { details: vec![] };
        let assessments = CapturingAssessments::new();

        let err = materialize(&questions, &assessments, &request(), selection(&[1, 2]))
            .await
            .unwrap_err();

        assert!(matches!(err, GenerateError::NoUsableSelections));
        assert!(assessments.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_error_yields_no_assessment_id() {
        let questions = FixedQuestions {
            details: vec![detail(1, DifficultyLevel::Easy, "Fractions")],
        };
        let assessments = CapturingAssessments::failing();

        let err = materialize(&questions, &assessments, &request(), selection(&[1]))
            .await
            .unwrap_err();

        assert!(matches!(err, GenerateError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_selection_order_preserved() {
        let questions = FixedQuestions {
            details: vec![
                detail(1, DifficultyLevel::Easy, "A"),
                detail(2, DifficultyLevel::Easy, "A"),
                detail(3, DifficultyLevel::Easy, "A"),
            ],
        };
        let assessments = CapturingAssessments::new();

        let response = materialize(&questions, &assessments, &request(), selection(&[3, 1, 2]))
            .await
            .unwrap();

        let ids: Vec<i64> = response.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let persisted = assessments.persisted.lock().unwrap();
        assert_eq!(persisted[0].question_ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_resolve_once() {
        let questions = FixedQuestions {
            details: vec![detail(1, DifficultyLevel::Easy, "A")],
        };
        let assessments = CapturingAssessments::new();

        let response = materialize(&questions, &assessments, &request(), selection(&[1, 1]))
            .await
            .unwrap();

        assert_eq!(response.items.len(), 1);
        assert_eq!(response.metadata.dropped_selections, 1);
    }

    #[test]
    fn test_distributions() {
        let items = vec![
            detail(1, DifficultyLevel::Easy, "Fractions"),
            detail(2, DifficultyLevel::Easy, "Decimals"),
            detail(3, DifficultyLevel::Hard, "Fractions"),
        ];

        let by_difficulty = distribution_by_difficulty(&items);
        assert_eq!(by_difficulty.get("EASY"), Some(&2));
        assert_eq!(by_difficulty.get("HARD"), Some(&1));
        assert_eq!(by_difficulty.get("MEDIUM"), None);

        let by_lesson = distribution_by_lesson(&items);
        assert_eq!(by_lesson.get("Fractions"), Some(&2));
        assert_eq!(by_lesson.get("Decimals"), Some(&1));
    }
}
