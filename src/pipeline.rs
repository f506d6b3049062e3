//! The five-stage generation pipeline.
//!
//! ```text
//! GenerationRequest
//!   │
//!   ▼
//! 1. scope        resolve explicit + auto-detected filters
//! 2. candidates   two-attempt pool query
//! 3. payload      compile the instruction document
//! 4. reasoning    one exchange with the reasoning boundary
//! 5. materialize  validate, assemble, persist
//!   │
//!   ▼
//! GeneratedAssessmentResponse
//! ```
//!
//! Stages run strictly in order and each stage aborts the request on
//! failure; there is no partial assessment. The pipeline owns no state of
//! its own — everything flows through the trait seams, so a request is
//! cancelled simply by dropping its future, with no cleanup needed until
//! the single atomic persist in stage 5.

use std::sync::Arc;

use tracing::{debug, info};

use crate::analytics::AnalyticsEngine;
use crate::candidates::select_candidates;
use crate::error::GenerateError;
use crate::materialize::materialize;
use crate::models::{
    AttemptRecord, CompetencySnapshot, GeneratedAssessmentResponse, GenerationRequest,
};
use crate::payload::{compile, filter_history};
use crate::reasoning::parse_selection;
use crate::scope::resolve_scope;
use crate::traits::{AssessmentStore, HistoryStore, QuestionStore, ReasoningClient};

/// Orchestrates one generation request end to end, and routes
/// attempt-completion events into the analytics engine.
pub struct GenerationPipeline {
    questions: Arc<dyn QuestionStore>,
    history: Arc<dyn HistoryStore>,
    assessments: Arc<dyn AssessmentStore>,
    reasoning: Arc<dyn ReasoningClient>,
    analytics: Arc<AnalyticsEngine>,
}

impl GenerationPipeline {
    pub fn new(
        questions: Arc<dyn QuestionStore>,
        history: Arc<dyn HistoryStore>,
        assessments: Arc<dyn AssessmentStore>,
        reasoning: Arc<dyn ReasoningClient>,
        analytics: Arc<AnalyticsEngine>,
    ) -> Self {
        Self {
            questions,
            history,
            assessments,
            reasoning,
            analytics,
        }
    }

    /// Run the full pipeline for one request.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedAssessmentResponse, GenerateError> {
        let scope = resolve_scope(self.history.as_ref(), request).await?;
        debug!(
            subjects = ?scope.subject_ids,
            grades = ?scope.grade_ids,
            "scope resolved"
        );

        let outcome = select_candidates(self.questions.as_ref(), &scope, request).await?;
        if outcome.candidates.is_empty() {
            return Err(GenerateError::EmptyCandidatePool);
        }
        debug!(
            count = outcome.candidates.len(),
            attempt = ?outcome.attempt,
            "candidate pool built"
        );

        let attempts = self
            .history
            .recent_attempts(request.learner_id, request.history_window)
            .await?;
        let scoped_attempts = filter_history(&scope, &attempts);
        let document = compile(request, scoped_attempts, outcome.candidates).render();

        let raw = self
            .reasoning
            .complete(&document)
            .await
            .map_err(|e| GenerateError::ReasoningBoundary(e.to_string()))?;
        let selection =
            parse_selection(&raw).map_err(|e| GenerateError::ReasoningBoundary(e.to_string()))?;
        debug!(selections = selection.selections.len(), "selection parsed");

        let response = materialize(
            self.questions.as_ref(),
            self.assessments.as_ref(),
            request,
            selection,
        )
        .await?;

        info!(
            assessment_id = %response.metadata.assessment_id,
            learner_id = request.learner_id,
            items = response.items.len(),
            dropped = response.metadata.dropped_selections,
            "assessment generated"
        );
        Ok(response)
    }

    /// Notify analytics that a learner completed an attempt. The attempt
    /// itself is already persisted by the caller; this only refreshes the
    /// rolling summary for the attempt's (learner, subject) key and never
    /// fails the caller.
    pub async fn record_attempt_completed(&self, attempt: &AttemptRecord) {
        self.analytics
            .on_attempt_completed(attempt.learner_id, attempt.subject_id)
            .await;
    }

    /// Competency snapshot for downstream recommendation consumers.
    pub async fn competency_snapshot(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
    ) -> anyhow::Result<Option<CompetencySnapshot>> {
        self.analytics.competency_snapshot(learner_id, subject_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AttemptRecord, CandidateItem, DifficultyLevel, GeneratedAssessment, GenerationMode,
        PerformanceSummary, QuestionDetail, ScopeFilter,
    };
    use crate::traits::SummaryStore;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeQuestions {
        candidates: Vec<CandidateItem>,
        details: Vec<QuestionDetail>,
    }

    #[async_trait]
    impl QuestionStore for FakeQuestions {
        async fn find_candidates(
            &self,
            _filter: &ScopeFilter,
            limit: usize,
        ) -> Result<Vec<CandidateItem>> {
            Ok(self.candidates.iter().take(limit).cloned().collect())
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

    struct FakeHistory {
        attempts: Vec<AttemptRecord>,
    }

    #[async_trait]
    impl HistoryStore for FakeHistory {
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

    struct FakeAssessments {
        persisted: Mutex<Vec<GeneratedAssessment>>,
    }

    #[async_trait]
    impl AssessmentStore for FakeAssessments {
        async fn persist(&self, assessment: &GeneratedAssessment) -> Result<()> {
            self.persisted.lock().unwrap().push(assessment.clone());
            Ok(())
        }
    }

    struct NullSummaries;

    #[async_trait]
    impl SummaryStore for NullSummaries {
        async fn load(&self, _: i64, _: Option<i64>) -> Result<Option<PerformanceSummary>> {
            Ok(None)
        }

        async fn upsert(&self, _: &PerformanceSummary) -> Result<()> {
            Ok(())
        }
    }

    /// Answers every request with a canned response text.
    struct ScriptedReasoning {
        response: Result<String, String>,
        captured: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReasoningClient for ScriptedReasoning {
        async fn complete(&self, document: &str) -> Result<String> {
            self.captured.lock().unwrap().push(document.to_string());
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(message) => bail!("{}", message),
            }
        }
    }

    fn candidate(id: i64) -> CandidateItem {
        CandidateItem {
            id,
            content: format!("question {}", id),
            difficulty: DifficultyLevel::Medium,
            grade_label: "Grade 9".to_string(),
            lesson_label: "Fractions".to_string(),
        }
    }

    fn detail(id: i64) -> QuestionDetail {
        QuestionDetail {
            id,
            content: format!("question {}", id),
            difficulty: DifficultyLevel::Medium,
            subject_label: "Math".to_string(),
            grade_label: "Grade 9".to_string(),
            lesson_label: "Fractions".to_string(),
        }
    }

    fn attempt() -> AttemptRecord {
        AttemptRecord {
            id: 1,
            learner_id: 1,
            subject_id: Some(3),
            grade_id: Some(2),
            chapter_id: None,
            lesson_id: None,
            score: 72.0,
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
            desired_count: 2,
            mode: GenerationMode::Review,
            history_window: 10,
            subject_ids: vec![3],
            grade_ids: vec![2],
            chapter_ids: vec![],
            lesson_ids: vec![],
            difficulty: None,
        }
    }

    fn pipeline(
        questions: FakeQuestions,
        history: FakeHistory,
        reasoning: ScriptedReasoning,
    ) -> (GenerationPipeline, Arc<FakeAssessments>) {
        let history: Arc<dyn HistoryStore> = Arc::new(history);
        let assessments = Arc::new(FakeAssessments {
            persisted: Mutex::new(Vec::new()),
        });
        let analytics = Arc::new(AnalyticsEngine::new(
            history.clone(),
            Arc::new(NullSummaries),
        ));
        (
            GenerationPipeline::new(
                Arc::new(questions),
                history,
                assessments.clone(),
                Arc::new(reasoning),
                analytics,
            ),
            assessments,
        )
    }

    #[tokio::test]
    async fn test_generate_end_to_end() {
        let questions = FakeQuestions {
            candidates: vec![candidate(1), candidate(2), candidate(3)],
            details: vec![detail(1), detail(2)],
        };
        let reasoning = ScriptedReasoning {
            response: Ok(
                r#"{"selections":[{"id":2,"rationale":"weak topic"},{"id":1,"rationale":"review"}],"analysis":"steady"}"#
                    .to_string(),
            ),
            captured: Mutex::new(Vec::new()),
        };
        let (pipeline, assessments) =
            pipeline(questions, FakeHistory { attempts: vec![attempt()] }, reasoning);

        let response = pipeline.generate(&request()).await.unwrap();

        let ids: Vec<i64> = response.items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(response.metadata.analysis, "steady");
        assert_eq!(assessments.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_pool_after_both_attempts_is_fatal() {
        let questions = FakeQuestions {
            candidates: vec![],
            details: vec![],
        };
        let reasoning = ScriptedReasoning {
            response: Ok(String::new()),
            captured: Mutex::new(Vec::new()),
        };
        let (pipeline, assessments) =
            pipeline(questions, FakeHistory { attempts: vec![] }, reasoning);

        let err = pipeline.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerateError::EmptyCandidatePool));
        assert!(assessments.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reasoning_failure_aborts_without_retry() {
        let questions = FakeQuestions {
            candidates: vec![candidate(1)],
            details: vec![detail(1)],
        };
        let reasoning = ScriptedReasoning {
            response: Err("deadline exceeded".to_string()),
            captured: Mutex::new(Vec::new()),
        };
        let (pipeline, _) =
            pipeline(questions, FakeHistory { attempts: vec![] }, reasoning);

        let err = pipeline.generate(&request()).await.unwrap_err();
        match err {
            GenerateError::ReasoningBoundary(message) => {
                assert!(message.contains("deadline exceeded"));
            }
            other => panic!("expected reasoning failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reasoning_called_exactly_once() {
        let questions = FakeQuestions {
            candidates: vec![candidate(1)],
            details: vec![detail(1)],
        };
        let reasoning = ScriptedReasoning {
            response: Err("503 unavailable".to_string()),
            captured: Mutex::new(Vec::new()),
        };
        let captured_handle = Arc::new(reasoning);
        let history: Arc<dyn HistoryStore> = Arc::new(FakeHistory { attempts: vec![] });
        let analytics = Arc::new(AnalyticsEngine::new(
            history.clone(),
            Arc::new(NullSummaries),
        ));
        let pipeline = GenerationPipeline::new(
            Arc::new(questions),
            history,
            Arc::new(FakeAssessments {
                persisted: Mutex::new(Vec::new()),
            }),
            captured_handle.clone(),
            analytics,
        );

        let _ = pipeline.generate(&request()).await;
        assert_eq!(captured_handle.captured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_document_carries_scoped_history() {
        let questions = FakeQuestions {
            candidates: vec![candidate(1)],
            details: vec![detail(1)],
        };
        let mut out_of_scope = attempt();
        out_of_scope.subject_id = Some(99);
        let reasoning = ScriptedReasoning {
            response: Ok(
                r#"{"selections":[{"id":1,"rationale":"r"}],"analysis":"a"}"#.to_string(),
            ),
            captured: Mutex::new(Vec::new()),
        };
        let captured_handle = Arc::new(reasoning);
        let history: Arc<dyn HistoryStore> = Arc::new(FakeHistory {
            attempts: vec![attempt(), out_of_scope],
        });
        let analytics = Arc::new(AnalyticsEngine::new(
            history.clone(),
            Arc::new(NullSummaries),
        ));
        let pipeline = GenerationPipeline::new(
            Arc::new(questions),
            history,
            Arc::new(FakeAssessments {
                persisted: Mutex::new(Vec::new()),
            }),
            captured_handle.clone(),
            analytics,
        );

        pipeline.generate(&request()).await.unwrap();

        let documents = captured_handle.captured.lock().unwrap();
        assert!(documents[0].contains("RECENT PERFORMANCE (1 attempts in scope)"));
    }

    #[tokio::test]
    async fn test_unparseable_response_is_boundary_failure() {
        let questions = FakeQuestions {
            candidates: vec![candidate(1)],
            details: vec![detail(1)],
        };
        let reasoning = ScriptedReasoning {
            response: Ok("I am unable to choose.".to_string()),
            captured: Mutex::new(Vec::new()),
        };
        let (pipeline, assessments) =
            pipeline(questions, FakeHistory { attempts: vec![] }, reasoning);

        let err = pipeline.generate(&request()).await.unwrap_err();
        assert!(matches!(err, GenerateError::ReasoningBoundary(_)));
        assert!(assessments.persisted.lock().unwrap().is_empty());
    }
}
