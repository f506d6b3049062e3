//! Core data models used throughout the generation pipeline and analytics.
//!
//! These types represent the requests, scope filters, attempt history,
//! candidate questions, and performance summaries that flow between the
//! pipeline stages. None of them carry behavior beyond small accessors;
//! the stages in [`crate::scope`], [`crate::candidates`], [`crate::payload`],
//! [`crate::materialize`], and [`crate::analytics`] own the logic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Generation mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Reinforce material the learner has already seen.
    Review,
    /// Push into harder or newer material.
    Advanced,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Review => "review",
            GenerationMode::Advanced => "advanced",
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty label used on questions and in recommendations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DifficultyLevel {
    Easy,
    Medium,
    Hard,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Easy => "EASY",
            DifficultyLevel::Medium => "MEDIUM",
            DifficultyLevel::Hard => "HARD",
        }
    }

    /// Parse a stored label. Returns `None` for unknown labels so callers
    /// can decide whether that is an error.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "EASY" => Some(DifficultyLevel::Easy),
            "MEDIUM" => Some(DifficultyLevel::Medium),
            "HARD" => Some(DifficultyLevel::Hard),
            _ => None,
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable input for one generation call. Constructed once per request;
/// empty filter lists mean "not supplied" for that dimension.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub learner_id: i64,
    /// Number of questions the generated assessment must contain.
    pub desired_count: usize,
    pub mode: GenerationMode,
    /// How many recent attempts to consult for auto-detection and for the
    /// history section of the instruction payload.
    pub history_window: usize,
    pub subject_ids: Vec<i64>,
    pub grade_ids: Vec<i64>,
    pub chapter_ids: Vec<i64>,
    pub lesson_ids: Vec<i64>,
    pub difficulty: Option<DifficultyLevel>,
}

/// A scope dimension, used in diagnostics and unresolved-scope errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeDimension {
    Subject,
    Grade,
    Chapter,
    Lesson,
}

impl fmt::Display for ScopeDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScopeDimension::Subject => "subject",
            ScopeDimension::Grade => "grade",
            ScopeDimension::Chapter => "chapter",
            ScopeDimension::Lesson => "lesson",
        };
        f.write_str(name)
    }
}

/// Where a resolved dimension's values came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeOrigin {
    /// Supplied verbatim by the caller.
    Explicit,
    /// Auto-detected from the learner's recent attempt history.
    Detected,
}

/// Resolved filter set used to query candidate questions. Derived per
/// request, never persisted. Per dimension, explicit caller input and
/// auto-detected values are mutually exclusive; `subject_origin` and
/// `grade_origin` record which one won (chapter and lesson are only ever
/// explicit).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeFilter {
    pub subject_ids: Vec<i64>,
    pub grade_ids: Vec<i64>,
    pub chapter_ids: Vec<i64>,
    pub lesson_ids: Vec<i64>,
    pub difficulty: Option<DifficultyLevel>,
    pub subject_origin: Option<ScopeOrigin>,
    pub grade_origin: Option<ScopeOrigin>,
}

impl ScopeFilter {
    /// True when no dimension constrains the query (the "entire pool"
    /// last-resort filter).
    pub fn is_unconstrained(&self) -> bool {
        self.subject_ids.is_empty()
            && self.grade_ids.is_empty()
            && self.chapter_ids.is_empty()
            && self.lesson_ids.is_empty()
            && self.difficulty.is_none()
    }
}

/// Per-topic correctness tally attached to an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicTally {
    pub correct: i64,
    pub total: i64,
}

impl TopicTally {
    /// Accuracy as a percentage, or `None` when no questions were tallied.
    pub fn accuracy(&self) -> Option<f64> {
        if self.total > 0 {
            Some(self.correct as f64 / self.total as f64 * 100.0)
        } else {
            None
        }
    }
}

/// One completed assessment attempt. Append-only: created at attempt
/// completion and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub id: i64,
    pub learner_id: i64,
    pub subject_id: Option<i64>,
    pub grade_id: Option<i64>,
    pub chapter_id: Option<i64>,
    pub lesson_id: Option<i64>,
    /// Overall score in `[0, 100]`.
    pub score: f64,
    pub correct_count: i64,
    pub incorrect_count: i64,
    pub time_taken_secs: i64,
    /// Per-topic correctness breakdown, keyed by topic name.
    pub topics: BTreeMap<String, TopicTally>,
    pub completed_at: DateTime<Utc>,
}

impl AttemptRecord {
    /// Per-attempt accuracy as a percentage, or `None` when the attempt
    /// recorded no answers.
    pub fn accuracy(&self) -> Option<f64> {
        let total = self.correct_count + self.incorrect_count;
        if total > 0 {
            Some(self.correct_count as f64 / total as f64 * 100.0)
        } else {
            None
        }
    }
}

/// Minimal projection of a question used for payload compilation only.
/// Rebuilt per request, never persisted.
#[derive(Debug, Clone)]
pub struct CandidateItem {
    pub id: i64,
    pub content: String,
    pub difficulty: DifficultyLevel,
    pub grade_label: String,
    pub lesson_label: String,
}

/// Full question detail, fetched for ids the reasoning boundary selected.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionDetail {
    pub id: i64,
    pub content: String,
    pub difficulty: DifficultyLevel,
    pub subject_label: String,
    pub grade_label: String,
    pub lesson_label: String,
}

/// One selected question with the reasoning boundary's rationale.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub question_id: i64,
    pub rationale: String,
}

/// Parsed reasoning-boundary output: ordered selections plus an overall
/// analysis string. Owned by the materializer for one request, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionResult {
    pub selections: Vec<Selection>,
    pub analysis: String,
}

/// Persisted assessment created by the materializer. A failed generation
/// produces no record; a successful one is never regenerated in place.
#[derive(Debug, Clone)]
pub struct GeneratedAssessment {
    pub id: String,
    pub learner_id: i64,
    pub mode: GenerationMode,
    pub created_at: DateTime<Utc>,
    /// Selected question ids in the order chosen by the reasoning boundary.
    pub question_ids: Vec<i64>,
}

/// Distribution and provenance metadata attached to a generation response.
#[derive(Debug, Clone, Serialize)]
pub struct AssessmentMetadata {
    pub assessment_id: String,
    pub total_count: usize,
    pub mode: GenerationMode,
    pub generated_at: DateTime<Utc>,
    pub distribution_by_difficulty: BTreeMap<String, usize>,
    pub distribution_by_lesson: BTreeMap<String, usize>,
    pub analysis: String,
    /// Selected ids that could not be resolved to stored questions.
    pub dropped_selections: usize,
}

/// Successful result of one generation request.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAssessmentResponse {
    pub items: Vec<QuestionDetail>,
    pub metadata: AssessmentMetadata,
}

/// Score trend over the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendLabel {
    Improving,
    Stable,
    Declining,
}

impl TrendLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendLabel::Improving => "IMPROVING",
            TrendLabel::Stable => "STABLE",
            TrendLabel::Declining => "DECLINING",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "IMPROVING" => Some(TrendLabel::Improving),
            "STABLE" => Some(TrendLabel::Stable),
            "DECLINING" => Some(TrendLabel::Declining),
            _ => None,
        }
    }
}

/// Trend direction and magnitude (newer-half mean minus older-half mean).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trend {
    pub label: TrendLabel,
    pub magnitude: f64,
}

/// Rolling performance summary for a (learner, optional subject) key.
///
/// The summary is a cache: every field is recomputed from scratch from the
/// most recent window of [`AttemptRecord`]s on each update, so it is always
/// derivable purely from the underlying history.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    pub learner_id: i64,
    /// `None` means the summary spans all subjects.
    pub subject_id: Option<i64>,
    /// Size of the rolling window the summary was computed over.
    pub window_size: usize,
    /// How many attempts actually existed (may be fewer than the window).
    pub attempt_count: usize,
    pub average_score: f64,
    pub average_time_secs: f64,
    pub overall_accuracy: f64,
    /// Unset with fewer than 3 attempts.
    pub trend: Option<Trend>,
    /// `max(0, 100 − 2σ)`; unset with fewer than 3 attempts.
    pub consistency_score: Option<f64>,
    /// Mean consecutive-score delta; unset with fewer than 2 attempts.
    pub learning_velocity: Option<f64>,
    pub strong_topics: Vec<String>,
    pub weak_topics: Vec<String>,
    pub recommended_difficulty: DifficultyLevel,
    pub analyzed_at: DateTime<Utc>,
}

/// Competency snapshot derived from a [`PerformanceSummary`] for downstream
/// recommendation consumers.
#[derive(Debug, Clone)]
pub struct CompetencySnapshot {
    pub learner_id: i64,
    pub subject_id: Option<i64>,
    /// Topics the learner should focus on next, weakest first.
    pub recommended_topics: Vec<String>,
    pub recommended_difficulty: DifficultyLevel,
    pub recommended_question_count: usize,
    pub recommended_time_limit_secs: i64,
    pub summary: PerformanceSummary,
}
