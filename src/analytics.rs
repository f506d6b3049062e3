//! Performance analytics over the rolling attempt window.
//!
//! Triggered once per completed attempt, the engine recomputes the entire
//! [`PerformanceSummary`] for a (learner, optional subject) key from the
//! most recent [`ROLLING_WINDOW`] attempts. There is no incremental update
//! path: full recomputation keeps the summary reproducible purely from the
//! underlying attempt window, so it stays a cache and never becomes a
//! source of truth.
//!
//! An analytics failure never blocks or fails the attempt-completion
//! caller: it is logged and the previous summary remains in place,
//! stale but valid.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{
    AttemptRecord, CompetencySnapshot, DifficultyLevel, PerformanceSummary, TopicTally, Trend,
    TrendLabel,
};
use crate::traits::{HistoryStore, SummaryStore};

/// Fixed size of the rolling attempt window.
pub const ROLLING_WINDOW: usize = 5;

/// Trend label cutoff: |magnitude| must exceed this to leave STABLE.
const TREND_THRESHOLD: f64 = 5.0;
/// Topic accuracy below this is weak; at or above [`STRONG_TOPIC_CUTOFF`]
/// is strong; in between is unclassified.
const WEAK_TOPIC_CUTOFF: f64 = 60.0;
const STRONG_TOPIC_CUTOFF: f64 = 80.0;

// ============ Pure statistics ============

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (the window is the whole population).
fn population_stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Newer-half mean minus older-half mean over scores ordered newest first.
/// The halves are `⌊n/2⌋` long; the middle element of an odd window is
/// excluded. Requires at least 3 scores.
fn compute_trend(scores_desc: &[f64]) -> Option<Trend> {
    let n = scores_desc.len();
    if n < 3 {
        return None;
    }
    let half = n / 2;
    let newer = &scores_desc[..half];
    let older = &scores_desc[n - half..];
    let magnitude = mean(newer) - mean(older);

    let label = if magnitude > TREND_THRESHOLD {
        TrendLabel::Improving
    } else if magnitude < -TREND_THRESHOLD {
        TrendLabel::Declining
    } else {
        TrendLabel::Stable
    };

    Some(Trend { label, magnitude })
}

/// Mean consecutive-score delta in chronological order. Requires at least
/// 2 scores.
fn compute_learning_velocity(scores_desc: &[f64]) -> Option<f64> {
    if scores_desc.len() < 2 {
        return None;
    }
    let chronological: Vec<f64> = scores_desc.iter().rev().copied().collect();
    let deltas: Vec<f64> = chronological.windows(2).map(|w| w[1] - w[0]).collect();
    Some(mean(&deltas))
}

/// `max(0, 100 − 2σ)`. Requires at least 3 scores.
fn compute_consistency(scores_desc: &[f64]) -> Option<f64> {
    if scores_desc.len() < 3 {
        return None;
    }
    Some((100.0 - 2.0 * population_stddev(scores_desc)).max(0.0))
}

fn recommend_difficulty(average_score: f64) -> DifficultyLevel {
    if average_score >= 85.0 {
        DifficultyLevel::Hard
    } else if average_score >= 70.0 {
        DifficultyLevel::Medium
    } else {
        DifficultyLevel::Easy
    }
}

/// Classify topics across the window's per-topic tallies.
///
/// Returns (strong, weak): strong sorted best-first, weak sorted
/// weakest-first, names breaking ties so the output is deterministic.
/// Topics between the cutoffs stay unclassified.
fn classify_topics(attempts: &[AttemptRecord]) -> (Vec<String>, Vec<String>) {
    let mut tallies: BTreeMap<String, TopicTally> = BTreeMap::new();
    for attempt in attempts {
        for (topic, tally) in &attempt.topics {
            let entry = tallies.entry(topic.clone()).or_insert(TopicTally {
                correct: 0,
                total: 0,
            });
            entry.correct += tally.correct;
            entry.total += tally.total;
        }
    }

    let mut strong: Vec<(String, f64)> = Vec::new();
    let mut weak: Vec<(String, f64)> = Vec::new();
    for (topic, tally) in tallies {
        let Some(accuracy) = tally.accuracy() else {
            continue;
        };
        if accuracy < WEAK_TOPIC_CUTOFF {
            weak.push((topic, accuracy));
        } else if accuracy >= STRONG_TOPIC_CUTOFF {
            strong.push((topic, accuracy));
        }
    }

    strong.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    weak.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });

    (
        strong.into_iter().map(|(t, _)| t).collect(),
        weak.into_iter().map(|(t, _)| t).collect(),
    )
}

/// Recompute a summary from scratch over the attempt window.
///
/// `attempts` must be ordered newest first; anything past
/// [`ROLLING_WINDOW`] is ignored. Returns `None` when no attempts exist —
/// a summary is created lazily on the first recorded attempt.
///
/// Pure: the same window and timestamp always produce an identical summary.
pub fn compute_summary(
    learner_id: i64,
    subject_id: Option<i64>,
    attempts: &[AttemptRecord],
    analyzed_at: DateTime<Utc>,
) -> Option<PerformanceSummary> {
    let window = &attempts[..attempts.len().min(ROLLING_WINDOW)];
    if window.is_empty() {
        return None;
    }

    let scores_desc: Vec<f64> = window.iter().map(|a| a.score).collect();
    let times: Vec<f64> = window.iter().map(|a| a.time_taken_secs as f64).collect();
    let accuracies: Vec<f64> = window.iter().filter_map(|a| a.accuracy()).collect();

    let average_score = mean(&scores_desc);
    let (strong_topics, weak_topics) = classify_topics(window);

    Some(PerformanceSummary {
        learner_id,
        subject_id,
        window_size: ROLLING_WINDOW,
        attempt_count: window.len(),
        average_score,
        average_time_secs: mean(&times),
        overall_accuracy: mean(&accuracies),
        trend: compute_trend(&scores_desc),
        consistency_score: compute_consistency(&scores_desc),
        learning_velocity: compute_learning_velocity(&scores_desc),
        strong_topics,
        weak_topics,
        recommended_difficulty: recommend_difficulty(average_score),
        analyzed_at,
    })
}

// ============ Engine ============

/// Per-key async locks so two concurrent attempt completions for the same
/// (learner, subject) key cannot interleave their read-then-write and lose
/// an update. Different keys proceed independently.
struct KeyedLocks {
    locks: Mutex<HashMap<(i64, Option<i64>), Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, learner_id: i64, subject_id: Option<i64>) -> Arc<Mutex<()>> {
        let key = (learner_id, subject_id);
        let mut locks = self.locks.lock().await;
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

/// The analytics engine: recomputes summaries on attempt completion and
/// serves competency snapshots.
pub struct AnalyticsEngine {
    history: Arc<dyn HistoryStore>,
    summaries: Arc<dyn SummaryStore>,
    locks: KeyedLocks,
}

impl AnalyticsEngine {
    pub fn new(history: Arc<dyn HistoryStore>, summaries: Arc<dyn SummaryStore>) -> Self {
        Self {
            history,
            summaries,
            locks: KeyedLocks::new(),
        }
    }

    /// React to a completed attempt by recomputing the summary for its
    /// (learner, optional subject) key.
    ///
    /// Never fails the caller: a computation or store error is logged and
    /// the previous summary stays in place, stale but valid.
    pub async fn on_attempt_completed(&self, learner_id: i64, subject_id: Option<i64>) {
        if let Err(err) = self.update_summary(learner_id, subject_id).await {
            warn!(
                learner_id,
                ?subject_id,
                error = %err,
                "analytics update failed; keeping previous summary"
            );
        }
    }

    async fn update_summary(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
    ) -> anyhow::Result<Option<PerformanceSummary>> {
        let lock = self.locks.acquire(learner_id, subject_id).await;
        let _guard = lock.lock().await;

        let attempts = self
            .history
            .attempts_for_subject(learner_id, subject_id, ROLLING_WINDOW)
            .await?;

        let Some(summary) = compute_summary(learner_id, subject_id, &attempts, Utc::now()) else {
            debug!(learner_id, ?subject_id, "no attempts yet; summary not created");
            return Ok(None);
        };

        self.summaries.upsert(&summary).await?;
        Ok(Some(summary))
    }

    /// Competency snapshot for downstream recommendation consumers.
    ///
    /// Serves the stored summary when one exists; otherwise computes one
    /// lazily from history (and persists it). Returns `None` for learners
    /// with no attempts at all.
    pub async fn competency_snapshot(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
    ) -> anyhow::Result<Option<CompetencySnapshot>> {
        let summary = match self.summaries.load(learner_id, subject_id).await? {
            Some(summary) => summary,
            None => match self.update_summary(learner_id, subject_id).await? {
                Some(summary) => summary,
                None => return Ok(None),
            },
        };

        Ok(Some(build_snapshot(summary)))
    }
}

/// Derive the recommendation fields from a summary.
///
/// Heuristics: focus on weak topics first; a learner improving with decent
/// consistency can take a longer set, a declining learner gets a short one
/// to rebuild from; the time budget scales with the recommended difficulty.
fn build_snapshot(summary: PerformanceSummary) -> CompetencySnapshot {
    let recommended_question_count = match summary.trend.map(|t| t.label) {
        Some(TrendLabel::Improving)
            if summary.consistency_score.unwrap_or(0.0) >= 70.0 =>
        {
            15
        }
        Some(TrendLabel::Declining) => 5,
        _ => 10,
    };

    let secs_per_question = match summary.recommended_difficulty {
        DifficultyLevel::Easy => 45,
        DifficultyLevel::Medium => 60,
        DifficultyLevel::Hard => 90,
    };

    CompetencySnapshot {
        learner_id: summary.learner_id,
        subject_id: summary.subject_id,
        recommended_topics: summary.weak_topics.clone(),
        recommended_difficulty: summary.recommended_difficulty,
        recommended_question_count,
        recommended_time_limit_secs: (recommended_question_count as i64) * secs_per_question,
        summary,
    }
}
