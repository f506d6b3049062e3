//! sqlx-backed implementations of the store seams.
//!
//! One store type per collaborator, all sharing a [`SqlitePool`]. The
//! assessment write is a single transaction (row + ordered associations) so
//! a partial assessment is never observable. Summary upserts are single
//! statements; SQLite's single-writer model serializes them per database,
//! which subsumes the required per-key serialization.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::models::{
    AttemptRecord, CandidateItem, DifficultyLevel, GeneratedAssessment, PerformanceSummary,
    QuestionDetail, ScopeFilter, TopicTally, Trend, TrendLabel,
};
use crate::traits::{AssessmentStore, HistoryStore, QuestionStore, SummaryStore};

/// `subject_id` column value for the all-subjects summary row. Real subject
/// ids must be non-zero; writes and reads keyed on subject id 0 are rejected
/// so the cross-subject row can never collide with a real subject.
const ALL_SUBJECTS: i64 = 0;

fn placeholders(count: usize) -> String {
    let mut s = String::with_capacity(count * 2);
    for i in 0..count {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

// ============ Question store ============

pub struct SqliteQuestionStore {
    pool: SqlitePool,
}

impl SqliteQuestionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuestionStore for SqliteQuestionStore {
    async fn find_candidates(
        &self,
        filter: &ScopeFilter,
        limit: usize,
    ) -> Result<Vec<CandidateItem>> {
        let mut conditions: Vec<String> = Vec::new();
        let mut id_binds: Vec<i64> = Vec::new();

        for (column, ids) in [
            ("subject_id", &filter.subject_ids),
            ("grade_id", &filter.grade_ids),
            ("chapter_id", &filter.chapter_ids),
            ("lesson_id", &filter.lesson_ids),
        ] {
            if !ids.is_empty() {
                conditions.push(format!("{} IN ({})", column, placeholders(ids.len())));
                id_binds.extend_from_slice(ids);
            }
        }
        if filter.difficulty.is_some() {
            conditions.push("difficulty = ?".to_string());
        }

        let mut sql = String::from(
            "SELECT id, content, difficulty, grade_label, lesson_label FROM questions",
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        // Deterministic order so repeated requests compile identical payloads
        sql.push_str(" ORDER BY id LIMIT ?");

        let mut query = sqlx::query(&sql);
        for id in &id_binds {
            query = query.bind(id);
        }
        if let Some(difficulty) = filter.difficulty {
            query = query.bind(difficulty.as_str());
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let label: String = row.get("difficulty");
            let difficulty = DifficultyLevel::from_label(&label)
                .ok_or_else(|| anyhow!("unknown difficulty label in question store: {}", label))?;
            candidates.push(CandidateItem {
                id: row.get("id"),
                content: row.get("content"),
                difficulty,
                grade_label: row.get("grade_label"),
                lesson_label: row.get("lesson_label"),
            });
        }

        Ok(candidates)
    }

    async fn get_details(&self, ids: &[i64]) -> Result<Vec<QuestionDetail>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT id, content, difficulty, subject_label, grade_label, lesson_label \
             FROM questions WHERE id IN ({})",
            placeholders(ids.len())
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let mut details = Vec::with_capacity(rows.len());
        for row in &rows {
            let label: String = row.get("difficulty");
            let difficulty = DifficultyLevel::from_label(&label)
                .ok_or_else(|| anyhow!("unknown difficulty label in question store: {}", label))?;
            details.push(QuestionDetail {
                id: row.get("id"),
                content: row.get("content"),
                difficulty,
                subject_label: row.get("subject_label"),
                grade_label: row.get("grade_label"),
                lesson_label: row.get("lesson_label"),
            });
        }

        Ok(details)
    }
}

// ============ History store ============

pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a completed attempt. Attempts are append-only; there is no
    /// update path.
    pub async fn record_attempt(&self, attempt: &AttemptRecord) -> Result<i64> {
        let topics_json = serde_json::to_string(&attempt.topics)?;
        let result = sqlx::query(
            r#"
            INSERT INTO attempts
                (learner_id, subject_id, grade_id, chapter_id, lesson_id,
                 score, correct_count, incorrect_count, time_taken_secs,
                 topics_json, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(attempt.learner_id)
        .bind(attempt.subject_id)
        .bind(attempt.grade_id)
        .bind(attempt.chapter_id)
        .bind(attempt.lesson_id)
        .bind(attempt.score)
        .bind(attempt.correct_count)
        .bind(attempt.incorrect_count)
        .bind(attempt.time_taken_secs)
        .bind(&topics_json)
        .bind(attempt.completed_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}

fn attempt_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AttemptRecord> {
    let topics_json: String = row.get("topics_json");
    let topics: BTreeMap<String, TopicTally> = serde_json::from_str(&topics_json)
        .with_context(|| "invalid topic breakdown in attempt row")?;

    let ts: i64 = row.get("completed_at");
    let completed_at = DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| anyhow!("invalid completed_at timestamp: {}", ts))?;

    Ok(AttemptRecord {
        id: row.get("id"),
        learner_id: row.get("learner_id"),
        subject_id: row.get("subject_id"),
        grade_id: row.get("grade_id"),
        chapter_id: row.get("chapter_id"),
        lesson_id: row.get("lesson_id"),
        score: row.get("score"),
        correct_count: row.get("correct_count"),
        incorrect_count: row.get("incorrect_count"),
        time_taken_secs: row.get("time_taken_secs"),
        topics,
        completed_at,
    })
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn recent_attempts(&self, learner_id: i64, count: usize) -> Result<Vec<AttemptRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, learner_id, subject_id, grade_id, chapter_id, lesson_id,
                   score, correct_count, incorrect_count, time_taken_secs,
                   topics_json, completed_at
            FROM attempts
            WHERE learner_id = ?
            ORDER BY completed_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(learner_id)
        .bind(count as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(attempt_from_row).collect()
    }

    async fn attempts_for_subject(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
        count: usize,
    ) -> Result<Vec<AttemptRecord>> {
        let rows = match subject_id {
            Some(subject) => {
                sqlx::query(
                    r#"
                    SELECT id, learner_id, subject_id, grade_id, chapter_id, lesson_id,
                           score, correct_count, incorrect_count, time_taken_secs,
                           topics_json, completed_at
                    FROM attempts
                    WHERE learner_id = ? AND subject_id = ?
                    ORDER BY completed_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(learner_id)
                .bind(subject)
                .bind(count as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, learner_id, subject_id, grade_id, chapter_id, lesson_id,
                           score, correct_count, incorrect_count, time_taken_secs,
                           topics_json, completed_at
                    FROM attempts
                    WHERE learner_id = ?
                    ORDER BY completed_at DESC, id DESC
                    LIMIT ?
                    "#,
                )
                .bind(learner_id)
                .bind(count as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(attempt_from_row).collect()
    }
}

// ============ Assessment store ============

pub struct SqliteAssessmentStore {
    pool: SqlitePool,
}

impl SqliteAssessmentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssessmentStore for SqliteAssessmentStore {
    async fn persist(&self, assessment: &GeneratedAssessment) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO assessments (id, learner_id, mode, created_at) VALUES (?, ?, ?, ?)")
            .bind(&assessment.id)
            .bind(assessment.learner_id)
            .bind(assessment.mode.as_str())
            .bind(assessment.created_at.timestamp())
            .execute(&mut *tx)
            .await?;

        for (position, question_id) in assessment.question_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO assessment_items (assessment_id, question_id, position) VALUES (?, ?, ?)",
            )
            .bind(&assessment.id)
            .bind(question_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

// ============ Summary store ============

pub struct SqliteSummaryStore {
    pool: SqlitePool,
}

impl SqliteSummaryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn subject_key(subject_id: Option<i64>) -> Result<i64> {
    match subject_id {
        Some(ALL_SUBJECTS) => Err(anyhow!(
            "subject id {} is reserved for the all-subjects summary row",
            ALL_SUBJECTS
        )),
        Some(id) => Ok(id),
        None => Ok(ALL_SUBJECTS),
    }
}

#[async_trait]
impl SummaryStore for SqliteSummaryStore {
    async fn load(
        &self,
        learner_id: i64,
        subject_id: Option<i64>,
    ) -> Result<Option<PerformanceSummary>> {
        let row = sqlx::query(
            "SELECT * FROM performance_summaries WHERE learner_id = ? AND subject_id = ?",
        )
        .bind(learner_id)
        .bind(subject_key(subject_id)?)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let trend_label: Option<String> = row.get("trend_label");
        let trend_magnitude: Option<f64> = row.get("trend_magnitude");
        let trend = match (trend_label, trend_magnitude) {
            (Some(label), Some(magnitude)) => Some(Trend {
                label: TrendLabel::from_label(&label)
                    .ok_or_else(|| anyhow!("unknown trend label in summary row: {}", label))?,
                magnitude,
            }),
            _ => None,
        };

        let strong_json: String = row.get("strong_topics_json");
        let weak_json: String = row.get("weak_topics_json");
        let difficulty_label: String = row.get("recommended_difficulty");
        let ts: i64 = row.get("analyzed_at");

        let stored_subject: i64 = row.get("subject_id");

        Ok(Some(PerformanceSummary {
            learner_id: row.get("learner_id"),
            subject_id: (stored_subject != ALL_SUBJECTS).then_some(stored_subject),
            window_size: row.get::<i64, _>("window_size") as usize,
            attempt_count: row.get::<i64, _>("attempt_count") as usize,
            average_score: row.get("average_score"),
            average_time_secs: row.get("average_time_secs"),
            overall_accuracy: row.get("overall_accuracy"),
            trend,
            consistency_score: row.get("consistency_score"),
            learning_velocity: row.get("learning_velocity"),
            strong_topics: serde_json::from_str(&strong_json)?,
            weak_topics: serde_json::from_str(&weak_json)?,
            recommended_difficulty: DifficultyLevel::from_label(&difficulty_label)
                .ok_or_else(|| anyhow!("unknown difficulty in summary row: {}", difficulty_label))?,
            analyzed_at: DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| anyhow!("invalid analyzed_at timestamp: {}", ts))?,
        }))
    }

    async fn upsert(&self, summary: &PerformanceSummary) -> Result<()> {
        let key = subject_key(summary.subject_id)?;
        let strong_json = serde_json::to_string(&summary.strong_topics)?;
        let weak_json = serde_json::to_string(&summary.weak_topics)?;

        sqlx::query(
            r#"
            INSERT INTO performance_summaries
                (learner_id, subject_id, window_size, attempt_count,
                 average_score, average_time_secs, overall_accuracy,
                 trend_label, trend_magnitude, consistency_score, learning_velocity,
                 strong_topics_json, weak_topics_json, recommended_difficulty, analyzed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(learner_id, subject_id) DO UPDATE SET
                window_size = excluded.window_size,
                attempt_count = excluded.attempt_count,
                average_score = excluded.average_score,
                average_time_secs = excluded.average_time_secs,
                overall_accuracy = excluded.overall_accuracy,
                trend_label = excluded.trend_label,
                trend_magnitude = excluded.trend_magnitude,
                consistency_score = excluded.consistency_score,
                learning_velocity = excluded.learning_velocity,
                strong_topics_json = excluded.strong_topics_json,
                weak_topics_json = excluded.weak_topics_json,
                recommended_difficulty = excluded.recommended_difficulty,
                analyzed_at = excluded.analyzed_at
            "#,
        )
        .bind(summary.learner_id)
        .bind(key)
        .bind(summary.window_size as i64)
        .bind(summary.attempt_count as i64)
        .bind(summary.average_score)
        .bind(summary.average_time_secs)
        .bind(summary.overall_accuracy)
        .bind(summary.trend.map(|t| t.label.as_str()))
        .bind(summary.trend.map(|t| t.magnitude))
        .bind(summary.consistency_score)
        .bind(summary.learning_velocity)
        .bind(&strong_json)
        .bind(&weak_json)
        .bind(summary.recommended_difficulty.as_str())
        .bind(summary.analyzed_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }

    #[test]
    fn test_subject_key_reserves_zero() {
        assert_eq!(subject_key(None).unwrap(), ALL_SUBJECTS);
        assert_eq!(subject_key(Some(7)).unwrap(), 7);
        // A real subject id equal to the reserved key is rejected, never
        // silently merged into the all-subjects row
        assert!(subject_key(Some(ALL_SUBJECTS)).is_err());
    }
}
