use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Question pool
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            id INTEGER PRIMARY KEY,
            content TEXT NOT NULL,
            subject_id INTEGER,
            grade_id INTEGER,
            chapter_id INTEGER,
            lesson_id INTEGER,
            difficulty TEXT NOT NULL,
            subject_label TEXT NOT NULL DEFAULT '',
            grade_label TEXT NOT NULL DEFAULT '',
            lesson_label TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Completed attempts (append-only)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS attempts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            learner_id INTEGER NOT NULL,
            subject_id INTEGER,
            grade_id INTEGER,
            chapter_id INTEGER,
            lesson_id INTEGER,
            score REAL NOT NULL,
            correct_count INTEGER NOT NULL DEFAULT 0,
            incorrect_count INTEGER NOT NULL DEFAULT 0,
            time_taken_secs INTEGER NOT NULL DEFAULT 0,
            topics_json TEXT NOT NULL DEFAULT '{}',
            completed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Generated assessments and their ordered item associations
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assessments (
            id TEXT PRIMARY KEY,
            learner_id INTEGER NOT NULL,
            mode TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assessment_items (
            assessment_id TEXT NOT NULL,
            question_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (assessment_id, position),
            FOREIGN KEY (assessment_id) REFERENCES assessments(id),
            FOREIGN KEY (question_id) REFERENCES questions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Rolling performance summaries, one row per (learner, subject) key.
    // subject_id 0 stands for "all subjects" so the key can be a primary key.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS performance_summaries (
            learner_id INTEGER NOT NULL,
            subject_id INTEGER NOT NULL DEFAULT 0,
            window_size INTEGER NOT NULL,
            attempt_count INTEGER NOT NULL,
            average_score REAL NOT NULL,
            average_time_secs REAL NOT NULL,
            overall_accuracy REAL NOT NULL,
            trend_label TEXT,
            trend_magnitude REAL,
            consistency_score REAL,
            learning_velocity REAL,
            strong_topics_json TEXT NOT NULL DEFAULT '[]',
            weak_topics_json TEXT NOT NULL DEFAULT '[]',
            recommended_difficulty TEXT NOT NULL,
            analyzed_at INTEGER NOT NULL,
            PRIMARY KEY (learner_id, subject_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_attempts_learner ON attempts(learner_id, completed_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_questions_scope ON questions(subject_id, grade_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_assessment_items_assessment ON assessment_items(assessment_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
