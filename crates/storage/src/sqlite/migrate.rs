use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS courses (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS sections (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            sort_order INTEGER NOT NULL CHECK (sort_order >= 1),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS lessons (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            slug TEXT NOT NULL,
            name TEXT NOT NULL,
            lesson_type TEXT NOT NULL,
            status TEXT NOT NULL,
            sort_order INTEGER NOT NULL CHECK (sort_order >= 1),
            video_url TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (section_id) REFERENCES sections(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS watch_histories (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            lesson_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            is_completed INTEGER NOT NULL,
            is_passed INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (course_id, lesson_id, user_id),
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE,
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS course_enrollments (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            percentage INTEGER NOT NULL CHECK (percentage BETWEEN 0 AND 100),
            status TEXT NOT NULL,
            current_lesson_id TEXT,
            enrolled_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS meetings (
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            meeting_number INTEGER NOT NULL UNIQUE,
            passcode TEXT,
            start_date TEXT,
            duration_minutes INTEGER NOT NULL CHECK (duration_minutes >= 0),
            created_at TEXT NOT NULL,
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS meeting_reports (
            id TEXT PRIMARY KEY,
            meeting_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            join_time TEXT NOT NULL,
            left_time TEXT,
            duration_secs INTEGER,
            FOREIGN KEY (meeting_id) REFERENCES meetings(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS video_queue (
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            video_url TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    // Lesson slugs are unique among live rows only; soft-deleted lessons keep theirs.
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_lessons_active_slug
            ON lessons(slug) WHERE is_deleted = 0;
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_lessons_section_order
            ON lessons(section_id, sort_order);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_lessons_course_status
            ON lessons(course_id, status, is_deleted);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_watch_histories_course_user
            ON watch_histories(course_id, user_id, is_completed);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_enrollments_course_user
            ON course_enrollments(course_id, user_id, status);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_meeting_reports_session
            ON meeting_reports(meeting_id, user_id, start_time);
    ",
];

/// Applies pending schema versions inside one transaction each.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(version = 1, "applied schema migration");
    }

    Ok(())
}
