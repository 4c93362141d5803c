use chrono::{DateTime, Utc};
use lms_core::model::{
    CourseEnrollment, CourseId, CourseStatus, EnrollmentMemberStatus, LessonId, UserId,
    WatchHistory, WatchHistoryId, completion_percentage,
};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{conn, count_to_u64, map_enrollment_row, map_watch_row};
use crate::repository::{
    EnrollmentRepository, ProgressPersistence, StorageError, WatchHistoryRepository, WatchOutcome,
    WatchUpdate,
};

const ENROLLMENT_COLUMNS: &str =
    "id, course_id, user_id, percentage, status, current_lesson_id, enrolled_at, updated_at";

const WATCH_COLUMNS: &str =
    "id, course_id, lesson_id, user_id, is_completed, is_passed, created_at, updated_at";

async fn count_completed(
    db: &mut SqliteConnection,
    course_id: CourseId,
    user_id: UserId,
) -> Result<u64, StorageError> {
    let count: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*)
        FROM watch_histories w
        JOIN lessons l ON l.id = w.lesson_id
        WHERE w.course_id = ?1
          AND w.user_id = ?2
          AND w.is_completed = 1
          AND l.course_id = ?1
          AND l.status = ?3
          AND l.is_deleted = 0
        ",
    )
    .bind(course_id.to_string())
    .bind(user_id.to_string())
    .bind(CourseStatus::Published.as_str())
    .fetch_one(&mut *db)
    .await
    .map_err(conn)?;
    Ok(count_to_u64(count))
}

async fn count_published(
    db: &mut SqliteConnection,
    course_id: CourseId,
) -> Result<u64, StorageError> {
    let count: i64 = sqlx::query_scalar(
        r"
        SELECT COUNT(*) FROM lessons
        WHERE course_id = ?1 AND status = ?2 AND is_deleted = 0
        ",
    )
    .bind(course_id.to_string())
    .bind(CourseStatus::Published.as_str())
    .fetch_one(&mut *db)
    .await
    .map_err(conn)?;
    Ok(count_to_u64(count))
}

async fn active_enrollment(
    db: &mut SqliteConnection,
    course_id: CourseId,
    user_id: UserId,
) -> Result<Option<CourseEnrollment>, StorageError> {
    let row = sqlx::query(&format!(
        r"
        SELECT {ENROLLMENT_COLUMNS} FROM course_enrollments
        WHERE course_id = ?1 AND user_id = ?2 AND status IN (?3, ?4)
        ORDER BY enrolled_at DESC
        LIMIT 1
        "
    ))
    .bind(course_id.to_string())
    .bind(user_id.to_string())
    .bind(EnrollmentMemberStatus::Enrolled.as_str())
    .bind(EnrollmentMemberStatus::Completed.as_str())
    .fetch_optional(&mut *db)
    .await
    .map_err(conn)?;

    row.as_ref().map(map_enrollment_row).transpose()
}

async fn write_enrollment(
    db: &mut SqliteConnection,
    enrollment: &CourseEnrollment,
) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO course_enrollments (
            id, course_id, user_id, percentage, status, current_lesson_id, enrolled_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            percentage = excluded.percentage,
            status = excluded.status,
            current_lesson_id = excluded.current_lesson_id,
            updated_at = excluded.updated_at
        ",
    )
    .bind(enrollment.id.to_string())
    .bind(enrollment.course_id.to_string())
    .bind(enrollment.user_id.to_string())
    .bind(i64::from(enrollment.percentage))
    .bind(enrollment.status.as_str())
    .bind(enrollment.current_lesson_id.map(|id| id.to_string()))
    .bind(enrollment.enrolled_at)
    .bind(enrollment.updated_at)
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(())
}

/// Recount completion for (course, user) and store it on the active
/// enrollment. Must run inside the caller's transaction.
pub(super) async fn refresh_enrollment(
    db: &mut SqliteConnection,
    course_id: CourseId,
    user_id: UserId,
    lesson_id: LessonId,
    at: DateTime<Utc>,
) -> Result<(u64, u64, u8, Option<CourseEnrollment>), StorageError> {
    let completed = count_completed(db, course_id, user_id).await?;
    let total = count_published(db, course_id).await?;
    let percentage = completion_percentage(completed, total);

    let mut enrollment = active_enrollment(db, course_id, user_id).await?;
    if let Some(e) = enrollment.as_mut() {
        e.apply_progress(percentage, Some(lesson_id), at);
        write_enrollment(db, e).await?;
    }
    Ok((completed, total, percentage, enrollment))
}

#[async_trait::async_trait]
impl WatchHistoryRepository for SqliteRepository {
    async fn find_watch(
        &self,
        course_id: CourseId,
        lesson_id: LessonId,
        user_id: UserId,
    ) -> Result<Option<WatchHistory>, StorageError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {WATCH_COLUMNS} FROM watch_histories
            WHERE course_id = ?1 AND lesson_id = ?2 AND user_id = ?3
            "
        ))
        .bind(course_id.to_string())
        .bind(lesson_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_watch_row).transpose()
    }

    async fn watch_history_for_user(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Vec<WatchHistory>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {WATCH_COLUMNS} FROM watch_histories
            WHERE course_id = ?1 AND user_id = ?2
            ORDER BY created_at ASC
            "
        ))
        .bind(course_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_watch_row).collect()
    }

    async fn count_completed(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<u64, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        count_completed(&mut db, course_id, user_id).await
    }
}

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn upsert_enrollment(&self, enrollment: &CourseEnrollment) -> Result<(), StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        write_enrollment(&mut db, enrollment).await
    }

    async fn find_active_enrollment(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Option<CourseEnrollment>, StorageError> {
        let mut db = self.pool.acquire().await.map_err(conn)?;
        active_enrollment(&mut db, course_id, user_id).await
    }
}

#[async_trait::async_trait]
impl ProgressPersistence for SqliteRepository {
    async fn record_watch(&self, update: WatchUpdate) -> Result<WatchOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // The upsert is the first statement so the write lock is held for the
        // recount below.
        let row = sqlx::query(&format!(
            r"
            INSERT INTO watch_histories (
                id, course_id, lesson_id, user_id, is_completed, is_passed, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?6)
            ON CONFLICT(course_id, lesson_id, user_id) DO UPDATE SET
                is_completed = excluded.is_completed,
                is_passed = excluded.is_passed,
                updated_at = excluded.updated_at
            RETURNING {WATCH_COLUMNS}
            "
        ))
        .bind(WatchHistoryId::generate().to_string())
        .bind(update.course_id.to_string())
        .bind(update.lesson_id.to_string())
        .bind(update.user_id.to_string())
        .bind(update.is_completed)
        .bind(update.at)
        .fetch_one(&mut *tx)
        .await
        .map_err(conn)?;
        let watch = map_watch_row(&row)?;

        let (completed_lessons, total_lessons, percentage, enrollment) = refresh_enrollment(
            &mut tx,
            update.course_id,
            update.user_id,
            update.lesson_id,
            update.at,
        )
        .await?;

        tx.commit().await.map_err(conn)?;

        Ok(WatchOutcome {
            watch,
            completed_lessons,
            total_lessons,
            percentage,
            enrollment,
        })
    }
}
