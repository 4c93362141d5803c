use lms_core::model::{
    CourseId, CourseStatus, Lesson, LessonId, LessonType, SectionId, VideoQueue,
};
use sqlx::SqliteConnection;

use super::SqliteRepository;
use super::mapping::{conn, count_to_u64, map_lesson_row, map_queue_row};
use crate::repository::{
    LessonPersistence, LessonRepository, RecordingCommit, RecordingCommitOutcome, StorageError,
    VideoQueueRepository,
};

const LESSON_COLUMNS: &str = "id, course_id, section_id, slug, name, lesson_type, status, \
     sort_order, video_url, is_deleted, created_by, created_at, updated_at";

async fn insert_lesson(db: &mut SqliteConnection, lesson: &Lesson) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO lessons (
            id, course_id, section_id, slug, name, lesson_type, status,
            sort_order, video_url, is_deleted, created_by, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ",
    )
    .bind(lesson.id.to_string())
    .bind(lesson.course_id.to_string())
    .bind(lesson.section_id.to_string())
    .bind(&lesson.slug)
    .bind(&lesson.name)
    .bind(lesson.lesson_type.as_str())
    .bind(lesson.status.as_str())
    .bind(i64::from(lesson.order))
    .bind(lesson.video_url.as_deref())
    .bind(lesson.is_deleted)
    .bind(lesson.created_by.to_string())
    .bind(lesson.created_at)
    .bind(lesson.updated_at)
    .execute(&mut *db)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => StorageError::Conflict,
        other => conn(other),
    })?;
    Ok(())
}

/// Rewrites the mutable columns; returns the number of rows touched.
async fn update_lesson(db: &mut SqliteConnection, lesson: &Lesson) -> Result<u64, StorageError> {
    let res = sqlx::query(
        r"
        UPDATE lessons SET
            slug = ?2,
            name = ?3,
            lesson_type = ?4,
            status = ?5,
            sort_order = ?6,
            video_url = ?7,
            is_deleted = ?8,
            updated_at = ?9
        WHERE id = ?1
        ",
    )
    .bind(lesson.id.to_string())
    .bind(&lesson.slug)
    .bind(&lesson.name)
    .bind(lesson.lesson_type.as_str())
    .bind(lesson.status.as_str())
    .bind(i64::from(lesson.order))
    .bind(lesson.video_url.as_deref())
    .bind(lesson.is_deleted)
    .bind(lesson.updated_at)
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(res.rows_affected())
}

async fn insert_queue(db: &mut SqliteConnection, entry: &VideoQueue) -> Result<(), StorageError> {
    sqlx::query(
        r"
        INSERT INTO video_queue (id, lesson_id, video_url, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
    )
    .bind(entry.id.to_string())
    .bind(entry.lesson_id.to_string())
    .bind(&entry.video_url)
    .bind(entry.status.as_str())
    .bind(entry.created_at)
    .bind(entry.updated_at)
    .execute(&mut *db)
    .await
    .map_err(conn)?;
    Ok(())
}

#[async_trait::async_trait]
impl LessonRepository for SqliteRepository {
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;
        if update_lesson(&mut tx, lesson).await? == 0 {
            insert_lesson(&mut tx, lesson).await?;
        }
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(&format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn find_lesson_by_slug(&self, slug: &str) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE slug = ?1 AND is_deleted = 0"
        ))
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_lesson_row).transpose()
    }

    async fn lesson_slug_exists(&self, slug: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM lessons WHERE slug = ?1 AND is_deleted = 0")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;
        Ok(row.is_some())
    }

    async fn lessons_in_section(
        &self,
        section_id: SectionId,
    ) -> Result<Vec<Lesson>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {LESSON_COLUMNS} FROM lessons
            WHERE section_id = ?1 AND is_deleted = 0
            ORDER BY sort_order ASC
            "
        ))
        .bind(section_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_lesson_row).collect()
    }

    async fn count_published_lessons(&self, course_id: CourseId) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM lessons
            WHERE course_id = ?1 AND status = ?2 AND is_deleted = 0
            ",
        )
        .bind(course_id.to_string())
        .bind(CourseStatus::Published.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;
        Ok(count_to_u64(count))
    }
}

#[async_trait::async_trait]
impl VideoQueueRepository for SqliteRepository {
    async fn queue_for_lesson(&self, lesson_id: LessonId) -> Result<Vec<VideoQueue>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, lesson_id, video_url, status, created_at, updated_at
            FROM video_queue WHERE lesson_id = ?1
            ORDER BY created_at ASC
            ",
        )
        .bind(lesson_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_queue_row).collect()
    }
}

#[async_trait::async_trait]
impl LessonPersistence for SqliteRepository {
    async fn commit_recording(
        &self,
        commit: RecordingCommit,
    ) -> Result<RecordingCommitOutcome, StorageError> {
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // Writing first takes the database write lock, so the row read here
        // is the one every later statement in this transaction builds on.
        let claimed = sqlx::query(&format!(
            r"
            UPDATE lessons SET updated_at = ?1
            WHERE id = ?2 AND lesson_type = ?3 AND is_deleted = 0
            RETURNING {LESSON_COLUMNS}
            "
        ))
        .bind(commit.at)
        .bind(commit.lesson_id.to_string())
        .bind(LessonType::LiveClass.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(conn)?;

        let Some(row) = claimed else {
            tx.rollback().await.map_err(conn)?;
            let current = self.get_lesson(commit.lesson_id).await?;
            return Ok(RecordingCommitOutcome::NotLiveClass(current));
        };
        let lesson = map_lesson_row(&row)?;
        let plan = commit.plan(&lesson)?;

        if let Some(shift) = plan.shift {
            let res = sqlx::query(
                r"
                UPDATE lessons SET sort_order = sort_order + ?1
                WHERE section_id = ?2 AND is_deleted = 0 AND sort_order > ?3
                ",
            )
            .bind(i64::from(shift.by))
            .bind(shift.section_id.to_string())
            .bind(i64::from(shift.after_order))
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
            tracing::debug!(
                section_id = %shift.section_id,
                shifted = res.rows_affected(),
                by = shift.by,
                "shifted sibling lessons"
            );
        }

        sqlx::query(
            r"
            UPDATE lessons SET name = ?1, lesson_type = ?2, video_url = ?3, updated_at = ?4
            WHERE id = ?5
            ",
        )
        .bind(&plan.updated.name)
        .bind(plan.updated.lesson_type.as_str())
        .bind(plan.updated.video_url.as_deref())
        .bind(plan.updated.updated_at)
        .bind(plan.updated.id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        // A slug conflict here drops `tx`, undoing the shift and the rewrite.
        for lesson in &plan.created {
            insert_lesson(&mut tx, lesson).await?;
        }
        for entry in &plan.video_queue {
            insert_queue(&mut tx, entry).await?;
        }

        tx.commit().await.map_err(conn)?;
        Ok(RecordingCommitOutcome::Applied(plan))
    }
}
