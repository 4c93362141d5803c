use chrono::{DateTime, Utc};
use lms_core::model::{Meeting, MeetingId, MeetingReport, UserId};

use super::SqliteRepository;
use super::mapping::{conn, map_meeting_row, map_report_row, u64_to_i64};
use super::progress_repo::refresh_enrollment;
use crate::repository::{
    AttendancePersistence, JoinOutcome, JoinRecord, MeetingRepository, StorageError,
};

const REPORT_COLUMNS: &str =
    "id, meeting_id, user_id, start_time, join_time, left_time, duration_secs";

#[async_trait::async_trait]
impl MeetingRepository for SqliteRepository {
    async fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO meetings (
                id, lesson_id, meeting_number, passcode, start_date, duration_minutes, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                lesson_id = excluded.lesson_id,
                meeting_number = excluded.meeting_number,
                passcode = excluded.passcode,
                start_date = excluded.start_date,
                duration_minutes = excluded.duration_minutes
            ",
        )
        .bind(meeting.id.to_string())
        .bind(meeting.lesson_id.to_string())
        .bind(u64_to_i64("meeting_number", meeting.meeting_number)?)
        .bind(meeting.passcode.as_deref())
        .bind(meeting.start_date)
        .bind(i64::from(meeting.duration_minutes))
        .bind(meeting.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::Conflict
            }
            other => conn(other),
        })?;
        Ok(())
    }

    async fn find_meeting_by_number(
        &self,
        meeting_number: u64,
    ) -> Result<Option<Meeting>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, lesson_id, meeting_number, passcode, start_date, duration_minutes, created_at
            FROM meetings WHERE meeting_number = ?1
            ",
        )
        .bind(u64_to_i64("meeting_number", meeting_number)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_meeting_row).transpose()
    }

    async fn reports_for(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
    ) -> Result<Vec<MeetingReport>, StorageError> {
        let rows = sqlx::query(&format!(
            r"
            SELECT {REPORT_COLUMNS} FROM meeting_reports
            WHERE meeting_id = ?1 AND user_id = ?2
            ORDER BY join_time ASC
            "
        ))
        .bind(meeting_id.to_string())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        rows.iter().map(map_report_row).collect()
    }

    async fn find_open_report(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        start_time: DateTime<Utc>,
    ) -> Result<Option<MeetingReport>, StorageError> {
        let row = sqlx::query(&format!(
            r"
            SELECT {REPORT_COLUMNS} FROM meeting_reports
            WHERE meeting_id = ?1 AND user_id = ?2 AND start_time = ?3 AND left_time IS NULL
            ORDER BY join_time ASC
            LIMIT 1
            "
        ))
        .bind(meeting_id.to_string())
        .bind(user_id.to_string())
        .bind(start_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_report_row).transpose()
    }

    async fn close_report(&self, report: &MeetingReport) -> Result<bool, StorageError> {
        let res = sqlx::query(
            r"
            UPDATE meeting_reports SET left_time = ?2, duration_secs = ?3
            WHERE id = ?1 AND left_time IS NULL
            ",
        )
        .bind(report.id.to_string())
        .bind(report.left_time)
        .bind(report.duration_secs)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(res.rows_affected() == 1)
    }
}

#[async_trait::async_trait]
impl AttendancePersistence for SqliteRepository {
    async fn record_join(&self, join: JoinRecord) -> Result<JoinOutcome, StorageError> {
        let attendance = &join.attendance;
        let report = &join.report;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let inserted = sqlx::query(
            r"
            INSERT INTO watch_histories (
                id, course_id, lesson_id, user_id, is_completed, is_passed, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(course_id, lesson_id, user_id) DO NOTHING
            ",
        )
        .bind(attendance.id.to_string())
        .bind(attendance.course_id.to_string())
        .bind(attendance.lesson_id.to_string())
        .bind(attendance.user_id.to_string())
        .bind(attendance.is_completed)
        .bind(attendance.is_passed)
        .bind(attendance.created_at)
        .bind(attendance.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?
        .rows_affected();

        let attendance_created = inserted == 1;
        let enrollment = if attendance_created {
            refresh_enrollment(
                &mut tx,
                attendance.course_id,
                attendance.user_id,
                attendance.lesson_id,
                attendance.updated_at,
            )
            .await?
            .3
        } else {
            None
        };

        sqlx::query(&format!(
            r"
            INSERT INTO meeting_reports ({REPORT_COLUMNS})
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "
        ))
        .bind(report.id.to_string())
        .bind(report.meeting_id.to_string())
        .bind(report.user_id.to_string())
        .bind(report.start_time)
        .bind(report.join_time)
        .bind(report.left_time)
        .bind(report.duration_secs)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        tx.commit().await.map_err(conn)?;

        Ok(JoinOutcome {
            attendance_created,
            enrollment,
        })
    }
}
