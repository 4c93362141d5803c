use std::str::FromStr;

use lms_core::model::{
    Course, CourseEnrollment, CourseStatus, EnrollmentMemberStatus, Lesson, LessonType, Meeting,
    MeetingReport, User, VideoQueue, VideoQueueStatus, WatchHistory,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn id_from<T: FromStr>(row: &SqliteRow, column: &'static str) -> Result<T, StorageError> {
    let raw: String = row.try_get(column).map_err(ser)?;
    raw.parse::<T>()
        .map_err(|_| StorageError::Serialization(format!("invalid {column}: {raw}")))
}

fn opt_id_from<T: FromStr>(row: &SqliteRow, column: &'static str) -> Result<Option<T>, StorageError> {
    row.try_get::<Option<String>, _>(column)
        .map_err(ser)?
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| StorageError::Serialization(format!("invalid {column}: {raw}")))
        })
        .transpose()
}

fn u32_from(row: &SqliteRow, column: &'static str) -> Result<u32, StorageError> {
    let v: i64 = row.try_get(column).map_err(ser)?;
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("{column} overflow: {v}")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn count_to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

pub(crate) fn map_user_row(row: &SqliteRow) -> Result<User, StorageError> {
    Ok(User {
        id: id_from(row, "id")?,
        full_name: row.try_get("full_name").map_err(ser)?,
        email: row.try_get("email").map_err(ser)?,
    })
}

pub(crate) fn map_course_row(row: &SqliteRow) -> Result<Course, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(Course {
        id: id_from(row, "id")?,
        slug: row.try_get("slug").map_err(ser)?,
        name: row.try_get("name").map_err(ser)?,
        status: CourseStatus::parse(&status)?,
        created_by: id_from(row, "created_by")?,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

pub(crate) fn map_lesson_row(row: &SqliteRow) -> Result<Lesson, StorageError> {
    let lesson_type: String = row.try_get("lesson_type").map_err(ser)?;
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(Lesson {
        id: id_from(row, "id")?,
        course_id: id_from(row, "course_id")?,
        section_id: id_from(row, "section_id")?,
        slug: row.try_get("slug").map_err(ser)?,
        name: row.try_get("name").map_err(ser)?,
        lesson_type: LessonType::parse(&lesson_type)?,
        status: CourseStatus::parse(&status)?,
        order: u32_from(row, "sort_order")?,
        video_url: row.try_get("video_url").map_err(ser)?,
        is_deleted: row.try_get("is_deleted").map_err(ser)?,
        created_by: id_from(row, "created_by")?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_watch_row(row: &SqliteRow) -> Result<WatchHistory, StorageError> {
    Ok(WatchHistory {
        id: id_from(row, "id")?,
        course_id: id_from(row, "course_id")?,
        lesson_id: id_from(row, "lesson_id")?,
        user_id: id_from(row, "user_id")?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
        is_passed: row.try_get("is_passed").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_enrollment_row(row: &SqliteRow) -> Result<CourseEnrollment, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    let percentage: i64 = row.try_get("percentage").map_err(ser)?;
    Ok(CourseEnrollment {
        id: id_from(row, "id")?,
        course_id: id_from(row, "course_id")?,
        user_id: id_from(row, "user_id")?,
        percentage: u8::try_from(percentage)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| StorageError::Serialization(format!("invalid percentage: {percentage}")))?,
        status: EnrollmentMemberStatus::parse(&status)?,
        current_lesson_id: opt_id_from(row, "current_lesson_id")?,
        enrolled_at: row.try_get("enrolled_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_meeting_row(row: &SqliteRow) -> Result<Meeting, StorageError> {
    let number: i64 = row.try_get("meeting_number").map_err(ser)?;
    Ok(Meeting {
        id: id_from(row, "id")?,
        lesson_id: id_from(row, "lesson_id")?,
        meeting_number: u64::try_from(number)
            .map_err(|_| StorageError::Serialization("meeting_number sign overflow".into()))?,
        passcode: row.try_get("passcode").map_err(ser)?,
        start_date: row.try_get("start_date").map_err(ser)?,
        duration_minutes: u32_from(row, "duration_minutes")?,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

pub(crate) fn map_report_row(row: &SqliteRow) -> Result<MeetingReport, StorageError> {
    Ok(MeetingReport {
        id: id_from(row, "id")?,
        meeting_id: id_from(row, "meeting_id")?,
        user_id: id_from(row, "user_id")?,
        start_time: row.try_get("start_time").map_err(ser)?,
        join_time: row.try_get("join_time").map_err(ser)?,
        left_time: row.try_get("left_time").map_err(ser)?,
        duration_secs: row.try_get("duration_secs").map_err(ser)?,
    })
}

pub(crate) fn map_queue_row(row: &SqliteRow) -> Result<VideoQueue, StorageError> {
    let status: String = row.try_get("status").map_err(ser)?;
    Ok(VideoQueue {
        id: id_from(row, "id")?,
        lesson_id: id_from(row, "lesson_id")?,
        video_url: row.try_get("video_url").map_err(ser)?,
        status: VideoQueueStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(ser)?,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}
