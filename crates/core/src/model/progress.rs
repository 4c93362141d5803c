use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::ids::{CourseId, EnrollmentId, LessonId, UserId, WatchHistoryId};

//
// ─── WATCH PERCENTAGE ──────────────────────────────────────────────────────────
//

/// Client-reported share of a lesson that was watched, `0..=100`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct WatchPercentage(u8);

impl WatchPercentage {
    pub const FULL: Self = Self(100);

    /// # Errors
    ///
    /// Returns `ValidationError::WatchedPercentage` when `value > 100`.
    pub fn new(value: u32) -> Result<Self, ValidationError> {
        u8::try_from(value)
            .ok()
            .filter(|v| *v <= 100)
            .map(Self)
            .ok_or(ValidationError::WatchedPercentage(value))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_complete(self) -> bool {
        self.0 == 100
    }
}

impl TryFrom<u32> for WatchPercentage {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WatchPercentage> for u32 {
    fn from(value: WatchPercentage) -> Self {
        u32::from(value.0)
    }
}

/// Course completion as a whole percentage.
///
/// `floor(100 * completed / total)`, clamped to 100. A course without
/// published lessons is 0% complete.
#[must_use]
pub fn completion_percentage(completed: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = completed.saturating_mul(100) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}

//
// ─── WATCH HISTORY ─────────────────────────────────────────────────────────────
//

/// One row per (course, lesson, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchHistory {
    pub id: WatchHistoryId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub user_id: UserId,
    pub is_completed: bool,
    pub is_passed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WatchHistory {
    #[must_use]
    pub fn new(
        id: WatchHistoryId,
        course_id: CourseId,
        lesson_id: LessonId,
        user_id: UserId,
        is_completed: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            course_id,
            lesson_id,
            user_id,
            is_completed,
            is_passed: is_completed,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites the completion flags from a newer watch event.
    pub fn record(&mut self, is_completed: bool, now: DateTime<Utc>) {
        self.is_completed = is_completed;
        self.is_passed = is_completed;
        self.updated_at = now;
    }
}

//
// ─── ENROLLMENT ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentMemberStatus {
    Enrolled,
    Completed,
    Unenrolled,
}

impl EnrollmentMemberStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentMemberStatus::Enrolled => "enrolled",
            EnrollmentMemberStatus::Completed => "completed",
            EnrollmentMemberStatus::Unenrolled => "unenrolled",
        }
    }

    /// # Errors
    ///
    /// Returns `ValidationError::Invalid` for unknown values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "enrolled" => Ok(EnrollmentMemberStatus::Enrolled),
            "completed" => Ok(EnrollmentMemberStatus::Completed),
            "unenrolled" => Ok(EnrollmentMemberStatus::Unenrolled),
            other => Err(ValidationError::Invalid {
                field: "enrollment_status",
                value: other.to_owned(),
            }),
        }
    }

    /// Enrollments whose progress is still tracked.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            EnrollmentMemberStatus::Enrolled | EnrollmentMemberStatus::Completed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEnrollment {
    pub id: EnrollmentId,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub percentage: u8,
    pub status: EnrollmentMemberStatus,
    pub current_lesson_id: Option<LessonId>,
    pub enrolled_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseEnrollment {
    #[must_use]
    pub fn new(
        id: EnrollmentId,
        course_id: CourseId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            course_id,
            user_id,
            percentage: 0,
            status: EnrollmentMemberStatus::Enrolled,
            current_lesson_id: None,
            enrolled_at: now,
            updated_at: now,
        }
    }

    /// Stores a recomputed percentage and the lesson last viewed.
    ///
    /// Status moves to `Completed` when the percentage reaches 100 and is
    /// otherwise left untouched; a lower percentage never reopens a
    /// completed enrollment.
    pub fn apply_progress(
        &mut self,
        percentage: u8,
        current_lesson_id: Option<LessonId>,
        now: DateTime<Utc>,
    ) {
        self.percentage = percentage.min(100);
        if current_lesson_id.is_some() {
            self.current_lesson_id = current_lesson_id;
        }
        if self.percentage == 100 {
            self.status = EnrollmentMemberStatus::Completed;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn percentage_guards_zero_lessons() {
        assert_eq!(completion_percentage(0, 0), 0);
        assert_eq!(completion_percentage(3, 0), 0);
    }

    #[test]
    fn percentage_floors() {
        assert_eq!(completion_percentage(3, 4), 75);
        assert_eq!(completion_percentage(1, 3), 33);
        assert_eq!(completion_percentage(2, 3), 66);
        assert_eq!(completion_percentage(4, 4), 100);
    }

    #[test]
    fn percentage_is_clamped() {
        assert_eq!(completion_percentage(7, 4), 100);
        assert_eq!(completion_percentage(u64::MAX, 1), 100);
    }

    #[test]
    fn watch_percentage_bounds() {
        assert!(WatchPercentage::new(100).unwrap().is_complete());
        assert!(!WatchPercentage::new(99).unwrap().is_complete());
        assert_eq!(
            WatchPercentage::new(101).unwrap_err(),
            ValidationError::WatchedPercentage(101)
        );
        assert!(WatchPercentage::new(u32::MAX).is_err());
    }

    #[test]
    fn enrollment_completes_at_100_and_never_regresses() {
        let mut enrollment = CourseEnrollment::new(
            EnrollmentId::generate(),
            CourseId::generate(),
            UserId::generate(),
            fixed_now(),
        );
        let lesson = LessonId::generate();

        enrollment.apply_progress(75, Some(lesson), fixed_now());
        assert_eq!(enrollment.status, EnrollmentMemberStatus::Enrolled);
        assert_eq!(enrollment.current_lesson_id, Some(lesson));

        enrollment.apply_progress(100, None, fixed_now());
        assert_eq!(enrollment.status, EnrollmentMemberStatus::Completed);
        assert_eq!(enrollment.current_lesson_id, Some(lesson));

        enrollment.apply_progress(50, Some(lesson), fixed_now());
        assert_eq!(enrollment.percentage, 50);
        assert_eq!(enrollment.status, EnrollmentMemberStatus::Completed);
    }

    #[test]
    fn watch_history_record_overwrites_flags() {
        let mut row = WatchHistory::new(
            WatchHistoryId::generate(),
            CourseId::generate(),
            LessonId::generate(),
            UserId::generate(),
            true,
            fixed_now(),
        );
        row.record(false, fixed_now() + chrono::Duration::minutes(5));
        assert!(!row.is_completed);
        assert!(!row.is_passed);
        assert!(row.updated_at > row.created_at);
    }
}
