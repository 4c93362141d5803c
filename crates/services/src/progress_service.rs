use std::sync::Arc;

use serde::Serialize;

use lms_core::model::{
    Course, CourseId, EnrollmentMemberStatus, Identity, Lesson, LessonId, UserId, WatchHistory,
    WatchPercentage, completion_percentage,
};
use lms_core::time::Clock;
use storage::repository::{
    CourseRepository, EnrollmentRepository, LessonRepository, ProgressPersistence,
    WatchHistoryRepository, WatchUpdate,
};

use crate::error::ProgressError;

//
// ─── RESULTS ───────────────────────────────────────────────────────────────────
//

/// Watch row as stored plus the recomputed course progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchHistoryResult {
    pub watch: WatchHistory,
    pub percentage: u8,
    pub completed_lessons: u64,
    pub total_lessons: u64,
    /// `None` when the user is not enrolled in the course.
    pub enrollment_status: Option<EnrollmentMemberStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressSummary {
    pub course_id: CourseId,
    pub user_id: UserId,
    pub percentage: u8,
    pub completed_lessons: u64,
    pub total_lessons: u64,
    pub current_lesson_id: Option<LessonId>,
    pub enrollment_status: Option<EnrollmentMemberStatus>,
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Records lesson watch events and keeps enrollment progress in sync.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    courses: Arc<dyn CourseRepository>,
    lessons: Arc<dyn LessonRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    watch_history: Arc<dyn WatchHistoryRepository>,
    progress: Arc<dyn ProgressPersistence>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        courses: Arc<dyn CourseRepository>,
        lessons: Arc<dyn LessonRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
        watch_history: Arc<dyn WatchHistoryRepository>,
        progress: Arc<dyn ProgressPersistence>,
    ) -> Self {
        Self {
            clock,
            courses,
            lessons,
            enrollments,
            watch_history,
            progress,
        }
    }

    /// Store how far `user_id` got through a lesson and refresh the course
    /// completion percentage.
    ///
    /// A lesson counts as completed only at exactly 100%. The watch upsert,
    /// the recount and the enrollment update are committed together.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::Validation` for a percentage above 100,
    /// `CourseNotFound`/`LessonNotFound` when either identity does not
    /// resolve (deleted lessons and lessons of other courses included), or
    /// `Storage` on persistence failures.
    #[tracing::instrument(skip(self))]
    pub async fn record_watch(
        &self,
        course: &Identity,
        lesson: &Identity,
        user_id: UserId,
        watched_percentage: u32,
    ) -> Result<WatchHistoryResult, ProgressError> {
        let watched = WatchPercentage::new(watched_percentage)?;
        let course = self.resolve_course(course).await?;
        let lesson = self.resolve_lesson(&course, lesson).await?;

        let outcome = self
            .progress
            .record_watch(WatchUpdate {
                course_id: course.id,
                lesson_id: lesson.id,
                user_id,
                is_completed: watched.is_complete(),
                at: self.clock.now(),
            })
            .await?;

        if outcome.enrollment.is_none() {
            tracing::warn!(course_id = %course.id, "no active enrollment; enrollment not updated");
        }
        tracing::info!(
            lesson_id = %lesson.id,
            watched = watched.value(),
            percentage = outcome.percentage,
            completed = outcome.completed_lessons,
            total = outcome.total_lessons,
            "watch recorded"
        );

        Ok(WatchHistoryResult {
            watch: outcome.watch,
            percentage: outcome.percentage,
            completed_lessons: outcome.completed_lessons,
            total_lessons: outcome.total_lessons,
            enrollment_status: outcome.enrollment.map(|e| e.status),
        })
    }

    /// Current completion of `user_id` in a course, computed from stored
    /// watch history.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::CourseNotFound` for an unknown course, or
    /// `Storage` on lookup failures.
    pub async fn progress_summary(
        &self,
        course: &Identity,
        user_id: UserId,
    ) -> Result<ProgressSummary, ProgressError> {
        let course = self.resolve_course(course).await?;
        let completed_lessons = self.watch_history.count_completed(course.id, user_id).await?;
        let total_lessons = self.lessons.count_published_lessons(course.id).await?;
        let enrollment = self
            .enrollments
            .find_active_enrollment(course.id, user_id)
            .await?;

        Ok(ProgressSummary {
            course_id: course.id,
            user_id,
            percentage: completion_percentage(completed_lessons, total_lessons),
            completed_lessons,
            total_lessons,
            current_lesson_id: enrollment.as_ref().and_then(|e| e.current_lesson_id),
            enrollment_status: enrollment.map(|e| e.status),
        })
    }

    async fn resolve_course(&self, identity: &Identity) -> Result<Course, ProgressError> {
        let found = match identity {
            Identity::Id(id) => self.courses.get_course(CourseId::new(*id)).await?,
            Identity::Slug(slug) => self.courses.find_course_by_slug(slug).await?,
        };
        found.ok_or_else(|| ProgressError::CourseNotFound(identity.to_string()))
    }

    async fn resolve_lesson(
        &self,
        course: &Course,
        identity: &Identity,
    ) -> Result<Lesson, ProgressError> {
        let found = match identity {
            Identity::Id(id) => self.lessons.get_lesson(LessonId::new(*id)).await?,
            Identity::Slug(slug) => self.lessons.find_lesson_by_slug(slug).await?,
        };
        found
            .filter(|l| !l.is_deleted && l.course_id == course.id)
            .ok_or_else(|| ProgressError::LessonNotFound(identity.to_string()))
    }
}
