use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lms_core::ValidationError;
use lms_core::model::{
    Course, CourseEnrollment, CourseId, Lesson, LessonId, Meeting, MeetingId, MeetingReport,
    ReassemblyError, RecordingReassembly, Section, SectionId, UploadedPart, User, UserId,
    VideoQueue, WatchHistory, WatchHistoryId, completion_percentage, plan_reassembly,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
}

impl From<ValidationError> for StorageError {
    fn from(err: ValidationError) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

//
// ─── TRANSACTIONAL SHAPES ──────────────────────────────────────────────────────
//

/// A watch event to upsert for (course, lesson, user).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchUpdate {
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub user_id: UserId,
    pub is_completed: bool,
    pub at: DateTime<Utc>,
}

/// State after a watch event has been committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchOutcome {
    pub watch: WatchHistory,
    pub completed_lessons: u64,
    pub total_lessons: u64,
    pub percentage: u8,
    /// `None` when the user has no active enrollment in the course.
    pub enrollment: Option<CourseEnrollment>,
}

/// Uploaded recording parts to fold into a live-class lesson.
///
/// The store re-reads the lesson inside its transaction and plans against
/// that row, so the sibling shift and the new orders reflect every commit
/// that landed while the parts were uploading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingCommit {
    pub lesson_id: LessonId,
    pub parts: Vec<UploadedPart>,
    /// One unique slug per part after the first, in part order.
    pub slugs: Vec<String>,
    pub at: DateTime<Utc>,
}

impl RecordingCommit {
    pub(crate) fn plan(&self, lesson: &Lesson) -> Result<RecordingReassembly, ReassemblyError> {
        plan_reassembly(lesson, &self.parts, self.slugs.clone(), self.at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingCommitOutcome {
    Applied(RecordingReassembly),
    /// Nothing was written: the lesson was missing, deleted or no longer a
    /// live class when the transaction read it. Carries the row as read.
    NotLiveClass(Option<Lesson>),
}

/// A participant join: attendance mark (inserted only if absent) plus the
/// open meeting report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub attendance: WatchHistory,
    pub report: MeetingReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub attendance_created: bool,
    pub enrollment: Option<CourseEnrollment>,
}

//
// ─── REPOSITORY CONTRACTS ──────────────────────────────────────────────────────
//

#[async_trait]
pub trait CourseRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the course cannot be stored.
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError>;

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError>;

    async fn find_course_by_slug(&self, slug: &str) -> Result<Option<Course>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the section cannot be stored.
    async fn upsert_section(&self, section: &Section) -> Result<(), StorageError>;
}

#[async_trait]
pub trait LessonRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the lesson cannot be stored.
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError>;

    /// Fetch a lesson by ID, including soft-deleted ones.
    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError>;

    /// Fetch a non-deleted lesson by slug.
    async fn find_lesson_by_slug(&self, slug: &str) -> Result<Option<Lesson>, StorageError>;

    /// Whether a non-deleted lesson already uses `slug`.
    async fn lesson_slug_exists(&self, slug: &str) -> Result<bool, StorageError>;

    /// Non-deleted lessons of a section ordered by `order`.
    async fn lessons_in_section(&self, section_id: SectionId)
    -> Result<Vec<Lesson>, StorageError>;

    /// Published, non-deleted lessons of a course.
    async fn count_published_lessons(&self, course_id: CourseId) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn upsert_user(&self, user: &User) -> Result<(), StorageError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError>;
}

#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    async fn upsert_enrollment(&self, enrollment: &CourseEnrollment) -> Result<(), StorageError>;

    /// The user's Enrolled or Completed enrollment in the course, if any.
    async fn find_active_enrollment(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Option<CourseEnrollment>, StorageError>;
}

#[async_trait]
pub trait WatchHistoryRepository: Send + Sync {
    async fn find_watch(
        &self,
        course_id: CourseId,
        lesson_id: LessonId,
        user_id: UserId,
    ) -> Result<Option<WatchHistory>, StorageError>;

    async fn watch_history_for_user(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Vec<WatchHistory>, StorageError>;

    /// Completed watch rows of the user pointing at published, non-deleted
    /// lessons of the course.
    async fn count_completed(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait MeetingRepository: Send + Sync {
    async fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), StorageError>;

    async fn find_meeting_by_number(
        &self,
        meeting_number: u64,
    ) -> Result<Option<Meeting>, StorageError>;

    async fn reports_for(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
    ) -> Result<Vec<MeetingReport>, StorageError>;

    /// The earliest-joined open report for the session started at `start_time`.
    async fn find_open_report(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        start_time: DateTime<Utc>,
    ) -> Result<Option<MeetingReport>, StorageError>;

    /// Persist leave time and duration of `report`.
    ///
    /// Returns `false` when the stored row was already closed.
    async fn close_report(&self, report: &MeetingReport) -> Result<bool, StorageError>;
}

#[async_trait]
pub trait VideoQueueRepository: Send + Sync {
    async fn queue_for_lesson(&self, lesson_id: LessonId) -> Result<Vec<VideoQueue>, StorageError>;
}

/// Atomic watch upsert + completion recount + enrollment update.
#[async_trait]
pub trait ProgressPersistence: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if any write fails; nothing is persisted then.
    async fn record_watch(&self, update: WatchUpdate) -> Result<WatchOutcome, StorageError>;
}

/// Atomic recording reassembly.
#[async_trait]
pub trait LessonPersistence: Send + Sync {
    /// Re-reads the lesson, plans the reassembly against it and applies the
    /// sibling shift, the in-place rewrite (name, type, url, `updated_at`
    /// only), the new lessons and their queue rows in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if a new lesson's slug is taken,
    /// `StorageError::Reassembly` for an inconsistent part/slug list, or
    /// other storage errors. Nothing is persisted on error.
    async fn commit_recording(
        &self,
        commit: RecordingCommit,
    ) -> Result<RecordingCommitOutcome, StorageError>;
}

/// Atomic attendance mark + meeting report insert.
#[async_trait]
pub trait AttendancePersistence: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if any write fails; nothing is persisted then.
    async fn record_join(&self, join: JoinRecord) -> Result<JoinOutcome, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    courses: HashMap<CourseId, Course>,
    sections: HashMap<SectionId, Section>,
    lessons: HashMap<LessonId, Lesson>,
    users: HashMap<UserId, User>,
    enrollments: HashMap<lms_core::model::EnrollmentId, CourseEnrollment>,
    watch: HashMap<(CourseId, LessonId, UserId), WatchHistory>,
    meetings: HashMap<MeetingId, Meeting>,
    reports: HashMap<lms_core::model::MeetingReportId, MeetingReport>,
    video_queue: Vec<VideoQueue>,
}

impl MemoryState {
    fn count_published(&self, course_id: CourseId) -> u64 {
        self.lessons
            .values()
            .filter(|l| l.course_id == course_id && l.counts_toward_progress())
            .count() as u64
    }

    fn count_completed(&self, course_id: CourseId, user_id: UserId) -> u64 {
        self.watch
            .values()
            .filter(|w| w.course_id == course_id && w.user_id == user_id && w.is_completed)
            .filter(|w| {
                self.lessons
                    .get(&w.lesson_id)
                    .is_some_and(|l| l.course_id == course_id && l.counts_toward_progress())
            })
            .count() as u64
    }

    fn active_enrollment_mut(
        &mut self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Option<&mut CourseEnrollment> {
        self.enrollments
            .values_mut()
            .find(|e| e.course_id == course_id && e.user_id == user_id && e.status.is_active())
    }

    fn refresh_enrollment(
        &mut self,
        course_id: CourseId,
        user_id: UserId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> (u64, u64, u8, Option<CourseEnrollment>) {
        let completed = self.count_completed(course_id, user_id);
        let total = self.count_published(course_id);
        let percentage = completion_percentage(completed, total);
        let enrollment = self.active_enrollment_mut(course_id, user_id).map(|e| {
            e.apply_progress(percentage, Some(lesson_id), at);
            e.clone()
        });
        (completed, total, percentage, enrollment)
    }
}

/// In-memory repository for tests and local prototyping.
///
/// Every operation holds one lock over all tables, so the transactional
/// persistence traits are atomic here too.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl CourseRepository for InMemoryRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        self.lock()?.courses.insert(course.id, course.clone());
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        Ok(self.lock()?.courses.get(&id).cloned())
    }

    async fn find_course_by_slug(&self, slug: &str) -> Result<Option<Course>, StorageError> {
        Ok(self
            .lock()?
            .courses
            .values()
            .find(|c| c.slug == slug)
            .cloned())
    }

    async fn upsert_section(&self, section: &Section) -> Result<(), StorageError> {
        self.lock()?.sections.insert(section.id, section.clone());
        Ok(())
    }
}

#[async_trait]
impl LessonRepository for InMemoryRepository {
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        self.lock()?.lessons.insert(lesson.id, lesson.clone());
        Ok(())
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        Ok(self.lock()?.lessons.get(&id).cloned())
    }

    async fn find_lesson_by_slug(&self, slug: &str) -> Result<Option<Lesson>, StorageError> {
        Ok(self
            .lock()?
            .lessons
            .values()
            .find(|l| !l.is_deleted && l.slug == slug)
            .cloned())
    }

    async fn lesson_slug_exists(&self, slug: &str) -> Result<bool, StorageError> {
        Ok(self
            .lock()?
            .lessons
            .values()
            .any(|l| !l.is_deleted && l.slug == slug))
    }

    async fn lessons_in_section(
        &self,
        section_id: SectionId,
    ) -> Result<Vec<Lesson>, StorageError> {
        let mut lessons: Vec<Lesson> = self
            .lock()?
            .lessons
            .values()
            .filter(|l| l.section_id == section_id && !l.is_deleted)
            .cloned()
            .collect();
        lessons.sort_by_key(|l| l.order);
        Ok(lessons)
    }

    async fn count_published_lessons(&self, course_id: CourseId) -> Result<u64, StorageError> {
        Ok(self.lock()?.count_published(course_id))
    }
}

#[async_trait]
impl UserRepository for InMemoryRepository {
    async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        self.lock()?.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.lock()?.users.get(&id).cloned())
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn upsert_enrollment(&self, enrollment: &CourseEnrollment) -> Result<(), StorageError> {
        self.lock()?
            .enrollments
            .insert(enrollment.id, enrollment.clone());
        Ok(())
    }

    async fn find_active_enrollment(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Option<CourseEnrollment>, StorageError> {
        Ok(self
            .lock()?
            .active_enrollment_mut(course_id, user_id)
            .map(|e| e.clone()))
    }
}

#[async_trait]
impl WatchHistoryRepository for InMemoryRepository {
    async fn find_watch(
        &self,
        course_id: CourseId,
        lesson_id: LessonId,
        user_id: UserId,
    ) -> Result<Option<WatchHistory>, StorageError> {
        Ok(self
            .lock()?
            .watch
            .get(&(course_id, lesson_id, user_id))
            .cloned())
    }

    async fn watch_history_for_user(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<Vec<WatchHistory>, StorageError> {
        let mut rows: Vec<WatchHistory> = self
            .lock()?
            .watch
            .values()
            .filter(|w| w.course_id == course_id && w.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|w| w.created_at);
        Ok(rows)
    }

    async fn count_completed(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<u64, StorageError> {
        Ok(self.lock()?.count_completed(course_id, user_id))
    }
}

#[async_trait]
impl MeetingRepository for InMemoryRepository {
    async fn upsert_meeting(&self, meeting: &Meeting) -> Result<(), StorageError> {
        self.lock()?.meetings.insert(meeting.id, meeting.clone());
        Ok(())
    }

    async fn find_meeting_by_number(
        &self,
        meeting_number: u64,
    ) -> Result<Option<Meeting>, StorageError> {
        Ok(self
            .lock()?
            .meetings
            .values()
            .find(|m| m.meeting_number == meeting_number)
            .cloned())
    }

    async fn reports_for(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
    ) -> Result<Vec<MeetingReport>, StorageError> {
        let mut reports: Vec<MeetingReport> = self
            .lock()?
            .reports
            .values()
            .filter(|r| r.meeting_id == meeting_id && r.user_id == user_id)
            .cloned()
            .collect();
        reports.sort_by_key(|r| r.join_time);
        Ok(reports)
    }

    async fn find_open_report(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        start_time: DateTime<Utc>,
    ) -> Result<Option<MeetingReport>, StorageError> {
        Ok(self
            .lock()?
            .reports
            .values()
            .filter(|r| {
                r.meeting_id == meeting_id
                    && r.user_id == user_id
                    && r.start_time == start_time
                    && r.is_open()
            })
            .min_by_key(|r| r.join_time)
            .cloned())
    }

    async fn close_report(&self, report: &MeetingReport) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        let stored = state
            .reports
            .get_mut(&report.id)
            .ok_or(StorageError::NotFound)?;
        if !stored.is_open() {
            return Ok(false);
        }
        stored.left_time = report.left_time;
        stored.duration_secs = report.duration_secs;
        Ok(true)
    }
}

#[async_trait]
impl VideoQueueRepository for InMemoryRepository {
    async fn queue_for_lesson(&self, lesson_id: LessonId) -> Result<Vec<VideoQueue>, StorageError> {
        Ok(self
            .lock()?
            .video_queue
            .iter()
            .filter(|q| q.lesson_id == lesson_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ProgressPersistence for InMemoryRepository {
    async fn record_watch(&self, update: WatchUpdate) -> Result<WatchOutcome, StorageError> {
        let mut state = self.lock()?;
        let key = (update.course_id, update.lesson_id, update.user_id);
        let watch = state
            .watch
            .entry(key)
            .and_modify(|w| w.record(update.is_completed, update.at))
            .or_insert_with(|| {
                WatchHistory::new(
                    WatchHistoryId::generate(),
                    update.course_id,
                    update.lesson_id,
                    update.user_id,
                    update.is_completed,
                    update.at,
                )
            })
            .clone();

        let (completed_lessons, total_lessons, percentage, enrollment) = state.refresh_enrollment(
            update.course_id,
            update.user_id,
            update.lesson_id,
            update.at,
        );

        Ok(WatchOutcome {
            watch,
            completed_lessons,
            total_lessons,
            percentage,
            enrollment,
        })
    }
}

#[async_trait]
impl LessonPersistence for InMemoryRepository {
    async fn commit_recording(
        &self,
        commit: RecordingCommit,
    ) -> Result<RecordingCommitOutcome, StorageError> {
        let mut state = self.lock()?;

        let lesson = match state.lessons.get(&commit.lesson_id) {
            Some(lesson) if lesson.is_live_class() && !lesson.is_deleted => lesson.clone(),
            other => return Ok(RecordingCommitOutcome::NotLiveClass(other.cloned())),
        };
        let plan = commit.plan(&lesson)?;

        let slug_taken = plan.created.iter().any(|new| {
            state
                .lessons
                .values()
                .any(|l| !l.is_deleted && l.slug == new.slug)
        });
        if slug_taken {
            return Err(StorageError::Conflict);
        }

        if let Some(shift) = plan.shift {
            for sibling in state.lessons.values_mut() {
                if shift.applies_to(sibling) {
                    sibling.order += shift.by;
                }
            }
        }
        if let Some(stored) = state.lessons.get_mut(&lesson.id) {
            stored.name.clone_from(&plan.updated.name);
            stored.lesson_type = plan.updated.lesson_type;
            stored.video_url.clone_from(&plan.updated.video_url);
            stored.updated_at = plan.updated.updated_at;
        }
        for created in &plan.created {
            state.lessons.insert(created.id, created.clone());
        }
        state.video_queue.extend(plan.video_queue.iter().cloned());

        Ok(RecordingCommitOutcome::Applied(plan))
    }
}

#[async_trait]
impl AttendancePersistence for InMemoryRepository {
    async fn record_join(&self, join: JoinRecord) -> Result<JoinOutcome, StorageError> {
        let mut state = self.lock()?;
        let attendance = join.attendance;
        let key = (attendance.course_id, attendance.lesson_id, attendance.user_id);

        let attendance_created = !state.watch.contains_key(&key);
        let mut enrollment = None;
        if attendance_created {
            let (course_id, lesson_id, user_id, at) = (
                attendance.course_id,
                attendance.lesson_id,
                attendance.user_id,
                attendance.updated_at,
            );
            state.watch.insert(key, attendance);
            enrollment = state.refresh_enrollment(course_id, user_id, lesson_id, at).3;
        }
        state.reports.insert(join.report.id, join.report);

        Ok(JoinOutcome {
            attendance_created,
            enrollment,
        })
    }
}

//
// ─── AGGREGATE ─────────────────────────────────────────────────────────────────
//

/// Repositories behind trait objects, built once at startup.
#[derive(Clone)]
pub struct Storage {
    pub courses: Arc<dyn CourseRepository>,
    pub lessons: Arc<dyn LessonRepository>,
    pub users: Arc<dyn UserRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
    pub watch_history: Arc<dyn WatchHistoryRepository>,
    pub meetings: Arc<dyn MeetingRepository>,
    pub video_queue: Arc<dyn VideoQueueRepository>,
    pub progress: Arc<dyn ProgressPersistence>,
    pub lesson_changes: Arc<dyn LessonPersistence>,
    pub attendance: Arc<dyn AttendancePersistence>,
}

impl Storage {
    /// Wires every repository to clones of one backend.
    pub fn from_backend<R>(repo: R) -> Self
    where
        R: CourseRepository
            + LessonRepository
            + UserRepository
            + EnrollmentRepository
            + WatchHistoryRepository
            + MeetingRepository
            + VideoQueueRepository
            + ProgressPersistence
            + LessonPersistence
            + AttendancePersistence
            + Clone
            + 'static,
    {
        Self {
            courses: Arc::new(repo.clone()),
            lessons: Arc::new(repo.clone()),
            users: Arc::new(repo.clone()),
            enrollments: Arc::new(repo.clone()),
            watch_history: Arc::new(repo.clone()),
            meetings: Arc::new(repo.clone()),
            video_queue: Arc::new(repo.clone()),
            progress: Arc::new(repo.clone()),
            lesson_changes: Arc::new(repo.clone()),
            attendance: Arc::new(repo),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_backend(InMemoryRepository::new())
    }
}
