use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use lms_core::model::{
    Lesson, Meeting, MeetingReport, MeetingReportId, User, UserId, WatchHistory, WatchHistoryId,
};
use lms_core::time::Clock;
use storage::repository::{
    AttendancePersistence, JoinRecord, LessonRepository, MeetingRepository, UserRepository,
};

use crate::error::AttendanceError;
use crate::outcome::SkipReason;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantJoined {
    pub meeting_number: u64,
    /// Key the provider echoes back for the participant; holds the LMS user id.
    pub external_user_id: String,
    pub join_time: DateTime<Utc>,
    /// Start of the meeting session the participant joined.
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantLeft {
    pub meeting_number: u64,
    pub external_user_id: String,
    pub leave_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttendanceOutcome {
    Joined {
        report_id: MeetingReportId,
        attendance_created: bool,
    },
    Left {
        report_id: MeetingReportId,
        duration_secs: i64,
    },
    Skipped(SkipReason),
}

/// Records live-class attendance from participant join/leave events.
#[derive(Clone)]
pub struct AttendanceService {
    clock: Clock,
    meetings: Arc<dyn MeetingRepository>,
    lessons: Arc<dyn LessonRepository>,
    users: Arc<dyn UserRepository>,
    attendance: Arc<dyn AttendancePersistence>,
}

impl AttendanceService {
    #[must_use]
    pub fn new(
        clock: Clock,
        meetings: Arc<dyn MeetingRepository>,
        lessons: Arc<dyn LessonRepository>,
        users: Arc<dyn UserRepository>,
        attendance: Arc<dyn AttendancePersistence>,
    ) -> Self {
        Self {
            clock,
            meetings,
            lessons,
            users,
            attendance,
        }
    }

    /// Mark the participant as having attended the live lesson and open a
    /// meeting report for this join.
    ///
    /// The attendance row is only inserted on the first join; every join
    /// opens its own report.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError` if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn on_join(
        &self,
        event: ParticipantJoined,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        let Some(meeting) = self.meeting(event.meeting_number).await? else {
            return Ok(skipped(SkipReason::MeetingNotFound {
                meeting_number: event.meeting_number,
            }));
        };
        let Some(user) = self.user(&event.external_user_id).await? else {
            return Ok(skipped(SkipReason::UnknownUser {
                external_user_id: event.external_user_id,
            }));
        };
        let Some(lesson) = self.lesson(&meeting).await? else {
            return Ok(skipped(SkipReason::LessonNotFound {
                lesson_id: meeting.lesson_id,
            }));
        };

        let attendance = WatchHistory::new(
            WatchHistoryId::generate(),
            lesson.course_id,
            lesson.id,
            user.id,
            true,
            self.clock.now(),
        );
        let report = MeetingReport::open(
            MeetingReportId::generate(),
            meeting.id,
            user.id,
            event.start_time,
            event.join_time,
        );
        let report_id = report.id;
        let outcome = self
            .attendance
            .record_join(JoinRecord { attendance, report })
            .await?;

        tracing::info!(
            meeting_id = %meeting.id,
            user_id = %user.id,
            attendance_created = outcome.attendance_created,
            "participant joined"
        );
        Ok(AttendanceOutcome::Joined {
            report_id,
            attendance_created: outcome.attendance_created,
        })
    }

    /// Close the earliest open report of the participant for the session.
    ///
    /// # Errors
    ///
    /// Returns `AttendanceError` if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn on_leave(
        &self,
        event: ParticipantLeft,
    ) -> Result<AttendanceOutcome, AttendanceError> {
        let Some(meeting) = self.meeting(event.meeting_number).await? else {
            return Ok(skipped(SkipReason::MeetingNotFound {
                meeting_number: event.meeting_number,
            }));
        };
        let Some(user) = self.user(&event.external_user_id).await? else {
            return Ok(skipped(SkipReason::UnknownUser {
                external_user_id: event.external_user_id,
            }));
        };

        let Some(mut report) = self
            .meetings
            .find_open_report(meeting.id, user.id, event.start_time)
            .await?
        else {
            return Ok(skipped(SkipReason::NoOpenReport));
        };

        report.close(event.leave_time);
        // Lost a race with a concurrent leave for the same report.
        if !self.meetings.close_report(&report).await? {
            return Ok(skipped(SkipReason::NoOpenReport));
        }

        let duration_secs = report.duration_secs.unwrap_or_default();
        tracing::info!(
            meeting_id = %meeting.id,
            user_id = %user.id,
            duration_secs,
            "participant left"
        );
        Ok(AttendanceOutcome::Left {
            report_id: report.id,
            duration_secs,
        })
    }

    async fn meeting(&self, meeting_number: u64) -> Result<Option<Meeting>, AttendanceError> {
        if meeting_number == 0 {
            return Ok(None);
        }
        Ok(self.meetings.find_meeting_by_number(meeting_number).await?)
    }

    async fn user(&self, external_user_id: &str) -> Result<Option<User>, AttendanceError> {
        let Ok(id) = external_user_id.parse::<UserId>() else {
            return Ok(None);
        };
        Ok(self.users.get_user(id).await?)
    }

    async fn lesson(&self, meeting: &Meeting) -> Result<Option<Lesson>, AttendanceError> {
        let lesson = self.lessons.get_lesson(meeting.lesson_id).await?;
        Ok(lesson.filter(|l| !l.is_deleted))
    }
}

fn skipped(reason: SkipReason) -> AttendanceOutcome {
    tracing::warn!(%reason, "participant event skipped");
    AttendanceOutcome::Skipped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use lms_core::model::{
        CourseEnrollment, CourseId, CourseStatus, EnrollmentId, EnrollmentMemberStatus,
        LessonDraft, LessonId, LessonType, MeetingId, SectionId,
    };
    use lms_core::time::{fixed_clock, fixed_now};
    use storage::repository::Storage;

    const MEETING_NUMBER: u64 = 91_234_567_890;

    struct Fixture {
        storage: Storage,
        service: AttendanceService,
        lesson: Lesson,
        meeting: Meeting,
        user: User,
    }

    async fn fixture() -> Fixture {
        let storage = Storage::in_memory();
        let lesson = LessonDraft {
            course_id: CourseId::generate(),
            section_id: SectionId::generate(),
            slug: "live-q-and-a".into(),
            name: "Live Q&A".into(),
            lesson_type: LessonType::LiveClass,
            status: CourseStatus::Published,
            order: 1,
            video_url: None,
            created_by: UserId::generate(),
        }
        .build(LessonId::generate(), fixed_now())
        .unwrap();
        storage.lessons.upsert_lesson(&lesson).await.unwrap();

        let meeting = Meeting {
            id: MeetingId::generate(),
            lesson_id: lesson.id,
            meeting_number: MEETING_NUMBER,
            passcode: Some("123456".into()),
            start_date: Some(fixed_now()),
            duration_minutes: 60,
            created_at: fixed_now(),
        };
        storage.meetings.upsert_meeting(&meeting).await.unwrap();

        let user = User {
            id: UserId::generate(),
            full_name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
        };
        storage.users.upsert_user(&user).await.unwrap();

        let service = AttendanceService::new(
            fixed_clock(),
            Arc::clone(&storage.meetings),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.users),
            Arc::clone(&storage.attendance),
        );
        Fixture {
            storage,
            service,
            lesson,
            meeting,
            user,
        }
    }

    impl Fixture {
        fn join(&self, minutes: i64) -> ParticipantJoined {
            ParticipantJoined {
                meeting_number: MEETING_NUMBER,
                external_user_id: self.user.id.to_string(),
                join_time: fixed_now() + Duration::minutes(minutes),
                start_time: fixed_now(),
            }
        }

        fn leave(&self, minutes: i64) -> ParticipantLeft {
            ParticipantLeft {
                meeting_number: MEETING_NUMBER,
                external_user_id: self.user.id.to_string(),
                leave_time: fixed_now() + Duration::minutes(minutes),
                start_time: fixed_now(),
            }
        }
    }

    #[tokio::test]
    async fn join_marks_attendance_and_completes_single_lesson_course() {
        let f = fixture().await;
        f.storage
            .enrollments
            .upsert_enrollment(&CourseEnrollment::new(
                EnrollmentId::generate(),
                f.lesson.course_id,
                f.user.id,
                fixed_now(),
            ))
            .await
            .unwrap();

        let outcome = f.service.on_join(f.join(2)).await.unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::Joined {
                attendance_created: true,
                ..
            }
        ));

        let watch = f
            .storage
            .watch_history
            .find_watch(f.lesson.course_id, f.lesson.id, f.user.id)
            .await
            .unwrap()
            .unwrap();
        assert!(watch.is_completed && watch.is_passed);

        let enrollment = f
            .storage
            .enrollments
            .find_active_enrollment(f.lesson.course_id, f.user.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enrollment.percentage, 100);
        assert_eq!(enrollment.status, EnrollmentMemberStatus::Completed);
    }

    #[tokio::test]
    async fn rejoin_opens_new_report_without_second_attendance_row() {
        let f = fixture().await;
        f.service.on_join(f.join(0)).await.unwrap();
        let second = f.service.on_join(f.join(30)).await.unwrap();
        assert!(matches!(
            second,
            AttendanceOutcome::Joined {
                attendance_created: false,
                ..
            }
        ));

        let rows = f
            .storage
            .watch_history
            .watch_history_for_user(f.lesson.course_id, f.user.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        let reports = f
            .storage
            .meetings
            .reports_for(f.meeting.id, f.user.id)
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);
    }

    #[tokio::test]
    async fn leave_closes_earliest_open_report() {
        let f = fixture().await;
        f.service.on_join(f.join(5)).await.unwrap();
        f.service.on_join(f.join(10)).await.unwrap();

        let outcome = f.service.on_leave(f.leave(45)).await.unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::Left {
                duration_secs: 2400,
                ..
            }
        ));

        let reports = f
            .storage
            .meetings
            .reports_for(f.meeting.id, f.user.id)
            .await
            .unwrap();
        assert_eq!(reports[0].left_time, Some(fixed_now() + Duration::minutes(45)));
        assert!(reports[1].is_open());
    }

    #[tokio::test]
    async fn leave_before_join_time_clamps_duration() {
        let f = fixture().await;
        f.service.on_join(f.join(10)).await.unwrap();
        let outcome = f.service.on_leave(f.leave(5)).await.unwrap();
        assert!(matches!(
            outcome,
            AttendanceOutcome::Left {
                duration_secs: 0,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn leave_without_open_report_is_skipped() {
        let f = fixture().await;
        let outcome = f.service.on_leave(f.leave(5)).await.unwrap();
        assert_eq!(outcome, AttendanceOutcome::Skipped(SkipReason::NoOpenReport));

        let mut other_session = f.leave(5);
        f.service.on_join(f.join(0)).await.unwrap();
        other_session.start_time = fixed_now() + Duration::hours(3);
        let outcome = f.service.on_leave(other_session).await.unwrap();
        assert_eq!(outcome, AttendanceOutcome::Skipped(SkipReason::NoOpenReport));
    }

    #[tokio::test]
    async fn unknown_meeting_or_user_is_skipped() {
        let f = fixture().await;

        let mut event = f.join(0);
        event.meeting_number = 1;
        assert_eq!(
            f.service.on_join(event).await.unwrap(),
            AttendanceOutcome::Skipped(SkipReason::MeetingNotFound { meeting_number: 1 })
        );

        let mut event = f.join(0);
        event.external_user_id = "guest-42".into();
        assert!(matches!(
            f.service.on_join(event).await.unwrap(),
            AttendanceOutcome::Skipped(SkipReason::UnknownUser { .. })
        ));

        let mut event = f.join(0);
        event.external_user_id = UserId::generate().to_string();
        assert!(matches!(
            f.service.on_join(event).await.unwrap(),
            AttendanceOutcome::Skipped(SkipReason::UnknownUser { .. })
        ));
        assert!(
            f.storage
                .meetings
                .reports_for(f.meeting.id, f.user.id)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
