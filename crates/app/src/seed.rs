//! Demo data for local development.

use anyhow::Context;
use lms_core::Clock;
use lms_core::model::{
    Course, CourseEnrollment, CourseId, CourseStatus, EnrollmentId, LessonDraft, LessonId,
    LessonType, Meeting, MeetingId, Section, SectionId, User, UserId,
};
use storage::repository::Storage;

const COURSE_SLUG: &str = "intro-to-rust";
const DEMO_MEETING_NUMBER: u64 = 81_234_567_890;

/// Ids a developer needs to drive the HTTP API by hand.
#[derive(Debug, Clone, Copy)]
pub struct SeedSummary {
    pub course_id: CourseId,
    pub learner_id: UserId,
    pub meeting_number: u64,
}

/// Insert one course with a live class and an enrolled learner.
///
/// Returns `None` when the demo course already exists.
///
/// # Errors
///
/// Returns an error if any write fails.
pub async fn seed_demo(storage: &Storage, clock: &Clock) -> anyhow::Result<Option<SeedSummary>> {
    if storage
        .courses
        .find_course_by_slug(COURSE_SLUG)
        .await?
        .is_some()
    {
        return Ok(None);
    }
    let now = clock.now();

    let instructor = User {
        id: UserId::generate(),
        full_name: "Demo Instructor".into(),
        email: "instructor@example.com".into(),
    };
    let learner = User {
        id: UserId::generate(),
        full_name: "Demo Learner".into(),
        email: "learner@example.com".into(),
    };
    storage.users.upsert_user(&instructor).await?;
    storage.users.upsert_user(&learner).await?;

    let course = Course::new(
        CourseId::generate(),
        "Intro to Rust",
        COURSE_SLUG,
        CourseStatus::Published,
        instructor.id,
        now,
    )?;
    storage.courses.upsert_course(&course).await?;

    let section = Section {
        id: SectionId::generate(),
        course_id: course.id,
        slug: "getting-started".into(),
        name: "Getting Started".into(),
        order: 1,
    };
    storage.courses.upsert_section(&section).await?;

    let lessons = [
        (
            "welcome",
            "Welcome",
            LessonType::Video,
            Some("https://media.example.com/welcome.mp4"),
        ),
        ("ownership-live", "Ownership Live", LessonType::LiveClass, None),
        ("borrowing-notes", "Borrowing Notes", LessonType::Document, None),
    ];
    let mut live_lesson = None;
    for ((slug, name, lesson_type, video_url), order) in lessons.into_iter().zip(1u32..) {
        let lesson = LessonDraft {
            course_id: course.id,
            section_id: section.id,
            slug: slug.into(),
            name: name.into(),
            lesson_type,
            status: CourseStatus::Published,
            order,
            video_url: video_url.map(str::to_owned),
            created_by: instructor.id,
        }
        .build(LessonId::generate(), now)
        .with_context(|| format!("invalid demo lesson {slug}"))?;
        storage.lessons.upsert_lesson(&lesson).await?;
        if lesson.is_live_class() {
            live_lesson = Some(lesson.id);
        }
    }

    if let Some(lesson_id) = live_lesson {
        storage
            .meetings
            .upsert_meeting(&Meeting {
                id: MeetingId::generate(),
                lesson_id,
                meeting_number: DEMO_MEETING_NUMBER,
                passcode: Some("rustacean".into()),
                start_date: Some(now),
                duration_minutes: 60,
                created_at: now,
            })
            .await?;
    }

    storage
        .enrollments
        .upsert_enrollment(&CourseEnrollment::new(
            EnrollmentId::generate(),
            course.id,
            learner.id,
            now,
        ))
        .await?;

    Ok(Some(SeedSummary {
        course_id: course.id,
        learner_id: learner.id,
        meeting_number: DEMO_MEETING_NUMBER,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::time::fixed_clock;

    #[tokio::test]
    async fn seeding_twice_is_a_no_op() {
        let storage = Storage::in_memory();
        let summary = seed_demo(&storage, &fixed_clock())
            .await
            .unwrap()
            .expect("first run seeds");
        assert_eq!(
            storage
                .lessons
                .count_published_lessons(summary.course_id)
                .await
                .unwrap(),
            3
        );
        assert!(
            storage
                .meetings
                .find_meeting_by_number(summary.meeting_number)
                .await
                .unwrap()
                .is_some()
        );

        assert!(seed_demo(&storage, &fixed_clock()).await.unwrap().is_none());
    }
}
