use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lms_core::model::{
    Course, CourseEnrollment, CourseId, CourseStatus, EnrollmentId, EnrollmentMemberStatus,
    Identity, Lesson, LessonDraft, LessonId, LessonType, Meeting, MeetingId, Section, SectionId,
    User, UserId,
};
use lms_core::time::fixed_now;
use serde_json::json;
use services::collaborators::MediaUploader;
use services::error::{JobError, UploadError, WebhookError};
use services::jobs::{DeferredJob, JobScheduler, RetryPolicy};
use services::webhook::request_signature;
use services::{
    AppServices, AttendanceOutcome, Clock, ErrorKind, IngestOutcome, ServiceConfig, WebhookReply,
};
use storage::repository::Storage;

const SECRET: &str = "whsec_flow";
const TIMESTAMP: &str = "1700000000";
const MEETING_NUMBER: u64 = 85_746_065_432;

#[derive(Default)]
struct RecordingUploader {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl MediaUploader for RecordingUploader {
    async fn upload_recording(
        &self,
        download_url: &str,
        _download_token: Option<&str>,
        _expected_size: u64,
    ) -> Result<String, UploadError> {
        let mut urls = self.urls.lock().unwrap();
        urls.push(download_url.to_owned());
        Ok(format!("https://media.test/recordings/{}.mp4", urls.len()))
    }
}

#[derive(Default)]
struct CapturingScheduler {
    jobs: Mutex<Vec<(DeferredJob, Duration)>>,
}

impl JobScheduler for CapturingScheduler {
    fn schedule(&self, job: DeferredJob, delay: Duration) -> Result<(), JobError> {
        self.jobs.lock().unwrap().push((job, delay));
        Ok(())
    }
}

struct Seeded {
    course: Course,
    section: Section,
    live: Lesson,
    user: User,
}

async fn seed(storage: &Storage) -> Seeded {
    let author = UserId::generate();
    let course = Course::new(
        CourseId::generate(),
        "Systems Programming",
        "systems-programming",
        CourseStatus::Published,
        author,
        fixed_now(),
    )
    .expect("course");
    storage.courses.upsert_course(&course).await.expect("store course");

    let section = Section {
        id: SectionId::generate(),
        course_id: course.id,
        slug: "week-1".into(),
        name: "Week 1".into(),
        order: 1,
    };
    storage
        .courses
        .upsert_section(&section)
        .await
        .expect("store section");

    let reading = LessonDraft {
        course_id: course.id,
        section_id: section.id,
        slug: "ownership-notes".into(),
        name: "Ownership Notes".into(),
        lesson_type: LessonType::Document,
        status: CourseStatus::Published,
        order: 1,
        video_url: None,
        created_by: author,
    }
    .build(LessonId::generate(), fixed_now())
    .expect("reading lesson");
    storage
        .lessons
        .upsert_lesson(&reading)
        .await
        .expect("store reading");

    let live = LessonDraft {
        course_id: course.id,
        section_id: section.id,
        slug: "live-borrowing".into(),
        name: "Live Borrowing".into(),
        lesson_type: LessonType::LiveClass,
        status: CourseStatus::Published,
        order: 2,
        video_url: None,
        created_by: author,
    }
    .build(LessonId::generate(), fixed_now())
    .expect("live lesson");
    storage.lessons.upsert_lesson(&live).await.expect("store live");

    storage
        .meetings
        .upsert_meeting(&Meeting {
            id: MeetingId::generate(),
            lesson_id: live.id,
            meeting_number: MEETING_NUMBER,
            passcode: None,
            start_date: Some(fixed_now()),
            duration_minutes: 60,
            created_at: fixed_now(),
        })
        .await
        .expect("store meeting");

    let user = User {
        id: UserId::generate(),
        full_name: "Grace Hopper".into(),
        email: "grace@example.com".into(),
    };
    storage.users.upsert_user(&user).await.expect("store user");
    storage
        .enrollments
        .upsert_enrollment(&CourseEnrollment::new(
            EnrollmentId::generate(),
            course.id,
            user.id,
            fixed_now(),
        ))
        .await
        .expect("store enrollment");

    Seeded {
        course,
        section,
        live,
        user,
    }
}

fn app(
    storage: Storage,
    uploader: Arc<RecordingUploader>,
    scheduler: Arc<CapturingScheduler>,
) -> AppServices {
    let config = ServiceConfig {
        webhook_secret: Some(SECRET.into()),
        recording_cleanup_delay: Duration::from_secs(3600),
        ingest_retry: RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        },
        ..ServiceConfig::default()
    };
    AppServices::with_collaborators(
        storage,
        &config,
        Clock::fixed(fixed_now()),
        uploader,
        scheduler,
    )
}

/// Authenticates and dispatches `body` the way the HTTP endpoint does.
async fn deliver(app: &AppServices, body: &serde_json::Value) -> WebhookReply {
    let body = serde_json::to_vec(body).expect("encode body");
    let signature = request_signature(SECRET, TIMESTAMP, &body).expect("sign");
    let webhooks = app.webhooks();
    webhooks
        .authenticate(Some(TIMESTAMP), Some(&signature), &body)
        .expect("authenticate");
    let event = webhooks.decode(&body).expect("decode");
    webhooks.dispatch(event).await.expect("dispatch")
}

#[tokio::test]
async fn live_class_attendance_then_recording_flow() {
    let storage = Storage::sqlite("sqlite:file:memdb_webhook_flow?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let seeded = seed(&storage).await;
    let uploader = Arc::new(RecordingUploader::default());
    let scheduler = Arc::new(CapturingScheduler::default());
    let app = app(storage, Arc::clone(&uploader), Arc::clone(&scheduler));

    let validation = deliver(
        &app,
        &json!({
            "event": "endpoint.url_validation",
            "payload": { "plainToken": "qgg8vlvZRS6UYooatFL8Aw" }
        }),
    )
    .await;
    let WebhookReply::Validation(response) = validation else {
        panic!("expected validation reply, got {validation:?}");
    };
    assert_eq!(response.plain_token, "qgg8vlvZRS6UYooatFL8Aw");
    assert_eq!(response.encrypted_token.len(), 64);

    let joined = deliver(
        &app,
        &json!({
            "event": "meeting.participant_joined",
            "payload": { "object": {
                "id": MEETING_NUMBER.to_string(),
                "start_time": "2023-11-14T22:13:20Z",
                "participant": {
                    "customer_key": seeded.user.id.to_string(),
                    "user_name": "Grace Hopper",
                    "join_time": "2023-11-14T22:15:00Z"
                }
            }}
        }),
    )
    .await;
    let WebhookReply::Attendance(AttendanceOutcome::Joined {
        report_id: joined_report,
        attendance_created,
    }) = joined
    else {
        panic!("expected join outcome, got {joined:?}");
    };
    assert!(attendance_created);

    let course = Identity::Slug(seeded.course.slug.clone());
    let progress = app
        .progress()
        .progress_summary(&course, seeded.user.id)
        .await
        .expect("summary after join");
    assert_eq!(progress.completed_lessons, 1);
    assert_eq!(progress.total_lessons, 2);
    assert_eq!(progress.percentage, 50);
    assert_eq!(progress.current_lesson_id, Some(seeded.live.id));

    let left = deliver(
        &app,
        &json!({
            "event": "meeting.participant_left",
            "payload": { "object": {
                "id": MEETING_NUMBER.to_string(),
                "start_time": "2023-11-14T22:13:20Z",
                "participant": {
                    "customer_key": seeded.user.id.to_string(),
                    "leave_time": "2023-11-14T23:00:00Z"
                }
            }}
        }),
    )
    .await;
    assert_eq!(
        left,
        WebhookReply::Attendance(AttendanceOutcome::Left {
            report_id: joined_report,
            duration_secs: 45 * 60,
        })
    );

    let recording = deliver(
        &app,
        &json!({
            "event": "recording.completed",
            "download_token": "dl-token",
            "payload": { "object": {
                "id": MEETING_NUMBER,
                "recording_files": [
                    {
                        "file_type": "MP4",
                        "download_url": "https://zoom.test/rec/second",
                        "file_size": 2048,
                        "recording_start": "2023-11-14T22:40:00Z"
                    },
                    {
                        "file_type": "M4A",
                        "download_url": "https://zoom.test/rec/audio",
                        "recording_start": "2023-11-14T22:13:20Z"
                    },
                    {
                        "file_type": "mp4",
                        "download_url": "https://zoom.test/rec/first",
                        "file_size": 1024,
                        "recording_start": "2023-11-14T22:13:20Z"
                    }
                ]
            }}
        }),
    )
    .await;
    let WebhookReply::Recording(IngestOutcome::Ingested {
        lesson_id,
        parts,
        created,
    }) = recording
    else {
        panic!("expected ingestion, got {recording:?}");
    };
    assert_eq!(lesson_id, seeded.live.id);
    assert_eq!(parts, 2);
    assert_eq!(created.len(), 1);
    assert_eq!(
        *uploader.urls.lock().unwrap(),
        vec![
            "https://zoom.test/rec/first".to_owned(),
            "https://zoom.test/rec/second".to_owned()
        ]
    );

    let storage = app.storage();
    let lessons = storage
        .lessons
        .lessons_in_section(seeded.section.id)
        .await
        .expect("section lessons");
    let orders: Vec<u32> = lessons.iter().map(|l| l.order).collect();
    assert_eq!(orders, vec![1, 2, 3]);
    assert_eq!(lessons[1].id, seeded.live.id);
    assert_eq!(lessons[1].lesson_type, LessonType::RecordedVideo);
    assert_eq!(
        lessons[1].video_url.as_deref(),
        Some("https://media.test/recordings/1.mp4")
    );
    assert_eq!(lessons[2].id, created[0]);
    assert_eq!(
        lessons[2].video_url.as_deref(),
        Some("https://media.test/recordings/2.mp4")
    );

    let jobs = scheduler.jobs.lock().unwrap().clone();
    assert_eq!(
        jobs,
        vec![(
            DeferredJob::DeleteRemoteRecording {
                meeting_number: MEETING_NUMBER
            },
            Duration::from_secs(3600)
        )]
    );

    let summary = app
        .progress()
        .progress_summary(&course, seeded.user.id)
        .await
        .expect("summary after ingestion");
    assert_eq!(summary.total_lessons, 3);
    assert_eq!(summary.enrollment_status, Some(EnrollmentMemberStatus::Enrolled));
}

#[tokio::test]
async fn redelivered_recording_is_skipped() {
    let storage = Storage::in_memory();
    seed(&storage).await;
    let uploader = Arc::new(RecordingUploader::default());
    let app = app(
        storage,
        Arc::clone(&uploader),
        Arc::new(CapturingScheduler::default()),
    );
    let body = json!({
        "event": "recording.completed",
        "payload": { "object": {
            "id": MEETING_NUMBER,
            "recording_files": [{
                "file_type": "MP4",
                "download_url": "https://zoom.test/rec/only",
                "recording_start": "2023-11-14T22:13:20Z"
            }]
        }}
    });

    let first = deliver(&app, &body).await;
    assert!(matches!(
        first,
        WebhookReply::Recording(IngestOutcome::Ingested { parts: 1, .. })
    ));
    let second = deliver(&app, &body).await;
    assert!(matches!(
        second,
        WebhookReply::Recording(IngestOutcome::Skipped(_))
    ));
    assert_eq!(uploader.urls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rejects_tampered_and_unsigned_requests() {
    let app = app(
        Storage::in_memory(),
        Arc::new(RecordingUploader::default()),
        Arc::new(CapturingScheduler::default()),
    );
    let webhooks = app.webhooks();
    let body = br#"{"event":"meeting.started","payload":{}}"#;
    let signature = request_signature(SECRET, TIMESTAMP, body).expect("sign");

    let tampered = br#"{"event":"meeting.ended","payload":{}}"#;
    let err = webhooks
        .authenticate(Some(TIMESTAMP), Some(&signature), tampered)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = webhooks.authenticate(None, None, body).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // A correctly signed request captured ten minutes ago is a replay.
    let captured = "1699999400";
    let replayed = request_signature(SECRET, captured, body).expect("sign");
    let err = webhooks
        .authenticate(Some(captured), Some(&replayed), body)
        .unwrap_err();
    assert!(matches!(err, WebhookError::StaleTimestamp));
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    webhooks
        .authenticate(Some(TIMESTAMP), Some(&signature), body)
        .expect("valid signature");
    let reply = webhooks
        .dispatch(webhooks.decode(body).expect("decode"))
        .await
        .expect("dispatch");
    assert_eq!(reply, WebhookReply::Ignored { ignored: true });

    let err = webhooks.decode(b"not json").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
