use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use lms_core::model::{LessonId, RecordingFile, UploadedPart, part_name, video_parts};
use lms_core::time::Clock;
use storage::repository::{
    LessonPersistence, LessonRepository, MeetingRepository, RecordingCommit,
    RecordingCommitOutcome,
};

use crate::collaborators::MediaUploader;
use crate::error::IngestionError;
use crate::jobs::{DEFAULT_RECORDING_CLEANUP, DeferredJob, JobScheduler};
use crate::outcome::SkipReason;
use crate::slug_service::SlugService;

/// A finished cloud recording as reported by the conferencing provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingCompleted {
    /// Provider meeting number; 0 when the payload did not carry one.
    pub meeting_number: u64,
    pub download_token: Option<String>,
    pub recording_files: Vec<RecordingFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Ingested {
        lesson_id: LessonId,
        parts: usize,
        created: Vec<LessonId>,
    },
    Skipped(SkipReason),
}

/// Turns a live-class lesson into one or more recorded-video lessons.
#[derive(Clone)]
pub struct RecordingService {
    clock: Clock,
    meetings: Arc<dyn MeetingRepository>,
    lessons: Arc<dyn LessonRepository>,
    lesson_changes: Arc<dyn LessonPersistence>,
    slugs: SlugService,
    uploader: Arc<dyn MediaUploader>,
    jobs: Arc<dyn JobScheduler>,
    cleanup_delay: Duration,
}

impl RecordingService {
    #[must_use]
    pub fn new(
        clock: Clock,
        meetings: Arc<dyn MeetingRepository>,
        lessons: Arc<dyn LessonRepository>,
        lesson_changes: Arc<dyn LessonPersistence>,
        uploader: Arc<dyn MediaUploader>,
        jobs: Arc<dyn JobScheduler>,
    ) -> Self {
        Self {
            clock,
            meetings,
            slugs: SlugService::new(Arc::clone(&lessons)),
            lessons,
            lesson_changes,
            uploader,
            jobs,
            cleanup_delay: DEFAULT_RECORDING_CLEANUP,
        }
    }

    /// Override how long remote recordings are kept after ingestion.
    #[must_use]
    pub fn with_cleanup_delay(mut self, delay: Duration) -> Self {
        self.cleanup_delay = delay;
        self
    }

    /// Ingest a completed recording into the meeting's live-class lesson.
    ///
    /// Every MP4 part is uploaded first. The store then re-reads the lesson
    /// and commits the rewrite, any new part lessons, the sibling shift and
    /// the video queue rows together, planned against the lesson's order at
    /// commit time. Removal of the remote recording is scheduled afterwards
    /// and never affects the result.
    ///
    /// Unknown meetings, missing lessons, non-live lessons and recordings
    /// without video are reported as [`IngestOutcome::Skipped`]. A lesson
    /// that another delivery recorded while this one was uploading is
    /// skipped the same way.
    ///
    /// # Errors
    ///
    /// Returns `IngestionError` if an upload or the commit fails. Nothing is
    /// written to the store in that case.
    #[tracing::instrument(
        skip(self, event),
        fields(meeting_number = event.meeting_number, files = event.recording_files.len())
    )]
    pub async fn ingest_recording(
        &self,
        event: RecordingCompleted,
    ) -> Result<IngestOutcome, IngestionError> {
        if event.recording_files.is_empty() {
            return Ok(skipped(SkipReason::NoRecordingFiles));
        }
        if event.meeting_number == 0 {
            return Ok(skipped(SkipReason::MissingMeetingId));
        }
        let Some(meeting) = self
            .meetings
            .find_meeting_by_number(event.meeting_number)
            .await?
        else {
            return Ok(skipped(SkipReason::MeetingNotFound {
                meeting_number: event.meeting_number,
            }));
        };
        let lesson = match self.lessons.get_lesson(meeting.lesson_id).await? {
            Some(lesson) if !lesson.is_deleted => lesson,
            _ => {
                return Ok(skipped(SkipReason::LessonNotFound {
                    lesson_id: meeting.lesson_id,
                }));
            }
        };
        if !lesson.is_live_class() {
            return Ok(skipped(SkipReason::NotLiveClass {
                lesson_id: lesson.id,
                lesson_type: lesson.lesson_type,
            }));
        }

        let files = video_parts(&event.recording_files);
        if files.is_empty() {
            return Ok(skipped(SkipReason::NoVideoParts));
        }

        let mut parts = Vec::with_capacity(files.len());
        for (file, order) in files.iter().zip(1u32..) {
            let video_url = self
                .uploader
                .upload_recording(
                    &file.download_url,
                    event.download_token.as_deref(),
                    file.file_size,
                )
                .await?;
            parts.push(UploadedPart {
                order,
                name: part_name(&lesson.name, order),
                video_url,
            });
        }

        let mut reserved = HashSet::new();
        let mut slugs = Vec::with_capacity(parts.len().saturating_sub(1));
        for part in parts.iter().skip(1) {
            let slug = self
                .slugs
                .unique_lesson_slug(&part.name, &reserved)
                .await?;
            reserved.insert(slug.clone());
            slugs.push(slug);
        }

        let commit = RecordingCommit {
            lesson_id: lesson.id,
            parts,
            slugs,
            at: self.clock.now(),
        };
        let plan = match self.lesson_changes.commit_recording(commit).await? {
            RecordingCommitOutcome::Applied(plan) => plan,
            RecordingCommitOutcome::NotLiveClass(Some(current)) if !current.is_deleted => {
                return Ok(skipped(SkipReason::NotLiveClass {
                    lesson_id: current.id,
                    lesson_type: current.lesson_type,
                }));
            }
            RecordingCommitOutcome::NotLiveClass(_) => {
                return Ok(skipped(SkipReason::LessonNotFound {
                    lesson_id: lesson.id,
                }));
            }
        };
        let parts = plan.created.len() + 1;
        let created: Vec<LessonId> = plan.created.iter().map(|l| l.id).collect();

        tracing::info!(
            lesson_id = %lesson.id,
            parts,
            created = created.len(),
            "recording ingested"
        );

        let job = DeferredJob::DeleteRemoteRecording {
            meeting_number: event.meeting_number,
        };
        if let Err(err) = self.jobs.schedule(job, self.cleanup_delay) {
            tracing::error!(?job, error = %err, "failed to schedule recording cleanup");
        }

        Ok(IngestOutcome::Ingested {
            lesson_id: lesson.id,
            parts,
            created,
        })
    }
}

fn skipped(reason: SkipReason) -> IngestOutcome {
    tracing::warn!(%reason, "recording ingestion skipped");
    IngestOutcome::Skipped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobError, UploadError};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use lms_core::model::{
        CourseId, CourseStatus, Lesson, LessonDraft, LessonType, Meeting, MeetingId,
        RecordingFileType, SectionId, UserId,
    };
    use lms_core::time::{fixed_clock, fixed_now};
    use std::sync::Mutex;
    use storage::repository::Storage;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct FakeUploader {
        uploaded: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl MediaUploader for FakeUploader {
        async fn upload_recording(
            &self,
            download_url: &str,
            _download_token: Option<&str>,
            _expected_size: u64,
        ) -> Result<String, UploadError> {
            if self.fail {
                return Err(UploadError::SizeMismatch {
                    expected: 10,
                    actual: 0,
                });
            }
            let mut uploaded = self.uploaded.lock().unwrap();
            uploaded.push(download_url.to_owned());
            Ok(format!("https://cdn.test/recordings/{}.mp4", uploaded.len()))
        }
    }

    /// Holds every upload until the test hands out a permit.
    struct GatedUploader {
        entered: Semaphore,
        gate: Semaphore,
    }

    impl GatedUploader {
        fn closed() -> Self {
            Self {
                entered: Semaphore::new(0),
                gate: Semaphore::new(0),
            }
        }
    }

    #[async_trait]
    impl MediaUploader for GatedUploader {
        async fn upload_recording(
            &self,
            download_url: &str,
            _download_token: Option<&str>,
            _expected_size: u64,
        ) -> Result<String, UploadError> {
            self.entered.add_permits(1);
            let _permit = self.gate.acquire().await.unwrap();
            Ok(download_url.replace("https://zoom.test/rec/", "https://cdn.test/held/"))
        }
    }

    #[derive(Default)]
    struct FakeScheduler {
        jobs: Mutex<Vec<(DeferredJob, Duration)>>,
    }

    impl JobScheduler for FakeScheduler {
        fn schedule(&self, job: DeferredJob, delay: Duration) -> Result<(), JobError> {
            self.jobs.lock().unwrap().push((job, delay));
            Ok(())
        }
    }

    struct Fixture {
        storage: Storage,
        service: RecordingService,
        uploader: Arc<FakeUploader>,
        scheduler: Arc<FakeScheduler>,
        section: SectionId,
        course: CourseId,
    }

    const MEETING_NUMBER: u64 = 85_746_065_432;

    fn fixture_with(uploader: FakeUploader) -> Fixture {
        let storage = Storage::in_memory();
        let uploader = Arc::new(uploader);
        let scheduler = Arc::new(FakeScheduler::default());
        let service = RecordingService::new(
            fixed_clock(),
            Arc::clone(&storage.meetings),
            Arc::clone(&storage.lessons),
            Arc::clone(&storage.lesson_changes),
            uploader.clone(),
            scheduler.clone(),
        );
        Fixture {
            storage,
            service,
            uploader,
            scheduler,
            section: SectionId::generate(),
            course: CourseId::generate(),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(FakeUploader::default())
    }

    impl Fixture {
        async fn lesson(&self, order: u32, name: &str, lesson_type: LessonType) -> Lesson {
            let lesson = LessonDraft {
                course_id: self.course,
                section_id: self.section,
                slug: lms_core::slug::slugify(name),
                name: name.into(),
                lesson_type,
                status: CourseStatus::Published,
                order,
                video_url: None,
                created_by: UserId::generate(),
            }
            .build(LessonId::generate(), fixed_now())
            .unwrap();
            self.storage.lessons.upsert_lesson(&lesson).await.unwrap();
            lesson
        }

        async fn meeting_for(&self, lesson: &Lesson) {
            self.numbered_meeting_for(lesson, MEETING_NUMBER).await;
        }

        async fn numbered_meeting_for(&self, lesson: &Lesson, meeting_number: u64) {
            self.storage
                .meetings
                .upsert_meeting(&Meeting {
                    id: MeetingId::generate(),
                    lesson_id: lesson.id,
                    meeting_number,
                    passcode: None,
                    start_date: Some(fixed_now()),
                    duration_minutes: 90,
                    created_at: fixed_now(),
                })
                .await
                .unwrap();
        }

        async fn order_of(&self, id: LessonId) -> u32 {
            self.storage.lessons.get_lesson(id).await.unwrap().unwrap().order
        }

        async fn section_orders(&self) -> Vec<u32> {
            self.storage
                .lessons
                .lessons_in_section(self.section)
                .await
                .unwrap()
                .iter()
                .map(|l| l.order)
                .collect()
        }

        /// A second service over the same store, uploading through `uploader`.
        fn service_with(
            &self,
            uploader: Arc<dyn MediaUploader>,
            scheduler: Arc<FakeScheduler>,
        ) -> RecordingService {
            RecordingService::new(
                fixed_clock(),
                Arc::clone(&self.storage.meetings),
                Arc::clone(&self.storage.lessons),
                Arc::clone(&self.storage.lesson_changes),
                uploader,
                scheduler,
            )
        }
    }

    fn file(label: &str, minutes: i64) -> RecordingFile {
        RecordingFile {
            file_type: RecordingFileType::from_label(label),
            download_url: format!("https://zoom.test/rec/{label}-{minutes}"),
            file_size: 2048,
            recording_start: fixed_now() + ChronoDuration::minutes(minutes),
        }
    }

    fn event(files: Vec<RecordingFile>) -> RecordingCompleted {
        RecordingCompleted {
            meeting_number: MEETING_NUMBER,
            download_token: Some("token".into()),
            recording_files: files,
        }
    }

    #[tokio::test]
    async fn three_parts_insert_after_original_and_shift_siblings() {
        let f = fixture();
        let live = f.lesson(5, "Week 1 Live", LessonType::LiveClass).await;
        let sixth = f.lesson(6, "Quiz", LessonType::Exam).await;
        let seventh = f.lesson(7, "Notes", LessonType::Document).await;
        f.meeting_for(&live).await;

        let outcome = f
            .service
            .ingest_recording(event(vec![
                file("MP4", 40),
                file("CHAT", 0),
                file("MP4", 0),
                file("M4A", 0),
                file("MP4", 20),
            ]))
            .await
            .unwrap();

        let IngestOutcome::Ingested {
            lesson_id,
            parts,
            created,
        } = outcome
        else {
            panic!("expected ingestion, got {outcome:?}");
        };
        assert_eq!(lesson_id, live.id);
        assert_eq!(parts, 3);
        assert_eq!(created.len(), 2);

        assert_eq!(f.order_of(live.id).await, 5);
        assert_eq!(f.order_of(created[0]).await, 6);
        assert_eq!(f.order_of(created[1]).await, 7);
        assert_eq!(f.order_of(sixth.id).await, 8);
        assert_eq!(f.order_of(seventh.id).await, 9);

        let original = f.storage.lessons.get_lesson(live.id).await.unwrap().unwrap();
        assert_eq!(original.lesson_type, LessonType::RecordedVideo);
        assert_eq!(original.name, "Week 1 Live Part 1");
        assert_eq!(original.slug, live.slug);

        let second = f
            .storage
            .lessons
            .get_lesson(created[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.name, "Week 1 Live Part 2");
        assert_eq!(second.slug, "week-1-live-part-2");
        assert_eq!(second.course_id, live.course_id);
        assert_eq!(second.status, live.status);
        assert_eq!(
            f.storage
                .video_queue
                .queue_for_lesson(created[1])
                .await
                .unwrap()
                .len(),
            1
        );

        // Uploaded in recording order.
        assert_eq!(
            *f.uploader.uploaded.lock().unwrap(),
            vec![
                "https://zoom.test/rec/MP4-0".to_string(),
                "https://zoom.test/rec/MP4-20".to_string(),
                "https://zoom.test/rec/MP4-40".to_string(),
            ]
        );
        assert_eq!(
            *f.scheduler.jobs.lock().unwrap(),
            vec![(
                DeferredJob::DeleteRemoteRecording {
                    meeting_number: MEETING_NUMBER
                },
                DEFAULT_RECORDING_CLEANUP
            )]
        );
    }

    #[tokio::test]
    async fn single_part_updates_in_place() {
        let f = fixture();
        let live = f.lesson(2, "Kickoff", LessonType::LiveClass).await;
        let next = f.lesson(3, "Reading", LessonType::Document).await;
        f.meeting_for(&live).await;

        let outcome = f
            .service
            .ingest_recording(event(vec![file("MP4", 0), file("TRANSCRIPT", 0)]))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            IngestOutcome::Ingested { parts: 1, ref created, .. } if created.is_empty()
        ));

        let updated = f.storage.lessons.get_lesson(live.id).await.unwrap().unwrap();
        assert_eq!(updated.lesson_type, LessonType::RecordedVideo);
        assert_eq!(updated.name, "Kickoff");
        assert_eq!(
            updated.video_url.as_deref(),
            Some("https://cdn.test/recordings/1.mp4")
        );
        assert_eq!(updated.order, 2);
        assert_eq!(f.order_of(next.id).await, 3);
        assert!(
            f.storage
                .video_queue
                .queue_for_lesson(live.id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn recording_without_mp4_is_skipped() {
        let f = fixture();
        let live = f.lesson(1, "Live", LessonType::LiveClass).await;
        f.meeting_for(&live).await;

        let outcome = f
            .service
            .ingest_recording(event(vec![file("M4A", 0), file("CHAT", 0)]))
            .await
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped(SkipReason::NoVideoParts));

        let stored = f.storage.lessons.get_lesson(live.id).await.unwrap().unwrap();
        assert_eq!(stored, live);
        assert!(f.scheduler.jobs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn early_exits_are_skips() {
        let f = fixture();

        let outcome = f.service.ingest_recording(event(Vec::new())).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped(SkipReason::NoRecordingFiles));

        let mut no_id = event(vec![file("MP4", 0)]);
        no_id.meeting_number = 0;
        let outcome = f.service.ingest_recording(no_id).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped(SkipReason::MissingMeetingId));

        let outcome = f
            .service
            .ingest_recording(event(vec![file("MP4", 0)]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Skipped(SkipReason::MeetingNotFound {
                meeting_number: MEETING_NUMBER
            })
        );
        assert!(f.uploader.uploaded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn already_recorded_lesson_is_skipped() {
        let f = fixture();
        let live = f.lesson(1, "Live", LessonType::LiveClass).await;
        f.meeting_for(&live).await;

        f.service
            .ingest_recording(event(vec![file("MP4", 0)]))
            .await
            .unwrap();
        let redelivered = f
            .service
            .ingest_recording(event(vec![file("MP4", 0)]))
            .await
            .unwrap();

        assert!(matches!(
            redelivered,
            IngestOutcome::Skipped(SkipReason::NotLiveClass {
                lesson_type: LessonType::RecordedVideo,
                ..
            })
        ));
        assert_eq!(f.uploader.uploaded.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn upload_failure_leaves_lessons_untouched() {
        let f = fixture_with(FakeUploader {
            fail: true,
            ..FakeUploader::default()
        });
        let live = f.lesson(1, "Live", LessonType::LiveClass).await;
        let next = f.lesson(2, "Next", LessonType::Video).await;
        f.meeting_for(&live).await;

        let err = f
            .service
            .ingest_recording(event(vec![file("MP4", 0), file("MP4", 30)]))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Upload(_)));

        let stored = f.storage.lessons.get_lesson(live.id).await.unwrap().unwrap();
        assert_eq!(stored.lesson_type, LessonType::LiveClass);
        assert_eq!(f.order_of(next.id).await, 2);
    }

    #[tokio::test]
    async fn new_part_slug_avoids_existing_lessons() {
        let f = fixture();
        let live = f.lesson(1, "Demo", LessonType::LiveClass).await;
        f.lesson(9, "Demo Part 2", LessonType::Video).await;
        f.meeting_for(&live).await;

        let outcome = f
            .service
            .ingest_recording(event(vec![file("MP4", 0), file("MP4", 10)]))
            .await
            .unwrap();
        let IngestOutcome::Ingested { created, .. } = outcome else {
            panic!("expected ingestion");
        };
        let part = f
            .storage
            .lessons
            .get_lesson(created[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(part.slug, "demo-part-2-1");
    }

    #[tokio::test]
    async fn overlapping_ingestions_keep_section_order_contiguous() {
        const HELD_MEETING: u64 = 81_111_222_333;
        let f = fixture();
        let first = f.lesson(1, "Intro", LessonType::Video).await;
        let live_a = f.lesson(2, "Live A", LessonType::LiveClass).await;
        f.lesson(3, "Reading", LessonType::Document).await;
        f.lesson(4, "Exercises", LessonType::Video).await;
        let live_b = f.lesson(5, "Live B", LessonType::LiveClass).await;
        let last = f.lesson(6, "Wrap Up", LessonType::Video).await;
        f.meeting_for(&live_a).await;
        f.numbered_meeting_for(&live_b, HELD_MEETING).await;

        let held = Arc::new(GatedUploader::closed());
        let held_jobs = Arc::new(FakeScheduler::default());
        let held_service = f.service_with(held.clone(), held_jobs.clone());
        let mut held_event = event(vec![file("MP4", 0), file("MP4", 30)]);
        held_event.meeting_number = HELD_MEETING;

        // Two deliveries of the same recording, both parked mid-upload after
        // reading `live_b` at order 5.
        let deliveries: Vec<_> = (0..2)
            .map(|_| {
                let service = held_service.clone();
                let event = held_event.clone();
                tokio::spawn(async move { service.ingest_recording(event).await })
            })
            .collect();
        held.entered.acquire_many(2).await.unwrap().forget();

        let outcome = f
            .service
            .ingest_recording(event(vec![file("MP4", 0), file("MP4", 20), file("MP4", 40)]))
            .await
            .unwrap();
        assert!(matches!(outcome, IngestOutcome::Ingested { parts: 3, .. }));
        assert_eq!(f.order_of(live_b.id).await, 7);

        held.gate.add_permits(1);
        let mut ingested = Vec::new();
        let mut skipped = Vec::new();
        for delivery in deliveries {
            match delivery.await.unwrap().unwrap() {
                IngestOutcome::Ingested { created, .. } => ingested.push(created),
                IngestOutcome::Skipped(reason) => skipped.push(reason),
            }
        }
        assert_eq!(ingested.len(), 1);
        assert!(matches!(
            skipped.as_slice(),
            [SkipReason::NotLiveClass {
                lesson_type: LessonType::RecordedVideo,
                ..
            }]
        ));

        assert_eq!(f.section_orders().await, (1..=9).collect::<Vec<u32>>());
        assert_eq!(f.order_of(first.id).await, 1);
        assert_eq!(f.order_of(live_b.id).await, 7);
        assert_eq!(f.order_of(ingested[0][0]).await, 8);
        assert_eq!(f.order_of(last.id).await, 9);

        let recorded = f.storage.lessons.get_lesson(live_b.id).await.unwrap().unwrap();
        assert_eq!(recorded.name, "Live B Part 1");
        assert_eq!(recorded.slug, live_b.slug);
        assert_eq!(held_jobs.jobs.lock().unwrap().len(), 1);
    }
}
