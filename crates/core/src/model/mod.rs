mod course;
mod ids;
mod lesson;
mod meeting;
mod progress;
pub mod recording;
mod video_queue;

pub use ids::{
    CourseId, EnrollmentId, Identity, LessonId, MeetingId, MeetingReportId, ParseIdError,
    SectionId, UserId, VideoQueueId, WatchHistoryId,
};

pub use course::{Course, CourseStatus, Section};
pub use lesson::{Lesson, LessonDraft, LessonType, validate_video_url};
pub use meeting::{Meeting, MeetingReport, User};
pub use progress::{
    CourseEnrollment, EnrollmentMemberStatus, WatchHistory, WatchPercentage,
    completion_percentage,
};
pub use recording::{
    RecordingFile, RecordingFileType, RecordingReassembly, ReassemblyError, SiblingShift,
    UploadedPart, part_name, plan_reassembly, video_parts,
};
pub use video_queue::{VideoQueue, VideoQueueStatus};
