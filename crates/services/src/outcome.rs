use std::fmt;

use serde::Serialize;

use lms_core::model::{LessonId, LessonType};

/// Why a webhook-driven workflow stopped without changing anything.
///
/// These are expected conditions, reported alongside a `warn!` log rather
/// than as errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    NoRecordingFiles,
    NoVideoParts,
    MissingMeetingId,
    MeetingNotFound { meeting_number: u64 },
    LessonNotFound { lesson_id: LessonId },
    NotLiveClass { lesson_id: LessonId, lesson_type: LessonType },
    UnknownUser { external_user_id: String },
    NoOpenReport,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoRecordingFiles => f.write_str("no recording files"),
            SkipReason::NoVideoParts => f.write_str("no mp4 recording parts"),
            SkipReason::MissingMeetingId => f.write_str("missing meeting id"),
            SkipReason::MeetingNotFound { meeting_number } => {
                write!(f, "no meeting with number {meeting_number}")
            }
            SkipReason::LessonNotFound { lesson_id } => write!(f, "lesson {lesson_id} not found"),
            SkipReason::NotLiveClass {
                lesson_id,
                lesson_type,
            } => write!(
                f,
                "lesson {lesson_id} is {} rather than live_class",
                lesson_type.as_str()
            ),
            SkipReason::UnknownUser { external_user_id } => {
                write!(f, "unknown participant {external_user_id:?}")
            }
            SkipReason::NoOpenReport => f.write_str("no open meeting report"),
        }
    }
}
