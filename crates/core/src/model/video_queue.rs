use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::ids::{LessonId, VideoQueueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQueueStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl VideoQueueStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VideoQueueStatus::Queued => "queued",
            VideoQueueStatus::Running => "running",
            VideoQueueStatus::Completed => "completed",
            VideoQueueStatus::Failed => "failed",
        }
    }

    /// # Errors
    ///
    /// Returns `ValidationError::Invalid` for unknown values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "queued" => Ok(VideoQueueStatus::Queued),
            "running" => Ok(VideoQueueStatus::Running),
            "completed" => Ok(VideoQueueStatus::Completed),
            "failed" => Ok(VideoQueueStatus::Failed),
            other => Err(ValidationError::Invalid {
                field: "video_queue_status",
                value: other.to_owned(),
            }),
        }
    }
}

/// Transcoding task handed to the media pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoQueue {
    pub id: VideoQueueId,
    pub lesson_id: LessonId,
    pub video_url: String,
    pub status: VideoQueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoQueue {
    #[must_use]
    pub fn queued(
        id: VideoQueueId,
        lesson_id: LessonId,
        video_url: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            lesson_id,
            video_url,
            status: VideoQueueStatus::Queued,
            created_at: now,
            updated_at: now,
        }
    }
}
