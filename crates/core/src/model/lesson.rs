use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::course::CourseStatus;
use crate::model::ids::{CourseId, LessonId, SectionId, UserId};

//
// ─── LESSON TYPE ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonType {
    Video,
    Document,
    Exam,
    Assignment,
    LiveClass,
    RecordedVideo,
    Feedback,
    Physical,
    ExternalUrl,
}

impl LessonType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonType::Video => "video",
            LessonType::Document => "document",
            LessonType::Exam => "exam",
            LessonType::Assignment => "assignment",
            LessonType::LiveClass => "live_class",
            LessonType::RecordedVideo => "recorded_video",
            LessonType::Feedback => "feedback",
            LessonType::Physical => "physical",
            LessonType::ExternalUrl => "external_url",
        }
    }

    /// # Errors
    ///
    /// Returns `ValidationError::Invalid` for unknown values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "video" => Ok(LessonType::Video),
            "document" => Ok(LessonType::Document),
            "exam" => Ok(LessonType::Exam),
            "assignment" => Ok(LessonType::Assignment),
            "live_class" => Ok(LessonType::LiveClass),
            "recorded_video" => Ok(LessonType::RecordedVideo),
            "feedback" => Ok(LessonType::Feedback),
            "physical" => Ok(LessonType::Physical),
            "external_url" => Ok(LessonType::ExternalUrl),
            other => Err(ValidationError::Invalid {
                field: "lesson_type",
                value: other.to_owned(),
            }),
        }
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// A unit of course content.
///
/// `order` is 1-based and unique among the non-deleted lessons of a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: LessonId,
    pub course_id: CourseId,
    pub section_id: SectionId,
    pub slug: String,
    pub name: String,
    pub lesson_type: LessonType,
    pub status: CourseStatus,
    pub order: u32,
    pub video_url: Option<String>,
    pub is_deleted: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to author a lesson; ids and timestamps are assigned by [`LessonDraft::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDraft {
    pub course_id: CourseId,
    pub section_id: SectionId,
    pub slug: String,
    pub name: String,
    pub lesson_type: LessonType,
    pub status: CourseStatus,
    pub order: u32,
    pub video_url: Option<String>,
    pub created_by: UserId,
}

impl LessonDraft {
    /// # Errors
    ///
    /// Returns `ValidationError` for blank name/slug, a zero order or a
    /// video URL that does not parse.
    pub fn build(self, id: LessonId, now: DateTime<Utc>) -> Result<Lesson, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Empty { field: "name" });
        }
        if self.slug.trim().is_empty() {
            return Err(ValidationError::Empty { field: "slug" });
        }
        if self.order == 0 {
            return Err(ValidationError::InvalidOrder);
        }
        if let Some(url) = &self.video_url {
            validate_video_url(url)?;
        }
        Ok(Lesson {
            id,
            course_id: self.course_id,
            section_id: self.section_id,
            slug: self.slug,
            name: self.name,
            lesson_type: self.lesson_type,
            status: self.status,
            order: self.order,
            video_url: self.video_url,
            is_deleted: false,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        })
    }
}

impl Lesson {
    /// Lessons counted toward course completion.
    #[must_use]
    pub fn counts_toward_progress(&self) -> bool {
        self.status == CourseStatus::Published && !self.is_deleted
    }

    #[must_use]
    pub fn is_live_class(&self) -> bool {
        self.lesson_type == LessonType::LiveClass
    }

    /// Converts this lesson into a recorded video pointing at `video_url`.
    pub fn apply_recording(
        &mut self,
        name: Option<String>,
        video_url: String,
        now: DateTime<Utc>,
    ) {
        if let Some(name) = name {
            self.name = name;
        }
        self.lesson_type = LessonType::RecordedVideo;
        self.video_url = Some(video_url);
        self.updated_at = now;
    }

    /// Builds a sibling recorded-video lesson that inherits course, section,
    /// status and creator from `self`.
    #[must_use]
    pub fn recorded_sibling(
        &self,
        id: LessonId,
        name: String,
        slug: String,
        video_url: String,
        order: u32,
        now: DateTime<Utc>,
    ) -> Lesson {
        Lesson {
            id,
            course_id: self.course_id,
            section_id: self.section_id,
            slug,
            name,
            lesson_type: LessonType::RecordedVideo,
            status: self.status,
            order,
            video_url: Some(video_url),
            is_deleted: false,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// # Errors
///
/// Returns `ValidationError::Invalid` if `raw` is not an absolute URL.
pub fn validate_video_url(raw: &str) -> Result<(), ValidationError> {
    url::Url::parse(raw)
        .map(|_| ())
        .map_err(|_| ValidationError::Invalid {
            field: "video_url",
            value: raw.to_owned(),
        })
}
