use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::ids::{CourseId, SectionId, UserId};

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Publication state shared by courses and lessons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Review,
    Published,
    Rejected,
    Completed,
}

impl CourseStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CourseStatus::Draft => "draft",
            CourseStatus::Review => "review",
            CourseStatus::Published => "published",
            CourseStatus::Rejected => "rejected",
            CourseStatus::Completed => "completed",
        }
    }

    /// Parses the storage representation produced by [`CourseStatus::as_str`].
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::Invalid` for unknown values.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "draft" => Ok(CourseStatus::Draft),
            "review" => Ok(CourseStatus::Review),
            "published" => Ok(CourseStatus::Published),
            "rejected" => Ok(CourseStatus::Rejected),
            "completed" => Ok(CourseStatus::Completed),
            other => Err(ValidationError::Invalid {
                field: "status",
                value: other.to_owned(),
            }),
        }
    }
}

//
// ─── COURSE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub slug: String,
    pub name: String,
    pub status: CourseStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Course {
    /// # Errors
    ///
    /// Returns `ValidationError::Empty` if the name or slug is blank.
    pub fn new(
        id: CourseId,
        name: impl Into<String>,
        slug: impl Into<String>,
        status: CourseStatus,
        created_by: UserId,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        let slug = slug.into();
        if name.trim().is_empty() {
            return Err(ValidationError::Empty { field: "name" });
        }
        if slug.trim().is_empty() {
            return Err(ValidationError::Empty { field: "slug" });
        }
        Ok(Self {
            id,
            slug,
            name,
            status,
            created_by,
            created_at,
        })
    }
}

//
// ─── SECTION ───────────────────────────────────────────────────────────────────
//

/// Ordered grouping of lessons within a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    pub course_id: CourseId,
    pub slug: String,
    pub name: String,
    pub order: u32,
}
