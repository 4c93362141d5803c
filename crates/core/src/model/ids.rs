use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error type for parsing an ID from a string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    kind: &'static str,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            /// Generates a fresh random identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn value(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| ParseIdError {
                        kind: stringify!($name),
                    })
            }
        }
    };
}

entity_id!(
    /// Unique identifier for a Course
    CourseId
);
entity_id!(
    /// Unique identifier for a Section
    SectionId
);
entity_id!(
    /// Unique identifier for a Lesson
    LessonId
);
entity_id!(
    /// Unique identifier for a User
    UserId
);
entity_id!(
    /// Unique identifier for a Meeting row (not the provider's meeting number)
    MeetingId
);
entity_id!(
    /// Unique identifier for a `MeetingReport`
    MeetingReportId
);
entity_id!(
    /// Unique identifier for a `WatchHistory` row
    WatchHistoryId
);
entity_id!(
    /// Unique identifier for a `CourseEnrollment`
    EnrollmentId
);
entity_id!(
    /// Unique identifier for a `VideoQueue` entry
    VideoQueueId
);

// ─── Identity ──────────────────────────────────────────────────────────────────

/// Reference to a course or lesson either by identifier or by slug.
///
/// Route parameters accept both; anything that parses as a UUID is treated as
/// an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identity {
    Id(Uuid),
    Slug(String),
}

impl Identity {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match Uuid::parse_str(trimmed) {
            Ok(id) => Self::Id(id),
            Err(_) => Self::Slug(trimmed.to_owned()),
        }
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<CourseId> for Identity {
    fn from(id: CourseId) -> Self {
        Self::Id(id.value())
    }
}

impl From<LessonId> for Identity {
    fn from(id: LessonId) -> Self {
        Self::Id(id.value())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Id(id) => write!(f, "{id}"),
            Identity::Slug(slug) => f.write_str(slug),
        }
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
