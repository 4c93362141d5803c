use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{LessonId, MeetingId, MeetingReportId, UserId};

/// A live-class lesson's conferencing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meeting {
    pub id: MeetingId,
    pub lesson_id: LessonId,
    /// Numeric meeting id assigned by the conferencing provider.
    pub meeting_number: u64,
    pub passcode: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub created_at: DateTime<Utc>,
}

/// Attendance row for one join event of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingReport {
    pub id: MeetingReportId,
    pub meeting_id: MeetingId,
    pub user_id: UserId,
    /// Start of the meeting session instance the participant joined.
    pub start_time: DateTime<Utc>,
    pub join_time: DateTime<Utc>,
    pub left_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl MeetingReport {
    #[must_use]
    pub fn open(
        id: MeetingReportId,
        meeting_id: MeetingId,
        user_id: UserId,
        start_time: DateTime<Utc>,
        join_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            meeting_id,
            user_id,
            start_time,
            join_time,
            left_time: None,
            duration_secs: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.left_time.is_none()
    }

    /// Records the leave time and the time spent, never negative.
    pub fn close(&mut self, left_time: DateTime<Utc>) {
        let secs = left_time.signed_duration_since(self.join_time).num_seconds();
        self.left_time = Some(left_time);
        self.duration_secs = Some(secs.max(0));
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
}
