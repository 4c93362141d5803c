//! Meeting recordings and how they are reassembled into lessons.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{LessonId, SectionId, VideoQueueId};
use crate::model::lesson::Lesson;
use crate::model::video_queue::VideoQueue;

//
// ─── RECORDING FILES ───────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordingFileType {
    Mp4,
    M4a,
    Timeline,
    Transcript,
    Chat,
    ClosedCaption,
    Csv,
    Other(String),
}

impl RecordingFileType {
    /// Maps the provider's upper-case file type label (`"MP4"`, `"M4A"`, ...).
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "MP4" => Self::Mp4,
            "M4A" => Self::M4a,
            "TIMELINE" => Self::Timeline,
            "TRANSCRIPT" => Self::Transcript,
            "CHAT" => Self::Chat,
            "CC" => Self::ClosedCaption,
            "CSV" => Self::Csv,
            _ => Self::Other(label.to_owned()),
        }
    }
}

/// One file of a completed cloud recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingFile {
    pub file_type: RecordingFileType,
    pub download_url: String,
    pub file_size: u64,
    pub recording_start: DateTime<Utc>,
}

/// MP4 files ordered by recording start; ties keep delivery order.
#[must_use]
pub fn video_parts(files: &[RecordingFile]) -> Vec<RecordingFile> {
    let mut parts: Vec<RecordingFile> = files
        .iter()
        .filter(|f| f.file_type == RecordingFileType::Mp4)
        .cloned()
        .collect();
    parts.sort_by_key(|f| f.recording_start);
    parts
}

#[must_use]
pub fn part_name(lesson_name: &str, order: u32) -> String {
    format!("{lesson_name} Part {order}")
}

//
// ─── REASSEMBLY PLAN ───────────────────────────────────────────────────────────
//

/// A recording part after it has been moved to durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based position in recording order.
    pub order: u32,
    pub name: String,
    pub video_url: String,
}

/// Moves every non-deleted lesson of `section_id` with `order > after_order`
/// down by `by` slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingShift {
    pub section_id: SectionId,
    pub after_order: u32,
    pub by: u32,
}

impl SiblingShift {
    #[must_use]
    pub fn applies_to(&self, lesson: &Lesson) -> bool {
        lesson.section_id == self.section_id && !lesson.is_deleted && lesson.order > self.after_order
    }
}

/// Every lesson mutation produced by ingesting one recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingReassembly {
    pub updated: Lesson,
    pub created: Vec<Lesson>,
    pub shift: Option<SiblingShift>,
    pub video_queue: Vec<VideoQueue>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReassemblyError {
    #[error("recording has no video parts")]
    NoParts,

    #[error("expected {expected} slugs for new lessons, got {got}")]
    SlugCountMismatch { expected: usize, got: usize },
}

/// Plans how `parts` replace the live-class lesson `original`.
///
/// A single part rewrites `original` in place. With more parts, part 1
/// rewrites `original` (keeping its order), parts 2..N become new lessons at
/// `original.order + 1 ..`, and the later siblings are shifted to make room.
/// `slugs` supplies one unique slug per new lesson, in part order.
///
/// # Errors
///
/// Returns `ReassemblyError` when `parts` is empty or `slugs` does not match
/// the number of new lessons.
pub fn plan_reassembly(
    original: &Lesson,
    parts: &[UploadedPart],
    slugs: Vec<String>,
    now: DateTime<Utc>,
) -> Result<RecordingReassembly, ReassemblyError> {
    let (first, rest) = parts.split_first().ok_or(ReassemblyError::NoParts)?;

    if slugs.len() != rest.len() {
        return Err(ReassemblyError::SlugCountMismatch {
            expected: rest.len(),
            got: slugs.len(),
        });
    }

    let mut updated = original.clone();
    if rest.is_empty() {
        updated.apply_recording(None, first.video_url.clone(), now);
        return Ok(RecordingReassembly {
            updated,
            created: Vec::new(),
            shift: None,
            video_queue: Vec::new(),
        });
    }

    updated.apply_recording(Some(first.name.clone()), first.video_url.clone(), now);

    let mut created = Vec::with_capacity(rest.len());
    let mut video_queue = Vec::with_capacity(rest.len());
    for ((part, slug), order) in rest.iter().zip(slugs).zip(original.order + 1..) {
        let lesson = original.recorded_sibling(
            LessonId::generate(),
            part.name.clone(),
            slug,
            part.video_url.clone(),
            order,
            now,
        );
        video_queue.push(VideoQueue::queued(
            VideoQueueId::generate(),
            lesson.id,
            part.video_url.clone(),
            now,
        ));
        created.push(lesson);
    }

    let by = u32::try_from(rest.len()).unwrap_or(u32::MAX);
    Ok(RecordingReassembly {
        updated,
        created,
        shift: Some(SiblingShift {
            section_id: original.section_id,
            after_order: original.order,
            by,
        }),
        video_queue,
    })
}
