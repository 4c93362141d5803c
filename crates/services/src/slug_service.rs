use std::collections::HashSet;
use std::sync::Arc;

use lms_core::slug::{slugify, with_suffix};
use storage::repository::{LessonRepository, StorageError};

const FALLBACK_SLUG: &str = "lesson";

/// Produces lesson slugs that no active lesson uses yet.
#[derive(Clone)]
pub struct SlugService {
    lessons: Arc<dyn LessonRepository>,
}

impl SlugService {
    #[must_use]
    pub fn new(lessons: Arc<dyn LessonRepository>) -> Self {
        Self { lessons }
    }

    /// Normalizes `candidate` and appends `-1`, `-2`, … until it is neither
    /// stored nor in `reserved` (picked but not yet stored).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    pub async fn unique_lesson_slug(
        &self,
        candidate: &str,
        reserved: &HashSet<String>,
    ) -> Result<String, StorageError> {
        let mut base = slugify(candidate);
        if base.is_empty() {
            base = FALLBACK_SLUG.to_owned();
        }

        if !self.is_taken(&base, reserved).await? {
            return Ok(base);
        }
        let mut n = 1;
        loop {
            let slug = with_suffix(&base, n);
            if !self.is_taken(&slug, reserved).await? {
                return Ok(slug);
            }
            n += 1;
        }
    }

    async fn is_taken(&self, slug: &str, reserved: &HashSet<String>) -> Result<bool, StorageError> {
        if reserved.contains(slug) {
            return Ok(true);
        }
        self.lessons.lesson_slug_exists(slug).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_core::model::{
        CourseId, CourseStatus, LessonDraft, LessonId, LessonType, SectionId, UserId,
    };
    use lms_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    async fn store_lesson(repo: &InMemoryRepository, slug: &str, deleted: bool) {
        let mut lesson = LessonDraft {
            course_id: CourseId::generate(),
            section_id: SectionId::generate(),
            slug: slug.into(),
            name: "Any".into(),
            lesson_type: LessonType::Video,
            status: CourseStatus::Published,
            order: 1,
            video_url: None,
            created_by: UserId::generate(),
        }
        .build(LessonId::generate(), fixed_now())
        .unwrap();
        lesson.is_deleted = deleted;
        repo.upsert_lesson(&lesson).await.unwrap();
    }

    #[tokio::test]
    async fn free_slug_is_used_as_is() {
        let repo = InMemoryRepository::new();
        let slugs = SlugService::new(Arc::new(repo));
        assert_eq!(
            slugs
                .unique_lesson_slug("Week 1 Live Part 2", &HashSet::new())
                .await
                .unwrap(),
            "week-1-live-part-2"
        );
    }

    #[tokio::test]
    async fn taken_slug_gets_counter() {
        let repo = InMemoryRepository::new();
        store_lesson(&repo, "intro", false).await;
        store_lesson(&repo, "intro-1", false).await;
        let slugs = SlugService::new(Arc::new(repo));
        assert_eq!(slugs
                .unique_lesson_slug("Intro", &HashSet::new())
                .await
                .unwrap(), "intro-2");
    }

    #[tokio::test]
    async fn deleted_lessons_release_their_slug() {
        let repo = InMemoryRepository::new();
        store_lesson(&repo, "intro", true).await;
        let slugs = SlugService::new(Arc::new(repo));
        assert_eq!(
            slugs
                .unique_lesson_slug("intro", &HashSet::new())
                .await
                .unwrap(),
            "intro"
        );
    }

    #[tokio::test]
    async fn reserved_and_empty_candidates() {
        let slugs = SlugService::new(Arc::new(InMemoryRepository::new()));
        let reserved: HashSet<String> = ["lesson".to_string()].into_iter().collect();
        assert_eq!(
            slugs.unique_lesson_slug("日本語", &reserved).await.unwrap(),
            "lesson-1"
        );
    }
}
