use lms_core::model::{Course, CourseId, Section, User, UserId};

use super::SqliteRepository;
use super::mapping::{conn, map_course_row, map_user_row};
use crate::repository::{CourseRepository, StorageError, UserRepository};

#[async_trait::async_trait]
impl CourseRepository for SqliteRepository {
    async fn upsert_course(&self, course: &Course) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO courses (id, slug, name, status, created_by, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                status = excluded.status
            ",
        )
        .bind(course.id.to_string())
        .bind(&course.slug)
        .bind(&course.name)
        .bind(course.status.as_str())
        .bind(course.created_by.to_string())
        .bind(course.created_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn get_course(&self, id: CourseId) -> Result<Option<Course>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, slug, name, status, created_by, created_at
            FROM courses WHERE id = ?1
            ",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_course_row).transpose()
    }

    async fn find_course_by_slug(&self, slug: &str) -> Result<Option<Course>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT id, slug, name, status, created_by, created_at
            FROM courses WHERE slug = ?1
            ",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_course_row).transpose()
    }

    async fn upsert_section(&self, section: &Section) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO sections (id, course_id, slug, name, sort_order)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                sort_order = excluded.sort_order
            ",
        )
        .bind(section.id.to_string())
        .bind(section.course_id.to_string())
        .bind(&section.slug)
        .bind(&section.name)
        .bind(i64::from(section.order))
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserRepository for SqliteRepository {
    async fn upsert_user(&self, user: &User) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO users (id, full_name, email)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                full_name = excluded.full_name,
                email = excluded.email
            ",
        )
        .bind(user.id.to_string())
        .bind(&user.full_name)
        .bind(&user.email)
        .execute(&self.pool)
        .await
        .map_err(conn)?;
        Ok(())
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        let row = sqlx::query("SELECT id, full_name, email FROM users WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_user_row).transpose()
    }
}
