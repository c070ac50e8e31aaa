//! Read-only view of the student directory owned by another service.

use crate::services::error::FeeError;
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

/// The scope-relevant part of a student record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct StudentProfile {
    pub student_id: Uuid,
    pub academic_year_id: Uuid,
    pub grade_id: Uuid,
    pub division_id: Option<Uuid>,
}

#[async_trait]
pub trait StudentDirectory: Send + Sync {
    async fn current_academic_year(&self) -> Result<Uuid, FeeError>;

    /// Active students only.
    async fn student(&self, student_id: Uuid) -> Result<Option<StudentProfile>, FeeError>;

    /// `grade_id = None` means every grade; `division_id = None` every division.
    async fn students_in_scope(
        &self,
        academic_year_id: Uuid,
        grade_id: Option<Uuid>,
        division_id: Option<Uuid>,
    ) -> Result<Vec<StudentProfile>, FeeError>;
}

/// Directory backed by the shared `students` and `academic_years` tables.
#[derive(Clone)]
pub struct PgStudentDirectory {
    pool: PgPool,
}

impl PgStudentDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StudentDirectory for PgStudentDirectory {
    #[instrument(skip(self))]
    async fn current_academic_year(&self) -> Result<Uuid, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["current_academic_year"])
            .start_timer();

        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM academic_years
            WHERE is_current
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(FeeError::storage("current_academic_year"))?;

        timer.observe_duration();

        id.ok_or_else(|| FeeError::not_found("Current academic year"))
    }

    #[instrument(skip(self), fields(student_id = %student_id))]
    async fn student(&self, student_id: Uuid) -> Result<Option<StudentProfile>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_student"])
            .start_timer();

        let student = sqlx::query_as::<_, StudentProfile>(
            r#"
            SELECT id AS student_id, academic_year_id, grade_id, division_id
            FROM students
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(FeeError::storage("get_student"))?;

        timer.observe_duration();

        Ok(student)
    }

    #[instrument(skip(self))]
    async fn students_in_scope(
        &self,
        academic_year_id: Uuid,
        grade_id: Option<Uuid>,
        division_id: Option<Uuid>,
    ) -> Result<Vec<StudentProfile>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["students_in_scope"])
            .start_timer();

        let students = sqlx::query_as::<_, StudentProfile>(
            r#"
            SELECT id AS student_id, academic_year_id, grade_id, division_id
            FROM students
            WHERE academic_year_id = $1
              AND status = 'active'
              AND ($2::uuid IS NULL OR grade_id = $2)
              AND ($3::uuid IS NULL OR division_id = $3)
            ORDER BY id
            "#,
        )
        .bind(academic_year_id)
        .bind(grade_id)
        .bind(division_id)
        .fetch_all(&self.pool)
        .await
        .map_err(FeeError::storage("students_in_scope"))?;

        timer.observe_duration();

        Ok(students)
    }
}
