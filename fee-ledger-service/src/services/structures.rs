//! Fee structure catalog.

use crate::models::{
    AssignmentBatch, AssignmentFailure, FeeStructure, NewFeeStructure, Semester, StructureFilter,
    StructureLifecycle, StructureScope,
};
use crate::services::assignments::AssignmentEngine;
use crate::services::error::{validate_amount, FeeError};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{Connection, PgConnection, PgPool};
use tracing::{info, instrument, warn};
use uuid::Uuid;

const STRUCTURE_COLUMNS: &str = "id, academic_year_id, fee_category_id, grade_id, division_id, \
     scope, semester, description, amount, is_mandatory, due_date, lifecycle, created_by, \
     created_utc, updated_utc";

const GRADE_UNIQUE_INDEX: &str = "uq_fee_structures_grade_category";

/// Row-level access to `fee_structures`.
pub struct FeeStructureRepository;

impl FeeStructureRepository {
    #[instrument(skip(conn, input), fields(academic_year_id = %input.academic_year_id))]
    pub async fn insert(
        conn: &mut PgConnection,
        input: &NewFeeStructure,
        scope: StructureScope,
        lifecycle: StructureLifecycle,
    ) -> Result<FeeStructure, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_structure"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO fee_structures (id, academic_year_id, fee_category_id, grade_id, division_id,
                scope, semester, description, amount, is_mandatory, due_date, lifecycle, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            STRUCTURE_COLUMNS
        );

        let structure = sqlx::query_as::<_, FeeStructure>(&sql)
            .bind(Uuid::new_v4())
            .bind(input.academic_year_id)
            .bind(input.fee_category_id)
            .bind(input.grade_id)
            .bind(input.division_id)
            .bind(scope.as_str())
            .bind(input.semester.map(|s| s.as_str()))
            .bind(&input.description)
            .bind(input.amount)
            .bind(input.is_mandatory)
            .bind(input.due_date)
            .bind(lifecycle.as_str())
            .bind(input.created_by)
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("insert_structure"))?;

        timer.observe_duration();

        Ok(structure)
    }

    pub async fn get(conn: &mut PgConnection, id: Uuid) -> Result<Option<FeeStructure>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_structure"])
            .start_timer();

        let sql = format!("SELECT {} FROM fee_structures WHERE id = $1", STRUCTURE_COLUMNS);
        let structure = sqlx::query_as::<_, FeeStructure>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("get_structure"))?;

        timer.observe_duration();

        Ok(structure)
    }

    /// The active whole-grade structure for a (year, grade, category), if any.
    pub async fn find_active_grade_structure(
        conn: &mut PgConnection,
        academic_year_id: Uuid,
        grade_id: Uuid,
        fee_category_id: Uuid,
    ) -> Result<Option<Uuid>, FeeError> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM fee_structures
            WHERE academic_year_id = $1 AND grade_id = $2 AND fee_category_id = $3
              AND scope = 'grade' AND lifecycle = 'active'
            LIMIT 1
            "#,
        )
        .bind(academic_year_id)
        .bind(grade_id)
        .bind(fee_category_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(FeeError::storage("find_active_grade_structure"))
    }

    pub async fn list(
        conn: &mut PgConnection,
        filter: &StructureFilter,
    ) -> Result<Vec<FeeStructure>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_structures"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM fee_structures
            WHERE scope <> 'direct'
              AND ($1::uuid IS NULL OR academic_year_id = $1)
              AND ($2::uuid IS NULL OR grade_id = $2)
              AND ($3::uuid IS NULL OR fee_category_id = $3)
              AND ($4::text IS NULL OR lifecycle = $4)
              AND ($5::boolean IS NULL OR is_mandatory = $5)
            ORDER BY created_utc DESC
            "#,
            STRUCTURE_COLUMNS
        );

        let structures = sqlx::query_as::<_, FeeStructure>(&sql)
            .bind(filter.academic_year_id)
            .bind(filter.grade_id)
            .bind(filter.fee_category_id)
            .bind(filter.lifecycle.map(|l| l.as_str()))
            .bind(filter.is_mandatory)
            .fetch_all(&mut *conn)
            .await
            .map_err(FeeError::storage("list_structures"))?;

        timer.observe_duration();

        Ok(structures)
    }

    /// Active structures of a year that can apply to a student in this
    /// grade/division: universal, the grade itself, or the exact division.
    pub async fn candidates_for(
        conn: &mut PgConnection,
        academic_year_id: Uuid,
        grade_id: Uuid,
        division_id: Option<Uuid>,
        mandatory_only: bool,
    ) -> Result<Vec<FeeStructure>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["structure_candidates"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM fee_structures
            WHERE academic_year_id = $1
              AND lifecycle = 'active'
              AND (NOT $4 OR is_mandatory)
              AND (
                  scope = 'universal'
                  OR (scope = 'grade' AND grade_id = $2)
                  OR (scope = 'division' AND grade_id = $2 AND division_id = $3)
              )
            ORDER BY id
            "#,
            STRUCTURE_COLUMNS
        );

        let structures = sqlx::query_as::<_, FeeStructure>(&sql)
            .bind(academic_year_id)
            .bind(grade_id)
            .bind(division_id)
            .bind(mandatory_only)
            .fetch_all(&mut *conn)
            .await
            .map_err(FeeError::storage("structure_candidates"))?;

        timer.observe_duration();

        Ok(structures)
    }

    /// Move an active structure out of the active lifecycle. Returns `None`
    /// when no active structure with this id exists.
    pub async fn retire(
        conn: &mut PgConnection,
        id: Uuid,
        lifecycle: StructureLifecycle,
    ) -> Result<Option<FeeStructure>, FeeError> {
        let sql = format!(
            r#"
            UPDATE fee_structures
            SET lifecycle = $2, updated_utc = NOW()
            WHERE id = $1 AND lifecycle = 'active'
            RETURNING {}
            "#,
            STRUCTURE_COLUMNS
        );

        sqlx::query_as::<_, FeeStructure>(&sql)
            .bind(id)
            .bind(lifecycle.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("retire_structure"))
    }
}

/// Validate a catalog structure and derive its scope.
pub fn validate_new_structure(input: &NewFeeStructure) -> Result<StructureScope, FeeError> {
    validate_amount(input.amount)?;
    StructureScope::from_ids(input.grade_id, input.division_id)
        .ok_or_else(|| FeeError::validation("division_id", "a division requires a grade"))
}

/// Catalog operations that need more than one statement.
pub struct FeeStructureCatalog;

impl FeeStructureCatalog {
    /// Insert a catalog structure after the duplicate-scope check. The caller
    /// owns the transaction.
    #[instrument(skip(conn, input), fields(fee_category_id = %input.fee_category_id))]
    pub async fn create(
        conn: &mut PgConnection,
        input: &NewFeeStructure,
    ) -> Result<FeeStructure, FeeError> {
        let scope = validate_new_structure(input)?;

        if scope == StructureScope::Grade {
            if let Some(grade_id) = input.grade_id {
                if let Some(existing_id) = FeeStructureRepository::find_active_grade_structure(
                    conn,
                    input.academic_year_id,
                    grade_id,
                    input.fee_category_id,
                )
                .await?
                {
                    return Err(FeeError::DuplicateStructure { existing_id });
                }
            }
        }

        // Savepoint so a lost race with a concurrent creator leaves the
        // caller's transaction usable for the lookup below.
        let mut savepoint = conn
            .begin()
            .await
            .map_err(FeeError::storage("structure_savepoint"))?;

        let inserted =
            FeeStructureRepository::insert(&mut savepoint, input, scope, StructureLifecycle::Active)
                .await;

        let structure = match inserted {
            Ok(structure) => {
                savepoint
                    .commit()
                    .await
                    .map_err(FeeError::storage("structure_savepoint"))?;
                structure
            }
            Err(e) if e.is_unique_violation_on(GRADE_UNIQUE_INDEX) => {
                savepoint
                    .rollback()
                    .await
                    .map_err(FeeError::storage("structure_savepoint"))?;
                let existing_id = match input.grade_id {
                    Some(grade_id) => {
                        FeeStructureRepository::find_active_grade_structure(
                            conn,
                            input.academic_year_id,
                            grade_id,
                            input.fee_category_id,
                        )
                        .await?
                    }
                    None => None,
                };
                return Err(match existing_id {
                    Some(existing_id) => FeeError::DuplicateStructure { existing_id },
                    None => FeeError::TransientFailure {
                        correlation_id: Uuid::new_v4(),
                    },
                });
            }
            Err(e) => return Err(e),
        };

        info!(
            structure_id = %structure.id,
            scope = %structure.scope,
            amount = %structure.amount,
            "Fee structure created"
        );

        Ok(structure)
    }

    /// Synthesize the inactive structure behind a category-only payment.
    pub async fn create_direct(
        conn: &mut PgConnection,
        academic_year_id: Uuid,
        fee_category_id: Uuid,
        description: &str,
        amount: Decimal,
        due_date: NaiveDate,
        created_by: Uuid,
    ) -> Result<FeeStructure, FeeError> {
        let input = NewFeeStructure {
            academic_year_id,
            fee_category_id,
            grade_id: None,
            division_id: None,
            semester: None::<Semester>,
            description: Some(description.to_string()),
            amount,
            is_mandatory: false,
            due_date,
            created_by: Some(created_by),
        };

        FeeStructureRepository::insert(
            conn,
            &input,
            StructureScope::Direct,
            StructureLifecycle::Inactive,
        )
        .await
    }
}

/// A new structure and what its fan-out produced.
#[derive(Debug, Clone, Serialize)]
pub struct StructureCreated {
    pub structure: FeeStructure,
    pub assignments: AssignmentBatch,
}

/// Catalog entry points used by the HTTP layer.
#[derive(Clone)]
pub struct FeeStructureService {
    pool: PgPool,
    engine: AssignmentEngine,
}

impl FeeStructureService {
    pub fn new(pool: PgPool, engine: AssignmentEngine) -> Self {
        Self { pool, engine }
    }

    /// Create a structure, then materialize it for every student it applies
    /// to when it is mandatory. Fan-out failures never fail the creation.
    #[instrument(skip(self, input), fields(academic_year_id = %input.academic_year_id))]
    pub async fn create_structure(
        &self,
        input: &NewFeeStructure,
    ) -> Result<StructureCreated, FeeError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(FeeError::storage("begin_transaction"))?;
        let structure = FeeStructureCatalog::create(&mut tx, input).await?;
        tx.commit()
            .await
            .map_err(FeeError::storage("commit_structure"))?;

        let assignments = match self.engine.assign_on_structure_creation(&structure).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!(structure_id = %structure.id, error = %e, "Structure fan-out failed");
                AssignmentBatch {
                    failed: vec![AssignmentFailure {
                        fee_structure_id: structure.id,
                        reason: e.to_string(),
                    }],
                    ..AssignmentBatch::default()
                }
            }
        };

        Ok(StructureCreated {
            structure,
            assignments,
        })
    }

    pub async fn get_structure(&self, id: Uuid) -> Result<FeeStructure, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        FeeStructureRepository::get(&mut conn, id)
            .await?
            .ok_or_else(|| FeeError::not_found("Fee structure"))
    }

    pub async fn list_structures(
        &self,
        filter: &StructureFilter,
    ) -> Result<Vec<FeeStructure>, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        FeeStructureRepository::list(&mut conn, filter).await
    }

    /// Retire an active structure. Existing assignments keep their balances.
    #[instrument(skip(self), fields(structure_id = %id))]
    pub async fn deactivate_structure(
        &self,
        id: Uuid,
        lifecycle: StructureLifecycle,
    ) -> Result<FeeStructure, FeeError> {
        if lifecycle == StructureLifecycle::Active {
            return Err(FeeError::validation(
                "lifecycle",
                "must be inactive or superseded",
            ));
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        match FeeStructureRepository::retire(&mut conn, id, lifecycle).await? {
            Some(structure) => {
                info!(structure_id = %id, lifecycle = %lifecycle, "Fee structure retired");
                Ok(structure)
            }
            None => match FeeStructureRepository::get(&mut conn, id).await? {
                Some(existing) => Err(FeeError::validation(
                    "lifecycle",
                    format!("structure is already {}", existing.lifecycle),
                )),
                None => Err(FeeError::not_found("Fee structure")),
            },
        }
    }
}
