//! Assignment engine: materializes per-student obligations from structures.

use crate::config::SchoolConfig;
use crate::models::{
    AssignOutcome, AssignmentBatch, AssignmentFailure, AssignmentStatus, FeeStructure,
    FeeSummary, Semester, StudentFeeAssignment, SummaryRow,
};
use crate::services::directory::{StudentDirectory, StudentProfile};
use crate::services::error::FeeError;
use crate::services::metrics::{ASSIGNMENTS_CREATED, DB_QUERY_DURATION};
use crate::services::structures::FeeStructureRepository;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection, PgPool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const ASSIGNMENT_COLUMNS: &str = "id, student_id, fee_structure_id, semester, total_amount, \
     paid_amount, pending_amount, due_date, status, cancelled_reason, cancelled_utc, \
     assigned_utc, updated_utc";

/// Row-level access to `student_fee_assignments`.
pub struct AssignmentRepository;

impl AssignmentRepository {
    /// Insert unless a live assignment for the pair exists. Concurrent callers
    /// converge on one row through the partial unique index.
    #[instrument(skip(conn, structure), fields(student_id = %student_id, structure_id = %structure.id))]
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        student_id: Uuid,
        structure: &FeeStructure,
        today: NaiveDate,
    ) -> Result<AssignOutcome, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_assignment"])
            .start_timer();

        let status =
            AssignmentStatus::derive(Decimal::ZERO, structure.amount, structure.due_date, today);

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO student_fee_assignments (id, student_id, fee_structure_id, semester,
                total_amount, paid_amount, pending_amount, due_date, status)
            VALUES ($1, $2, $3, $4, $5, 0, $5, $6, $7)
            ON CONFLICT (student_id, fee_structure_id) WHERE status <> 'cancelled' DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(student_id)
        .bind(structure.id)
        .bind(structure.semester.as_db())
        .bind(structure.amount)
        .bind(structure.due_date)
        .bind(status.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(FeeError::storage("insert_assignment"))?;

        let outcome = match inserted {
            Some(id) => AssignOutcome::Created(id),
            None => {
                let existing = Self::find_live(conn, student_id, structure.id)
                    .await?
                    .ok_or_else(|| FeeError::TransientFailure {
                        correlation_id: Uuid::new_v4(),
                    })?;
                AssignOutcome::Existing(existing)
            }
        };

        timer.observe_duration();

        Ok(outcome)
    }

    pub async fn find_live(
        conn: &mut PgConnection,
        student_id: Uuid,
        fee_structure_id: Uuid,
    ) -> Result<Option<Uuid>, FeeError> {
        sqlx::query_scalar(
            r#"
            SELECT id FROM student_fee_assignments
            WHERE student_id = $1 AND fee_structure_id = $2 AND status <> 'cancelled'
            "#,
        )
        .bind(student_id)
        .bind(fee_structure_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(FeeError::storage("find_live_assignment"))
    }

    /// Lock assignments in id order. Missing ids are simply absent from the
    /// result.
    pub async fn lock_many(
        conn: &mut PgConnection,
        ids: &[Uuid],
    ) -> Result<Vec<StudentFeeAssignment>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_assignments"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM student_fee_assignments
            WHERE id = ANY($1)
            ORDER BY id
            FOR UPDATE
            "#,
            ASSIGNMENT_COLUMNS
        );

        let rows = sqlx::query_as::<_, StudentFeeAssignment>(&sql)
            .bind(ids)
            .fetch_all(&mut *conn)
            .await
            .map_err(FeeError::storage("lock_assignments"))?;

        timer.observe_duration();

        Ok(rows)
    }

    /// Relative balance update. The status is derived from the new values in
    /// the same statement.
    pub async fn apply_payment(
        conn: &mut PgConnection,
        assignment_id: Uuid,
        share: Decimal,
        today: NaiveDate,
    ) -> Result<StudentFeeAssignment, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_payment"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE student_fee_assignments
            SET paid_amount = paid_amount + $2,
                pending_amount = pending_amount - $2,
                status = CASE
                    WHEN pending_amount - $2 <= 0 THEN 'paid'
                    WHEN due_date < $3 THEN 'overdue'
                    WHEN paid_amount + $2 > 0 THEN 'partial'
                    ELSE 'pending'
                END,
                updated_utc = NOW()
            WHERE id = $1 AND status <> 'cancelled' AND pending_amount >= $2
            RETURNING {}
            "#,
            ASSIGNMENT_COLUMNS
        );

        let updated = sqlx::query_as::<_, StudentFeeAssignment>(&sql)
            .bind(assignment_id)
            .bind(share)
            .bind(today)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("apply_payment"))?;

        timer.observe_duration();

        updated.ok_or_else(|| {
            FeeError::validation("amount", "payment exceeds the pending amount of an assignment")
        })
    }

    pub async fn list_for_student(
        conn: &mut PgConnection,
        student_id: Uuid,
        include_cancelled: bool,
    ) -> Result<Vec<StudentFeeAssignment>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_assignments"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM student_fee_assignments
            WHERE student_id = $1 AND ($2 OR status <> 'cancelled')
            ORDER BY due_date, assigned_utc
            "#,
            ASSIGNMENT_COLUMNS
        );

        let rows = sqlx::query_as::<_, StudentFeeAssignment>(&sql)
            .bind(student_id)
            .bind(include_cancelled)
            .fetch_all(&mut *conn)
            .await
            .map_err(FeeError::storage("list_assignments"))?;

        timer.observe_duration();

        Ok(rows)
    }

    /// Cancel every live assignment of a student with nothing paid against it.
    pub async fn cancel_unpaid(
        conn: &mut PgConnection,
        student_id: Uuid,
        reason: &str,
    ) -> Result<Vec<Uuid>, FeeError> {
        sqlx::query_scalar(
            r#"
            UPDATE student_fee_assignments
            SET status = 'cancelled',
                cancelled_reason = $2,
                cancelled_utc = NOW(),
                updated_utc = NOW()
            WHERE student_id = $1 AND status <> 'cancelled' AND paid_amount = 0
            RETURNING id
            "#,
        )
        .bind(student_id)
        .bind(reason)
        .fetch_all(&mut *conn)
        .await
        .map_err(FeeError::storage("cancel_unpaid_assignments"))
    }

    pub async fn summary_rows(
        conn: &mut PgConnection,
        student_id: Uuid,
    ) -> Result<Vec<SummaryRow>, FeeError> {
        sqlx::query_as::<_, SummaryRow>(
            r#"
            SELECT a.semester, s.is_mandatory, a.total_amount, a.paid_amount,
                   a.pending_amount, a.due_date
            FROM student_fee_assignments a
            JOIN fee_structures s ON s.id = a.fee_structure_id
            WHERE a.student_id = $1 AND a.status <> 'cancelled'
            "#,
        )
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(FeeError::storage("summary_rows"))
    }

    /// Structure ids with a live assignment for this student.
    pub async fn live_structure_ids(
        conn: &mut PgConnection,
        student_id: Uuid,
    ) -> Result<Vec<Uuid>, FeeError> {
        sqlx::query_scalar(
            r#"
            SELECT fee_structure_id FROM student_fee_assignments
            WHERE student_id = $1 AND status <> 'cancelled'
            "#,
        )
        .bind(student_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(FeeError::storage("live_structure_ids"))
    }
}

/// Scope precedence is per category: only candidates at the most specific
/// level present for a category survive (division, then grade, then
/// universal). Within that level one structure per semester is kept and ties
/// go to the oldest.
pub fn resolve_structures(candidates: Vec<FeeStructure>) -> Vec<FeeStructure> {
    let mut level: HashMap<Uuid, u8> = HashMap::new();
    for candidate in &candidates {
        let specificity = candidate.scope.specificity();
        level
            .entry(candidate.fee_category_id)
            .and_modify(|l| *l = (*l).max(specificity))
            .or_insert(specificity);
    }

    let mut best: HashMap<(Uuid, Option<Semester>), FeeStructure> = HashMap::new();
    for candidate in candidates {
        if level.get(&candidate.fee_category_id) != Some(&candidate.scope.specificity()) {
            continue;
        }
        let key = (candidate.fee_category_id, candidate.semester());
        match best.get(&key) {
            Some(current) if !outranks(&candidate, current) => {}
            _ => {
                best.insert(key, candidate);
            }
        }
    }

    let mut resolved: Vec<FeeStructure> = best.into_values().collect();
    resolved.sort_by_key(|s| s.id);
    resolved
}

fn outranks(candidate: &FeeStructure, current: &FeeStructure) -> bool {
    let (a, b) = (candidate.scope.specificity(), current.scope.specificity());
    a > b || (a == b && (candidate.created_utc, candidate.id) < (current.created_utc, current.id))
}

/// Creates and cancels assignments in response to directory events.
#[derive(Clone)]
pub struct AssignmentEngine {
    pool: PgPool,
    directory: Arc<dyn StudentDirectory>,
    school: SchoolConfig,
}

impl AssignmentEngine {
    pub fn new(pool: PgPool, directory: Arc<dyn StudentDirectory>, school: SchoolConfig) -> Self {
        Self {
            pool,
            directory,
            school,
        }
    }

    /// Idempotent single assignment on a caller-owned connection.
    pub async fn assign_in(
        conn: &mut PgConnection,
        student_id: Uuid,
        structure: &FeeStructure,
        today: NaiveDate,
        trigger: &'static str,
    ) -> Result<AssignOutcome, FeeError> {
        let outcome = AssignmentRepository::insert_if_absent(conn, student_id, structure, today).await?;

        if outcome.was_created() {
            ASSIGNMENTS_CREATED.with_label_values(&[trigger]).inc();
            info!(
                student_id = %student_id,
                structure_id = %structure.id,
                assignment_id = %outcome.assignment_id(),
                trigger = trigger,
                "Fee assignment created"
            );
        }

        Ok(outcome)
    }

    /// Assign one structure to one student. A second call for the same pair
    /// returns the existing assignment.
    #[instrument(skip(self), fields(student_id = %student_id, structure_id = %structure_id))]
    pub async fn assign_structure(
        &self,
        student_id: Uuid,
        structure_id: Uuid,
    ) -> Result<AssignOutcome, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let structure = FeeStructureRepository::get(&mut conn, structure_id)
            .await?
            .filter(|s| s.is_active())
            .ok_or_else(|| FeeError::not_found("Active fee structure"))?;

        Self::assign_in(&mut conn, student_id, &structure, self.school.today(), "manual").await
    }

    /// Assign each structure in its own savepoint so one failure does not
    /// poison the rest of the batch.
    async fn assign_batch(
        conn: &mut PgConnection,
        student_id: Uuid,
        structures: &[FeeStructure],
        today: NaiveDate,
        trigger: &'static str,
        batch: &mut AssignmentBatch,
    ) -> Result<(), FeeError> {
        for structure in structures {
            let mut savepoint = conn
                .begin()
                .await
                .map_err(FeeError::storage("assignment_savepoint"))?;

            match Self::assign_in(&mut savepoint, student_id, structure, today, trigger).await {
                Ok(outcome) => {
                    savepoint
                        .commit()
                        .await
                        .map_err(FeeError::storage("assignment_savepoint"))?;
                    batch.record(outcome);
                }
                Err(e) => {
                    warn!(
                        student_id = %student_id,
                        structure_id = %structure.id,
                        error = %e,
                        "Skipping structure that failed to assign"
                    );
                    savepoint
                        .rollback()
                        .await
                        .map_err(FeeError::storage("assignment_savepoint"))?;
                    batch.failed.push(AssignmentFailure {
                        fee_structure_id: structure.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Assign every mandatory active structure that applies to the student.
    #[instrument(skip(self), fields(student_id = %student.student_id))]
    pub async fn auto_assign_on_enrollment(
        &self,
        student: &StudentProfile,
    ) -> Result<AssignmentBatch, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let candidates = FeeStructureRepository::candidates_for(
            &mut conn,
            student.academic_year_id,
            student.grade_id,
            student.division_id,
            true,
        )
        .await?;
        let structures = resolve_structures(candidates);

        let mut batch = AssignmentBatch::default();
        Self::assign_batch(
            &mut conn,
            student.student_id,
            &structures,
            self.school.today(),
            "enrollment",
            &mut batch,
        )
        .await?;

        info!(
            student_id = %student.student_id,
            created = batch.created.len(),
            existing = batch.existing.len(),
            failed = batch.failed.len(),
            "Enrollment assignment finished"
        );

        Ok(batch)
    }

    /// Look the student up in the directory and run enrollment assignment.
    pub async fn enroll(&self, student_id: Uuid) -> Result<AssignmentBatch, FeeError> {
        let student = self
            .directory
            .student(student_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Student"))?;

        self.auto_assign_on_enrollment(&student).await
    }

    /// Fan a newly created mandatory structure out to the students it
    /// applies to. Students with a more specific structure for the same
    /// category and semester are skipped.
    #[instrument(skip(self, structure), fields(structure_id = %structure.id))]
    pub async fn assign_on_structure_creation(
        &self,
        structure: &FeeStructure,
    ) -> Result<AssignmentBatch, FeeError> {
        let mut batch = AssignmentBatch::default();
        if !structure.is_mandatory || !structure.is_active() {
            return Ok(batch);
        }

        let students = self
            .directory
            .students_in_scope(structure.academic_year_id, structure.grade_id, structure.division_id)
            .await?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;
        let today = self.school.today();

        for student in &students {
            let candidates = match FeeStructureRepository::candidates_for(
                &mut conn,
                student.academic_year_id,
                student.grade_id,
                student.division_id,
                true,
            )
            .await
            {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(student_id = %student.student_id, error = %e, "Scope lookup failed");
                    batch.failed.push(AssignmentFailure {
                        fee_structure_id: structure.id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let selected = resolve_structures(candidates)
                .into_iter()
                .any(|s| s.id == structure.id);
            if selected {
                Self::assign_batch(
                    &mut conn,
                    student.student_id,
                    std::slice::from_ref(structure),
                    today,
                    "structure_created",
                    &mut batch,
                )
                .await?;
            }
        }

        info!(
            structure_id = %structure.id,
            students = students.len(),
            created = batch.created.len(),
            failed = batch.failed.len(),
            "Structure fan-out finished"
        );

        Ok(batch)
    }

    /// Cancel unpaid assignments and re-run scope resolution for the new
    /// grade/division. Anything with money against it is left alone.
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn reassign_on_grade_change(
        &self,
        student_id: Uuid,
        new_grade_id: Uuid,
        new_division_id: Option<Uuid>,
    ) -> Result<AssignmentBatch, FeeError> {
        let current = self
            .directory
            .student(student_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Student"))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(FeeError::storage("begin_transaction"))?;

        let cancelled =
            AssignmentRepository::cancel_unpaid(&mut tx, student_id, "grade/division change").await?;
        let mut batch = AssignmentBatch {
            cancelled,
            ..AssignmentBatch::default()
        };

        let candidates = FeeStructureRepository::candidates_for(
            &mut tx,
            current.academic_year_id,
            new_grade_id,
            new_division_id,
            true,
        )
        .await?;
        let structures = resolve_structures(candidates);

        Self::assign_batch(
            &mut tx,
            student_id,
            &structures,
            self.school.today(),
            "grade_change",
            &mut batch,
        )
        .await?;

        tx.commit()
            .await
            .map_err(FeeError::storage("commit_grade_change"))?;

        info!(
            student_id = %student_id,
            cancelled = batch.cancelled.len(),
            created = batch.created.len(),
            existing = batch.existing.len(),
            "Grade change reassignment finished"
        );

        Ok(batch)
    }

    /// Assignments of a student with the status re-derived for today.
    pub async fn list_assignments(
        &self,
        student_id: Uuid,
        include_cancelled: bool,
    ) -> Result<Vec<StudentFeeAssignment>, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let today = self.school.today();
        let mut rows =
            AssignmentRepository::list_for_student(&mut conn, student_id, include_cancelled).await?;
        for row in &mut rows {
            row.status = row.effective_status(today);
        }

        Ok(rows)
    }

    #[instrument(skip(self), fields(student_id = %student_id))]
    pub async fn fee_summary(&self, student_id: Uuid) -> Result<FeeSummary, FeeError> {
        let profile = self.directory.student(student_id).await?;

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let rows = AssignmentRepository::summary_rows(&mut conn, student_id).await?;
        if rows.is_empty() && profile.is_none() {
            return Err(FeeError::not_found("Student"));
        }

        let available_optional = match profile {
            Some(profile) => {
                let taken = AssignmentRepository::live_structure_ids(&mut conn, student_id).await?;
                let candidates = FeeStructureRepository::candidates_for(
                    &mut conn,
                    profile.academic_year_id,
                    profile.grade_id,
                    profile.division_id,
                    false,
                )
                .await?;
                candidates
                    .into_iter()
                    .filter(|s| !s.is_mandatory && !taken.contains(&s.id))
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(FeeSummary::from_rows(
            student_id,
            &rows,
            available_optional,
            self.school.today(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OptionalSemester, StructureLifecycle, StructureScope};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn structure(category: Uuid, semester: Option<Semester>, scope: StructureScope) -> FeeStructure {
        let now = Utc::now();
        let grade = Uuid::from_u128(7);
        let (grade_id, division_id) = match scope {
            StructureScope::Division => (Some(grade), Some(Uuid::from_u128(8))),
            StructureScope::Grade => (Some(grade), None),
            _ => (None, None),
        };
        FeeStructure {
            id: Uuid::new_v4(),
            academic_year_id: Uuid::from_u128(1),
            fee_category_id: category,
            grade_id,
            division_id,
            scope,
            semester: OptionalSemester(semester),
            description: None,
            amount: dec!(5000),
            is_mandatory: true,
            due_date: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            lifecycle: StructureLifecycle::Active,
            created_by: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn division_beats_grade_beats_universal() {
        let tuition = Uuid::new_v4();
        let universal = structure(tuition, Some(Semester::First), StructureScope::Universal);
        let grade = structure(tuition, Some(Semester::First), StructureScope::Grade);
        let division = structure(tuition, Some(Semester::First), StructureScope::Division);
        let division_id = division.id;

        let resolved = resolve_structures(vec![universal, division, grade]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, division_id);
    }

    #[test]
    fn grade_wins_when_no_division_structure() {
        let tuition = Uuid::new_v4();
        let universal = structure(tuition, None, StructureScope::Universal);
        let grade = structure(tuition, None, StructureScope::Grade);
        let grade_id = grade.id;

        let resolved = resolve_structures(vec![grade, universal]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, grade_id);
    }

    #[test]
    fn categories_resolve_independently() {
        let tuition = Uuid::new_v4();
        let transport = Uuid::new_v4();
        let tuition_grade = structure(tuition, Some(Semester::First), StructureScope::Grade);
        let transport_universal = structure(transport, Some(Semester::First), StructureScope::Universal);
        let mut expected = vec![tuition_grade.id, transport_universal.id];
        expected.sort();

        let resolved = resolve_structures(vec![
            tuition_grade,
            structure(tuition, Some(Semester::Second), StructureScope::Universal),
            transport_universal,
            structure(tuition, None, StructureScope::Universal),
        ]);

        let ids: Vec<Uuid> = resolved.iter().map(|s| s.id).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn whole_year_universal_does_not_stack_on_grade_semester() {
        let tuition = Uuid::new_v4();
        let universal = structure(tuition, None, StructureScope::Universal);
        let grade = structure(tuition, Some(Semester::First), StructureScope::Grade);
        let grade_id = grade.id;

        let resolved = resolve_structures(vec![universal, grade]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, grade_id);
    }

    #[test]
    fn semesters_at_the_same_level_are_both_kept() {
        let tuition = Uuid::new_v4();

        let resolved = resolve_structures(vec![
            structure(tuition, Some(Semester::First), StructureScope::Universal),
            structure(tuition, Some(Semester::Second), StructureScope::Universal),
        ]);

        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn equal_scope_keeps_oldest() {
        let tuition = Uuid::new_v4();
        let mut older = structure(tuition, None, StructureScope::Universal);
        older.created_utc = Utc::now() - Duration::days(3);
        let older_id = older.id;
        let newer = structure(tuition, None, StructureScope::Universal);

        let resolved = resolve_structures(vec![newer, older]);

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].id, older_id);
    }
}
