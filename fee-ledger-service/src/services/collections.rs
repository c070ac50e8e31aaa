//! Collection processor: one payment, one receipt, every balance in one
//! transaction.

use crate::config::{ReceiptConfig, SchoolConfig};
use crate::models::{
    CollectionDetail, CollectionFilter, CollectionLineItem, CollectionReceipt, CollectionTarget,
    FeeCollection, LineType, NewCollection, ResolvedLineItem, StudentFeeAssignment,
};
use crate::services::assignments::{AssignmentEngine, AssignmentRepository};
use crate::services::directory::StudentDirectory;
use crate::services::error::{validate_amount, FeeError};
use crate::services::metrics::{COLLECTIONS_TOTAL, DB_QUERY_DURATION, RECEIPT_RETRIES_TOTAL};
use crate::services::receipts::ReceiptSequencer;
use crate::services::structures::{FeeStructureCatalog, FeeStructureRepository};
use crate::services::wallets::{DailyCollectionRepository, StaffWalletLedger};
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{Connection, PgConnection, PgPool};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const COLLECTION_COLUMNS: &str = "id, receipt_number, student_id, amount, payment_method, \
     collected_by, collection_date, reference_number, remarks, custody_status, verified_by, \
     verified_utc, withdrawn_utc, created_utc";

const RECEIPT_UNIQUE_CONSTRAINT: &str = "uq_fee_collections_receipt_number";

/// Row-level access to `fee_collections` and `collection_line_items`.
pub struct CollectionRepository;

impl CollectionRepository {
    pub async fn insert(
        conn: &mut PgConnection,
        collection_id: Uuid,
        receipt_number: &str,
        input: &NewCollection,
        collection_date: NaiveDate,
    ) -> Result<FeeCollection, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_collection"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO fee_collections (id, receipt_number, student_id, amount, payment_method,
                collected_by, collection_date, reference_number, remarks)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            COLLECTION_COLUMNS
        );

        let collection = sqlx::query_as::<_, FeeCollection>(&sql)
            .bind(collection_id)
            .bind(receipt_number)
            .bind(input.student_id)
            .bind(input.amount)
            .bind(input.payment_method.as_str())
            .bind(input.collected_by)
            .bind(collection_date)
            .bind(&input.reference_number)
            .bind(&input.remarks)
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("insert_collection"))?;

        timer.observe_duration();

        Ok(collection)
    }

    pub async fn insert_line(
        conn: &mut PgConnection,
        collection_id: Uuid,
        line: &PlannedLine,
    ) -> Result<CollectionLineItem, FeeError> {
        sqlx::query_as::<_, CollectionLineItem>(
            r#"
            INSERT INTO collection_line_items (id, collection_id, line_type, assignment_id,
                fee_structure_id, amount, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, collection_id, line_type, assignment_id, fee_structure_id, amount, description
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(collection_id)
        .bind(line.line_type.as_str())
        .bind(line.assignment_id)
        .bind(line.fee_structure_id)
        .bind(line.amount)
        .bind(&line.description)
        .fetch_one(&mut *conn)
        .await
        .map_err(FeeError::storage("insert_line_item"))
    }

    pub async fn get(
        conn: &mut PgConnection,
        collection_id: Uuid,
    ) -> Result<Option<FeeCollection>, FeeError> {
        let sql = format!("SELECT {} FROM fee_collections WHERE id = $1", COLLECTION_COLUMNS);

        sqlx::query_as::<_, FeeCollection>(&sql)
            .bind(collection_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("get_collection"))
    }

    pub async fn lock(
        conn: &mut PgConnection,
        collection_id: Uuid,
    ) -> Result<Option<FeeCollection>, FeeError> {
        let sql = format!(
            "SELECT {} FROM fee_collections WHERE id = $1 FOR UPDATE",
            COLLECTION_COLUMNS
        );

        sqlx::query_as::<_, FeeCollection>(&sql)
            .bind(collection_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(FeeError::storage("lock_collection"))
    }

    pub async fn resolved_lines(
        conn: &mut PgConnection,
        collection_id: Uuid,
    ) -> Result<Vec<ResolvedLineItem>, FeeError> {
        sqlx::query_as::<_, ResolvedLineItem>(
            r#"
            SELECT li.id, li.line_type, li.assignment_id, li.fee_structure_id, li.amount,
                   li.description, s.fee_category_id, s.semester, s.is_mandatory, s.scope,
                   a.total_amount AS assignment_total, a.pending_amount AS assignment_pending
            FROM collection_line_items li
            JOIN fee_structures s ON s.id = li.fee_structure_id
            JOIN student_fee_assignments a ON a.id = li.assignment_id
            WHERE li.collection_id = $1
            ORDER BY li.assignment_id
            "#,
        )
        .bind(collection_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(FeeError::storage("resolved_line_items"))
    }

    pub async fn list(
        conn: &mut PgConnection,
        filter: &CollectionFilter,
    ) -> Result<Vec<FeeCollection>, FeeError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_collections"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM fee_collections
            WHERE ($1::uuid IS NULL OR student_id = $1)
              AND ($2::uuid IS NULL OR collected_by = $2)
              AND ($3::date IS NULL OR collection_date >= $3)
              AND ($4::date IS NULL OR collection_date <= $4)
              AND ($5::text IS NULL OR custody_status = $5)
            ORDER BY created_utc DESC, receipt_number DESC
            LIMIT $6
            "#,
            COLLECTION_COLUMNS
        );

        let collections = sqlx::query_as::<_, FeeCollection>(&sql)
            .bind(filter.student_id)
            .bind(filter.collected_by)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.custody_status.map(|s| s.as_str()))
            .bind(filter.limit)
            .fetch_all(&mut *conn)
            .await
            .map_err(FeeError::storage("list_collections"))?;

        timer.observe_duration();

        Ok(collections)
    }

    pub async fn mark_verified(
        conn: &mut PgConnection,
        collection_id: Uuid,
        admin_id: Uuid,
    ) -> Result<FeeCollection, FeeError> {
        let sql = format!(
            r#"
            UPDATE fee_collections
            SET custody_status = 'verified', verified_by = $2, verified_utc = NOW()
            WHERE id = $1 AND custody_status = 'collected'
            RETURNING {}
            "#,
            COLLECTION_COLUMNS
        );

        sqlx::query_as::<_, FeeCollection>(&sql)
            .bind(collection_id)
            .bind(admin_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(FeeError::storage("mark_collection_verified"))
    }

    /// Hand over every verified collection of a staff member.
    pub async fn mark_withdrawn_for_staff(
        conn: &mut PgConnection,
        staff_id: Uuid,
    ) -> Result<u64, FeeError> {
        let result = sqlx::query(
            r#"
            UPDATE fee_collections
            SET custody_status = 'withdrawn', withdrawn_utc = NOW()
            WHERE collected_by = $1 AND custody_status = 'verified'
            "#,
        )
        .bind(staff_id)
        .execute(&mut *conn)
        .await
        .map_err(FeeError::storage("mark_collections_withdrawn"))?;

        Ok(result.rows_affected())
    }
}

/// A line item before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLine {
    pub line_type: LineType,
    pub assignment_id: Uuid,
    pub fee_structure_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    NothingDue,
    ExceedsDue { due: Decimal },
}

/// Split a payment across pending balances.
///
/// A payment that covers everything pays each balance in full. A smaller one
/// is split in proportion to the pending amounts, floored to cents, and the
/// leftover cents go to the lines with the largest remainders that still
/// have room. Shares always sum to `amount` and never exceed their pending
/// balance. Lines whose share is zero are dropped.
pub fn allocate(
    amount: Decimal,
    pending: &[(Uuid, Decimal)],
) -> Result<Vec<(Uuid, Decimal)>, AllocationError> {
    let due: Decimal = pending.iter().map(|(_, p)| *p).sum();
    if due <= Decimal::ZERO {
        return Err(AllocationError::NothingDue);
    }
    if amount > due {
        return Err(AllocationError::ExceedsDue { due });
    }
    if amount == due {
        return Ok(pending
            .iter()
            .filter(|(_, p)| *p > Decimal::ZERO)
            .copied()
            .collect());
    }

    let cent = Decimal::new(1, 2);
    let mut shares: Vec<Decimal> = Vec::with_capacity(pending.len());
    let mut remainders: Vec<(usize, Decimal)> = Vec::with_capacity(pending.len());

    for (i, (_, p)) in pending.iter().enumerate() {
        let exact = amount * *p / due;
        let floored = exact.round_dp_with_strategy(2, RoundingStrategy::ToZero);
        shares.push(floored);
        remainders.push((i, exact - floored));
    }

    let mut residual = amount - shares.iter().copied().sum::<Decimal>();

    // Largest remainder first, then input order.
    remainders.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    while residual > Decimal::ZERO {
        let mut progressed = false;
        for (i, _) in &remainders {
            if residual <= Decimal::ZERO {
                break;
            }
            if shares[*i] + cent <= pending[*i].1 {
                shares[*i] += cent;
                residual -= cent;
                progressed = true;
            }
        }
        if !progressed {
            // Only reachable with sub-cent pending balances.
            return Err(AllocationError::ExceedsDue { due });
        }
    }

    Ok(pending
        .iter()
        .zip(shares)
        .filter(|(_, share)| *share > Decimal::ZERO)
        .map(|((id, _), share)| (*id, share))
        .collect())
}

/// Seam between the assignment updates and the wallet update.
#[async_trait]
pub trait CollectionHook: Send + Sync {
    async fn before_wallet_update(&self, _collection_id: Uuid) -> Result<(), FeeError> {
        Ok(())
    }
}

pub struct NoopCollectionHook;

impl CollectionHook for NoopCollectionHook {}

/// What a selected assignment is being paid as.
struct Selection {
    assignment_id: Uuid,
    line_type: LineType,
    description: Option<String>,
}

#[derive(Clone)]
pub struct CollectionProcessor {
    pool: PgPool,
    directory: Arc<dyn StudentDirectory>,
    school: SchoolConfig,
    receipts: ReceiptConfig,
    hook: Arc<dyn CollectionHook>,
}

impl CollectionProcessor {
    pub fn new(
        pool: PgPool,
        directory: Arc<dyn StudentDirectory>,
        school: SchoolConfig,
        receipts: ReceiptConfig,
    ) -> Self {
        Self {
            pool,
            directory,
            school,
            receipts,
            hook: Arc::new(NoopCollectionHook),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CollectionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Record a payment.
    #[instrument(
        skip(self, input),
        fields(student_id = %input.student_id, staff_id = %input.collected_by, amount = %input.amount)
    )]
    pub async fn record(&self, input: NewCollection) -> Result<CollectionReceipt, FeeError> {
        if let Err(e) = validate_collection(&input) {
            COLLECTIONS_TOTAL.with_label_values(&["rejected"]).inc();
            return Err(e);
        }

        let result = self.record_validated(&input).await;

        match &result {
            Ok(receipt) => {
                COLLECTIONS_TOTAL.with_label_values(&["ok"]).inc();
                info!(
                    collection_id = %receipt.collection_id,
                    receipt_number = %receipt.receipt_number,
                    amount = %receipt.amount,
                    lines = receipt.line_items.len(),
                    "Fee collection recorded"
                );
            }
            Err(FeeError::TransactionFailure { .. }) | Err(FeeError::TransientFailure { .. }) => {
                COLLECTIONS_TOTAL.with_label_values(&["rolled_back"]).inc();
            }
            Err(_) => {
                COLLECTIONS_TOTAL.with_label_values(&["rejected"]).inc();
            }
        }

        result
    }

    async fn record_validated(&self, input: &NewCollection) -> Result<CollectionReceipt, FeeError> {
        let student = self
            .directory
            .student(input.student_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Student"))?;

        let academic_year_id = match &input.target {
            CollectionTarget::Direct { .. } => self.directory.current_academic_year().await?,
            CollectionTarget::Assignments { .. } => student.academic_year_id,
        };

        let today = self.school.today();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(FeeError::storage("begin_transaction"))?;

        match self
            .record_in(&mut tx, input, academic_year_id, today)
            .await
        {
            Ok(receipt) => {
                tx.commit()
                    .await
                    .map_err(FeeError::storage("commit_collection"))
                    .map_err(into_transaction_failure)?;
                Ok(receipt)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed; connection will be discarded");
                }
                Err(into_transaction_failure(e))
            }
        }
    }

    async fn record_in(
        &self,
        conn: &mut PgConnection,
        input: &NewCollection,
        academic_year_id: Uuid,
        today: NaiveDate,
    ) -> Result<CollectionReceipt, FeeError> {
        let selections = self
            .select_assignments(conn, input, academic_year_id, today)
            .await?;

        let mut ids: Vec<Uuid> = selections.iter().map(|s| s.assignment_id).collect();
        ids.sort();
        ids.dedup();

        let locked = AssignmentRepository::lock_many(conn, &ids).await?;
        check_selected(input.student_id, &ids, &locked)?;

        let pending: Vec<(Uuid, Decimal)> =
            locked.iter().map(|a| (a.id, a.pending_amount)).collect();
        let shares = allocate(input.amount, &pending).map_err(|e| match e {
            AllocationError::NothingDue => {
                FeeError::validation("assignment_id", "nothing is pending on the selected fees")
            }
            AllocationError::ExceedsDue { due } => FeeError::validation(
                "amount",
                format!("amount {} exceeds the total due {}", input.amount, due),
            ),
        })?;

        let collection_id = Uuid::new_v4();
        let collection = self
            .insert_with_receipt(conn, collection_id, input, today)
            .await?;

        let mut line_items = Vec::with_capacity(shares.len());
        for (assignment_id, share) in shares {
            let assignment = locked
                .iter()
                .find(|a| a.id == assignment_id)
                .ok_or_else(|| FeeError::not_found("Fee assignment"))?;
            let selection = selections
                .iter()
                .find(|s| s.assignment_id == assignment_id)
                .ok_or_else(|| FeeError::not_found("Fee assignment"))?;

            let line = PlannedLine {
                line_type: selection.line_type,
                assignment_id,
                fee_structure_id: assignment.fee_structure_id,
                amount: share,
                description: selection.description.clone(),
            };
            line_items.push(CollectionRepository::insert_line(conn, collection_id, &line).await?);
            AssignmentRepository::apply_payment(conn, assignment_id, share, today).await?;
        }

        self.hook.before_wallet_update(collection_id).await?;

        let entry = StaffWalletLedger::add_collection(
            conn,
            input.collected_by,
            input.amount,
            collection_id,
            &collection.receipt_number,
        )
        .await?;
        DailyCollectionRepository::record_collection(conn, input.collected_by, today, input.amount)
            .await?;

        Ok(CollectionReceipt {
            collection_id,
            receipt_number: collection.receipt_number,
            amount: collection.amount,
            collection_date: collection.collection_date,
            wallet_balance: entry.balance_after,
            line_items,
        })
    }

    /// Materialize whatever the payment targets and return the assignments
    /// it will be applied to.
    async fn select_assignments(
        &self,
        conn: &mut PgConnection,
        input: &NewCollection,
        academic_year_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Selection>, FeeError> {
        let mut selections = Vec::new();

        match &input.target {
            CollectionTarget::Direct {
                fee_category_id,
                description,
            } => {
                let structure = FeeStructureCatalog::create_direct(
                    conn,
                    academic_year_id,
                    *fee_category_id,
                    description,
                    input.amount,
                    today,
                    input.collected_by,
                )
                .await?;
                let outcome = AssignmentEngine::assign_in(
                    conn,
                    input.student_id,
                    &structure,
                    today,
                    "collection",
                )
                .await?;
                selections.push(Selection {
                    assignment_id: outcome.assignment_id(),
                    line_type: LineType::DirectPayment,
                    description: Some(description.clone()),
                });
            }
            CollectionTarget::Assignments {
                assignment_id,
                optional_fee_structure_ids,
            } => {
                if let Some(id) = assignment_id {
                    selections.push(Selection {
                        assignment_id: *id,
                        line_type: LineType::Assignment,
                        description: None,
                    });
                }

                for structure_id in optional_fee_structure_ids {
                    let structure = FeeStructureRepository::get(conn, *structure_id)
                        .await?
                        .ok_or_else(|| FeeError::not_found("Fee structure"))?;
                    if !structure.is_active() {
                        return Err(FeeError::validation(
                            "optional_fee_structure_ids",
                            format!("fee structure {} is not active", structure_id),
                        ));
                    }
                    if structure.academic_year_id != academic_year_id {
                        return Err(FeeError::validation(
                            "optional_fee_structure_ids",
                            format!(
                                "fee structure {} belongs to another academic year",
                                structure_id
                            ),
                        ));
                    }

                    let outcome = AssignmentEngine::assign_in(
                        conn,
                        input.student_id,
                        &structure,
                        today,
                        "collection",
                    )
                    .await?;
                    if selections
                        .iter()
                        .all(|s| s.assignment_id != outcome.assignment_id())
                    {
                        selections.push(Selection {
                            assignment_id: outcome.assignment_id(),
                            line_type: LineType::OptionalFee,
                            description: structure.description.clone(),
                        });
                    }
                }
            }
        }

        Ok(selections)
    }

    /// Draw a receipt number and insert the collection row, re-drawing when
    /// another writer already holds the number.
    async fn insert_with_receipt(
        &self,
        conn: &mut PgConnection,
        collection_id: Uuid,
        input: &NewCollection,
        today: NaiveDate,
    ) -> Result<FeeCollection, FeeError> {
        let mut receipt_number = ReceiptSequencer::next(conn, today).await?;
        let mut attempt = 1;

        loop {
            let mut savepoint = conn
                .begin()
                .await
                .map_err(FeeError::storage("receipt_savepoint"))?;

            match CollectionRepository::insert(
                &mut savepoint,
                collection_id,
                &receipt_number,
                input,
                today,
            )
            .await
            {
                Ok(collection) => {
                    savepoint
                        .commit()
                        .await
                        .map_err(FeeError::storage("receipt_savepoint"))?;
                    return Ok(collection);
                }
                Err(e) if e.is_unique_violation_on(RECEIPT_UNIQUE_CONSTRAINT) => {
                    savepoint
                        .rollback()
                        .await
                        .map_err(FeeError::storage("receipt_savepoint"))?;

                    let conflict = FeeError::ReceiptAllocationConflict {
                        receipt_number: receipt_number.clone(),
                    };

                    if attempt >= self.receipts.max_attempts {
                        RECEIPT_RETRIES_TOTAL.with_label_values(&["exhausted"]).inc();
                        let correlation_id = Uuid::new_v4();
                        error!(
                            correlation_id = %correlation_id,
                            attempts = attempt,
                            error = %conflict,
                            "Receipt allocation retries exhausted"
                        );
                        return Err(FeeError::TransientFailure { correlation_id });
                    }

                    RECEIPT_RETRIES_TOTAL.with_label_values(&["retried"]).inc();
                    warn!(attempt = attempt, error = %conflict, "Receipt number collision, retrying");

                    attempt += 1;
                    receipt_number = ReceiptSequencer::next(conn, today).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_collection(&self, collection_id: Uuid) -> Result<CollectionDetail, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        let collection = CollectionRepository::get(&mut conn, collection_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Fee collection"))?;
        let line_items = CollectionRepository::resolved_lines(&mut conn, collection_id).await?;

        Ok(CollectionDetail {
            collection,
            line_items,
        })
    }

    pub async fn list_collections(
        &self,
        filter: &CollectionFilter,
    ) -> Result<Vec<FeeCollection>, FeeError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(FeeError::storage("acquire"))?;

        CollectionRepository::list(&mut conn, filter).await
    }
}

/// Checks that need no database.
pub fn validate_collection(input: &NewCollection) -> Result<(), FeeError> {
    validate_amount(input.amount)?;
    if input.payment_method.requires_reference()
        && input
            .reference_number
            .as_deref()
            .map_or(true, |r| r.trim().is_empty())
    {
        return Err(FeeError::validation(
            "reference_number",
            format!("required for {} payments", input.payment_method),
        ));
    }

    match &input.target {
        CollectionTarget::Assignments {
            assignment_id,
            optional_fee_structure_ids,
        } => {
            if assignment_id.is_none() && optional_fee_structure_ids.is_empty() {
                return Err(FeeError::validation(
                    "assignment_id",
                    "select an assignment or at least one optional fee",
                ));
            }
        }
        CollectionTarget::Direct { description, .. } => {
            if description.trim().is_empty() {
                return Err(FeeError::validation(
                    "description",
                    "required for a direct payment",
                ));
            }
        }
    }

    Ok(())
}

/// Every requested assignment was found, is the student's, and still owes
/// something.
fn check_selected(
    student_id: Uuid,
    requested: &[Uuid],
    locked: &[StudentFeeAssignment],
) -> Result<(), FeeError> {
    for id in requested {
        let assignment = locked
            .iter()
            .find(|a| a.id == *id)
            .ok_or_else(|| FeeError::not_found(format!("Fee assignment {}", id)))?;

        if assignment.student_id != student_id {
            return Err(FeeError::validation(
                "assignment_id",
                format!("assignment {} belongs to another student", id),
            ));
        }
        if assignment.is_cancelled() {
            return Err(FeeError::validation(
                "assignment_id",
                format!("assignment {} is cancelled", id),
            ));
        }
        if assignment.pending_amount <= Decimal::ZERO {
            return Err(FeeError::validation(
                "assignment_id",
                format!("assignment {} is already fully paid", id),
            ));
        }
    }
    Ok(())
}

/// Storage errors inside the collection transaction surface as one rolled
/// back transaction with a correlation id. Business errors pass through.
fn into_transaction_failure(err: FeeError) -> FeeError {
    match err {
        FeeError::Storage { operation, source } => {
            let correlation_id = Uuid::new_v4();
            error!(
                correlation_id = %correlation_id,
                operation = operation,
                error = %source,
                "Collection transaction rolled back"
            );
            FeeError::TransactionFailure { correlation_id }
        }
        other => other,
    }
}
