//! Administrator custody workflow: verify collections, withdraw cash.

use crate::models::{VerificationOutcome, Withdrawal};
use crate::services::collections::CollectionRepository;
use crate::services::error::FeeError;
use crate::services::metrics::WITHDRAWALS_TOTAL;
use crate::services::wallets::{DailyCollectionRepository, StaffWalletLedger};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{error, info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct VerificationWorkflow {
    pool: PgPool,
}

impl VerificationWorkflow {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Mark a collection verified and move its amount to pending transfer.
    /// The wallet balance is not touched.
    #[instrument(skip(self), fields(collection_id = %collection_id, admin_id = %admin_id))]
    pub async fn verify_collection(
        &self,
        collection_id: Uuid,
        admin_id: Uuid,
    ) -> Result<VerificationOutcome, FeeError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(FeeError::storage("begin_transaction"))?;

        let collection = CollectionRepository::lock(&mut tx, collection_id)
            .await?
            .ok_or_else(|| FeeError::not_found("Fee collection"))?;

        if collection.custody_status.is_verified() {
            info!(
                collection_id = %collection_id,
                custody_status = %collection.custody_status,
                "Collection already verified"
            );
            return Ok(VerificationOutcome {
                collection,
                already_verified: true,
            });
        }

        let verified = CollectionRepository::mark_verified(&mut tx, collection_id, admin_id).await?;

        let moved = DailyCollectionRepository::mark_verified(
            &mut tx,
            verified.collected_by,
            verified.collection_date,
            verified.amount,
        )
        .await?;
        if !moved {
            let correlation_id = Uuid::new_v4();
            error!(
                correlation_id = %correlation_id,
                collection_id = %collection_id,
                staff_id = %verified.collected_by,
                "Daily aggregate does not cover the collection being verified"
            );
            return Err(FeeError::TransactionFailure { correlation_id });
        }

        tx.commit()
            .await
            .map_err(FeeError::storage("commit_verification"))?;

        info!(
            collection_id = %collection_id,
            receipt_number = %verified.receipt_number,
            "Collection verified"
        );

        Ok(VerificationOutcome {
            collection: verified,
            already_verified: false,
        })
    }

    #[instrument(skip(self, reason), fields(staff_id = %staff_id, amount = %amount))]
    pub async fn withdraw(
        &self,
        staff_id: Uuid,
        amount: Decimal,
        admin_id: Uuid,
        reason: Option<&str>,
    ) -> Result<Withdrawal, FeeError> {
        let result = async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(FeeError::storage("begin_transaction"))?;
            let withdrawal =
                StaffWalletLedger::process_withdrawal(&mut tx, staff_id, amount, admin_id, reason)
                    .await?;
            tx.commit()
                .await
                .map_err(FeeError::storage("commit_withdrawal"))?;
            Ok::<_, FeeError>(withdrawal)
        }
        .await;

        record_withdrawal_metric("partial", &result);
        result
    }

    #[instrument(skip(self), fields(staff_id = %staff_id))]
    pub async fn clear(&self, staff_id: Uuid, admin_id: Uuid) -> Result<Withdrawal, FeeError> {
        let result = async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(FeeError::storage("begin_transaction"))?;
            let withdrawal = StaffWalletLedger::clear_balance(&mut tx, staff_id, admin_id).await?;
            tx.commit()
                .await
                .map_err(FeeError::storage("commit_clear"))?;
            Ok::<_, FeeError>(withdrawal)
        }
        .await;

        record_withdrawal_metric("clear", &result);
        result
    }
}

fn record_withdrawal_metric(kind: &str, result: &Result<Withdrawal, FeeError>) {
    let status = match result {
        Ok(_) => "ok",
        Err(FeeError::InsufficientBalance { .. }) => "insufficient",
        Err(_) => "error",
    };
    WITHDRAWALS_TOTAL.with_label_values(&[kind, status]).inc();
}
