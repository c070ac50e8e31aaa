//! Domain errors for the fee ledger.

use crate::services::metrics::ERRORS_TOTAL;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum FeeError {
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("Validation error: {0}")]
    InvalidInput(#[from] validator::ValidationErrors),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("An active fee structure already covers this grade and category ({existing_id})")]
    DuplicateStructure { existing_id: Uuid },

    #[error("Insufficient wallet balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    /// Another writer already holds this receipt number. Retried internally.
    #[error("Receipt number {receipt_number} already issued")]
    ReceiptAllocationConflict { receipt_number: String },

    #[error("Transient failure ({correlation_id}), retry the request")]
    TransientFailure { correlation_id: Uuid },

    /// Storage failure inside the atomic collection transaction. Everything
    /// was rolled back.
    #[error("Collection transaction failed ({correlation_id})")]
    TransactionFailure { correlation_id: Uuid },

    #[error("Storage error during {operation}: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// Largest amount a `NUMERIC(12, 2)` money column holds.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_327, 232, 0, false, 2);

/// Positive, whole cents and small enough to store.
pub fn validate_amount(amount: Decimal) -> Result<(), FeeError> {
    if amount <= Decimal::ZERO {
        return Err(FeeError::validation("amount", "must be greater than zero"));
    }
    if amount.scale() > 2 {
        return Err(FeeError::validation("amount", "at most two decimal places"));
    }
    if amount > MAX_AMOUNT {
        return Err(FeeError::validation(
            "amount",
            format!("must not exceed {}", MAX_AMOUNT),
        ));
    }
    Ok(())
}

impl FeeError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        FeeError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        FeeError::NotFound(what.into())
    }

    /// Returns a closure for `map_err` that tags a sqlx error with the
    /// statement that was being run.
    pub fn storage(operation: &'static str) -> impl FnOnce(sqlx::Error) -> FeeError {
        move |source| FeeError::Storage { operation, source }
    }

    /// True when the underlying database error is a unique violation on the
    /// named constraint.
    pub fn is_unique_violation_on(&self, constraint: &str) -> bool {
        match self {
            FeeError::Storage {
                source: sqlx::Error::Database(db_err),
                ..
            } => db_err.is_unique_violation() && db_err.constraint() == Some(constraint),
            _ => false,
        }
    }

    /// Label used for the errors counter.
    pub fn kind(&self) -> &'static str {
        match self {
            FeeError::Validation { .. } | FeeError::InvalidInput(_) => "validation_error",
            FeeError::NotFound(_) => "not_found",
            FeeError::Forbidden(_) => "forbidden",
            FeeError::DuplicateStructure { .. } => "duplicate_structure",
            FeeError::InsufficientBalance { .. } => "insufficient_balance",
            FeeError::ReceiptAllocationConflict { .. } => "receipt_allocation_conflict",
            FeeError::TransientFailure { .. } => "transient_failure",
            FeeError::TransactionFailure { .. } => "transaction_failure",
            FeeError::Storage { .. } => "db_error",
        }
    }
}

impl From<FeeError> for AppError {
    fn from(err: FeeError) -> Self {
        ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();

        match err {
            FeeError::Validation { field, message } => AppError::InvalidField { field, message },
            FeeError::InvalidInput(errors) => AppError::ValidationError(errors),
            FeeError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            FeeError::Forbidden(reason) => AppError::Forbidden(anyhow::anyhow!(reason)),
            e @ FeeError::DuplicateStructure { existing_id } => AppError::Conflict {
                code: "duplicate_structure",
                message: e.to_string(),
                details: Some(serde_json::json!({ "existing_id": existing_id })),
            },
            e @ FeeError::InsufficientBalance {
                available,
                requested,
            } => AppError::Conflict {
                code: "insufficient_balance",
                message: e.to_string(),
                details: Some(serde_json::json!({
                    "available": available,
                    "requested": requested,
                })),
            },
            FeeError::ReceiptAllocationConflict { .. } => AppError::ServiceUnavailable {
                correlation_id: None,
                retry_after: Some(1),
            },
            FeeError::TransientFailure { correlation_id } => AppError::ServiceUnavailable {
                correlation_id: Some(correlation_id),
                retry_after: Some(1),
            },
            FeeError::TransactionFailure { correlation_id } => AppError::InternalError {
                correlation_id,
                cause: anyhow::anyhow!("collection transaction rolled back"),
            },
            FeeError::Storage { operation, source } => {
                let correlation_id = Uuid::new_v4();
                tracing::error!(
                    correlation_id = %correlation_id,
                    operation = operation,
                    error = %source,
                    "Storage error"
                );
                AppError::InternalError {
                    correlation_id,
                    cause: anyhow::Error::new(source).context(operation),
                }
            }
        }
    }
}
