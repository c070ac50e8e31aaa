//! Staff cash custody endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{WalletQuery, WithdrawRequest},
    middleware::CallerIdentity,
    models::{WalletOverview, WalletStatistics, Withdrawal},
    startup::AppState,
};

pub async fn statistics(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<WalletStatistics>, AppError> {
    caller.require_admin()?;

    let stats = state
        .wallets
        .statistics(
            state.config.school.today(),
            state.config.statistics.top_collectors,
        )
        .await?;
    Ok(Json(stats))
}

/// Wallet with its most recent ledger entries.
pub async fn get_wallet(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(staff_id): Path<Uuid>,
    Query(query): Query<WalletQuery>,
) -> Result<Json<WalletOverview>, AppError> {
    caller.require_admin_or_self(staff_id)?;

    let overview = state.wallets.get_wallet(staff_id, query.limit()).await?;
    Ok(Json(overview))
}

pub async fn withdraw(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(staff_id): Path<Uuid>,
    Json(payload): Json<WithdrawRequest>,
) -> Result<Json<Withdrawal>, AppError> {
    caller.require_admin()?;
    payload.validate()?;

    if payload.amount <= Decimal::ZERO {
        return Err(AppError::InvalidField {
            field: "amount".to_string(),
            message: "amount must be greater than zero".to_string(),
        });
    }

    tracing::info!(
        staff_id = %staff_id,
        amount = %payload.amount,
        admin_id = %caller.user_id,
        "Withdrawing from staff wallet"
    );

    let withdrawal = state
        .verification
        .withdraw(
            staff_id,
            payload.amount,
            caller.user_id,
            payload.reason.as_deref(),
        )
        .await?;
    Ok(Json(withdrawal))
}

/// Hand over everything the staff member holds.
pub async fn clear(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(staff_id): Path<Uuid>,
) -> Result<Json<Withdrawal>, AppError> {
    caller.require_admin()?;

    tracing::info!(staff_id = %staff_id, admin_id = %caller.user_id, "Clearing staff wallet");

    let withdrawal = state.verification.clear(staff_id, caller.user_id).await?;
    Ok(Json(withdrawal))
}
