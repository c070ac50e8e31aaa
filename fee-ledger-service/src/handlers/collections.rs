//! Fee collection and verification endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CollectionListQuery, CreateCollectionRequest},
    middleware::CallerIdentity,
    models::{CollectionDetail, CollectionReceipt, FeeCollection, VerificationOutcome},
    startup::AppState,
};

pub const COLLECT_PERMISSION: &str = "fees.collect";

/// Record a payment and return its receipt.
pub async fn create_collection(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(payload): Json<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<CollectionReceipt>), AppError> {
    caller.require_staff_permission(COLLECT_PERMISSION)?;
    payload.validate()?;

    if payload.has_mixed_target() {
        return Err(AppError::InvalidField {
            field: "direct_payment".to_string(),
            message: "A direct payment cannot be combined with assignment selections".to_string(),
        });
    }

    let collected_by = payload.collected_by_staff_id.unwrap_or(caller.user_id);
    if collected_by != caller.user_id {
        caller.require_admin()?;
    }

    tracing::info!(
        student_id = %payload.student_id,
        staff_id = %collected_by,
        amount = %payload.amount,
        payment_method = %payload.payment_method,
        "Recording fee collection"
    );

    let receipt = state
        .collections
        .record(payload.into_new(collected_by))
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Newest first. Staff only see their own collections.
pub async fn list_collections(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(mut query): Query<CollectionListQuery>,
) -> Result<Json<Vec<FeeCollection>>, AppError> {
    caller.require_staff()?;
    if !caller.is_admin() {
        query.staff_id = Some(caller.user_id);
    }

    let collections = state.collections.list_collections(&query.into()).await?;
    Ok(Json(collections))
}

/// Staff may only read collections they recorded.
pub async fn get_collection(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(collection_id): Path<Uuid>,
) -> Result<Json<CollectionDetail>, AppError> {
    caller.require_staff()?;

    let detail = state.collections.get_collection(collection_id).await?;
    caller.require_admin_or_self(detail.collection.collected_by)?;
    Ok(Json(detail))
}

/// Confirm the cash behind a collection reached the office.
pub async fn verify_collection(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(collection_id): Path<Uuid>,
) -> Result<Json<VerificationOutcome>, AppError> {
    caller.require_admin()?;

    let outcome = state
        .verification
        .verify_collection(collection_id, caller.user_id)
        .await?;
    Ok(Json(outcome))
}
