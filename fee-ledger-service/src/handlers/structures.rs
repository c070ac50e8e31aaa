//! Fee structure catalog endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{CreateStructureRequest, DeactivateStructureRequest, StructureListQuery},
    middleware::CallerIdentity,
    models::FeeStructure,
    services::StructureCreated,
    startup::AppState,
};

/// Create a structure and fan it out to the students it applies to.
pub async fn create_structure(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Json(payload): Json<CreateStructureRequest>,
) -> Result<(StatusCode, Json<StructureCreated>), AppError> {
    caller.require_admin()?;
    payload.validate()?;

    tracing::info!(
        academic_year_id = %payload.academic_year_id,
        fee_category_id = %payload.fee_category_id,
        amount = %payload.amount,
        admin_id = %caller.user_id,
        "Creating fee structure"
    );

    let input = payload.into_new(caller.user_id);
    let created = state.structures.create_structure(&input).await?;

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_structures(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(query): Query<StructureListQuery>,
) -> Result<Json<Vec<FeeStructure>>, AppError> {
    caller.require_staff()?;

    let structures = state.structures.list_structures(&query.into()).await?;
    Ok(Json(structures))
}

pub async fn get_structure(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(structure_id): Path<Uuid>,
) -> Result<Json<FeeStructure>, AppError> {
    caller.require_staff()?;

    let structure = state.structures.get_structure(structure_id).await?;
    Ok(Json(structure))
}

/// Retire a structure. Assignments already made from it are kept.
pub async fn deactivate_structure(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(structure_id): Path<Uuid>,
    payload: Option<Json<DeactivateStructureRequest>>,
) -> Result<Json<FeeStructure>, AppError> {
    caller.require_admin()?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    tracing::info!(
        structure_id = %structure_id,
        lifecycle = %payload.lifecycle,
        admin_id = %caller.user_id,
        "Retiring fee structure"
    );

    let structure = state
        .structures
        .deactivate_structure(structure_id, payload.lifecycle)
        .await?;
    Ok(Json(structure))
}
