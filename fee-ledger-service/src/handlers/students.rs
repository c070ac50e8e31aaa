//! Per-student fee views and assignment triggers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dtos::{AssignStructureRequest, AssignStructureResponse, AssignmentQuery, GradeChangeRequest},
    middleware::CallerIdentity,
    models::{AssignmentBatch, FeeSummary, StudentFeeAssignment},
    startup::AppState,
};

pub async fn fee_summary(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(student_id): Path<Uuid>,
) -> Result<Json<FeeSummary>, AppError> {
    let summary = state.engine.fee_summary(student_id).await?;
    Ok(Json(summary))
}

pub async fn list_assignments(
    State(state): State<AppState>,
    _caller: CallerIdentity,
    Path(student_id): Path<Uuid>,
    Query(query): Query<AssignmentQuery>,
) -> Result<Json<Vec<StudentFeeAssignment>>, AppError> {
    let assignments = state
        .engine
        .list_assignments(student_id, query.include_cancelled)
        .await?;
    Ok(Json(assignments))
}

/// Assign a single structure. Repeating the call returns the same
/// assignment with `created: false`.
pub async fn assign_structure(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(student_id): Path<Uuid>,
    Json(payload): Json<AssignStructureRequest>,
) -> Result<(StatusCode, Json<AssignStructureResponse>), AppError> {
    caller.require_staff()?;
    payload.validate()?;

    let outcome = state
        .engine
        .assign_structure(student_id, payload.fee_structure_id)
        .await?;

    let status = if outcome.was_created() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.into())))
}

pub async fn enroll(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(student_id): Path<Uuid>,
) -> Result<Json<AssignmentBatch>, AppError> {
    caller.require_staff()?;

    tracing::info!(student_id = %student_id, "Running enrollment assignment");

    let batch = state.engine.enroll(student_id).await?;
    Ok(Json(batch))
}

pub async fn grade_change(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(student_id): Path<Uuid>,
    Json(payload): Json<GradeChangeRequest>,
) -> Result<Json<AssignmentBatch>, AppError> {
    caller.require_staff()?;
    payload.validate()?;

    tracing::info!(
        student_id = %student_id,
        new_grade_id = %payload.new_grade_id,
        "Reassigning fees after grade change"
    );

    let batch = state
        .engine
        .reassign_on_grade_change(student_id, payload.new_grade_id, payload.new_division_id)
        .await?;
    Ok(Json(batch))
}
