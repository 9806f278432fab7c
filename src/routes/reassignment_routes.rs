use axum::{
    extract::{Path, Query, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};

use crate::controllers::reassignment_controller::ReassignmentController;
use crate::dto::api_response::ApiResponse;
use crate::dto::reassignment_dto::{
    RecentRecordsQuery, StageDriversRequest, StageResponse, StageRidersRequest, StageRoutesRequest,
};
use crate::middleware::auth::{auth_middleware, fleet_operator_middleware};
use crate::models::{Actor, AuditRecord, OperationId};
use crate::services::commit_coordinator::{CommitOutcome, RollbackOutcome};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_reassignment_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(recent_records))
        .route("/riders/stage", post(stage_riders))
        .route("/drivers/stage", post(stage_drivers))
        .route("/routes/stage", post(stage_routes))
        .route("/:operation_id", get(get_record).delete(cancel_plan))
        .route("/:operation_id/confirm", post(confirm_plan))
        .route("/:operation_id/rollback", post(rollback_operation))
        .route_layer(middleware::from_fn(fleet_operator_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

fn controller(state: &AppState) -> ReassignmentController {
    ReassignmentController::new(state.reassignments.clone())
}

async fn stage_riders(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<StageRidersRequest>,
) -> Result<Json<ApiResponse<StageResponse>>, AppError> {
    let response = controller(&state).stage_riders(&actor, request).await?;
    Ok(Json(response))
}

async fn stage_drivers(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<StageDriversRequest>,
) -> Result<Json<ApiResponse<StageResponse>>, AppError> {
    let response = controller(&state).stage_drivers(&actor, request).await?;
    Ok(Json(response))
}

async fn stage_routes(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<StageRoutesRequest>,
) -> Result<Json<ApiResponse<StageResponse>>, AppError> {
    let response = controller(&state).stage_routes(&actor, request).await?;
    Ok(Json(response))
}

async fn confirm_plan(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(operation_id): Path<OperationId>,
) -> Result<Json<ApiResponse<CommitOutcome>>, AppError> {
    let response = controller(&state).confirm(&actor, operation_id).await?;
    Ok(Json(response))
}

async fn rollback_operation(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(operation_id): Path<OperationId>,
) -> Result<Json<ApiResponse<RollbackOutcome>>, AppError> {
    let response = controller(&state).rollback(&actor, operation_id).await?;
    Ok(Json(response))
}

async fn cancel_plan(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(operation_id): Path<OperationId>,
) -> Result<Json<ApiResponse<OperationId>>, AppError> {
    let response = controller(&state).cancel(&actor, operation_id).await?;
    Ok(Json(response))
}

async fn get_record(
    State(state): State<AppState>,
    Path(operation_id): Path<OperationId>,
) -> Result<Json<ApiResponse<AuditRecord>>, AppError> {
    let response = controller(&state).get_record(operation_id).await?;
    Ok(Json(response))
}

async fn recent_records(
    State(state): State<AppState>,
    Query(query): Query<RecentRecordsQuery>,
) -> Result<Json<ApiResponse<Vec<AuditRecord>>>, AppError> {
    let response = controller(&state).recent(query).await?;
    Ok(Json(response))
}
