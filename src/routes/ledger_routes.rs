use axum::{extract::State, middleware, routing::get, Json, Router};

use crate::controllers::reassignment_controller::ReassignmentController;
use crate::dto::api_response::ApiResponse;
use crate::middleware::auth::{auth_middleware, fleet_operator_middleware};
use crate::services::capacity_ledger::CapacityDrift;
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_ledger_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/drift", get(capacity_drift))
        .route_layer(middleware::from_fn(fleet_operator_middleware))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

async fn capacity_drift(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<CapacityDrift>>>, AppError> {
    let controller = ReassignmentController::new(state.reassignments.clone());
    let response = controller.drift().await?;
    Ok(Json(response))
}
