use axum::{
    extract::{Path, State},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;

use crate::controllers::swap_controller::SwapController;
use crate::dto::api_response::ApiResponse;
use crate::dto::swap_dto::{
    EndSwapRequest, EndSwapResult, ExpireResult, ProposeSwapRequest, RespondSwapRequest, SwapResponseResult,
};
use crate::middleware::auth::{auth_middleware, fleet_operator_middleware};
use crate::models::{Actor, SwapRequest};
use crate::state::AppState;
use crate::utils::errors::AppError;

pub fn create_swap_router(state: &AppState) -> Router<AppState> {
    // Conductores incluidos: proponer, responder y consultar
    let drivers = Router::new()
        .route("/", post(propose_swap))
        .route("/:swap_id", get(get_swap))
        .route("/:swap_id/respond", post(respond_swap));

    let operators = Router::new()
        .route("/:swap_id/expire", post(expire_swap))
        .route("/:swap_id/end", post(end_swap))
        .route_layer(middleware::from_fn(fleet_operator_middleware));

    drivers
        .merge(operators)
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
}

fn controller(state: &AppState) -> SwapController {
    SwapController::new(state.swaps.clone())
}

async fn propose_swap(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<ProposeSwapRequest>,
) -> Result<Json<ApiResponse<SwapRequest>>, AppError> {
    let response = controller(&state).propose(&actor, request).await?;
    Ok(Json(response))
}

async fn get_swap(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(swap_id): Path<Uuid>,
) -> Result<Json<ApiResponse<SwapRequest>>, AppError> {
    let response = controller(&state).get(&actor, swap_id).await?;
    Ok(Json(response))
}

async fn respond_swap(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(swap_id): Path<Uuid>,
    Json(request): Json<RespondSwapRequest>,
) -> Result<Json<ApiResponse<SwapResponseResult>>, AppError> {
    let response = controller(&state).respond(&actor, swap_id, request).await?;
    Ok(Json(response))
}

async fn expire_swap(
    State(state): State<AppState>,
    Path(swap_id): Path<Uuid>,
) -> Result<Json<ApiResponse<ExpireResult>>, AppError> {
    let response = controller(&state).expire(swap_id).await?;
    Ok(Json(response))
}

async fn end_swap(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(swap_id): Path<Uuid>,
    request: Option<Json<EndSwapRequest>>,
) -> Result<Json<ApiResponse<EndSwapResult>>, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let response = controller(&state).end(&actor, swap_id, request).await?;
    Ok(Json(response))
}
