//! Motor de reasignación de flota de lanzaderas
//!
//! Prepara, confirma y revierte reasignaciones de pasajeros, conductores y
//! rutas con un commit transaccional en dos fases (registro de auditoría +
//! transacción primaria), y gestiona los swaps temporales de conductores.

pub mod cache;
pub mod config;
pub mod controllers;
pub mod database;
pub mod dto;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

use axum::{extract::State, response::Json, routing::get, Router};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use middleware::cors::cors_middleware;
use state::AppState;

/// Router completo de la API
pub fn app(state: AppState) -> Router {
    let cors = cors_middleware(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health))
        .nest(
            "/api/reassignments",
            routes::reassignment_routes::create_reassignment_router(&state),
        )
        .nest("/api/ledger", routes::ledger_routes::create_ledger_router(&state))
        .nest("/api/swaps", routes::swap_routes::create_swap_router(&state))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state)
}

/// Health check
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "shuttle_fleet",
        "environment": state.config.environment,
        "store_backend": state.config.store_backend.as_str(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
