//! Middleware de autenticación JWT
//!
//! Decodifica el token `Bearer` en un `Actor` y lo inyecta en las
//! extensions de la request. Los permisos por rol se comprueban aparte.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
    Extension,
};
use tracing::debug;

use crate::{
    models::Actor,
    state::AppState,
    utils::{
        errors::{forbidden_error, AppError},
        jwt::{extract_token_from_header, verify_token},
    },
};

/// Middleware de autenticación JWT
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Token de autorización requerido".to_string()))?;

    let token = extract_token_from_header(auth_header)?;
    let actor = verify_token(token, &state.jwt)?;
    debug!("🔑 Actor autenticado: {} ({})", actor.id, actor.role.as_str());

    request.extensions_mut().insert(actor);
    Ok(next.run(request).await)
}

/// Solo admin y moderator operan la flota
pub async fn fleet_operator_middleware(
    Extension(actor): Extension<Actor>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !actor.role.can_operate_fleet() {
        return Err(forbidden_error(
            "operate fleet",
            "se requiere rol admin o moderator",
        ));
    }

    Ok(next.run(request).await)
}
