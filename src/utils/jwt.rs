//! Utilidades JWT
//!
//! Tokens HS256 que llevan el actor (`sub`) y su rol.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{
    config::environment::EnvironmentConfig,
    models::{Actor, Role},
    utils::errors::AppError,
};

/// Duración por defecto de un token (8 horas)
pub const DEFAULT_EXPIRATION_SECS: u64 = 8 * 3600;

/// Claims del JWT
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,  // actor id
    pub role: String, // admin | moderator | driver
    pub exp: usize,
    pub iat: usize,
}

/// Configuración de JWT
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration: u64,
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expiration: DEFAULT_EXPIRATION_SECS,
        }
    }
}

impl From<&EnvironmentConfig> for JwtConfig {
    fn from(config: &EnvironmentConfig) -> Self {
        Self::new(config.jwt_secret.clone())
    }
}

/// Generar JWT token para un actor
pub fn generate_token(actor: &Actor, config: &JwtConfig) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let expires_at = now + chrono::Duration::seconds(config.expiration as i64);

    let claims = JwtClaims {
        sub: actor.id.clone(),
        role: actor.role.as_str().to_string(),
        exp: expires_at.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(config.secret.as_ref()))
        .map_err(|e| AppError::Internal(format!("Error generando token: {}", e)))
}

/// Verificar un token y obtener su actor
pub fn verify_token(token: &str, config: &JwtConfig) -> Result<Actor, AppError> {
    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(config.secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Token inválido: {}", e)))?;

    let claims = token_data.claims;
    let role = Role::from_str(&claims.role)
        .ok_or_else(|| AppError::Unauthorized(format!("Rol desconocido: {}", claims.role)))?;
    if claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized("Token sin actor".to_string()));
    }
    Ok(Actor::new(claims.sub, role))
}

/// Extraer token del header Authorization
pub fn extract_token_from_header(auth_header: &str) -> Result<&str, AppError> {
    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Header Authorization debe comenzar con 'Bearer '".to_string()))?;
    if token.is_empty() {
        return Err(AppError::Unauthorized("Token no puede estar vacío".to_string()));
    }
    Ok(token)
}
