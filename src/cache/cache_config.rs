//! Configuración de Redis
//!
//! Redis guarda los registros de auditoría de las operaciones de
//! reasignación; no se usa como cache de lectura.

use serde::{Deserialize, Serialize};

/// Configuración del cliente Redis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub redis_url: String,
    /// Prefijo de todas las claves del servicio
    pub key_prefix: String,
    /// Registros conservados por tipo de auditoría
    pub retention_per_type: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "shuttle_fleet".to_string(),
            retention_per_type: 5000,
        }
    }
}

impl CacheConfig {
    pub fn new(redis_url: impl Into<String>, retention_per_type: usize) -> Self {
        Self {
            redis_url: redis_url.into(),
            retention_per_type,
            ..Self::default()
        }
    }
}
