//! Configuración de variables de entorno
//!
//! Este módulo maneja la configuración del entorno y los parámetros del
//! motor de reasignación. Los valores ausentes toman su default; los mal
//! formados devuelven `ConfigError`.

use chrono::Duration;
use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Errores de configuración
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Backend de almacenamiento
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgreSQL + Redis
    Postgres,
    /// Stores en memoria (desarrollo y tests)
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

/// Parámetros del motor
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Ventana de confirmación de un plan preparado
    pub confirm_window: Duration,
    /// Límite de cada llamada a un store
    pub store_timeout: std::time::Duration,
    /// Reintentos ante conflictos de serialización
    pub commit_retry_attempts: u32,
    pub audit_retention_per_type: usize,
    pub sweep_interval: std::time::Duration,
    pub default_swap_window: Duration,
    /// Edad a partir de la cual un registro `pending` se considera abandonado
    pub stuck_pending: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confirm_window: Duration::seconds(120),
            store_timeout: std::time::Duration::from_millis(5000),
            commit_retry_attempts: 3,
            audit_retention_per_type: 5000,
            sweep_interval: std::time::Duration::from_secs(15),
            default_swap_window: Duration::minutes(240),
            stuck_pending: Duration::seconds(60),
        }
    }
}

/// Configuración del entorno
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub environment: String,
    pub port: u16,
    pub host: String,
    pub log_level: String,
    pub jwt_secret: String,
    pub cors_origins: Vec<String>,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub redis_url: String,
    /// Seed JSON opcional para el backend en memoria
    pub fleet_seed_path: Option<String>,
    pub engine: EngineConfig,
}

fn var(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

impl EnvironmentConfig {
    /// Leer la configuración del entorno del proceso
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_backend = parse_var("STORE_BACKEND", StoreBackend::Postgres)?;
        let database_url = var("DATABASE_URL");
        if store_backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let jwt_secret = var("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let engine = EngineConfig {
            confirm_window: Duration::seconds(parse_var("CONFIRM_WINDOW_SECS", 120i64)?),
            store_timeout: std::time::Duration::from_millis(parse_var("STORE_TIMEOUT_MS", 5000u64)?),
            commit_retry_attempts: parse_var("COMMIT_RETRY_ATTEMPTS", 3u32)?,
            audit_retention_per_type: parse_var("AUDIT_RETENTION_PER_TYPE", 5000usize)?,
            sweep_interval: std::time::Duration::from_secs(parse_var("SWEEP_INTERVAL_SECS", 15u64)?),
            default_swap_window: Duration::minutes(parse_var("DEFAULT_SWAP_WINDOW_MINUTES", 240i64)?),
            stuck_pending: Duration::seconds(parse_var("STUCK_PENDING_SECS", 60i64)?),
        };

        Ok(Self {
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            port: parse_var("PORT", 8080u16)?,
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            jwt_secret,
            cors_origins: var("CORS_ORIGINS")
                .map(|origins| {
                    origins
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            store_backend,
            database_url,
            redis_url: var("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            fleet_seed_path: var("FLEET_SEED_PATH"),
            engine,
        })
    }

    /// Verificar si estamos en modo desarrollo
    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Verificar si estamos en modo producción
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Obtener la URL del servidor
    pub fn server_url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("memory".parse::<StoreBackend>(), Ok(StoreBackend::Memory));
        assert_eq!("Postgres".parse::<StoreBackend>(), Ok(StoreBackend::Postgres));
        assert!("mongo".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.confirm_window, Duration::seconds(120));
        assert_eq!(engine.commit_retry_attempts, 3);
        assert_eq!(engine.audit_retention_per_type, 5000);
    }

    #[test]
    fn test_malformed_value_is_reported() {
        env::set_var("SHUTTLE_FLEET_TEST_PORT", "not-a-port");
        let err = parse_var::<u16>("SHUTTLE_FLEET_TEST_PORT", 80).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "SHUTTLE_FLEET_TEST_PORT",
                value: "not-a-port".to_string()
            }
        );
        env::remove_var("SHUTTLE_FLEET_TEST_PORT");
    }
}
