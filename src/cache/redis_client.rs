use anyhow::Result;
use redis::aio::ConnectionManager;
use tracing::info;

use super::CacheConfig;
use crate::models::{AuditType, OperationId};

/// Cliente Redis con connection manager async
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
    config: CacheConfig,
}

impl RedisClient {
    /// Crear nuevo cliente Redis
    pub async fn new(config: CacheConfig) -> Result<Self> {
        info!("🔗 Conectando a Redis: {}", config.redis_url);

        let client = redis::Client::open(config.redis_url.clone())?;
        let manager = ConnectionManager::new(client).await?;

        let mut conn = manager.clone();
        let _: () = redis::cmd("PING").query_async(&mut conn).await?;

        info!("✅ Redis conectado exitosamente");

        Ok(Self { manager, config })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Conexión multiplexada; clonar es barato
    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Generar clave con prefijo
    fn make_key(&self, prefix: &str, identifier: &str) -> String {
        format!("{}:{}:{}", self.config.key_prefix, prefix, identifier)
    }

    /// Clave del documento de auditoría de una operación
    pub fn audit_record_key(&self, operation_id: OperationId) -> String {
        self.make_key("audit:record", &operation_id.to_string())
    }

    /// Índice ordenado por operation_id de los registros de un tipo
    pub fn audit_index_key(&self, audit_type: AuditType) -> String {
        self.make_key("audit:index", audit_type.as_str())
    }
}
