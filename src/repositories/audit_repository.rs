//! Repositorio de auditoría en Redis
//!
//! Cada registro es un documento JSON bajo `audit:record:{operation_id}`.
//! Un sorted set por tipo (`audit:index:{type}`, score = operation_id) da el
//! orden y la retención. Insertar y comparar-y-actualizar corren como
//! scripts Lua para que sean atómicos en el servidor.

use async_trait::async_trait;
use redis::Script;
use tracing::{debug, info};

use super::{AuditStore, StoreError};
use crate::cache::RedisClient;
use crate::models::{AuditRecord, AuditStatus, AuditType, OperationId};

// KEYS[1] registro, KEYS[2] índice; ARGV[1] json, ARGV[2] score, ARGV[3] retención
const INSERT_IF_ABSENT: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
  return existing
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('ZADD', KEYS[2], ARGV[2], KEYS[1])
local excess = redis.call('ZCARD', KEYS[2]) - tonumber(ARGV[3])
if excess > 0 then
  local evicted = redis.call('ZRANGE', KEYS[2], 0, excess - 1)
  for _, key in ipairs(evicted) do
    redis.call('DEL', key)
  end
  redis.call('ZREMRANGEBYRANK', KEYS[2], 0, excess - 1)
end
return false
"#;

// KEYS[1] registro; ARGV[1] estado esperado, ARGV[2] json nuevo
const COMPARE_AND_UPDATE: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return 0
end
local doc = cjson.decode(current)
if doc['status'] ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

/// Store de auditoría sobre Redis
#[derive(Clone)]
pub struct RedisAuditStore {
    redis: RedisClient,
    insert_script: Script,
    update_script: Script,
}

impl RedisAuditStore {
    pub fn new(redis: RedisClient) -> Self {
        info!(
            "🗂️ Store de auditoría en Redis (retención {} por tipo)",
            redis.config().retention_per_type
        );
        Self {
            redis,
            insert_script: Script::new(INSERT_IF_ABSENT),
            update_script: Script::new(COMPARE_AND_UPDATE),
        }
    }
}

#[async_trait]
impl AuditStore for RedisAuditStore {
    async fn insert_if_absent(&self, record: &AuditRecord) -> Result<Option<AuditRecord>, StoreError> {
        let mut conn = self.redis.connection();
        let payload = serde_json::to_string(record)?;

        let existing: Option<String> = self
            .insert_script
            .key(self.redis.audit_record_key(record.operation_id))
            .key(self.redis.audit_index_key(record.audit_type))
            .arg(payload)
            .arg(record.operation_id.0)
            .arg(self.redis.config().retention_per_type)
            .invoke_async(&mut conn)
            .await?;

        match existing {
            Some(raw) => {
                debug!("📥 Registro {} ya existía", record.operation_id);
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => {
                debug!("💾 Registro {} creado en {}", record.operation_id, record.status);
                Ok(None)
            }
        }
    }

    async fn compare_and_update(
        &self,
        expected: AuditStatus,
        record: &AuditRecord,
    ) -> Result<bool, StoreError> {
        let mut conn = self.redis.connection();
        let payload = serde_json::to_string(record)?;

        let updated: i64 = self
            .update_script
            .key(self.redis.audit_record_key(record.operation_id))
            .arg(expected.as_str())
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;

        debug!(
            "🔄 Registro {}: {} → {} ({})",
            record.operation_id,
            expected,
            record.status,
            if updated == 1 { "ok" } else { "sin cambio" }
        );
        Ok(updated == 1)
    }

    async fn get(&self, operation_id: OperationId) -> Result<Option<AuditRecord>, StoreError> {
        let mut conn = self.redis.connection();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.redis.audit_record_key(operation_id))
            .query_async(&mut conn)
            .await?;

        raw.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    async fn recent(&self, audit_type: AuditType, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.redis.connection();

        let keys: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(self.redis.audit_index_key(audit_type))
            .arg(0)
            .arg(limit as i64 - 1)
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let docs: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
        docs.into_iter()
            .flatten()
            .map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
            .collect()
    }
}
