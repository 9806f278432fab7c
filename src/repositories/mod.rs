//! Repositorios
//!
//! Contratos de los dos stores que consume el motor:
//!
//! - `PrimaryStore`: store transaccional de la flota (vehículos, pasajeros,
//!   conductores, swaps) con escrituras atómicas multi-documento y
//!   precondiciones optimistas.
//! - `AuditStore`: store secundario de registros de auditoría con semántica
//!   "insertar si no existe" y "comparar y actualizar estado".
//!
//! Implementaciones: PostgreSQL + Redis en producción, memoria para
//! desarrollo local y tests.

pub mod fleet_repository;
pub mod memory;
pub mod audit_repository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AuditRecord, AuditStatus, AuditType, EntityKey, EntityState, EntityWrite, FleetSnapshot,
    OperationId, SwapRequest, SwapState,
};

pub use audit_repository::RedisAuditStore;
pub use fleet_repository::PgFleetStore;
pub use memory::{MemoryAuditStore, MemoryPrimaryStore};

/// Errores de los stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("precondition failed for {key}: {reason}")]
    Precondition { key: String, reason: String },

    #[error("serialization conflict, retry with a fresh snapshot")]
    SerializationConflict,

    #[error("entity not found: {0}")]
    Missing(EntityKey),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn precondition(key: impl ToString, reason: impl Into<String>) -> Self {
        StoreError::Precondition {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Carrera de escritura: el caller debe volver a leer
    pub fn is_race(&self) -> bool {
        matches!(
            self,
            StoreError::Precondition { .. } | StoreError::SerializationConflict
        )
    }
}

/// Store primario transaccional
#[async_trait]
pub trait PrimaryStore: Send + Sync {
    /// Lectura consistente de la flota completa
    async fn load_fleet(&self) -> Result<FleetSnapshot, StoreError>;

    /// Lectura fresca de un conjunto de entidades, en el orden de `keys`
    async fn read_entities(&self, keys: &[EntityKey]) -> Result<Vec<EntityState>, StoreError>;

    /// Aplicar todas las escrituras en una sola transacción.
    ///
    /// Si alguna entidad ya no coincide con `expected` no se escribe nada.
    async fn apply(&self, writes: &[EntityWrite]) -> Result<(), StoreError>;

    /// Insertar un swap pendiente; falla si alguno de sus conductores ya
    /// tiene un swap abierto
    async fn insert_swap(&self, swap: &SwapRequest) -> Result<(), StoreError>;

    async fn get_swap(&self, id: Uuid) -> Result<Option<SwapRequest>, StoreError>;

    /// Reemplazar un swap solo si su estado guardado sigue siendo `expected`
    async fn update_swap(&self, swap: &SwapRequest, expected: SwapState) -> Result<bool, StoreError>;

    /// Borrar un swap solo si su estado guardado sigue siendo `expected`
    async fn delete_swap(&self, id: Uuid, expected: SwapState) -> Result<bool, StoreError>;

    /// Swaps abiertos (pendientes o aceptados sin terminar) de estos conductores
    async fn open_swaps_for(&self, driver_ids: &[Uuid]) -> Result<Vec<SwapRequest>, StoreError>;

    /// Swaps abiertos cuya ventana ya terminó
    async fn due_swaps(&self, now: DateTime<Utc>) -> Result<Vec<SwapRequest>, StoreError>;
}

/// Store secundario de auditoría
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insertar si no existe. Devuelve el registro existente si ya había uno.
    async fn insert_if_absent(&self, record: &AuditRecord) -> Result<Option<AuditRecord>, StoreError>;

    /// Reemplazar el registro solo si su estado guardado es `expected`
    async fn compare_and_update(
        &self,
        expected: AuditStatus,
        record: &AuditRecord,
    ) -> Result<bool, StoreError>;

    async fn get(&self, operation_id: OperationId) -> Result<Option<AuditRecord>, StoreError>;

    /// Registros más recientes de un tipo
    async fn recent(&self, audit_type: AuditType, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;
}
