//! Stores en memoria
//!
//! Implementaciones de `PrimaryStore` y `AuditStore` sobre `RwLock` de tokio.
//! Se usan con `STORE_BACKEND=memory` y en los tests. Cada instancia es
//! independiente; no hay estado global.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AuditStore, PrimaryStore, StoreError};
use crate::models::{
    AuditRecord, AuditStatus, AuditType, EntityKey, EntityState, EntityWrite, FleetSnapshot,
    OperationId, SwapRequest, SwapState,
};

#[derive(Debug, Default)]
struct MemoryFleet {
    fleet: FleetSnapshot,
    swaps: BTreeMap<Uuid, SwapRequest>,
}

impl MemoryFleet {
    fn put(&mut self, state: EntityState) {
        match state {
            EntityState::Vehicle(v) => {
                self.fleet.vehicles.insert(v.id, v);
            }
            EntityState::Rider(r) => {
                self.fleet.riders.insert(r.id, r);
            }
            EntityState::Driver(d) => {
                self.fleet.drivers.insert(d.id, d);
            }
        }
    }
}

/// Store primario en memoria
#[derive(Clone, Default)]
pub struct MemoryPrimaryStore {
    inner: Arc<RwLock<MemoryFleet>>,
    entity_writes: Arc<AtomicUsize>,
}

impl MemoryPrimaryStore {
    pub fn new(fleet: FleetSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryFleet {
                fleet,
                swaps: BTreeMap::new(),
            })),
            entity_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Número total de entidades escritas por `apply`
    pub fn entity_writes(&self) -> usize {
        self.entity_writes.load(Ordering::SeqCst)
    }

    /// Sobrescribir una entidad fuera de cualquier plan (ediciones manuales,
    /// cambios concurrentes en tests)
    pub async fn put_entity(&self, state: EntityState) {
        self.inner.write().await.put(state);
    }

    pub async fn snapshot(&self) -> FleetSnapshot {
        self.inner.read().await.fleet.clone()
    }
}

#[async_trait]
impl PrimaryStore for MemoryPrimaryStore {
    async fn load_fleet(&self) -> Result<FleetSnapshot, StoreError> {
        Ok(self.inner.read().await.fleet.clone())
    }

    async fn read_entities(&self, keys: &[EntityKey]) -> Result<Vec<EntityState>, StoreError> {
        let inner = self.inner.read().await;
        keys.iter()
            .map(|key| inner.fleet.entity(*key).ok_or(StoreError::Missing(*key)))
            .collect()
    }

    async fn apply(&self, writes: &[EntityWrite]) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        for write in writes {
            let key = write.key();
            let current = inner.fleet.entity(key).ok_or(StoreError::Missing(key))?;
            if current != write.expected {
                return Err(StoreError::precondition(key, "document changed since it was read"));
            }
        }

        for write in writes {
            inner.put(write.new.clone());
        }
        self.entity_writes.fetch_add(writes.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn insert_swap(&self, swap: &SwapRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let busy = inner.swaps.values().find(|s| {
            s.is_open() && (s.involves(swap.source_driver_id) || s.involves(swap.target_driver_id))
        });
        if let Some(existing) = busy {
            return Err(StoreError::precondition(
                format!("swap:{}", existing.id),
                "driver already has an open swap",
            ));
        }
        inner.swaps.insert(swap.id, swap.clone());
        Ok(())
    }

    async fn get_swap(&self, id: Uuid) -> Result<Option<SwapRequest>, StoreError> {
        Ok(self.inner.read().await.swaps.get(&id).cloned())
    }

    async fn update_swap(&self, swap: &SwapRequest, expected: SwapState) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.swaps.get_mut(&swap.id) {
            Some(stored) if stored.state == expected => {
                *stored = swap.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_swap(&self, id: Uuid, expected: SwapState) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.swaps.get(&id) {
            Some(stored) if stored.state == expected => {
                inner.swaps.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn open_swaps_for(&self, driver_ids: &[Uuid]) -> Result<Vec<SwapRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .swaps
            .values()
            .filter(|s| s.is_open() && driver_ids.iter().any(|d| s.involves(*d)))
            .cloned()
            .collect())
    }

    async fn due_swaps(&self, now: DateTime<Utc>) -> Result<Vec<SwapRequest>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .swaps
            .values()
            .filter(|s| s.is_open() && s.window_elapsed(now))
            .cloned()
            .collect())
    }
}

/// Store de auditoría en memoria con retención por tipo
#[derive(Clone)]
pub struct MemoryAuditStore {
    records: Arc<RwLock<BTreeMap<OperationId, AuditRecord>>>,
    retention_per_type: usize,
}

impl MemoryAuditStore {
    pub fn new(retention_per_type: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            retention_per_type,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for MemoryAuditStore {
    fn default() -> Self {
        Self::new(5000)
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert_if_absent(&self, record: &AuditRecord) -> Result<Option<AuditRecord>, StoreError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.operation_id) {
            return Ok(Some(existing.clone()));
        }
        records.insert(record.operation_id, record.clone());

        let same_type: Vec<OperationId> = records
            .values()
            .filter(|r| r.audit_type == record.audit_type)
            .map(|r| r.operation_id)
            .collect();
        let excess = same_type.len().saturating_sub(self.retention_per_type);
        for operation_id in same_type.into_iter().take(excess) {
            records.remove(&operation_id);
        }
        Ok(None)
    }

    async fn compare_and_update(
        &self,
        expected: AuditStatus,
        record: &AuditRecord,
    ) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.operation_id) {
            Some(stored) if stored.status == expected => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, operation_id: OperationId) -> Result<Option<AuditRecord>, StoreError> {
        Ok(self.records.read().await.get(&operation_id).cloned())
    }

    async fn recent(&self, audit_type: AuditType, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .rev()
            .filter(|r| r.audit_type == audit_type)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(op: u64, audit_type: AuditType) -> AuditRecord {
        AuditRecord::pending(OperationId(op), audit_type, "tester", &[])
    }

    #[tokio::test]
    async fn test_insert_if_absent_returns_existing() {
        let store = MemoryAuditStore::default();
        assert!(store.insert_if_absent(&record(1, AuditType::Student)).await.unwrap().is_none());
        let existing = store.insert_if_absent(&record(1, AuditType::Student)).await.unwrap();
        assert_eq!(existing.unwrap().operation_id, OperationId(1));
    }

    #[tokio::test]
    async fn test_compare_and_update_checks_status() {
        let store = MemoryAuditStore::default();
        let pending = record(7, AuditType::Driver);
        store.insert_if_absent(&pending).await.unwrap();

        let committed = pending.committed();
        assert!(store.compare_and_update(AuditStatus::Pending, &committed).await.unwrap());
        assert!(!store.compare_and_update(AuditStatus::Pending, &pending.failed("late")).await.unwrap());
        assert_eq!(store.get(OperationId(7)).await.unwrap().unwrap().status, AuditStatus::Committed);
    }

    #[tokio::test]
    async fn test_retention_is_per_type() {
        let store = MemoryAuditStore::new(2);
        for op in 1..=3 {
            store.insert_if_absent(&record(op, AuditType::Route)).await.unwrap();
        }
        store.insert_if_absent(&record(10, AuditType::Driver)).await.unwrap();

        assert!(store.get(OperationId(1)).await.unwrap().is_none());
        assert_eq!(store.recent(AuditType::Route, 10).await.unwrap().len(), 2);
        assert_eq!(store.recent(AuditType::Driver, 10).await.unwrap().len(), 1);
    }
}
