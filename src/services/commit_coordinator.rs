//! Coordinador de commits
//!
//! `Staged → Pending → Committing → Committed | Failed`, y después
//! `Committed → RolledBack`.
//!
//! 1. Si ya hay registro de auditoría para el `operation_id`, se devuelve su
//!    resultado sin escribir nada (o se recupera un `pending` abandonado).
//! 2. Se validan los estados finales y se releen las entidades.
//! 3. Se inserta el registro `pending` con los `before` frescos.
//! 4. Una sola transacción primaria aplica todo el plan.
//! 5. El registro pasa a `committed` o `failed`.
//!
//! Si la transacción no responde a tiempo, solo el estado propuesto ya visible
//! la da por confirmada; en otro caso el registro queda `pending` y lo resuelve
//! la recuperación pasado `STUCK_PENDING_SECS`.
//!
//! Es el único componente que escribe contadores y referencias en el store
//! primario.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::plan_validator::validate_changes;
use crate::config::EngineConfig;
use crate::models::{
    Actor, AuditRecord, AuditStatus, AuditType, EntityChange, EntityKey, EntityState, EntityWrite,
    OperationId, ValidationIssue,
};
use crate::repositories::{AuditStore, PrimaryStore, StoreError};
use crate::utils::errors::{AppError, AppResult};

const PLAN_EXPIRED: &str = "plan expired, re-stage";

/// Plan listo para confirmar
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub operation_id: OperationId,
    pub audit_type: AuditType,
    pub actor: Actor,
    pub changes: Vec<EntityChange>,
}

/// Resultado de `commit`
#[derive(Debug, Clone, Serialize)]
pub struct CommitOutcome {
    pub operation_id: OperationId,
    pub status: AuditStatus,
    pub errors: Vec<String>,
    /// El resultado viene de un registro ya existente
    pub replayed: bool,
    pub record: AuditRecord,
}

impl CommitOutcome {
    fn from_record(record: AuditRecord, replayed: bool) -> Self {
        Self {
            operation_id: record.operation_id,
            status: record.status,
            errors: record.error.clone().into_iter().collect(),
            replayed,
            record,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.status == AuditStatus::Committed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
    RolledBack,
    Rejected,
}

/// Resultado de `rollback`
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub operation_id: OperationId,
    pub status: RollbackStatus,
    pub reason: Option<String>,
    pub record: AuditRecord,
}

impl RollbackOutcome {
    fn rejected(record: AuditRecord, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        warn!("🚫 Reversión de {} rechazada: {}", record.operation_id, reason);
        Self {
            operation_id: record.operation_id,
            status: RollbackStatus::Rejected,
            reason: Some(reason),
            record,
        }
    }

    fn rolled_back(record: AuditRecord) -> Self {
        Self {
            operation_id: record.operation_id,
            status: RollbackStatus::RolledBack,
            reason: None,
            record,
        }
    }
}

/// Resultado de aplicar escrituras en el store primario
enum ApplyResult {
    Applied,
    /// No se escribió nada
    Failed(String),
    /// No se sabe si la transacción llegó a confirmarse
    Unknown(AppError),
}

/// Primera clave cuyo estado vivo no coincide con el esperado
fn first_divergence(expected: &[EntityState], live: &[EntityState]) -> Option<EntityKey> {
    if expected.len() != live.len() {
        return expected.first().map(EntityState::key);
    }
    expected
        .iter()
        .zip(live)
        .find(|(e, l)| e != l)
        .map(|(e, _)| e.key())
}

/// Ejecutar una llamada a un store con un límite de tiempo
pub async fn bounded<T>(
    timeout: std::time::Duration,
    what: &str,
    call: impl Future<Output = Result<T, StoreError>>,
) -> AppResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::Timeout(format!("{} exceeded {}ms", what, timeout.as_millis()))),
    }
}

pub struct CommitCoordinator {
    primary: Arc<dyn PrimaryStore>,
    audit: Arc<dyn AuditStore>,
    store_timeout: std::time::Duration,
    retry_attempts: u32,
    stuck_pending: Duration,
}

impl CommitCoordinator {
    pub fn new(primary: Arc<dyn PrimaryStore>, audit: Arc<dyn AuditStore>, config: &EngineConfig) -> Self {
        Self {
            primary,
            audit,
            store_timeout: config.store_timeout,
            retry_attempts: config.commit_retry_attempts,
            stuck_pending: config.stuck_pending,
        }
    }

    async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T, StoreError>>) -> AppResult<T> {
        bounded(self.store_timeout, what, call).await
    }

    pub async fn record(&self, operation_id: OperationId) -> AppResult<Option<AuditRecord>> {
        self.bounded("audit lookup", self.audit.get(operation_id)).await
    }

    /// Resultado de una operación ya registrada, sin escrituras si está
    /// resuelta
    pub async fn replay(&self, operation_id: OperationId, now: DateTime<Utc>) -> AppResult<Option<CommitOutcome>> {
        match self.record(operation_id).await? {
            Some(existing) => self.resume(existing, now).await.map(Some),
            None => Ok(None),
        }
    }

    /// Registros recientes de un tipo
    pub async fn recent(&self, audit_type: AuditType, limit: usize) -> AppResult<Vec<AuditRecord>> {
        self.bounded("audit recent", self.audit.recent(audit_type, limit)).await
    }

    /// Confirmar un plan
    pub async fn commit(&self, request: CommitRequest, now: DateTime<Utc>) -> AppResult<CommitOutcome> {
        let operation_id = request.operation_id;

        if let Some(existing) = self.record(operation_id).await? {
            return self.resume(existing, now).await;
        }

        if request.changes.is_empty() {
            return Err(AppError::validation(ValidationIssue::EmptyPlan));
        }
        let issues = validate_changes(&request.changes);
        if !issues.is_empty() {
            return Err(AppError::Validation(issues));
        }

        let keys: Vec<EntityKey> = request.changes.iter().map(EntityChange::key).collect();
        let staged: Vec<EntityState> = request.changes.iter().map(|c| c.before.clone()).collect();
        let fresh = match self.bounded("fresh read", self.primary.read_entities(&keys)).await {
            Ok(fresh) => fresh,
            Err(AppError::Store(StoreError::Missing(key))) => {
                return Err(AppError::StalePlan(format!("{} no longer exists", key)))
            }
            Err(e) => return Err(e),
        };
        if let Some(key) = first_divergence(&staged, &fresh) {
            return Err(AppError::StalePlan(format!("{} changed since staging", key)));
        }

        let pending = AuditRecord::pending(operation_id, request.audit_type, &request.actor.id, &request.changes);
        if let Some(existing) = self
            .bounded("audit insert", self.audit.insert_if_absent(&pending))
            .await?
        {
            return self.resume(existing, now).await;
        }
        info!(
            "🔒 Operación {} ({}) en pending: {} entidades, actor {}",
            operation_id,
            request.audit_type,
            keys.len(),
            request.actor.id
        );

        let writes: Vec<EntityWrite> = request
            .changes
            .iter()
            .map(|c| EntityWrite {
                expected: c.before.clone(),
                new: c.after.clone(),
            })
            .collect();

        let finished = match self.apply_with_retry(&writes).await {
            ApplyResult::Applied => pending.committed(),
            ApplyResult::Failed(reason) => pending.failed(reason),
            // La transacción puede confirmarse aún en el servidor: solo el
            // estado propuesto resuelve ahora, el resto lo decide `resume`
            ApplyResult::Unknown(err) => match self.read_live(&pending).await {
                Some(live) if first_divergence(&pending.proposed_states(), &live).is_none() => pending.committed(),
                _ => {
                    error!("❌ Operación {} sin resolver, queda en pending: {}", operation_id, err);
                    return Err(AppError::Timeout(format!(
                        "operation {} outcome unknown ({}), left pending for recovery",
                        operation_id, err
                    )));
                }
            },
        };

        self.finalize(&pending, finished).await
    }

    /// Resultado de una operación que ya tiene registro
    async fn resume(&self, existing: AuditRecord, now: DateTime<Utc>) -> AppResult<CommitOutcome> {
        if existing.status.is_terminal() {
            info!(
                "♻️ Operación {} ya resuelta ({}), sin escrituras",
                existing.operation_id, existing.status
            );
            return Ok(CommitOutcome::from_record(existing, true));
        }

        if existing.age(now) < self.stuck_pending {
            return Err(AppError::Conflict(format!(
                "operation {} is already being committed",
                existing.operation_id
            )));
        }

        warn!("🩹 Recuperando operación {} abandonada en pending", existing.operation_id);
        match self.resolve_by_reading(&existing).await {
            Some(resolved) => self.finalize(&existing, resolved).await,
            None => Err(AppError::Timeout(format!(
                "operation {} could not be resolved, retry later",
                existing.operation_id
            ))),
        }
    }

    /// Estado vivo de las entidades de un registro
    async fn read_live(&self, record: &AuditRecord) -> Option<Vec<EntityState>> {
        match self
            .bounded("resolution read", self.primary.read_entities(&record.keys()))
            .await
        {
            Ok(live) => Some(live),
            Err(e) => {
                warn!("⚠️ No se pudo leer el estado de {}: {}", record.operation_id, e);
                None
            }
        }
    }

    /// Decidir el estado final de un `pending` abandonado comparando con el
    /// store vivo
    async fn resolve_by_reading(&self, pending: &AuditRecord) -> Option<AuditRecord> {
        let live = self.read_live(pending).await?;

        if first_divergence(&pending.proposed_states(), &live).is_none() {
            Some(pending.committed())
        } else if first_divergence(&pending.before_states(), &live).is_none() {
            Some(pending.failed("transaction did not complete"))
        } else {
            Some(pending.failed(format!("{}: entities changed concurrently", PLAN_EXPIRED)))
        }
    }

    /// Cerrar el registro `pending`
    async fn finalize(&self, pending: &AuditRecord, finished: AuditRecord) -> AppResult<CommitOutcome> {
        let updated = self
            .bounded(
                "audit update",
                self.audit.compare_and_update(AuditStatus::Pending, &finished),
            )
            .await?;

        if updated {
            match finished.status {
                AuditStatus::Committed => info!("✅ Operación {} confirmada", finished.operation_id),
                _ => warn!(
                    "❌ Operación {} fallida: {}",
                    finished.operation_id,
                    finished.error.as_deref().unwrap_or("-")
                ),
            }
            return Ok(CommitOutcome::from_record(finished, false));
        }

        // Otro proceso cerró el registro antes
        match self.record(pending.operation_id).await? {
            Some(current) => Ok(CommitOutcome::from_record(current, true)),
            None => Err(AppError::Internal(format!(
                "audit record {} disappeared",
                pending.operation_id
            ))),
        }
    }

    /// Aplicar escrituras reintentando los conflictos de serialización
    /// mientras el estado vivo siga siendo el esperado
    async fn apply_with_retry(&self, writes: &[EntityWrite]) -> ApplyResult {
        let keys: Vec<EntityKey> = writes.iter().map(EntityWrite::key).collect();
        let expected: Vec<EntityState> = writes.iter().map(|w| w.expected.clone()).collect();
        let mut retries = 0;

        loop {
            match self.bounded("primary transaction", self.primary.apply(writes)).await {
                Ok(()) => return ApplyResult::Applied,
                Err(AppError::Store(StoreError::SerializationConflict)) => {
                    retries += 1;
                    let live = match self.bounded("conflict re-read", self.primary.read_entities(&keys)).await {
                        Ok(live) => live,
                        Err(e) => return ApplyResult::Unknown(e),
                    };
                    if first_divergence(&expected, &live).is_some() {
                        return ApplyResult::Failed(format!("{}: entities changed concurrently", PLAN_EXPIRED));
                    }
                    if retries > self.retry_attempts {
                        return ApplyResult::Failed(format!(
                            "serialization conflict persisted after {} retries",
                            self.retry_attempts
                        ));
                    }
                    warn!("🔁 Conflicto de serialización, reintento {}/{}", retries, self.retry_attempts);
                }
                Err(AppError::Store(e @ (StoreError::Precondition { .. } | StoreError::Missing(_)))) => {
                    return ApplyResult::Failed(format!("{}: {}", PLAN_EXPIRED, e));
                }
                Err(e) => return ApplyResult::Unknown(e),
            }
        }
    }

    /// Revertir una operación confirmada
    pub async fn rollback(&self, operation_id: OperationId, actor: &Actor) -> AppResult<RollbackOutcome> {
        let record = self
            .record(operation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("operation {} has no audit record", operation_id)))?;

        match record.status {
            AuditStatus::RolledBack => return Ok(RollbackOutcome::rolled_back(record)),
            AuditStatus::Committed => {}
            status => {
                return Ok(RollbackOutcome::rejected(
                    record,
                    format!("operation is {}, only committed operations can be rolled back", status),
                ))
            }
        }

        let Some(after) = record.after_states() else {
            return Ok(RollbackOutcome::rejected(record, "record has no after states"));
        };

        let live = match self.bounded("rollback read", self.primary.read_entities(&record.keys())).await {
            Ok(live) => live,
            Err(AppError::Store(StoreError::Missing(key))) => {
                return Ok(RollbackOutcome::rejected(record, format!("{} no longer exists", key)))
            }
            Err(e) => return Err(e),
        };
        let already_reverted = first_divergence(&record.before_states(), &live).is_none();
        if !already_reverted {
            if let Some(key) = first_divergence(&after, &live) {
                return Ok(RollbackOutcome::rejected(record, format!("{} changed since commit", key)));
            }
        }

        let writes: Vec<EntityWrite> = record
            .changes
            .iter()
            .zip(after)
            .map(|(change, after)| EntityWrite {
                expected: after,
                new: change.before.clone(),
            })
            .collect();

        let applied = if already_reverted {
            info!("♻️ Operación {} ya estaba revertida en el store", operation_id);
            ApplyResult::Applied
        } else {
            self.apply_with_retry(&writes).await
        };
        match applied {
            ApplyResult::Applied => {}
            ApplyResult::Failed(reason) => return Ok(RollbackOutcome::rejected(record, reason)),
            ApplyResult::Unknown(err) => {
                let landed = match self.read_live(&record).await {
                    Some(live) => first_divergence(&record.before_states(), &live).is_none(),
                    None => false,
                };
                if !landed {
                    warn!("⚠️ Reversión de {} sin resolver: {}", operation_id, err);
                    return Err(AppError::Timeout(format!(
                        "rollback of {} outcome unknown ({}), retry later",
                        operation_id, err
                    )));
                }
            }
        }

        let rolled_back = record.rolled_back(&actor.id);
        let updated = self
            .bounded(
                "audit update",
                self.audit.compare_and_update(AuditStatus::Committed, &rolled_back),
            )
            .await?;
        if !updated {
            warn!("⚠️ Registro {} cambió durante la reversión", operation_id);
            let current = self.record(operation_id).await?.unwrap_or(rolled_back);
            return Ok(RollbackOutcome::rolled_back(current));
        }

        info!("⏪ Operación {} revertida por {}", operation_id, actor.id);
        Ok(RollbackOutcome::rolled_back(rolled_back))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FleetSnapshot, Shift, ShiftLoad};
    use crate::repositories::{MemoryAuditStore, MemoryPrimaryStore};
    use crate::services::fixtures::{admin, rider_move, short_timeout, stores, FlakyStore, FleetBuilder, Stall};
    use uuid::Uuid;

    struct Scenario {
        snapshot: FleetSnapshot,
        rider: Uuid,
        van: Uuid,
    }

    fn scenario() -> Scenario {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let van = fleet.vehicle(route, Shift::Both, 3, 3);
        let rider = fleet.rider(Shift::Both, pickup, None);
        Scenario {
            snapshot: fleet.build(),
            rider,
            van,
        }
    }

    fn request(op: u64, changes: Vec<EntityChange>) -> CommitRequest {
        CommitRequest {
            operation_id: OperationId(op),
            audit_type: AuditType::Student,
            actor: admin(),
            changes,
        }
    }

    #[tokio::test]
    async fn test_commit_updates_both_counters_together() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        let outcome = t
            .coordinator
            .commit(request(1, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();

        assert!(outcome.is_committed());
        assert!(!outcome.replayed);
        let live = t.primary.snapshot().await;
        assert_eq!(live.vehicles[&s.van].load(), ShiftLoad::new(1, 1));
        assert_eq!(live.riders[&s.rider].vehicle_id, Some(s.van));
        assert!(live.vehicles.values().all(|v| v.within_capacity()));
    }

    #[tokio::test]
    async fn test_confirm_twice_replays_without_writes() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        let changes = rider_move(&s.snapshot, s.rider, s.van);
        t.coordinator.commit(request(2, changes.clone()), Utc::now()).await.unwrap();
        let writes = t.primary.entity_writes();

        let again = t.coordinator.commit(request(2, changes), Utc::now()).await.unwrap();
        assert!(again.replayed);
        assert_eq!(again.status, AuditStatus::Committed);
        assert_eq!(t.primary.entity_writes(), writes);
    }

    #[tokio::test]
    async fn test_rollback_restores_exact_before_state() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        t.coordinator
            .commit(request(3, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();

        let outcome = t.coordinator.rollback(OperationId(3), &admin()).await.unwrap();
        assert_eq!(outcome.status, RollbackStatus::RolledBack);
        assert_eq!(t.primary.snapshot().await, s.snapshot);

        let record = t.audit.get(OperationId(3)).await.unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::RolledBack);
        assert_eq!(record.rolled_back_by.as_deref(), Some("admin-1"));

        let replay = t.coordinator.rollback(OperationId(3), &admin()).await.unwrap();
        assert_eq!(replay.status, RollbackStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_rollback_refused_when_state_moved_on() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        t.coordinator
            .commit(request(4, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();

        let mut van = t.primary.snapshot().await.vehicles[&s.van].clone();
        van.trip_active = true;
        t.primary.put_entity(EntityState::Vehicle(van)).await;

        let outcome = t.coordinator.rollback(OperationId(4), &admin()).await.unwrap();
        assert_eq!(outcome.status, RollbackStatus::Rejected);
        assert!(outcome.reason.unwrap().contains("changed since commit"));
        let record = t.audit.get(OperationId(4)).await.unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::Committed);
    }

    #[tokio::test]
    async fn test_stale_plan_writes_nothing() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        let changes = rider_move(&s.snapshot, s.rider, s.van);

        let mut rider = s.snapshot.riders[&s.rider].clone();
        rider.full_name = "Renombrado".to_string();
        t.primary.put_entity(EntityState::Rider(rider)).await;

        let err = t.coordinator.commit(request(5, changes), Utc::now()).await.unwrap_err();
        assert!(matches!(err, AppError::StalePlan(_)));
        assert!(t.audit.get(OperationId(5)).await.unwrap().is_none());
        assert_eq!(t.primary.entity_writes(), 0);
    }

    #[tokio::test]
    async fn test_invalid_after_state_is_rejected_before_any_write() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let van = fleet.vehicle(route, Shift::Morning, 1, 0);
        fleet.rider(Shift::Morning, pickup, Some(van));
        let extra = fleet.rider(Shift::Morning, pickup, None);
        let snapshot = fleet.build();
        let t = stores(snapshot.clone());

        let err = t
            .coordinator
            .commit(request(6, rider_move(&snapshot, extra, van)), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(t.audit.len().await, 0);
    }

    #[tokio::test]
    async fn test_pending_record_is_owned_then_recovered() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        let changes = rider_move(&s.snapshot, s.rider, s.van);
        let pending = AuditRecord::pending(OperationId(7), AuditType::Student, "admin-1", &changes);
        t.audit.insert_if_absent(&pending).await.unwrap();

        let now = Utc::now();
        let err = t.coordinator.commit(request(7, changes.clone()), now).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // El commit original llegó a aplicarse antes de morir
        let writes: Vec<EntityWrite> = changes
            .iter()
            .map(|c| EntityWrite {
                expected: c.before.clone(),
                new: c.after.clone(),
            })
            .collect();
        t.primary.apply(&writes).await.unwrap();

        let later = now + Duration::seconds(61);
        let recovered = t.coordinator.commit(request(7, changes), later).await.unwrap();
        assert_eq!(recovered.status, AuditStatus::Committed);
        assert_eq!(t.primary.entity_writes(), writes.len());
    }

    fn contended(snapshot: FleetSnapshot, conflicts: u32) -> (CommitCoordinator, MemoryPrimaryStore, MemoryAuditStore) {
        let inner = MemoryPrimaryStore::new(snapshot);
        let audit = MemoryAuditStore::default();
        let store = FlakyStore::new(&inner, conflicts, Stall::No);
        let coordinator = CommitCoordinator::new(Arc::new(store), Arc::new(audit.clone()), &EngineConfig::default());
        (coordinator, inner, audit)
    }

    /// Coordinador con límite corto sobre stores compartidos
    fn stalled(inner: &MemoryPrimaryStore, audit: &MemoryAuditStore, stall: Stall) -> CommitCoordinator {
        let store = FlakyStore::new(inner, 0, stall);
        CommitCoordinator::new(Arc::new(store), Arc::new(audit.clone()), &short_timeout())
    }

    fn plain(inner: &MemoryPrimaryStore, audit: &MemoryAuditStore) -> CommitCoordinator {
        CommitCoordinator::new(Arc::new(inner.clone()), Arc::new(audit.clone()), &EngineConfig::default())
    }

    #[tokio::test]
    async fn test_serialization_conflicts_are_retried() {
        let s = scenario();
        let (coordinator, inner, _) = contended(s.snapshot.clone(), 2);
        let outcome = coordinator
            .commit(request(8, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_committed());
        assert_eq!(inner.snapshot().await.riders[&s.rider].vehicle_id, Some(s.van));
    }

    #[tokio::test]
    async fn test_persistent_conflict_marks_record_failed() {
        let s = scenario();
        let (coordinator, inner, audit) = contended(s.snapshot.clone(), 10);
        let outcome = coordinator
            .commit(request(9, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.status, AuditStatus::Failed);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(inner.entity_writes(), 0);
        assert_eq!(audit.get(OperationId(9)).await.unwrap().unwrap().status, AuditStatus::Failed);

        let rollback = coordinator.rollback(OperationId(9), &admin()).await.unwrap();
        assert_eq!(rollback.status, RollbackStatus::Rejected);
    }

    #[tokio::test]
    async fn test_store_calls_are_bounded() {
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            Ok::<(), StoreError>(())
        };
        let err = bounded(std::time::Duration::from_millis(10), "slow read", slow)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(msg) if msg.contains("slow read")));
    }

    #[tokio::test]
    async fn test_timed_out_commit_that_landed_is_committed() {
        let s = scenario();
        let inner = MemoryPrimaryStore::new(s.snapshot.clone());
        let audit = MemoryAuditStore::default();
        let coordinator = stalled(&inner, &audit, Stall::LandsAfter(std::time::Duration::ZERO));

        let outcome = coordinator
            .commit(request(10, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();
        assert!(outcome.is_committed());
        assert!(!outcome.replayed);
        assert_eq!(inner.snapshot().await.riders[&s.rider].vehicle_id, Some(s.van));
    }

    #[tokio::test]
    async fn test_timed_out_commit_stays_pending_until_it_lands() {
        let s = scenario();
        let inner = MemoryPrimaryStore::new(s.snapshot.clone());
        let audit = MemoryAuditStore::default();
        let coordinator = stalled(&inner, &audit, Stall::LandsAfter(std::time::Duration::from_millis(200)));
        let changes = rider_move(&s.snapshot, s.rider, s.van);
        let now = Utc::now();

        let err = coordinator.commit(request(11, changes.clone()), now).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(audit.get(OperationId(11)).await.unwrap().unwrap().status, AuditStatus::Pending);

        // El COMMIT en vuelo llega después de la relectura
        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(inner.snapshot().await.riders[&s.rider].vehicle_id, Some(s.van));

        let err = coordinator.commit(request(11, changes.clone()), now).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let recovered = coordinator
            .commit(request(11, changes), now + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(recovered.status, AuditStatus::Committed);
        assert_eq!(audit.get(OperationId(11)).await.unwrap().unwrap().status, AuditStatus::Committed);
    }

    #[tokio::test]
    async fn test_lost_commit_is_failed_by_recovery() {
        let s = scenario();
        let inner = MemoryPrimaryStore::new(s.snapshot.clone());
        let audit = MemoryAuditStore::default();
        let coordinator = stalled(&inner, &audit, Stall::Lost);
        let changes = rider_move(&s.snapshot, s.rider, s.van);
        let now = Utc::now();

        let err = coordinator.commit(request(12, changes.clone()), now).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(audit.get(OperationId(12)).await.unwrap().unwrap().status, AuditStatus::Pending);
        assert_eq!(inner.entity_writes(), 0);

        let recovered = coordinator
            .commit(request(12, changes), now + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(recovered.status, AuditStatus::Failed);
        assert!(recovered.errors[0].contains("did not complete"));
        assert_eq!(inner.snapshot().await, s.snapshot);
    }

    #[tokio::test]
    async fn test_stuck_pending_with_diverged_state_is_failed() {
        let s = scenario();
        let t = stores(s.snapshot.clone());
        let changes = rider_move(&s.snapshot, s.rider, s.van);
        let pending = AuditRecord::pending(OperationId(13), AuditType::Student, "admin-1", &changes);
        t.audit.insert_if_absent(&pending).await.unwrap();

        let mut rider = s.snapshot.riders[&s.rider].clone();
        rider.full_name = "Renombrado".to_string();
        t.primary.put_entity(EntityState::Rider(rider)).await;

        let recovered = t
            .coordinator
            .commit(request(13, changes), Utc::now() + Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(recovered.status, AuditStatus::Failed);
        assert!(recovered.errors[0].contains(PLAN_EXPIRED));
        assert_eq!(t.audit.get(OperationId(13)).await.unwrap().unwrap().status, AuditStatus::Failed);
    }

    #[tokio::test]
    async fn test_timed_out_rollback_can_be_retried() {
        let s = scenario();
        let inner = MemoryPrimaryStore::new(s.snapshot.clone());
        let audit = MemoryAuditStore::default();
        plain(&inner, &audit)
            .commit(request(14, rider_move(&s.snapshot, s.rider, s.van)), Utc::now())
            .await
            .unwrap();

        let slow = stalled(&inner, &audit, Stall::LandsAfter(std::time::Duration::from_millis(200)));
        let err = slow.rollback(OperationId(14), &admin()).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert_eq!(audit.get(OperationId(14)).await.unwrap().unwrap().status, AuditStatus::Committed);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        assert_eq!(inner.snapshot().await, s.snapshot);
        let writes = inner.entity_writes();

        let outcome = plain(&inner, &audit).rollback(OperationId(14), &admin()).await.unwrap();
        assert_eq!(outcome.status, RollbackStatus::RolledBack);
        assert_eq!(outcome.record.status, AuditStatus::RolledBack);
        assert_eq!(inner.entity_writes(), writes);
    }
}
