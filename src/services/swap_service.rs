//! Máquina de estados de swaps
//!
//! `Pending → {Accepted, Rejected, AutoExpired}`. Aceptar confirma, con el
//! mismo coordinador que las reasignaciones, un plan con exactamente las
//! entidades tocadas. Terminar un swap aceptado es revertir su operación.
//! Rechazar o expirar no toca la flota y borra el swap.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::commit_coordinator::{bounded, CommitCoordinator, CommitRequest, RollbackStatus};
use crate::config::EngineConfig;
use crate::dto::swap_dto::{EndSwapResult, ExpireResult, ProposeSwapRequest, SwapResponseResult};
use crate::models::{
    Actor, AuditType, DriverStatus, EntityChange, EntityState, FleetSnapshot, OperationIdGenerator,
    Role, SwapDecision, SwapKind, SwapRequest, SwapState, ValidationIssue,
};
use crate::repositories::{PrimaryStore, StoreError};
use crate::utils::errors::{forbidden_error, not_found_error, AppError, AppResult};

/// Nota de los swaps revertidos por el barrido
pub const WINDOW_CLOSED_NOTE: &str = "window closed";

/// Resultado de un barrido de swaps vencidos
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SwapSweep {
    pub expired: usize,
    pub ended: usize,
    pub failed: usize,
}

/// Un conductor solo actúa sobre sus propios swaps
fn ensure_driver_is(actor: &Actor, driver_id: Uuid, operation: &str) -> AppResult<()> {
    if actor.role == Role::Driver && actor.id != driver_id.to_string() {
        return Err(forbidden_error(operation, "drivers can only act on their own swaps"));
    }
    Ok(())
}

/// Cambios que aplica un swap aceptado sobre la flota actual
pub fn swap_changes(snapshot: &FleetSnapshot, swap: &SwapRequest) -> Result<Vec<EntityChange>, Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let source = snapshot.drivers.get(&swap.source_driver_id);
    let target = snapshot.drivers.get(&swap.target_driver_id);
    let (Some(source), Some(target)) = (source, target) else {
        let missing = if source.is_none() {
            swap.source_driver_id
        } else {
            swap.target_driver_id
        };
        return Err(vec![ValidationIssue::UnknownEntity { entity_id: missing }]);
    };

    if source.vehicle_id != Some(swap.source_vehicle_id) {
        issues.push(ValidationIssue::StaleMove { entity_id: source.id });
    }
    if target.vehicle_id != swap.target_vehicle_id {
        issues.push(ValidationIssue::StaleMove { entity_id: target.id });
    }
    let vehicles: Vec<Uuid> = std::iter::once(swap.source_vehicle_id)
        .chain(swap.target_vehicle_id)
        .collect();
    for vehicle_id in &vehicles {
        match snapshot.vehicles.get(vehicle_id) {
            Some(vehicle) if vehicle.trip_active => issues.push(ValidationIssue::ActiveTrip { vehicle_id: *vehicle_id }),
            Some(_) => {}
            None => issues.push(ValidationIssue::UnknownEntity { entity_id: *vehicle_id }),
        }
    }
    if !issues.is_empty() {
        return Err(issues);
    }

    let (source_to, target_to) = match swap.kind {
        SwapKind::TrueSwap => (swap.target_vehicle_id, Some(swap.source_vehicle_id)),
        SwapKind::Assignment => (None, Some(swap.source_vehicle_id)),
    };

    let mut changes = Vec::new();
    for (driver, to) in [(source, source_to), (target, target_to)] {
        let mut after = driver.clone();
        after.vehicle_id = to;
        after.status = crate::models::Driver::status_for(to);
        changes.push(EntityChange {
            before: EntityState::Driver(driver.clone()),
            after: EntityState::Driver(after),
        });
    }
    for vehicle_id in vehicles {
        let before = snapshot.vehicles[&vehicle_id].clone();
        let mut after = before.clone();
        after.assigned_driver_id = if vehicle_id == swap.source_vehicle_id {
            Some(target.id)
        } else {
            Some(source.id)
        };
        changes.push(EntityChange {
            before: EntityState::Vehicle(before),
            after: EntityState::Vehicle(after),
        });
    }
    Ok(changes)
}

pub struct SwapService {
    primary: Arc<dyn PrimaryStore>,
    coordinator: Arc<CommitCoordinator>,
    ids: Arc<OperationIdGenerator>,
    store_timeout: std::time::Duration,
    default_window: Duration,
}

impl SwapService {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        coordinator: Arc<CommitCoordinator>,
        ids: Arc<OperationIdGenerator>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            primary,
            coordinator,
            ids,
            store_timeout: config.store_timeout,
            default_window: config.default_swap_window,
        }
    }

    async fn load_swap(&self, swap_id: Uuid) -> AppResult<SwapRequest> {
        bounded(self.store_timeout, "swap lookup", self.primary.get_swap(swap_id))
            .await?
            .ok_or_else(|| not_found_error("swap", &swap_id.to_string()))
    }

    pub async fn get(&self, swap_id: Uuid) -> AppResult<SwapRequest> {
        self.load_swap(swap_id).await
    }

    /// Proponer un swap; reserva su `operation_id`
    pub async fn propose(&self, actor: &Actor, request: ProposeSwapRequest, now: DateTime<Utc>) -> AppResult<SwapRequest> {
        ensure_driver_is(actor, request.source_driver_id, "propose swap")?;
        if request.source_driver_id == request.target_driver_id {
            return Err(AppError::BadRequest("a driver cannot swap with themselves".to_string()));
        }

        let window_start = request.window_start.unwrap_or(now);
        let window_end = request.window_end.unwrap_or(window_start + self.default_window);
        if window_end <= window_start || window_end <= now {
            return Err(AppError::BadRequest("swap window must end in the future, after it starts".to_string()));
        }

        let snapshot = bounded(self.store_timeout, "fleet load", self.primary.load_fleet()).await?;
        let mut issues = Vec::new();
        let source = snapshot.drivers.get(&request.source_driver_id);
        let target = snapshot.drivers.get(&request.target_driver_id);
        let (Some(source), Some(target)) = (source, target) else {
            for id in [request.source_driver_id, request.target_driver_id] {
                if !snapshot.drivers.contains_key(&id) {
                    issues.push(ValidationIssue::UnknownEntity { entity_id: id });
                }
            }
            return Err(AppError::Validation(issues));
        };

        let Some(source_vehicle_id) = source.vehicle_id else {
            return Err(AppError::validation(ValidationIssue::DriverStatusMismatch {
                driver_id: source.id,
                expected: "active".to_string(),
            }));
        };
        let kind = match target.status {
            DriverStatus::Active => SwapKind::TrueSwap,
            DriverStatus::Reserved => SwapKind::Assignment,
        };

        for vehicle_id in std::iter::once(source_vehicle_id).chain(target.vehicle_id) {
            if snapshot.vehicles.get(&vehicle_id).is_some_and(|v| v.trip_active) {
                issues.push(ValidationIssue::ActiveTrip { vehicle_id });
            }
        }
        let drivers = [source.id, target.id];
        let open = bounded(self.store_timeout, "open swaps", self.primary.open_swaps_for(&drivers)).await?;
        for driver_id in drivers {
            if open.iter().any(|swap| swap.involves(driver_id)) {
                issues.push(ValidationIssue::DriverMidSwap { driver_id });
            }
        }
        if !issues.is_empty() {
            return Err(AppError::Validation(issues));
        }

        let swap = SwapRequest {
            id: Uuid::new_v4(),
            source_driver_id: source.id,
            target_driver_id: target.id,
            kind,
            source_vehicle_id,
            target_vehicle_id: target.vehicle_id,
            window_start,
            window_end,
            state: SwapState::Pending,
            operation_id: self.ids.next(),
            created_at: now,
            responded_at: None,
            ended_at: None,
            end_note: None,
        };
        match bounded(self.store_timeout, "swap insert", self.primary.insert_swap(&swap)).await {
            Ok(()) => {}
            Err(AppError::Store(StoreError::Precondition { reason, .. })) => return Err(AppError::Conflict(reason)),
            Err(e) => return Err(e),
        }

        info!(
            "🔄 Swap {} propuesto ({:?}): {} → {}, ventana hasta {}",
            swap.id, swap.kind, swap.source_driver_id, swap.target_driver_id, swap.window_end
        );
        Ok(swap)
    }

    /// Respuesta del conductor destino
    pub async fn respond(
        &self,
        actor: &Actor,
        swap_id: Uuid,
        decision: SwapDecision,
        now: DateTime<Utc>,
    ) -> AppResult<SwapResponseResult> {
        let swap = self.load_swap(swap_id).await?;
        ensure_driver_is(actor, swap.target_driver_id, "respond to swap")?;
        if swap.state != SwapState::Pending {
            return Err(AppError::Conflict(format!("swap {} is no longer pending", swap_id)));
        }
        if swap.window_elapsed(now) {
            self.expire(swap_id, now).await?;
            return Err(AppError::Conflict(format!("swap {} window has closed", swap_id)));
        }

        match decision {
            SwapDecision::Reject => self.reject(swap, now).await,
            SwapDecision::Accept => self.accept(actor, swap, now).await,
        }
    }

    async fn reject(&self, swap: SwapRequest, now: DateTime<Utc>) -> AppResult<SwapResponseResult> {
        let deleted = bounded(self.store_timeout, "swap delete", self.primary.delete_swap(swap.id, SwapState::Pending)).await?;
        if !deleted {
            return Err(AppError::Conflict(format!("swap {} is no longer pending", swap.id)));
        }
        info!("❌ Swap {} rechazado", swap.id);
        Ok(SwapResponseResult {
            swap: SwapRequest {
                state: SwapState::Rejected,
                responded_at: Some(now),
                ..swap
            },
            commit: None,
        })
    }

    async fn accept(&self, actor: &Actor, swap: SwapRequest, now: DateTime<Utc>) -> AppResult<SwapResponseResult> {
        let snapshot = bounded(self.store_timeout, "fleet load", self.primary.load_fleet()).await?;
        let changes = swap_changes(&snapshot, &swap).map_err(AppError::Validation)?;

        let claimed = SwapRequest {
            state: SwapState::Accepted,
            responded_at: Some(now),
            ..swap.clone()
        };
        let won = bounded(self.store_timeout, "swap claim", self.primary.update_swap(&claimed, SwapState::Pending)).await?;
        if !won {
            return Err(AppError::Conflict(format!("swap {} is no longer pending", swap.id)));
        }

        let request = CommitRequest {
            operation_id: swap.operation_id,
            audit_type: AuditType::Driver,
            actor: actor.clone(),
            changes,
        };
        match self.coordinator.commit(request, now).await {
            Ok(outcome) if outcome.is_committed() => {
                info!("✅ Swap {} aceptado, operación {}", swap.id, swap.operation_id);
                Ok(SwapResponseResult {
                    swap: claimed,
                    commit: Some(outcome),
                })
            }
            Ok(outcome) => {
                let pending = self.release_claim(&claimed).await?;
                Ok(SwapResponseResult {
                    swap: pending,
                    commit: Some(outcome),
                })
            }
            // Resultado desconocido: la operación puede confirmarse aún, así
            // que el swap conserva su claim y su `operation_id`
            Err(AppError::Timeout(msg)) => {
                warn!(
                    "⏳ Swap {} aceptado con commit sin resolver; se conserva la operación {}",
                    swap.id, swap.operation_id
                );
                Err(AppError::Timeout(msg))
            }
            Err(e) => {
                self.release_claim(&claimed).await?;
                Err(e)
            }
        }
    }

    /// Devolver a `Pending` un swap cuyo commit no se aplicó, con un
    /// `operation_id` nuevo para el siguiente intento
    async fn release_claim(&self, claimed: &SwapRequest) -> AppResult<SwapRequest> {
        let pending = SwapRequest {
            state: SwapState::Pending,
            responded_at: None,
            operation_id: self.ids.next(),
            ..claimed.clone()
        };
        bounded(self.store_timeout, "swap release", self.primary.update_swap(&pending, SwapState::Accepted)).await?;
        warn!("↩️ Swap {} vuelve a pending tras un commit fallido", claimed.id);
        Ok(pending)
    }

    /// Expirar un swap pendiente cuya ventana terminó. Idempotente.
    pub async fn expire(&self, swap_id: Uuid, now: DateTime<Utc>) -> AppResult<ExpireResult> {
        let Some(swap) = bounded(self.store_timeout, "swap lookup", self.primary.get_swap(swap_id)).await? else {
            return Ok(ExpireResult::AlreadyGone { swap_id });
        };
        if swap.state != SwapState::Pending {
            return Err(AppError::Conflict(format!(
                "swap {} was accepted; end it instead of expiring it",
                swap_id
            )));
        }
        if !swap.window_elapsed(now) {
            return Err(AppError::Conflict(format!("swap {} window is still open", swap_id)));
        }

        if bounded(self.store_timeout, "swap delete", self.primary.delete_swap(swap_id, SwapState::Pending)).await? {
            info!("⌛ Swap {} expirado", swap_id);
            return Ok(ExpireResult::Expired { swap_id });
        }
        match bounded(self.store_timeout, "swap lookup", self.primary.get_swap(swap_id)).await? {
            None => Ok(ExpireResult::AlreadyGone { swap_id }),
            Some(_) => Err(AppError::Conflict(format!("swap {} changed while expiring", swap_id))),
        }
    }

    /// Terminar un swap aceptado revirtiendo su operación. Una reversión
    /// rechazada queda anotada en el swap y no se reintenta.
    pub async fn end(
        &self,
        actor: &Actor,
        swap_id: Uuid,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<EndSwapResult> {
        let swap = self.load_swap(swap_id).await?;
        if swap.state != SwapState::Accepted {
            return Err(AppError::Conflict(format!("swap {} was never accepted", swap_id)));
        }
        if swap.ended_at.is_some() {
            return Ok(EndSwapResult { swap, rollback: None });
        }

        let rollback = self.coordinator.rollback(swap.operation_id, actor).await?;
        let end_note = match (&rollback.status, &rollback.reason) {
            (RollbackStatus::RolledBack, _) => note.or_else(|| Some(format!("ended by {}", actor.id))),
            (RollbackStatus::Rejected, reason) => Some(format!(
                "revert refused: {}",
                reason.as_deref().unwrap_or("unknown reason")
            )),
        };
        let ended = SwapRequest {
            ended_at: Some(now),
            end_note,
            ..swap
        };
        if !bounded(self.store_timeout, "swap end", self.primary.update_swap(&ended, SwapState::Accepted)).await? {
            return Err(AppError::Conflict(format!("swap {} changed while ending", swap_id)));
        }

        match rollback.status {
            RollbackStatus::RolledBack => info!("🏁 Swap {} terminado y revertido", swap_id),
            RollbackStatus::Rejected => warn!("🚫 Swap {} terminado sin revertir: {:?}", swap_id, ended.end_note),
        }
        Ok(EndSwapResult {
            swap: ended,
            rollback: Some(rollback),
        })
    }

    /// Expirar los pendientes vencidos y revertir los aceptados cuya ventana
    /// terminó
    pub async fn sweep_due(&self, now: DateTime<Utc>) -> AppResult<SwapSweep> {
        let due = bounded(self.store_timeout, "due swaps", self.primary.due_swaps(now)).await?;
        let mut sweep = SwapSweep::default();
        let system = Actor::system();

        for swap in due {
            let result = match swap.state {
                SwapState::Pending => self.expire(swap.id, now).await.map(|_| SwapState::AutoExpired),
                SwapState::Accepted => self
                    .end(&system, swap.id, Some(WINDOW_CLOSED_NOTE.to_string()), now)
                    .await
                    .map(|_| SwapState::Accepted),
                _ => continue,
            };
            match result {
                Ok(SwapState::AutoExpired) => sweep.expired += 1,
                Ok(_) => sweep.ended += 1,
                Err(e) => {
                    warn!("⚠️ Barrido del swap {} fallido: {}", swap.id, e);
                    sweep.failed += 1;
                }
            }
        }
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuditStatus, Shift};
    use crate::services::fixtures::{
        admin, driver_actor, is_reserved, short_timeout, stores, FlakyStore, FleetBuilder, Stall, TestStores,
    };

    struct Setup {
        stores: TestStores,
        service: SwapService,
        van_a: Uuid,
        van_b: Uuid,
        a: Uuid,
        b: Uuid,
        spare: Uuid,
    }

    fn setup() -> Setup {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(2);
        let van_a = fleet.vehicle(route, Shift::Both, 4, 4);
        let van_b = fleet.vehicle(route, Shift::Morning, 4, 0);
        let a = fleet.driver(Some(van_a));
        let b = fleet.driver(Some(van_b));
        let spare = fleet.driver(None);
        let stores = stores(fleet.build());
        let service = SwapService::new(
            Arc::new(stores.primary.clone()),
            stores.coordinator.clone(),
            Arc::new(OperationIdGenerator::new()),
            &stores.config,
        );
        Setup {
            stores,
            service,
            van_a,
            van_b,
            a,
            b,
            spare,
        }
    }

    fn proposal(source: Uuid, target: Uuid) -> ProposeSwapRequest {
        ProposeSwapRequest {
            source_driver_id: source,
            target_driver_id: target,
            window_start: None,
            window_end: None,
        }
    }

    #[tokio::test]
    async fn test_pending_swap_expires_without_audit() {
        let s = setup();
        let now = Utc::now();
        let swap = s.service.propose(&driver_actor(s.a), proposal(s.a, s.b), now).await.unwrap();
        assert_eq!(swap.kind, SwapKind::TrueSwap);

        let early = s.service.expire(swap.id, now).await;
        assert!(matches!(early, Err(AppError::Conflict(_))));

        let late = swap.window_end + Duration::seconds(1);
        let sweep = s.service.sweep_due(late).await.unwrap();
        assert_eq!(sweep.expired, 1);
        assert!(s.stores.primary.get_swap(swap.id).await.unwrap().is_none());
        assert_eq!(s.stores.audit.len().await, 0);
        assert_eq!(s.stores.primary.entity_writes(), 0);

        let again = s.service.expire(swap.id, late).await.unwrap();
        assert!(matches!(again, ExpireResult::AlreadyGone { .. }));
    }

    #[tokio::test]
    async fn test_accepted_true_swap_commits_once() {
        let s = setup();
        let now = Utc::now();
        let swap = s.service.propose(&driver_actor(s.a), proposal(s.a, s.b), now).await.unwrap();

        let result = s
            .service
            .respond(&driver_actor(s.b), swap.id, SwapDecision::Accept, now)
            .await
            .unwrap();
        assert_eq!(result.swap.state, SwapState::Accepted);
        let commit = result.commit.unwrap();
        assert!(commit.is_committed());
        assert_eq!(commit.record.changes.len(), 4);
        assert_eq!(s.stores.audit.len().await, 1);

        let fleet = s.stores.primary.snapshot().await;
        assert_eq!(fleet.drivers[&s.a].vehicle_id, Some(s.van_b));
        assert_eq!(fleet.drivers[&s.b].vehicle_id, Some(s.van_a));
        assert_eq!(fleet.vehicles[&s.van_a].assigned_driver_id, Some(s.b));
        assert_eq!(fleet.vehicles[&s.van_b].assigned_driver_id, Some(s.a));

        let record = s.stores.coordinator.record(swap.operation_id).await.unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::Committed);
        assert_eq!(record.audit_type, AuditType::Driver);
    }

    #[tokio::test]
    async fn test_assignment_flips_roles_and_end_reverts() {
        let s = setup();
        let now = Utc::now();
        let original = s.stores.primary.snapshot().await;
        let swap = s.service.propose(&admin(), proposal(s.a, s.spare), now).await.unwrap();
        assert_eq!(swap.kind, SwapKind::Assignment);

        s.service
            .respond(&driver_actor(s.spare), swap.id, SwapDecision::Accept, now)
            .await
            .unwrap();
        let fleet = s.stores.primary.snapshot().await;
        assert!(is_reserved(&fleet, s.a));
        assert_eq!(fleet.drivers[&s.spare].vehicle_id, Some(s.van_a));
        assert_eq!(fleet.vehicles[&s.van_a].assigned_driver_id, Some(s.spare));

        let ended = s.service.end(&admin(), swap.id, None, now).await.unwrap();
        assert_eq!(ended.rollback.unwrap().status, RollbackStatus::RolledBack);
        assert!(ended.swap.ended_at.is_some());
        assert_eq!(s.stores.primary.snapshot().await.drivers, original.drivers);
        assert_eq!(s.stores.primary.snapshot().await.vehicles, original.vehicles);

        // Un segundo fin no revierte nada
        let again = s.service.end(&admin(), swap.id, None, now).await.unwrap();
        assert!(again.rollback.is_none());
    }

    #[tokio::test]
    async fn test_reject_deletes_swap() {
        let s = setup();
        let now = Utc::now();
        let swap = s.service.propose(&admin(), proposal(s.a, s.b), now).await.unwrap();

        let result = s
            .service
            .respond(&driver_actor(s.b), swap.id, SwapDecision::Reject, now)
            .await
            .unwrap();
        assert_eq!(result.swap.state, SwapState::Rejected);
        assert!(result.commit.is_none());
        assert!(matches!(s.service.get(swap.id).await, Err(AppError::NotFound(_))));
        assert_eq!(s.stores.audit.len().await, 0);
    }

    #[tokio::test]
    async fn test_only_target_driver_may_respond() {
        let s = setup();
        let now = Utc::now();
        let swap = s.service.propose(&admin(), proposal(s.a, s.b), now).await.unwrap();
        let result = s
            .service
            .respond(&driver_actor(s.a), swap.id, SwapDecision::Accept, now)
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));

        let foreign = s.service.propose(&driver_actor(s.b), proposal(s.a, s.spare), now).await;
        assert!(matches!(foreign, Err(AppError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_driver_mid_swap_and_active_trip_are_refused() {
        let s = setup();
        let now = Utc::now();
        s.service.propose(&admin(), proposal(s.a, s.b), now).await.unwrap();

        let busy = s.service.propose(&admin(), proposal(s.b, s.spare), now).await;
        assert!(matches!(
            busy,
            Err(AppError::Validation(issues)) if issues == vec![ValidationIssue::DriverMidSwap { driver_id: s.b }]
        ));

        let mut moving = s.stores.primary.snapshot().await.vehicles[&s.van_a].clone();
        moving.trip_active = true;
        s.stores.primary.put_entity(EntityState::Vehicle(moving)).await;
        let fleet = s.stores.primary.snapshot().await;
        let swap = s.stores.primary.open_swaps_for(&[s.a]).await.unwrap().remove(0);
        assert_eq!(
            swap_changes(&fleet, &swap),
            Err(vec![ValidationIssue::ActiveTrip { vehicle_id: s.van_a }])
        );
    }

    #[tokio::test]
    async fn test_failed_accept_returns_swap_to_pending() {
        let s = setup();
        let now = Utc::now();
        let swap = s.service.propose(&admin(), proposal(s.a, s.b), now).await.unwrap();

        let mut moving = s.stores.primary.snapshot().await.vehicles[&s.van_b].clone();
        moving.trip_active = true;
        s.stores.primary.put_entity(EntityState::Vehicle(moving)).await;

        let result = s
            .service
            .respond(&driver_actor(s.b), swap.id, SwapDecision::Accept, now)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(s.service.get(swap.id).await.unwrap().state, SwapState::Pending);
        assert_eq!(s.stores.primary.entity_writes(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_accept_keeps_claim_until_resolved() {
        let s = setup();
        let slow = FlakyStore::new(&s.stores.primary, 0, Stall::LandsAfter(std::time::Duration::from_millis(200)));
        let coordinator = Arc::new(CommitCoordinator::new(
            Arc::new(slow),
            Arc::new(s.stores.audit.clone()),
            &short_timeout(),
        ));
        let service = SwapService::new(
            Arc::new(s.stores.primary.clone()),
            coordinator.clone(),
            Arc::new(OperationIdGenerator::new()),
            &s.stores.config,
        );
        let now = Utc::now();
        let swap = service.propose(&admin(), proposal(s.a, s.b), now).await.unwrap();

        let result = service.respond(&driver_actor(s.b), swap.id, SwapDecision::Accept, now).await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
        let held = service.get(swap.id).await.unwrap();
        assert_eq!(held.state, SwapState::Accepted);
        assert_eq!(held.operation_id, swap.operation_id);

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;
        let snapshot = s.stores.primary.snapshot().await;
        assert_eq!(snapshot.drivers[&s.a].vehicle_id, Some(s.van_b));
        assert_eq!(snapshot.drivers[&s.b].vehicle_id, Some(s.van_a));

        let recovered = coordinator
            .replay(swap.operation_id, now + Duration::seconds(61))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recovered.status, AuditStatus::Committed);

        // Mismos stores sin retardo
        let ended = s.service.end(&admin(), swap.id, None, now).await.unwrap();
        assert_eq!(ended.rollback.unwrap().status, RollbackStatus::RolledBack);
        assert_eq!(s.stores.primary.snapshot().await.drivers[&s.a].vehicle_id, Some(s.van_a));
    }

    #[tokio::test]
    async fn test_sweep_reverts_accepted_swap_after_window() {
        let s = setup();
        let now = Utc::now();
        let swap = s.service.propose(&admin(), proposal(s.a, s.b), now).await.unwrap();
        s.service
            .respond(&driver_actor(s.b), swap.id, SwapDecision::Accept, now)
            .await
            .unwrap();

        let sweep = s.service.sweep_due(swap.window_end).await.unwrap();
        assert_eq!(sweep.ended, 1);
        let ended = s.service.get(swap.id).await.unwrap();
        assert_eq!(ended.end_note.as_deref(), Some(WINDOW_CLOSED_NOTE));
        assert_eq!(s.stores.primary.snapshot().await.drivers[&s.a].vehicle_id, Some(s.van_a));

        let record = s.stores.coordinator.record(swap.operation_id).await.unwrap().unwrap();
        assert_eq!(record.status, AuditStatus::RolledBack);
        assert_eq!(record.rolled_back_by.as_deref(), Some("system"));

        // Ya terminado: el siguiente barrido no lo ve
        assert_eq!(s.service.sweep_due(swap.window_end).await.unwrap(), SwapSweep::default());
    }
}
