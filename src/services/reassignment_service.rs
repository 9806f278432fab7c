//! Servicio de reasignaciones
//!
//! Prepara planes de pasajeros, conductores y rutas sobre un snapshot de la
//! flota, los guarda en el área de preparación y los entrega al coordinador
//! al confirmarlos. No escribe en el store primario por su cuenta.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::auto_split_planner::plan_split;
use super::candidate_selector::{CandidateGroup, VehicleFilter};
use super::capacity_ledger::{drift_report, CapacityDrift};
use super::commit_coordinator::{bounded, CommitCoordinator, CommitOutcome, CommitRequest, RollbackOutcome};
use super::permutation_resolver::{resolve, Move, ResolveError};
use super::plan_validator::validate_against_fleet;
use super::staging_area::{revalidate, StagingArea};
use crate::config::EngineConfig;
use crate::dto::reassignment_dto::{StageDriversRequest, StageResponse, StageRidersRequest, StageRoutesRequest};
use crate::models::{
    Actor, AuditRecord, AuditType, Driver, EntityChange, EntityState, FleetSnapshot, OperationId,
    OperationIdGenerator, ReassignmentPlan, Shift, UnassignableRider, ValidationIssue,
};
use crate::repositories::{PrimaryStore, StoreError};
use crate::utils::errors::{not_found_error, AppError, AppResult};

/// Límite por defecto de registros recientes
pub const DEFAULT_RECENT_LIMIT: usize = 50;

fn resolve_issue(error: ResolveError<Uuid>) -> ValidationIssue {
    match error {
        ResolveError::Conflicting(entity_id) => ValidationIssue::ConflictingMoves { entity_id },
        ResolveError::Stale(entity_id) => ValidationIssue::StaleMove { entity_id },
    }
}

fn issues_or<T>(issues: Vec<ValidationIssue>, value: T) -> AppResult<T> {
    if issues.is_empty() {
        Ok(value)
    } else {
        Err(AppError::Validation(issues))
    }
}

pub struct ReassignmentService {
    primary: Arc<dyn PrimaryStore>,
    coordinator: Arc<CommitCoordinator>,
    staging: StagingArea,
    ids: Arc<OperationIdGenerator>,
    store_timeout: std::time::Duration,
}

impl ReassignmentService {
    pub fn new(
        primary: Arc<dyn PrimaryStore>,
        coordinator: Arc<CommitCoordinator>,
        ids: Arc<OperationIdGenerator>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            primary,
            coordinator,
            staging: StagingArea::new(config.confirm_window),
            ids,
            store_timeout: config.store_timeout,
        }
    }

    async fn load_fleet(&self) -> AppResult<FleetSnapshot> {
        bounded(self.store_timeout, "fleet load", self.primary.load_fleet()).await
    }

    async fn stage_plan(
        &self,
        actor: &Actor,
        plan_type: AuditType,
        changes: Vec<EntityChange>,
        unassignable: Vec<UnassignableRider>,
        candidates: Vec<CandidateGroup>,
        now: DateTime<Utc>,
    ) -> AppResult<StageResponse> {
        let plan = ReassignmentPlan::new(
            self.ids.next(),
            plan_type,
            actor.clone(),
            changes,
            unassignable,
            now,
            self.staging.deadline(now),
        );
        if plan.is_empty() && plan.unassignable.is_empty() {
            return Err(AppError::validation(ValidationIssue::EmptyPlan));
        }

        info!(
            "📋 Plan {} ({}) preparado por {}: {} cambios, {} sin asignar",
            plan.operation_id,
            plan_type,
            actor.id,
            plan.changes.len(),
            plan.unassignable.len()
        );
        self.staging.stage(plan.clone(), now).await;
        Ok(StageResponse::new(plan, candidates))
    }

    /// Repartir pasajeros entre los vehículos elegibles
    pub async fn stage_riders(
        &self,
        actor: &Actor,
        request: StageRidersRequest,
        now: DateTime<Utc>,
    ) -> AppResult<StageResponse> {
        request.validate()?;
        let snapshot = self.load_fleet().await?;

        let filter = VehicleFilter {
            only: request.vehicle_ids.map(|ids| ids.into_iter().collect()),
            exclude: request.exclude_vehicle_ids.into_iter().collect(),
        };
        let split = plan_split(&snapshot, &request.rider_ids, &filter).map_err(AppError::Validation)?;
        issues_or(validate_against_fleet(&snapshot, &split.changes), ())?;

        self.stage_plan(actor, AuditType::Student, split.changes, split.unassignable, split.groups, now)
            .await
    }

    /// Mover conductores entre vehículos y la reserva
    pub async fn stage_drivers(
        &self,
        actor: &Actor,
        request: StageDriversRequest,
        now: DateTime<Utc>,
    ) -> AppResult<StageResponse> {
        request.validate()?;
        let snapshot = self.load_fleet().await?;
        let changes = driver_changes(&snapshot, &request)?;

        let moved: Vec<Uuid> = changes
            .iter()
            .filter_map(|c| match &c.after {
                EntityState::Driver(d) => Some(d.id),
                _ => None,
            })
            .collect();
        let open = bounded(self.store_timeout, "open swaps", self.primary.open_swaps_for(&moved)).await?;
        let mut issues: Vec<ValidationIssue> = moved
            .iter()
            .filter(|id| open.iter().any(|swap| swap.involves(**id)))
            .map(|id| ValidationIssue::DriverMidSwap { driver_id: *id })
            .collect();
        issues.extend(validate_against_fleet(&snapshot, &changes));
        issues_or(issues, ())?;

        self.stage_plan(actor, AuditType::Driver, changes, Vec::new(), Vec::new(), now)
            .await
    }

    /// Cambiar rutas, turnos o capacidades de vehículos
    pub async fn stage_routes(
        &self,
        actor: &Actor,
        request: StageRoutesRequest,
        now: DateTime<Utc>,
    ) -> AppResult<StageResponse> {
        request.validate()?;
        for change in &request.service_changes {
            change.validate()?;
        }
        let snapshot = self.load_fleet().await?;
        let changes = route_changes(&snapshot, &request)?;
        issues_or(validate_against_fleet(&snapshot, &changes), ())?;

        self.stage_plan(actor, AuditType::Route, changes, Vec::new(), Vec::new(), now)
            .await
    }

    /// Confirmar el plan preparado de la sesión
    pub async fn confirm(&self, actor: &Actor, operation_id: OperationId, now: DateTime<Utc>) -> AppResult<CommitOutcome> {
        let Some(plan) = self.staging.take(actor, operation_id, now).await else {
            // Confirmación repetida: el registro de auditoría manda
            if let Some(outcome) = self.coordinator.replay(operation_id, now).await? {
                return Ok(outcome);
            }
            return Err(AppError::NotFound(format!(
                "no staged plan {} for this session (expired or unknown)",
                operation_id
            )));
        };
        if plan.is_empty() {
            return Err(AppError::validation(ValidationIssue::EmptyPlan));
        }

        let fresh = match bounded(self.store_timeout, "fresh read", self.primary.read_entities(&plan.keys())).await {
            Ok(fresh) => fresh,
            Err(AppError::Store(StoreError::Missing(key))) => {
                return Err(AppError::StalePlan(format!("{} no longer exists", key)))
            }
            Err(e) => return Err(e),
        };
        revalidate(&plan, &fresh)?;

        self.coordinator
            .commit(
                CommitRequest {
                    operation_id,
                    audit_type: plan.plan_type,
                    actor: actor.clone(),
                    changes: plan.changes,
                },
                now,
            )
            .await
    }

    /// Descartar el plan preparado de la sesión
    pub async fn cancel(&self, actor: &Actor, operation_id: OperationId) -> AppResult<()> {
        if self.staging.cancel(actor, operation_id).await {
            info!("🗑️ Plan {} descartado por {}", operation_id, actor.id);
            Ok(())
        } else {
            Err(not_found_error("staged plan", &operation_id.to_string()))
        }
    }

    pub async fn rollback(&self, actor: &Actor, operation_id: OperationId) -> AppResult<RollbackOutcome> {
        self.coordinator.rollback(operation_id, actor).await
    }

    pub async fn get_record(&self, operation_id: OperationId) -> AppResult<AuditRecord> {
        self.coordinator
            .record(operation_id)
            .await?
            .ok_or_else(|| not_found_error("audit record", &operation_id.to_string()))
    }

    /// Registros recientes, de un tipo o de todos, del más nuevo al más viejo
    pub async fn recent(&self, audit_type: Option<AuditType>, limit: Option<usize>) -> AppResult<Vec<AuditRecord>> {
        let limit = limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        let types: Vec<AuditType> = match audit_type {
            Some(t) => vec![t],
            None => AuditType::ALL.to_vec(),
        };

        let per_type = futures::future::try_join_all(types.into_iter().map(|t| self.coordinator.recent(t, limit))).await?;
        let mut records: Vec<AuditRecord> = per_type.into_iter().flatten().collect();
        records.sort_by(|a, b| b.operation_id.cmp(&a.operation_id));
        records.truncate(limit);
        Ok(records)
    }

    /// Vehículos cuyos contadores no coinciden con sus pasajeros
    pub async fn drift(&self) -> AppResult<Vec<CapacityDrift>> {
        let snapshot = self.load_fleet().await?;
        Ok(drift_report(&snapshot))
    }

    pub async fn purge_staged(&self, now: DateTime<Utc>) -> usize {
        self.staging.purge_expired(now).await
    }
}

/// Cambios de conductores y de las referencias de sus vehículos
fn driver_changes(snapshot: &FleetSnapshot, request: &StageDriversRequest) -> AppResult<Vec<EntityChange>> {
    let mut initial: BTreeMap<Uuid, Option<Uuid>> = BTreeMap::new();
    let mut issues = Vec::new();
    for mv in &request.moves {
        match snapshot.drivers.get(&mv.driver_id) {
            Some(driver) => {
                initial.insert(driver.id, driver.vehicle_id);
            }
            None => issues.push(ValidationIssue::UnknownEntity { entity_id: mv.driver_id }),
        }
        if let Some(to) = mv.to_vehicle_id {
            if !snapshot.vehicles.contains_key(&to) {
                issues.push(ValidationIssue::UnknownEntity { entity_id: to });
            }
        }
    }
    issues_or(issues, ())?;

    let moves: Vec<Move<Uuid, Option<Uuid>>> = request
        .moves
        .iter()
        .map(|mv| {
            let current = initial.get(&mv.driver_id).copied().flatten();
            Move::new(mv.driver_id, mv.from_vehicle_id.unwrap_or(current), mv.to_vehicle_id)
        })
        .collect();
    let resolved = resolve(&initial, &moves).map_err(|e| AppError::validation(resolve_issue(e)))?;

    // El vehículo es dueño de la referencia: primero se liberan los que se
    // van, después se ocupan los destinos
    let mut assigned: BTreeMap<Uuid, Option<Uuid>> = snapshot
        .vehicles
        .values()
        .map(|v| (v.id, v.assigned_driver_id))
        .collect();
    for driver_id in resolved.keys() {
        if let Some(from) = snapshot.drivers[driver_id].vehicle_id {
            if assigned.get(&from) == Some(&Some(*driver_id)) {
                assigned.insert(from, None);
            }
        }
    }
    let mut issues = Vec::new();
    for (driver_id, to) in &resolved {
        let Some(to) = to else { continue };
        match assigned.get(to).copied().flatten() {
            Some(other) if other != *driver_id => issues.push(ValidationIssue::VehicleDoubleBooked { vehicle_id: *to }),
            _ => {
                assigned.insert(*to, Some(*driver_id));
            }
        }
    }
    issues_or(issues, ())?;

    let mut changes: Vec<EntityChange> = resolved
        .iter()
        .map(|(driver_id, to)| {
            let before = snapshot.drivers[driver_id].clone();
            let after = Driver {
                vehicle_id: *to,
                status: Driver::status_for(*to),
                ..before.clone()
            };
            EntityChange {
                before: EntityState::Driver(before),
                after: EntityState::Driver(after),
            }
        })
        .collect();
    changes.extend(snapshot.vehicles.values().filter_map(|vehicle| {
        let driver = assigned.get(&vehicle.id).copied().flatten();
        (driver != vehicle.assigned_driver_id).then(|| {
            let mut after = vehicle.clone();
            after.assigned_driver_id = driver;
            EntityChange {
                before: EntityState::Vehicle(vehicle.clone()),
                after: EntityState::Vehicle(after),
            }
        })
    }));
    Ok(changes)
}

/// Cambios de ruta y de servicio de vehículos
fn route_changes(snapshot: &FleetSnapshot, request: &StageRoutesRequest) -> AppResult<Vec<EntityChange>> {
    let mut issues = Vec::new();
    let mut initial: BTreeMap<Uuid, Uuid> = BTreeMap::new();
    for mv in &request.moves {
        match snapshot.vehicles.get(&mv.vehicle_id) {
            Some(vehicle) => {
                initial.insert(vehicle.id, vehicle.route_id);
            }
            None => issues.push(ValidationIssue::UnknownEntity { entity_id: mv.vehicle_id }),
        }
        if !snapshot.routes.contains_key(&mv.to_route_id) {
            issues.push(ValidationIssue::UnknownEntity { entity_id: mv.to_route_id });
        }
    }
    let mut serviced = BTreeSet::new();
    for change in &request.service_changes {
        if !snapshot.vehicles.contains_key(&change.vehicle_id) {
            issues.push(ValidationIssue::UnknownEntity { entity_id: change.vehicle_id });
        } else if !serviced.insert(change.vehicle_id) {
            issues.push(ValidationIssue::ConflictingMoves { entity_id: change.vehicle_id });
        }
    }
    issues_or(issues, ())?;

    let moves: Vec<Move<Uuid, Uuid>> = request
        .moves
        .iter()
        .map(|mv| {
            let current = initial[&mv.vehicle_id];
            Move::new(mv.vehicle_id, mv.from_route_id.unwrap_or(current), mv.to_route_id)
        })
        .collect();
    let resolved = resolve(&initial, &moves).map_err(|e| AppError::validation(resolve_issue(e)))?;

    let mut after: BTreeMap<Uuid, crate::models::Vehicle> = BTreeMap::new();
    for (vehicle_id, route_id) in &resolved {
        let mut vehicle = snapshot.vehicles[vehicle_id].clone();
        vehicle.route_id = *route_id;
        after.insert(*vehicle_id, vehicle);
    }
    for change in &request.service_changes {
        let vehicle = after
            .entry(change.vehicle_id)
            .or_insert_with(|| snapshot.vehicles[&change.vehicle_id].clone());
        vehicle.shift = change.shift;
        vehicle.morning_capacity = change.morning_capacity.unwrap_or(vehicle.morning_capacity);
        vehicle.evening_capacity = match change.shift {
            Shift::Morning => 0,
            _ => change.evening_capacity.unwrap_or(vehicle.evening_capacity),
        };
    }

    Ok(after
        .into_values()
        .map(|vehicle| EntityChange {
            before: EntityState::Vehicle(snapshot.vehicles[&vehicle.id].clone()),
            after: EntityState::Vehicle(vehicle),
        })
        .collect())
}
