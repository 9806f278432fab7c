//! Fixtures de tests
//!
//! Constructor de flotas pequeñas y stores en memoria listos para usar.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    Actor, Driver, DriverStatus, EntityChange, EntityKey, EntityState, EntityWrite, FleetSnapshot, Rider,
    Role, Route, Shift, SwapRequest, SwapState, Vehicle,
};
use crate::repositories::{MemoryAuditStore, MemoryPrimaryStore, PrimaryStore, StoreError};
use crate::services::capacity_ledger::{recount_loads, LedgerDraft};
use crate::services::commit_coordinator::CommitCoordinator;

/// Constructor de flotas para tests
#[derive(Debug, Default)]
pub struct FleetBuilder {
    routes: BTreeMap<Uuid, Route>,
    vehicles: BTreeMap<Uuid, Vehicle>,
    riders: Vec<Rider>,
    drivers: Vec<Driver>,
}

impl FleetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ruta con `pickups` puntos de recogida
    pub fn route(&mut self, pickups: usize) -> Uuid {
        let id = Uuid::new_v4();
        self.routes.insert(
            id,
            Route {
                id,
                name: format!("Ruta {}", self.routes.len() + 1),
                pickup_point_ids: (0..pickups).map(|_| Uuid::new_v4()).collect(),
            },
        );
        id
    }

    pub fn pickup(&self, route_id: Uuid, index: usize) -> Uuid {
        self.routes[&route_id].pickup_point_ids[index]
    }

    pub fn vehicle(&mut self, route_id: Uuid, shift: Shift, morning_capacity: u32, evening_capacity: u32) -> Uuid {
        let id = Uuid::new_v4();
        self.vehicles.insert(
            id,
            Vehicle {
                id,
                license_plate: format!("VAN-{:03}", self.vehicles.len() + 1),
                route_id,
                shift,
                morning_capacity,
                evening_capacity,
                morning_count: 0,
                evening_count: 0,
                assigned_driver_id: None,
                trip_active: false,
            },
        );
        id
    }

    pub fn rider(&mut self, shift: Shift, pickup_point_id: Uuid, vehicle_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.riders.push(Rider {
            id,
            full_name: format!("Pasajero {}", self.riders.len() + 1),
            shift,
            pickup_point_id,
            vehicle_id,
        });
        id
    }

    /// Conductor, activo en `vehicle_id` o en reserva
    pub fn driver(&mut self, vehicle_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        if let Some(vehicle) = vehicle_id.and_then(|v| self.vehicles.get_mut(&v)) {
            vehicle.assigned_driver_id = Some(id);
        }
        self.drivers.push(Driver {
            id,
            full_name: format!("Conductor {}", self.drivers.len() + 1),
            status: Driver::status_for(vehicle_id),
            vehicle_id,
        });
        id
    }

    pub fn start_trip(&mut self, vehicle_id: Uuid) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
            vehicle.trip_active = true;
        }
    }

    /// Snapshot con las cargas recontadas
    pub fn build(&self) -> FleetSnapshot {
        let mut snapshot = FleetSnapshot::from_parts(
            self.vehicles.values().cloned().collect(),
            self.routes.values().cloned().collect(),
            self.riders.clone(),
            self.drivers.clone(),
        );
        for (vehicle_id, load) in recount_loads(&snapshot) {
            if let Some(vehicle) = snapshot.vehicles.get_mut(&vehicle_id) {
                vehicle.morning_count = load.morning_count;
                vehicle.evening_count = load.evening_count;
            }
        }
        snapshot
    }
}

pub fn admin() -> Actor {
    Actor::new("admin-1", Role::Admin)
}

pub fn driver_actor(driver_id: Uuid) -> Actor {
    Actor::new(driver_id.to_string(), Role::Driver)
}

pub fn is_reserved(snapshot: &FleetSnapshot, driver_id: Uuid) -> bool {
    snapshot.drivers[&driver_id].status == DriverStatus::Reserved
}

/// Cambios de mover un pasajero a `to`, con los contadores de ambos vehículos
pub fn rider_move(snapshot: &FleetSnapshot, rider_id: Uuid, to: Uuid) -> Vec<EntityChange> {
    let rider = snapshot.riders[&rider_id].clone();
    let mut draft = LedgerDraft::from_snapshot(snapshot);
    if let Some(from) = rider.vehicle_id {
        draft.release(from, rider.shift);
    }
    // sin comprobar capacidad: algunos tests necesitan planes inválidos
    if draft.admit(to, rider.shift).is_err() {
        let mut over = snapshot.vehicles[&to].clone();
        let (morning, evening) = rider.shift.slots();
        over.morning_count += morning;
        over.evening_count += evening;
        let mut moved = rider.clone();
        moved.vehicle_id = Some(to);
        return vec![
            EntityChange {
                before: EntityState::Rider(rider),
                after: EntityState::Rider(moved),
            },
            EntityChange {
                before: EntityState::Vehicle(snapshot.vehicles[&to].clone()),
                after: EntityState::Vehicle(over),
            },
        ];
    }

    let mut moved = rider.clone();
    moved.vehicle_id = Some(to);
    let mut changes = vec![EntityChange {
        before: EntityState::Rider(rider),
        after: EntityState::Rider(moved),
    }];
    changes.extend(draft.changed_vehicles(snapshot).map(|(before, after)| EntityChange {
        before: EntityState::Vehicle(before.clone()),
        after: EntityState::Vehicle(after.clone()),
    }));
    changes
}

/// Stores en memoria y coordinador sobre ellos
pub struct TestStores {
    pub primary: MemoryPrimaryStore,
    pub audit: MemoryAuditStore,
    pub coordinator: Arc<CommitCoordinator>,
    pub config: EngineConfig,
}

pub fn stores(snapshot: FleetSnapshot) -> TestStores {
    let config = EngineConfig::default();
    let primary = MemoryPrimaryStore::new(snapshot);
    let audit = MemoryAuditStore::default();
    let coordinator = Arc::new(CommitCoordinator::new(
        Arc::new(primary.clone()),
        Arc::new(audit.clone()),
        &config,
    ));
    TestStores {
        primary,
        audit,
        coordinator,
        config,
    }
}

/// Config con 50ms por llamada a un store
pub fn short_timeout() -> EngineConfig {
    EngineConfig {
        store_timeout: std::time::Duration::from_millis(50),
        ..EngineConfig::default()
    }
}

/// Cómo responde `apply` de un `FlakyStore` cuando no quedan conflictos
#[derive(Debug, Clone, Copy)]
pub enum Stall {
    No,
    /// No responde; la transacción se confirma en el servidor tras el retardo
    LandsAfter(std::time::Duration),
    /// No responde y nunca se confirma
    Lost,
}

/// Store primario que devuelve conflictos de serialización las primeras
/// veces y puede quedarse colgado en `apply`
pub struct FlakyStore {
    inner: MemoryPrimaryStore,
    conflicts: AtomicU32,
    stall: Stall,
}

impl FlakyStore {
    pub fn new(inner: &MemoryPrimaryStore, conflicts: u32, stall: Stall) -> Self {
        Self {
            inner: inner.clone(),
            conflicts: AtomicU32::new(conflicts),
            stall,
        }
    }
}

#[async_trait]
impl PrimaryStore for FlakyStore {
    async fn load_fleet(&self) -> Result<FleetSnapshot, StoreError> {
        self.inner.load_fleet().await
    }
    async fn read_entities(&self, keys: &[EntityKey]) -> Result<Vec<EntityState>, StoreError> {
        self.inner.read_entities(keys).await
    }
    async fn apply(&self, writes: &[EntityWrite]) -> Result<(), StoreError> {
        let left = self.conflicts.load(Ordering::SeqCst);
        if left > 0 {
            self.conflicts.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::SerializationConflict);
        }
        match self.stall {
            Stall::No => self.inner.apply(writes).await,
            Stall::LandsAfter(delay) => {
                let inner = self.inner.clone();
                let writes = writes.to_vec();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = inner.apply(&writes).await;
                });
                std::future::pending::<Result<(), StoreError>>().await
            }
            Stall::Lost => std::future::pending::<Result<(), StoreError>>().await,
        }
    }
    async fn insert_swap(&self, swap: &SwapRequest) -> Result<(), StoreError> {
        self.inner.insert_swap(swap).await
    }
    async fn get_swap(&self, id: Uuid) -> Result<Option<SwapRequest>, StoreError> {
        self.inner.get_swap(id).await
    }
    async fn update_swap(&self, swap: &SwapRequest, expected: SwapState) -> Result<bool, StoreError> {
        self.inner.update_swap(swap, expected).await
    }
    async fn delete_swap(&self, id: Uuid, expected: SwapState) -> Result<bool, StoreError> {
        self.inner.delete_swap(id, expected).await
    }
    async fn open_swaps_for(&self, driver_ids: &[Uuid]) -> Result<Vec<SwapRequest>, StoreError> {
        self.inner.open_swaps_for(driver_ids).await
    }
    async fn due_swaps(&self, now: DateTime<Utc>) -> Result<Vec<SwapRequest>, StoreError> {
        self.inner.due_swaps(now).await
    }
}
