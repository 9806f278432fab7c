//! Planes de reasignación
//!
//! Un plan es un mapa entidad → {estado inicial, estado final propuesto} más
//! el `operation_id` generado al prepararlo. Nunca se persiste en el store
//! primario.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::actor::Actor;
use super::audit::AuditType;
use super::driver::Driver;
use super::rider::Rider;
use super::shift::Shift;
use super::vehicle::Vehicle;

/// Clave de idempotencia de una operación
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(OperationId)
    }
}

/// Generador de `OperationId` estrictamente crecientes
///
/// Usa el reloj en microsegundos como suelo, de modo que los ids siguen
/// creciendo tras un reinicio del proceso.
#[derive(Debug, Default)]
pub struct OperationIdGenerator {
    last: AtomicU64,
}

impl OperationIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> OperationId {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let mut current = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return OperationId(candidate),
                Err(actual) => current = actual,
            }
        }
    }
}

/// Clave de una entidad del store primario
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityKey {
    Vehicle(Uuid),
    Rider(Uuid),
    Driver(Uuid),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Vehicle(id) => write!(f, "vehicle:{}", id),
            EntityKey::Rider(id) => write!(f, "rider:{}", id),
            EntityKey::Driver(id) => write!(f, "driver:{}", id),
        }
    }
}

/// Documento completo de una entidad
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EntityState {
    Vehicle(Vehicle),
    Rider(Rider),
    Driver(Driver),
}

impl EntityState {
    pub fn key(&self) -> EntityKey {
        match self {
            EntityState::Vehicle(v) => EntityKey::Vehicle(v.id),
            EntityState::Rider(r) => EntityKey::Rider(r.id),
            EntityState::Driver(d) => EntityKey::Driver(d.id),
        }
    }
}

/// Cambio de una entidad: estado inicial y estado final propuesto
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChange {
    pub before: EntityState,
    pub after: EntityState,
}

impl EntityChange {
    pub fn key(&self) -> EntityKey {
        self.before.key()
    }

    pub fn is_noop(&self) -> bool {
        self.before == self.after
    }
}

/// Escritura con precondición optimista: `expected` debe seguir siendo el
/// estado actual para que se aplique `new`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrite {
    pub expected: EntityState,
    pub new: EntityState,
}

impl EntityWrite {
    pub fn key(&self) -> EntityKey {
        self.expected.key()
    }
}

/// Pasajero que no cabe en ningún vehículo elegible
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnassignableRider {
    pub rider_id: Uuid,
    pub pickup_point_id: Uuid,
    pub shift: Shift,
    pub reason: String,
}

/// Plan preparado, pendiente de confirmación
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReassignmentPlan {
    pub operation_id: OperationId,
    pub plan_type: AuditType,
    pub actor: Actor,
    /// Ordenados por clave, sin cambios vacíos
    pub changes: Vec<EntityChange>,
    pub unassignable: Vec<UnassignableRider>,
    pub snapshot_checksum: String,
    pub staged_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ReassignmentPlan {
    /// Construir un plan descartando no-ops y ordenando por clave
    pub fn new(
        operation_id: OperationId,
        plan_type: AuditType,
        actor: Actor,
        changes: Vec<EntityChange>,
        unassignable: Vec<UnassignableRider>,
        staged_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let mut changes: Vec<EntityChange> = changes.into_iter().filter(|c| !c.is_noop()).collect();
        changes.sort_by_key(|c| c.key());
        let snapshot_checksum = snapshot_checksum(changes.iter().map(|c| &c.before));
        Self {
            operation_id,
            plan_type,
            actor,
            changes,
            unassignable,
            snapshot_checksum,
            staged_at,
            expires_at,
        }
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.changes.iter().map(|c| c.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Escrituras que aplican el plan
    pub fn writes(&self) -> Vec<EntityWrite> {
        self.changes
            .iter()
            .map(|c| EntityWrite {
                expected: c.before.clone(),
                new: c.after.clone(),
            })
            .collect()
    }
}

/// Checksum md5 del JSON canónico de un conjunto de estados
pub fn snapshot_checksum<'a>(states: impl IntoIterator<Item = &'a EntityState>) -> String {
    let states: Vec<&EntityState> = states.into_iter().collect();
    let canonical = serde_json::to_vec(&states).unwrap_or_default();
    format!("{:x}", md5::compute(canonical))
}

/// Problemas de validación detectados antes de cualquier escritura
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationIssue {
    #[error("vehicle {vehicle_id} has no {shift} seat left")]
    CapacityExceeded { vehicle_id: Uuid, shift: Shift },

    #[error("vehicle {vehicle_id} ({vehicle_shift}) cannot carry {rider_shift} riders")]
    ShiftIncompatible {
        vehicle_id: Uuid,
        vehicle_shift: Shift,
        rider_shift: Shift,
    },

    #[error("route of vehicle {vehicle_id} does not serve pickup point {pickup_point_id}")]
    PickupNotOnRoute { vehicle_id: Uuid, pickup_point_id: Uuid },

    #[error("vehicle {vehicle_id} has an active trip")]
    ActiveTrip { vehicle_id: Uuid },

    #[error("driver {driver_id} is already part of a swap")]
    DriverMidSwap { driver_id: Uuid },

    #[error("vehicle {vehicle_id} would end up with more than one driver")]
    VehicleDoubleBooked { vehicle_id: Uuid },

    #[error("vehicle {vehicle_id} still has {members} {shift} members")]
    ShiftRemovalBlocked { vehicle_id: Uuid, shift: Shift, members: u32 },

    #[error("vehicle {vehicle_id} cannot be evening-only")]
    EveningOnlyVehicle { vehicle_id: Uuid },

    #[error("conflicting moves proposed for {entity_id}")]
    ConflictingMoves { entity_id: Uuid },

    #[error("move for {entity_id} does not start from its current assignment")]
    StaleMove { entity_id: Uuid },

    #[error("unknown entity {entity_id}")]
    UnknownEntity { entity_id: Uuid },

    #[error("driver {driver_id} is not {expected}")]
    DriverStatusMismatch { driver_id: Uuid, expected: String },

    #[error("nothing to change")]
    EmptyPlan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_ids_strictly_increase() {
        let generator = OperationIdGenerator::new();
        let mut last = generator.next();
        for _ in 0..1000 {
            let next = generator.next();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_operation_id_round_trips_through_string() {
        let id = OperationId(1_700_000_000_000_001);
        assert_eq!(id.to_string().parse::<OperationId>().unwrap(), id);
    }

    #[test]
    fn test_checksum_depends_on_content() {
        let rider = Rider {
            id: Uuid::new_v4(),
            full_name: "Ana".to_string(),
            shift: Shift::Morning,
            pickup_point_id: Uuid::new_v4(),
            vehicle_id: None,
        };
        let a = EntityState::Rider(rider.clone());
        let mut moved = rider;
        moved.vehicle_id = Some(Uuid::new_v4());
        let b = EntityState::Rider(moved);

        assert_eq!(snapshot_checksum([&a]), snapshot_checksum([&a]));
        assert_ne!(snapshot_checksum([&a]), snapshot_checksum([&b]));
    }
}
