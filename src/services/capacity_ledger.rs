//! Ledger de capacidad
//!
//! Contadores de ocupación por turno de cada vehículo. Un pasajero `Both`
//! consume una plaza en cada contador y ambos se comprueban e incrementan
//! como una unidad.
//!
//! `CapacityLedger` es una vista de solo lectura sobre un snapshot.
//! `LedgerDraft` es una copia de trabajo que usan el planificador y los
//! constructores de planes; nunca escribe en el store.

use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::{FleetSnapshot, Shift, ShiftLoad, ValidationIssue, Vehicle};

/// Carga resultante de aplicar `delta` pasajeros de `shift`, o `None` si
/// algún contador quedaría negativo
fn shifted(load: ShiftLoad, shift: Shift, delta: i64) -> Option<ShiftLoad> {
    let (morning, evening) = shift.slots();
    let morning_count = i64::from(load.morning_count) + i64::from(morning) * delta;
    let evening_count = i64::from(load.evening_count) + i64::from(evening) * delta;
    Some(ShiftLoad::new(
        u32::try_from(morning_count).ok()?,
        u32::try_from(evening_count).ok()?,
    ))
}

fn fits(vehicle: &Vehicle, load: ShiftLoad) -> bool {
    load.morning_count <= vehicle.morning_capacity && load.evening_count <= vehicle.evening_capacity
}

/// Plazas libres de un vehículo para pasajeros de `shift`
pub fn remaining_for(vehicle: &Vehicle, shift: Shift) -> u32 {
    let morning = vehicle.morning_capacity.saturating_sub(vehicle.morning_count);
    let evening = vehicle.evening_capacity.saturating_sub(vehicle.evening_count);
    match shift {
        Shift::Morning => morning,
        Shift::Evening => evening,
        Shift::Both => morning.min(evening),
    }
}

/// Problemas de capacidad de un estado de vehículo
pub fn capacity_issues(vehicle: &Vehicle) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if vehicle.morning_count > vehicle.morning_capacity {
        issues.push(ValidationIssue::CapacityExceeded {
            vehicle_id: vehicle.id,
            shift: Shift::Morning,
        });
    }
    if vehicle.evening_count > vehicle.evening_capacity {
        issues.push(ValidationIssue::CapacityExceeded {
            vehicle_id: vehicle.id,
            shift: Shift::Evening,
        });
    }
    issues
}

/// Vista de solo lectura del ledger
pub struct CapacityLedger<'a> {
    snapshot: &'a FleetSnapshot,
}

impl<'a> CapacityLedger<'a> {
    pub fn new(snapshot: &'a FleetSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn current_load(&self, vehicle_id: Uuid) -> Option<ShiftLoad> {
        self.snapshot.vehicles.get(&vehicle_id).map(Vehicle::load)
    }

    /// `delta` pasajeros de `shift` caben en el vehículo
    pub fn would_fit(&self, vehicle_id: Uuid, shift: Shift, delta: u32) -> bool {
        self.snapshot
            .vehicles
            .get(&vehicle_id)
            .and_then(|v| shifted(v.load(), shift, i64::from(delta)).map(|load| fits(v, load)))
            .unwrap_or(false)
    }

    pub fn remaining(&self, vehicle_id: Uuid, shift: Shift) -> u32 {
        self.snapshot
            .vehicles
            .get(&vehicle_id)
            .map(|v| remaining_for(v, shift))
            .unwrap_or(0)
    }
}

/// Copia de trabajo de los vehículos con sus contadores
#[derive(Debug, Clone)]
pub struct LedgerDraft {
    vehicles: BTreeMap<Uuid, Vehicle>,
}

impl LedgerDraft {
    pub fn from_snapshot(snapshot: &FleetSnapshot) -> Self {
        Self {
            vehicles: snapshot.vehicles.clone(),
        }
    }

    pub fn vehicle(&self, vehicle_id: Uuid) -> Option<&Vehicle> {
        self.vehicles.get(&vehicle_id)
    }

    pub fn remaining(&self, vehicle_id: Uuid, shift: Shift) -> u32 {
        self.vehicle(vehicle_id).map(|v| remaining_for(v, shift)).unwrap_or(0)
    }

    /// Sumar un pasajero. Si algún contador se pasaría de su capacidad no se
    /// toca ninguno.
    pub fn admit(&mut self, vehicle_id: Uuid, shift: Shift) -> Result<(), ValidationIssue> {
        let vehicle = self
            .vehicles
            .get_mut(&vehicle_id)
            .ok_or(ValidationIssue::UnknownEntity { entity_id: vehicle_id })?;

        let load = shifted(vehicle.load(), shift, 1).ok_or(ValidationIssue::CapacityExceeded {
            vehicle_id,
            shift,
        })?;
        if load.morning_count > vehicle.morning_capacity {
            return Err(ValidationIssue::CapacityExceeded {
                vehicle_id,
                shift: Shift::Morning,
            });
        }
        if load.evening_count > vehicle.evening_capacity {
            return Err(ValidationIssue::CapacityExceeded {
                vehicle_id,
                shift: Shift::Evening,
            });
        }

        vehicle.morning_count = load.morning_count;
        vehicle.evening_count = load.evening_count;
        Ok(())
    }

    /// Restar un pasajero. Un contador ya en cero queda en cero.
    pub fn release(&mut self, vehicle_id: Uuid, shift: Shift) {
        if let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) {
            let (morning, evening) = shift.slots();
            vehicle.morning_count = vehicle.morning_count.saturating_sub(morning);
            vehicle.evening_count = vehicle.evening_count.saturating_sub(evening);
        }
    }

    /// Vehículos cuyo estado difiere del snapshot original
    pub fn changed_vehicles<'a>(
        &'a self,
        snapshot: &'a FleetSnapshot,
    ) -> impl Iterator<Item = (&'a Vehicle, &'a Vehicle)> + 'a {
        self.vehicles.values().filter_map(move |draft| {
            snapshot
                .vehicles
                .get(&draft.id)
                .filter(|original| *original != draft)
                .map(|original| (original, draft))
        })
    }
}

/// Recontar las cargas a partir de los pasajeros asignados
pub fn recount_loads(snapshot: &FleetSnapshot) -> BTreeMap<Uuid, ShiftLoad> {
    let mut loads: BTreeMap<Uuid, ShiftLoad> = snapshot
        .vehicles
        .keys()
        .map(|id| (*id, ShiftLoad::default()))
        .collect();

    for rider in snapshot.riders.values() {
        let Some(vehicle_id) = rider.vehicle_id else {
            continue;
        };
        if let Some(load) = loads.get_mut(&vehicle_id) {
            let (morning, evening) = rider.shift.slots();
            load.morning_count += morning;
            load.evening_count += evening;
        }
    }
    loads
}

/// Vehículo cuyos contadores no coinciden con el recuento
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityDrift {
    pub vehicle_id: Uuid,
    pub license_plate: String,
    pub recorded: ShiftLoad,
    pub recounted: ShiftLoad,
}

/// Informe de deriva del ledger; no corrige nada
pub fn drift_report(snapshot: &FleetSnapshot) -> Vec<CapacityDrift> {
    recount_loads(snapshot)
        .into_iter()
        .filter_map(|(vehicle_id, recounted)| {
            let vehicle = snapshot.vehicles.get(&vehicle_id)?;
            (vehicle.load() != recounted).then(|| CapacityDrift {
                vehicle_id,
                license_plate: vehicle.license_plate.clone(),
                recorded: vehicle.load(),
                recounted,
            })
        })
        .collect()
}
