//! Selector de candidatos
//!
//! Agrupa pasajeros por (punto de recogida, turno) y lista, para cada grupo,
//! los vehículos elegibles con sus plazas libres.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::capacity_ledger::remaining_for;
use crate::models::{FleetSnapshot, Rider, Shift, Vehicle};

/// Clave de grupo
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub pickup_point_id: Uuid,
    pub shift: Shift,
}

impl GroupKey {
    pub fn of(rider: &Rider) -> Self {
        Self {
            pickup_point_id: rider.pickup_point_id,
            shift: rider.shift,
        }
    }
}

/// Vehículo elegible para un grupo
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub vehicle_id: Uuid,
    pub license_plate: String,
    pub vehicle_shift: Shift,
    /// Plazas libres para el turno del grupo
    pub remaining: u32,
    pub remaining_morning: u32,
    pub remaining_evening: u32,
}

impl Candidate {
    fn of(vehicle: &Vehicle, shift: Shift) -> Self {
        Self {
            vehicle_id: vehicle.id,
            license_plate: vehicle.license_plate.clone(),
            vehicle_shift: vehicle.shift,
            remaining: remaining_for(vehicle, shift),
            remaining_morning: remaining_for(vehicle, Shift::Morning),
            remaining_evening: remaining_for(vehicle, Shift::Evening),
        }
    }
}

/// Grupo de pasajeros con sus candidatos ordenados
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CandidateGroup {
    pub pickup_point_id: Uuid,
    pub shift: Shift,
    pub rider_ids: Vec<Uuid>,
    pub candidates: Vec<Candidate>,
}

/// Restricciones sobre el universo de vehículos
#[derive(Debug, Clone, Default)]
pub struct VehicleFilter {
    /// Si está presente, solo estos vehículos
    pub only: Option<BTreeSet<Uuid>>,
    pub exclude: BTreeSet<Uuid>,
}

impl VehicleFilter {
    pub fn allows(&self, vehicle_id: Uuid) -> bool {
        !self.exclude.contains(&vehicle_id)
            && self.only.as_ref().map_or(true, |only| only.contains(&vehicle_id))
    }
}

/// Agrupar pasajeros; cada grupo queda ordenado por id
pub fn group_riders<'a>(riders: impl IntoIterator<Item = &'a Rider>) -> BTreeMap<GroupKey, Vec<&'a Rider>> {
    let mut groups: BTreeMap<GroupKey, Vec<&Rider>> = BTreeMap::new();
    for rider in riders {
        groups.entry(GroupKey::of(rider)).or_default().push(rider);
    }
    for members in groups.values_mut() {
        members.sort_by_key(|r| r.id);
    }
    groups
}

/// Vehículos elegibles para un grupo, de más a menos plazas libres
///
/// Un vehículo es elegible si su ruta pasa por el punto de recogida, su
/// turno sirve al del grupo, no tiene un viaje en curso y le queda al menos
/// una plaza.
pub fn eligible_vehicles(snapshot: &FleetSnapshot, key: GroupKey, filter: &VehicleFilter) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = snapshot
        .vehicles
        .values()
        .filter(|v| filter.allows(v.id))
        .filter(|v| !v.trip_active)
        .filter(|v| v.shift.serves(key.shift))
        .filter(|v| {
            snapshot
                .route_of(v)
                .is_some_and(|route| route.serves(key.pickup_point_id))
        })
        .map(|v| Candidate::of(v, key.shift))
        .filter(|c| c.remaining > 0)
        .collect();

    candidates.sort_by(|a, b| b.remaining.cmp(&a.remaining).then(a.vehicle_id.cmp(&b.vehicle_id)));
    candidates
}

/// Grupos con candidatos para un conjunto de pasajeros del snapshot
pub fn select_candidates<'a>(
    snapshot: &FleetSnapshot,
    riders: impl IntoIterator<Item = &'a Rider>,
    filter: &VehicleFilter,
) -> Vec<CandidateGroup> {
    group_riders(riders)
        .into_iter()
        .map(|(key, members)| CandidateGroup {
            pickup_point_id: key.pickup_point_id,
            shift: key.shift,
            rider_ids: members.iter().map(|r| r.id).collect(),
            candidates: eligible_vehicles(snapshot, key, filter),
        })
        .collect()
}
