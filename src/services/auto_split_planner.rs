//! Planificador de reparto automático
//!
//! Reparte de forma voraz los pasajeros de cada grupo entre sus vehículos
//! elegibles, en orden de plazas libres, hasta agotar el grupo o las plazas.
//! Los grupos son independientes. Lo que no cabe sale como `unassignable`.
//! Trabaja sobre un snapshot y una copia del ledger; no escribe nada.

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;
use uuid::Uuid;

use super::candidate_selector::{select_candidates, CandidateGroup, VehicleFilter};
use super::capacity_ledger::LedgerDraft;
use crate::models::{
    EntityChange, EntityState, FleetSnapshot, Rider, UnassignableRider, ValidationIssue,
};

/// Resultado del reparto
#[derive(Debug, Clone, Serialize)]
pub struct SplitPlan {
    pub changes: Vec<EntityChange>,
    pub unassignable: Vec<UnassignableRider>,
    pub groups: Vec<CandidateGroup>,
}

pub const ACTIVE_TRIP_REASON: &str = "current vehicle has an active trip";

/// El vehículo actual del pasajero sigue siendo válido para él
fn keeps_current_vehicle(snapshot: &FleetSnapshot, rider: &Rider, filter: &VehicleFilter) -> bool {
    rider
        .vehicle_id
        .and_then(|id| snapshot.vehicles.get(&id))
        .is_some_and(|vehicle| {
            filter.allows(vehicle.id)
                && vehicle.shift.serves(rider.shift)
                && snapshot
                    .route_of(vehicle)
                    .is_some_and(|route| route.serves(rider.pickup_point_id))
        })
}

/// Un vehículo en viaje no puede perder pasajeros
fn on_active_trip(snapshot: &FleetSnapshot, rider: &Rider) -> bool {
    rider
        .vehicle_id
        .and_then(|id| snapshot.vehicles.get(&id))
        .is_some_and(|vehicle| vehicle.trip_active)
}

/// Repartir `rider_ids` entre los vehículos permitidos por `filter`
pub fn plan_split(
    snapshot: &FleetSnapshot,
    rider_ids: &[Uuid],
    filter: &VehicleFilter,
) -> Result<SplitPlan, Vec<ValidationIssue>> {
    let requested: BTreeSet<Uuid> = rider_ids.iter().copied().collect();
    let unknown: Vec<ValidationIssue> = requested
        .iter()
        .filter(|id| !snapshot.riders.contains_key(id))
        .map(|id| ValidationIssue::UnknownEntity { entity_id: *id })
        .collect();
    if !unknown.is_empty() {
        return Err(unknown);
    }

    let riders: Vec<&Rider> = requested.iter().filter_map(|id| snapshot.riders.get(id)).collect();
    let groups = select_candidates(snapshot, riders.iter().copied(), filter);

    let mut draft = LedgerDraft::from_snapshot(snapshot);
    let mut changes = Vec::new();
    let mut unassignable = Vec::new();

    for group in &groups {
        for rider_id in &group.rider_ids {
            let Some(rider) = snapshot.riders.get(rider_id) else {
                continue;
            };
            if keeps_current_vehicle(snapshot, rider, filter) {
                continue;
            }
            if on_active_trip(snapshot, rider) {
                unassignable.push(UnassignableRider {
                    rider_id: rider.id,
                    pickup_point_id: rider.pickup_point_id,
                    shift: rider.shift,
                    reason: ACTIVE_TRIP_REASON.to_string(),
                });
                continue;
            }

            let target = group
                .candidates
                .iter()
                .map(|c| c.vehicle_id)
                .filter(|vehicle_id| Some(*vehicle_id) != rider.vehicle_id)
                .find(|vehicle_id| draft.admit(*vehicle_id, rider.shift).is_ok());

            match target {
                Some(vehicle_id) => {
                    if let Some(source) = rider.vehicle_id {
                        draft.release(source, rider.shift);
                    }
                    let mut moved = rider.clone();
                    moved.vehicle_id = Some(vehicle_id);
                    changes.push(EntityChange {
                        before: EntityState::Rider(rider.clone()),
                        after: EntityState::Rider(moved),
                    });
                }
                None => {
                    let reason = if group.candidates.is_empty() {
                        "no eligible vehicle serves this pickup point and shift"
                    } else {
                        "eligible vehicles have no remaining capacity"
                    };
                    unassignable.push(UnassignableRider {
                        rider_id: rider.id,
                        pickup_point_id: rider.pickup_point_id,
                        shift: rider.shift,
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }

    changes.extend(draft.changed_vehicles(snapshot).map(|(before, after)| EntityChange {
        before: EntityState::Vehicle(before.clone()),
        after: EntityState::Vehicle(after.clone()),
    }));

    debug!(
        "🧮 Reparto: {} grupos, {} cambios, {} sin asignar",
        groups.len(),
        changes.len(),
        unassignable.len()
    );

    Ok(SplitPlan {
        changes,
        unassignable,
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Shift, ShiftLoad};
    use crate::services::fixtures::FleetBuilder;

    fn after_vehicle(plan: &SplitPlan, vehicle_id: Uuid) -> Option<ShiftLoad> {
        plan.changes.iter().find_map(|c| match &c.after {
            EntityState::Vehicle(v) if v.id == vehicle_id => Some(v.load()),
            _ => None,
        })
    }

    #[test]
    fn test_five_riders_three_slots_leaves_two_unassignable() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let van = fleet.vehicle(route, Shift::Morning, 3, 0);
        let riders: Vec<Uuid> = (0..5).map(|_| fleet.rider(Shift::Morning, pickup, None)).collect();
        let snapshot = fleet.build();

        let plan = plan_split(&snapshot, &riders, &VehicleFilter::default()).unwrap();
        assert_eq!(plan.unassignable.len(), 2);
        assert_eq!(after_vehicle(&plan, van), Some(ShiftLoad::new(3, 0)));
        let moved = plan
            .changes
            .iter()
            .filter(|c| matches!(c.after, EntityState::Rider(_)))
            .count();
        assert_eq!(moved, 3);
    }

    #[test]
    fn test_second_vehicle_absorbs_the_shortfall() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let big = fleet.vehicle(route, Shift::Morning, 3, 0);
        let small = fleet.vehicle(route, Shift::Morning, 2, 0);
        let riders: Vec<Uuid> = (0..5).map(|_| fleet.rider(Shift::Morning, pickup, None)).collect();
        let snapshot = fleet.build();

        let plan = plan_split(&snapshot, &riders, &VehicleFilter::default()).unwrap();
        assert!(plan.unassignable.is_empty());
        assert_eq!(after_vehicle(&plan, big), Some(ShiftLoad::new(3, 0)));
        assert_eq!(after_vehicle(&plan, small), Some(ShiftLoad::new(2, 0)));
    }

    #[test]
    fn test_moving_out_releases_the_source_vehicle() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let old = fleet.vehicle(route, Shift::Both, 4, 4);
        let new = fleet.vehicle(route, Shift::Both, 4, 4);
        let rider = fleet.rider(Shift::Both, pickup, Some(old));
        let snapshot = fleet.build();

        let filter = VehicleFilter {
            only: None,
            exclude: [old].into_iter().collect(),
        };
        let plan = plan_split(&snapshot, &[rider], &filter).unwrap();
        assert_eq!(after_vehicle(&plan, old), Some(ShiftLoad::new(0, 0)));
        assert_eq!(after_vehicle(&plan, new), Some(ShiftLoad::new(1, 1)));
    }

    #[test]
    fn test_rider_in_valid_vehicle_stays_put() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let home = fleet.vehicle(route, Shift::Morning, 1, 0);
        fleet.vehicle(route, Shift::Morning, 9, 0);
        let rider = fleet.rider(Shift::Morning, pickup, Some(home));
        let snapshot = fleet.build();

        let plan = plan_split(&snapshot, &[rider], &VehicleFilter::default()).unwrap();
        assert!(plan.changes.is_empty());
        assert!(plan.unassignable.is_empty());
    }

    #[test]
    fn test_unassignable_rider_keeps_current_vehicle() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let morning_only = fleet.vehicle(route, Shift::Morning, 4, 0);
        let rider = fleet.rider(Shift::Evening, pickup, None);
        let snapshot = fleet.build();

        let plan = plan_split(&snapshot, &[rider], &VehicleFilter::default()).unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.unassignable.len(), 1);
        assert_eq!(plan.unassignable[0].rider_id, rider);
        assert!(plan.groups[0].candidates.iter().all(|c| c.vehicle_id != morning_only));
    }

    #[test]
    fn test_rider_on_active_trip_is_not_moved() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(2);
        let (first, second) = (fleet.pickup(route, 0), fleet.pickup(route, 1));
        let busy = fleet.vehicle(route, Shift::Morning, 4, 0);
        let open = fleet.vehicle(route, Shift::Morning, 4, 0);
        let on_trip = fleet.rider(Shift::Morning, first, Some(busy));
        let waiting = fleet.rider(Shift::Morning, second, None);
        fleet.start_trip(busy);
        let snapshot = fleet.build();

        // Excluir `busy` deja a `on_trip` mal ubicado
        let filter = VehicleFilter {
            only: None,
            exclude: [busy].into_iter().collect(),
        };
        let plan = plan_split(&snapshot, &[on_trip, waiting], &filter).unwrap();

        assert_eq!(plan.unassignable.len(), 1);
        assert_eq!(plan.unassignable[0].rider_id, on_trip);
        assert_eq!(plan.unassignable[0].reason, ACTIVE_TRIP_REASON);
        assert_eq!(after_vehicle(&plan, busy), None);
        assert_eq!(after_vehicle(&plan, open), Some(ShiftLoad::new(1, 0)));
        assert!(crate::services::plan_validator::validate_changes(&plan.changes).is_empty());
    }

    #[test]
    fn test_rider_validly_placed_on_active_trip_stays_put() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let busy = fleet.vehicle(route, Shift::Morning, 4, 0);
        fleet.vehicle(route, Shift::Morning, 9, 0);
        let rider = fleet.rider(Shift::Morning, pickup, Some(busy));
        fleet.start_trip(busy);
        let snapshot = fleet.build();

        let plan = plan_split(&snapshot, &[rider], &VehicleFilter::default()).unwrap();
        assert!(plan.changes.is_empty());
        assert!(plan.unassignable.is_empty());
    }

    #[test]
    fn test_unknown_rider_is_rejected() {
        let snapshot = FleetBuilder::new().build();
        let ghost = Uuid::new_v4();
        let issues = plan_split(&snapshot, &[ghost], &VehicleFilter::default()).unwrap_err();
        assert_eq!(issues, vec![ValidationIssue::UnknownEntity { entity_id: ghost }]);
    }
}
