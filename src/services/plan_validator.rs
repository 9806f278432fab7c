//! Validación de planes
//!
//! Dos niveles:
//!
//! - `validate_changes`: solo mira los estados de un plan. La usa el
//!   coordinador antes de escribir el registro de auditoría.
//! - `validate_against_fleet`: además cruza los estados finales con el
//!   snapshot (rutas, turnos de los pasajeros que quedan a bordo). La usa la
//!   preparación de planes.

use std::collections::BTreeMap;
use uuid::Uuid;

use super::capacity_ledger::capacity_issues;
use crate::models::{
    Driver, DriverStatus, EntityChange, EntityState, FleetSnapshot, Rider, Shift, ValidationIssue,
    Vehicle,
};

fn push_unique(issues: &mut Vec<ValidationIssue>, issue: ValidationIssue) {
    if !issues.contains(&issue) {
        issues.push(issue);
    }
}

fn status_label(status: DriverStatus) -> &'static str {
    match status {
        DriverStatus::Active => "active",
        DriverStatus::Reserved => "reserved",
    }
}

/// Validar los estados finales de un plan
pub fn validate_changes(changes: &[EntityChange]) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut drivers_by_vehicle: BTreeMap<Uuid, Uuid> = BTreeMap::new();

    for change in changes {
        match (&change.before, &change.after) {
            (EntityState::Vehicle(before), EntityState::Vehicle(after)) => {
                if before.trip_active || after.trip_active {
                    push_unique(&mut issues, ValidationIssue::ActiveTrip { vehicle_id: after.id });
                }
                if after.shift == Shift::Evening {
                    push_unique(&mut issues, ValidationIssue::EveningOnlyVehicle { vehicle_id: after.id });
                    continue;
                }
                if after.shift == Shift::Morning && after.evening_count > 0 {
                    push_unique(
                        &mut issues,
                        ValidationIssue::ShiftRemovalBlocked {
                            vehicle_id: after.id,
                            shift: Shift::Evening,
                            members: after.evening_count,
                        },
                    );
                    if after.morning_count > after.morning_capacity {
                        push_unique(
                            &mut issues,
                            ValidationIssue::CapacityExceeded {
                                vehicle_id: after.id,
                                shift: Shift::Morning,
                            },
                        );
                    }
                    continue;
                }
                for issue in capacity_issues(after) {
                    push_unique(&mut issues, issue);
                }
            }
            (EntityState::Driver(_), EntityState::Driver(after)) => {
                let expected = Driver::status_for(after.vehicle_id);
                if after.status != expected {
                    push_unique(
                        &mut issues,
                        ValidationIssue::DriverStatusMismatch {
                            driver_id: after.id,
                            expected: status_label(expected).to_string(),
                        },
                    );
                }
                if let Some(vehicle_id) = after.vehicle_id {
                    if drivers_by_vehicle.insert(vehicle_id, after.id).is_some() {
                        push_unique(&mut issues, ValidationIssue::VehicleDoubleBooked { vehicle_id });
                    }
                }
            }
            (EntityState::Rider(_), EntityState::Rider(_)) => {}
            (_, after) => {
                let entity_id = match after {
                    EntityState::Vehicle(v) => v.id,
                    EntityState::Rider(r) => r.id,
                    EntityState::Driver(d) => d.id,
                };
                push_unique(&mut issues, ValidationIssue::UnknownEntity { entity_id });
            }
        }
    }
    issues
}

/// Validar un plan contra el snapshot del que sale
pub fn validate_against_fleet(snapshot: &FleetSnapshot, changes: &[EntityChange]) -> Vec<ValidationIssue> {
    let mut issues = validate_changes(changes);

    let mut vehicles: BTreeMap<Uuid, &Vehicle> = snapshot.vehicles.iter().map(|(id, v)| (*id, v)).collect();
    let mut riders: BTreeMap<Uuid, &Rider> = snapshot.riders.iter().map(|(id, r)| (*id, r)).collect();
    let mut moved_riders = Vec::new();
    let mut reshaped_vehicles = Vec::new();

    for change in changes {
        match &change.after {
            EntityState::Vehicle(after) => {
                vehicles.insert(after.id, after);
                if let EntityState::Vehicle(before) = &change.before {
                    if before.route_id != after.route_id || before.shift != after.shift {
                        reshaped_vehicles.push(after.id);
                    }
                }
            }
            EntityState::Rider(after) => {
                riders.insert(after.id, after);
                moved_riders.push(after.id);
            }
            EntityState::Driver(_) => {}
        }
    }

    // Pasajeros que se mueven: el vehículo destino debe servirles
    for rider_id in moved_riders {
        let Some(rider) = riders.get(&rider_id) else { continue };
        let Some(vehicle_id) = rider.vehicle_id else { continue };
        let Some(vehicle) = vehicles.get(&vehicle_id) else {
            push_unique(&mut issues, ValidationIssue::UnknownEntity { entity_id: vehicle_id });
            continue;
        };
        if !vehicle.shift.serves(rider.shift) {
            push_unique(
                &mut issues,
                ValidationIssue::ShiftIncompatible {
                    vehicle_id,
                    vehicle_shift: vehicle.shift,
                    rider_shift: rider.shift,
                },
            );
        }
        let on_route = snapshot
            .routes
            .get(&vehicle.route_id)
            .is_some_and(|route| route.serves(rider.pickup_point_id));
        if !on_route {
            push_unique(
                &mut issues,
                ValidationIssue::PickupNotOnRoute {
                    vehicle_id,
                    pickup_point_id: rider.pickup_point_id,
                },
            );
        }
    }

    // Vehículos que cambian de ruta o turno: sus pasajeros deben seguir cabiendo
    for vehicle_id in reshaped_vehicles {
        let Some(vehicle) = vehicles.get(&vehicle_id) else { continue };
        let Some(route) = snapshot.routes.get(&vehicle.route_id) else {
            push_unique(&mut issues, ValidationIssue::UnknownEntity { entity_id: vehicle.route_id });
            continue;
        };

        let aboard: Vec<&&Rider> = riders
            .values()
            .filter(|r| r.vehicle_id == Some(vehicle_id))
            .collect();

        for rider in &aboard {
            if !route.serves(rider.pickup_point_id) {
                push_unique(
                    &mut issues,
                    ValidationIssue::PickupNotOnRoute {
                        vehicle_id,
                        pickup_point_id: rider.pickup_point_id,
                    },
                );
            }
        }

        let stranded = aboard.iter().filter(|r| !vehicle.shift.serves(r.shift)).count() as u32;
        if stranded > 0 && vehicle.shift != Shift::Evening {
            let issue = ValidationIssue::ShiftRemovalBlocked {
                vehicle_id,
                shift: Shift::Evening,
                members: stranded,
            };
            let counted = issues.iter().any(|i| {
                matches!(i, ValidationIssue::ShiftRemovalBlocked { vehicle_id: v, .. } if *v == vehicle_id)
            });
            if !counted {
                issues.push(issue);
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::FleetBuilder;

    fn vehicle_change(snapshot: &FleetSnapshot, id: Uuid, edit: impl FnOnce(&mut Vehicle)) -> EntityChange {
        let before = snapshot.vehicles[&id].clone();
        let mut after = before.clone();
        edit(&mut after);
        EntityChange {
            before: EntityState::Vehicle(before),
            after: EntityState::Vehicle(after),
        }
    }

    #[test]
    fn test_capacity_and_active_trip_are_reported() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let van = fleet.vehicle(route, Shift::Both, 1, 1);
        fleet.start_trip(van);
        let snapshot = fleet.build();

        let change = vehicle_change(&snapshot, van, |v| {
            v.morning_count = 2;
            v.evening_count = 1;
        });
        let issues = validate_changes(&[change]);
        assert!(issues.contains(&ValidationIssue::ActiveTrip { vehicle_id: van }));
        assert!(issues.contains(&ValidationIssue::CapacityExceeded {
            vehicle_id: van,
            shift: Shift::Morning
        }));
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_evening_only_and_shift_removal_are_blocked() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let van = fleet.vehicle(route, Shift::Both, 4, 4);
        fleet.rider(Shift::Evening, pickup, Some(van));
        fleet.rider(Shift::Both, pickup, Some(van));
        let snapshot = fleet.build();

        let evening_only = vehicle_change(&snapshot, van, |v| v.shift = Shift::Evening);
        assert_eq!(
            validate_changes(&[evening_only]),
            vec![ValidationIssue::EveningOnlyVehicle { vehicle_id: van }]
        );

        let drop_evening = vehicle_change(&snapshot, van, |v| {
            v.shift = Shift::Morning;
            v.evening_capacity = 0;
        });
        let issues = validate_against_fleet(&snapshot, &[drop_evening]);
        assert_eq!(
            issues,
            vec![ValidationIssue::ShiftRemovalBlocked {
                vehicle_id: van,
                shift: Shift::Evening,
                members: 2
            }]
        );
    }

    #[test]
    fn test_route_change_must_keep_pickups() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let other = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let van = fleet.vehicle(route, Shift::Morning, 4, 0);
        fleet.rider(Shift::Morning, pickup, Some(van));
        let snapshot = fleet.build();

        let change = vehicle_change(&snapshot, van, |v| v.route_id = other);
        assert_eq!(
            validate_against_fleet(&snapshot, &[change]),
            vec![ValidationIssue::PickupNotOnRoute {
                vehicle_id: van,
                pickup_point_id: pickup
            }]
        );
    }

    #[test]
    fn test_rider_moved_into_incompatible_vehicle() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let pickup = fleet.pickup(route, 0);
        let van = fleet.vehicle(route, Shift::Morning, 4, 0);
        let rider = fleet.rider(Shift::Evening, pickup, None);
        let snapshot = fleet.build();

        let before = snapshot.riders[&rider].clone();
        let mut after = before.clone();
        after.vehicle_id = Some(van);
        let issues = validate_against_fleet(
            &snapshot,
            &[EntityChange {
                before: EntityState::Rider(before),
                after: EntityState::Rider(after),
            }],
        );
        assert_eq!(
            issues,
            vec![ValidationIssue::ShiftIncompatible {
                vehicle_id: van,
                vehicle_shift: Shift::Morning,
                rider_shift: Shift::Evening
            }]
        );
    }

    #[test]
    fn test_driver_back_references_must_agree() {
        let mut fleet = FleetBuilder::new();
        let route = fleet.route(1);
        let van = fleet.vehicle(route, Shift::Morning, 4, 0);
        let a = fleet.driver(Some(van));
        let b = fleet.driver(None);
        let snapshot = fleet.build();

        let mut b_after = snapshot.drivers[&b].clone();
        b_after.vehicle_id = Some(van);
        let changes = vec![
            EntityChange {
                before: EntityState::Driver(snapshot.drivers[&a].clone()),
                after: EntityState::Driver(snapshot.drivers[&a].clone()),
            },
            EntityChange {
                before: EntityState::Driver(snapshot.drivers[&b].clone()),
                after: EntityState::Driver(b_after),
            },
        ];
        let issues = validate_changes(&changes);
        assert!(issues.contains(&ValidationIssue::DriverStatusMismatch {
            driver_id: b,
            expected: "active".to_string()
        }));
        assert!(issues.contains(&ValidationIssue::VehicleDoubleBooked { vehicle_id: van }));
    }
}
