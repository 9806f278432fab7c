//! Snapshot de la flota
//!
//! Lectura consistente de vehículos, rutas, pasajeros y conductores sobre la
//! que trabajan el selector, el planificador y el resolvedor.

use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::driver::Driver;
use super::plan::{EntityKey, EntityState};
use super::rider::Rider;
use super::route::Route;
use super::vehicle::{Vehicle, VehicleRecord, VehicleRecordError};

/// Lectura de la flota completa
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    pub vehicles: BTreeMap<Uuid, Vehicle>,
    pub routes: BTreeMap<Uuid, Route>,
    pub riders: BTreeMap<Uuid, Rider>,
    pub drivers: BTreeMap<Uuid, Driver>,
}

impl FleetSnapshot {
    pub fn from_parts(
        vehicles: Vec<Vehicle>,
        routes: Vec<Route>,
        riders: Vec<Rider>,
        drivers: Vec<Driver>,
    ) -> Self {
        Self {
            vehicles: vehicles.into_iter().map(|v| (v.id, v)).collect(),
            routes: routes.into_iter().map(|r| (r.id, r)).collect(),
            riders: riders.into_iter().map(|r| (r.id, r)).collect(),
            drivers: drivers.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Ruta actual de un vehículo
    pub fn route_of(&self, vehicle: &Vehicle) -> Option<&Route> {
        self.routes.get(&vehicle.route_id)
    }

    /// Estado actual de una entidad por clave
    pub fn entity(&self, key: EntityKey) -> Option<EntityState> {
        match key {
            EntityKey::Vehicle(id) => self.vehicles.get(&id).cloned().map(EntityState::Vehicle),
            EntityKey::Rider(id) => self.riders.get(&id).cloned().map(EntityState::Rider),
            EntityKey::Driver(id) => self.drivers.get(&id).cloned().map(EntityState::Driver),
        }
    }

    /// Pasajeros que viajan hoy en un vehículo
    pub fn riders_in(&self, vehicle_id: Uuid) -> impl Iterator<Item = &Rider> {
        self.riders
            .values()
            .filter(move |r| r.vehicle_id == Some(vehicle_id))
    }
}

/// Flota en formato de ingesta (seed JSON del backend en memoria)
#[derive(Debug, Clone, Deserialize)]
pub struct FleetSeed {
    pub routes: Vec<Route>,
    pub vehicles: Vec<VehicleRecord>,
    #[serde(default)]
    pub riders: Vec<Rider>,
    #[serde(default)]
    pub drivers: Vec<Driver>,
}

impl FleetSeed {
    /// Normalizar al esquema canónico.
    ///
    /// Las cargas por turno se recalculan a partir de los pasajeros y la
    /// referencia del conductor se deriva de `assigned_driver_id`.
    pub fn into_snapshot(self) -> Result<FleetSnapshot, VehicleRecordError> {
        let vehicles = self
            .vehicles
            .into_iter()
            .map(VehicleRecord::into_vehicle)
            .collect::<Result<Vec<_>, _>>()?;

        let mut snapshot = FleetSnapshot::from_parts(vehicles, self.routes, self.riders, self.drivers);

        let recount = crate::services::capacity_ledger::recount_loads(&snapshot);
        for (vehicle_id, load) in recount {
            if let Some(vehicle) = snapshot.vehicles.get_mut(&vehicle_id) {
                vehicle.morning_count = load.morning_count;
                vehicle.evening_count = load.evening_count;
            }
        }

        let assignments: BTreeMap<Uuid, Uuid> = snapshot
            .vehicles
            .values()
            .filter_map(|v| v.assigned_driver_id.map(|d| (d, v.id)))
            .collect();
        for driver in snapshot.drivers.values_mut() {
            driver.vehicle_id = assignments.get(&driver.id).copied();
            driver.status = Driver::status_for(driver.vehicle_id);
        }

        Ok(snapshot)
    }
}
