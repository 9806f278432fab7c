//! Modelo de Vehicle
//!
//! Este módulo contiene el struct Vehicle canónico que ve el motor de
//! reasignación y el registro de ingesta que lo produce.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::shift::{Shift, ShiftLoad};

/// Vehículo canónico - mapea a la tabla vehicles
///
/// El vehículo es la única fuente de verdad de la relación conductor-vehículo
/// (`assigned_driver_id`); el `vehicle_id` del conductor es una referencia
/// derivada que solo actualiza el coordinador de commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub license_plate: String,
    pub route_id: Uuid,
    pub shift: Shift,
    pub morning_capacity: u32,
    pub evening_capacity: u32,
    pub morning_count: u32,
    pub evening_count: u32,
    pub assigned_driver_id: Option<Uuid>,
    pub trip_active: bool,
}

impl Vehicle {
    pub fn load(&self) -> ShiftLoad {
        ShiftLoad::new(self.morning_count, self.evening_count)
    }

    pub fn current_members(&self) -> u32 {
        self.morning_count + self.evening_count
    }

    /// Verifica el invariante de capacidad por turno
    pub fn within_capacity(&self) -> bool {
        self.morning_count <= self.morning_capacity && self.evening_count <= self.evening_capacity
    }
}

/// Registro de vehículo tal como llega de la ingesta
///
/// Algunas fuentes traen una capacidad combinada `capacity` para vehículos de
/// ambos turnos; otras traen las capacidades por turno. Se normaliza aquí y el
/// motor solo ve `Vehicle`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct VehicleRecord {
    pub id: Uuid,

    #[validate(length(min = 2, max = 20))]
    pub license_plate: String,

    pub route_id: Uuid,
    pub shift: Shift,
    pub capacity: Option<u32>,
    pub morning_capacity: Option<u32>,
    pub evening_capacity: Option<u32>,
    #[serde(default)]
    pub assigned_driver_id: Option<Uuid>,
    #[serde(default)]
    pub trip_active: bool,
}

/// Errores de normalización de un registro de vehículo
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VehicleRecordError {
    #[error("vehicle {0}: evening-only vehicles are not supported")]
    EveningOnly(Uuid),

    #[error("vehicle {0}: missing capacity")]
    MissingCapacity(Uuid),

    #[error("vehicle {0}: combined capacity conflicts with per-shift capacity")]
    AmbiguousCapacity(Uuid),
}

impl VehicleRecord {
    /// Normalizar al esquema canónico. Las cargas empiezan en cero; el
    /// seeding las recalcula a partir de los pasajeros.
    pub fn into_vehicle(self) -> Result<Vehicle, VehicleRecordError> {
        let (morning_capacity, evening_capacity) = match self.shift {
            Shift::Evening => return Err(VehicleRecordError::EveningOnly(self.id)),
            Shift::Morning => match (self.morning_capacity, self.capacity) {
                (Some(m), None) | (None, Some(m)) => (m, 0),
                (Some(m), Some(c)) if m == c => (m, 0),
                (Some(_), Some(_)) => return Err(VehicleRecordError::AmbiguousCapacity(self.id)),
                (None, None) => return Err(VehicleRecordError::MissingCapacity(self.id)),
            },
            Shift::Both => match (self.capacity, self.morning_capacity, self.evening_capacity) {
                (Some(c), None, None) => (c, c),
                (None, Some(m), Some(e)) => (m, e),
                (None, _, _) => return Err(VehicleRecordError::MissingCapacity(self.id)),
                (Some(_), _, _) => return Err(VehicleRecordError::AmbiguousCapacity(self.id)),
            },
        };

        Ok(Vehicle {
            id: self.id,
            license_plate: self.license_plate,
            route_id: self.route_id,
            shift: self.shift,
            morning_capacity,
            evening_capacity,
            morning_count: 0,
            evening_count: 0,
            assigned_driver_id: self.assigned_driver_id,
            trip_active: self.trip_active,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(shift: Shift) -> VehicleRecord {
        VehicleRecord {
            id: Uuid::new_v4(),
            license_plate: "AB-123-CD".to_string(),
            route_id: Uuid::new_v4(),
            shift,
            capacity: None,
            morning_capacity: None,
            evening_capacity: None,
            assigned_driver_id: None,
            trip_active: false,
        }
    }

    #[test]
    fn test_combined_capacity_fills_both_shifts() {
        let mut rec = record(Shift::Both);
        rec.capacity = Some(30);
        let vehicle = rec.into_vehicle().unwrap();
        assert_eq!(vehicle.morning_capacity, 30);
        assert_eq!(vehicle.evening_capacity, 30);
    }

    #[test]
    fn test_morning_vehicle_has_no_evening_seats() {
        let mut rec = record(Shift::Morning);
        rec.morning_capacity = Some(12);
        let vehicle = rec.into_vehicle().unwrap();
        assert_eq!(vehicle.morning_capacity, 12);
        assert_eq!(vehicle.evening_capacity, 0);
    }

    #[test]
    fn test_rejects_evening_only_and_ambiguous_records() {
        let mut evening = record(Shift::Evening);
        evening.capacity = Some(10);
        assert!(matches!(evening.into_vehicle(), Err(VehicleRecordError::EveningOnly(_))));

        let mut ambiguous = record(Shift::Both);
        ambiguous.capacity = Some(10);
        ambiguous.morning_capacity = Some(8);
        assert!(matches!(ambiguous.into_vehicle(), Err(VehicleRecordError::AmbiguousCapacity(_))));

        let missing = record(Shift::Both);
        assert!(matches!(missing.into_vehicle(), Err(VehicleRecordError::MissingCapacity(_))));
    }

    #[test]
    fn test_within_capacity() {
        let mut rec = record(Shift::Both);
        rec.capacity = Some(2);
        let mut vehicle = rec.into_vehicle().unwrap();
        vehicle.morning_count = 2;
        vehicle.evening_count = 1;
        assert!(vehicle.within_capacity());
        assert_eq!(vehicle.current_members(), 3);
        vehicle.evening_count = 3;
        assert!(!vehicle.within_capacity());
    }
}
