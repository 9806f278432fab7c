//! Modelo de Driver

use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

/// Estado del conductor - mapea al ENUM driver_status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "driver_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DriverStatus {
    Active,
    Reserved,
}

/// Conductor - mapea a la tabla drivers
///
/// `vehicle_id` es nulo si y solo si el conductor está `Reserved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub full_name: String,
    pub status: DriverStatus,
    pub vehicle_id: Option<Uuid>,
}

impl Driver {
    /// Estado derivado de la asignación
    pub fn status_for(vehicle_id: Option<Uuid>) -> DriverStatus {
        match vehicle_id {
            Some(_) => DriverStatus::Active,
            None => DriverStatus::Reserved,
        }
    }
}
