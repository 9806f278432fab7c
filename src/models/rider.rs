//! Modelo de Rider
//!
//! Un pasajero ocupa exactamente un vehículo o ninguno.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::shift::Shift;

/// Pasajero - mapea a la tabla riders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rider {
    pub id: Uuid,
    pub full_name: String,
    pub shift: Shift,
    pub pickup_point_id: Uuid,
    pub vehicle_id: Option<Uuid>,
}
