//! Modelo de Route
//!
//! Una ruta es la secuencia de puntos de recogida que sirve un vehículo.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ruta canónica - mapea a la tabla routes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: Uuid,
    pub name: String,
    pub pickup_point_ids: Vec<Uuid>,
}

impl Route {
    pub fn serves(&self, pickup_point_id: Uuid) -> bool {
        self.pickup_point_ids.contains(&pickup_point_id)
    }
}
