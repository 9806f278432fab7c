use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{
    AuditType, EntityChange, OperationId, ReassignmentPlan, Shift, UnassignableRider,
};
use crate::services::candidate_selector::CandidateGroup;

// Distingue campo ausente (None) de null explícito (Some(None))
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// Request para repartir pasajeros entre vehículos
#[derive(Debug, Deserialize, Validate)]
pub struct StageRidersRequest {
    #[validate(length(min = 1, max = 1000))]
    pub rider_ids: Vec<Uuid>,
    // Universo de vehículos; ausente = toda la flota
    pub vehicle_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    pub exclude_vehicle_ids: Vec<Uuid>,
}

// Movimiento de conductor. `from_vehicle_id` ausente = asignación actual,
// null = en reserva. `to_vehicle_id` null = pasar a reserva.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverMove {
    pub driver_id: Uuid,
    #[serde(default, deserialize_with = "present")]
    pub from_vehicle_id: Option<Option<Uuid>>,
    pub to_vehicle_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StageDriversRequest {
    #[validate(length(min = 1, max = 500))]
    pub moves: Vec<DriverMove>,
}

// Cambio de ruta de un vehículo; `from_route_id` ausente = ruta actual
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMove {
    pub vehicle_id: Uuid,
    pub from_route_id: Option<Uuid>,
    pub to_route_id: Uuid,
}

// Cambio de turno y capacidades de un vehículo
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServiceChange {
    pub vehicle_id: Uuid,
    pub shift: Shift,
    #[validate(range(max = 200))]
    pub morning_capacity: Option<u32>,
    #[validate(range(max = 200))]
    pub evening_capacity: Option<u32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StageRoutesRequest {
    #[serde(default)]
    #[validate(length(max = 500))]
    pub moves: Vec<RouteMove>,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub service_changes: Vec<ServiceChange>,
}

// Response de un plan preparado
#[derive(Debug, Serialize)]
pub struct StageResponse {
    pub operation_id: OperationId,
    pub plan_type: AuditType,
    pub changes: Vec<EntityChange>,
    pub unassignable: Vec<UnassignableRider>,
    pub candidates: Vec<CandidateGroup>,
    pub snapshot_checksum: String,
    pub staged_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StageResponse {
    pub fn new(plan: ReassignmentPlan, candidates: Vec<CandidateGroup>) -> Self {
        Self {
            operation_id: plan.operation_id,
            plan_type: plan.plan_type,
            changes: plan.changes,
            unassignable: plan.unassignable,
            candidates,
            snapshot_checksum: plan.snapshot_checksum,
            staged_at: plan.staged_at,
            expires_at: plan.expires_at,
        }
    }
}

// Query de registros recientes
#[derive(Debug, Deserialize, Validate)]
pub struct RecentRecordsQuery {
    #[serde(rename = "type")]
    pub audit_type: Option<String>,
    #[validate(range(min = 1, max = 500))]
    pub limit: Option<usize>,
}
