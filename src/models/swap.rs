//! Modelo de Swap
//!
//! Relevo temporal entre conductores. Solo los swaps `Pending` y `Accepted`
//! se guardan; `Rejected` y `AutoExpired` se borran al transicionar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use uuid::Uuid;

use super::plan::OperationId;

/// Estado del swap - mapea al ENUM swap_state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "swap_state", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Pending,
    Accepted,
    Rejected,
    AutoExpired,
}

impl SwapState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SwapState::Pending)
    }
}

/// Forma del swap - mapea al ENUM swap_kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "swap_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SwapKind {
    /// Dos conductores activos intercambian vehículos
    TrueSwap,
    /// Un conductor activo entrega su vehículo a uno en reserva
    Assignment,
}

/// Respuesta del conductor destino
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapDecision {
    Accept,
    Reject,
}

/// Solicitud de swap - mapea a la tabla swap_requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: Uuid,
    pub source_driver_id: Uuid,
    pub target_driver_id: Uuid,
    pub kind: SwapKind,
    pub source_vehicle_id: Uuid,
    pub target_vehicle_id: Option<Uuid>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub state: SwapState,
    /// Reservado al proponer; correlaciona el commit y su reversión
    pub operation_id: OperationId,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_note: Option<String>,
}

impl SwapRequest {
    pub fn window_elapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end
    }

    pub fn involves(&self, driver_id: Uuid) -> bool {
        self.source_driver_id == driver_id || self.target_driver_id == driver_id
    }

    /// Un swap ocupa a sus conductores mientras está pendiente o aceptado y
    /// sin terminar
    pub fn is_open(&self) -> bool {
        match self.state {
            SwapState::Pending => true,
            SwapState::Accepted => self.ended_at.is_none(),
            _ => false,
        }
    }
}
