use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::{SwapDecision, SwapRequest};
use crate::services::commit_coordinator::{CommitOutcome, RollbackOutcome};

// Request para proponer un swap
#[derive(Debug, Deserialize, Validate)]
pub struct ProposeSwapRequest {
    pub source_driver_id: Uuid,
    pub target_driver_id: Uuid,
    // Ausente = ahora
    pub window_start: Option<DateTime<Utc>>,
    // Ausente = inicio + ventana por defecto
    pub window_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct RespondSwapRequest {
    pub decision: SwapDecision,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct EndSwapRequest {
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

// Response de respuesta a un swap
#[derive(Debug, Serialize)]
pub struct SwapResponseResult {
    pub swap: SwapRequest,
    pub commit: Option<CommitOutcome>,
}

// Response de expiración
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ExpireResult {
    Expired { swap_id: Uuid },
    AlreadyGone { swap_id: Uuid },
}

// Response de fin de swap
#[derive(Debug, Serialize)]
pub struct EndSwapResult {
    pub swap: SwapRequest,
    pub rollback: Option<RollbackOutcome>,
}
