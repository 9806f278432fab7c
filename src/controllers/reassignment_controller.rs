use chrono::Utc;
use std::sync::Arc;
use validator::Validate;

use crate::dto::api_response::ApiResponse;
use crate::dto::reassignment_dto::{
    RecentRecordsQuery, StageDriversRequest, StageResponse, StageRidersRequest, StageRoutesRequest,
};
use crate::models::{Actor, AuditRecord, AuditStatus, AuditType, OperationId};
use crate::services::capacity_ledger::CapacityDrift;
use crate::services::commit_coordinator::{CommitOutcome, RollbackOutcome, RollbackStatus};
use crate::services::ReassignmentService;
use crate::utils::errors::AppError;

pub struct ReassignmentController {
    service: Arc<ReassignmentService>,
}

fn staged(response: StageResponse) -> ApiResponse<StageResponse> {
    let message = format!(
        "Plan {} preparado: {} cambios, {} pasajeros sin asignar",
        response.operation_id,
        response.changes.len(),
        response.unassignable.len()
    );
    ApiResponse::success_with_message(response, message)
}

impl ReassignmentController {
    pub fn new(service: Arc<ReassignmentService>) -> Self {
        Self { service }
    }

    pub async fn stage_riders(
        &self,
        actor: &Actor,
        request: StageRidersRequest,
    ) -> Result<ApiResponse<StageResponse>, AppError> {
        let response = self.service.stage_riders(actor, request, Utc::now()).await?;
        Ok(staged(response))
    }

    pub async fn stage_drivers(
        &self,
        actor: &Actor,
        request: StageDriversRequest,
    ) -> Result<ApiResponse<StageResponse>, AppError> {
        let response = self.service.stage_drivers(actor, request, Utc::now()).await?;
        Ok(staged(response))
    }

    pub async fn stage_routes(
        &self,
        actor: &Actor,
        request: StageRoutesRequest,
    ) -> Result<ApiResponse<StageResponse>, AppError> {
        let response = self.service.stage_routes(actor, request, Utc::now()).await?;
        Ok(staged(response))
    }

    pub async fn confirm(
        &self,
        actor: &Actor,
        operation_id: OperationId,
    ) -> Result<ApiResponse<CommitOutcome>, AppError> {
        let outcome = self.service.confirm(actor, operation_id, Utc::now()).await?;
        Ok(match outcome.status {
            AuditStatus::Committed => {
                let message = if outcome.replayed {
                    "Operación ya confirmada".to_string()
                } else {
                    "Operación confirmada".to_string()
                };
                ApiResponse::success_with_message(outcome, message)
            }
            _ => {
                let message = if outcome.errors.is_empty() {
                    format!("Operación {}", outcome.status)
                } else {
                    outcome.errors.join("; ")
                };
                ApiResponse::refused(outcome, message)
            }
        })
    }

    pub async fn rollback(
        &self,
        actor: &Actor,
        operation_id: OperationId,
    ) -> Result<ApiResponse<RollbackOutcome>, AppError> {
        let outcome = self.service.rollback(actor, operation_id).await?;
        Ok(match outcome.status {
            RollbackStatus::RolledBack => {
                ApiResponse::success_with_message(outcome, "Operación revertida".to_string())
            }
            RollbackStatus::Rejected => {
                let reason = outcome.reason.clone().unwrap_or_default();
                ApiResponse::refused(outcome, reason)
            }
        })
    }

    pub async fn cancel(&self, actor: &Actor, operation_id: OperationId) -> Result<ApiResponse<OperationId>, AppError> {
        self.service.cancel(actor, operation_id).await?;
        Ok(ApiResponse::success_with_message(
            operation_id,
            "Plan descartado".to_string(),
        ))
    }

    pub async fn get_record(&self, operation_id: OperationId) -> Result<ApiResponse<AuditRecord>, AppError> {
        let record = self.service.get_record(operation_id).await?;
        Ok(ApiResponse::success(record))
    }

    pub async fn recent(&self, query: RecentRecordsQuery) -> Result<ApiResponse<Vec<AuditRecord>>, AppError> {
        query.validate()?;
        let audit_type = match query.audit_type.as_deref() {
            Some(raw) => Some(
                AuditType::from_str(raw)
                    .ok_or_else(|| AppError::BadRequest(format!("Tipo de operación desconocido: {}", raw)))?,
            ),
            None => None,
        };
        let records = self.service.recent(audit_type, query.limit).await?;
        Ok(ApiResponse::success(records))
    }

    pub async fn drift(&self) -> Result<ApiResponse<Vec<CapacityDrift>>, AppError> {
        let drift = self.service.drift().await?;
        let message = if drift.is_empty() {
            "Contadores consistentes".to_string()
        } else {
            format!("{} vehículos con contadores desalineados", drift.len())
        };
        Ok(ApiResponse::success_with_message(drift, message))
    }
}
