use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::dto::api_response::ApiResponse;
use crate::dto::swap_dto::{
    EndSwapRequest, EndSwapResult, ExpireResult, ProposeSwapRequest, RespondSwapRequest, SwapResponseResult,
};
use crate::models::{Actor, Role, SwapRequest};
use crate::services::commit_coordinator::RollbackStatus;
use crate::services::SwapService;
use crate::utils::errors::AppError;

pub struct SwapController {
    service: Arc<SwapService>,
}

impl SwapController {
    pub fn new(service: Arc<SwapService>) -> Self {
        Self { service }
    }

    pub async fn propose(
        &self,
        actor: &Actor,
        request: ProposeSwapRequest,
    ) -> Result<ApiResponse<SwapRequest>, AppError> {
        request.validate()?;
        let swap = self.service.propose(actor, request, Utc::now()).await?;
        Ok(ApiResponse::success_with_message(
            swap,
            "Swap propuesto".to_string(),
        ))
    }

    pub async fn respond(
        &self,
        actor: &Actor,
        swap_id: Uuid,
        request: RespondSwapRequest,
    ) -> Result<ApiResponse<SwapResponseResult>, AppError> {
        let result = self
            .service
            .respond(actor, swap_id, request.decision, Utc::now())
            .await?;
        Ok(match &result.commit {
            Some(commit) if !commit.is_committed() => {
                let message = format!("Swap devuelto a pending: {}", commit.errors.join("; "));
                ApiResponse::refused(result, message)
            }
            Some(_) => ApiResponse::success_with_message(result, "Swap aceptado".to_string()),
            None => ApiResponse::success_with_message(result, "Swap rechazado".to_string()),
        })
    }

    pub async fn expire(&self, swap_id: Uuid) -> Result<ApiResponse<ExpireResult>, AppError> {
        let result = self.service.expire(swap_id, Utc::now()).await?;
        Ok(ApiResponse::success(result))
    }

    pub async fn end(
        &self,
        actor: &Actor,
        swap_id: Uuid,
        request: EndSwapRequest,
    ) -> Result<ApiResponse<EndSwapResult>, AppError> {
        request.validate()?;
        let result = self.service.end(actor, swap_id, request.note, Utc::now()).await?;
        Ok(match result.rollback.as_ref().map(|r| r.status) {
            Some(RollbackStatus::Rejected) => {
                let message = result.swap.end_note.clone().unwrap_or_default();
                ApiResponse::refused(result, message)
            }
            Some(RollbackStatus::RolledBack) => {
                ApiResponse::success_with_message(result, "Swap terminado y revertido".to_string())
            }
            None => ApiResponse::success_with_message(result, "Swap ya terminado".to_string()),
        })
    }

    pub async fn get(&self, actor: &Actor, swap_id: Uuid) -> Result<ApiResponse<SwapRequest>, AppError> {
        let swap = self.service.get(swap_id).await?;

        // Un conductor solo ve los swaps en los que participa
        if actor.role == Role::Driver {
            let involved = actor
                .id
                .parse::<Uuid>()
                .map(|id| swap.involves(id))
                .unwrap_or(false);
            if !involved {
                return Err(AppError::Forbidden("No tienes permiso para ver este swap".to_string()));
            }
        }
        Ok(ApiResponse::success(swap))
    }
}
