//! Área de preparación
//!
//! Un plan activo por sesión de operador, identificado por su
//! `operation_id`. El plan vive en un `TtlCache` propio del área durante la
//! ventana de confirmación; pasada la ventana se descarta. Aquí no se
//! escribe nada en el store primario.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::models::{Actor, EntityState, OperationId, ReassignmentPlan};
use crate::utils::errors::{AppError, AppResult};

/// Planes preparados pendientes de confirmación
#[derive(Clone)]
pub struct StagingArea {
    plans: TtlCache<String, ReassignmentPlan>,
    window: Duration,
}

impl StagingArea {
    pub fn new(window: Duration) -> Self {
        Self {
            plans: TtlCache::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Instante de expiración de un plan preparado en `now`
    pub fn deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.window
    }

    /// Guardar el plan de la sesión, reemplazando el anterior
    pub async fn stage(&self, plan: ReassignmentPlan, now: DateTime<Utc>) {
        let operation_id = plan.operation_id;
        let expires_at = plan.expires_at;
        if let Some(previous) = self.plans.insert(plan.actor.id.clone(), plan, expires_at, now).await {
            info!(
                "♻️ Plan {} reemplazado por {} (sesión {})",
                previous.operation_id, operation_id, previous.actor.id
            );
        }
        debug!("📝 Plan {} preparado, expira {}", operation_id, expires_at);
    }

    /// Plan vigente de la sesión con este `operation_id`
    pub async fn get(&self, actor: &Actor, operation_id: OperationId, now: DateTime<Utc>) -> Option<ReassignmentPlan> {
        self.plans
            .get(&actor.id, now)
            .await
            .filter(|plan| plan.operation_id == operation_id)
    }

    /// Retirar el plan para confirmarlo. Un plan vencido no se entrega.
    pub async fn take(&self, actor: &Actor, operation_id: OperationId, now: DateTime<Utc>) -> Option<ReassignmentPlan> {
        let plan = self
            .plans
            .remove_if(&actor.id, |plan| plan.operation_id == operation_id)
            .await?;
        if plan.is_expired(now) {
            warn!("⏰ Plan {} expirado antes de confirmar", operation_id);
            return None;
        }
        Some(plan)
    }

    /// Descartar el plan de la sesión
    pub async fn cancel(&self, actor: &Actor, operation_id: OperationId) -> bool {
        self.plans
            .remove_if(&actor.id, |plan| plan.operation_id == operation_id)
            .await
            .is_some()
    }

    /// Borrar los planes vencidos
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.plans.purge_expired(now).await
    }

    pub async fn active_plans(&self, now: DateTime<Utc>) -> usize {
        self.plans.values(now).await.len()
    }
}

/// Comparar el plan con una lectura fresca de sus entidades; cualquier
/// divergencia invalida el plan
pub fn revalidate(plan: &ReassignmentPlan, fresh: &[EntityState]) -> AppResult<()> {
    for change in &plan.changes {
        let key = change.key();
        match fresh.iter().find(|state| state.key() == key) {
            Some(current) if *current == change.before => {}
            Some(_) => return Err(AppError::StalePlan(format!("{} changed since staging", key))),
            None => return Err(AppError::StalePlan(format!("{} no longer exists", key))),
        }
    }
    Ok(())
}
