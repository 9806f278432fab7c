//! Shared application state
//!
//! Este módulo define el estado compartido de la aplicación que se pasa
//! a través del router de Axum: configuración, JWT y los servicios del
//! motor construidos sobre los dos stores.

use std::sync::Arc;

use crate::config::environment::EnvironmentConfig;
use crate::models::OperationIdGenerator;
use crate::repositories::{AuditStore, PrimaryStore};
use crate::services::{CommitCoordinator, ReassignmentService, SwapService, Sweeper};
use crate::utils::jwt::JwtConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: EnvironmentConfig,
    pub jwt: JwtConfig,
    pub reassignments: Arc<ReassignmentService>,
    pub swaps: Arc<SwapService>,
}

impl AppState {
    pub fn new(config: EnvironmentConfig, primary: Arc<dyn PrimaryStore>, audit: Arc<dyn AuditStore>) -> Self {
        let coordinator = Arc::new(CommitCoordinator::new(primary.clone(), audit, &config.engine));
        // Un solo generador: planes y swaps comparten el espacio de ids
        let ids = Arc::new(OperationIdGenerator::new());

        let reassignments = Arc::new(ReassignmentService::new(
            primary.clone(),
            coordinator.clone(),
            ids.clone(),
            &config.engine,
        ));
        let swaps = Arc::new(SwapService::new(primary, coordinator, ids, &config.engine));

        Self {
            jwt: JwtConfig::from(&config),
            config,
            reassignments,
            swaps,
        }
    }

    /// Barrido de plazos sobre los servicios de este estado
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.reassignments.clone(), self.swaps.clone())
    }
}
