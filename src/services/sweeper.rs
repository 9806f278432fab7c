//! Barrido de plazos
//!
//! Tarea de fondo que cada `SWEEP_INTERVAL_SECS` descarta planes preparados
//! vencidos, expira swaps pendientes fuera de ventana y revierte los swaps
//! aceptados cuya ventana terminó. Solo llama a operaciones idempotentes de
//! los servicios; no guarda estado propio.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::reassignment_service::ReassignmentService;
use super::swap_service::{SwapService, SwapSweep};

/// Resultado de un barrido
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub purged_plans: usize,
    pub swaps: SwapSweep,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.purged_plans == 0 && self.swaps == SwapSweep::default()
    }
}

pub struct Sweeper {
    reassignments: Arc<ReassignmentService>,
    swaps: Arc<SwapService>,
}

impl Sweeper {
    pub fn new(reassignments: Arc<ReassignmentService>, swaps: Arc<SwapService>) -> Self {
        Self { reassignments, swaps }
    }

    /// Un barrido completo en `now`
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let purged_plans = self.reassignments.purge_staged(now).await;
        let swaps = match self.swaps.sweep_due(now).await {
            Ok(sweep) => sweep,
            Err(e) => {
                warn!("⚠️ No se pudieron leer los swaps vencidos: {}", e);
                SwapSweep::default()
            }
        };
        SweepReport { purged_plans, swaps }
    }

    /// Ejecutar el barrido cada `interval` hasta la señal de apagado
    pub async fn run(&self, interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        info!("🧹 Barrido de plazos iniciado (cada {}s)", interval.as_secs());
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let report = self.sweep_once(Utc::now()).await;
            if report.is_idle() {
                debug!("🧹 Barrido sin trabajo");
            } else {
                info!(
                    "🧹 Barrido: {} planes descartados, {} swaps expirados, {} revertidos, {} fallidos",
                    report.purged_plans, report.swaps.expired, report.swaps.ended, report.swaps.failed
                );
            }
        }
        info!("🛑 Barrido de plazos detenido");
    }
}

/// Lanzar el barrido en una tarea de tokio
pub fn spawn_sweeper(
    sweeper: Sweeper,
    interval: std::time::Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move { sweeper.run(interval, shutdown).await })
}
