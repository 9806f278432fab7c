use anyhow::Result;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shuttle_fleet::cache::{CacheConfig, RedisClient};
use shuttle_fleet::config::{DatabaseConfig, EnvironmentConfig, StoreBackend};
use shuttle_fleet::models::{FleetSeed, FleetSnapshot};
use shuttle_fleet::repositories::{
    AuditStore, MemoryAuditStore, MemoryPrimaryStore, PgFleetStore, PrimaryStore, RedisAuditStore,
};
use shuttle_fleet::services::spawn_sweeper;
use shuttle_fleet::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Cargar variables de entorno
    dotenv().ok();

    let config = EnvironmentConfig::from_env()?;

    // Configurar logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚐 Shuttle Fleet - Motor de reasignación");
    info!("==========================================");
    if config.is_development() {
        info!("🔧 Modo desarrollo");
    }

    let (primary, audit) = match build_stores(&config).await {
        Ok(stores) => stores,
        Err(e) => {
            error!("❌ Error inicializando los stores: {}", e);
            return Err(e);
        }
    };

    let app_state = AppState::new(config.clone(), primary, audit);

    // Barrido de plazos en background
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_handle = spawn_sweeper(app_state.sweeper(), config.engine.sweep_interval, shutdown_rx);

    let app = shuttle_fleet::app(app_state);
    let addr: SocketAddr = config.server_url().parse()?;

    info!("🌐 Servidor iniciando en http://{}", addr);
    info!("🔍 Endpoints disponibles:");
    info!("   GET  /health - Health check");
    info!("🧭 Reasignaciones (admin/moderator):");
    info!("   POST /api/reassignments/riders/stage - Preparar reparto de pasajeros");
    info!("   POST /api/reassignments/drivers/stage - Preparar movimientos de conductores");
    info!("   POST /api/reassignments/routes/stage - Preparar cambios de ruta y turno");
    info!("   POST /api/reassignments/:operation_id/confirm - Confirmar plan");
    info!("   POST /api/reassignments/:operation_id/rollback - Revertir operación");
    info!("   DELETE /api/reassignments/:operation_id - Descartar plan");
    info!("   GET  /api/reassignments/:operation_id - Registro de auditoría");
    info!("   GET  /api/reassignments?type=&limit= - Registros recientes");
    info!("   GET  /api/ledger/drift - Contadores desalineados");
    info!("🔄 Swaps:");
    info!("   POST /api/swaps - Proponer swap");
    info!("   GET  /api/swaps/:swap_id - Obtener swap");
    info!("   POST /api/swaps/:swap_id/respond - Aceptar o rechazar");
    info!("   POST /api/swaps/:swap_id/expire - Expirar (admin/moderator)");
    info!("   POST /api/swaps/:swap_id/end - Terminar y revertir (admin/moderator)");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // Detener el barrido antes de salir
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        warn!("⚠️ El barrido terminó con error: {}", e);
    }

    if let Err(e) = served {
        error!("❌ Error del servidor: {}", e);
        return Err(e.into());
    }

    info!("👋 Servidor terminado");
    Ok(())
}

/// Stores según `STORE_BACKEND`
async fn build_stores(config: &EnvironmentConfig) -> Result<(Arc<dyn PrimaryStore>, Arc<dyn AuditStore>)> {
    match config.store_backend {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;
            let pool = shuttle_fleet::database::connect(&DatabaseConfig::new(database_url)).await?;

            let redis = RedisClient::new(CacheConfig::new(
                config.redis_url.clone(),
                config.engine.audit_retention_per_type,
            ))
            .await?;

            Ok((Arc::new(PgFleetStore::new(pool)), Arc::new(RedisAuditStore::new(redis))))
        }
        StoreBackend::Memory => {
            if config.is_production() {
                warn!("⚠️ Backend en memoria en producción: los cambios no persisten");
            }
            let fleet = match &config.fleet_seed_path {
                Some(path) => load_seed(path).await?,
                None => {
                    warn!("⚠️ Backend en memoria sin FLEET_SEED_PATH: flota vacía");
                    FleetSnapshot::default()
                }
            };
            info!(
                "🧠 Backend en memoria: {} vehículos, {} pasajeros, {} conductores",
                fleet.vehicles.len(),
                fleet.riders.len(),
                fleet.drivers.len()
            );
            Ok((
                Arc::new(MemoryPrimaryStore::new(fleet)),
                Arc::new(MemoryAuditStore::new(config.engine.audit_retention_per_type)),
            ))
        }
    }
}

/// Leer y normalizar el seed JSON de la flota
async fn load_seed(path: &str) -> Result<FleetSnapshot> {
    let raw = tokio::fs::read_to_string(path).await?;
    let seed: FleetSeed = serde_json::from_str(&raw)?;
    let snapshot = seed.into_snapshot()?;
    info!("🌱 Seed de flota cargado desde {}", path);
    Ok(snapshot)
}

/// Señal de apagado graceful
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("❌ No se pudo instalar el handler de Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("❌ No se pudo instalar el handler de SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("🛑 Señal Ctrl+C recibida, apagando servidor...");
        },
        _ = terminate => {
            info!("🛑 Señal de terminación recibida, apagando servidor...");
        },
    }
}
