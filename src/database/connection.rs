//! Conexión a PostgreSQL
//!
//! Crea el pool y aplica las migraciones embebidas.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;

/// Crear el pool y dejar el esquema al día
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    info!("🔗 Conectando a PostgreSQL: {}", mask_database_url(&config.url));
    let pool = config.create_pool().await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("✅ PostgreSQL conectado y migraciones aplicadas");

    Ok(pool)
}

/// Enmascarar credenciales de la URL para los logs
fn mask_database_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at_pos)) if at_pos > scheme_end => {
            format!("{}***:***@{}", &url[..scheme_end + 3], &url[at_pos + 1..])
        }
        _ => url.to_string(),
    }
}
