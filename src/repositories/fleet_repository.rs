//! Repositorio de flota en PostgreSQL
//!
//! Implementa `PrimaryStore` sobre sqlx. Las escrituras de un plan corren en
//! una sola transacción SERIALIZABLE: cada fila se bloquea `FOR UPDATE` en
//! orden de clave, se compara con el estado esperado y solo entonces se
//! actualiza.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{PrimaryStore, StoreError};
use crate::models::{
    Driver, DriverStatus, EntityKey, EntityState, EntityWrite, FleetSnapshot, OperationId, Rider,
    Route, Shift, SwapKind, SwapRequest, SwapState, Vehicle,
};

const VEHICLE_COLUMNS: &str = "id, license_plate, route_id, shift, morning_capacity, evening_capacity, \
     morning_count, evening_count, assigned_driver_id, trip_active";
const RIDER_COLUMNS: &str = "id, full_name, shift, pickup_point_id, vehicle_id";
const DRIVER_COLUMNS: &str = "id, full_name, status, vehicle_id";
const SWAP_COLUMNS: &str = "id, source_driver_id, target_driver_id, kind, source_vehicle_id, \
     target_vehicle_id, window_start, window_end, state, operation_id, created_at, responded_at, \
     ended_at, end_note";

// Fila de vehicles; Postgres no tiene enteros sin signo
#[derive(Debug, sqlx::FromRow)]
struct VehicleRow {
    id: Uuid,
    license_plate: String,
    route_id: Uuid,
    shift: Shift,
    morning_capacity: i32,
    evening_capacity: i32,
    morning_count: i32,
    evening_count: i32,
    assigned_driver_id: Option<Uuid>,
    trip_active: bool,
}

fn to_u32(value: i32, field: &str, id: Uuid) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{} of {} is negative", field, id)))
}

fn to_i32(value: u32, field: &str, id: Uuid) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Corrupt(format!("{} of {} out of range: {}", field, id, value)))
}

impl TryFrom<VehicleRow> for Vehicle {
    type Error = StoreError;

    fn try_from(row: VehicleRow) -> Result<Self, Self::Error> {
        Ok(Vehicle {
            id: row.id,
            license_plate: row.license_plate,
            route_id: row.route_id,
            shift: row.shift,
            morning_capacity: to_u32(row.morning_capacity, "morning_capacity", row.id)?,
            evening_capacity: to_u32(row.evening_capacity, "evening_capacity", row.id)?,
            morning_count: to_u32(row.morning_count, "morning_count", row.id)?,
            evening_count: to_u32(row.evening_count, "evening_count", row.id)?,
            assigned_driver_id: row.assigned_driver_id,
            trip_active: row.trip_active,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RouteRow {
    id: Uuid,
    name: String,
    pickup_point_ids: Vec<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct RiderRow {
    id: Uuid,
    full_name: String,
    shift: Shift,
    pickup_point_id: Uuid,
    vehicle_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct DriverRow {
    id: Uuid,
    full_name: String,
    status: DriverStatus,
    vehicle_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct SwapRow {
    id: Uuid,
    source_driver_id: Uuid,
    target_driver_id: Uuid,
    kind: SwapKind,
    source_vehicle_id: Uuid,
    target_vehicle_id: Option<Uuid>,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    state: SwapState,
    operation_id: i64,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    end_note: Option<String>,
}

impl From<RouteRow> for Route {
    fn from(row: RouteRow) -> Self {
        Route {
            id: row.id,
            name: row.name,
            pickup_point_ids: row.pickup_point_ids,
        }
    }
}

impl From<RiderRow> for Rider {
    fn from(row: RiderRow) -> Self {
        Rider {
            id: row.id,
            full_name: row.full_name,
            shift: row.shift,
            pickup_point_id: row.pickup_point_id,
            vehicle_id: row.vehicle_id,
        }
    }
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        Driver {
            id: row.id,
            full_name: row.full_name,
            status: row.status,
            vehicle_id: row.vehicle_id,
        }
    }
}

impl TryFrom<SwapRow> for SwapRequest {
    type Error = StoreError;

    fn try_from(row: SwapRow) -> Result<Self, Self::Error> {
        let operation_id = u64::try_from(row.operation_id)
            .map_err(|_| StoreError::Corrupt(format!("operation_id of swap {} is negative", row.id)))?;
        Ok(SwapRequest {
            id: row.id,
            source_driver_id: row.source_driver_id,
            target_driver_id: row.target_driver_id,
            kind: row.kind,
            source_vehicle_id: row.source_vehicle_id,
            target_vehicle_id: row.target_vehicle_id,
            window_start: row.window_start,
            window_end: row.window_end,
            state: row.state,
            operation_id: OperationId(operation_id),
            created_at: row.created_at,
            responded_at: row.responded_at,
            ended_at: row.ended_at,
            end_note: row.end_note,
        })
    }
}

/// Mapear errores de sqlx: 40001 (serialization_failure) y 40P01
/// (deadlock_detected) son carreras que el caller reintenta con un snapshot
/// fresco
fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            return StoreError::SerializationConflict;
        }
    }
    StoreError::Database(e)
}

/// Store primario sobre PostgreSQL
#[derive(Clone)]
pub struct PgFleetStore {
    pool: PgPool,
}

impl PgFleetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(tx)
    }

    async fn lock_entity(
        tx: &mut Transaction<'static, Postgres>,
        key: EntityKey,
    ) -> Result<EntityState, StoreError> {
        let state = match key {
            EntityKey::Vehicle(id) => {
                let row = sqlx::query_as::<_, VehicleRow>(&format!(
                    "SELECT {} FROM vehicles WHERE id = $1 FOR UPDATE",
                    VEHICLE_COLUMNS
                ))
                .bind(id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx)?;
                row.map(Vehicle::try_from).transpose()?.map(EntityState::Vehicle)
            }
            EntityKey::Rider(id) => sqlx::query_as::<_, RiderRow>(&format!(
                "SELECT {} FROM riders WHERE id = $1 FOR UPDATE",
                RIDER_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)?
            .map(|row| EntityState::Rider(row.into())),
            EntityKey::Driver(id) => sqlx::query_as::<_, DriverRow>(&format!(
                "SELECT {} FROM drivers WHERE id = $1 FOR UPDATE",
                DRIVER_COLUMNS
            ))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx)?
            .map(|row| EntityState::Driver(row.into())),
        };
        state.ok_or(StoreError::Missing(key))
    }

    async fn write_entity(
        tx: &mut Transaction<'static, Postgres>,
        state: &EntityState,
    ) -> Result<(), StoreError> {
        match state {
            EntityState::Vehicle(v) => {
                let morning_capacity = to_i32(v.morning_capacity, "morning_capacity", v.id)?;
                let evening_capacity = to_i32(v.evening_capacity, "evening_capacity", v.id)?;
                let morning_count = to_i32(v.morning_count, "morning_count", v.id)?;
                let evening_count = to_i32(v.evening_count, "evening_count", v.id)?;
                sqlx::query(
                    r#"
                    UPDATE vehicles
                    SET license_plate = $2, route_id = $3, shift = $4, morning_capacity = $5,
                        evening_capacity = $6, morning_count = $7, evening_count = $8,
                        assigned_driver_id = $9, trip_active = $10, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(v.id)
                .bind(&v.license_plate)
                .bind(v.route_id)
                .bind(v.shift)
                .bind(morning_capacity)
                .bind(evening_capacity)
                .bind(morning_count)
                .bind(evening_count)
                .bind(v.assigned_driver_id)
                .bind(v.trip_active)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx)?;
            }
            EntityState::Rider(r) => {
                sqlx::query(
                    r#"
                    UPDATE riders
                    SET full_name = $2, shift = $3, pickup_point_id = $4, vehicle_id = $5, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(r.id)
                .bind(&r.full_name)
                .bind(r.shift)
                .bind(r.pickup_point_id)
                .bind(r.vehicle_id)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx)?;
            }
            EntityState::Driver(d) => {
                sqlx::query(
                    r#"
                    UPDATE drivers
                    SET full_name = $2, status = $3, vehicle_id = $4, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(d.id)
                .bind(&d.full_name)
                .bind(d.status)
                .bind(d.vehicle_id)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx)?;
            }
        }
        Ok(())
    }

    async fn fetch_swaps(&self, sql: &str, binds: SwapFilter) -> Result<Vec<SwapRequest>, StoreError> {
        let query = sqlx::query_as::<_, SwapRow>(sql);
        let query = match binds {
            SwapFilter::Drivers(ids) => query.bind(ids),
            SwapFilter::DueAt(now) => query.bind(now),
        };
        query
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(SwapRequest::try_from)
            .collect()
    }
}

enum SwapFilter {
    Drivers(Vec<Uuid>),
    DueAt(DateTime<Utc>),
}

#[async_trait]
impl PrimaryStore for PgFleetStore {
    async fn load_fleet(&self) -> Result<FleetSnapshot, StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let vehicles = sqlx::query_as::<_, VehicleRow>(&format!("SELECT {} FROM vehicles", VEHICLE_COLUMNS))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(Vehicle::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let routes = sqlx::query_as::<_, RouteRow>("SELECT id, name, pickup_point_ids FROM routes")
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let riders = sqlx::query_as::<_, RiderRow>(&format!("SELECT {} FROM riders", RIDER_COLUMNS))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let drivers = sqlx::query_as::<_, DriverRow>(&format!("SELECT {} FROM drivers", DRIVER_COLUMNS))
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        tx.commit().await.map_err(map_sqlx)?;

        debug!(
            "📥 Flota cargada: {} vehículos, {} pasajeros, {} conductores",
            vehicles.len(),
            riders.len(),
            drivers.len()
        );

        Ok(FleetSnapshot::from_parts(
            vehicles,
            routes.into_iter().map(Route::from).collect(),
            riders.into_iter().map(Rider::from).collect(),
            drivers.into_iter().map(Driver::from).collect(),
        ))
    }

    async fn read_entities(&self, keys: &[EntityKey]) -> Result<Vec<EntityState>, StoreError> {
        let mut vehicle_ids = Vec::new();
        let mut rider_ids = Vec::new();
        let mut driver_ids = Vec::new();
        for key in keys {
            match key {
                EntityKey::Vehicle(id) => vehicle_ids.push(*id),
                EntityKey::Rider(id) => rider_ids.push(*id),
                EntityKey::Driver(id) => driver_ids.push(*id),
            }
        }

        let mut found: BTreeMap<EntityKey, EntityState> = BTreeMap::new();
        if !vehicle_ids.is_empty() {
            let rows = sqlx::query_as::<_, VehicleRow>(&format!(
                "SELECT {} FROM vehicles WHERE id = ANY($1)",
                VEHICLE_COLUMNS
            ))
            .bind(&vehicle_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
            for row in rows {
                let vehicle = Vehicle::try_from(row)?;
                found.insert(EntityKey::Vehicle(vehicle.id), EntityState::Vehicle(vehicle));
            }
        }
        if !rider_ids.is_empty() {
            let rows = sqlx::query_as::<_, RiderRow>(&format!(
                "SELECT {} FROM riders WHERE id = ANY($1)",
                RIDER_COLUMNS
            ))
            .bind(&rider_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
            for row in rows {
                found.insert(EntityKey::Rider(row.id), EntityState::Rider(row.into()));
            }
        }
        if !driver_ids.is_empty() {
            let rows = sqlx::query_as::<_, DriverRow>(&format!(
                "SELECT {} FROM drivers WHERE id = ANY($1)",
                DRIVER_COLUMNS
            ))
            .bind(&driver_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?;
            for row in rows {
                found.insert(EntityKey::Driver(row.id), EntityState::Driver(row.into()));
            }
        }

        keys.iter()
            .map(|key| found.get(key).cloned().ok_or(StoreError::Missing(*key)))
            .collect()
    }

    async fn apply(&self, writes: &[EntityWrite]) -> Result<(), StoreError> {
        let mut ordered: Vec<&EntityWrite> = writes.iter().collect();
        ordered.sort_by_key(|w| w.key());

        let mut tx = self.begin_serializable().await?;

        for write in &ordered {
            let key = write.key();
            let current = Self::lock_entity(&mut tx, key).await?;
            if current != write.expected {
                warn!("⚠️ Precondición fallida para {}: el documento cambió", key);
                tx.rollback().await.map_err(map_sqlx)?;
                return Err(StoreError::precondition(key, "document changed since it was read"));
            }
        }

        for write in &ordered {
            Self::write_entity(&mut tx, &write.new).await?;
        }

        tx.commit().await.map_err(map_sqlx)?;
        debug!("💾 Transacción aplicada: {} entidades", ordered.len());
        Ok(())
    }

    async fn insert_swap(&self, swap: &SwapRequest) -> Result<(), StoreError> {
        let mut tx = self.begin_serializable().await?;

        let (busy,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM swap_requests
            WHERE (state = 'pending' OR (state = 'accepted' AND ended_at IS NULL))
              AND (source_driver_id = ANY($1) OR target_driver_id = ANY($1))
            "#,
        )
        .bind(vec![swap.source_driver_id, swap.target_driver_id])
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if busy > 0 {
            tx.rollback().await.map_err(map_sqlx)?;
            return Err(StoreError::precondition(
                format!("swap:{}", swap.id),
                "driver already has an open swap",
            ));
        }

        sqlx::query(&format!(
            "INSERT INTO swap_requests ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
            SWAP_COLUMNS
        ))
        .bind(swap.id)
        .bind(swap.source_driver_id)
        .bind(swap.target_driver_id)
        .bind(swap.kind)
        .bind(swap.source_vehicle_id)
        .bind(swap.target_vehicle_id)
        .bind(swap.window_start)
        .bind(swap.window_end)
        .bind(swap.state)
        .bind(swap.operation_id.0 as i64)
        .bind(swap.created_at)
        .bind(swap.responded_at)
        .bind(swap.ended_at)
        .bind(&swap.end_note)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn get_swap(&self, id: Uuid) -> Result<Option<SwapRequest>, StoreError> {
        sqlx::query_as::<_, SwapRow>(&format!("SELECT {} FROM swap_requests WHERE id = $1", SWAP_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?
            .map(SwapRequest::try_from)
            .transpose()
    }

    async fn update_swap(&self, swap: &SwapRequest, expected: SwapState) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE swap_requests
            SET state = $3, responded_at = $4, ended_at = $5, end_note = $6
            WHERE id = $1 AND state = $2
            "#,
        )
        .bind(swap.id)
        .bind(expected)
        .bind(swap.state)
        .bind(swap.responded_at)
        .bind(swap.ended_at)
        .bind(&swap.end_note)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn delete_swap(&self, id: Uuid, expected: SwapState) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM swap_requests WHERE id = $1 AND state = $2")
            .bind(id)
            .bind(expected)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;

        Ok(result.rows_affected() == 1)
    }

    async fn open_swaps_for(&self, driver_ids: &[Uuid]) -> Result<Vec<SwapRequest>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM swap_requests
            WHERE (state = 'pending' OR (state = 'accepted' AND ended_at IS NULL))
              AND (source_driver_id = ANY($1) OR target_driver_id = ANY($1))
            "#,
            SWAP_COLUMNS
        );
        self.fetch_swaps(&sql, SwapFilter::Drivers(driver_ids.to_vec())).await
    }

    async fn due_swaps(&self, now: DateTime<Utc>) -> Result<Vec<SwapRequest>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM swap_requests
            WHERE (state = 'pending' OR (state = 'accepted' AND ended_at IS NULL))
              AND window_end <= $1
            ORDER BY window_end
            "#,
            SWAP_COLUMNS
        );
        self.fetch_swaps(&sql, SwapFilter::DueAt(now)).await
    }
}
