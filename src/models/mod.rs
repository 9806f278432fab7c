//! Modelos del sistema
//!
//! Este módulo contiene el esquema canónico de la flota que ve el motor de
//! reasignación: vehículos, rutas, pasajeros, conductores, planes, registros
//! de auditoría y swaps.

pub mod actor;
pub mod audit;
pub mod driver;
pub mod fleet;
pub mod plan;
pub mod rider;
pub mod route;
pub mod shift;
pub mod swap;
pub mod vehicle;

pub use actor::{Actor, Role};
pub use audit::{AuditChange, AuditRecord, AuditStatus, AuditType};
pub use driver::{Driver, DriverStatus};
pub use fleet::{FleetSeed, FleetSnapshot};
pub use plan::{
    EntityChange, EntityKey, EntityState, EntityWrite, OperationId, OperationIdGenerator,
    ReassignmentPlan, UnassignableRider, ValidationIssue,
};
pub use rider::Rider;
pub use route::Route;
pub use shift::{Shift, ShiftLoad};
pub use swap::{SwapDecision, SwapKind, SwapRequest, SwapState};
pub use vehicle::{Vehicle, VehicleRecord};
