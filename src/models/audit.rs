//! Registros de auditoría
//!
//! Viven en el store secundario. Se crean en `pending` antes de la
//! transacción primaria y se cierran después; nunca se borran al revertir.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::plan::{EntityChange, EntityKey, EntityState, OperationId};

/// Tipo de operación auditada
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditType {
    /// Reasignación de pasajeros
    Student,
    Driver,
    Route,
}

impl AuditType {
    pub const ALL: [AuditType; 3] = [AuditType::Student, AuditType::Driver, AuditType::Route];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditType::Student => "student",
            AuditType::Driver => "driver",
            AuditType::Route => "route",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "student" => Some(AuditType::Student),
            "driver" => Some(AuditType::Driver),
            "route" => Some(AuditType::Route),
            _ => None,
        }
    }
}

impl fmt::Display for AuditType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estado del registro: `pending` → `committed` | `failed`, y
/// `committed` → `rolled_back`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Committed,
    RolledBack,
    Failed,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Committed => "committed",
            AuditStatus::RolledBack => "rolled_back",
            AuditStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AuditStatus::Pending)
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Antes/después de una entidad afectada
///
/// `proposed` se guarda desde `pending` para poder resolver un commit
/// interrumpido; `after` solo existe una vez confirmado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditChange {
    pub key: EntityKey,
    pub before: EntityState,
    pub proposed: EntityState,
    pub after: Option<EntityState>,
}

/// Registro de auditoría de una operación
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation_id: OperationId,
    #[serde(rename = "type")]
    pub audit_type: AuditType,
    pub actor: String,
    pub status: AuditStatus,
    pub changes: Vec<AuditChange>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub rolled_back_by: Option<String>,
}

impl AuditRecord {
    /// Registro inicial en `pending`; los `before` de `changes` deben venir de
    /// una lectura fresca
    pub fn pending(
        operation_id: OperationId,
        audit_type: AuditType,
        actor: &str,
        changes: &[EntityChange],
    ) -> Self {
        let now = Utc::now();
        Self {
            operation_id,
            audit_type,
            actor: actor.to_string(),
            status: AuditStatus::Pending,
            changes: changes
                .iter()
                .map(|change| AuditChange {
                    key: change.key(),
                    before: change.before.clone(),
                    proposed: change.after.clone(),
                    after: None,
                })
                .collect(),
            error: None,
            created_at: now,
            updated_at: now,
            rolled_back_at: None,
            rolled_back_by: None,
        }
    }

    pub fn keys(&self) -> Vec<EntityKey> {
        self.changes.iter().map(|c| c.key).collect()
    }

    /// Estados `after`, presentes solo en registros confirmados
    pub fn after_states(&self) -> Option<Vec<EntityState>> {
        self.changes.iter().map(|c| c.after.clone()).collect()
    }

    pub fn before_states(&self) -> Vec<EntityState> {
        self.changes.iter().map(|c| c.before.clone()).collect()
    }

    pub fn proposed_states(&self) -> Vec<EntityState> {
        self.changes.iter().map(|c| c.proposed.clone()).collect()
    }

    /// Edad del registro respecto a `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }

    /// Copia en `committed`: los estados propuestos pasan a ser `after`
    pub fn committed(&self) -> Self {
        let mut record = self.clone();
        for change in record.changes.iter_mut() {
            change.after = Some(change.proposed.clone());
        }
        record.status = AuditStatus::Committed;
        record.error = None;
        record.updated_at = Utc::now();
        record
    }

    /// Copia en `failed` con el motivo
    pub fn failed(&self, reason: impl Into<String>) -> Self {
        let mut record = self.clone();
        record.status = AuditStatus::Failed;
        record.error = Some(reason.into());
        record.updated_at = Utc::now();
        record
    }

    /// Copia en `rolled_back`
    pub fn rolled_back(&self, by: &str) -> Self {
        let mut record = self.clone();
        let now = Utc::now();
        record.status = AuditStatus::RolledBack;
        record.rolled_back_at = Some(now);
        record.rolled_back_by = Some(by.to_string());
        record.updated_at = now;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Rider, Shift};
    use uuid::Uuid;

    fn rider_change() -> EntityChange {
        let rider = Rider {
            id: Uuid::new_v4(),
            full_name: "Lucía".to_string(),
            shift: Shift::Both,
            pickup_point_id: Uuid::new_v4(),
            vehicle_id: None,
        };
        let mut moved = rider.clone();
        moved.vehicle_id = Some(Uuid::new_v4());
        EntityChange {
            before: EntityState::Rider(rider),
            after: EntityState::Rider(moved),
        }
    }

    #[test]
    fn test_pending_has_no_after_until_committed() {
        let change = rider_change();
        let pending = AuditRecord::pending(OperationId(5), AuditType::Student, "admin-1", &[change.clone()]);
        assert_eq!(pending.status, AuditStatus::Pending);
        assert!(pending.after_states().is_none());

        let committed = pending.committed();
        assert_eq!(committed.status, AuditStatus::Committed);
        assert_eq!(committed.after_states(), Some(vec![change.after]));
        assert_eq!(committed.before_states(), vec![change.before]);
    }

    #[test]
    fn test_rolled_back_keeps_changes() {
        let committed = AuditRecord::pending(OperationId(9), AuditType::Driver, "admin-1", &[rider_change()])
            .committed();
        let rolled_back = committed.rolled_back("moderator-2");
        assert_eq!(rolled_back.status, AuditStatus::RolledBack);
        assert_eq!(rolled_back.rolled_back_by.as_deref(), Some("moderator-2"));
        assert_eq!(rolled_back.changes, committed.changes);
    }

    #[test]
    fn test_record_serializes_type_field() {
        let record = AuditRecord::pending(OperationId(1), AuditType::Route, "admin-1", &[]);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "route");
        assert_eq!(json["status"], "pending");
    }
}
