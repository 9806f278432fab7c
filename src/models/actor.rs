//! Actor autenticado
//!
//! La capa de identidad entrega un actor por cada llamada; el motor confía en
//! el rol que trae y no lo vuelve a derivar.

use serde::{Deserialize, Serialize};

/// Roles reconocidos por el motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    Driver,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Moderator => "moderator",
            Role::Driver => "driver",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "moderator" => Some(Role::Moderator),
            "driver" => Some(Role::Driver),
            _ => None,
        }
    }

    /// Solo admin y moderator pueden preparar, confirmar o revertir planes
    pub fn can_operate_fleet(&self) -> bool {
        matches!(self, Role::Admin | Role::Moderator)
    }
}

/// Identidad del que ejecuta la operación
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    /// Actor usado por el barrido de plazos
    pub fn system() -> Self {
        Self::new("system", Role::Admin)
    }
}
