//! Turnos de servicio
//!
//! Un turno determina qué contadores de un vehículo consume un pasajero.

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;

/// Turno del pasajero o del vehículo - mapea al ENUM shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "shift", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Shift {
    Morning,
    Evening,
    Both,
}

impl Shift {
    pub fn as_str(&self) -> &'static str {
        match self {
            Shift::Morning => "morning",
            Shift::Evening => "evening",
            Shift::Both => "both",
        }
    }

    /// Plazas consumidas por un pasajero de este turno: (mañana, tarde)
    pub fn slots(&self) -> (u32, u32) {
        match self {
            Shift::Morning => (1, 0),
            Shift::Evening => (0, 1),
            Shift::Both => (1, 1),
        }
    }

    /// Un vehículo de turno `self` puede llevar pasajeros de turno `rider`.
    ///
    /// No existen vehículos solo de tarde: un pasajero de tarde (o de ambos
    /// turnos) solo cabe en un vehículo `Both`.
    pub fn serves(&self, rider: Shift) -> bool {
        match (self, rider) {
            (Shift::Both, _) => true,
            (Shift::Morning, Shift::Morning) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Carga actual de un vehículo separada por turno
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftLoad {
    pub morning_count: u32,
    pub evening_count: u32,
}

impl ShiftLoad {
    pub fn new(morning_count: u32, evening_count: u32) -> Self {
        Self { morning_count, evening_count }
    }

    pub fn total(&self) -> u32 {
        self.morning_count + self.evening_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_per_shift() {
        assert_eq!(Shift::Morning.slots(), (1, 0));
        assert_eq!(Shift::Evening.slots(), (0, 1));
        assert_eq!(Shift::Both.slots(), (1, 1));
    }

    #[test]
    fn test_shift_compatibility_is_asymmetric() {
        assert!(Shift::Morning.serves(Shift::Morning));
        assert!(!Shift::Morning.serves(Shift::Evening));
        assert!(!Shift::Morning.serves(Shift::Both));
        assert!(Shift::Both.serves(Shift::Evening));
        assert!(Shift::Both.serves(Shift::Both));
        assert!(!Shift::Evening.serves(Shift::Evening));
    }

    #[test]
    fn test_shift_serde_lowercase() {
        let json = serde_json::to_string(&Shift::Both).unwrap();
        assert_eq!(json, "\"both\"");
        let parsed: Shift = serde_json::from_str("\"evening\"").unwrap();
        assert_eq!(parsed, Shift::Evening);
    }
}
