// src/models/mod.rs

pub mod agenda;
pub mod alert;
pub mod attendance;
pub mod communication;
pub mod followup;
pub mod intervention;
pub mod interview;
pub mod resource;
pub mod student;

pub use agenda::*;
pub use alert::*;
pub use attendance::*;
pub use communication::*;
pub use followup::*;
pub use intervention::*;
pub use interview::*;
pub use resource::*;
pub use student::*;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{ApiError, ApiResult};

// ==================== COMMON / SHARED ====================

/// Summary counters for the home screen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_estudiantes: i64,
    pub estudiantes_activos: i64,
    pub entrevistas_mes: i64,
    pub intervenciones_mes: i64,
    pub porcentaje_asistencia: i64,
    pub recursos_entregados_mes: i64,
    pub alertas_activas: i64,
    pub agenda_pendiente: i64,
}

/// Rejects `desde`/`hasta` filters that describe an empty range.
pub fn check_date_range(desde: Option<NaiveDate>, hasta: Option<NaiveDate>) -> ApiResult<()> {
    match (desde, hasta) {
        (Some(from), Some(to)) if from > to => Err(ApiError::validation(
            "desde",
            "desde must not be later than hasta",
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_date_range() {
        let a = NaiveDate::from_ymd_opt(2024, 3, 1);
        let b = NaiveDate::from_ymd_opt(2024, 3, 31);
        assert!(check_date_range(a, b).is_ok());
        assert!(check_date_range(a, a).is_ok());
        assert!(check_date_range(None, b).is_ok());
        assert!(check_date_range(b, a).is_err());
    }
}
