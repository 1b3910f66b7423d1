// src/models/attendance.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;
use crate::validator::one_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum AttendanceType {
    Presente,
    Ausente,
    Pendiente,
}

impl AttendanceType {
    pub const ALL: &'static [&'static str] = &["Presente", "Ausente", "Pendiente"];
}

fn validate_attendance_type(value: &str) -> Result<(), validator::ValidationError> {
    one_of(value, AttendanceType::ALL, "invalid_attendance_type")
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendance {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub id_agenda: Option<Uuid>,
    pub fecha: NaiveDate,
    pub tipo: String,
    pub justificacion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AttendanceListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub attendance: Attendance,
    pub estudiante_nombre: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAttendanceRequest {
    pub id_estudiante: Uuid,
    pub fecha: Option<NaiveDate>,
    #[validate(custom(function = "validate_attendance_type"))]
    pub tipo: String,
    #[validate(length(max = 500, message = "justificacion cannot exceed 500 characters"))]
    pub justificacion: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAttendanceRequest {
    pub fecha: Option<NaiveDate>,
    #[validate(custom(function = "validate_attendance_type"))]
    pub tipo: Option<String>,
    #[validate(length(max = 500, message = "justificacion cannot exceed 500 characters"))]
    pub justificacion: Option<String>,
}

impl_sanitize!(CreateAttendanceRequest { tipo } optional { justificacion });
impl_sanitize!(UpdateAttendanceRequest {} optional { tipo, justificacion });

#[derive(Debug, Deserialize)]
pub struct AttendanceListQuery {
    pub id_estudiante: Option<Uuid>,
    pub tipo: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendance_type_is_case_sensitive() {
        let mut request = CreateAttendanceRequest {
            id_estudiante: Uuid::new_v4(),
            fecha: None,
            tipo: "Presente".to_string(),
            justificacion: None,
        };
        assert!(request.validate().is_ok());

        request.tipo = "presente".to_string();
        assert!(request.validate().is_err());
    }
}
