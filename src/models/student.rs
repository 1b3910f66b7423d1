// src/models/student.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;
use crate::validator::{one_of, validate_phone, validate_rut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
pub enum StudentStatus {
    Activo,
    Inactivo,
}

impl StudentStatus {
    pub const ALL: &'static [&'static str] = &["Activo", "Inactivo"];
}

fn validate_student_status(value: &str) -> Result<(), validator::ValidationError> {
    one_of(value, StudentStatus::ALL, "invalid_student_status")
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Student {
    pub id: Uuid,
    pub nombre: String,
    pub apellido: Option<String>,
    pub rut: String,
    pub fecha_nacimiento: Option<NaiveDate>,
    pub email: Option<String>,
    pub telefono: Option<String>,
    pub direccion: Option<String>,
    pub curso: Option<String>,
    pub apoderado_nombre: Option<String>,
    pub apoderado_telefono: Option<String>,
    pub apoderado_email: Option<String>,
    pub estado: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStudentRequest {
    #[validate(length(min = 1, max = 100, message = "nombre must be between 1 and 100 characters"))]
    pub nombre: String,
    #[validate(length(max = 100, message = "apellido cannot exceed 100 characters"))]
    pub apellido: Option<String>,
    #[validate(custom(function = "validate_rut"))]
    pub rut: String,
    pub fecha_nacimiento: Option<NaiveDate>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub telefono: Option<String>,
    #[validate(length(max = 255, message = "direccion cannot exceed 255 characters"))]
    pub direccion: Option<String>,
    #[validate(length(max = 50, message = "curso cannot exceed 50 characters"))]
    pub curso: Option<String>,
    #[validate(length(max = 150, message = "apoderado_nombre cannot exceed 150 characters"))]
    pub apoderado_nombre: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub apoderado_telefono: Option<String>,
    #[validate(email(message = "Invalid guardian email format"))]
    pub apoderado_email: Option<String>,
    #[validate(custom(function = "validate_student_status"))]
    pub estado: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStudentRequest {
    #[validate(length(min = 1, max = 100, message = "nombre must be between 1 and 100 characters"))]
    pub nombre: Option<String>,
    #[validate(length(max = 100, message = "apellido cannot exceed 100 characters"))]
    pub apellido: Option<String>,
    #[validate(custom(function = "validate_rut"))]
    pub rut: Option<String>,
    pub fecha_nacimiento: Option<NaiveDate>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub telefono: Option<String>,
    #[validate(length(max = 255, message = "direccion cannot exceed 255 characters"))]
    pub direccion: Option<String>,
    #[validate(length(max = 50, message = "curso cannot exceed 50 characters"))]
    pub curso: Option<String>,
    #[validate(length(max = 150, message = "apoderado_nombre cannot exceed 150 characters"))]
    pub apoderado_nombre: Option<String>,
    #[validate(custom(function = "validate_phone"))]
    pub apoderado_telefono: Option<String>,
    #[validate(email(message = "Invalid guardian email format"))]
    pub apoderado_email: Option<String>,
    #[validate(custom(function = "validate_student_status"))]
    pub estado: Option<String>,
}

impl_sanitize!(CreateStudentRequest { nombre, rut } optional {
    apellido, email, telefono, direccion, curso,
    apoderado_nombre, apoderado_telefono, apoderado_email, estado,
});

impl_sanitize!(UpdateStudentRequest {} optional {
    nombre, apellido, rut, email, telefono, direccion, curso,
    apoderado_nombre, apoderado_telefono, apoderado_email, estado,
});

#[derive(Debug, Deserialize)]
pub struct StudentListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub estado: Option<String>,
    pub curso: Option<String>,
    pub sort_order: Option<String>,
}

impl StudentListQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(20).clamp(1, 100);
        let offset = (page - 1) * per_page;
        (page, per_page, offset)
    }
}

/// Per-student counters shown on the student profile.
#[derive(Debug, Serialize)]
pub struct StudentSummary {
    #[serde(flatten)]
    pub student: Student,
    pub entrevistas: i64,
    pub intervenciones: i64,
    pub alertas_abiertas: i64,
    pub asistencias_presente: i64,
    pub asistencias_ausente: i64,
    pub recursos_recibidos: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::Sanitize;
    use std::str::FromStr;

    fn valid_request() -> CreateStudentRequest {
        CreateStudentRequest {
            nombre: "Camila".to_string(),
            apellido: Some("Rojas".to_string()),
            rut: "12.345.678-5".to_string(),
            fecha_nacimiento: NaiveDate::from_ymd_opt(2010, 3, 14),
            email: Some("camila@colegio.cl".to_string()),
            telefono: Some("+56 9 8765 4321".to_string()),
            direccion: None,
            curso: Some("8°B".to_string()),
            apoderado_nombre: Some("Marcela Soto".to_string()),
            apoderado_telefono: Some("912345678".to_string()),
            apoderado_email: None,
            estado: None,
        }
    }

    #[test]
    fn test_valid_student_passes() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn test_invalid_rut_and_email_reported_per_field() {
        let mut request = valid_request();
        request.rut = "12345678-0".to_string();
        request.email = Some("not-an-email".to_string());

        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("rut"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn test_blank_name_rejected_after_sanitize() {
        let mut request = valid_request();
        request.nombre = "   ".to_string();
        request.sanitize();
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("nombre"));
    }

    #[test]
    fn test_invalid_status_rejected() {
        let mut request = valid_request();
        request.estado = Some("Egresado".to_string());
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(StudentStatus::Activo.as_ref(), "Activo");
        assert_eq!(StudentStatus::from_str("Inactivo").unwrap(), StudentStatus::Inactivo);
        assert!(StudentStatus::from_str("activo").is_err());
    }

    #[test]
    fn test_list_query_normalize() {
        let query = StudentListQuery {
            page: Some(0),
            per_page: Some(500),
            search: None,
            estado: None,
            curso: None,
            sort_order: None,
        };
        assert_eq!(query.normalize(), (1, 100, 0));
    }
}
