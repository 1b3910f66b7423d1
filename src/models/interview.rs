// src/models/interview.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;
use crate::validator::one_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InterviewStatus {
    Pendiente,
    Realizada,
    Cancelada,
}

impl InterviewStatus {
    pub const ALL: &'static [&'static str] = &["pendiente", "realizada", "cancelada"];

    /// Completed interviews are part of the student's history and never change.
    pub fn is_locked(&self) -> bool {
        matches!(self, InterviewStatus::Realizada)
    }
}

fn validate_interview_status(value: &str) -> Result<(), validator::ValidationError> {
    one_of(value, InterviewStatus::ALL, "invalid_interview_status")
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Interview {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub id_orientador: Option<Uuid>,
    pub id_agenda: Option<Uuid>,
    pub fecha: NaiveDate,
    pub motivo: String,
    pub observaciones: Option<String>,
    pub conclusiones: Option<String>,
    pub estado: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Interview {
    pub fn status(&self) -> Option<InterviewStatus> {
        self.estado.parse().ok()
    }
}

/// Interview row joined with the student and counselor names for listings.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InterviewListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub interview: Interview,
    pub estudiante_nombre: String,
    pub orientador_nombre: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInterviewRequest {
    pub id_estudiante: Uuid,
    pub id_orientador: Option<Uuid>,
    pub fecha: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "motivo must be between 1 and 255 characters"))]
    pub motivo: String,
    #[validate(length(max = 5000, message = "observaciones cannot exceed 5000 characters"))]
    pub observaciones: Option<String>,
    #[validate(length(max = 5000, message = "conclusiones cannot exceed 5000 characters"))]
    pub conclusiones: Option<String>,
    #[validate(custom(function = "validate_interview_status"))]
    pub estado: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInterviewRequest {
    pub id_orientador: Option<Uuid>,
    pub fecha: Option<NaiveDate>,
    #[validate(length(min = 1, max = 255, message = "motivo must be between 1 and 255 characters"))]
    pub motivo: Option<String>,
    #[validate(length(max = 5000, message = "observaciones cannot exceed 5000 characters"))]
    pub observaciones: Option<String>,
    #[validate(length(max = 5000, message = "conclusiones cannot exceed 5000 characters"))]
    pub conclusiones: Option<String>,
    #[validate(custom(function = "validate_interview_status"))]
    pub estado: Option<String>,
}

/// Body of the agenda completion call; every field is optional.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct CompleteFromAgendaRequest {
    #[validate(length(min = 1, max = 255, message = "motivo must be between 1 and 255 characters"))]
    pub motivo: Option<String>,
    #[validate(length(max = 5000, message = "observaciones cannot exceed 5000 characters"))]
    pub observaciones: Option<String>,
    #[validate(length(max = 5000, message = "conclusiones cannot exceed 5000 characters"))]
    pub conclusiones: Option<String>,
}

impl_sanitize!(CreateInterviewRequest { motivo } optional { observaciones, conclusiones, estado });
impl_sanitize!(UpdateInterviewRequest {} optional { motivo, observaciones, conclusiones, estado });
impl_sanitize!(CompleteFromAgendaRequest {} optional { motivo, observaciones, conclusiones });

#[derive(Debug, Deserialize)]
pub struct InterviewListQuery {
    pub id_estudiante: Option<Uuid>,
    pub id_orientador: Option<Uuid>,
    pub estado: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_round_trip_with_column_values() {
        for value in InterviewStatus::ALL {
            let status = InterviewStatus::from_str(value).unwrap();
            assert_eq!(status.as_ref(), *value);
        }
    }

    #[test]
    fn test_only_realizada_is_locked() {
        assert!(InterviewStatus::Realizada.is_locked());
        assert!(!InterviewStatus::Pendiente.is_locked());
        assert!(!InterviewStatus::Cancelada.is_locked());
    }

    #[test]
    fn test_create_request_requires_motive() {
        let request = CreateInterviewRequest {
            id_estudiante: Uuid::new_v4(),
            id_orientador: None,
            fecha: None,
            motivo: String::new(),
            observaciones: None,
            conclusiones: None,
            estado: Some("archivada".to_string()),
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("motivo"));
        assert!(fields.contains_key("estado"));
    }

    #[test]
    fn test_empty_completion_body_is_valid() {
        assert!(CompleteFromAgendaRequest::default().validate().is_ok());
    }
}
