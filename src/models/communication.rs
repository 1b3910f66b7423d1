// src/models/communication.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;
use crate::validator::one_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CommunicationChannel {
    Email,
    Telefono,
    Presencial,
    Libreta,
}

impl CommunicationChannel {
    pub const ALL: &'static [&'static str] = &["email", "telefono", "presencial", "libreta"];
}

fn validate_channel(value: &str) -> Result<(), validator::ValidationError> {
    one_of(value, CommunicationChannel::ALL, "invalid_channel")
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Communication {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub medio: String,
    pub asunto: Option<String>,
    pub contenido: String,
    pub fecha: NaiveDate,
    pub registrado_por: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CommunicationListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub communication: Communication,
    pub estudiante_nombre: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCommunicationRequest {
    pub id_estudiante: Uuid,
    #[validate(custom(function = "validate_channel"))]
    pub medio: String,
    #[validate(length(max = 255, message = "asunto cannot exceed 255 characters"))]
    pub asunto: Option<String>,
    #[validate(length(min = 1, max = 5000, message = "contenido must be between 1 and 5000 characters"))]
    pub contenido: String,
    pub fecha: Option<NaiveDate>,
}

impl_sanitize!(CreateCommunicationRequest { medio, contenido } optional { asunto });

#[derive(Debug, Deserialize)]
pub struct CommunicationListQuery {
    pub id_estudiante: Option<Uuid>,
    pub medio: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_validation() {
        let mut request = CreateCommunicationRequest {
            id_estudiante: Uuid::new_v4(),
            medio: "libreta".to_string(),
            asunto: Some("Citación".to_string()),
            contenido: "Se cita al apoderado".to_string(),
            fecha: None,
        };
        assert!(request.validate().is_ok());

        request.medio = "whatsapp".to_string();
        assert!(request.validate().is_err());
    }
}
