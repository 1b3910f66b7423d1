// src/models/agenda.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AgendaStatus {
    Programada,
    Realizada,
    Cancelada,
}

impl AgendaStatus {
    /// Only scheduled entries may be edited, completed or cancelled.
    pub fn is_open(&self) -> bool {
        matches!(self, AgendaStatus::Programada)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AgendaEntry {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub id_orientador: Option<Uuid>,
    pub fecha: NaiveDate,
    pub hora: Option<NaiveTime>,
    pub motivo: String,
    pub lugar: Option<String>,
    pub estado: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgendaEntry {
    pub fn status(&self) -> Option<AgendaStatus> {
        self.estado.parse().ok()
    }

    pub fn is_open(&self) -> bool {
        self.status().map(|s| s.is_open()).unwrap_or(false)
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AgendaListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub entry: AgendaEntry,
    pub estudiante_nombre: String,
    pub orientador_nombre: Option<String>,
    pub asistencia: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAgendaRequest {
    pub id_estudiante: Uuid,
    pub id_orientador: Option<Uuid>,
    pub fecha: NaiveDate,
    pub hora: Option<NaiveTime>,
    #[validate(length(min = 1, max = 255, message = "motivo must be between 1 and 255 characters"))]
    pub motivo: String,
    #[validate(length(max = 150, message = "lugar cannot exceed 150 characters"))]
    pub lugar: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAgendaRequest {
    pub id_orientador: Option<Uuid>,
    pub fecha: Option<NaiveDate>,
    pub hora: Option<NaiveTime>,
    #[validate(length(min = 1, max = 255, message = "motivo must be between 1 and 255 characters"))]
    pub motivo: Option<String>,
    #[validate(length(max = 150, message = "lugar cannot exceed 150 characters"))]
    pub lugar: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CancelAgendaRequest {
    #[validate(length(max = 500, message = "justificacion cannot exceed 500 characters"))]
    pub justificacion: Option<String>,
}

impl_sanitize!(CreateAgendaRequest { motivo } optional { lugar });
impl_sanitize!(UpdateAgendaRequest {} optional { motivo, lugar });
impl_sanitize!(CancelAgendaRequest {} optional { justificacion });

#[derive(Debug, Deserialize)]
pub struct AgendaListQuery {
    pub id_estudiante: Option<Uuid>,
    pub id_orientador: Option<Uuid>,
    pub estado: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}
