// src/models/alert.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;
use crate::validator::one_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Baja,
    Media,
    Alta,
}

impl AlertPriority {
    pub const ALL: &'static [&'static str] = &["baja", "media", "alta"];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Activa,
    EnProceso,
    Resuelta,
}

impl AlertStatus {
    pub const ALL: &'static [&'static str] = &["activa", "en_proceso", "resuelta"];
}

fn validate_priority(value: &str) -> Result<(), validator::ValidationError> {
    one_of(value, AlertPriority::ALL, "invalid_priority")
}

fn validate_alert_status(value: &str) -> Result<(), validator::ValidationError> {
    one_of(value, AlertStatus::ALL, "invalid_alert_status")
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Alert {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub tipo: String,
    pub descripcion: Option<String>,
    pub prioridad: String,
    pub estado: String,
    pub fecha_resolucion: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AlertListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub alert: Alert,
    pub estudiante_nombre: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAlertRequest {
    pub id_estudiante: Uuid,
    #[validate(length(min = 1, max = 100, message = "tipo must be between 1 and 100 characters"))]
    pub tipo: String,
    #[validate(length(max = 2000, message = "descripcion cannot exceed 2000 characters"))]
    pub descripcion: Option<String>,
    #[validate(custom(function = "validate_priority"))]
    pub prioridad: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateAlertRequest {
    #[validate(length(min = 1, max = 100, message = "tipo must be between 1 and 100 characters"))]
    pub tipo: Option<String>,
    #[validate(length(max = 2000, message = "descripcion cannot exceed 2000 characters"))]
    pub descripcion: Option<String>,
    #[validate(custom(function = "validate_priority"))]
    pub prioridad: Option<String>,
    #[validate(custom(function = "validate_alert_status"))]
    pub estado: Option<String>,
}

impl_sanitize!(CreateAlertRequest { tipo } optional { descripcion, prioridad });
impl_sanitize!(UpdateAlertRequest {} optional { tipo, descripcion, prioridad, estado });

#[derive(Debug, Deserialize)]
pub struct AlertListQuery {
    pub id_estudiante: Option<Uuid>,
    pub estado: Option<String>,
    pub prioridad: Option<String>,
}
