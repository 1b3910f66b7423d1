// src/models/intervention.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Intervention {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub id_responsable: Option<Uuid>,
    pub fecha: NaiveDate,
    pub tipo: String,
    pub descripcion: Option<String>,
    pub resultado: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InterventionListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub intervention: Intervention,
    pub estudiante_nombre: String,
    pub responsable_nombre: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateInterventionRequest {
    pub id_estudiante: Uuid,
    pub id_responsable: Option<Uuid>,
    pub fecha: Option<NaiveDate>,
    #[validate(length(min = 1, max = 100, message = "tipo must be between 1 and 100 characters"))]
    pub tipo: String,
    #[validate(length(max = 5000, message = "descripcion cannot exceed 5000 characters"))]
    pub descripcion: Option<String>,
    #[validate(length(max = 5000, message = "resultado cannot exceed 5000 characters"))]
    pub resultado: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateInterventionRequest {
    pub id_responsable: Option<Uuid>,
    pub fecha: Option<NaiveDate>,
    #[validate(length(min = 1, max = 100, message = "tipo must be between 1 and 100 characters"))]
    pub tipo: Option<String>,
    #[validate(length(max = 5000, message = "descripcion cannot exceed 5000 characters"))]
    pub descripcion: Option<String>,
    #[validate(length(max = 5000, message = "resultado cannot exceed 5000 characters"))]
    pub resultado: Option<String>,
}

impl_sanitize!(CreateInterventionRequest { tipo } optional { descripcion, resultado });
impl_sanitize!(UpdateInterventionRequest {} optional { tipo, descripcion, resultado });

#[derive(Debug, Deserialize)]
pub struct InterventionListQuery {
    pub id_estudiante: Option<Uuid>,
    pub tipo: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}
