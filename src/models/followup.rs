// src/models/followup.rs
//! Academic and psychosocial follow-up notes.
//!
//! Both kinds share one row shape and live in sibling tables, so handlers work
//! against [`FollowUpKind`] instead of duplicating per-table code.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum FollowUpKind {
    Academico,
    Psicosocial,
}

impl FollowUpKind {
    pub fn table(&self) -> &'static str {
        match self {
            FollowUpKind::Academico => "seguimiento_academico",
            FollowUpKind::Psicosocial => "seguimiento_psicosocial",
        }
    }

    /// What `categoria` means for this kind, used in messages.
    pub fn category_label(&self) -> &'static str {
        match self {
            FollowUpKind::Academico => "asignatura",
            FollowUpKind::Psicosocial => "area",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            FollowUpKind::Academico => "academic_followup",
            FollowUpKind::Psicosocial => "psychosocial_followup",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowUp {
    pub id: Uuid,
    pub id_estudiante: Uuid,
    pub fecha: NaiveDate,
    pub categoria: Option<String>,
    pub observacion: String,
    pub registrado_por: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct FollowUpListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub followup: FollowUp,
    pub estudiante_nombre: String,
    pub registrado_por_nombre: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFollowUpRequest {
    pub id_estudiante: Uuid,
    pub fecha: Option<NaiveDate>,
    #[validate(length(max = 100, message = "categoria cannot exceed 100 characters"))]
    pub categoria: Option<String>,
    #[validate(length(min = 1, max = 5000, message = "observacion must be between 1 and 5000 characters"))]
    pub observacion: String,
}

impl_sanitize!(CreateFollowUpRequest { observacion } optional { categoria });

#[derive(Debug, Deserialize)]
pub struct FollowUpListQuery {
    pub id_estudiante: Option<Uuid>,
    pub categoria: Option<String>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_kind_from_path_segment() {
        assert_eq!(FollowUpKind::from_str("academico").unwrap(), FollowUpKind::Academico);
        assert_eq!(FollowUpKind::from_str("psicosocial").unwrap().table(), "seguimiento_psicosocial");
        assert!(FollowUpKind::from_str("financiero").is_err());
    }
}
