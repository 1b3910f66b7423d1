// src/models/resource.rs
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::impl_sanitize;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Resource {
    pub id: Uuid,
    pub nombre: String,
    pub tipo: Option<String>,
    pub descripcion: Option<String>,
    pub stock: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateResourceRequest {
    #[validate(length(min = 1, max = 150, message = "nombre must be between 1 and 150 characters"))]
    pub nombre: String,
    #[validate(length(max = 100, message = "tipo cannot exceed 100 characters"))]
    pub tipo: Option<String>,
    #[validate(length(max = 1000, message = "descripcion cannot exceed 1000 characters"))]
    pub descripcion: Option<String>,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub stock: Option<i32>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateResourceRequest {
    #[validate(length(min = 1, max = 150, message = "nombre must be between 1 and 150 characters"))]
    pub nombre: Option<String>,
    #[validate(length(max = 100, message = "tipo cannot exceed 100 characters"))]
    pub tipo: Option<String>,
    #[validate(length(max = 1000, message = "descripcion cannot exceed 1000 characters"))]
    pub descripcion: Option<String>,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub stock: Option<i32>,
}

impl_sanitize!(CreateResourceRequest { nombre } optional { tipo, descripcion });
impl_sanitize!(UpdateResourceRequest {} optional { nombre, tipo, descripcion });

#[derive(Debug, Deserialize)]
pub struct ResourceListQuery {
    pub search: Option<String>,
    pub tipo: Option<String>,
    pub sin_stock: Option<bool>,
}

// ==================== DELIVERIES ====================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ResourceDelivery {
    pub id: Uuid,
    pub id_recurso: Uuid,
    pub id_estudiante: Uuid,
    pub cantidad: i32,
    pub fecha_entrega: NaiveDate,
    pub observaciones: Option<String>,
    pub entregado_por: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct DeliveryListItem {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub delivery: ResourceDelivery,
    pub recurso_nombre: String,
    pub estudiante_nombre: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateDeliveryRequest {
    pub id_recurso: Uuid,
    pub id_estudiante: Uuid,
    #[validate(range(min = 1, message = "cantidad must be at least 1"))]
    pub cantidad: i32,
    pub fecha_entrega: Option<NaiveDate>,
    #[validate(length(max = 500, message = "observaciones cannot exceed 500 characters"))]
    pub observaciones: Option<String>,
}

impl_sanitize!(CreateDeliveryRequest {} optional { observaciones });

#[derive(Debug, Deserialize)]
pub struct DeliveryListQuery {
    pub id_recurso: Option<Uuid>,
    pub id_estudiante: Option<Uuid>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_quantity_must_be_positive() {
        let mut request = CreateDeliveryRequest {
            id_recurso: Uuid::new_v4(),
            id_estudiante: Uuid::new_v4(),
            cantidad: 0,
            fecha_entrega: None,
            observaciones: None,
        };
        assert!(request.validate().is_err());
        request.cantidad = 3;
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_negative_stock_rejected() {
        let request = CreateResourceRequest {
            nombre: "Cuaderno".to_string(),
            tipo: Some("utiles".to_string()),
            descripcion: None,
            stock: Some(-1),
        };
        let errors = request.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("stock"));
    }
}
