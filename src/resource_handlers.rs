// src/resource_handlers.rs
//! Resource catalog and deliveries to students.

use actix_web::{web, HttpRequest, HttpResponse};
use log::{info, warn};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::audit::audit;
use crate::auth::{check_permission, get_current_user};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    check_date_range, CreateDeliveryRequest, CreateResourceRequest, DeliveryListItem,
    DeliveryListQuery, Resource, ResourceDelivery, ResourceListQuery, UpdateResourceRequest,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

// ==================== RESOURCES ====================

pub async fn get_resources(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ResourceListQuery>,
) -> ApiResult<HttpResponse> {
    let mut builder = SafeQueryBuilder::new("recursos");
    builder
        .add_search(&["nombre", "descripcion"], query.search.as_deref())
        .add_optional_match("tipo", query.tipo.as_deref());

    match query.sin_stock {
        Some(true) => { builder.add_raw_condition("stock = 0"); }
        Some(false) => { builder.add_raw_condition("stock > 0"); }
        None => {}
    }
    builder.order_by("nombre", "asc");

    let (sql, params) = builder.build_select("*");
    let resources: Vec<Resource> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(resources)))
}

pub async fn get_resource(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let resource: Resource = sqlx::query_as("SELECT * FROM recursos WHERE id = $1")
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Resource"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(resource)))
}

pub async fn create_resource(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateResourceRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let id = Uuid::new_v4();
    let resource: Resource = sqlx::query_as(
        r#"INSERT INTO recursos (id, nombre, tipo, descripcion, stock)
           VALUES ($1, $2, $3, $4, COALESCE($5, 0))
           RETURNING *"#
    )
    .bind(id)
    .bind(&body.nombre)
    .bind(&body.tipo)
    .bind(&body.descripcion)
    .bind(body.stock)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Created resource {} ({}) with stock {}", resource.nombre, id, resource.stock);
    audit(&app_state.db_pool, &claims.sub, "create", "recurso", &id, "Recurso creado", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        resource,
        "Resource created successfully".to_string(),
    )))
}

pub async fn update_resource(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateResourceRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let resource: Resource = sqlx::query_as(
        r#"UPDATE recursos SET
               nombre = COALESCE($1, nombre),
               tipo = COALESCE($2, tipo),
               descripcion = COALESCE($3, descripcion),
               stock = COALESCE($4, stock),
               updated_at = NOW()
           WHERE id = $5
           RETURNING *"#
    )
    .bind(&body.nombre)
    .bind(&body.tipo)
    .bind(&body.descripcion)
    .bind(body.stock)
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Resource"))?;

    info!("Updated resource {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "recurso", &id, "Recurso actualizado", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        resource,
        "Resource updated successfully".to_string(),
    )))
}

pub async fn delete_resource(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_delete_resources())?;
    let id = path.into_inner();

    let result = sqlx::query("DELETE FROM recursos WHERE id = $1")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Resource"));
    }

    info!("Deleted resource {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "recurso", &id, "Recurso eliminado", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Resource deleted successfully".to_string(),
    )))
}

// ==================== DELIVERIES ====================

fn deliveries_query(query: &DeliveryListQuery) -> SafeQueryBuilder {
    let mut builder = SafeQueryBuilder::new(
        "entregas_recursos d \
         JOIN recursos r ON r.id = d.id_recurso \
         JOIN estudiantes e ON e.id = d.id_estudiante",
    );
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("d.id_recurso", query.id_recurso)
        .add_uuid("d.id_estudiante", query.id_estudiante)
        .add_date_range("d.fecha_entrega", query.desde, query.hasta)
        .order_by("d.fecha_entrega", "desc");
    builder
}

pub async fn get_deliveries(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<DeliveryListQuery>,
) -> ApiResult<HttpResponse> {
    check_date_range(query.desde, query.hasta)?;

    let (sql, params) = deliveries_query(&query).build_select(
        "d.*, r.nombre AS recurso_nombre, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre",
    );
    let deliveries: Vec<DeliveryListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(deliveries)))
}

pub async fn create_delivery(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateDeliveryRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let mut tx = app_state.db_pool.begin().await?;

    let resource: Resource = sqlx::query_as("SELECT * FROM recursos WHERE id = $1 FOR UPDATE")
        .bind(body.id_recurso)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Resource"))?;

    if resource.stock < body.cantidad {
        warn!(
            "Delivery of {} x {} rejected, only {} in stock",
            body.cantidad, resource.nombre, resource.stock
        );
        return Err(ApiError::insufficient_stock(resource.stock, body.cantidad));
    }

    let id = Uuid::new_v4();
    let delivery: ResourceDelivery = sqlx::query_as(
        r#"INSERT INTO entregas_recursos (id, id_recurso, id_estudiante, cantidad, fecha_entrega, observaciones, entregado_por)
           VALUES ($1, $2, $3, $4, COALESCE($5, CURRENT_DATE), $6, $7)
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_recurso)
    .bind(body.id_estudiante)
    .bind(body.cantidad)
    .bind(body.fecha_entrega)
    .bind(&body.observaciones)
    .bind(claims.user_id()?)
    .fetch_one(&mut *tx)
    .await?;

    let remaining: i32 = sqlx::query_scalar(
        "UPDATE recursos SET stock = stock - $1, updated_at = NOW() WHERE id = $2 RETURNING stock"
    )
    .bind(body.cantidad)
    .bind(body.id_recurso)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        "Delivered {} x {} to student {} ({} left)",
        body.cantidad, resource.nombre, body.id_estudiante, remaining
    );
    audit(
        &app_state.db_pool, &claims.sub, "create", "entrega_recurso", &id,
        &format!("Entrega de {} x {}", body.cantidad, resource.nombre), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        serde_json::json!({
            "entrega": delivery,
            "stock_restante": remaining,
        }),
        "Resource delivered successfully".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, bearer, db_app};
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    #[::std::prelude::v1::test]
    fn test_deliveries_hide_deleted_students() {
        let query = DeliveryListQuery { id_recurso: None, id_estudiante: Some(Uuid::nil()), desde: None, hasta: None };
        let (sql, params) = deliveries_query(&query).build_select("d.*");
        assert!(sql.contains("e.deleted_at IS NULL"));
        assert!(sql.contains("ORDER BY d.fecha_entrega DESC"));
        assert_eq!(params, vec![Uuid::nil().to_string()]);
    }

    #[actix_rt::test]
    async fn test_delivery_decrements_stock() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let user = test_support::insert_user(&pool, &auth, "orientador").await;
        let student = test_support::insert_student(&pool).await;
        let resource: Uuid = sqlx::query_scalar(
            "INSERT INTO recursos (id, nombre, tipo, stock) VALUES ($1, 'Cuaderno', 'material', 3) RETURNING id",
        )
        .bind(Uuid::new_v4())
        .fetch_one(&pool)
        .await
        .unwrap();
        let app = db_app!(pool, auth);

        let deliver = |cantidad: i32| {
            test::TestRequest::post()
                .uri("/api/recursos/entregas")
                .insert_header(bearer(&auth, &user))
                .set_json(json!({ "id_recurso": resource, "id_estudiante": student, "cantidad": cantidad }))
                .to_request()
        };

        let resp = test::call_service(&app, deliver(2)).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["stock_restante"], 1);

        assert_eq!(test::call_service(&app, deliver(2)).await.status(), StatusCode::CONFLICT);
        let stock: i32 = sqlx::query_scalar("SELECT stock FROM recursos WHERE id = $1")
            .bind(resource)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(stock, 1);

        sqlx::query("UPDATE estudiantes SET deleted_at = NOW() WHERE id = $1")
            .bind(student)
            .execute(&pool)
            .await
            .unwrap();
        let req = test::TestRequest::get()
            .uri(&format!("/api/recursos/entregas?id_estudiante={}", student))
            .insert_header(bearer(&auth, &user))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"], json!([]));
    }
}
