// src/alert_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::audit::audit;
use crate::auth::get_current_user;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{Alert, AlertListItem, AlertListQuery, CreateAlertRequest, UpdateAlertRequest};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

const LIST_FROM: &str = "alertas a JOIN estudiantes e ON e.id = a.id_estudiante";
const LIST_FIELDS: &str = "a.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre";

// Highest priority first, then newest.
const PRIORITY_ORDER: &str = "CASE a.prioridad WHEN 'alta' THEN 0 WHEN 'media' THEN 1 ELSE 2 END";

pub async fn get_alerts(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AlertListQuery>,
) -> ApiResult<HttpResponse> {
    let mut builder = SafeQueryBuilder::new(LIST_FROM);
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("a.id_estudiante", query.id_estudiante)
        .add_optional_match("a.estado", query.estado.as_deref())
        .add_optional_match("a.prioridad", query.prioridad.as_deref());

    let (sql, params) = builder.build_select(LIST_FIELDS);
    let sql = format!("{} ORDER BY {}, a.created_at DESC", sql, PRIORITY_ORDER);
    let alerts: Vec<AlertListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(alerts)))
}

pub async fn get_alert(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let sql = format!("SELECT {} FROM {} WHERE a.id = $1", LIST_FIELDS, LIST_FROM);
    let alert: AlertListItem = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Alert"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(alert)))
}

pub async fn create_alert(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateAlertRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let alert: Alert = sqlx::query_as(
        r#"INSERT INTO alertas (id, id_estudiante, tipo, descripcion, prioridad)
           VALUES ($1, $2, $3, $4, COALESCE($5, 'media'))
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_estudiante)
    .bind(&body.tipo)
    .bind(&body.descripcion)
    .bind(&body.prioridad)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Raised {} alert {} for student {}", alert.prioridad, id, alert.id_estudiante);
    audit(&app_state.db_pool, &claims.sub, "create", "alerta", &id, "Alerta creada", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        alert,
        "Alert created successfully".to_string(),
    )))
}

pub async fn update_alert(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateAlertRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    // fecha_resolucion follows estado: stamped on entering resuelta, cleared on reopening.
    let alert: Alert = sqlx::query_as(
        r#"UPDATE alertas SET
               tipo = COALESCE($1, tipo),
               descripcion = COALESCE($2, descripcion),
               prioridad = COALESCE($3, prioridad),
               fecha_resolucion = CASE
                   WHEN $4::text IS NULL THEN fecha_resolucion
                   WHEN $4::text = 'resuelta' THEN COALESCE(fecha_resolucion, NOW())
                   ELSE NULL
               END,
               estado = COALESCE($4, estado),
               updated_at = NOW()
           WHERE id = $5
           RETURNING *"#
    )
    .bind(&body.tipo)
    .bind(&body.descripcion)
    .bind(&body.prioridad)
    .bind(&body.estado)
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Alert"))?;

    info!("Updated alert {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "alerta", &id, "Alerta actualizada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        alert,
        "Alert updated successfully".to_string(),
    )))
}

pub async fn resolve_alert(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    let alert: Alert = sqlx::query_as(
        r#"UPDATE alertas SET estado = 'resuelta', fecha_resolucion = NOW(), updated_at = NOW()
           WHERE id = $1
           RETURNING *"#
    )
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Alert"))?;

    info!("Resolved alert {}", id);
    audit(&app_state.db_pool, &claims.sub, "resolve", "alerta", &id, "Alerta resuelta", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        alert,
        "Alert resolved".to_string(),
    )))
}

pub async fn delete_alert(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    let result = sqlx::query("DELETE FROM alertas WHERE id = $1")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Alert"));
    }

    info!("Deleted alert {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "alerta", &id, "Alerta eliminada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Alert deleted successfully".to_string(),
    )))
}
