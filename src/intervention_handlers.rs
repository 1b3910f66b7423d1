// src/intervention_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::audit::audit;
use crate::auth::get_current_user;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    check_date_range, CreateInterventionRequest, Intervention, InterventionListItem,
    InterventionListQuery, UpdateInterventionRequest,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

const LIST_FROM: &str = "intervenciones v \
     JOIN estudiantes e ON e.id = v.id_estudiante \
     LEFT JOIN usuarios u ON u.id = v.id_responsable";

const LIST_FIELDS: &str = "v.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre, \
     u.nombre AS responsable_nombre";

pub async fn get_interventions(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<InterventionListQuery>,
) -> ApiResult<HttpResponse> {
    check_date_range(query.desde, query.hasta)?;

    let mut builder = SafeQueryBuilder::new(LIST_FROM);
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("v.id_estudiante", query.id_estudiante)
        .add_optional_match("v.tipo", query.tipo.as_deref())
        .add_date_range("v.fecha", query.desde, query.hasta)
        .order_by("v.fecha", "desc");

    let (sql, params) = builder.build_select(LIST_FIELDS);
    let rows: Vec<InterventionListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(rows)))
}

pub async fn get_intervention(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let sql = format!("SELECT {} FROM {} WHERE v.id = $1", LIST_FIELDS, LIST_FROM);
    let row: InterventionListItem = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Intervention"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(row)))
}

pub async fn create_intervention(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateInterventionRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let responsable = match body.id_responsable {
        Some(id) => id,
        None => claims.user_id()?,
    };

    let intervention: Intervention = sqlx::query_as(
        r#"INSERT INTO intervenciones (id, id_estudiante, id_responsable, fecha, tipo, descripcion, resultado)
           VALUES ($1, $2, $3, COALESCE($4, CURRENT_DATE), $5, $6, $7)
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_estudiante)
    .bind(responsable)
    .bind(body.fecha)
    .bind(&body.tipo)
    .bind(&body.descripcion)
    .bind(&body.resultado)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Created intervention {} ({}) for student {}", id, intervention.tipo, body.id_estudiante);
    audit(&app_state.db_pool, &claims.sub, "create", "intervencion", &id, "Intervención registrada", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        intervention,
        "Intervention created successfully".to_string(),
    )))
}

pub async fn update_intervention(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateInterventionRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let intervention: Intervention = sqlx::query_as(
        r#"UPDATE intervenciones SET
               id_responsable = COALESCE($1, id_responsable),
               fecha = COALESCE($2, fecha),
               tipo = COALESCE($3, tipo),
               descripcion = COALESCE($4, descripcion),
               resultado = COALESCE($5, resultado),
               updated_at = NOW()
           WHERE id = $6
           RETURNING *"#
    )
    .bind(body.id_responsable)
    .bind(body.fecha)
    .bind(&body.tipo)
    .bind(&body.descripcion)
    .bind(&body.resultado)
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Intervention"))?;

    info!("Updated intervention {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "intervencion", &id, "Intervención actualizada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        intervention,
        "Intervention updated successfully".to_string(),
    )))
}

pub async fn delete_intervention(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    let result = sqlx::query("DELETE FROM intervenciones WHERE id = $1")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Intervention"));
    }

    info!("Deleted intervention {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "intervencion", &id, "Intervención eliminada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Intervention deleted successfully".to_string(),
    )))
}
