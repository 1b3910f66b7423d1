// src/followup_handlers.rs
//! Academic and psychosocial follow-up notes, served from `/seguimiento/{tipo}`.

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::audit::audit;
use crate::auth::get_current_user;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    check_date_range, CreateFollowUpRequest, FollowUp, FollowUpKind, FollowUpListItem,
    FollowUpListQuery,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

fn parse_kind(segment: &str) -> ApiResult<FollowUpKind> {
    FollowUpKind::from_str(segment)
        .map_err(|_| ApiError::NotFound(format!("Unknown follow-up type '{}'", segment)))
}

fn list_from(kind: FollowUpKind) -> String {
    format!(
        "{} f JOIN estudiantes e ON e.id = f.id_estudiante LEFT JOIN usuarios u ON u.id = f.registrado_por",
        kind.table()
    )
}

const LIST_FIELDS: &str = "f.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre, \
     u.nombre AS registrado_por_nombre";

pub async fn get_followups(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<FollowUpListQuery>,
) -> ApiResult<HttpResponse> {
    let kind = parse_kind(&path)?;
    check_date_range(query.desde, query.hasta)?;

    let mut builder = SafeQueryBuilder::new(list_from(kind));
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("f.id_estudiante", query.id_estudiante)
        .add_optional_match("f.categoria", query.categoria.as_deref())
        .add_date_range("f.fecha", query.desde, query.hasta)
        .order_by("f.fecha", "desc");

    let (sql, params) = builder.build_select(LIST_FIELDS);
    let rows: Vec<FollowUpListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(rows)))
}

pub async fn get_followup(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<(String, Uuid)>,
) -> ApiResult<HttpResponse> {
    let (segment, id) = path.into_inner();
    let kind = parse_kind(&segment)?;

    let sql = format!("SELECT {} FROM {} WHERE f.id = $1", LIST_FIELDS, list_from(kind));
    let row: FollowUpListItem = sqlx::query_as(&sql)
        .bind(id)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Follow-up record"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(row)))
}

pub async fn create_followup(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<CreateFollowUpRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let kind = parse_kind(&path)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let sql = format!(
        r#"INSERT INTO {} (id, id_estudiante, fecha, categoria, observacion, registrado_por)
           VALUES ($1, $2, COALESCE($3, CURRENT_DATE), $4, $5, $6)
           RETURNING *"#,
        kind.table()
    );
    let followup: FollowUp = sqlx::query_as(&sql)
        .bind(id)
        .bind(body.id_estudiante)
        .bind(body.fecha)
        .bind(&body.categoria)
        .bind(&body.observacion)
        .bind(claims.user_id()?)
        .fetch_one(&app_state.db_pool)
        .await?;

    info!(
        "Recorded {} follow-up {} ({} {:?}) for student {}",
        kind, id, kind.category_label(), followup.categoria, body.id_estudiante
    );
    audit(
        &app_state.db_pool, &claims.sub, "create", kind.entity(), &id,
        &format!("Seguimiento {} registrado", kind), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        followup,
        "Follow-up recorded successfully".to_string(),
    )))
}

pub async fn delete_followup(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<(String, Uuid)>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let (segment, id) = path.into_inner();
    let kind = parse_kind(&segment)?;

    let sql = format!("DELETE FROM {} WHERE id = $1", kind.table());
    let result = sqlx::query(&sql)
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Follow-up record"));
    }

    info!("Deleted {} follow-up {}", kind, id);
    audit(
        &app_state.db_pool, &claims.sub, "delete", kind.entity(), &id,
        &format!("Seguimiento {} eliminado", kind), &http_request,
    ).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Follow-up deleted successfully".to_string(),
    )))
}
