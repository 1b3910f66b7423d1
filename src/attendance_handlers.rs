// src/attendance_handlers.rs

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
    check_date_range, Attendance, AttendanceListItem, AttendanceListQuery, CreateAttendanceRequest,
    UpdateAttendanceRequest,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

const LIST_FROM: &str = "asistencia s JOIN estudiantes e ON e.id = s.id_estudiante";
const LIST_FIELDS: &str = "s.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre";

pub async fn get_attendance_list(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AttendanceListQuery>,
) -> ApiResult<HttpResponse> {
    check_date_range(query.desde, query.hasta)?;

    let mut builder = SafeQueryBuilder::new(LIST_FROM);
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("s.id_estudiante", query.id_estudiante)
        .add_optional_match("s.tipo", query.tipo.as_deref())
        .add_date_range("s.fecha", query.desde, query.hasta)
        .order_by("s.fecha", "desc");

    let (sql, params) = builder.build_select(LIST_FIELDS);
    let rows: Vec<AttendanceListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(rows)))
}

pub async fn get_attendance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let sql = format!("SELECT {} FROM {} WHERE s.id = $1", LIST_FIELDS, LIST_FROM);
    let row: AttendanceListItem = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Attendance record"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(row)))
}

pub async fn create_attendance(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateAttendanceRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let attendance: Attendance = sqlx::query_as(
        r#"INSERT INTO asistencia (id, id_estudiante, fecha, tipo, justificacion)
           VALUES ($1, $2, COALESCE($3, CURRENT_DATE), $4, $5)
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_estudiante)
    .bind(body.fecha)
    .bind(&body.tipo)
    .bind(&body.justificacion)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Recorded attendance {} ({}) for student {}", id, attendance.tipo, body.id_estudiante);
    audit(&app_state.db_pool, &claims.sub, "create", "asistencia", &id, "Asistencia registrada", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        attendance,
        "Attendance recorded successfully".to_string(),
    )))
}

pub async fn update_attendance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateAttendanceRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let attendance: Attendance = sqlx::query_as(
        r#"UPDATE asistencia SET
               fecha = COALESCE($1, fecha),
               tipo = COALESCE($2, tipo),
               justificacion = COALESCE($3, justificacion),
               updated_at = NOW()
           WHERE id = $4
           RETURNING *"#
    )
    .bind(body.fecha)
    .bind(&body.tipo)
    .bind(&body.justificacion)
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Attendance record"))?;

    info!("Updated attendance {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "asistencia", &id, "Asistencia actualizada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        attendance,
        "Attendance updated successfully".to_string(),
    )))
}

pub async fn delete_attendance(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    let result = sqlx::query("DELETE FROM asistencia WHERE id = $1")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Attendance record"));
    }

    info!("Deleted attendance {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "asistencia", &id, "Asistencia eliminada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Attendance deleted successfully".to_string(),
    )))
}
