// src/agenda_handlers.rs
//! Scheduled appointments. Every entry owns one attendance row that starts as
//! `Pendiente` and is resolved when the entry is completed or cancelled.

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::audit::audit;
use crate::auth::get_current_user;
use crate::error::{parse_optional_json, ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{
    check_date_range, AgendaEntry, AgendaListItem, AgendaListQuery, CancelAgendaRequest,
    CreateAgendaRequest, UpdateAgendaRequest,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

const LIST_FROM: &str = "agenda a \
     JOIN estudiantes e ON e.id = a.id_estudiante \
     LEFT JOIN usuarios u ON u.id = a.id_orientador \
     LEFT JOIN asistencia s ON s.id_agenda = a.id";

const LIST_FIELDS: &str = "a.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre, \
     u.nombre AS orientador_nombre, s.tipo AS asistencia";

async fn find_entry(pool: &PgPool, id: &Uuid) -> ApiResult<AgendaEntry> {
    sqlx::query_as::<_, AgendaEntry>("SELECT * FROM agenda WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Agenda entry"))
}

fn ensure_open(entry: &AgendaEntry) -> ApiResult<()> {
    if entry.is_open() {
        Ok(())
    } else {
        Err(ApiError::Conflict(format!("Agenda entry is already {}", entry.estado)))
    }
}

pub async fn get_agenda(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<AgendaListQuery>,
) -> ApiResult<HttpResponse> {
    check_date_range(query.desde, query.hasta)?;

    let mut builder = SafeQueryBuilder::new(LIST_FROM);
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("a.id_estudiante", query.id_estudiante)
        .add_uuid("a.id_orientador", query.id_orientador)
        .add_optional_match("a.estado", query.estado.as_deref())
        .add_date_range("a.fecha", query.desde, query.hasta)
        .order_by("a.fecha", "asc");

    let (sql, params) = builder.build_select(LIST_FIELDS);
    let entries: Vec<AgendaListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}

pub async fn get_agenda_entry(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let sql = format!("SELECT {} FROM {} WHERE a.id = $1", LIST_FIELDS, LIST_FROM);
    let entry: AgendaListItem = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Agenda entry"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(entry)))
}

pub async fn create_agenda_entry(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateAgendaRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let orientador = match body.id_orientador {
        Some(id) => id,
        None => claims.user_id()?,
    };

    let mut tx = app_state.db_pool.begin().await?;

    let entry: AgendaEntry = sqlx::query_as(
        r#"INSERT INTO agenda (id, id_estudiante, id_orientador, fecha, hora, motivo, lugar)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_estudiante)
    .bind(orientador)
    .bind(body.fecha)
    .bind(body.hora)
    .bind(&body.motivo)
    .bind(&body.lugar)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"INSERT INTO asistencia (id, id_estudiante, id_agenda, fecha, tipo)
           VALUES ($1, $2, $3, $4, 'Pendiente')"#
    )
    .bind(Uuid::new_v4())
    .bind(entry.id_estudiante)
    .bind(entry.id)
    .bind(entry.fecha)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("Scheduled agenda entry {} on {}", id, entry.fecha);
    audit(&app_state.db_pool, &claims.sub, "create", "agenda", &id, "Cita agendada", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        entry,
        "Agenda entry created successfully".to_string(),
    )))
}

pub async fn update_agenda_entry(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateAgendaRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let existing = find_entry(&app_state.db_pool, &id).await?;
    ensure_open(&existing)?;

    let mut tx = app_state.db_pool.begin().await?;

    let entry: AgendaEntry = sqlx::query_as(
        r#"UPDATE agenda SET
               id_orientador = COALESCE($1, id_orientador),
               fecha = COALESCE($2, fecha),
               hora = COALESCE($3, hora),
               motivo = COALESCE($4, motivo),
               lugar = COALESCE($5, lugar),
               updated_at = NOW()
           WHERE id = $6 AND estado = 'programada'
           RETURNING *"#
    )
    .bind(body.id_orientador)
    .bind(body.fecha)
    .bind(body.hora)
    .bind(&body.motivo)
    .bind(&body.lugar)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::conflict("Agenda entry is no longer scheduled"))?;

    // Rescheduling moves the pending attendance row with it.
    if body.fecha.is_some() {
        sqlx::query(
            "UPDATE asistencia SET fecha = $1, updated_at = NOW() WHERE id_agenda = $2 AND tipo = 'Pendiente'"
        )
        .bind(entry.fecha)
        .bind(id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    info!("Updated agenda entry {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "agenda", &id, "Cita actualizada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        entry,
        "Agenda entry updated successfully".to_string(),
    )))
}

pub async fn cancel_agenda_entry(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Bytes,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body: CancelAgendaRequest = parse_optional_json(&body)?;
    body.sanitize();
    body.validate()?;

    let mut tx = app_state.db_pool.begin().await?;

    let existing: AgendaEntry = sqlx::query_as("SELECT * FROM agenda WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::not_found("Agenda entry"))?;
    ensure_open(&existing)?;

    let entry: AgendaEntry = sqlx::query_as(
        "UPDATE agenda SET estado = 'cancelada', updated_at = NOW() WHERE id = $1 RETURNING *"
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"UPDATE asistencia SET tipo = 'Ausente', justificacion = COALESCE($1, justificacion), updated_at = NOW()
           WHERE id_agenda = $2 AND tipo = 'Pendiente'"#
    )
    .bind(&body.justificacion)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("Cancelled agenda entry {}", id);
    audit(&app_state.db_pool, &claims.sub, "cancel", "agenda", &id, "Cita cancelada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        entry,
        "Agenda entry cancelled".to_string(),
    )))
}

pub async fn delete_agenda_entry(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    // The linked attendance row goes with it (ON DELETE CASCADE); a linked
    // interview keeps its data and loses the reference.
    let result = sqlx::query("DELETE FROM agenda WHERE id = $1")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Agenda entry"));
    }

    info!("Deleted agenda entry {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "agenda", &id, "Cita eliminada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Agenda entry deleted successfully".to_string(),
    )))
}
