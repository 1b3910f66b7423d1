// src/interview_handlers.rs
//! Interviews, including registration from a scheduled agenda entry.
//!
//! Completing an agenda entry touches three tables (entrevistas, asistencia,
//! agenda). [`complete_agenda_entry`] runs every write in one transaction
//! with the agenda row locked, so concurrent completions of the same entry
//! serialize and the loser sees a 409.

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
    check_date_range, AgendaEntry, Attendance, CompleteFromAgendaRequest, CreateInterviewRequest,
    Interview, InterviewListItem, InterviewListQuery, InterviewStatus, UpdateInterviewRequest,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

const LIST_FROM: &str = "entrevistas i \
     JOIN estudiantes e ON e.id = i.id_estudiante \
     LEFT JOIN usuarios u ON u.id = i.id_orientador";

const LIST_FIELDS: &str = "i.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre, \
     u.nombre AS orientador_nombre";

async fn find_interview(pool: &PgPool, id: &Uuid) -> ApiResult<Interview> {
    sqlx::query_as::<_, Interview>("SELECT * FROM entrevistas WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Interview"))
}

fn ensure_editable(interview: &Interview) -> ApiResult<()> {
    if interview.status().is_some_and(|s| s.is_locked()) {
        return Err(ApiError::conflict("Completed interviews cannot be modified"));
    }
    Ok(())
}

// ==================== LIST / GET ====================

pub async fn get_interviews(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<InterviewListQuery>,
) -> ApiResult<HttpResponse> {
    check_date_range(query.desde, query.hasta)?;

    let mut builder = SafeQueryBuilder::new(LIST_FROM);
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("i.id_estudiante", query.id_estudiante)
        .add_uuid("i.id_orientador", query.id_orientador)
        .add_optional_match("i.estado", query.estado.as_deref())
        .add_date_range("i.fecha", query.desde, query.hasta)
        .order_by("i.fecha", "desc");

    let (sql, params) = builder.build_select(LIST_FIELDS);
    let interviews: Vec<InterviewListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(interviews)))
}

pub async fn get_interview(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let sql = format!("SELECT {} FROM {} WHERE i.id = $1", LIST_FIELDS, LIST_FROM);
    let interview: InterviewListItem = sqlx::query_as(&sql)
        .bind(path.into_inner())
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Interview"))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(interview)))
}

// ==================== CREATE ====================

pub async fn create_interview(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateInterviewRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let orientador = match body.id_orientador {
        Some(id) => Some(id),
        None => Some(claims.user_id()?),
    };

    let interview: Interview = sqlx::query_as(
        r#"INSERT INTO entrevistas (id, id_estudiante, id_orientador, fecha, motivo, observaciones, conclusiones, estado)
           VALUES ($1, $2, $3, COALESCE($4, CURRENT_DATE), $5, $6, $7, COALESCE($8, 'pendiente'))
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_estudiante)
    .bind(orientador)
    .bind(body.fecha)
    .bind(&body.motivo)
    .bind(&body.observaciones)
    .bind(&body.conclusiones)
    .bind(&body.estado)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Created interview {} for student {}", id, body.id_estudiante);
    audit(&app_state.db_pool, &claims.sub, "create", "entrevista", &id, "Entrevista registrada", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        interview,
        "Interview created successfully".to_string(),
    )))
}

// ==================== UPDATE / DELETE ====================

pub async fn update_interview(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateInterviewRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let existing = find_interview(&app_state.db_pool, &id).await?;
    ensure_editable(&existing)?;

    // The estado guard makes a concurrent completion win over this update.
    let interview: Interview = sqlx::query_as(
        r#"UPDATE entrevistas SET
               id_orientador = COALESCE($1, id_orientador),
               fecha = COALESCE($2, fecha),
               motivo = COALESCE($3, motivo),
               observaciones = COALESCE($4, observaciones),
               conclusiones = COALESCE($5, conclusiones),
               estado = COALESCE($6, estado),
               updated_at = NOW()
           WHERE id = $7 AND estado <> 'realizada'
           RETURNING *"#
    )
    .bind(body.id_orientador)
    .bind(body.fecha)
    .bind(&body.motivo)
    .bind(&body.observaciones)
    .bind(&body.conclusiones)
    .bind(&body.estado)
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::conflict("Completed interviews cannot be modified"))?;

    info!("Updated interview {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "entrevista", &id, "Entrevista actualizada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        interview,
        "Interview updated successfully".to_string(),
    )))
}

pub async fn delete_interview(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    let existing = find_interview(&app_state.db_pool, &id).await?;
    ensure_editable(&existing)?;

    let result = sqlx::query("DELETE FROM entrevistas WHERE id = $1 AND estado <> 'realizada'")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Completed interviews cannot be modified"));
    }

    info!("Deleted interview {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "entrevista", &id, "Entrevista eliminada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Interview deleted successfully".to_string(),
    )))
}

// ==================== AGENDA COMPLETION ====================

#[derive(Debug, serde::Serialize)]
pub struct AgendaCompletion {
    pub entrevista: Interview,
    pub asistencia: Attendance,
    pub agenda: AgendaEntry,
}

/// Registers the interview for an agenda entry and marks the student present.
#[tracing::instrument(skip(pool, body))]
pub async fn complete_agenda_entry(
    pool: &PgPool,
    agenda_id: Uuid,
    orientador: Uuid,
    body: &CompleteFromAgendaRequest,
) -> ApiResult<AgendaCompletion> {
    let mut tx = pool.begin().await?;

    // Entries of soft-deleted students are treated as missing.
    let entry: AgendaEntry = sqlx::query_as(
        r#"SELECT a.* FROM agenda a
           JOIN estudiantes e ON e.id = a.id_estudiante
           WHERE a.id = $1 AND e.deleted_at IS NULL
           FOR UPDATE OF a"#
    )
    .bind(agenda_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Agenda entry"))?;

    if !entry.is_open() {
        return Err(ApiError::Conflict(format!(
            "Agenda entry is already {}",
            entry.estado
        )));
    }

    let entrevista: Interview = sqlx::query_as(
        r#"INSERT INTO entrevistas
               (id, id_estudiante, id_orientador, id_agenda, fecha, motivo, observaciones, conclusiones, estado)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           RETURNING *"#
    )
    .bind(Uuid::new_v4())
    .bind(entry.id_estudiante)
    .bind(entry.id_orientador.unwrap_or(orientador))
    .bind(entry.id)
    .bind(entry.fecha)
    .bind(body.motivo.as_deref().unwrap_or(&entry.motivo))
    .bind(&body.observaciones)
    .bind(&body.conclusiones)
    .bind(InterviewStatus::Realizada.as_ref())
    .fetch_one(&mut *tx)
    .await?;

    let asistencia: Attendance = sqlx::query_as(
        r#"INSERT INTO asistencia (id, id_estudiante, id_agenda, fecha, tipo)
           VALUES ($1, $2, $3, $4, 'Presente')
           ON CONFLICT (id_agenda) DO UPDATE SET tipo = 'Presente', updated_at = NOW()
           RETURNING *"#
    )
    .bind(Uuid::new_v4())
    .bind(entry.id_estudiante)
    .bind(entry.id)
    .bind(entry.fecha)
    .fetch_one(&mut *tx)
    .await?;

    let agenda: AgendaEntry = sqlx::query_as(
        "UPDATE agenda SET estado = 'realizada', updated_at = NOW() WHERE id = $1 RETURNING *"
    )
    .bind(entry.id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(AgendaCompletion { entrevista, asistencia, agenda })
}

pub async fn register_from_agenda(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Bytes,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let agenda_id = path.into_inner();
    let mut body: CompleteFromAgendaRequest = parse_optional_json(&body)?;
    body.sanitize();
    body.validate()?;

    let completion = complete_agenda_entry(&app_state.db_pool, agenda_id, claims.user_id()?, &body).await?;

    info!(
        "Agenda entry {} completed as interview {}",
        agenda_id, completion.entrevista.id
    );
    audit(
        &app_state.db_pool, &claims.sub, "complete", "agenda", &agenda_id,
        &format!("Entrevista {} registrada desde agenda", completion.entrevista.id), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        completion,
        "Interview registered from agenda".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use actix_web::{http::StatusCode, test};
    use chrono::{NaiveDate, Utc};

    fn interview(estado: &str) -> Interview {
        Interview {
            id: Uuid::new_v4(),
            id_estudiante: Uuid::new_v4(),
            id_orientador: None,
            id_agenda: None,
            fecha: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            motivo: "Rendimiento".to_string(),
            observaciones: None,
            conclusiones: None,
            estado: estado.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[::std::prelude::v1::test]
    fn test_completed_interview_is_not_editable() {
        assert!(ensure_editable(&interview("pendiente")).is_ok());
        assert!(ensure_editable(&interview("cancelada")).is_ok());
        assert!(matches!(ensure_editable(&interview("realizada")), Err(ApiError::Conflict(_))));
    }

    #[::std::prelude::v1::test]
    fn test_list_query_shape() {
        let mut builder = SafeQueryBuilder::new(LIST_FROM);
        builder.add_raw_condition("e.deleted_at IS NULL").add_uuid("i.id_estudiante", Some(Uuid::nil()));
        let (sql, params) = builder.build_select(LIST_FIELDS);
        assert!(sql.contains("LEFT JOIN usuarios u ON u.id = i.id_orientador"));
        assert!(sql.contains("i.id_estudiante = $1::uuid"));
        assert_eq!(params.len(), 1);
    }

    async fn completion_counts(pool: &PgPool, agenda_id: Uuid) -> (i64, i64) {
        let interviews: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entrevistas WHERE id_agenda = $1 AND estado = 'realizada'",
        )
        .bind(agenda_id)
        .fetch_one(pool)
        .await
        .unwrap();
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM asistencia WHERE id_agenda = $1 AND tipo = 'Presente'",
        )
        .bind(agenda_id)
        .fetch_one(pool)
        .await
        .unwrap();
        (interviews, present)
    }

    #[actix_rt::test]
    async fn test_agenda_completion_registers_one_interview() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let orientador = test_support::insert_user(&pool, &auth, "orientador").await;
        let student = test_support::insert_student(&pool).await;
        let agenda_id = test_support::insert_agenda_entry(&pool, student, orientador.id).await;

        let done = complete_agenda_entry(&pool, agenda_id, orientador.id, &CompleteFromAgendaRequest::default())
            .await
            .unwrap();
        assert_eq!(done.entrevista.estado, "realizada");
        assert_eq!(done.entrevista.id_agenda, Some(agenda_id));
        assert_eq!(done.entrevista.motivo, "Seguimiento de notas");
        assert_eq!(done.asistencia.tipo, "Presente");
        assert_eq!(done.agenda.estado, "realizada");
        assert_eq!(completion_counts(&pool, agenda_id).await, (1, 1));

        let again = complete_agenda_entry(&pool, agenda_id, orientador.id, &CompleteFromAgendaRequest::default()).await;
        assert!(matches!(again, Err(ApiError::Conflict(_))));
        assert_eq!(completion_counts(&pool, agenda_id).await, (1, 1));
    }

    #[actix_rt::test]
    async fn test_agenda_completion_skips_deleted_students() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let orientador = test_support::insert_user(&pool, &auth, "orientador").await;
        let student = test_support::insert_student(&pool).await;
        let agenda_id = test_support::insert_agenda_entry(&pool, student, orientador.id).await;
        sqlx::query("UPDATE estudiantes SET deleted_at = NOW() WHERE id = $1")
            .bind(student)
            .execute(&pool)
            .await
            .unwrap();

        let result = complete_agenda_entry(&pool, agenda_id, orientador.id, &CompleteFromAgendaRequest::default()).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
        assert_eq!(completion_counts(&pool, agenda_id).await, (0, 0));
    }

    #[actix_rt::test]
    async fn test_register_from_agenda_without_body() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let orientador = test_support::insert_user(&pool, &auth, "orientador").await;
        let student = test_support::insert_student(&pool).await;
        let agenda_id = test_support::insert_agenda_entry(&pool, student, orientador.id).await;
        let app = test_support::db_app!(pool, auth);

        let req = test::TestRequest::post()
            .uri(&format!("/api/entrevistas/registrar-desde-agenda/{}", agenda_id))
            .insert_header(test_support::bearer(&auth, &orientador))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["entrevista"]["id_agenda"], agenda_id.to_string());
        assert_eq!(body["data"]["asistencia"]["tipo"], "Presente");
        assert_eq!(completion_counts(&pool, agenda_id).await, (1, 1));
    }
}
