// src/communication_handlers.rs

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
    check_date_range, Communication, CommunicationListItem, CommunicationListQuery,
    CreateCommunicationRequest,
};
use crate::query_builder::{fetch_all, SafeQueryBuilder};
use crate::student_handlers::ensure_student_exists;
use crate::validator::Sanitize;
use crate::AppState;

pub async fn get_communications(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<CommunicationListQuery>,
) -> ApiResult<HttpResponse> {
    check_date_range(query.desde, query.hasta)?;

    let mut builder = SafeQueryBuilder::new("comunicaciones c JOIN estudiantes e ON e.id = c.id_estudiante");
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_uuid("c.id_estudiante", query.id_estudiante)
        .add_optional_match("c.medio", query.medio.as_deref())
        .add_date_range("c.fecha", query.desde, query.hasta)
        .order_by("c.fecha", "desc");

    let (sql, params) = builder.build_select(
        "c.*, TRIM(e.nombre || ' ' || COALESCE(e.apellido, '')) AS estudiante_nombre",
    );
    let rows: Vec<CommunicationListItem> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(rows)))
}

pub async fn create_communication(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateCommunicationRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    ensure_student_exists(&app_state.db_pool, &body.id_estudiante).await?;

    let id = Uuid::new_v4();
    let communication: Communication = sqlx::query_as(
        r#"INSERT INTO comunicaciones (id, id_estudiante, medio, asunto, contenido, fecha, registrado_por)
           VALUES ($1, $2, $3, $4, $5, COALESCE($6, CURRENT_DATE), $7)
           RETURNING *"#
    )
    .bind(id)
    .bind(body.id_estudiante)
    .bind(&body.medio)
    .bind(&body.asunto)
    .bind(&body.contenido)
    .bind(body.fecha)
    .bind(claims.user_id()?)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Logged {} communication {} for student {}", communication.medio, id, body.id_estudiante);
    audit(&app_state.db_pool, &claims.sub, "create", "comunicacion", &id, "Comunicación registrada", &http_request).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        communication,
        "Communication recorded successfully".to_string(),
    )))
}

pub async fn delete_communication(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();

    let result = sqlx::query("DELETE FROM comunicaciones WHERE id = $1")
        .bind(id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Communication"));
    }

    info!("Deleted communication {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "comunicacion", &id, "Comunicación eliminada", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Communication deleted successfully".to_string(),
    )))
}
