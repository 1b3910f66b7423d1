// src/student_handlers.rs
//! Student records: paginated list, CRUD with soft delete, per-student summary.

use actix_web::{web, HttpRequest, HttpResponse};
use log::info;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::audit::audit;
use crate::auth::{check_permission, get_current_user};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{ApiResponse, PaginatedResponse};
use crate::models::{
    CreateStudentRequest, Student, StudentListQuery, StudentSummary, UpdateStudentRequest,
};
use crate::query_builder::{fetch_all, fetch_count, SafeQueryBuilder};
use crate::validator::{normalize_rut, Sanitize};
use crate::AppState;

/// Fetches a student that has not been soft-deleted.
pub async fn find_active_student(pool: &PgPool, id: &Uuid) -> ApiResult<Student> {
    sqlx::query_as::<_, Student>("SELECT * FROM estudiantes WHERE id = $1 AND deleted_at IS NULL")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::student_not_found(id))
}

/// Rejects references to missing or soft-deleted students before inserting child rows.
pub async fn ensure_student_exists(pool: &PgPool, id: &Uuid) -> ApiResult<()> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM estudiantes WHERE id = $1 AND deleted_at IS NULL)"
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    if exists {
        Ok(())
    } else {
        Err(ApiError::student_not_found(id))
    }
}

// ==================== LIST ====================

pub async fn get_students(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<StudentListQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();

    let mut builder = SafeQueryBuilder::new("estudiantes e");
    builder
        .add_raw_condition("e.deleted_at IS NULL")
        .add_search(&["e.nombre", "e.apellido", "e.rut", "e.curso"], query.search.as_deref())
        .add_optional_match("e.estado", query.estado.as_deref())
        .add_optional_match("e.curso", query.curso.as_deref());

    let (count_sql, count_params) = builder.build_count();
    let total = fetch_count(&app_state.db_pool, &count_sql, &count_params).await?;

    builder
        .order_by("e.nombre", query.sort_order.as_deref().unwrap_or("asc"))
        .paginate(per_page, offset);
    let (sql, params) = builder.build_select("e.*");
    let students: Vec<Student> = fetch_all(&app_state.db_pool, &sql, &params).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(
        PaginatedResponse::new(students, total, page, per_page),
    )))
}

// ==================== GET ====================

pub async fn get_student(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let student = find_active_student(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(student)))
}

pub async fn get_student_summary(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    let pool = &app_state.db_pool;
    let student = find_active_student(pool, &id).await?;

    let count = |sql: &'static str| {
        sqlx::query_scalar::<_, i64>(sql).bind(id).fetch_one(pool)
    };

    let (entrevistas, intervenciones, alertas_abiertas, asistencias_presente, asistencias_ausente, recursos_recibidos) =
        futures::try_join!(
            count("SELECT COUNT(*) FROM entrevistas WHERE id_estudiante = $1"),
            count("SELECT COUNT(*) FROM intervenciones WHERE id_estudiante = $1"),
            count("SELECT COUNT(*) FROM alertas WHERE id_estudiante = $1 AND estado <> 'resuelta'"),
            count("SELECT COUNT(*) FROM asistencia WHERE id_estudiante = $1 AND tipo = 'Presente'"),
            count("SELECT COUNT(*) FROM asistencia WHERE id_estudiante = $1 AND tipo = 'Ausente'"),
            count("SELECT COALESCE(SUM(cantidad), 0)::BIGINT FROM entregas_recursos WHERE id_estudiante = $1"),
        )?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(StudentSummary {
        student,
        entrevistas,
        intervenciones,
        alertas_abiertas,
        asistencias_presente,
        asistencias_ausente,
        recursos_recibidos,
    })))
}

// ==================== CREATE ====================

pub async fn create_student(
    app_state: web::Data<Arc<AppState>>,
    body: web::Json<CreateStudentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let id = Uuid::new_v4();
    let student: Student = sqlx::query_as(
        r#"INSERT INTO estudiantes (
               id, nombre, apellido, rut, fecha_nacimiento, email, telefono, direccion, curso,
               apoderado_nombre, apoderado_telefono, apoderado_email, estado
           ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, COALESCE($13, 'Activo'))
           RETURNING *"#
    )
    .bind(id)
    .bind(&body.nombre)
    .bind(&body.apellido)
    .bind(normalize_rut(&body.rut))
    .bind(body.fecha_nacimiento)
    .bind(&body.email)
    .bind(&body.telefono)
    .bind(&body.direccion)
    .bind(&body.curso)
    .bind(&body.apoderado_nombre)
    .bind(&body.apoderado_telefono)
    .bind(&body.apoderado_email)
    .bind(&body.estado)
    .fetch_one(&app_state.db_pool)
    .await?;

    info!("Created student {} ({})", student.nombre, id);
    audit(
        &app_state.db_pool, &claims.sub, "create", "estudiante", &id,
        &format!("Estudiante {} registrado", student.nombre), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        student,
        "Student created successfully".to_string(),
    )))
}

// ==================== UPDATE ====================

pub async fn update_student(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    body: web::Json<UpdateStudentRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let id = path.into_inner();
    let mut body = body.into_inner();
    body.sanitize();
    body.validate()?;

    let student: Student = sqlx::query_as(
        r#"UPDATE estudiantes SET
               nombre = COALESCE($1, nombre),
               apellido = COALESCE($2, apellido),
               rut = COALESCE($3, rut),
               fecha_nacimiento = COALESCE($4, fecha_nacimiento),
               email = COALESCE($5, email),
               telefono = COALESCE($6, telefono),
               direccion = COALESCE($7, direccion),
               curso = COALESCE($8, curso),
               apoderado_nombre = COALESCE($9, apoderado_nombre),
               apoderado_telefono = COALESCE($10, apoderado_telefono),
               apoderado_email = COALESCE($11, apoderado_email),
               estado = COALESCE($12, estado),
               updated_at = NOW()
           WHERE id = $13 AND deleted_at IS NULL
           RETURNING *"#
    )
    .bind(&body.nombre)
    .bind(&body.apellido)
    .bind(body.rut.as_deref().map(normalize_rut))
    .bind(body.fecha_nacimiento)
    .bind(&body.email)
    .bind(&body.telefono)
    .bind(&body.direccion)
    .bind(&body.curso)
    .bind(&body.apoderado_nombre)
    .bind(&body.apoderado_telefono)
    .bind(&body.apoderado_email)
    .bind(&body.estado)
    .bind(id)
    .fetch_optional(&app_state.db_pool)
    .await?
    .ok_or_else(|| ApiError::student_not_found(&id))?;

    info!("Updated student {}", id);
    audit(&app_state.db_pool, &claims.sub, "update", "estudiante", &id, "Estudiante actualizado", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        student,
        "Student updated successfully".to_string(),
    )))
}

// ==================== DELETE ====================

pub async fn delete_student(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_delete_students())?;
    let id = path.into_inner();

    let result = sqlx::query(
        "UPDATE estudiantes SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL"
    )
    .bind(id)
    .execute(&app_state.db_pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::student_not_found(&id));
    }

    info!("Soft-deleted student {}", id);
    audit(&app_state.db_pool, &claims.sub, "delete", "estudiante", &id, "Estudiante eliminado", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Student deleted successfully".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use crate::test_support::{self, bearer, db_app, unique_rut};
    use actix_web::{http::StatusCode, test};
    use serde_json::{json, Value};

    #[actix_rt::test]
    async fn test_created_student_reads_back() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let admin = test_support::insert_user(&pool, &auth, "admin").await;
        let app = db_app!(pool, auth);
        let rut = unique_rut();

        let req = test::TestRequest::post()
            .uri("/api/estudiantes")
            .insert_header(bearer(&auth, &admin))
            .set_json(json!({
                "nombre": "Matías",
                "apellido": "Soto",
                "rut": rut,
                "curso": "3°A",
                "email": "matias.soto@colegio.cl"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let id = created["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/estudiantes/{}", id))
            .insert_header(bearer(&auth, &admin))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let fetched: Value = test::read_body_json(resp).await;

        let student = &fetched["data"];
        assert_eq!(student["id"], id.as_str());
        assert_eq!(student["nombre"], "Matías");
        assert_eq!(student["apellido"], "Soto");
        assert_eq!(student["rut"], rut.as_str());
        assert_eq!(student["curso"], "3°A");
        assert_eq!(student["email"], "matias.soto@colegio.cl");
        assert_eq!(student["estado"], "Activo");
    }

    #[actix_rt::test]
    async fn test_deleted_student_is_not_found() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let admin = test_support::insert_user(&pool, &auth, "admin").await;
        let id = test_support::insert_student(&pool).await;
        let app = db_app!(pool, auth);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/estudiantes/{}", id))
            .insert_header(bearer(&auth, &admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        for uri in [format!("/api/estudiantes/{}", id), format!("/api/estudiantes/{}/resumen", id)] {
            let req = test::TestRequest::get()
                .uri(&uri)
                .insert_header(bearer(&auth, &admin))
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND, "{}", uri);
        }

        // A second delete finds nothing left to remove.
        let req = test::TestRequest::delete()
            .uri(&format!("/api/estudiantes/{}", id))
            .insert_header(bearer(&auth, &admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_rt::test]
    async fn test_rut_can_be_enrolled_again_after_delete() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let admin = test_support::insert_user(&pool, &auth, "admin").await;
        let app = db_app!(pool, auth);
        let rut = unique_rut();

        let enroll = || {
            test::TestRequest::post()
                .uri("/api/estudiantes")
                .insert_header(bearer(&auth, &admin))
                .set_json(json!({ "nombre": "Josefa", "rut": rut }))
                .to_request()
        };

        let resp = test::call_service(&app, enroll()).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let first: Value = test::read_body_json(resp).await;

        assert_eq!(test::call_service(&app, enroll()).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/estudiantes/{}", first["data"]["id"].as_str().unwrap()))
            .insert_header(bearer(&auth, &admin))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        assert_eq!(test::call_service(&app, enroll()).await.status(), StatusCode::CREATED);
    }
}
