// src/audit.rs - Activity log (registro_actividad)

use actix_web::HttpRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub id_usuario: Option<Uuid>,
    pub usuario_nombre: Option<String>,
    pub accion: String,
    pub entidad: String,
    pub id_entidad: Option<String>,
    pub descripcion: Option<String>,
    pub ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Inserts one activity row.
pub async fn log_activity(
    pool: &PgPool,
    id_usuario: Option<Uuid>,
    accion: &str,
    entidad: &str,
    id_entidad: Option<&str>,
    descripcion: Option<&str>,
    request: Option<&HttpRequest>,
) -> Result<(), sqlx::Error> {
    let ip = request.and_then(|req| {
        req.connection_info()
            .realip_remote_addr()
            .map(|s| s.to_string())
    });

    let user_agent = request.and_then(|req| {
        req.headers()
            .get("User-Agent")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    });

    sqlx::query(
        r#"INSERT INTO registro_actividad
           (id, id_usuario, accion, entidad, id_entidad, descripcion, ip, user_agent)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#
    )
    .bind(Uuid::new_v4())
    .bind(id_usuario)
    .bind(accion)
    .bind(entidad)
    .bind(id_entidad)
    .bind(descripcion)
    .bind(&ip)
    .bind(&user_agent)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fire-and-log variant for handlers; a failed insert never fails the request.
pub async fn audit(
    pool: &PgPool,
    user_sub: &str,
    accion: &str,
    entidad: &str,
    id_entidad: &Uuid,
    descripcion: &str,
    request: &HttpRequest,
) {
    let id_usuario = Uuid::parse_str(user_sub).ok();
    if let Err(e) = log_activity(
        pool,
        id_usuario,
        accion,
        entidad,
        Some(&id_entidad.to_string()),
        Some(descripcion),
        Some(request),
    ).await {
        log::error!("Failed to write activity log: {}", e);
    }
}

pub async fn recent_activity(pool: &PgPool, limit: i64) -> Result<Vec<ActivityEntry>, sqlx::Error> {
    sqlx::query_as::<_, ActivityEntry>(
        r#"SELECT r.id, r.id_usuario, u.nombre AS usuario_nombre, r.accion, r.entidad,
                  r.id_entidad, r.descripcion, r.ip, r.created_at
           FROM registro_actividad r
           LEFT JOIN usuarios u ON u.id = r.id_usuario
           ORDER BY r.created_at DESC
           LIMIT $1"#
    )
    .bind(limit.clamp(1, 100))
    .fetch_all(pool)
    .await
}
