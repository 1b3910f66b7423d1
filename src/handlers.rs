// src/handlers.rs
use actix_web::{web, HttpResponse};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;

use crate::audit::recent_activity;
use crate::error::ApiResult;
use crate::models::DashboardStats;
use crate::AppState;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 { (total + per_page - 1) / per_page } else { 0 };
        Self {
            data,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

// ==================== DASHBOARD STATISTICS ====================

const MONTH_FILTER: &str = "EXTRACT(MONTH FROM {col}) = EXTRACT(MONTH FROM CURRENT_DATE) \
     AND EXTRACT(YEAR FROM {col}) = EXTRACT(YEAR FROM CURRENT_DATE)";

fn this_month(column: &str) -> String {
    MONTH_FILTER.replace("{col}", column)
}

async fn count(pool: &PgPool, sql: String) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(&sql).fetch_one(pool).await
}

async fn attendance_counts(pool: &PgPool) -> Result<(i64, i64), sqlx::Error> {
    let sql = format!(
        "SELECT COUNT(*) FILTER (WHERE tipo = 'Presente'), COUNT(*) FILTER (WHERE tipo = 'Ausente') \
         FROM asistencia WHERE {}",
        this_month("fecha")
    );
    sqlx::query_as::<_, (i64, i64)>(&sql).fetch_one(pool).await
}

/// Share of Presente over Presente + Ausente, rounded to a whole percent.
pub fn attendance_percentage(presentes: i64, ausentes: i64) -> i64 {
    let total = presentes.max(0) + ausentes.max(0);
    if total == 0 {
        return 0;
    }
    ((presentes.max(0) as f64 * 100.0 / total as f64).round() as i64).clamp(0, 100)
}

pub async fn load_dashboard_stats(pool: &PgPool) -> Result<DashboardStats, sqlx::Error> {
    let (
        total_estudiantes,
        estudiantes_activos,
        entrevistas_mes,
        intervenciones_mes,
        (presentes, ausentes),
        recursos_entregados_mes,
        alertas_activas,
        agenda_pendiente,
    ) = futures::try_join!(
        count(pool, "SELECT COUNT(*) FROM estudiantes WHERE deleted_at IS NULL".to_string()),
        count(
            pool,
            "SELECT COUNT(*) FROM estudiantes WHERE deleted_at IS NULL AND estado = 'Activo'".to_string()
        ),
        count(pool, format!("SELECT COUNT(*) FROM entrevistas WHERE {}", this_month("fecha"))),
        count(pool, format!("SELECT COUNT(*) FROM intervenciones WHERE {}", this_month("fecha"))),
        attendance_counts(pool),
        count(
            pool,
            format!("SELECT COUNT(*) FROM entregas_recursos WHERE {}", this_month("fecha_entrega"))
        ),
        count(
            pool,
            "SELECT COUNT(*) FROM alertas WHERE estado IN ('activa', 'en_proceso')".to_string()
        ),
        count(
            pool,
            "SELECT COUNT(*) FROM agenda WHERE estado = 'programada' AND fecha >= CURRENT_DATE".to_string()
        ),
    )?;

    Ok(DashboardStats {
        total_estudiantes,
        estudiantes_activos,
        entrevistas_mes,
        intervenciones_mes,
        porcentaje_asistencia: attendance_percentage(presentes, ausentes),
        recursos_entregados_mes,
        alertas_activas,
        agenda_pendiente,
    })
}

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let stats = load_dashboard_stats(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct MonthCount {
    pub mes: String,
    pub total: i64,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PriorityCount {
    pub prioridad: String,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct Trends {
    pub entrevistas_por_mes: Vec<MonthCount>,
    pub alertas_por_prioridad: Vec<PriorityCount>,
}

/// `YYYY-MM` keys for the `months` months ending at `today`, oldest first.
pub fn month_keys(today: NaiveDate, months: u32) -> Vec<String> {
    let current = today.year() * 12 + today.month0() as i32;
    (0..months as i32)
        .rev()
        .map(|back| {
            let index = current - back;
            format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
        })
        .collect()
}

/// Months without interviews are reported as zero.
fn fill_months(keys: Vec<String>, rows: Vec<MonthCount>) -> Vec<MonthCount> {
    keys.into_iter()
        .map(|mes| {
            let total = rows.iter().find(|r| r.mes == mes).map(|r| r.total).unwrap_or(0);
            MonthCount { mes, total }
        })
        .collect()
}

pub async fn get_dashboard_trends(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let pool = &app_state.db_pool;

    let (monthly, priorities) = futures::try_join!(
        sqlx::query_as::<_, MonthCount>(
            r#"SELECT to_char(date_trunc('month', fecha), 'YYYY-MM') AS mes, COUNT(*) AS total
               FROM entrevistas
               WHERE fecha >= (date_trunc('month', CURRENT_DATE) - INTERVAL '5 months')::date
               GROUP BY 1
               ORDER BY 1"#
        )
        .fetch_all(pool),
        sqlx::query_as::<_, PriorityCount>(
            r#"SELECT prioridad, COUNT(*) AS total
               FROM alertas
               WHERE estado <> 'resuelta'
               GROUP BY prioridad
               ORDER BY prioridad"#
        )
        .fetch_all(pool),
    )?;

    let trends = Trends {
        entrevistas_por_mes: fill_months(month_keys(Utc::now().date_naive(), 6), monthly),
        alertas_por_prioridad: priorities,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(trends)))
}

#[derive(Debug, Deserialize)]
pub struct RecentActivityQuery {
    pub limit: Option<i64>,
}

pub async fn get_recent_activity(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<RecentActivityQuery>,
) -> ApiResult<HttpResponse> {
    let entries = recent_activity(&app_state.db_pool, query.limit.unwrap_or(10)).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(entries)))
}
