// src/main.rs
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::middleware::{Compress, DefaultHeaders, Logger};
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use sqlx::PgPool;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::auth::{generate_password, AuthService, UserRole};
use crate::config::{load_config, Config, SecurityConfig};
use crate::monitoring::{Metrics, RequestLogger};
use crate::rate_limit::RateLimit;

mod agenda_handlers;
mod alert_handlers;
mod attendance_handlers;
mod audit;
mod auth;
mod auth_handlers;
mod communication_handlers;
mod config;
mod db;
mod error;
mod followup_handlers;
mod handlers;
mod intervention_handlers;
mod interview_handlers;
mod models;
mod monitoring;
mod query_builder;
mod rate_limit;
mod resource_handlers;
mod routes;
mod student_handlers;
#[cfg(test)]
mod test_support;
pub mod validator;

const DEFAULT_ADMIN_EMAIL: &str = "admin@sigo.local";

pub struct AppState {
    pub db_pool: PgPool,
    pub config: Config,
}

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        // Logging may not be initialized yet.
        eprintln!("SIGO failed to start: {:#}", e);
        log::error!("SIGO failed to start: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // Load configuration (this calls load_env_file internally)
    let config = load_config()?;

    setup_logging(&config)?;
    config.print_startup_info();

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
        config.auth.bcrypt_cost,
    ));

    create_default_admin_if_needed(&pool, &auth_service).await?;

    let app_state = Arc::new(AppState {
        db_pool: pool,
        config: config.clone(),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let metrics = Arc::new(Metrics::new());
    let rate_limit = RateLimit::new(
        config.security.rate_limit_requests,
        Duration::from_secs(config.security.rate_limit_window_seconds),
    );

    let server_config = config.clone();
    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&server_config.security.allowed_origins);
        let security_headers = setup_security_headers(&server_config.security);
        let json_config = web::JsonConfig::default()
            .limit(server_config.security.max_request_size)
            .error_handler(error::json_error_handler);

        App::new()
            .wrap(rate_limit.clone())
            .wrap(RequestLogger::new(metrics.clone()))
            .wrap(Compress::default())
            .wrap(Logger::default())
            .wrap(security_headers)
            .wrap(cors)
            .app_data(json_config)
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(metrics.clone()))
            .configure(routes::configure)
    })
    .keep_alive(Duration::from_secs(config.server.keep_alive));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    log::info!("Server stopped");
    Ok(())
}

// ==================== HELPER FUNCTIONS ====================

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

fn setup_cors(allowed_origins: &[String]) -> Cors {
    // Config validation already rejects the wildcard in production.
    if allowed_origins.iter().any(|o| o == "*") {
        log::warn!("Using wildcard CORS (*) in development mode");
        return Cors::default()
            .allow_any_origin()
            .allow_any_header()
            .allow_any_method()
            .max_age(3600);
    }

    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .supports_credentials()
        .max_age(3600);

    allowed_origins
        .iter()
        .filter(|origin| !origin.is_empty())
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

fn setup_security_headers(config: &SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("X-XSS-Protection", "1; mode=block"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload",
        ));
    }

    headers
}

async fn create_default_admin_if_needed(
    pool: &PgPool,
    auth_service: &AuthService,
) -> anyhow::Result<()> {
    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usuarios")
        .fetch_one(pool)
        .await?;

    if user_count > 0 {
        return Ok(());
    }

    let (password, generated) = match env::var("DEFAULT_ADMIN_PASSWORD") {
        Ok(password) if !password.is_empty() => (password, false),
        _ => (generate_password(), true),
    };

    let password_hash = auth_service
        .hash_password(&password)
        .map_err(|e| anyhow::anyhow!("Default admin password rejected: {}", e))?;

    sqlx::query(
        r#"INSERT INTO usuarios (id, nombre, email, password_hash, rol)
           VALUES ($1, $2, $3, $4, $5)"#
    )
    .bind(Uuid::new_v4())
    .bind("Administrador")
    .bind(DEFAULT_ADMIN_EMAIL)
    .bind(&password_hash)
    .bind(UserRole::Admin.as_str())
    .execute(pool)
    .await
    .context("Failed to create default admin user")?;

    log::warn!("Default admin user created:");
    log::warn!("  Email: {}", DEFAULT_ADMIN_EMAIL);
    if generated {
        log::warn!("  Password: {} (generated - CHANGE IMMEDIATELY!)", password);
    } else {
        log::warn!("  Password: taken from DEFAULT_ADMIN_PASSWORD");
    }

    Ok(())
}
