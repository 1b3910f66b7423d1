// src/test_support.rs
//! Fixtures for tests that talk to a real PostgreSQL.
//!
//! Those tests run when `SIGO_TEST_DATABASE_URL` (or `DATABASE_URL`) is set and
//! return early otherwise. Every fixture creates uniquely named rows, so tests
//! can share one database and run in parallel.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{AuthService, User};
use crate::config::Config;
use crate::validator::rut_check_digit;
use crate::AppState;

pub const TEST_SECRET: &str = "sigo_test_secret_that_is_long_enough_for_hs256";
pub const TEST_PASSWORD: &str = "Orienta2024";

pub async fn db_pool() -> Option<PgPool> {
    let url = std::env::var("SIGO_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .expect("test database is configured but unreachable");
    crate::db::run_migrations(&pool)
        .await
        .expect("schema setup failed on the test database");
    Some(pool)
}

pub fn auth_service() -> Arc<AuthService> {
    Arc::new(AuthService::new(TEST_SECRET, 8, 4))
}

pub fn app_state(pool: PgPool) -> Arc<AppState> {
    let mut config = Config::default();
    config.auth.jwt_secret = TEST_SECRET.to_string();
    config.auth.bcrypt_cost = 4;
    Arc::new(AppState { db_pool: pool, config })
}

pub fn unique_rut() -> String {
    let body = (Uuid::new_v4().as_u128() % 80_000_000 + 10_000_000).to_string();
    let check = rut_check_digit(&body);
    format!("{}-{}", body, check)
}

pub async fn insert_user(pool: &PgPool, auth: &AuthService, rol: &str) -> User {
    let hash = auth.hash_password(TEST_PASSWORD).unwrap();
    sqlx::query_as(
        r#"INSERT INTO usuarios (id, nombre, email, password_hash, rol)
           VALUES ($1, 'Usuario de prueba', $2, $3, $4)
           RETURNING *"#,
    )
    .bind(Uuid::new_v4())
    .bind(format!("{}@pruebas.sigo.cl", Uuid::new_v4().simple()))
    .bind(hash)
    .bind(rol)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn insert_student(pool: &PgPool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO estudiantes (id, nombre, apellido, rut, curso) VALUES ($1, 'Camila', 'Fuentes', $2, '2°B')")
        .bind(id)
        .bind(unique_rut())
        .execute(pool)
        .await
        .unwrap();
    id
}

/// Scheduled agenda entry plus its pending attendance row.
pub async fn insert_agenda_entry(pool: &PgPool, id_estudiante: Uuid, id_orientador: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"INSERT INTO agenda (id, id_estudiante, id_orientador, fecha, hora, motivo)
           VALUES ($1, $2, $3, CURRENT_DATE, '10:30', 'Seguimiento de notas')"#,
    )
    .bind(id)
    .bind(id_estudiante)
    .bind(id_orientador)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO asistencia (id, id_estudiante, id_agenda, fecha, tipo) VALUES ($1, $2, $3, CURRENT_DATE, 'Pendiente')",
    )
    .bind(Uuid::new_v4())
    .bind(id_estudiante)
    .bind(id)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub fn bearer(auth: &AuthService, user: &User) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", auth.generate_token(user).unwrap()))
}

/// Full application over `$pool`, as `main` wires it minus the outer middleware.
macro_rules! db_app {
    ($pool:expr, $auth:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($crate::test_support::app_state($pool.clone())))
                .app_data(actix_web::web::Data::new($auth.clone()))
                .app_data(actix_web::web::Data::new(std::sync::Arc::new(
                    $crate::monitoring::Metrics::new(),
                )))
                .app_data(
                    actix_web::web::JsonConfig::default()
                        .error_handler($crate::error::json_error_handler),
                )
                .configure($crate::routes::configure),
        )
        .await
    };
}

pub(crate) use db_app;
