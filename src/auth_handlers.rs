// src/auth_handlers.rs - Login, profile and user administration

use actix_web::{web, HttpRequest, HttpResponse};
use validator::Validate;
use std::sync::Arc;
use chrono::Duration;
use uuid::Uuid;
use serde::Serialize;

use crate::audit::audit;
use crate::handlers::ApiResponse;
use crate::auth::{
    generate_password, get_current_user, check_permission, AuthService, ChangePasswordRequest,
    CreateUserRequest, LoginRequest, LoginResponse, ResetPasswordRequest, UpdateUserRequest,
    User, UserInfo, UserRole,
};
use crate::error::{ApiError, ApiResult};
use crate::validator::Sanitize;
use crate::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Response with user info and the password when the server generated it
#[derive(Debug, Serialize)]
pub struct CreateUserResponse {
    pub user: UserInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_password: Option<String>,
}

fn parse_role(value: &str) -> ApiResult<UserRole> {
    UserRole::from_str(value).ok_or_else(|| ApiError::validation(
        "rol",
        &format!("Invalid role '{}'. Valid roles: {}", value, UserRole::all_role_strings().join(", ")),
    ))
}

// ======== AUTH HANDLERS ========

pub async fn login(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<LoginRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let pool = &app_state.db_pool;
    let auth_config = &app_state.config.auth;

    let mut user = User::find_by_email(pool, &request.email).await?
        .ok_or_else(|| ApiError::AuthError(INVALID_CREDENTIALS.to_string()))?;

    if !user.activo {
        log::warn!("Login attempt for inactive user {}", user.email);
        return Err(ApiError::AuthError(INVALID_CREDENTIALS.to_string()));
    }

    if user.is_locked() {
        return Err(ApiError::AuthError("Account is temporarily locked. Try again later.".to_string()));
    }
    if user.lock_expired() {
        user.reset_failed_attempts(pool).await?;
    }

    if !auth_service.verify_password(&request.password, &user.password_hash)? {
        user.increment_failed_attempts(pool).await?;

        if user.intentos_fallidos >= auth_config.max_login_attempts {
            user.lock_for_duration(pool, Duration::minutes(auth_config.lockout_duration_minutes)).await?;
            log::warn!("User {} locked after {} failed attempts", user.email, user.intentos_fallidos);
            return Err(ApiError::AuthError(format!(
                "Account locked due to too many failed attempts. Try again in {} minutes.",
                auth_config.lockout_duration_minutes
            )));
        }

        return Err(ApiError::AuthError(INVALID_CREDENTIALS.to_string()));
    }

    user.reset_failed_attempts(pool).await?;
    user.update_last_login(pool).await?;

    let token = auth_service.generate_token(&user)?;

    log::info!("User {} logged in successfully", user.email);
    audit(pool, &user.id.to_string(), "login", "usuario", &user.id, "Inicio de sesión", &http_request).await;

    let response = LoginResponse {
        token,
        expires_in: auth_service.token_ttl_seconds(),
        user: user.into(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        response,
        "Login successful".to_string(),
    )))
}

pub async fn get_profile(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.user_id()?).await?;
    let info: UserInfo = user.into();

    Ok(HttpResponse::Ok().json(ApiResponse::success(info)))
}

pub async fn change_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<ChangePasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    let claims = get_current_user(&http_request)?;

    let user = User::find_by_id(&app_state.db_pool, &claims.user_id()?).await?;

    user.change_password(
        &app_state.db_pool,
        &request.current_password,
        &request.new_password,
        &auth_service,
    ).await?;

    log::info!("User {} changed password", user.email);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "Password changed successfully".to_string(),
    )))
}

// ======== USER MANAGEMENT (ADMIN) ========

pub async fn get_users(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let users: Vec<User> = sqlx::query_as("SELECT * FROM usuarios ORDER BY nombre")
        .fetch_all(&app_state.db_pool)
        .await?;

    let user_infos: Vec<UserInfo> = users.into_iter().map(|u| u.into()).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_infos)))
}

pub async fn get_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let user = User::find_by_id(&app_state.db_pool, &path.into_inner()).await?;
    let user_info: UserInfo = user.into();

    Ok(HttpResponse::Ok().json(ApiResponse::success(user_info)))
}

pub async fn create_user(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    request: web::Json<CreateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let mut request = request.into_inner();
    request.sanitize();
    request.validate()?;

    let role = match request.rol.as_deref() {
        Some(value) => parse_role(value)?,
        None => UserRole::Orientador,
    };

    if User::find_by_email(&app_state.db_pool, &request.email).await?.is_some() {
        return Err(ApiError::Conflict(format!("Email '{}' already exists", request.email)));
    }

    let (password, generated) = match request.password.take() {
        Some(password) => (password, false),
        None => (generate_password(), true),
    };
    let password_hash = auth_service.hash_password(&password)?;

    let id = Uuid::new_v4();
    let user: User = sqlx::query_as(
        r#"INSERT INTO usuarios (id, nombre, email, password_hash, rol)
           VALUES ($1, $2, LOWER($3), $4, $5)
           RETURNING *"#
    )
        .bind(id)
        .bind(&request.nombre)
        .bind(&request.email)
        .bind(&password_hash)
        .bind(role.as_str())
        .fetch_one(&app_state.db_pool)
        .await?;

    log::info!("Admin {} created user {} with role {}", claims.email, user.email, role);
    audit(
        &app_state.db_pool, &claims.sub, "create", "usuario", &id,
        &format!("Usuario {} creado con rol {}", user.email, role), &http_request,
    ).await;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        CreateUserResponse {
            user: user.into(),
            generated_password: generated.then_some(password),
        },
        "User created successfully".to_string(),
    )))
}

pub async fn update_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    request: web::Json<UpdateUserRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let mut request = request.into_inner();
    request.sanitize();
    request.validate()?;

    let role = request.rol.as_deref().map(parse_role).transpose()?;

    if user_id == claims.user_id()? {
        if role.is_some_and(|r| r != claims.rol) {
            return Err(ApiError::bad_request("Cannot change your own role"));
        }
        if request.activo == Some(false) {
            return Err(ApiError::bad_request("Cannot deactivate your own account"));
        }
    }

    let user: User = sqlx::query_as(
        r#"UPDATE usuarios SET
               nombre = COALESCE($1, nombre),
               email = COALESCE(LOWER($2), email),
               rol = COALESCE($3, rol),
               activo = COALESCE($4, activo),
               updated_at = NOW()
           WHERE id = $5
           RETURNING *"#
    )
        .bind(&request.nombre)
        .bind(&request.email)
        .bind(role.map(|r| r.as_str()))
        .bind(request.activo)
        .bind(user_id)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    log::info!("Admin {} updated user {}", claims.email, user_id);
    audit(&app_state.db_pool, &claims.sub, "update", "usuario", &user_id, "Usuario actualizado", &http_request).await;

    let info: UserInfo = user.into();
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        info,
        "User updated successfully".to_string(),
    )))
}

pub async fn reset_user_password(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    path: web::Path<Uuid>,
    request: web::Json<ResetPasswordRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    let user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    let (password, generated) = match request.into_inner().password {
        Some(password) => (password, false),
        None => (generate_password(), true),
    };
    let password_hash = auth_service.hash_password(&password)?;
    user.set_password_hash(&app_state.db_pool, &password_hash).await?;

    log::info!("Admin {} reset password for user {}", claims.email, user.email);
    audit(&app_state.db_pool, &claims.sub, "reset_password", "usuario", &user_id, "Contraseña restablecida", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "generated_password": generated.then_some(password) }),
        "Password changed successfully".to_string(),
    )))
}

pub async fn delete_user(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<Uuid>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let user_id = path.into_inner();
    let claims = get_current_user(&http_request)?;
    check_permission(&claims, |role| role.can_manage_users())?;

    if user_id == claims.user_id()? {
        return Err(ApiError::bad_request("Cannot delete your own account"));
    }

    let target_user = User::find_by_id(&app_state.db_pool, &user_id).await?;

    if target_user.get_role() == UserRole::Admin {
        let admin_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM usuarios WHERE rol = 'admin' AND activo = TRUE"
        )
        .fetch_one(&app_state.db_pool)
        .await?;

        if admin_count <= 1 {
            return Err(ApiError::bad_request("Cannot delete the last admin user"));
        }
    }

    let result = sqlx::query("DELETE FROM usuarios WHERE id = $1")
        .bind(user_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("User"));
    }

    log::info!("Admin {} deleted user {}", claims.email, target_user.email);
    audit(&app_state.db_pool, &claims.sub, "delete", "usuario", &user_id, "Usuario eliminado", &http_request).await;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        (),
        "User deleted successfully".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::test_support;
    use actix_web::{http::StatusCode, test};

    #[::std::prelude::v1::test]
    fn test_parse_role() {
        assert_eq!(parse_role("orientador").unwrap(), UserRole::Orientador);
        match parse_role("director") {
            Err(ApiError::ValidationError(details)) => assert_eq!(details[0].field, "rol"),
            other => panic!("unexpected: {:?}", other.map(|r| r.as_str())),
        }
    }

    #[::std::prelude::v1::test]
    fn test_generated_password_only_serialized_when_present() {
        let now = chrono::Utc::now();
        let info = UserInfo {
            id: Uuid::new_v4(),
            nombre: "Ana".to_string(),
            email: "ana@colegio.cl".to_string(),
            rol: UserRole::Orientador,
            activo: true,
            ultimo_acceso: None,
            created_at: now,
        };
        let without = serde_json::to_value(CreateUserResponse { user: info.clone(), generated_password: None }).unwrap();
        assert!(without.get("generated_password").is_none());

        let with = serde_json::to_value(CreateUserResponse { user: info, generated_password: Some("Abc12345".into()) }).unwrap();
        assert_eq!(with["generated_password"], "Abc12345");
        assert_eq!(with["user"]["rol"], "orientador");
    }

    macro_rules! post_login {
        ($app:expr, $email:expr, $password:expr) => {{
            let req = test::TestRequest::post()
                .uri("/api/auth/login")
                .set_json(serde_json::json!({ "email": $email, "password": $password }))
                .to_request();
            let resp = test::call_service(&$app, req).await;
            let status = resp.status();
            let body: serde_json::Value = test::read_body_json(resp).await;
            (status, body)
        }};
    }

    async fn failed_attempts(pool: &sqlx::PgPool, id: Uuid) -> (i32, Option<chrono::DateTime<chrono::Utc>>) {
        sqlx::query_as("SELECT intentos_fallidos, bloqueado_hasta FROM usuarios WHERE id = $1")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[actix_rt::test]
    async fn test_login_token_identifies_user() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let user = test_support::insert_user(&pool, &auth, "orientador").await;
        let app = test_support::db_app!(pool, auth);

        let (status, body) = post_login!(app, user.email, test_support::TEST_PASSWORD);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["user"]["id"], user.id.to_string());

        let token = body["data"]["token"].as_str().unwrap();
        let claims = auth.verify_token(token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.rol, UserRole::Orientador);
    }

    #[actix_rt::test]
    async fn test_wrong_password_gets_no_token() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let user = test_support::insert_user(&pool, &auth, "orientador").await;
        let app = test_support::db_app!(pool, auth);

        let (status, body) = post_login!(app, user.email, "Incorrecta99");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
        assert!(body.get("data").is_none());
        assert!(!body.to_string().contains("token"));
        assert_eq!(failed_attempts(&pool, user.id).await.0, 1);

        let (status, body) = post_login!(app, "nadie@pruebas.sigo.cl", test_support::TEST_PASSWORD);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("data").is_none());
    }

    #[actix_rt::test]
    async fn test_expired_lock_starts_count_over() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let user = test_support::insert_user(&pool, &auth, "orientador").await;
        let max_attempts = Config::default().auth.max_login_attempts;
        sqlx::query(
            "UPDATE usuarios SET intentos_fallidos = $1, bloqueado_hasta = NOW() - INTERVAL '1 minute' WHERE id = $2",
        )
        .bind(max_attempts)
        .bind(user.id)
        .execute(&pool)
        .await
        .unwrap();
        let app = test_support::db_app!(pool, auth);

        let (status, body) = post_login!(app, user.email, "Incorrecta99");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], format!("Auth Error: {}", INVALID_CREDENTIALS));
        assert_eq!(failed_attempts(&pool, user.id).await, (1, None));

        let (status, _) = post_login!(app, user.email, test_support::TEST_PASSWORD);
        assert_eq!(status, StatusCode::OK);
    }

    #[actix_rt::test]
    async fn test_active_lock_refuses_correct_password() {
        let Some(pool) = test_support::db_pool().await else { return; };
        let auth = test_support::auth_service();
        let user = test_support::insert_user(&pool, &auth, "orientador").await;
        sqlx::query("UPDATE usuarios SET intentos_fallidos = 5, bloqueado_hasta = NOW() + INTERVAL '10 minutes' WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();
        let app = test_support::db_app!(pool, auth);

        let (status, body) = post_login!(app, user.email, test_support::TEST_PASSWORD);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.get("data").is_none());
    }
}
