use bcrypt::{hash, verify};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use actix_web::web;
use actix_web::HttpMessage;
use validator::Validate;
use actix_web::{HttpRequest, dev::ServiceRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use crate::error::{ApiError, ApiResult};
use crate::impl_sanitize;

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub nombre: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub rol: String,
    pub activo: bool,
    pub ultimo_acceso: Option<DateTime<Utc>>,
    pub intentos_fallidos: i32,
    pub bloqueado_hasta: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Orientador,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "orientador" => Some(UserRole::Orientador),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Orientador => "orientador",
        }
    }

    // ======== USER MANAGEMENT ========
    pub fn can_manage_users(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    // ======== STUDENTS ========
    pub fn can_delete_students(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    // ======== RESOURCES ========
    pub fn can_delete_resources(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn all_role_strings() -> Vec<&'static str> {
        vec!["admin", "orientador"]
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,
    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: Uuid,
    pub nombre: String,
    pub email: String,
    pub rol: UserRole,
    pub activo: bool,
    pub ultimo_acceso: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        let rol = user.get_role();
        Self {
            id: user.id,
            nombre: user.nombre,
            email: user.email,
            rol,
            activo: user.activo,
            ultimo_acceso: user.ultimo_acceso,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 100, message = "nombre must be between 2 and 100 characters"))]
    pub nombre: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    /// Generated when omitted and returned once in the response.
    pub password: Option<String>,
    pub rol: Option<String>,
}

impl_sanitize!(CreateUserRequest { nombre, email } optional { rol });

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(min = 2, max = 100, message = "nombre must be between 2 and 100 characters"))]
    pub nombre: Option<String>,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    pub rol: Option<String>,
    pub activo: Option<bool>,
}

impl_sanitize!(UpdateUserRequest {} optional { nombre, email, rol });

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub nombre: String,
    pub rol: UserRole,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn user_id(&self) -> ApiResult<Uuid> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| ApiError::AuthError("Invalid subject in token".to_string()))
    }
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: Duration,
    bcrypt_cost: u32,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_expiration_hours: i64, bcrypt_cost: u32) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl: Duration::hours(token_expiration_hours.max(1)),
            bcrypt_cost,
        }
    }

    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl.num_seconds()
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        validate_password_strength(password)?;
        hash(password, self.bcrypt_cost)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> ApiResult<bool> {
        verify(password, hash)
            .map_err(|_| ApiError::InternalServerError("Password verification failed".to_string()))
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + self.token_ttl;

        let claims = Claims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            nombre: user.nombre.clone(),
            rol: user.get_role(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| {
                match err.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature =>
                        ApiError::AuthError("Token expired".to_string()),
                    jsonwebtoken::errors::ErrorKind::InvalidToken =>
                        ApiError::AuthError("Invalid token".to_string()),
                    _ =>
                        ApiError::AuthError("Token verification failed".to_string()),
                }
            })
    }
}

// ======== PASSWORD VALIDATION ========

pub fn validate_password_strength(password: &str) -> ApiResult<()> {
    let fail = |msg: &str| Err(ApiError::validation("password", msg));
    if password.chars().count() < 8 {
        return fail("Password must be at least 8 characters");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return fail("Password must contain at least one uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return fail("Password must contain at least one lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return fail("Password must contain at least one digit");
    }
    Ok(())
}

/// Random password satisfying [`validate_password_strength`].
pub fn generate_password() -> String {
    use rand::{distributions::Alphanumeric, thread_rng, Rng};

    let mut rng = thread_rng();
    let body: String = (&mut rng).sample_iter(&Alphanumeric).take(12).map(char::from).collect();
    let upper = rng.gen_range(b'A'..=b'Z') as char;
    let lower = rng.gen_range(b'a'..=b'z') as char;
    let digit = rng.gen_range(b'0'..=b'9') as char;
    format!("{}{}{}{}", upper, body, lower, digit)
}

// ======== USER METHODS ========

impl User {
    pub async fn find_by_id(pool: &PgPool, id: &Uuid) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM usuarios WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| ApiError::not_found("User"))
    }

    pub async fn find_by_email(pool: &PgPool, email: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM usuarios WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    pub async fn update_last_login(&self, pool: &PgPool) -> ApiResult<()> {
        sqlx::query("UPDATE usuarios SET ultimo_acceso = NOW() WHERE id = $1")
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        pool: &PgPool,
        current_password: &str,
        new_password: &str,
        auth_service: &AuthService,
    ) -> ApiResult<()> {
        if !auth_service.verify_password(current_password, &self.password_hash)? {
            return Err(ApiError::AuthError("Current password is incorrect".to_string()));
        }

        let new_hash = auth_service.hash_password(new_password)?;
        self.set_password_hash(pool, &new_hash).await
    }

    pub async fn set_password_hash(&self, pool: &PgPool, password_hash: &str) -> ApiResult<()> {
        sqlx::query(
            "UPDATE usuarios SET password_hash = $1, intentos_fallidos = 0, bloqueado_hasta = NULL, updated_at = NOW() WHERE id = $2"
        )
            .bind(password_hash)
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        if let Some(bloqueado_hasta) = self.bloqueado_hasta {
            Utc::now() < bloqueado_hasta
        } else {
            false
        }
    }

    /// A lock that has run out; its failure count should start over.
    pub fn lock_expired(&self) -> bool {
        self.bloqueado_hasta.is_some_and(|hasta| Utc::now() >= hasta)
    }

    pub async fn increment_failed_attempts(&mut self, pool: &PgPool) -> ApiResult<()> {
        self.intentos_fallidos += 1;
        sqlx::query("UPDATE usuarios SET intentos_fallidos = $1 WHERE id = $2")
            .bind(self.intentos_fallidos)
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn lock_for_duration(&mut self, pool: &PgPool, duration: Duration) -> ApiResult<()> {
        self.bloqueado_hasta = Some(Utc::now() + duration);
        sqlx::query("UPDATE usuarios SET bloqueado_hasta = $1 WHERE id = $2")
            .bind(self.bloqueado_hasta)
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn reset_failed_attempts(&mut self, pool: &PgPool) -> ApiResult<()> {
        self.intentos_fallidos = 0;
        self.bloqueado_hasta = None;
        sqlx::query(
            "UPDATE usuarios SET intentos_fallidos = 0, bloqueado_hasta = NULL WHERE id = $1"
        )
            .bind(self.id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Unknown role strings degrade to the least privileged role.
    pub fn get_role(&self) -> UserRole {
        UserRole::from_str(&self.rol).unwrap_or(UserRole::Orientador)
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>().cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

pub fn check_permission<F>(claims: &Claims, check: F) -> ApiResult<()>
where
    F: Fn(&UserRole) -> bool,
{
    if check(&claims.rol) {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}
