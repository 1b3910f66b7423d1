// src/error.rs
use actix_web::{error::JsonPayloadError, http::StatusCode, HttpRequest, HttpResponse, ResponseError};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::fmt;

lazy_static! {
    static ref MISSING_FIELD_REGEX: Regex = Regex::new(r"missing field `([^`]+)`").unwrap();
    static ref INVALID_FIELD_REGEX: Regex = Regex::new(r"unknown variant `([^`]+)`|invalid type").unwrap();
}

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";
const PG_CHECK_VIOLATION: &str = "23514";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    TooManyRequests(String),
    InternalServerError(String),
    ValidationError(Vec<FieldError>),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse<'a> {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a [FieldError]>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::TooManyRequests(msg) => write!(f, "Too Many Requests: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(details) => {
                let fields = details
                    .iter()
                    .map(|d| format!("{}: {}", d.field, d.message))
                    .collect::<Vec<_>>()
                    .join("; ");
                write!(f, "Validation Error: {}", fields)
            }
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) | ApiError::AuthError(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::DatabaseError(_) | ApiError::InternalServerError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            ApiError::DatabaseError(err) => log::error!("Database error: {}", err),
            ApiError::InternalServerError(msg) => log::error!("Internal error: {}", msg),
            _ => {}
        }

        let details = match self {
            ApiError::ValidationError(details) => Some(details.as_slice()),
            _ => None,
        };
        let body = ErrorResponse {
            success: false,
            message: self.to_string(),
            details,
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                Some(PG_UNIQUE_VIOLATION) => ApiError::Conflict(format!(
                    "Duplicate value violates {}",
                    db_err.constraint().unwrap_or("a unique constraint")
                )),
                Some(PG_FOREIGN_KEY_VIOLATION) => ApiError::BadRequest(format!(
                    "Referenced record does not exist ({})",
                    db_err.constraint().unwrap_or("foreign key")
                )),
                Some(PG_CHECK_VIOLATION) => ApiError::BadRequest(format!(
                    "Value rejected by {}",
                    db_err.constraint().unwrap_or("a check constraint")
                )),
                _ => ApiError::DatabaseError(err),
            },
            _ => ApiError::DatabaseError(err),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut details: Vec<FieldError> = err
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid ({})", field, e.code));
                    FieldError::new(field.to_string(), message)
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(details)
    }
}

impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn conflict(msg: &str) -> Self {
        ApiError::Conflict(msg.to_string())
    }

    pub fn validation(field: &str, message: &str) -> Self {
        ApiError::ValidationError(vec![FieldError::new(field, message)])
    }

    pub fn student_not_found(id: &uuid::Uuid) -> Self {
        ApiError::NotFound(format!("Student with ID '{}' not found", id))
    }

    pub fn insufficient_stock(available: i32, requested: i32) -> Self {
        ApiError::Conflict(format!(
            "Insufficient stock. Available: {}, Requested: {}",
            available, requested
        ))
    }
}

/// Maps body deserialization failures onto the same 400 envelope the validators use.
pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    json_payload_to_api_error(&err).into()
}

/// Parses a body that may be omitted: an empty payload yields `T::default()`,
/// anything else must be valid JSON for `T`.
pub fn parse_optional_json<T>(body: &[u8]) -> ApiResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| json_payload_to_api_error(&JsonPayloadError::Deserialize(e)))
}

fn json_payload_to_api_error(err: &JsonPayloadError) -> ApiError {
    match err {
        JsonPayloadError::Deserialize(de) => {
            let raw = de.to_string();
            if let Some(caps) = MISSING_FIELD_REGEX.captures(&raw) {
                let field = &caps[1];
                return ApiError::validation(field, &format!("{} is required", field));
            }
            if INVALID_FIELD_REGEX.is_match(&raw) {
                return ApiError::ValidationError(vec![FieldError::new("body", raw)]);
            }
            ApiError::BadRequest(format!("Invalid JSON body: {}", raw))
        }
        JsonPayloadError::ContentType => {
            ApiError::BadRequest("Content-Type must be application/json".to_string())
        }
        JsonPayloadError::Overflow { .. } | JsonPayloadError::OverflowKnownLength { .. } => {
            ApiError::BadRequest("Request body too large".to_string())
        }
        other => ApiError::BadRequest(format!("Invalid request body: {}", other)),
    }
}
