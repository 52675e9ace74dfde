use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Errors produced by the cookie codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// No configured key pair produced a valid signature.
    #[error("the value could not be verified with any configured key")]
    InvalidSignature,

    /// The signature was valid but the embedded timestamp is older than the max age.
    #[error("the value has expired")]
    Expired,

    /// The encoded value is longer than the configured maximum.
    #[error("encoded value is {len} bytes, maximum is {max}")]
    MaxLengthExceeded { len: usize, max: usize },

    /// The value could not be serialized, encrypted or signed.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// The value was authentic but could not be decrypted or deserialized.
    #[error("decoding failed: {0}")]
    Decoding(String),
}

/// Reasons a state-changing request is rejected by the CSRF guard.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfError {
    /// The request carried no token.
    #[error("missing CSRF token")]
    Missing,

    /// The request carried a token that does not match the session's token.
    #[error("CSRF token mismatch")]
    Mismatch,
}

/// A single failed form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Serialize)]
struct ValidationBody<'a> {
    error: &'static str,
    fields: &'a [FieldError],
}

/// The application's error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// The backing store could not be reached or configured.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A database error.
    #[error("Database error: {}", db_error_detail(.0))]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A cookie codec error.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// A CSRF rejection.
    #[error("CSRF validation failed: {0}")]
    Csrf(#[from] CsrfError),

    /// A backing store failure that did not originate in PostgreSQL.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A resource not found error.
    #[error("Resource not found")]
    NotFound,

    /// A row did not carry an expected column.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// One or more form fields failed validation.
    #[error("Validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    /// An authentication error.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// An authorization error.
    #[error("Authorization failed")]
    Unauthorized,

    /// A request body exceeded the given limit in bytes.
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Formats a driver error with the server's SQLSTATE and message, which its
/// `Display` leaves out.
pub fn db_error_detail(e: &tokio_postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        return format!("{} ({}): {}", e, db.code().code(), db.message());
    }
    match std::error::Error::source(e) {
        Some(cause) => format!("{}: {}", e, cause),
        None => e.to_string(),
    }
}

impl AppError {
    /// Whether the error came from the backing store.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Pool(_)
                | AppError::Persistence(_)
                | AppError::MissingData(_)
        )
    }
}

impl From<deadpool_postgres::CreatePoolError> for AppError {
    fn from(e: deadpool_postgres::CreatePoolError) -> Self {
        AppError::Connection(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Connection(ref msg) => {
                tracing::error!("Connection error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable".to_string())
            }

            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", db_error_detail(e));
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Codec(ref e) => {
                tracing::error!("Codec error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Session error".to_string())
            }

            AppError::Csrf(e) => {
                tracing::warn!("CSRF rejection: {}", e);
                (StatusCode::FORBIDDEN, e.to_string())
            }

            AppError::Persistence(ref msg) => {
                tracing::error!("Persistence error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::NotFound => {
                tracing::debug!("Resource not found");
                (StatusCode::NOT_FOUND, "Resource not found".to_string())
            }

            AppError::MissingData(ref column) => {
                tracing::error!("Missing column in row: {}", column);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }

            AppError::Authentication(ref msg) => {
                tracing::warn!("Authentication failed: {}", msg);
                (StatusCode::UNAUTHORIZED, msg.clone())
            }

            AppError::PayloadTooLarge(limit) => {
                tracing::warn!(limit, "Request body over limit");
                (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
            }

            AppError::Unauthorized => {
                tracing::warn!("Authorization failed");
                (StatusCode::FORBIDDEN, "Forbidden".to_string())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Validation(ref fields) => {
                tracing::debug!(fields = fields.len(), "Validation failed");
                let body = sonic_rs::to_string(&ValidationBody {
                    error: "Validation failed",
                    fields,
                })
                .unwrap_or_else(|_| r#"{"error":"Validation failed"}"#.to_string());
                return (StatusCode::BAD_REQUEST, body).into_response();
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "error": message
        }))
        .unwrap_or_else(|_| r#"{"error":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_bodies_map_to_413() {
        let res = AppError::PayloadTooLarge(1024).into_response();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn database_errors_keep_their_cause() {
        let err = "host=localhost port=notaport"
            .parse::<tokio_postgres::Config>()
            .unwrap_err();
        let plain = err.to_string();

        let detail = db_error_detail(&err);
        assert!(detail.starts_with(&plain));
        assert!(detail.len() > plain.len());
        assert!(AppError::Database(err).to_string().contains(&detail));
    }

    #[test]
    fn csrf_errors_map_to_forbidden() {
        let res = AppError::from(CsrfError::Mismatch).into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = AppError::from(CsrfError::Missing).into_response();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        let res = AppError::Validation(vec![FieldError::new("username", "required")])
            .into_response();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn persistence_classification() {
        assert!(AppError::MissingData("key".into()).is_persistence());
        assert!(!AppError::NotFound.is_persistence());
        assert!(!AppError::Codec(CodecError::Expired).is_persistence());
    }
}
