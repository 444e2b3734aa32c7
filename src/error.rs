use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error taxonomy for the ingest/query core.
///
/// Every store and pipeline operation returns one of these kinds; the HTTP
/// layer maps them onto status codes in `IntoResponse`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Malformed id, unknown enum value, unknown sort field, incomplete
    /// time range, missing required id.
    #[error("validation: {0}")]
    Validation(String),

    /// Entity id does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique constraint violation on an external id.
    #[error("duplicate: {0}")]
    Duplicate(String),

    /// Store transport error, cancellation, timeout. Retriable.
    #[error("transient: {0}")]
    Transient(String),

    /// A persisted row failed to scan or unmarshal.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Operation not available on the current backing store variant.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl CoreError {
    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Duplicate(_) => StatusCode::CONFLICT,
            CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Corrupt(_) | CoreError::Unsupported(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<clickhouse::error::Error> for CoreError {
    fn from(e: clickhouse::error::Error) -> Self {
        CoreError::Transient(format!("clickhouse: {e}"))
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                CoreError::Duplicate(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::QueryReturnedNoRows => CoreError::NotFound("row"),
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::IntegralValueOutOfRange(..)
            | rusqlite::Error::InvalidColumnType(..) => CoreError::Corrupt(e.to_string()),
            _ => CoreError::Transient(format!("sqlite: {e}")),
        }
    }
}

impl From<deadpool_redis::PoolError> for CoreError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        CoreError::Transient(format!("redis pool: {e}"))
    }
}

impl From<deadpool_redis::redis::RedisError> for CoreError {
    fn from(e: deadpool_redis::redis::RedisError) -> Self {
        CoreError::Transient(format!("redis: {e}"))
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Corrupt(format!("json: {e}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            CoreError::Validation("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(CoreError::NotFound("span").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            CoreError::Duplicate("x".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            CoreError::Transient("x".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            CoreError::Corrupt("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_not_found_message() {
        assert_eq!(CoreError::NotFound("trace").to_string(), "trace not found");
    }
}
