use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error kinds surfaced by the filesystem engines.
///
/// The WebDAV layer maps these onto protocol status codes; everything else
/// (compensation failures, post-commit cleanup) is logged and downgraded.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("resource not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("quota exceeded: need {need} bytes (quota: {limit}, used: {used})")]
    QuotaExceeded { limit: i64, used: i64, need: i64 },

    #[error("maximum concurrent sessions ({limit}) exceeded")]
    SessionLimitExceeded { limit: i64 },

    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => GatewayError::NotFound,
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                GatewayError::Conflict(db_err.message().to_string())
            }
            _ => GatewayError::Transient(err.into()),
        }
    }
}
