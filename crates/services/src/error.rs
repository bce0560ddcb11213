use strato_primitives::ErrorCode;
use strato_provider::ProviderError;

/// Shared error type for caller-facing service commands. Transports read
/// [`code`](Self::code) to map onto their protocol.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("cross-tenant access rejected")]
    TenantForbidden,

    #[error("admin role required")]
    AdminRequired,

    #[error("secret `{0}` does not exist")]
    SecretMissing(String),

    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("invalid cron expression: {0}")]
    InvalidSchedule(String),

    #[error(transparent)]
    Storage(ProviderError),

    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::Validation(_) | ServiceError::InvalidSchedule(_) => ErrorCode::Validation,
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::TenantForbidden | ServiceError::AdminRequired => {
                ErrorCode::TenantForbidden
            }
            ServiceError::SecretMissing(_) => ErrorCode::SecretMissing,
            ServiceError::InsufficientFunds { .. } => ErrorCode::Validation,
            ServiceError::Storage(err) => err.code(),
            ServiceError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::TenantForbidden => ServiceError::TenantForbidden,
            other => ServiceError::Storage(other),
        }
    }
}
