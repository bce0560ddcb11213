use strato_primitives::ErrorCode;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The row exists under a different tenant than the caller's.
    #[error("cross-tenant access rejected")]
    TenantForbidden,

    /// Optimistic-concurrency collision on a versioned entity.
    #[error("version conflict: expected {expected}, found {found}")]
    Conflict { expected: u64, found: u64 },

    /// Attempted in-place mutation of an append-only entity.
    #[error("{0} records are append-only")]
    Immutable(&'static str),

    /// A status transition that the entity's state machine forbids.
    #[error("{entity} `{id}` is in a terminal state")]
    TerminalState { entity: &'static str, id: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl ProviderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::TenantForbidden => ErrorCode::TenantForbidden,
            ProviderError::Conflict { .. } => ErrorCode::Conflict,
            ProviderError::Immutable(_) | ProviderError::TerminalState { .. } => {
                ErrorCode::Validation
            }
            ProviderError::Backend(_) => ErrorCode::Internal,
        }
    }
}
