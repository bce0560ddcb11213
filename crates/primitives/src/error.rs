use serde::{Deserialize, Serialize};

/// Error taxonomy shared by every service.
///
/// External transports map these onto their own protocol (HTTP status
/// codes, CLI exit codes). Services keep richer error enums internally and
/// expose the code through [`code`](Self) accessors.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    /// Bad input, missing required field, wrong type. Never retried.
    Validation,
    /// Entity absent or not visible in the caller's tenant.
    NotFound,
    /// Cross-tenant access attempt. Audited.
    TenantForbidden,
    /// Referenced secret unknown.
    SecretMissing,
    /// Action type outside the registered set.
    ActionUnsupported,
    /// Action dispatch failed; fails the enclosing execution.
    ActionFailed,
    /// A deadline was exceeded.
    Timeout,
    /// 5xx / network / timeout from an external collaborator. Retried with
    /// backoff.
    RetriableTransport,
    /// 4xx (other than 408/429). Terminal.
    NonretriableTransport,
    /// Optimistic-concurrency collision. Retried at most once.
    Conflict,
    /// Bug or corrupt state. Opaque to the caller.
    Internal,
    /// Exceeded max attempts and moved to the dead-letter queue.
    DeadLetter,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::ErrorCode;

    #[test]
    fn codes_render_snake_case() {
        assert_eq!(ErrorCode::TenantForbidden.to_string(), "tenant_forbidden");
        assert_eq!(ErrorCode::ActionUnsupported.to_string(), "action_unsupported");
        assert_eq!(ErrorCode::from_str("secret_missing").unwrap(), ErrorCode::SecretMissing);
    }
}
