use serde::{Deserialize, Serialize};

/// Deterministic signed byte sequence returned by the randomness service.
///
/// `value` is a function only of `(account_id, request_id, length)` and the
/// service signing key, so repeated requests verify against each other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessProof {
    /// Hex-encoded derived bytes.
    pub value: String,
    /// Hex-encoded Ed25519 signature over the raw bytes.
    pub signature: String,
    /// Hex-encoded public half of the signing key.
    pub public_key: String,
}
