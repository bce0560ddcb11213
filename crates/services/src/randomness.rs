use async_trait::async_trait;
use strato_crypto::SigningPair;
use strato_engine::{Category, Module, ModuleDescriptor, ModuleError, ServiceBase};
use strato_primitives::id::AccountId;
use strato_primitives::random::RandomnessProof;
use strato_primitives::CallerContext;
use tracing::{info, warn};

use crate::ServiceError;

pub(crate) const LOG_TARGET: &str = "randomness";

/// HKDF output bound for one expand call; requests above this are invalid.
const MAX_LENGTH: usize = 255 * 32;

/// Deterministic signed byte sequences.
///
/// `value` is a function only of `(account_id, request_id, length)` and the
/// signing key, so any party holding the public key can re-verify a
/// response, and repeated requests return identical bytes.
pub struct RandomnessService {
    base: ServiceBase,
    key: SigningPair,
}

impl RandomnessService {
    /// `key = None` generates an ephemeral keypair; signatures then change
    /// across restarts, which is logged loudly for operators.
    pub fn new(key: Option<SigningPair>) -> Self {
        let key = match key {
            Some(key) => key,
            None => {
                let key = SigningPair::generate();
                warn!(
                    target: LOG_TARGET,
                    public_key = key.public_key_hex(),
                    "No randomness signing key configured; generated an ephemeral one."
                );
                key
            }
        };

        let descriptor = ModuleDescriptor::new("randomness", "crypto", Category::Service)
            .provides("randomness");
        Self { base: ServiceBase::new(descriptor), key }
    }

    pub fn public_key_hex(&self) -> String {
        self.key.public_key_hex()
    }

    pub fn generate(
        &self,
        caller: &CallerContext,
        account_id: &AccountId,
        request_id: &str,
        length: usize,
    ) -> Result<RandomnessProof, ServiceError> {
        if length == 0 || length > MAX_LENGTH {
            return Err(ServiceError::Validation(format!(
                "length must be within 1..={MAX_LENGTH}, got {length}"
            )));
        }
        if request_id.is_empty() {
            return Err(ServiceError::Validation("request_id must not be empty".into()));
        }

        let info: [&[u8]; 4] = [
            caller.tenant.as_str().as_bytes(),
            account_id.as_str().as_bytes(),
            request_id.as_bytes(),
            &(length as u32).to_be_bytes(),
        ];
        let value = self
            .key
            .derive_bytes(&info, length)
            .map_err(|err| ServiceError::Internal(err.to_string()))?;
        let signature = self.key.sign_hex(&value);

        info!(target: LOG_TARGET, account = %account_id, request_id, length, "Randomness generated.");
        Ok(RandomnessProof {
            value: hex::encode(value),
            signature,
            public_key: self.key.public_key_hex(),
        })
    }
}

#[async_trait]
impl Module for RandomnessService {
    fn descriptor(&self) -> ModuleDescriptor {
        self.base.descriptor()
    }

    async fn start(&self) -> Result<(), ModuleError> {
        self.base.mark_started();
        Ok(())
    }

    async fn ready(&self) -> bool {
        self.base.is_running()
    }

    async fn stop(&self) -> Result<(), ModuleError> {
        self.base.mark_stopped();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strato_crypto::verify_hex;
    use strato_primitives::Role;

    use super::*;

    fn caller() -> CallerContext {
        CallerContext::new("t", "tester", Role::User)
    }

    #[test]
    fn identical_requests_yield_identical_proofs() {
        let service = RandomnessService::new(Some(SigningPair::from_bytes([5u8; 32])));
        let account = AccountId::new("a");

        let first = service.generate(&caller(), &account, "req-1", 32).unwrap();
        let second = service.generate(&caller(), &account, "req-1", 32).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn request_id_separates_values() {
        let service = RandomnessService::new(Some(SigningPair::from_bytes([5u8; 32])));
        let account = AccountId::new("a");

        let first = service.generate(&caller(), &account, "req-1", 32).unwrap();
        let second = service.generate(&caller(), &account, "req-2", 32).unwrap();
        assert_ne!(first.value, second.value);
    }

    #[test]
    fn signature_verifies_against_the_returned_key() {
        let service = RandomnessService::new(None);
        let proof = service.generate(&caller(), &AccountId::new("a"), "req", 64).unwrap();

        let value = hex::decode(&proof.value).unwrap();
        assert_eq!(value.len(), 64);
        verify_hex(&proof.public_key, &value, &proof.signature).unwrap();
    }

    #[test]
    fn zero_length_is_rejected() {
        let service = RandomnessService::new(None);
        let err = service.generate(&caller(), &AccountId::new("a"), "req", 0).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
