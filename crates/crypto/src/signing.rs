use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    #[error("signing key must be 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("malformed key or signature encoding: {0}")]
    Encoding(#[from] hex::FromHexError),

    #[error("signature must be 64 bytes, got {0}")]
    SignatureLength(usize),

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("signature verification failed")]
    Verification,
}

/// Ed25519 keypair used for oracle callbacks, feed rounds and randomness
/// proofs.
#[derive(Clone)]
pub struct SigningPair {
    key: SigningKey,
}

impl SigningPair {
    /// Generates an ephemeral keypair. Signatures made with it do not
    /// survive a restart; operators supply a persistent key for that.
    pub fn generate() -> Self {
        Self { key: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_bytes(seed: [u8; 32]) -> Self {
        Self { key: SigningKey::from_bytes(&seed) }
    }

    pub fn from_hex(encoded: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(encoded)?;
        let seed: [u8; 32] =
            bytes.as_slice().try_into().map_err(|_| SigningError::KeyLength(bytes.len()))?;
        Ok(Self::from_bytes(seed))
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.key.sign(message).to_bytes()
    }

    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.sign(message))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().to_bytes())
    }

    /// HKDF-SHA256 expansion keyed by this pair's seed. Deterministic for a
    /// fixed key, so derived values are reproducible across calls.
    pub fn derive_bytes(
        &self,
        info: &[&[u8]],
        length: usize,
    ) -> Result<Vec<u8>, crate::KdfError> {
        crate::derive_bytes(&self.key.to_bytes(), info, length)
    }
}

impl std::fmt::Debug for SigningPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningPair").field("public_key", &self.public_key_hex()).finish()
    }
}

/// Verifies a hex-encoded Ed25519 signature against a hex-encoded public
/// key.
pub fn verify_hex(public_key: &str, message: &[u8], signature: &str) -> Result<(), SigningError> {
    let key_bytes = hex::decode(public_key)?;
    let key_bytes: [u8; 32] =
        key_bytes.as_slice().try_into().map_err(|_| SigningError::KeyLength(key_bytes.len()))?;
    let key = VerifyingKey::from_bytes(&key_bytes).map_err(|_| SigningError::InvalidPublicKey)?;

    let sig_bytes = hex::decode(signature)?;
    let sig_bytes: [u8; 64] = sig_bytes
        .as_slice()
        .try_into()
        .map_err(|_| SigningError::SignatureLength(sig_bytes.len()))?;

    key.verify(message, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| SigningError::Verification)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = SigningPair::from_bytes([3u8; 32]);
        let signature = pair.sign_hex(b"round 42");
        verify_hex(&pair.public_key_hex(), b"round 42", &signature).unwrap();
    }

    #[test]
    fn wrong_key_fails_verification() {
        let pair = SigningPair::from_bytes([3u8; 32]);
        let other = SigningPair::from_bytes([4u8; 32]);
        let signature = pair.sign_hex(b"round 42");
        assert!(matches!(
            verify_hex(&other.public_key_hex(), b"round 42", &signature),
            Err(SigningError::Verification)
        ));
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let a = SigningPair::from_bytes([9u8; 32]);
        let b = SigningPair::from_bytes([9u8; 32]);
        assert_eq!(a.sign_hex(b"msg"), b.sign_hex(b"msg"));
    }
}
