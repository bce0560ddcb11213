use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;
/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("cipher key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),

    #[error("malformed key encoding: {0}")]
    KeyEncoding(#[from] hex::FromHexError),

    #[error("sealed payload shorter than nonce + tag")]
    Truncated,

    #[error("decryption failed")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,
}

/// Process-wide AES-256-GCM sealer for the secret vault.
///
/// Sealed layout is `nonce (12) || ciphertext || tag (16)` with a fresh
/// random nonce per seal.
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)) }
    }

    pub fn from_hex(encoded: &str) -> Result<Self, CipherError> {
        let bytes = hex::decode(encoded)?;
        let key: [u8; KEY_LEN] =
            bytes.as_slice().try_into().map_err(|_| CipherError::KeyLength(bytes.len()))?;
        Ok(Self::new(key))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated);
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CipherError::Decrypt)
    }
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let cipher = SecretCipher::new([7u8; KEY_LEN]);
        let sealed = cipher.seal(b"hunter2").unwrap();

        assert_ne!(&sealed[NONCE_LEN..], b"hunter2".as_slice());
        assert_eq!(cipher.open(&sealed).unwrap(), b"hunter2");
    }

    #[test]
    fn distinct_nonces_per_seal() {
        let cipher = SecretCipher::new([7u8; KEY_LEN]);
        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn open_under_different_key_fails() {
        let sealed = SecretCipher::new([1u8; KEY_LEN]).seal(b"payload").unwrap();
        let other = SecretCipher::new([2u8; KEY_LEN]);
        assert!(matches!(other.open(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let cipher = SecretCipher::new([7u8; KEY_LEN]);
        assert!(matches!(cipher.open(&[0u8; 8]), Err(CipherError::Truncated)));
    }
}
