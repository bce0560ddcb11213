//! Cryptographic primitives for the secret vault, feed submissions and the
//! randomness service.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod cipher;
mod kdf;
mod signing;

pub use cipher::{CipherError, SecretCipher, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use kdf::{derive_bytes, KdfError};
pub use signing::{verify_hex, SigningError, SigningPair};
