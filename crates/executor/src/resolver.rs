use async_trait::async_trait;
use strato_primitives::secret::SecretMaterial;
use strato_primitives::Scope;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("secret `{0}` does not exist")]
    Missing(String),

    #[error("secret store error: {0}")]
    Store(String),
}

/// Secret lookup seam.
///
/// Stores validate declared secret names through [`exists`](Self::exists)
/// without ever exposing plaintext; [`resolve`](Self::resolve) hands
/// decrypted material to the executor only.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn exists(&self, scope: &Scope, name: &str) -> Result<bool, ResolveError>;

    /// Resolves every named secret or fails with the first missing name.
    async fn resolve(&self, scope: &Scope, names: &[String])
        -> Result<SecretMaterial, ResolveError>;
}
