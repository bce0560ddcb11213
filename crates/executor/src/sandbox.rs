use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strato_primitives::function::FunctionDef;
use strato_primitives::secret::SecretMaterial;
use strato_primitives::Payload;

/// One queued side effect returned by a sandbox run, dispatched after the
/// run completes in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Payload,
}

/// What a sandbox run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutput {
    pub output: Payload,
    pub actions: Vec<ActionRequest>,
}

impl SandboxOutput {
    pub fn new(output: Payload) -> Self {
        Self { output, actions: Vec::new() }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("{0}")]
    Failed(String),
}

/// Pluggable script runtime contract.
///
/// The runtime is single-threaded per execution and must return within the
/// executor's wall-clock timeout; the input it receives is a frozen copy,
/// so it can never reach the caller's payload. Secret plaintext is passed
/// in-process only and must not be echoed into the output.
#[async_trait]
pub trait FunctionSandbox: Send + Sync {
    async fn run(
        &self,
        def: &FunctionDef,
        input: &Payload,
        secrets: &SecretMaterial,
    ) -> Result<SandboxOutput, SandboxError>;
}

/// Sandbox used when no script runtime is wired in: every run yields an
/// empty output and no actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSandbox;

#[async_trait]
impl FunctionSandbox for NoopSandbox {
    async fn run(
        &self,
        _def: &FunctionDef,
        _input: &Payload,
        _secrets: &SecretMaterial,
    ) -> Result<SandboxOutput, SandboxError> {
        Ok(SandboxOutput::new(Payload::Object(Default::default())))
    }
}
