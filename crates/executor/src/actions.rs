use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use strato_primitives::id::{ExecutionId, FunctionId};
use strato_primitives::{CallerContext, ErrorCode, Payload, Scope};

/// Context handed to every action handler. `execution_id` doubles as the
/// dedup key base so handlers stay idempotent under retry.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub caller: CallerContext,
    pub scope: Scope,
    pub execution_id: ExecutionId,
    /// The function whose execution queued the action.
    pub function_id: FunctionId,
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("action_unsupported")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ActionError::Unsupported(_) => ErrorCode::ActionUnsupported,
            ActionError::Failed(_) => ErrorCode::ActionFailed,
        }
    }
}

/// One registered action type. Handlers call the target *service*, never
/// its storage, so each service stays the sole writer of its entities.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &ActionContext, params: &Payload) -> Result<Payload, ActionError>;
}

/// Closed-world mapping from action type to handler. Unknown types fail
/// with `action_unsupported`.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn ActionHandler>>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.write().insert(kind.into(), handler);
    }

    pub fn kinds(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub async fn dispatch(
        &self,
        kind: &str,
        ctx: &ActionContext,
        params: &Payload,
    ) -> Result<Payload, ActionError> {
        let handler = self.handlers.read().get(kind).cloned();
        match handler {
            None => Err(ActionError::Unsupported(kind.to_owned())),
            Some(handler) => handler.handle(ctx, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use strato_primitives::id::AccountId;
    use strato_primitives::{Role, TenantId};

    use super::*;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(
            &self,
            _ctx: &ActionContext,
            params: &Payload,
        ) -> Result<Payload, ActionError> {
            Ok(params.clone())
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            caller: CallerContext::new("t", "tester", Role::User),
            scope: Scope::new(TenantId::new("t"), AccountId::new("a")),
            execution_id: ExecutionId::random(),
            function_id: FunctionId::new("f"),
        }
    }

    #[tokio::test]
    async fn unknown_kind_is_unsupported() {
        let registry = ActionRegistry::new();
        let err = registry.dispatch("unknown.action", &ctx(), &json!({})).await.unwrap_err();
        assert!(matches!(err, ActionError::Unsupported(_)));
        assert_eq!(err.to_string(), "action_unsupported");
    }

    #[tokio::test]
    async fn registered_kind_dispatches() {
        let registry = ActionRegistry::new();
        registry.register("echo", Arc::new(Echo));

        let result = registry.dispatch("echo", &ctx(), &json!({"x": 1})).await.unwrap();
        assert_eq!(result, json!({"x": 1}));
    }
}
