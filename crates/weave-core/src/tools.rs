//! Tools come from three sources in priority order: call-site, thread
//! default, agent default. Only the highest-priority non-null source is
//! used — no merging.
//!
//! A tool is either *plain* (its `execute` takes only its arguments) or
//! *ctx-accepting* (it additionally receives `{hostCtx, userId, threadId,
//! messageId}`). Binding never mutates the call-site tool list; it wraps
//! each tool in a `BoundTool` that closes over the injected context so the
//! LLM provider's tool-execution path never has to carry it through.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::host_ctx::HostCtx;

/// Errors a tool's own `execute` may raise, independent of the call-site
/// context plumbing above it.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    InvalidArgs(String),
    #[error("tool execution failed: {0}")]
    Failed(String),
}

/// `{hostCtx, userId, threadId, messageId}` injected into a ctx-accepting
/// tool at bind time.
#[derive(Debug, Clone)]
pub struct ToolCtx {
    pub host_ctx: HostCtx,
    pub user_id: Option<String>,
    pub thread_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
}

/// A tool whose `execute` takes only `(args)` — no call-site state.
#[async_trait]
pub trait PlainTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value) -> std::result::Result<Value, ToolError>;
}

/// A tool flagged to receive the injected call-site `ToolCtx`.
#[async_trait]
pub trait CtxAcceptingTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, args: Value, ctx: &ToolCtx) -> std::result::Result<Value, ToolError>;
}

/// A declared tool before binding: either source keeps the same priority
/// treatment — the highest-priority non-null source is used.
#[derive(Clone)]
pub enum ToolSource {
    Plain(Arc<dyn PlainTool>),
    CtxAccepting(Arc<dyn CtxAcceptingTool>),
}

impl ToolSource {
    pub fn name(&self) -> &str {
        match self {
            ToolSource::Plain(t) => t.name(),
            ToolSource::CtxAccepting(t) => t.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolSource::Plain(t) => t.description(),
            ToolSource::CtxAccepting(t) => t.description(),
        }
    }

    pub fn parameters_schema(&self) -> Value {
        match self {
            ToolSource::Plain(t) => t.parameters_schema(),
            ToolSource::CtxAccepting(t) => t.parameters_schema(),
        }
    }
}

enum BoundInner {
    Plain(Arc<dyn PlainTool>),
    CtxAccepting(Arc<dyn CtxAcceptingTool>, Option<ToolCtx>),
}

/// A tool wrapped at bind time with its injected context, if any. This is
/// the only shape the LLM provider / orchestrator ever sees — it never
/// threads `ToolCtx` through the provider call itself.
pub struct BoundTool {
    name: String,
    description: String,
    parameters_schema: Value,
    inner: BoundInner,
}

impl BoundTool {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters_schema(&self) -> &Value {
        &self.parameters_schema
    }

    /// Execute the tool, forwarding the bound `ToolCtx` if it is a
    /// ctx-accepting tool. Asserts `ctx` is present before forwarding;
    /// absence (a ctx-accepting tool bound with no call-site context at
    /// all) raises `MisuseError`.
    pub async fn execute(&self, args: Value) -> Result<Value> {
        match &self.inner {
            BoundInner::Plain(tool) => tool
                .execute(args)
                .await
                .map_err(|e| Error::InvalidArgument(e.to_string())),
            BoundInner::CtxAccepting(tool, ctx) => {
                let ctx = ctx.as_ref().ok_or_else(|| {
                    Error::Misuse(format!(
                        "tool `{}` accepts ctx but none was injected",
                        self.name
                    ))
                })?;
                tool.execute(args, ctx)
                    .await
                    .map_err(|e| Error::InvalidArgument(e.to_string()))
            }
        }
    }
}

/// Wrap declared tools so execution receives the injected call-site
/// context. Plain tools pass through unmodified; each ctx-accepting tool
/// is bound with a clone of `ctx` (or `None`, which later surfaces as
/// `MisuseError` only if actually invoked).
pub fn bind_tools(sources: &[ToolSource], ctx: Option<ToolCtx>) -> Vec<Arc<BoundTool>> {
    sources
        .iter()
        .map(|source| {
            let name = source.name().to_string();
            let description = source.description().to_string();
            let parameters_schema = source.parameters_schema();
            let inner = match source {
                ToolSource::Plain(t) => BoundInner::Plain(t.clone()),
                ToolSource::CtxAccepting(t) => BoundInner::CtxAccepting(t.clone(), ctx.clone()),
            };
            Arc::new(BoundTool {
                name,
                description,
                parameters_schema,
                inner,
            })
        })
        .collect()
}

/// Resolve which tool source to bind given the three-way priority list:
/// call-site > thread default > agent default, no merge.
pub fn resolve_tool_sources<'a>(
    call_site: Option<&'a [ToolSource]>,
    thread_default: Option<&'a [ToolSource]>,
    agent_default: Option<&'a [ToolSource]>,
) -> &'a [ToolSource] {
    call_site
        .or(thread_default)
        .or(agent_default)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl PlainTool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> std::result::Result<Value, ToolError> {
            Ok(args)
        }
    }

    struct WhoAmI;

    #[async_trait]
    impl CtxAcceptingTool for WhoAmI {
        fn name(&self) -> &str {
            "whoami"
        }
        fn description(&self) -> &str {
            "returns the injected user id"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _args: Value,
            ctx: &ToolCtx,
        ) -> std::result::Result<Value, ToolError> {
            Ok(serde_json::json!({ "user_id": ctx.user_id }))
        }
    }

    #[tokio::test]
    async fn plain_tool_passes_through_without_ctx() {
        let sources = vec![ToolSource::Plain(Arc::new(Echo))];
        let bound = bind_tools(&sources, None);
        let result = bound[0].execute(serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(result, serde_json::json!({"x": 1}));
    }

    #[tokio::test]
    async fn ctx_accepting_tool_receives_injected_ctx() {
        let sources = vec![ToolSource::CtxAccepting(Arc::new(WhoAmI))];
        let ctx = ToolCtx {
            host_ctx: HostCtx::Mutation,
            user_id: Some("u1".into()),
            thread_id: None,
            message_id: None,
        };
        let bound = bind_tools(&sources, Some(ctx));
        let result = bound[0].execute(Value::Null).await.unwrap();
        assert_eq!(result, serde_json::json!({"user_id": "u1"}));
    }

    #[tokio::test]
    async fn ctx_accepting_tool_without_ctx_is_misuse() {
        let sources = vec![ToolSource::CtxAccepting(Arc::new(WhoAmI))];
        let bound = bind_tools(&sources, None);
        let err = bound[0].execute(Value::Null).await.unwrap_err();
        assert!(matches!(err, Error::Misuse(_)));
    }

    #[test]
    fn priority_is_call_site_then_thread_then_agent() {
        let call_site = vec![ToolSource::Plain(Arc::new(Echo))];
        let thread_default: Vec<ToolSource> = vec![];
        let agent_default: Vec<ToolSource> = vec![];
        let resolved =
            resolve_tool_sources(Some(&call_site), Some(&thread_default), Some(&agent_default));
        assert_eq!(resolved.len(), 1);

        let resolved_thread =
            resolve_tool_sources(None, Some(&thread_default), Some(&agent_default));
        assert_eq!(resolved_thread.len(), 0);
    }
}
