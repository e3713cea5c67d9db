//! Thin factories that wrap storage and the orchestrator behind the
//! handful of call shapes a host framework (an HTTP handler, a workflow
//! action/mutation pair) actually wants to invoke.

use std::sync::Arc;

use uuid::Uuid;

use crate::agent::{Agent, AgentObjectResult, AgentTextResult, CallArgs};
use crate::context::ContextOptions;
use crate::error::Result;
use crate::host_ctx::HostCtx;
use crate::message::CoreMessage;
use crate::persistence::{create_thread, save_messages, SaveMessagesArgs};
use crate::provider::EmbeddingModel;
use crate::storage::models::{AddMessagesResult, ThreadDoc};
use crate::storage::{CreateThreadArgs, StorageBackend};

/// A storage-backed mutation with no orchestration concerns at all.
pub struct CreateThreadMutation {
    storage: Arc<dyn StorageBackend>,
}

impl CreateThreadMutation {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn call(&self, args: CreateThreadArgs) -> Result<ThreadDoc> {
        create_thread(self.storage.as_ref(), args).await
    }
}

/// Everything `save_messages` needs except the embedding model, which the
/// adapter already has bound.
pub struct SaveMessagesActionArgs {
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    pub prompt_message_id: Option<Uuid>,
    pub messages: Vec<CoreMessage>,
    pub pending: bool,
    pub fail_pending_steps: bool,
}

pub struct SaveMessagesMutation {
    storage: Arc<dyn StorageBackend>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
}

impl SaveMessagesMutation {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        embedding_model: Option<Arc<dyn EmbeddingModel>>,
    ) -> Self {
        Self {
            storage,
            embedding_model,
        }
    }

    pub async fn call(&self, args: SaveMessagesActionArgs) -> Result<AddMessagesResult> {
        save_messages(
            self.storage.as_ref(),
            SaveMessagesArgs {
                thread_id: args.thread_id,
                user_id: args.user_id,
                agent_name: args.agent_name,
                prompt_message_id: args.prompt_message_id,
                messages: args.messages,
                pending: args.pending,
                fail_pending_steps: args.fail_pending_steps,
                embedding_model: self.embedding_model.as_ref(),
            },
        )
        .await
    }
}

/// Overrides an action/mutation factory fixes at construction time so the
/// host only supplies the per-call fields — the agent's own defaults are
/// baked in, leaving only thread/user/prompt as call-site arguments.
#[derive(Default)]
pub struct ActionDefaults {
    pub max_steps: Option<usize>,
    pub context_options: Option<ContextOptions>,
    pub host_ctx: Option<HostCtx>,
}

/// A callable bound to one agent, returning just the generated text.
pub struct TextAction {
    agent: Arc<Agent>,
    defaults: ActionDefaults,
}

impl TextAction {
    pub fn new(agent: Arc<Agent>, defaults: ActionDefaults) -> Self {
        Self { agent, defaults }
    }

    pub async fn call(&self, mut call: CallArgs) -> Result<String> {
        if call.max_steps.is_none() {
            call.max_steps = self.defaults.max_steps;
        }
        if call.context_options.is_none() {
            call.context_options = self.defaults.context_options.clone();
        }
        if let Some(host_ctx) = self.defaults.host_ctx {
            call.host_ctx = host_ctx;
        }
        let result = self.agent.generate_text(call).await?;
        Ok(result.result.text)
    }
}

/// A callable bound to one agent and a fixed schema, returning just the
/// generated object.
pub struct ObjectAction {
    agent: Arc<Agent>,
    schema: serde_json::Value,
    defaults: ActionDefaults,
}

impl ObjectAction {
    pub fn new(agent: Arc<Agent>, schema: serde_json::Value, defaults: ActionDefaults) -> Self {
        Self {
            agent,
            schema,
            defaults,
        }
    }

    pub async fn call(&self, mut call: CallArgs) -> Result<serde_json::Value> {
        call.schema = Some(self.schema.clone());
        if call.max_steps.is_none() {
            call.max_steps = self.defaults.max_steps;
        }
        if call.context_options.is_none() {
            call.context_options = self.defaults.context_options.clone();
        }
        if let Some(host_ctx) = self.defaults.host_ctx {
            call.host_ctx = host_ctx;
        }
        let result: AgentObjectResult = self.agent.generate_object(call).await?;
        Ok(result.object)
    }
}
