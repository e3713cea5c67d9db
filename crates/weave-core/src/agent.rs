//! The per-call pipeline: build args, save the prompt pending, invoke the
//! provider, persist each step as it lands, then commit or roll back
//! exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::{fetch_context, merge_context_options, ContextOptions, FetchContextArgs};
use crate::error::{Error, ProviderError, Result};
use crate::host_ctx::HostCtx;
use crate::message::{
    prompt_or_messages_to_core_messages, serialize_object_result, CoreMessage, ObjectResult,
};
use crate::persistence::{
    complete_message, save_messages, save_step, CompletionResult, SaveMessagesArgs, SaveStepArgs,
};
use crate::provider::{
    AbortSignal, EmbeddingModel, GenerateObjectArgs, GenerateTextArgs, GenerateTextResult,
    LlmProvider, ModelInfo, StepSink, StreamSink,
};
use crate::storage::models::{Step, Usage};
use crate::storage::StorageBackend;
use crate::tools::{bind_tools, resolve_tool_sources, ToolCtx, ToolSource};

/// Per-step usage side channel. Fires exactly once per completed step.
#[async_trait]
pub trait UsageHandler: Send + Sync {
    async fn on_usage(&self, usage: &Usage, step: &Step);
}

/// Streaming text delta passthrough.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    async fn on_chunk(&self, delta: &str);
}

/// `{saveAnyInputMessages?, saveAllInputMessages?, saveOutputMessages?}`.
/// Input messages are saved unless explicitly turned off; only the last
/// (prompt) message is saved unless `saveAllInputMessages` is set; output
/// steps are saved unless explicitly turned off.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    pub save_any_input_messages: Option<bool>,
    pub save_all_input_messages: Option<bool>,
    pub save_output_messages: Option<bool>,
}

/// Immutable agent configuration, safe to share across calls and threads.
pub struct Agent {
    pub name: String,
    pub chat_model: ModelInfo,
    pub instructions: Option<String>,
    pub max_retries: Option<u32>,
    pub max_steps: usize,
    pub provider: Arc<dyn LlmProvider>,
    pub embedding_model: Option<Arc<dyn EmbeddingModel>>,
    pub storage: Arc<dyn StorageBackend>,
    pub tools: Option<Vec<ToolSource>>,
    pub context_options: Option<ContextOptions>,
    pub storage_options: Option<StorageOptions>,
}

/// Call-site arguments shared by `generate_text`/`stream_text`/
/// `generate_object`/`stream_object`.
pub struct CallArgs {
    pub user_id: Option<String>,
    pub thread_id: Option<Uuid>,
    pub prompt: Option<String>,
    pub messages: Option<Vec<CoreMessage>>,
    pub prompt_message_id: Option<Uuid>,
    pub system: Option<String>,
    pub model: Option<ModelInfo>,
    pub max_retries: Option<u32>,
    pub max_steps: Option<usize>,
    /// Call-site tool declarations (highest priority).
    pub tools: Option<Vec<ToolSource>>,
    /// Thread-default tool declarations (middle priority).
    pub thread_tools: Option<Vec<ToolSource>>,
    pub context_options: Option<ContextOptions>,
    pub storage_options: Option<StorageOptions>,
    pub host_ctx: HostCtx,
    pub abort_signal: Option<AbortSignal>,
    pub usage_handler: Option<Arc<dyn UsageHandler>>,
    pub on_chunk: Option<Arc<dyn ChunkSink>>,
    /// Schema for `generate_object`/`stream_object`; ignored by the text
    /// methods.
    pub schema: Option<serde_json::Value>,
}

impl Default for CallArgs {
    fn default() -> Self {
        Self {
            user_id: None,
            thread_id: None,
            prompt: None,
            messages: None,
            prompt_message_id: None,
            system: None,
            model: None,
            max_retries: None,
            max_steps: None,
            tools: None,
            thread_tools: None,
            context_options: None,
            storage_options: None,
            host_ctx: HostCtx::ReadOnly,
            abort_signal: None,
            usage_handler: None,
            on_chunk: None,
            schema: None,
        }
    }
}

/// A `generate_text`/`stream_text` result with the orchestrator's own
/// addition: the prompt `MessageDoc` id, so callers can look up the full
/// thread row.
pub struct AgentTextResult {
    pub result: GenerateTextResult,
    pub message_id: Option<Uuid>,
}

pub struct AgentObjectResult {
    pub object: serde_json::Value,
    pub message_id: Option<Uuid>,
}

struct Prepared {
    model: ModelInfo,
    system: Option<String>,
    max_retries: Option<u32>,
    messages: Vec<CoreMessage>,
    message_id: Option<Uuid>,
    tools: Vec<ToolSource>,
    storage_options: StorageOptions,
}

/// Per-field shallow merge of call-site `storageOptions` over an agent
/// default, the same shape as `merge_context_options`.
fn merge_storage_options(
    call_site: Option<&StorageOptions>,
    agent_default: Option<&StorageOptions>,
) -> StorageOptions {
    StorageOptions {
        save_any_input_messages: call_site
            .and_then(|c| c.save_any_input_messages)
            .or_else(|| agent_default.and_then(|a| a.save_any_input_messages)),
        save_all_input_messages: call_site
            .and_then(|c| c.save_all_input_messages)
            .or_else(|| agent_default.and_then(|a| a.save_all_input_messages)),
        save_output_messages: call_site
            .and_then(|c| c.save_output_messages)
            .or_else(|| agent_default.and_then(|a| a.save_output_messages)),
    }
}

impl Agent {
    /// Saves the pending prompt message (if any) and assembles the
    /// context array the provider will see.
    async fn prepare(&self, call: &CallArgs) -> Result<Prepared> {
        if call.prompt_message_id.is_some() && (call.prompt.is_some() || call.messages.is_some()) {
            return Err(Error::InvalidArgument(
                "promptMessageId cannot be combined with prompt or messages".into(),
            ));
        }

        let input_messages = if call.prompt_message_id.is_none() {
            prompt_or_messages_to_core_messages(
                call.prompt.as_deref(),
                call.messages.as_deref(),
                None,
                false,
            )?
        } else {
            Vec::new()
        };

        let context_options =
            merge_context_options(call.context_options.as_ref(), self.context_options.as_ref());

        let context_docs = fetch_context(
            self.storage.as_ref(),
            self.embedding_model.as_ref(),
            FetchContextArgs {
                user_id: call.user_id.as_deref(),
                thread_id: call.thread_id,
                messages: &input_messages,
                up_to_and_including_message_id: call.prompt_message_id,
                context_options: &context_options,
                host_ctx: call.host_ctx,
            },
        )
        .await?;

        let storage_options =
            merge_storage_options(call.storage_options.as_ref(), self.storage_options.as_ref());
        let save_any_input = storage_options.save_any_input_messages.unwrap_or(true);

        let mut message_id = None;
        if let Some(thread_id) = call.thread_id {
            if !input_messages.is_empty() && save_any_input {
                let save_all = storage_options.save_all_input_messages.unwrap_or(false);
                let to_save: Vec<CoreMessage> = if save_all {
                    input_messages.clone()
                } else {
                    vec![input_messages.last().expect("non-empty").clone()]
                };

                let saved = save_messages(
                    self.storage.as_ref(),
                    SaveMessagesArgs {
                        thread_id,
                        user_id: call.user_id.clone(),
                        agent_name: Some(self.name.clone()),
                        prompt_message_id: None,
                        messages: to_save,
                        pending: true,
                        fail_pending_steps: true,
                        embedding_model: self.embedding_model.as_ref(),
                    },
                )
                .await?;
                message_id = Some(saved.last_message_id);
            }
        }

        // When called with `promptMessageId` instead of `prompt`/`messages`,
        // no new input message is saved here, but steps still need an
        // accrual/commit target: the supplied prompt id itself.
        let message_id = call.prompt_message_id.or(message_id);

        let mut messages: Vec<CoreMessage> =
            context_docs.iter().map(|d| d.message.clone()).collect();
        messages.extend(input_messages);

        let tools = resolve_tool_sources(
            call.tools.as_deref(),
            call.thread_tools.as_deref(),
            self.tools.as_deref(),
        )
        .to_vec();

        Ok(Prepared {
            model: call.model.clone().unwrap_or_else(|| self.chat_model.clone()),
            system: call.system.clone().or_else(|| self.instructions.clone()),
            max_retries: call.max_retries.or(self.max_retries),
            messages,
            message_id,
            tools,
            storage_options,
        })
    }

    fn bind_call_tools(&self, prepared: &Prepared, call: &CallArgs) -> Vec<Arc<crate::tools::BoundTool>> {
        let ctx = ToolCtx {
            host_ctx: call.host_ctx,
            user_id: call.user_id.clone(),
            thread_id: call.thread_id,
            message_id: prepared.message_id,
        };
        bind_tools(&prepared.tools, Some(ctx))
    }

    pub async fn generate_text(&self, call: CallArgs) -> Result<AgentTextResult> {
        let prepared = self.prepare(&call).await?;
        let bound_tools = self.bind_call_tools(&prepared, &call);
        let save_output = prepared.storage_options.save_output_messages.unwrap_or(true);
        let completed = Arc::new(AtomicBool::new(false));

        let sink = Arc::new(OrchestratorSink {
            storage: self.storage.clone(),
            embedding_model: self.embedding_model.clone(),
            thread_id: call.thread_id,
            message_id: prepared.message_id,
            user_id: call.user_id.clone(),
            provider_name: prepared.model.provider.clone(),
            model_name: prepared.model.model_id.clone(),
            save_output,
            usage_handler: call.usage_handler.clone(),
            on_chunk: call.on_chunk.clone(),
            completed: completed.clone(),
        });

        let args = GenerateTextArgs {
            model: prepared.model.clone(),
            system: prepared.system.clone(),
            messages: prepared.messages.clone(),
            tools: bound_tools,
            tool_choice: None,
            max_steps: call.max_steps.unwrap_or(self.max_steps),
            max_retries: prepared.max_retries,
            abort_signal: call.abort_signal.clone().unwrap_or_default(),
        };

        match self.provider.generate_text(args, sink).await {
            Ok(result) => {
                self.commit_once(&completed, prepared.message_id).await?;
                Ok(AgentTextResult {
                    result,
                    message_id: prepared.message_id,
                })
            }
            Err(err) => {
                self.rollback_once(&completed, prepared.message_id, &err)
                    .await;
                Err(Error::Provider(err))
            }
        }
    }

    pub async fn stream_text(&self, call: CallArgs) -> Result<AgentTextResult> {
        let prepared = self.prepare(&call).await?;
        let bound_tools = self.bind_call_tools(&prepared, &call);
        let save_output = prepared.storage_options.save_output_messages.unwrap_or(true);
        let completed = Arc::new(AtomicBool::new(false));

        let sink = Arc::new(OrchestratorSink {
            storage: self.storage.clone(),
            embedding_model: self.embedding_model.clone(),
            thread_id: call.thread_id,
            message_id: prepared.message_id,
            user_id: call.user_id.clone(),
            provider_name: prepared.model.provider.clone(),
            model_name: prepared.model.model_id.clone(),
            save_output,
            usage_handler: call.usage_handler.clone(),
            on_chunk: call.on_chunk.clone(),
            completed: completed.clone(),
        });

        let args = GenerateTextArgs {
            model: prepared.model.clone(),
            system: prepared.system.clone(),
            messages: prepared.messages.clone(),
            tools: bound_tools,
            tool_choice: None,
            max_steps: call.max_steps.unwrap_or(self.max_steps),
            max_retries: prepared.max_retries,
            abort_signal: call.abort_signal.clone().unwrap_or_default(),
        };

        match self.provider.stream_text(args, sink).await {
            Ok(result) => {
                self.commit_once(&completed, prepared.message_id).await?;
                Ok(AgentTextResult {
                    result,
                    message_id: prepared.message_id,
                })
            }
            Err(err) => {
                // `on_error` on the sink may already have rolled back;
                // `completed` guards against a second rollback here.
                self.rollback_once(&completed, prepared.message_id, &err)
                    .await;
                Err(Error::Provider(err))
            }
        }
    }

    pub async fn generate_object(&self, call: CallArgs) -> Result<AgentObjectResult> {
        let prepared = self.prepare(&call).await?;
        let schema = call
            .schema
            .clone()
            .ok_or_else(|| Error::InvalidArgument("generate_object requires a schema".into()))?;

        let args = GenerateObjectArgs {
            model: prepared.model.clone(),
            system: prepared.system.clone(),
            messages: prepared.messages.clone(),
            schema,
            max_retries: prepared.max_retries,
            abort_signal: call.abort_signal.clone().unwrap_or_default(),
        };

        let completed = Arc::new(AtomicBool::new(false));

        match self.provider.generate_object(args).await {
            Ok(result) => {
                match self.finish_object_result(&call, &prepared, &result).await {
                    Ok(()) => {
                        self.commit_once(&completed, prepared.message_id).await?;
                        Ok(AgentObjectResult {
                            object: result.object,
                            message_id: prepared.message_id,
                        })
                    }
                    Err(err) => {
                        // A save/commit failure after the prompt was saved
                        // still rolls back exactly once, same as the text
                        // path — it must not leave the prompt stuck pending.
                        self.rollback_object_once(&completed, prepared.message_id, &err)
                            .await;
                        Err(err)
                    }
                }
            }
            Err(err) => {
                self.rollback_once(&completed, prepared.message_id, &err).await;
                Err(Error::Provider(err))
            }
        }
    }

    /// Persist the synthesized step and fire the usage handler. Split out
    /// of `generate_object` so a failure here can still be routed through
    /// a rollback instead of propagating past it via `?`.
    async fn finish_object_result(
        &self,
        call: &CallArgs,
        prepared: &Prepared,
        result: &ObjectResult,
    ) -> Result<()> {
        if prepared.storage_options.save_output_messages.unwrap_or(true) {
            self.persist_object_result(call, prepared, result).await?;
        }
        if let Some(usage) = result.usage.clone() {
            if let Some(handler) = &call.usage_handler {
                let step = synthesized_step(result, usage.clone());
                handler.on_usage(&usage, &step).await;
            }
        }
        Ok(())
    }

    async fn rollback_object_once(
        &self,
        completed: &Arc<AtomicBool>,
        message_id: Option<Uuid>,
        err: &Error,
    ) {
        if let Some(message_id) = message_id {
            if !completed.swap(true, Ordering::SeqCst) {
                if let Err(rollback_err) = complete_message(
                    self.storage.as_ref(),
                    message_id,
                    CompletionResult::Error(err.to_string()),
                )
                .await
                {
                    tracing::error!(%message_id, error = %rollback_err, "rollback itself failed");
                }
            }
        }
    }

    pub async fn stream_object(&self, call: CallArgs) -> Result<AgentObjectResult> {
        // This provider contract resolves the stream to a final
        // `ObjectResult` the same way `generate_object` does, so the same
        // persist-then-commit path applies.
        self.generate_object(call).await
    }

    async fn persist_object_result(
        &self,
        call: &CallArgs,
        prepared: &Prepared,
        result: &ObjectResult,
    ) -> Result<()> {
        let (Some(thread_id), Some(message_id)) = (call.thread_id, prepared.message_id) else {
            return Ok(());
        };
        let step = serialize_object_result(result, &prepared.model.provider, &prepared.model.model_id);
        save_step(
            self.storage.as_ref(),
            SaveStepArgs {
                thread_id,
                user_id: call.user_id.clone(),
                prompt_message_id: message_id,
                step,
                provider: &prepared.model.provider,
                model: &prepared.model.model_id,
                embedding_model: self.embedding_model.as_ref(),
            },
        )
        .await
    }

    async fn commit_once(&self, completed: &Arc<AtomicBool>, message_id: Option<Uuid>) -> Result<()> {
        if let Some(message_id) = message_id {
            if !completed.swap(true, Ordering::SeqCst) {
                complete_message(self.storage.as_ref(), message_id, CompletionResult::Success)
                    .await?;
            }
        }
        Ok(())
    }

    async fn rollback_once(
        &self,
        completed: &Arc<AtomicBool>,
        message_id: Option<Uuid>,
        err: &ProviderError,
    ) {
        if let Some(message_id) = message_id {
            if !completed.swap(true, Ordering::SeqCst) {
                if let Err(rollback_err) = complete_message(
                    self.storage.as_ref(),
                    message_id,
                    CompletionResult::Error(err.to_string()),
                )
                .await
                {
                    tracing::error!(%message_id, error = %rollback_err, "rollback itself failed");
                }
            }
        }
    }
}

fn synthesized_step(result: &ObjectResult, usage: Usage) -> Step {
    Step {
        text: result.raw_text.clone(),
        reasoning: None,
        messages: vec![],
        finish_reason: "stop".to_string(),
        usage: Some(usage),
        logprobs: None,
        synthesized: true,
    }
}

/// Per-step persistence + usage metering, shared by `generate_text` and
/// `stream_text`. A single `completed` flag guards commit/rollback so at
/// most one of them ever fires for a given call. See DESIGN.md.
struct OrchestratorSink {
    storage: Arc<dyn StorageBackend>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
    thread_id: Option<Uuid>,
    message_id: Option<Uuid>,
    user_id: Option<String>,
    provider_name: String,
    model_name: String,
    save_output: bool,
    usage_handler: Option<Arc<dyn UsageHandler>>,
    on_chunk: Option<Arc<dyn ChunkSink>>,
    completed: Arc<AtomicBool>,
}

#[async_trait]
impl StepSink for OrchestratorSink {
    async fn on_step_finish(&self, step: &Step) -> std::result::Result<(), ProviderError> {
        if let (Some(thread_id), Some(message_id)) = (self.thread_id, self.message_id) {
            if self.save_output {
                save_step(
                    self.storage.as_ref(),
                    SaveStepArgs {
                        thread_id,
                        user_id: self.user_id.clone(),
                        prompt_message_id: message_id,
                        step: step.clone(),
                        provider: &self.provider_name,
                        model: &self.model_name,
                        embedding_model: self.embedding_model.as_ref(),
                    },
                )
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            }
        }

        if let Some(usage) = &step.usage {
            if let Some(handler) = &self.usage_handler {
                handler.on_usage(usage, step).await;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StreamSink for OrchestratorSink {
    async fn on_chunk(&self, delta: &str) {
        if let Some(sink) = &self.on_chunk {
            sink.on_chunk(delta).await;
        }
    }

    async fn on_error(&self, err: &ProviderError) {
        if let Some(message_id) = self.message_id {
            if !self.completed.swap(true, Ordering::SeqCst) {
                if let Err(rollback_err) = complete_message(
                    self.storage.as_ref(),
                    message_id,
                    CompletionResult::Error(err.to_string()),
                )
                .await
                {
                    tracing::error!(%message_id, error = %rollback_err, "rollback itself failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::InMemoryStorage;
    use crate::storage::CreateThreadArgs;
    use std::sync::Mutex;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate_text(
            &self,
            args: GenerateTextArgs,
            on_step_finish: Arc<dyn StepSink>,
        ) -> std::result::Result<GenerateTextResult, ProviderError> {
            let last_text = args
                .messages
                .last()
                .and_then(crate::message::extract_text)
                .unwrap_or_default();
            let step = Step {
                text: Some(format!("echo: {last_text}")),
                reasoning: None,
                messages: vec![CoreMessage::assistant_text(format!("echo: {last_text}"))],
                finish_reason: "stop".into(),
                usage: Some(Usage {
                    prompt_tokens: 1,
                    completion_tokens: 1,
                    total_tokens: 2,
                }),
                logprobs: None,
                synthesized: false,
            };
            on_step_finish.on_step_finish(&step).await?;
            Ok(GenerateTextResult {
                text: step.text.clone().unwrap(),
                steps: vec![step],
                finish_reason: "stop".into(),
                usage: None,
            })
        }

        async fn stream_text(
            &self,
            args: GenerateTextArgs,
            sink: Arc<dyn StreamSink>,
        ) -> std::result::Result<GenerateTextResult, ProviderError> {
            self.generate_text(args, sink).await
        }

        async fn generate_object(
            &self,
            _args: GenerateObjectArgs,
        ) -> std::result::Result<ObjectResult, ProviderError> {
            Ok(ObjectResult {
                object: serde_json::json!({"ok": true}),
                raw_text: Some("{\"ok\":true}".into()),
                usage: None,
            })
        }

        async fn stream_object(
            &self,
            args: GenerateObjectArgs,
            _sink: Arc<dyn StreamSink>,
        ) -> std::result::Result<ObjectResult, ProviderError> {
            self.generate_object(args).await
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        async fn generate_text(
            &self,
            _args: GenerateTextArgs,
            _on_step_finish: Arc<dyn StepSink>,
        ) -> std::result::Result<GenerateTextResult, ProviderError> {
            Err(ProviderError::Request("boom".into()))
        }

        async fn stream_text(
            &self,
            args: GenerateTextArgs,
            sink: Arc<dyn StreamSink>,
        ) -> std::result::Result<GenerateTextResult, ProviderError> {
            self.generate_text(args, sink).await
        }

        async fn generate_object(
            &self,
            _args: GenerateObjectArgs,
        ) -> std::result::Result<ObjectResult, ProviderError> {
            Err(ProviderError::Request("boom".into()))
        }

        async fn stream_object(
            &self,
            args: GenerateObjectArgs,
            sink: Arc<dyn StreamSink>,
        ) -> std::result::Result<ObjectResult, ProviderError> {
            self.generate_object(args).await
        }
    }

    /// Wraps `InMemoryStorage` but fails every `add_step` call, to exercise
    /// the rollback path when persistence fails *after* the provider
    /// already returned a result.
    struct FailingStepStorage(InMemoryStorage);

    #[async_trait]
    impl StorageBackend for FailingStepStorage {
        async fn create_thread(
            &self,
            args: CreateThreadArgs,
        ) -> std::result::Result<crate::storage::models::ThreadDoc, crate::error::StorageError>
        {
            self.0.create_thread(args).await
        }

        async fn list_messages_by_thread_id(
            &self,
            args: crate::storage::models::ListMessagesArgs,
        ) -> std::result::Result<crate::storage::models::MessagesPage, crate::error::StorageError>
        {
            self.0.list_messages_by_thread_id(args).await
        }

        async fn search_messages(
            &self,
            args: crate::storage::models::SearchMessagesArgs,
        ) -> std::result::Result<Vec<crate::storage::models::MessageDoc>, crate::error::StorageError>
        {
            self.0.search_messages(args).await
        }

        async fn add_messages(
            &self,
            args: crate::storage::models::AddMessagesArgs,
        ) -> std::result::Result<
            crate::storage::models::AddMessagesResult,
            crate::error::StorageError,
        > {
            self.0.add_messages(args).await
        }

        async fn add_step(
            &self,
            _args: crate::storage::models::AddStepArgs,
        ) -> std::result::Result<(), crate::error::StorageError> {
            Err(crate::error::StorageError::Backend("step write failed".into()))
        }

        async fn commit_message(
            &self,
            message_id: Uuid,
        ) -> std::result::Result<(), crate::error::StorageError> {
            self.0.commit_message(message_id).await
        }

        async fn rollback_message(
            &self,
            message_id: Uuid,
            error: String,
        ) -> std::result::Result<(), crate::error::StorageError> {
            self.0.rollback_message(message_id, error).await
        }

        async fn get_message(
            &self,
            message_id: Uuid,
        ) -> std::result::Result<Option<crate::storage::models::MessageDoc>, crate::error::StorageError>
        {
            self.0.get_message(message_id).await
        }
    }

    fn test_agent(provider: Arc<dyn LlmProvider>, storage: Arc<dyn StorageBackend>) -> Agent {
        Agent {
            name: "test-agent".into(),
            chat_model: ModelInfo::new("test", "echo-1"),
            instructions: None,
            max_retries: None,
            max_steps: 5,
            provider,
            embedding_model: None,
            storage,
            tools: None,
            context_options: None,
            storage_options: None,
        }
    }

    #[tokio::test]
    async fn empty_thread_generates_one_child_message() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let thread = storage
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();
        let agent = test_agent(Arc::new(EchoProvider), storage.clone());

        let mut call = CallArgs::default();
        call.thread_id = Some(thread.id);
        call.prompt = Some("Hi".into());

        let result = agent.generate_text(call).await.unwrap();
        assert_eq!(result.result.text, "echo: Hi");
        let message_id = result.message_id.unwrap();
        let prompt_doc = storage.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(prompt_doc.status, crate::storage::models::MessageStatus::Success);
    }

    #[tokio::test]
    async fn failure_after_save_rolls_back_prompt() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let thread = storage
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();
        let agent = test_agent(Arc::new(FailingProvider), storage.clone());

        let mut call = CallArgs::default();
        call.thread_id = Some(thread.id);
        call.prompt = Some("Hi".into());

        let err = agent.generate_text(call).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        let page = storage
            .list_messages_by_thread_id(crate::storage::models::ListMessagesArgs {
                thread_id: thread.id,
                exclude_tool_messages: false,
                limit: 10,
                up_to_and_including_message_id: None,
                order: crate::storage::models::SortOrder::Asc,
                statuses: vec![crate::storage::models::MessageStatus::Failed],
            })
            .await
            .unwrap();
        assert_eq!(page.page.len(), 1);
        assert!(page.page[0].error.is_some());
    }

    #[tokio::test]
    async fn second_prompt_supersedes_first_pending() {
        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let thread = storage
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();
        let agent = test_agent(Arc::new(EchoProvider), storage.clone());

        let mut first = CallArgs::default();
        first.thread_id = Some(thread.id);
        first.prompt = Some("first".into());
        let first_result = agent.generate_text(first).await.unwrap();

        let mut second = CallArgs::default();
        second.thread_id = Some(thread.id);
        second.prompt = Some("second".into());
        agent.generate_text(second).await.unwrap();

        let first_doc = storage
            .get_message(first_result.message_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_doc.status, crate::storage::models::MessageStatus::Success);
    }

    #[tokio::test]
    async fn usage_handler_fires_once_per_step() {
        struct Counter(Mutex<u32>);
        #[async_trait]
        impl UsageHandler for Counter {
            async fn on_usage(&self, _usage: &Usage, _step: &Step) {
                *self.0.lock().unwrap() += 1;
            }
        }

        let storage: Arc<dyn StorageBackend> = Arc::new(InMemoryStorage::new());
        let thread = storage
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();
        let agent = test_agent(Arc::new(EchoProvider), storage.clone());
        let counter = Arc::new(Counter(Mutex::new(0)));

        let mut call = CallArgs::default();
        call.thread_id = Some(thread.id);
        call.prompt = Some("Hi".into());
        call.usage_handler = Some(counter.clone());

        agent.generate_text(call).await.unwrap();
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn generate_object_rolls_back_prompt_on_post_save_storage_failure() {
        let storage: Arc<dyn StorageBackend> =
            Arc::new(FailingStepStorage(InMemoryStorage::new()));
        let thread = storage
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();
        let agent = test_agent(Arc::new(EchoProvider), storage.clone());

        let mut call = CallArgs::default();
        call.thread_id = Some(thread.id);
        call.prompt = Some("Hi".into());
        call.schema = Some(serde_json::json!({"type": "object"}));

        let err = agent.generate_object(call).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        // The prompt was saved pending before the provider ran; since the
        // synthesized step then failed to persist, it must end up rolled
        // back to `failed` rather than stuck `pending`.
        let page = storage
            .list_messages_by_thread_id(crate::storage::models::ListMessagesArgs {
                thread_id: thread.id,
                exclude_tool_messages: false,
                limit: 10,
                up_to_and_including_message_id: None,
                order: crate::storage::models::SortOrder::Asc,
                statuses: vec![crate::storage::models::MessageStatus::Failed],
            })
            .await
            .unwrap();
        assert_eq!(page.page.len(), 1);
        assert!(page.page[0].error.is_some());
    }
}
