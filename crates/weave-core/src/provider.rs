//! The LLM provider external collaborator: a minimal interface wrapping
//! `generateText`/`streamText`/`generateObject`/`streamObject` plus an
//! embedding endpoint, independent of any one vendor. `rig-core` is the
//! natural home for a concrete adapter; `weave-core` only depends on the
//! trait boundary so the orchestrator never has to know which vendor it's
//! talking to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ProviderError;
use crate::message::{CoreMessage, ObjectResult};
use crate::storage::models::{Step, Usage};
use crate::tools::BoundTool;

/// `{modelId, provider}`.
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub provider: String,
    pub model_id: String,
}

impl ModelInfo {
    pub fn new(provider: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_id: model_id.into(),
        }
    }
}

/// Cooperative cancellation token forwarded into the provider call. A
/// plain atomic flag is all a single-call cancellation signal needs — no
/// separate cancellation-token crate is pulled in for it.
#[derive(Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Arguments shared by `generate_text`/`stream_text`.
pub struct GenerateTextArgs {
    pub model: ModelInfo,
    pub system: Option<String>,
    pub messages: Vec<CoreMessage>,
    pub tools: Vec<Arc<BoundTool>>,
    pub tool_choice: Option<String>,
    pub max_steps: usize,
    pub max_retries: Option<u32>,
    pub abort_signal: AbortSignal,
}

/// Arguments shared by `generate_object`/`stream_object`.
pub struct GenerateObjectArgs {
    pub model: ModelInfo,
    pub system: Option<String>,
    pub messages: Vec<CoreMessage>,
    pub schema: Value,
    pub max_retries: Option<u32>,
    pub abort_signal: AbortSignal,
}

/// The result of a (possibly multi-step) text generation call.
#[derive(Debug, Clone)]
pub struct GenerateTextResult {
    pub text: String,
    pub steps: Vec<Step>,
    pub finish_reason: String,
    pub usage: Option<Usage>,
}

/// Per-step callback invoked as each step of a `generateText`/`streamText`
/// call completes. Persistence and the usage handler both hang off this.
#[async_trait]
pub trait StepSink: Send + Sync {
    async fn on_step_finish(&self, step: &Step) -> Result<(), ProviderError>;
}

/// Streaming-only callbacks layered on top of `StepSink`: `onChunk`,
/// `onError`, `onFinish`. Default bodies are no-ops so a caller can
/// implement only what it needs.
#[async_trait]
pub trait StreamSink: StepSink {
    async fn on_chunk(&self, _delta: &str) {}

    async fn on_error(&self, _err: &ProviderError) {}

    async fn on_finish(&self, _result: &GenerateTextResult) {}
}

/// The LLM provider contract.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate_text(
        &self,
        args: GenerateTextArgs,
        on_step_finish: Arc<dyn StepSink>,
    ) -> Result<GenerateTextResult, ProviderError>;

    async fn stream_text(
        &self,
        args: GenerateTextArgs,
        sink: Arc<dyn StreamSink>,
    ) -> Result<GenerateTextResult, ProviderError>;

    async fn generate_object(
        &self,
        args: GenerateObjectArgs,
    ) -> Result<ObjectResult, ProviderError>;

    async fn stream_object(
        &self,
        args: GenerateObjectArgs,
        sink: Arc<dyn StreamSink>,
    ) -> Result<ObjectResult, ProviderError>;
}

/// The embedding endpoint. `doEmbed({values}) -> {embeddings[][]}`;
/// models expose `{modelId}`.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn embed_batch(&self, values: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

pub mod rig_adapter {
    //! A thin `LlmProvider`/`EmbeddingModel` adapter over `rig-core`'s
    //! completion and embedding model traits: a model-agnostic wrapper
    //! that does not leak rig's types past this module.
    use super::*;
    use rig::completion::Prompt;

    /// Wraps any `rig_core` completion model that implements `Prompt`
    /// (single-turn request/response). Multi-step tool loops are driven by
    /// the orchestrator calling this adapter once per step, keeping the
    /// step loop external rather than inside the LLM client.
    pub struct RigTextProvider<M> {
        model: M,
        info: ModelInfo,
    }

    impl<M> RigTextProvider<M> {
        pub fn new(model: M, info: ModelInfo) -> Self {
            Self { model, info }
        }
    }

    #[async_trait]
    impl<M> LlmProvider for RigTextProvider<M>
    where
        M: Prompt + Send + Sync,
    {
        async fn generate_text(
            &self,
            args: GenerateTextArgs,
            on_step_finish: Arc<dyn StepSink>,
        ) -> Result<GenerateTextResult, ProviderError> {
            let prompt = render_prompt(&args.system, &args.messages);
            let text = self
                .model
                .prompt(prompt)
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;

            let step = Step {
                text: Some(text.clone()),
                reasoning: None,
                messages: vec![CoreMessage::assistant_text(text.clone())],
                finish_reason: "stop".to_string(),
                usage: None,
                logprobs: None,
                synthesized: false,
            };
            on_step_finish.on_step_finish(&step).await?;

            Ok(GenerateTextResult {
                text,
                steps: vec![step],
                finish_reason: "stop".to_string(),
                usage: None,
            })
        }

        async fn stream_text(
            &self,
            args: GenerateTextArgs,
            sink: Arc<dyn StreamSink>,
        ) -> Result<GenerateTextResult, ProviderError> {
            // rig's streaming trait surface varies by model backend; this
            // adapter degrades to a single chunk rather than guessing at a
            // provider-specific streaming API, keeping its rig integration
            // to the narrow `Tool`/`Prompt` surface it actually needs.
            let result = self.generate_text(args, sink.clone()).await?;
            sink.on_chunk(&result.text).await;
            sink.on_finish(&result).await;
            Ok(result)
        }

        async fn generate_object(
            &self,
            args: GenerateObjectArgs,
        ) -> Result<ObjectResult, ProviderError> {
            let prompt = render_prompt(&args.system, &args.messages);
            let text = self
                .model
                .prompt(prompt)
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            let object: Value = serde_json::from_str(&text)
                .map_err(|e| ProviderError::UnexpectedResponse(e.to_string()))?;
            Ok(ObjectResult {
                object,
                raw_text: Some(text),
                usage: None,
            })
        }

        async fn stream_object(
            &self,
            args: GenerateObjectArgs,
            sink: Arc<dyn StreamSink>,
        ) -> Result<ObjectResult, ProviderError> {
            let result = self.generate_object(args).await?;
            if let Some(text) = &result.raw_text {
                sink.on_chunk(text).await;
            }
            Ok(result)
        }
    }

    fn render_prompt(system: &Option<String>, messages: &[CoreMessage]) -> String {
        let mut out = String::new();
        if let Some(s) = system {
            out.push_str(s);
            out.push_str("\n\n");
        }
        for m in messages {
            if let Some(text) = crate::message::extract_text(m) {
                out.push_str(&text);
                out.push('\n');
            }
        }
        out
    }

    pub struct RigEmbeddingModel<M> {
        model: M,
        model_id: String,
    }

    impl<M> RigEmbeddingModel<M> {
        pub fn new(model: M, model_id: impl Into<String>) -> Self {
            Self {
                model,
                model_id: model_id.into(),
            }
        }
    }

    #[async_trait]
    impl<M> EmbeddingModel for RigEmbeddingModel<M>
    where
        M: rig::embeddings::embedding::EmbeddingModel + Send + Sync,
    {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        async fn embed_batch(&self, values: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let docs: Vec<String> = values.to_vec();
            let embeddings = self
                .model
                .embed_texts(docs)
                .await
                .map_err(|e| ProviderError::Request(e.to_string()))?;
            Ok(embeddings
                .into_iter()
                .map(|e| e.vec.into_iter().map(|v| v as f32).collect())
                .collect())
        }
    }
}
