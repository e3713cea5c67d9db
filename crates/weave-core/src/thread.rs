//! A value object binding an agent's four call methods to a fixed
//! `(thread_id, user_id)` pair, so a caller holding a `Thread` never has to
//! pass those two fields on every call.

use std::sync::Arc;

use uuid::Uuid;

use crate::agent::{Agent, AgentObjectResult, AgentTextResult, CallArgs};
use crate::error::Result;
use crate::host_ctx::HostCtx;

/// Binds an [`Agent`] to one thread and (optionally) one user. Cheap to
/// clone and hand around — it owns no state of its own beyond the two ids
/// and a reference-counted pointer to the agent, which is itself immutable
/// configuration safe to share across calls.
#[derive(Clone)]
pub struct Thread {
    agent: Arc<Agent>,
    thread_id: Uuid,
    user_id: Option<String>,
}

impl Thread {
    pub fn new(agent: Arc<Agent>, thread_id: Uuid, user_id: Option<String>) -> Self {
        Self {
            agent,
            thread_id,
            user_id,
        }
    }

    pub fn thread_id(&self) -> Uuid {
        self.thread_id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn bind(&self, mut call: CallArgs, host_ctx: HostCtx) -> CallArgs {
        call.thread_id = Some(self.thread_id);
        if call.user_id.is_none() {
            call.user_id = self.user_id.clone();
        }
        call.host_ctx = host_ctx;
        call
    }

    pub async fn generate_text(&self, call: CallArgs, host_ctx: HostCtx) -> Result<AgentTextResult> {
        self.agent.generate_text(self.bind(call, host_ctx)).await
    }

    pub async fn stream_text(&self, call: CallArgs, host_ctx: HostCtx) -> Result<AgentTextResult> {
        self.agent.stream_text(self.bind(call, host_ctx)).await
    }

    pub async fn generate_object(
        &self,
        call: CallArgs,
        host_ctx: HostCtx,
    ) -> Result<AgentObjectResult> {
        self.agent.generate_object(self.bind(call, host_ctx)).await
    }

    pub async fn stream_object(
        &self,
        call: CallArgs,
        host_ctx: HostCtx,
    ) -> Result<AgentObjectResult> {
        self.agent.stream_object(self.bind(call, host_ctx)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        GenerateObjectArgs, GenerateTextArgs, GenerateTextResult, LlmProvider, ModelInfo, StepSink,
        StreamSink,
    };
    use crate::storage::testing::InMemoryStorage;
    use crate::storage::{CreateThreadArgs, StorageBackend};
    use async_trait::async_trait;
    use std::sync::Arc as StdArc;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate_text(
            &self,
            _args: GenerateTextArgs,
            on_step_finish: StdArc<dyn StepSink>,
        ) -> std::result::Result<GenerateTextResult, crate::error::ProviderError> {
            let step = crate::storage::models::Step {
                text: Some("hi".into()),
                reasoning: None,
                messages: vec![crate::message::CoreMessage::assistant_text("hi")],
                finish_reason: "stop".into(),
                usage: None,
                logprobs: None,
                synthesized: false,
            };
            on_step_finish.on_step_finish(&step).await?;
            Ok(GenerateTextResult {
                text: "hi".into(),
                steps: vec![step],
                finish_reason: "stop".into(),
                usage: None,
            })
        }

        async fn stream_text(
            &self,
            args: GenerateTextArgs,
            sink: StdArc<dyn StreamSink>,
        ) -> std::result::Result<GenerateTextResult, crate::error::ProviderError> {
            self.generate_text(args, sink).await
        }

        async fn generate_object(
            &self,
            _args: GenerateObjectArgs,
        ) -> std::result::Result<crate::message::ObjectResult, crate::error::ProviderError> {
            unimplemented!("not exercised by these tests")
        }

        async fn stream_object(
            &self,
            args: GenerateObjectArgs,
            sink: StdArc<dyn StreamSink>,
        ) -> std::result::Result<crate::message::ObjectResult, crate::error::ProviderError> {
            self.generate_object(args).await
        }
    }

    #[tokio::test]
    async fn thread_methods_inject_fixed_ids() {
        let storage: StdArc<dyn StorageBackend> = StdArc::new(InMemoryStorage::new());
        let thread_doc = storage
            .create_thread(CreateThreadArgs {
                user_id: Some("u1".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let agent = StdArc::new(Agent {
            name: "test-agent".into(),
            chat_model: ModelInfo::new("test", "echo-1"),
            instructions: None,
            max_retries: None,
            max_steps: 5,
            provider: StdArc::new(EchoProvider),
            embedding_model: None,
            storage: storage.clone(),
            tools: None,
            context_options: None,
            storage_options: None,
        });

        let thread = Thread::new(agent, thread_doc.id, Some("u1".into()));

        let mut call = CallArgs::default();
        call.prompt = Some("hello".into());

        let result = thread
            .generate_text(call, HostCtx::Mutation)
            .await
            .unwrap();
        assert_eq!(result.result.text, "hi");

        let message_id = result.message_id.unwrap();
        let doc = storage.get_message(message_id).await.unwrap().unwrap();
        assert_eq!(doc.thread_id, thread_doc.id);
        assert_eq!(doc.user_id.as_deref(), Some("u1"));
    }
}
