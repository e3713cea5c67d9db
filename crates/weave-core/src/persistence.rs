//! Every operation here generates embeddings before it ever calls the
//! storage backend: embeddings are pre-persistence, so a failed
//! embedding call never leaves a partially-searchable message behind.

use std::sync::Arc;

use uuid::Uuid;

use crate::embedding::generate_embeddings;
use crate::error::{Error, Result};
use crate::message::{serialize_new_messages_in_step, CoreMessage};
use crate::provider::EmbeddingModel;
use crate::storage::models::{
    AddMessagesArgs, AddMessagesResult, AddStepArgs, NewMessage, Step, StepRecord,
};
use crate::storage::{CreateThreadArgs, StorageBackend};

/// `threads.createThread`. A thin pass-through — thread creation carries
/// no embeddings or ordering concerns.
pub async fn create_thread(
    storage: &dyn StorageBackend,
    args: CreateThreadArgs,
) -> Result<crate::storage::models::ThreadDoc> {
    storage.create_thread(args).await.map_err(Error::Storage)
}

/// `messages.saveMessages` args.
pub struct SaveMessagesArgs<'a> {
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    pub prompt_message_id: Option<Uuid>,
    pub messages: Vec<CoreMessage>,
    pub pending: bool,
    pub fail_pending_steps: bool,
    pub embedding_model: Option<&'a Arc<dyn EmbeddingModel>>,
}

/// Generate embeddings first, then issue a single `add_messages`
/// mutation that optionally fails prior pending messages, appends the new
/// ones with the given `pending` status, and assigns `order`/`stepOrder`.
pub async fn save_messages(
    storage: &dyn StorageBackend,
    args: SaveMessagesArgs<'_>,
) -> Result<AddMessagesResult> {
    let embeddings = generate_embeddings(&args.messages, args.embedding_model).await?;
    let new_messages: Vec<NewMessage> = args
        .messages
        .into_iter()
        .map(NewMessage::from_core)
        .collect();

    storage
        .add_messages(AddMessagesArgs {
            thread_id: args.thread_id,
            user_id: args.user_id,
            agent_name: args.agent_name,
            prompt_message_id: args.prompt_message_id,
            messages: new_messages,
            embeddings,
            pending: args.pending,
            fail_pending_steps: args.fail_pending_steps,
        })
        .await
        .map_err(Error::Storage)
}

/// `messages.addStep` args. Never sets `fail_pending_steps` — a step in
/// progress must not invalidate its own prompt.
pub struct SaveStepArgs<'a> {
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub prompt_message_id: Uuid,
    pub step: Step,
    pub provider: &'a str,
    pub model: &'a str,
    pub embedding_model: Option<&'a Arc<dyn EmbeddingModel>>,
}

/// Extract the new messages a step produced, embed them, and insert them
/// under the prompt's `order` with a monotonically increasing
/// `step_order`.
pub async fn save_step(storage: &dyn StorageBackend, args: SaveStepArgs<'_>) -> Result<()> {
    let new_messages = serialize_new_messages_in_step(&args.step, args.provider, args.model);
    let core_messages: Vec<CoreMessage> = new_messages.iter().map(|m| m.message.clone()).collect();
    let embeddings = generate_embeddings(&core_messages, args.embedding_model).await?;

    storage
        .add_step(AddStepArgs {
            thread_id: args.thread_id,
            user_id: args.user_id,
            prompt_message_id: args.prompt_message_id,
            record: StepRecord {
                step: args.step,
                new_messages,
                embeddings,
            },
        })
        .await
        .map_err(Error::Storage)
}

/// The outcome passed to `completeMessage`: `success` transitions
/// `pending -> success`; `error` transitions `pending -> failed`
/// recording the error string.
pub enum CompletionResult {
    Success,
    Error(String),
}

pub async fn complete_message(
    storage: &dyn StorageBackend,
    message_id: Uuid,
    result: CompletionResult,
) -> Result<()> {
    match result {
        CompletionResult::Success => storage.commit_message(message_id).await.map_err(Error::Storage),
        CompletionResult::Error(error) => storage
            .rollback_message(message_id, error)
            .await
            .map_err(Error::Storage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::models::MessageStatus;
    use crate::storage::testing::InMemoryStorage;

    #[tokio::test]
    async fn save_then_commit_transitions_to_success() {
        let storage = InMemoryStorage::new();
        let thread = create_thread(&storage, CreateThreadArgs::default())
            .await
            .unwrap();

        let result = save_messages(
            &storage,
            SaveMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![CoreMessage::user("hi")],
                pending: true,
                fail_pending_steps: true,
                embedding_model: None,
            },
        )
        .await
        .unwrap();

        let doc = storage
            .get_message(result.last_message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, MessageStatus::Pending);

        complete_message(&storage, result.last_message_id, CompletionResult::Success)
            .await
            .unwrap();

        let doc = storage
            .get_message(result.last_message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, MessageStatus::Success);
    }

    #[tokio::test]
    async fn rollback_records_error() {
        let storage = InMemoryStorage::new();
        let thread = create_thread(&storage, CreateThreadArgs::default())
            .await
            .unwrap();

        let result = save_messages(
            &storage,
            SaveMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![CoreMessage::user("hi")],
                pending: true,
                fail_pending_steps: true,
                embedding_model: None,
            },
        )
        .await
        .unwrap();

        complete_message(
            &storage,
            result.last_message_id,
            CompletionResult::Error("boom".to_string()),
        )
        .await
        .unwrap();

        let doc = storage
            .get_message(result.last_message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, MessageStatus::Failed);
        assert_eq!(doc.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn save_step_increments_step_order_under_prompt() {
        let storage = InMemoryStorage::new();
        let thread = create_thread(&storage, CreateThreadArgs::default())
            .await
            .unwrap();

        let prompt = save_messages(
            &storage,
            SaveMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![CoreMessage::user("hi")],
                pending: true,
                fail_pending_steps: false,
                embedding_model: None,
            },
        )
        .await
        .unwrap();

        let step = Step {
            text: Some("hello".into()),
            reasoning: None,
            messages: vec![CoreMessage::assistant_text("hello")],
            finish_reason: "stop".into(),
            usage: None,
            logprobs: None,
            synthesized: false,
        };

        save_step(
            &storage,
            SaveStepArgs {
                thread_id: thread.id,
                user_id: None,
                prompt_message_id: prompt.last_message_id,
                step,
                provider: "test",
                model: "test-model",
                embedding_model: None,
            },
        )
        .await
        .unwrap();

        let prompt_doc = storage
            .get_message(prompt.last_message_id)
            .await
            .unwrap()
            .unwrap();
        let page = storage
            .list_messages_by_thread_id(crate::storage::models::ListMessagesArgs {
                thread_id: thread.id,
                exclude_tool_messages: false,
                limit: 10,
                up_to_and_including_message_id: None,
                order: crate::storage::models::SortOrder::Asc,
                statuses: vec![MessageStatus::Pending, MessageStatus::Success],
            })
            .await
            .unwrap();

        let child = page
            .page
            .iter()
            .find(|d| d.id != prompt_doc.id)
            .expect("step child message");
        assert_eq!(child.order, prompt_doc.order);
        assert!(child.step_order > prompt_doc.step_order);
    }
}
