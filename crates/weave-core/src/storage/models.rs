//! Storage-layer data model: `Thread`, `MessageDoc`, `Step`, `Embedding`,
//! and the request/response shapes the `StorageBackend` trait passes
//! across the mutation/query boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::CoreMessage;

/// `{ id, userId?, title?, summary?, createdAt }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDoc {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A `MessageDoc`'s lifecycle state: created pending or success, mutated
/// only by commit or rollback, never re-embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Success,
    Failed,
}

/// `{ vectors: (vector|null)[], dimension, model }`. `vectors` preserves
/// positional alignment with the message array it was generated from: a
/// `None` entry is a tool message or one with no extractable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub dimension: usize,
    pub model: String,
}

/// One row of conversation history.
///
/// `order` groups all messages belonging to a single prompt -> response
/// transaction; `stepOrder` orders messages within that group —
/// `(order, step_order)` is a strict total order within a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDoc {
    pub id: Uuid,
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    pub order: i64,
    pub step_order: i64,
    pub status: MessageStatus,
    pub message: CoreMessage,
    pub text: Option<String>,
    pub files: Vec<serde_json::Value>,
    pub reasoning: Option<String>,
    pub reasoning_details: Vec<serde_json::Value>,
    pub sources: Vec<serde_json::Value>,
    /// True iff `message.role == tool` or the assistant message contains
    /// any tool-call content.
    pub tool: bool,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageDoc {
    /// Whether this doc's role is `tool`.
    pub fn is_tool_message(&self) -> bool {
        matches!(self.message, CoreMessage::Tool { .. })
    }
}

/// A freshly-minted message awaiting an `order`/`step_order` assignment by
/// the backend. Produced by `message::serialize_new_messages_in_step` and
/// by the orchestrator's input-saving path.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    pub message: CoreMessage,
    pub text: Option<String>,
    pub files: Vec<serde_json::Value>,
    pub reasoning: Option<String>,
    pub reasoning_details: Vec<serde_json::Value>,
    pub sources: Vec<serde_json::Value>,
    pub tool: bool,
}

impl NewMessage {
    pub fn from_core(message: CoreMessage) -> Self {
        let text = crate::message::extract_text(&message);
        let tool = crate::message::is_tool_bearing(&message);
        Self {
            user_id: None,
            agent_name: None,
            message,
            text,
            files: Vec::new(),
            reasoning: None,
            reasoning_details: Vec::new(),
            sources: Vec::new(),
            tool,
        }
    }
}

/// One iteration of the LLM loop: text + zero or more tool calls + their
/// results. Produced by an `LlmProvider` step callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    pub messages: Vec<CoreMessage>,
    pub finish_reason: String,
    pub usage: Option<Usage>,
    pub logprobs: Option<serde_json::Value>,
    /// Set by `message::serialize_object_result`: marks a step fabricated
    /// from a non-streaming object generation rather than emitted by the
    /// provider.
    #[serde(default)]
    pub synthesized: bool,
}

/// Per-step token usage, forwarded to the caller's usage handler exactly
/// once per completed step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A completed step, ready to be persisted as a single mutation: the
/// serialized provider step, the new messages it produced, and their
/// aligned embeddings.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: Step,
    pub new_messages: Vec<NewMessage>,
    pub embeddings: Option<Embedding>,
}

/// Ascending/descending page order for `list_messages_by_thread_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Cursor-paginated query args for `messages.listMessagesByThreadId`.
#[derive(Debug, Clone)]
pub struct ListMessagesArgs {
    pub thread_id: Uuid,
    pub exclude_tool_messages: bool,
    pub limit: usize,
    pub up_to_and_including_message_id: Option<Uuid>,
    pub order: SortOrder,
    pub statuses: Vec<MessageStatus>,
}

#[derive(Debug, Clone)]
pub struct MessagesPage {
    pub page: Vec<MessageDoc>,
    pub is_done: bool,
}

/// `{before, after}` window expansion applied after the search `limit`.
#[derive(Debug, Clone, Copy)]
pub struct MessageRange {
    pub before: usize,
    pub after: usize,
}

impl Default for MessageRange {
    fn default() -> Self {
        Self { before: 2, after: 1 }
    }
}

/// `messages.searchMessages` args.
#[derive(Debug, Clone)]
pub struct SearchMessagesArgs {
    pub user_id: Option<String>,
    pub thread_id: Option<Uuid>,
    pub before_message_id: Option<Uuid>,
    pub text: Vec<String>,
    pub limit: usize,
    pub message_range: MessageRange,
    pub vector: Option<Vec<f32>>,
    pub vector_model: Option<String>,
    pub text_search: bool,
    pub vector_search: bool,
    /// Whether to scan the user's other threads too (requires
    /// `HostCtx::Action`).
    pub search_other_threads: bool,
}

/// `messages.addMessages` args.
#[derive(Debug, Clone)]
pub struct AddMessagesArgs {
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub agent_name: Option<String>,
    pub prompt_message_id: Option<Uuid>,
    pub messages: Vec<NewMessage>,
    pub embeddings: Option<Embedding>,
    pub pending: bool,
    pub fail_pending_steps: bool,
}

#[derive(Debug, Clone)]
pub struct AddMessagesResult {
    pub last_message_id: Uuid,
    pub message_ids: Vec<Uuid>,
}

/// `messages.addStep` args. Never fails pending steps (a step in progress
/// must not roll itself back).
#[derive(Debug, Clone)]
pub struct AddStepArgs {
    pub thread_id: Uuid,
    pub user_id: Option<String>,
    pub prompt_message_id: Uuid,
    pub record: StepRecord,
}
