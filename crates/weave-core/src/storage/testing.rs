//! A deterministic, in-process `StorageBackend` double.
//!
//! Holds all state behind a single `Mutex<HashMap<..>>`, inspected and
//! mutated under one lock rather than pooled connections. Lets callers
//! exercise the full orchestration pipeline end to end without a running
//! Postgres instance.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::StorageError;

use super::models::*;
use super::{CreateThreadArgs, StorageBackend};

#[derive(Default)]
pub struct InMemoryStorage {
    threads: Mutex<HashMap<Uuid, ThreadDoc>>,
    messages: Mutex<HashMap<Uuid, MessageDoc>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn thread_messages(&self, messages: &HashMap<Uuid, MessageDoc>, thread_id: Uuid) -> Vec<MessageDoc> {
        let mut v: Vec<MessageDoc> = messages
            .values()
            .filter(|m| m.thread_id == thread_id)
            .cloned()
            .collect();
        v.sort_by_key(|m| (m.order, m.step_order));
        v
    }

    fn next_order(&self, messages: &HashMap<Uuid, MessageDoc>, thread_id: Uuid) -> i64 {
        messages
            .values()
            .filter(|m| m.thread_id == thread_id)
            .map(|m| m.order)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    fn next_step_order(
        &self,
        messages: &HashMap<Uuid, MessageDoc>,
        thread_id: Uuid,
        order: i64,
    ) -> i64 {
        messages
            .values()
            .filter(|m| m.thread_id == thread_id && m.order == order)
            .map(|m| m.step_order)
            .max()
            .map(|s| s + 1)
            .unwrap_or(0)
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadDoc, StorageError> {
        let doc = ThreadDoc {
            id: Uuid::new_v4(),
            user_id: args.user_id,
            title: args.title,
            summary: args.summary,
            created_at: Utc::now(),
        };
        self.threads.lock().unwrap().insert(doc.id, doc.clone());
        Ok(doc)
    }

    async fn list_messages_by_thread_id(
        &self,
        args: ListMessagesArgs,
    ) -> Result<MessagesPage, StorageError> {
        let messages = self.messages.lock().unwrap();
        let mut docs = self.thread_messages(&messages, args.thread_id);

        if let Some(cutoff_id) = args.up_to_and_including_message_id {
            if let Some(cutoff) = docs.iter().find(|d| d.id == cutoff_id) {
                let cutoff_key = (cutoff.order, cutoff.step_order);
                docs.retain(|d| (d.order, d.step_order) <= cutoff_key);
            }
        }

        docs.retain(|d| args.statuses.contains(&d.status));
        if args.exclude_tool_messages {
            docs.retain(|d| !d.is_tool_message());
        }

        if args.order == SortOrder::Desc {
            docs.reverse();
        }

        let is_done = docs.len() <= args.limit;
        docs.truncate(args.limit);

        Ok(MessagesPage {
            page: docs,
            is_done,
        })
    }

    async fn search_messages(
        &self,
        args: SearchMessagesArgs,
    ) -> Result<Vec<MessageDoc>, StorageError> {
        let messages = self.messages.lock().unwrap();

        let candidate_threads: Vec<Uuid> = if args.search_other_threads {
            if let Some(user_id) = &args.user_id {
                self.threads
                    .lock()
                    .unwrap()
                    .values()
                    .filter(|t| t.user_id.as_deref() == Some(user_id.as_str()))
                    .map(|t| t.id)
                    .collect()
            } else if let Some(thread_id) = args.thread_id {
                vec![thread_id]
            } else {
                vec![]
            }
        } else if let Some(thread_id) = args.thread_id {
            vec![thread_id]
        } else {
            vec![]
        };

        let mut scored: Vec<(f32, MessageDoc)> = Vec::new();
        for thread_id in &candidate_threads {
            for doc in self.thread_messages(&messages, *thread_id) {
                if doc.status != MessageStatus::Success || doc.is_tool_message() {
                    continue;
                }
                let mut score = 0.0f32;
                if args.text_search {
                    if let Some(text) = &doc.text {
                        let lower = text.to_lowercase();
                        for q in &args.text {
                            if lower.contains(&q.to_lowercase()) {
                                score += 1.0;
                            }
                        }
                    }
                }
                if args.vector_search {
                    if let (Some(query_vec), Some(doc_vec)) = (&args.vector, &doc.embedding) {
                        score += cosine_similarity(query_vec, doc_vec);
                    }
                }
                if score > 0.0 {
                    scored.push((score, doc));
                }
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(args.limit);

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for (_, doc) in scored {
            let thread_docs = self.thread_messages(&messages, doc.thread_id);
            let idx = thread_docs.iter().position(|d| d.id == doc.id).unwrap_or(0);
            let start = idx.saturating_sub(args.message_range.before);
            let end = (idx + args.message_range.after + 1).min(thread_docs.len());
            for d in &thread_docs[start..end] {
                if seen.insert(d.id) {
                    out.push(d.clone());
                }
            }
        }

        Ok(out)
    }

    async fn add_messages(
        &self,
        args: AddMessagesArgs,
    ) -> Result<AddMessagesResult, StorageError> {
        let mut messages = self.messages.lock().unwrap();

        if args.fail_pending_steps {
            let ids: Vec<Uuid> = messages
                .values()
                .filter(|m| m.thread_id == args.thread_id && m.status == MessageStatus::Pending)
                .map(|m| m.id)
                .collect();
            for id in ids {
                if let Some(m) = messages.get_mut(&id) {
                    m.status = MessageStatus::Failed;
                    m.error = Some("superseded by a new pending prompt".to_string());
                }
            }
        }

        let (order, mut step_order) = if let Some(prompt_id) = args.prompt_message_id {
            let prompt = messages
                .get(&prompt_id)
                .ok_or(StorageError::MessageNotFound(prompt_id))?;
            let order = prompt.order;
            let step_order = self.next_step_order(&messages, args.thread_id, order);
            (order, step_order)
        } else {
            let order = self.next_order(&messages, args.thread_id);
            (order, 0)
        };

        let mut message_ids = Vec::with_capacity(args.messages.len());
        let mut last_message_id = Uuid::nil();

        for (i, nm) in args.messages.into_iter().enumerate() {
            let id = Uuid::new_v4();
            let embedding = args
                .embeddings
                .as_ref()
                .and_then(|e| e.vectors.get(i).cloned().flatten());
            let embedding_model = args.embeddings.as_ref().map(|e| e.model.clone());

            let doc = MessageDoc {
                id,
                thread_id: args.thread_id,
                user_id: nm.user_id.or_else(|| args.user_id.clone()),
                agent_name: nm.agent_name.or_else(|| args.agent_name.clone()),
                order,
                step_order,
                status: if args.pending {
                    MessageStatus::Pending
                } else {
                    MessageStatus::Success
                },
                message: nm.message,
                text: nm.text,
                files: nm.files,
                reasoning: nm.reasoning,
                reasoning_details: nm.reasoning_details,
                sources: nm.sources,
                tool: nm.tool,
                embedding,
                embedding_model,
                error: None,
                created_at: Utc::now(),
            };

            messages.insert(id, doc);
            message_ids.push(id);
            last_message_id = id;
            step_order += 1;
        }

        Ok(AddMessagesResult {
            last_message_id,
            message_ids,
        })
    }

    async fn add_step(&self, args: AddStepArgs) -> Result<(), StorageError> {
        let mut messages = self.messages.lock().unwrap();
        let prompt = messages
            .get(&args.prompt_message_id)
            .ok_or(StorageError::MessageNotFound(args.prompt_message_id))?;
        let order = prompt.order;
        let mut step_order = self.next_step_order(&messages, args.thread_id, order);

        for (i, nm) in args.record.new_messages.into_iter().enumerate() {
            let id = Uuid::new_v4();
            let embedding = args
                .record
                .embeddings
                .as_ref()
                .and_then(|e| e.vectors.get(i).cloned().flatten());
            let embedding_model = args.record.embeddings.as_ref().map(|e| e.model.clone());

            let doc = MessageDoc {
                id,
                thread_id: args.thread_id,
                user_id: nm.user_id.or_else(|| args.user_id.clone()),
                agent_name: nm.agent_name,
                order,
                step_order,
                status: MessageStatus::Success,
                message: nm.message,
                text: nm.text,
                files: nm.files,
                reasoning: nm.reasoning,
                reasoning_details: nm.reasoning_details,
                sources: nm.sources,
                tool: nm.tool,
                embedding,
                embedding_model,
                error: None,
                created_at: Utc::now(),
            };
            messages.insert(id, doc);
            step_order += 1;
        }
        Ok(())
    }

    async fn commit_message(&self, message_id: Uuid) -> Result<(), StorageError> {
        let mut messages = self.messages.lock().unwrap();
        let doc = messages
            .get_mut(&message_id)
            .ok_or(StorageError::MessageNotFound(message_id))?;
        doc.status = MessageStatus::Success;
        Ok(())
    }

    async fn rollback_message(&self, message_id: Uuid, error: String) -> Result<(), StorageError> {
        let mut messages = self.messages.lock().unwrap();
        let doc = messages
            .get_mut(&message_id)
            .ok_or(StorageError::MessageNotFound(message_id))?;
        doc.status = MessageStatus::Failed;
        doc.error = Some(error);
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<MessageDoc>, StorageError> {
        Ok(self.messages.lock().unwrap().get(&message_id).cloned())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CoreMessage;
    use crate::storage::models::NewMessage;

    #[tokio::test]
    async fn add_messages_assigns_monotonic_order() {
        let store = InMemoryStorage::new();
        let thread = store
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();

        let r1 = store
            .add_messages(AddMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![NewMessage::from_core(CoreMessage::user("hi"))],
                embeddings: None,
                pending: false,
                fail_pending_steps: false,
            })
            .await
            .unwrap();

        let r2 = store
            .add_messages(AddMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![NewMessage::from_core(CoreMessage::user("again"))],
                embeddings: None,
                pending: false,
                fail_pending_steps: false,
            })
            .await
            .unwrap();

        let m1 = store.get_message(r1.last_message_id).await.unwrap().unwrap();
        let m2 = store.get_message(r2.last_message_id).await.unwrap().unwrap();
        assert!(m2.order > m1.order);
    }

    #[tokio::test]
    async fn fail_pending_steps_supersedes_prior_pending() {
        let store = InMemoryStorage::new();
        let thread = store
            .create_thread(CreateThreadArgs::default())
            .await
            .unwrap();

        let first = store
            .add_messages(AddMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![NewMessage::from_core(CoreMessage::user("first"))],
                embeddings: None,
                pending: true,
                fail_pending_steps: false,
            })
            .await
            .unwrap();

        store
            .add_messages(AddMessagesArgs {
                thread_id: thread.id,
                user_id: None,
                agent_name: None,
                prompt_message_id: None,
                messages: vec![NewMessage::from_core(CoreMessage::user("second"))],
                embeddings: None,
                pending: true,
                fail_pending_steps: true,
            })
            .await
            .unwrap();

        let first_doc = store
            .get_message(first.last_message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first_doc.status, MessageStatus::Failed);
    }
}
