//! Merges a recent-history pagination window with optional hybrid
//! (text + vector) search, de-duplicates by `_id`, sorts the combined
//! list by `(order, stepOrder)`, and drops orphaned tool messages
//! before the model ever sees them.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::embedding::generate_embeddings;
use crate::error::{Error, Result};
use crate::host_ctx::HostCtx;
use crate::message::{extract_text, CoreMessage};
use crate::provider::EmbeddingModel;
use crate::storage::models::{
    ListMessagesArgs, MessageDoc, MessageRange, MessageStatus, SearchMessagesArgs, SortOrder,
};
use crate::storage::StorageBackend;

/// Every field is `Option` so shallow merging can tell "unset" apart from
/// an explicit `false`/`0`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub text_search: Option<bool>,
    pub vector_search: Option<bool>,
    pub limit: Option<usize>,
    pub message_range: Option<MessageRange>,
    /// Requires `HostCtx::Action`.
    pub search_other_threads: Option<bool>,
}

/// Shallow-merge call-site `searchOptions` over an agent default: each
/// field is taken from the call site if present, else the agent default.
/// If the merged result has no `limit`, the whole thing is dropped (no
/// search is performed): a search must be configured with an explicit
/// bound from *somewhere* in the precedence chain, or it does not run
/// at all. See DESIGN.md.
pub fn merge_search_options(
    call_site: Option<&SearchOptions>,
    agent_default: Option<&SearchOptions>,
) -> Option<SearchOptions> {
    let merged = match (call_site, agent_default) {
        (None, None) => return None,
        (Some(c), None) => c.clone(),
        (None, Some(b)) => b.clone(),
        (Some(c), Some(b)) => SearchOptions {
            text_search: c.text_search.or(b.text_search),
            vector_search: c.vector_search.or(b.vector_search),
            limit: c.limit.or(b.limit),
            message_range: c.message_range.or(b.message_range),
            search_other_threads: c.search_other_threads.or(b.search_other_threads),
        },
    };
    if merged.limit.is_none() {
        return None;
    }
    Some(merged)
}

/// Context-assembly knobs for a single generation call.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub recent_messages: Option<i64>,
    /// Default true; the legacy `includeToolCalls=true` flips this off.
    pub exclude_tool_messages: Option<bool>,
    pub include_tool_calls: Option<bool>,
    pub search: Option<SearchOptions>,
}

impl ContextOptions {
    fn exclude_tool(&self) -> bool {
        if self.include_tool_calls == Some(true) {
            return false;
        }
        self.exclude_tool_messages.unwrap_or(true)
    }
}

/// Merge call-site `contextOptions` over an agent default. Scalar leaves
/// override wholesale; `search` gets the shallow merge in
/// `merge_search_options`.
pub fn merge_context_options(
    call_site: Option<&ContextOptions>,
    agent_default: Option<&ContextOptions>,
) -> ContextOptions {
    ContextOptions {
        recent_messages: call_site
            .and_then(|c| c.recent_messages)
            .or_else(|| agent_default.and_then(|a| a.recent_messages)),
        exclude_tool_messages: call_site
            .and_then(|c| c.exclude_tool_messages)
            .or_else(|| agent_default.and_then(|a| a.exclude_tool_messages)),
        include_tool_calls: call_site
            .and_then(|c| c.include_tool_calls)
            .or_else(|| agent_default.and_then(|a| a.include_tool_calls)),
        search: merge_search_options(
            call_site.and_then(|c| c.search.as_ref()),
            agent_default.and_then(|a| a.search.as_ref()),
        ),
    }
}

pub struct FetchContextArgs<'a> {
    pub user_id: Option<&'a str>,
    pub thread_id: Option<Uuid>,
    /// The input messages about to be appended (used to derive the
    /// search query text: the last message's extracted text).
    pub messages: &'a [CoreMessage],
    pub up_to_and_including_message_id: Option<Uuid>,
    pub context_options: &'a ContextOptions,
    pub host_ctx: HostCtx,
}

/// Fetch and assemble the context array for a generation call: recent
/// history, then optional hybrid search results, deduplicated, sorted,
/// and stripped of orphaned tool messages.
pub async fn fetch_context(
    storage: &dyn StorageBackend,
    embedding_model: Option<&Arc<dyn EmbeddingModel>>,
    args: FetchContextArgs<'_>,
) -> Result<Vec<MessageDoc>> {
    if args.user_id.is_none() && args.thread_id.is_none() {
        return Err(Error::InvalidArgument(
            "at least one of userId or threadId is required".into(),
        ));
    }

    let mut included: HashSet<Uuid> = HashSet::new();
    let mut recent: Vec<MessageDoc> = Vec::new();

    if let Some(thread_id) = args.thread_id {
        let recent_messages_param = args.context_options.recent_messages;
        let should_fetch =
            recent_messages_param != Some(0) || args.up_to_and_including_message_id.is_some();

        if should_fetch {
            let limit = recent_messages_param.unwrap_or(100).max(0) as usize;
            if limit > 0 {
                let page = storage
                    .list_messages_by_thread_id(ListMessagesArgs {
                        thread_id,
                        exclude_tool_messages: args.context_options.exclude_tool(),
                        limit,
                        up_to_and_including_message_id: args.up_to_and_including_message_id,
                        order: SortOrder::Desc,
                        statuses: vec![MessageStatus::Success],
                    })
                    .await
                    .map_err(Error::Storage)?;
                recent = page.page;
                recent.reverse();
            }
        }
    }

    for doc in &recent {
        included.insert(doc.id);
    }

    let mut prepended: Vec<MessageDoc> = Vec::new();

    if let Some(search) = &args.context_options.search {
        let text_search = search.text_search.unwrap_or(false);
        let vector_search = search.vector_search.unwrap_or(false);

        if text_search || vector_search {
            let search_other_threads = search.search_other_threads.unwrap_or(false);
            if search_other_threads && !args.host_ctx.is_action() {
                return Err(Error::Unsupported(
                    "searchOtherThreads requires an action-scope HostCtx".into(),
                ));
            }

            let mut query_texts: Vec<String> = Vec::new();
            if let Some(last) = args.messages.last() {
                if let Some(t) = extract_text(last) {
                    if !t.is_empty() {
                        query_texts.push(t);
                    }
                }
            }
            if let Some(cutoff_id) = args.up_to_and_including_message_id {
                if let Some(doc) = recent.iter().find(|d| d.id == cutoff_id) {
                    if let Some(t) = &doc.text {
                        query_texts.insert(0, t.clone());
                    }
                }
            }

            let mut vector = None;
            let mut vector_model = None;
            if vector_search {
                if let Some(model) = embedding_model {
                    if let Some(text) = query_texts.last().cloned() {
                        let embedded =
                            generate_embeddings(&[CoreMessage::user(text)], Some(model)).await?;
                        vector = embedded.and_then(|e| e.vectors.into_iter().next().flatten());
                        vector_model = Some(model.model_id().to_string());
                    }
                }
            }

            let limit = search.limit.unwrap_or(10);
            let message_range = search.message_range.unwrap_or_default();

            let hits = storage
                .search_messages(SearchMessagesArgs {
                    user_id: args.user_id.map(String::from),
                    thread_id: args.thread_id,
                    before_message_id: args.up_to_and_including_message_id,
                    text: query_texts,
                    limit,
                    message_range,
                    vector,
                    vector_model,
                    text_search,
                    vector_search,
                    search_other_threads,
                })
                .await
                .map_err(Error::Storage)?;

            for doc in hits {
                if included.insert(doc.id) {
                    prepended.push(doc);
                }
            }
        }
    }

    let mut combined = prepended;
    combined.extend(recent);
    combined.sort_by_key(|d| (d.order, d.step_order));

    Ok(filter_orphaned_tool_messages(combined))
}

/// Walk the merged context in order, collecting tool-call ids announced
/// by assistant messages; drop any tool message whose every tool-result
/// id is absent from that set. Logs every drop.
pub fn filter_orphaned_tool_messages(docs: Vec<MessageDoc>) -> Vec<MessageDoc> {
    let mut announced: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(docs.len());

    for doc in docs {
        match &doc.message {
            CoreMessage::Assistant { .. } => {
                for id in doc.message.announced_tool_call_ids() {
                    announced.insert(id.to_string());
                }
                out.push(doc);
            }
            CoreMessage::Tool { .. } => {
                let ids = doc.message.tool_result_ids();
                let orphaned = !ids.is_empty() && ids.iter().all(|id| !announced.contains(*id));
                if orphaned {
                    tracing::warn!(message_id = %doc.id, "dropping orphaned tool message");
                    continue;
                }
                out.push(doc);
            }
            _ => out.push(doc),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ToolResultPart;
    use chrono::Utc;

    fn doc(order: i64, step: i64, message: CoreMessage) -> MessageDoc {
        MessageDoc {
            id: Uuid::new_v4(),
            thread_id: Uuid::new_v4(),
            user_id: None,
            agent_name: None,
            order,
            step_order: step,
            status: MessageStatus::Success,
            message,
            text: None,
            files: vec![],
            reasoning: None,
            reasoning_details: vec![],
            sources: vec![],
            tool: false,
            embedding: None,
            embedding_model: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    fn assistant_tool_call(id: &str) -> CoreMessage {
        CoreMessage::Assistant {
            content: crate::message::MessageContent::Parts(vec![
                crate::message::ContentPart::ToolCall {
                    tool_call_id: id.to_string(),
                    tool_name: "t".into(),
                    args: serde_json::Value::Null,
                },
            ]),
        }
    }

    fn tool_result(id: &str) -> CoreMessage {
        CoreMessage::Tool {
            content: vec![ToolResultPart {
                tool_call_id: id.to_string(),
                tool_name: "t".into(),
                result: serde_json::Value::Null,
            }],
        }
    }

    #[test]
    fn orphaned_tool_message_is_dropped() {
        let docs = vec![
            doc(0, 0, assistant_tool_call("A")),
            doc(0, 1, tool_result("A")),
            doc(0, 2, tool_result("B")),
        ];
        let filtered = filter_orphaned_tool_messages(docs);
        assert_eq!(filtered.len(), 2);
        assert!(matches!(filtered[1].message, CoreMessage::Tool { .. }));
        assert_eq!(filtered[1].message.tool_result_ids(), vec!["A"]);
    }

    #[test]
    fn merge_search_options_drops_without_limit() {
        let call_site = SearchOptions {
            text_search: Some(true),
            ..Default::default()
        };
        assert!(merge_search_options(Some(&call_site), None).is_none());

        let agent_default = SearchOptions {
            limit: Some(10),
            ..Default::default()
        };
        let merged = merge_search_options(Some(&call_site), Some(&agent_default)).unwrap();
        assert_eq!(merged.limit, Some(10));
        assert_eq!(merged.text_search, Some(true));
    }

    #[tokio::test]
    async fn missing_user_and_thread_id_is_invalid_argument() {
        let opts = ContextOptions::default();
        let result = fetch_context(
            &crate::storage::testing::InMemoryStorage::new(),
            None,
            FetchContextArgs {
                user_id: None,
                thread_id: None,
                messages: &[],
                up_to_and_including_message_id: None,
                context_options: &opts,
                host_ctx: HostCtx::ReadOnly,
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
