//! Diesel + pgvector reference implementation of `StorageBackend`.
//!
//! A single `PgConnection` behind a `std::sync::Mutex`, Diesel's query
//! builder for CRUD, no connection pool — `r2d2` pooling is a known
//! limitation noted in DESIGN.md, not silently upgraded.
//!
//! Diesel's query builder is synchronous, and this module does not wrap
//! calls in `spawn_blocking`. Each `async fn` below briefly blocks the
//! calling executor thread while holding the connection lock — acceptable
//! at single-digit concurrent calls per thread, flagged rather than
//! hidden.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use pgvector::{Vector, VectorExpressionMethods};
use uuid::Uuid;

use crate::error::StorageError;
use crate::message::{deserialize_message, serialize_message};
use crate::schema::{messages, threads};

use super::models::*;
use super::{CreateThreadArgs, StorageBackend};

fn status_to_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "pending",
        MessageStatus::Success => "success",
        MessageStatus::Failed => "failed",
    }
}

fn str_to_status(s: &str) -> Result<MessageStatus, StorageError> {
    match s {
        "pending" => Ok(MessageStatus::Pending),
        "success" => Ok(MessageStatus::Success),
        "failed" => Ok(MessageStatus::Failed),
        other => Err(StorageError::Backend(format!("unknown message status: {other}"))),
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = threads)]
struct ThreadRow {
    id: Uuid,
    user_id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ThreadRow> for ThreadDoc {
    fn from(row: ThreadRow) -> Self {
        ThreadDoc {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            summary: row.summary,
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = threads)]
struct NewThreadRow {
    id: Uuid,
    user_id: Option<String>,
    title: Option<String>,
    summary: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = messages)]
struct MessageRow {
    id: Uuid,
    thread_id: Uuid,
    user_id: Option<String>,
    agent_name: Option<String>,
    order_: i64,
    step_order: i64,
    status: String,
    message: serde_json::Value,
    text: Option<String>,
    files: serde_json::Value,
    reasoning: Option<String>,
    reasoning_details: serde_json::Value,
    sources: serde_json::Value,
    tool: bool,
    embedding: Option<Vector>,
    embedding_model: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl MessageRow {
    fn into_doc(self) -> Result<MessageDoc, StorageError> {
        let message = deserialize_message(&self.message)
            .map_err(|e| StorageError::Backend(format!("corrupt message row {}: {e}", self.id)))?;
        Ok(MessageDoc {
            id: self.id,
            thread_id: self.thread_id,
            user_id: self.user_id,
            agent_name: self.agent_name,
            order: self.order_,
            step_order: self.step_order,
            status: str_to_status(&self.status)?,
            message,
            text: self.text,
            files: self.files.as_array().cloned().unwrap_or_default(),
            reasoning: self.reasoning,
            reasoning_details: self.reasoning_details.as_array().cloned().unwrap_or_default(),
            sources: self.sources.as_array().cloned().unwrap_or_default(),
            tool: self.tool,
            embedding: self.embedding.map(|v| v.to_vec()),
            embedding_model: self.embedding_model,
            error: self.error,
            created_at: self.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessageRow {
    id: Uuid,
    thread_id: Uuid,
    user_id: Option<String>,
    agent_name: Option<String>,
    order_: i64,
    step_order: i64,
    status: String,
    message: serde_json::Value,
    text: Option<String>,
    files: serde_json::Value,
    reasoning: Option<String>,
    reasoning_details: serde_json::Value,
    sources: serde_json::Value,
    tool: bool,
    embedding: Option<Vector>,
    embedding_model: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

fn new_message_row(
    thread_id: Uuid,
    default_user_id: &Option<String>,
    default_agent_name: &Option<String>,
    order: i64,
    step_order: i64,
    pending: bool,
    nm: NewMessage,
    embedding: Option<Vec<f32>>,
    embedding_model: Option<String>,
) -> NewMessageRow {
    NewMessageRow {
        id: Uuid::new_v4(),
        thread_id,
        user_id: nm.user_id.or_else(|| default_user_id.clone()),
        agent_name: nm.agent_name.or_else(|| default_agent_name.clone()),
        order_: order,
        step_order,
        status: status_to_str(if pending {
            MessageStatus::Pending
        } else {
            MessageStatus::Success
        })
        .to_string(),
        message: serialize_message(&nm.message),
        text: nm.text,
        files: serde_json::Value::Array(nm.files),
        reasoning: nm.reasoning,
        reasoning_details: serde_json::Value::Array(nm.reasoning_details),
        sources: serde_json::Value::Array(nm.sources),
        tool: nm.tool,
        embedding: embedding.map(Vector::from),
        embedding_model,
        error: None,
        created_at: Utc::now(),
    }
}

/// Reference `StorageBackend`: one `PgConnection` behind a mutex, no pool.
pub struct PgStorage {
    conn: Mutex<PgConnection>,
}

impl PgStorage {
    pub fn new(database_url: &str) -> Result<Self, StorageError> {
        let conn = PgConnection::establish(database_url)
            .map_err(|e| StorageError::Backend(format!("connection failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PgConnection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend("connection lock poisoned".into()))
    }

    fn max_order(&self, conn: &mut PgConnection, tid: Uuid) -> Result<i64, StorageError> {
        let max: Option<i64> = messages::table
            .filter(messages::thread_id.eq(tid))
            .select(diesel::dsl::max(messages::order_))
            .first(conn)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }

    fn max_step_order(
        &self,
        conn: &mut PgConnection,
        tid: Uuid,
        order: i64,
    ) -> Result<i64, StorageError> {
        let max: Option<i64> = messages::table
            .filter(messages::thread_id.eq(tid))
            .filter(messages::order_.eq(order))
            .select(diesel::dsl::max(messages::step_order))
            .first(conn)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(max.map(|m| m + 1).unwrap_or(0))
    }
}

#[async_trait]
impl StorageBackend for PgStorage {
    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadDoc, StorageError> {
        let mut conn = self.lock()?;
        let row = NewThreadRow {
            id: Uuid::new_v4(),
            user_id: args.user_id,
            title: args.title,
            summary: args.summary,
            created_at: Utc::now(),
        };
        let inserted: ThreadRow = diesel::insert_into(threads::table)
            .values(&row)
            .returning(ThreadRow::as_returning())
            .get_result(&mut *conn)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(inserted.into())
    }

    async fn list_messages_by_thread_id(
        &self,
        args: ListMessagesArgs,
    ) -> Result<MessagesPage, StorageError> {
        let mut conn = self.lock()?;

        let statuses: Vec<String> = args.statuses.iter().copied().map(status_to_str).map(String::from).collect();

        let mut query = messages::table
            .filter(messages::thread_id.eq(args.thread_id))
            .filter(messages::status.eq_any(statuses))
            .into_boxed();

        if args.exclude_tool_messages {
            query = query.filter(messages::tool.eq(false));
        }

        if let Some(cutoff_id) = args.up_to_and_including_message_id {
            let cutoff: Option<(i64, i64)> = messages::table
                .filter(messages::id.eq(cutoff_id))
                .select((messages::order_, messages::step_order))
                .first(&mut *conn)
                .optional()
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            if let Some((cutoff_order, cutoff_step)) = cutoff {
                query = query.filter(
                    messages::order_
                        .lt(cutoff_order)
                        .or(messages::order_.eq(cutoff_order).and(messages::step_order.le(cutoff_step))),
                );
            }
        }

        let rows: Vec<MessageRow> = match args.order {
            SortOrder::Asc => query
                .order((messages::order_.asc(), messages::step_order.asc()))
                .limit(args.limit as i64 + 1)
                .select(MessageRow::as_select())
                .load(&mut *conn),
            SortOrder::Desc => query
                .order((messages::order_.desc(), messages::step_order.desc()))
                .limit(args.limit as i64 + 1)
                .select(MessageRow::as_select())
                .load(&mut *conn),
        }
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let is_done = rows.len() <= args.limit;
        let mut docs: Vec<MessageDoc> = Vec::with_capacity(args.limit);
        for row in rows.into_iter().take(args.limit) {
            docs.push(row.into_doc()?);
        }

        Ok(MessagesPage { page: docs, is_done })
    }

    async fn search_messages(
        &self,
        args: SearchMessagesArgs,
    ) -> Result<Vec<MessageDoc>, StorageError> {
        let mut conn = self.lock()?;

        let thread_ids: Vec<Uuid> = if args.search_other_threads {
            if let Some(user_id) = &args.user_id {
                threads::table
                    .filter(threads::user_id.eq(user_id))
                    .select(threads::id)
                    .load(&mut *conn)
                    .map_err(|e| StorageError::Backend(e.to_string()))?
            } else {
                args.thread_id.into_iter().collect()
            }
        } else {
            args.thread_id.into_iter().collect()
        };

        if thread_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = messages::table
            .filter(messages::thread_id.eq_any(&thread_ids))
            .filter(messages::status.eq(status_to_str(MessageStatus::Success)))
            .filter(messages::tool.eq(false))
            .into_boxed();

        if args.text_search && !args.text.is_empty() {
            let mut clause = messages::text.ilike(format!("%{}%", args.text[0]));
            for t in &args.text[1..] {
                clause = clause.or(messages::text.ilike(format!("%{t}%")));
            }
            query = query.filter(clause);
        }

        let hits: Vec<MessageRow> = if args.vector_search {
            if let Some(vector) = args.vector.clone() {
                query
                    .filter(messages::embedding.is_not_null())
                    .order(messages::embedding.cosine_distance(Vector::from(vector)))
                    .limit(args.limit as i64)
                    .select(MessageRow::as_select())
                    .load(&mut *conn)
            } else {
                query
                    .order(messages::created_at.desc())
                    .limit(args.limit as i64)
                    .select(MessageRow::as_select())
                    .load(&mut *conn)
            }
        } else {
            query
                .order(messages::created_at.desc())
                .limit(args.limit as i64)
                .select(MessageRow::as_select())
                .load(&mut *conn)
        }
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for hit in hits {
            let idx_order = hit.order_;
            let thread_id = hit.thread_id;
            let before = args.message_range.before as i64;
            let after = args.message_range.after as i64;

            let window: Vec<MessageRow> = messages::table
                .filter(messages::thread_id.eq(thread_id))
                .filter(messages::order_.ge(idx_order - before))
                .filter(messages::order_.le(idx_order + after))
                .order((messages::order_.asc(), messages::step_order.asc()))
                .select(MessageRow::as_select())
                .load(&mut *conn)
                .map_err(|e| StorageError::Backend(e.to_string()))?;

            for row in window {
                if seen.insert(row.id) {
                    out.push(row.into_doc()?);
                }
            }
        }

        Ok(out)
    }

    async fn add_messages(
        &self,
        args: AddMessagesArgs,
    ) -> Result<AddMessagesResult, StorageError> {
        let mut conn = self.lock()?;

        conn.transaction(|conn| {
            if args.fail_pending_steps {
                diesel::update(
                    messages::table
                        .filter(messages::thread_id.eq(args.thread_id))
                        .filter(messages::status.eq(status_to_str(MessageStatus::Pending))),
                )
                .set((
                    messages::status.eq(status_to_str(MessageStatus::Failed)),
                    messages::error.eq(Some("superseded by a new pending prompt".to_string())),
                ))
                .execute(conn)?;
            }

            let (order, mut step_order) = if let Some(prompt_id) = args.prompt_message_id {
                let prompt_order: i64 = messages::table
                    .filter(messages::id.eq(prompt_id))
                    .select(messages::order_)
                    .first(conn)?;
                let step_order = self.max_step_order(conn, args.thread_id, prompt_order)?;
                (prompt_order, step_order)
            } else {
                let order = self.max_order(conn, args.thread_id)?;
                (order, 0)
            };

            let mut message_ids = Vec::with_capacity(args.messages.len());
            let mut last_message_id = Uuid::nil();

            for (i, nm) in args.messages.into_iter().enumerate() {
                let embedding = args
                    .embeddings
                    .as_ref()
                    .and_then(|e| e.vectors.get(i).cloned().flatten());
                let embedding_model = args.embeddings.as_ref().map(|e| e.model.clone());

                let row = new_message_row(
                    args.thread_id,
                    &args.user_id,
                    &args.agent_name,
                    order,
                    step_order,
                    args.pending,
                    nm,
                    embedding,
                    embedding_model,
                );
                let inserted: Uuid = diesel::insert_into(messages::table)
                    .values(&row)
                    .returning(messages::id)
                    .get_result(conn)?;
                message_ids.push(inserted);
                last_message_id = inserted;
                step_order += 1;
            }

            Ok(AddMessagesResult {
                last_message_id,
                message_ids,
            })
        })
        .map_err(|e: diesel::result::Error| StorageError::Backend(e.to_string()))
    }

    async fn add_step(&self, args: AddStepArgs) -> Result<(), StorageError> {
        let mut conn = self.lock()?;

        conn.transaction(|conn| {
            let order: i64 = messages::table
                .filter(messages::id.eq(args.prompt_message_id))
                .select(messages::order_)
                .first(conn)?;
            let mut step_order = self.max_step_order(conn, args.thread_id, order)?;

            for (i, nm) in args.record.new_messages.into_iter().enumerate() {
                let embedding = args
                    .record
                    .embeddings
                    .as_ref()
                    .and_then(|e| e.vectors.get(i).cloned().flatten());
                let embedding_model = args.record.embeddings.as_ref().map(|e| e.model.clone());

                let row = new_message_row(
                    args.thread_id,
                    &args.user_id,
                    &None,
                    order,
                    step_order,
                    false,
                    nm,
                    embedding,
                    embedding_model,
                );
                diesel::insert_into(messages::table).values(&row).execute(conn)?;
                step_order += 1;
            }

            Ok(())
        })
        .map_err(|e: diesel::result::Error| StorageError::Backend(e.to_string()))
    }

    async fn commit_message(&self, message_id: Uuid) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let affected = diesel::update(messages::table.filter(messages::id.eq(message_id)))
            .set(messages::status.eq(status_to_str(MessageStatus::Success)))
            .execute(&mut *conn)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if affected == 0 {
            return Err(StorageError::MessageNotFound(message_id));
        }
        Ok(())
    }

    async fn rollback_message(&self, message_id: Uuid, error: String) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let affected = diesel::update(messages::table.filter(messages::id.eq(message_id)))
            .set((
                messages::status.eq(status_to_str(MessageStatus::Failed)),
                messages::error.eq(Some(error)),
            ))
            .execute(&mut *conn)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        if affected == 0 {
            return Err(StorageError::MessageNotFound(message_id));
        }
        Ok(())
    }

    async fn get_message(&self, message_id: Uuid) -> Result<Option<MessageDoc>, StorageError> {
        let mut conn = self.lock()?;
        let row: Option<MessageRow> = messages::table
            .filter(messages::id.eq(message_id))
            .select(MessageRow::as_select())
            .first(&mut *conn)
            .optional()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        row.map(|r| r.into_doc()).transpose()
    }
}
