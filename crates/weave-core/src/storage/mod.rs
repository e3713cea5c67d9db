//! Storage backend contract and implementations.
//!
//! `StorageBackend` is the only mutable shared resource in this crate's
//! concurrency model: every operation below must be a single mutation
//! from the host's perspective, leaving the thread in a legal state even
//! on partial failure.

pub mod models;
pub mod postgres;
pub mod testing;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StorageError;
use models::*;

/// `{userId?, title?, summary?}` for `threads.createThread`.
#[derive(Debug, Clone, Default)]
pub struct CreateThreadArgs {
    pub user_id: Option<String>,
    pub title: Option<String>,
    pub summary: Option<String>,
}

/// The storage contract, independent of physical layout.
/// `postgres::PgStorage` is the reference implementation (Diesel +
/// pgvector); `testing::InMemoryStorage` is a deterministic double used by
/// this crate's own tests and available to downstream integration tests.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn create_thread(&self, args: CreateThreadArgs) -> Result<ThreadDoc, StorageError>;

    async fn list_messages_by_thread_id(
        &self,
        args: ListMessagesArgs,
    ) -> Result<MessagesPage, StorageError>;

    async fn search_messages(
        &self,
        args: SearchMessagesArgs,
    ) -> Result<Vec<MessageDoc>, StorageError>;

    async fn add_messages(
        &self,
        args: AddMessagesArgs,
    ) -> Result<AddMessagesResult, StorageError>;

    async fn add_step(&self, args: AddStepArgs) -> Result<(), StorageError>;

    async fn commit_message(&self, message_id: Uuid) -> Result<(), StorageError>;

    async fn rollback_message(&self, message_id: Uuid, error: String) -> Result<(), StorageError>;

    /// Resolves a single doc by id (e.g. `upToAndIncludingMessageId`).
    /// Reference backends implement it as a point lookup against the
    /// same table `list_messages_by_thread_id` reads.
    async fn get_message(&self, message_id: Uuid) -> Result<Option<MessageDoc>, StorageError>;
}
