//! Error taxonomy for the orchestration core.
//!
//! Five families, matching the call-site visible behavior: arguments the
//! caller got wrong are rejected before any persistence happens; provider
//! and storage failures that occur *after* a prompt was saved trigger a
//! rollback (see `agent.rs`) and are then surfaced here unchanged.

use thiserror::Error;

/// Errors raised by the LLM / embedding provider boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned an unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("provider call was cancelled")]
    Cancelled,
}

/// Errors raised by the storage backend boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("message {0} not found")]
    MessageNotFound(uuid::Uuid),
    #[error("thread {0} not found")]
    ThreadNotFound(uuid::Uuid),
}

/// Top-level error type returned by every public operation in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Conflicting or missing call-site arguments: `prompt`/`messages`
    /// both given, neither `userId` nor `threadId`, unknown embedding
    /// dimension, ... Always surfaces before any persistence happens.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `searchOtherThreads` requested without an action-scope `HostCtx`.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A ctx-accepting tool was invoked without an injected `ToolCtx`.
    #[error("misuse: {0}")]
    Misuse(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, Error>;
