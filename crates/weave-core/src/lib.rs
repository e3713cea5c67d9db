//! An agent orchestration core: durable conversational threads over a
//! generic LLM provider, with retrieval-augmented context and tool-use
//! loops.
//!
//! - [`message`] — the wire/storage message shape.
//! - [`embedding`] — the embedding-alignment invariant.
//! - [`context`] — recent-history + hybrid search retrieval.
//! - [`persistence`] — the four message-persistence operations.
//! - [`tools`] — tool binding and ctx injection.
//! - [`agent`] — the per-call orchestration pipeline.
//! - [`thread`] — a thread-bound facade over an agent.
//! - [`actions`] — host-framework action/mutation adapters.

pub mod actions;
pub mod agent;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod host_ctx;
pub mod message;
pub mod persistence;
pub mod provider;
pub mod schema;
pub mod storage;
pub mod thread;
pub mod tools;

pub use agent::{Agent, AgentObjectResult, AgentTextResult, CallArgs, StorageOptions, UsageHandler};
pub use config::Config;
pub use context::ContextOptions;
pub use error::{Error, ProviderError, Result, StorageError};
pub use host_ctx::HostCtx;
pub use message::CoreMessage;
pub use thread::Thread;
