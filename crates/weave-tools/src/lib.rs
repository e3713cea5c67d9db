//! Example tool implementations for `weave-core` agents.
//!
//! Tools are organized by category:
//! - brave: Brave Search API client
//! - web_search: web search tool using Brave, bindable as a `weave_core`
//!   [`weave_core::tools::PlainTool`]
//! - filesystem: sandboxed file read/write/list, bindable the same way

pub mod brave;
pub mod filesystem;
pub mod web_search;

pub use brave::{BraveClient, SearchOptions, SearchResponse};
pub use filesystem::FilesystemTool;
pub use web_search::WebSearch;

/// Tool execution result
#[derive(Debug)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}
