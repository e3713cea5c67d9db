//! Filesystem access, sandboxed under a configured workspace root.
//!
//! Lets an agent read, write, and list files without reaching outside
//! its own workspace directory.

use crate::ToolResult;
use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use weave_core::tools::{PlainTool, ToolError};

/// Read the contents of a file
pub async fn read_file(path: &Path) -> ToolResult {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => ToolResult::success(contents),
        Err(e) => ToolResult::error(format!("Failed to read file: {}", e)),
    }
}

/// Write contents to a file
pub async fn write_file(path: &Path, contents: &str) -> ToolResult {
    match tokio::fs::write(path, contents).await {
        Ok(()) => ToolResult::success(format!("Wrote {} bytes to {}", contents.len(), path.display())),
        Err(e) => ToolResult::error(format!("Failed to write file: {}", e)),
    }
}

/// List contents of a directory
pub async fn list_directory(path: &Path) -> ToolResult {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => {
            let mut items = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name().to_string_lossy().to_string();
                let file_type = entry.file_type().await.ok();
                let type_str = match file_type {
                    Some(ft) if ft.is_dir() => "dir",
                    Some(ft) if ft.is_file() => "file",
                    Some(ft) if ft.is_symlink() => "link",
                    _ => "unknown",
                };
                items.push(format!("{} ({})", name, type_str));
            }
            ToolResult::success(items.join("\n"))
        }
        Err(e) => ToolResult::error(format!("Failed to list directory: {}", e)),
    }
}

/// Binds `read_file`/`write_file`/`list_directory` behind a single
/// [`PlainTool`], dispatching on an `{"operation": ..., "path": ...}`
/// argument and rejecting any path that escapes `root`.
pub struct FilesystemTool {
    root: PathBuf,
}

impl FilesystemTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let candidate = self.root.join(relative);
        let canonical_root = std::fs::canonicalize(&self.root)
            .map_err(|e| ToolError::Failed(format!("workspace root unavailable: {e}")))?;
        // `canonicalize` requires the path to exist, which is too strict
        // for a not-yet-written file; fall back to the parent directory.
        let canonical = std::fs::canonicalize(&candidate).or_else(|_| {
            candidate
                .parent()
                .map(std::fs::canonicalize)
                .transpose()
                .map(|p| p.unwrap_or_else(|| candidate.clone()))
        });
        let canonical = canonical
            .map_err(|e| ToolError::InvalidArgs(format!("invalid path {relative}: {e}")))?;
        if !canonical.starts_with(&canonical_root) {
            return Err(ToolError::InvalidArgs(format!(
                "path {relative} escapes the workspace root"
            )));
        }
        Ok(candidate)
    }
}

#[async_trait]
impl PlainTool for FilesystemTool {
    fn name(&self) -> &str {
        "filesystem"
    }

    fn description(&self) -> &str {
        "Read, write, and list files within the agent's workspace directory."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "operation": {"type": "string", "enum": ["read", "write", "list"]},
                "path": {"type": "string"},
                "contents": {"type": "string"}
            },
            "required": ["operation", "path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let operation = args
            .get("operation")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing `operation`".into()))?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing `path`".into()))?;
        let resolved = self.resolve(path)?;

        let result = match operation {
            "read" => read_file(&resolved).await,
            "write" => {
                let contents = args
                    .get("contents")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ToolError::InvalidArgs("missing `contents`".into()))?;
                write_file(&resolved, contents).await
            }
            "list" => list_directory(&resolved).await,
            other => return Err(ToolError::InvalidArgs(format!("unknown operation: {other}"))),
        };

        if result.success {
            Ok(serde_json::json!({ "output": result.output }))
        } else {
            Err(ToolError::Failed(result.error.unwrap_or_default()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_list_directory() {
        let result = list_directory(&PathBuf::from(".")).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn rejects_escaping_path() {
        let dir = tempdir();
        let tool = FilesystemTool::new(&dir);
        let err = tool
            .execute(serde_json::json!({"operation": "read", "path": "../../etc/passwd"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn round_trips_a_file_within_the_root() {
        let dir = tempdir();
        let tool = FilesystemTool::new(&dir);
        tool.execute(serde_json::json!({"operation": "write", "path": "note.txt", "contents": "hi"}))
            .await
            .unwrap();
        let read = tool
            .execute(serde_json::json!({"operation": "read", "path": "note.txt"}))
            .await
            .unwrap();
        assert_eq!(read["output"], "hi");
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("weave-tools-test-{:?}", std::thread::current().id()));
        let _ = std::fs::create_dir_all(&dir);
        dir
    }
}
