//! List directory tool: show the entries of a directory.

use async_trait::async_trait;
use tracing::debug;
use weft_core::{Tool, ToolError, ToolOutput};

use crate::path::validate_path;

const MAX_ENTRIES: usize = 500;

pub struct ListDirectoryTool {
    /// Allowed root directories. Empty = allow all.
    pub allowed_roots: Vec<String>,
}

impl ListDirectoryTool {
    pub fn new() -> Self {
        Self::with_roots(Vec::new())
    }

    pub fn with_roots(allowed_roots: Vec<String>) -> Self {
        Self { allowed_roots }
    }
}

impl Default for ListDirectoryTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the files and subdirectories of a directory. Directories end with '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to list"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let resolved = validate_path(path, &self.allowed_roots).map_err(|e| ToolError::PermissionDenied {
            tool_name: "list_directory".into(),
            reason: e.to_string(),
        })?;

        debug!(path = %resolved.display(), "Listing directory");

        let mut reader = match tokio::fs::read_dir(&resolved).await {
            Ok(reader) => reader,
            Err(e) => {
                return Ok(ToolOutput {
                    success: false,
                    output: format!("Failed to list directory: {e}"),
                    data: None,
                });
            }
        };

        let mut entries = Vec::new();
        loop {
            match reader.next_entry().await {
                Ok(Some(entry)) => {
                    let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if is_dir {
                        name.push('/');
                    }
                    entries.push(name);
                }
                Ok(None) => break,
                Err(e) => {
                    return Err(ToolError::ExecutionFailed {
                        tool_name: "list_directory".into(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        entries.sort();

        let total = entries.len();
        let shown = &entries[..total.min(MAX_ENTRIES)];
        let mut output = if shown.is_empty() {
            "(empty directory)".to_string()
        } else {
            shown.join("\n")
        };
        if total > MAX_ENTRIES {
            output.push_str(&format!("\n[{} more entries not shown]", total - MAX_ENTRIES));
        }

        Ok(ToolOutput {
            success: true,
            output,
            data: Some(serde_json::json!({ "entries": shown, "total": total })),
        })
    }
}
