//! Read file tool: read a text file inside the allowed roots.

use async_trait::async_trait;
use tracing::debug;
use weft_core::{Tool, ToolError, ToolOutput};

use crate::path::validate_path;

/// Files larger than this are truncated.
const DEFAULT_MAX_BYTES: usize = 256 * 1024;

pub struct ReadFileTool {
    /// Allowed root directories. Empty = allow all.
    pub allowed_roots: Vec<String>,
    pub max_bytes: usize,
}

impl ReadFileTool {
    /// Create a read tool with no path restrictions.
    pub fn new() -> Self {
        Self::with_roots(Vec::new())
    }

    pub fn with_roots(allowed_roots: Vec<String>) -> Self {
        Self {
            allowed_roots,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl Default for ReadFileTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
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
            tool_name: "read_file".into(),
            reason: e.to_string(),
        })?;

        debug!(path = %resolved.display(), "Reading file");

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(ToolOutput {
                    success: false,
                    output: format!("Failed to read file: {e}"),
                    data: None,
                });
            }
        };

        let total = bytes.len();
        let truncated = total > self.max_bytes;
        let mut output = String::from_utf8_lossy(&bytes[..total.min(self.max_bytes)]).into_owned();
        if truncated {
            output.push_str(&format!("\n[truncated: showing {} of {total} bytes]", self.max_bytes));
        }

        Ok(ToolOutput {
            success: true,
            output,
            data: Some(serde_json::json!({
                "path": resolved.to_string_lossy(),
                "bytes": total,
                "truncated": truncated,
            })),
        })
    }
}
