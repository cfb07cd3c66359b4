//! Built-in tools for Weft.
//!
//! Two read-only filesystem tools, enough to exercise tool calling end to
//! end. Both are confined to the configured `allowed_roots`.

pub mod list_directory;
pub mod path;
pub mod read_file;

use weft_core::ToolRegistry;

pub use list_directory::ListDirectoryTool;
pub use read_file::ReadFileTool;

/// Create a registry with all built-in tools.
pub fn default_registry(allowed_roots: &[String]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ListDirectoryTool::with_roots(allowed_roots.to_vec())));
    registry.register(Box::new(ReadFileTool::with_roots(allowed_roots.to_vec())));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_both_tools() {
        let registry = default_registry(&[]);
        assert_eq!(registry.names(), vec!["list_directory", "read_file"]);
    }
}
