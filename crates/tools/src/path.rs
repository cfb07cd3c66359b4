//! Path validation: confine file tools to the configured roots.

use std::path::{Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path traversal detected in '{path}'")]
    PathTraversal { path: String },

    #[error("Failed to resolve path '{path}': {reason}")]
    ResolveFailed { path: String, reason: String },
}

/// Validate that a path is safe to access and return its resolved form.
///
/// Rejects `..` components outright, resolves symlinks when the path exists,
/// and checks the result against `allowed_roots` (empty = allow all).
pub fn validate_path(path: &str, allowed_roots: &[String]) -> Result<PathBuf, PathValidationError> {
    let expanded = expand_tilde(path);
    let input_path = Path::new(&expanded);

    if input_path
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(PathValidationError::PathTraversal { path: path.into() });
    }

    let resolved = if input_path.exists() {
        input_path
            .canonicalize()
            .map_err(|e| PathValidationError::ResolveFailed {
                path: path.into(),
                reason: e.to_string(),
            })?
    } else {
        input_path.to_path_buf()
    };

    if !allowed_roots.is_empty() {
        let is_allowed = allowed_roots.iter().any(|root| {
            let root = PathBuf::from(expand_tilde(root));
            let root = root.canonicalize().unwrap_or(root);
            resolved.starts_with(&root)
        });

        if !is_allowed {
            return Err(PathValidationError::OutsideAllowedRoots { path: path.into() });
        }
    }

    Ok(resolved)
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if (path.starts_with("~/") || path == "~")
        && let Some(home) = home_dir()
    {
        return path.replacen('~', &home, 1);
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}
