//! Approval policy and the optional permission gate in front of tool execution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::tool::ToolCallDescriptor;

/// Whether tool calls run without asking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// Every call must pass the permission provider (default)
    #[default]
    Confirm,
    /// Execute everything without asking
    AutoApprove,
}

/// Answer from a [`PermissionProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    Allow,
    Deny { reason: String },
}

/// Gate consulted before a call executes when the effective mode is
/// [`ApprovalMode::Confirm`].
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn check(&self, call: &ToolCallDescriptor) -> PermissionDecision;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_defaults_to_confirm() {
        assert_eq!(ApprovalMode::default(), ApprovalMode::Confirm);
    }

    #[test]
    fn approval_mode_snake_case() {
        let json = serde_json::to_string(&ApprovalMode::AutoApprove).unwrap();
        assert_eq!(json, r#""auto_approve""#);
    }
}
