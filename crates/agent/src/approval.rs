//! Shared approval setting with scoped overrides.
//!
//! A host may expose one approval mode to several observers (a settings
//! toggle, a status line). An invocation that carries its own mode installs
//! it for its duration through [`ApprovalCell::scoped_override`]; the guard
//! restores the previous value when dropped, whether the run completed,
//! failed, or was cancelled. Overrides are serialized: a second override
//! waits until the first guard is gone.

use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use weft_core::ApprovalMode;

#[derive(Debug)]
pub struct ApprovalCell {
    mode: Mutex<ApprovalMode>,
    owner: Arc<tokio::sync::Mutex<()>>,
}

impl ApprovalCell {
    pub fn new(mode: ApprovalMode) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            owner: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub fn get(&self) -> ApprovalMode {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the mode outright. An active override will still restore
    /// its own saved value when it ends.
    pub fn set(&self, mode: ApprovalMode) {
        *self.mode.lock().unwrap_or_else(|e| e.into_inner()) = mode;
    }

    /// Install `mode` until the returned guard is dropped.
    pub async fn scoped_override(self: &Arc<Self>, mode: ApprovalMode) -> ApprovalOverride {
        let owner = self.owner.clone().lock_owned().await;
        let previous = {
            let mut current = self.mode.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, mode)
        };
        debug!(?previous, ?mode, "Approval override installed");
        ApprovalOverride {
            cell: Arc::clone(self),
            previous,
            _owner: owner,
        }
    }
}

/// Restores the previous approval mode on drop.
#[derive(Debug)]
pub struct ApprovalOverride {
    cell: Arc<ApprovalCell>,
    previous: ApprovalMode,
    _owner: OwnedMutexGuard<()>,
}

impl ApprovalOverride {
    pub fn previous(&self) -> ApprovalMode {
        self.previous
    }
}

impl Drop for ApprovalOverride {
    fn drop(&mut self) {
        // Restore before `_owner` is released so the next override sees it.
        self.cell.set(self.previous);
        debug!(restored = ?self.previous, "Approval override released");
    }
}
