//! Apply context and callback traits
//!
//! These traits let the engine report progress and ask for confirmation
//! without depending on a particular terminal UI.

use crate::model::Address;
use crate::planner::PlanAction;
use crate::types::ActionResult;
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for apply runs
///
/// Called on the coordinating thread only, so implementations need not be `Sync`.
pub trait ProgressCallback: Send {
    /// Called once with the number of actions the run will resolve
    fn on_batch_start(&mut self, count: usize);

    /// Called when an action is handed to a worker
    fn on_resource_start(&mut self, action: &PlanAction);

    /// Called when an action reaches a terminal state (including cascaded skips)
    fn on_resource_complete(&mut self, address: &Address, result: &ActionResult);

    /// Called when the run is over
    fn on_batch_complete(&mut self);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _count: usize) {}
    fn on_resource_start(&mut self, _action: &PlanAction) {}
    fn on_resource_complete(&mut self, _address: &Address, _result: &ActionResult) {}
    fn on_batch_complete(&mut self) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Shared flag that stops an apply run from dispatching new work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_fixed_confirmations() {
        assert!(AutoConfirm.confirm("remove?").unwrap());
        assert!(!AutoDecline.confirm("remove?").unwrap());
    }
}
