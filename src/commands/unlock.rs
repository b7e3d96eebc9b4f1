use anyhow::{Context as AnyhowContext, Result};
use converge::{ExitStatus, LockManager};
use uuid::Uuid;

use super::state_backend;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, lock_id: &str) -> Result<ExitStatus> {
    let lock_id = Uuid::parse_str(lock_id.trim())
        .with_context(|| format!("Invalid lock ID '{lock_id}'"))?;
    let locks = LockManager::new(state_backend(ctx));

    if locks.force_unlock(lock_id)? {
        ui::success(&format!("Released state lock {lock_id}"));
        Ok(ExitStatus::Success)
    } else {
        ui::info("State is not locked");
        Ok(ExitStatus::ExecutionError)
    }
}
