//! Lock manager: exclusive ownership of state while a mutation is in flight.
//!
//! A lock is a record created through the backend's conditional create. The
//! returned [`LockGuard`] deletes the record when released or dropped, and
//! only if the record still carries the guard's token.

use crate::backend::Backend;
use crate::error::{ConvergeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Who holds the state lock and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub lock_id: Uuid,
    pub holder: String,
    pub operation: String,
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(holder: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            lock_id: Uuid::new_v4(),
            holder: holder.into(),
            operation: operation.into(),
            acquired_at: Utc::now(),
        }
    }

    /// Error reported to a second acquirer
    pub fn conflict(&self) -> ConvergeError {
        ConvergeError::LockConflict {
            lock_id: self.lock_id,
            holder: self.holder.clone(),
            operation: self.operation.clone(),
            acquired_at: self.acquired_at,
        }
    }
}

/// `user@host` of the current process, from the environment
pub fn default_holder() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string());
    format!("{user}@{host}")
}

/// Acquires and breaks state locks on one backend
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn Backend>,
}

impl LockManager {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Take the lock or fail with [`ConvergeError::LockConflict`] naming the holder.
    ///
    /// Backends without locking hand out a guard that does nothing.
    pub fn acquire(&self, holder: &str, operation: &str) -> Result<LockGuard> {
        if !self.backend.supports_locking() {
            log::debug!("Backend {} has no locking, skipping lock", self.backend.name());
            return Ok(LockGuard {
                backend: Arc::clone(&self.backend),
                info: None,
            });
        }

        let info = LockInfo::new(holder, operation);
        self.backend.lock(&info)?;
        log::debug!("Acquired state lock {} for {} ({})", info.lock_id, holder, operation);

        Ok(LockGuard {
            backend: Arc::clone(&self.backend),
            info: Some(info),
        })
    }

    /// Delete the lock regardless of who holds it.
    ///
    /// `lock_id` only has to name the lock for the log; a mismatch or an
    /// unreadable lock record is removed all the same. Returns `false` when
    /// there was no lock to delete.
    pub fn force_unlock(&self, lock_id: Uuid) -> Result<bool> {
        match self.backend.current_lock() {
            Ok(None) => return Ok(false),
            Ok(Some(current)) => {
                if current.lock_id != lock_id {
                    log::warn!(
                        "Requested lock {} but the current lock is {}; removing it anyway",
                        lock_id,
                        current.lock_id
                    );
                }
                log::warn!(
                    "Force-unlocking state held by {} since {} ({}); a live holder may still be writing",
                    current.holder,
                    current.acquired_at,
                    current.operation
                );
            }
            Err(e) => log::warn!("Lock record is unreadable ({e}); removing it"),
        }
        self.backend.force_unlock()
    }

    /// The lock currently held, if any
    pub fn current(&self) -> Result<Option<LockInfo>> {
        self.backend.current_lock()
    }
}

/// Proof of lock ownership. Releases the lock when dropped.
pub struct LockGuard {
    backend: Arc<dyn Backend>,
    info: Option<LockInfo>,
}

impl LockGuard {
    /// Lock details, `None` for backends without locking
    pub fn info(&self) -> Option<&LockInfo> {
        self.info.as_ref()
    }

    /// Release now and report storage errors instead of logging them
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        let Some(info) = self.info.take() else {
            return Ok(());
        };
        if self.backend.unlock(info.lock_id)? {
            log::debug!("Released state lock {}", info.lock_id);
        } else {
            log::warn!(
                "State lock {} was no longer ours at release; leaving the current lock alone",
                info.lock_id
            );
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            log::warn!("Failed to release state lock: {e}");
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("backend", &self.backend.name())
            .field("info", &self.info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, MemoryBackend};

    fn memory() -> LockManager {
        LockManager::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_lock_round_trip() {
        let locks = memory();
        let guard = locks.acquire("alice@dev", "apply").unwrap();
        let held = guard.info().unwrap().clone();

        let err = locks.acquire("bob@ci", "mark").unwrap_err();
        match err {
            ConvergeError::LockConflict {
                lock_id,
                holder,
                operation,
                acquired_at,
            } => {
                assert_eq!(lock_id, held.lock_id);
                assert_eq!(holder, "alice@dev");
                assert_eq!(operation, "apply");
                assert_eq!(acquired_at, held.acquired_at);
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }

        guard.release().unwrap();
        let second = locks.acquire("bob@ci", "mark").unwrap();
        assert_eq!(second.info().unwrap().holder, "bob@ci");
    }

    #[test]
    fn test_drop_releases_lock() {
        let locks = memory();
        {
            let _guard = locks.acquire("alice@dev", "apply").unwrap();
            assert!(locks.current().unwrap().is_some());
        }
        assert!(locks.current().unwrap().is_none());
    }

    #[test]
    fn test_panic_while_holding_releases_lock() {
        let locks = memory();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = locks.acquire("alice@dev", "apply").unwrap();
            panic!("collaborator bug");
        }));
        assert!(result.is_err());
        assert!(locks.current().unwrap().is_none());
    }

    #[test]
    fn test_release_after_force_unlock_leaves_new_lock_alone() {
        let locks = memory();
        let first = locks.acquire("alice@dev", "apply").unwrap();
        let first_id = first.info().unwrap().lock_id;

        assert!(locks.force_unlock(first_id).unwrap());
        let second = locks.acquire("bob@ci", "apply").unwrap();

        // token mismatch: the stale guard must not delete bob's lock
        first.release().unwrap();
        let current = locks.current().unwrap().unwrap();
        assert_eq!(current.lock_id, second.info().unwrap().lock_id);
    }

    #[test]
    fn test_force_unlock_without_lock() {
        let locks = memory();
        assert!(!locks.force_unlock(Uuid::new_v4()).unwrap());
    }

    #[test]
    fn test_force_unlock_mismatched_id_still_removes() {
        let locks = memory();
        let guard = locks.acquire("alice@dev", "apply").unwrap();
        assert!(locks.force_unlock(Uuid::new_v4()).unwrap());
        assert!(locks.current().unwrap().is_none());
        drop(guard);
    }

    #[test]
    fn test_force_unlock_recovers_truncated_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"), true);
        // holder died between creating the file and writing it
        std::fs::write(backend.lock_path(), "").unwrap();
        let locks = LockManager::new(Arc::new(backend.clone()));

        assert!(matches!(
            locks.acquire("bob@ci", "apply"),
            Err(ConvergeError::Backend { message }) if message.contains("force-unlock")
        ));
        assert!(locks.force_unlock(Uuid::new_v4()).unwrap());
        assert!(!backend.lock_path().exists());
        assert!(locks.acquire("bob@ci", "apply").is_ok());
    }

    #[test]
    fn test_non_locking_backend_gives_noop_guard() {
        let locks = LockManager::new(Arc::new(MemoryBackend::without_locking()));
        let a = locks.acquire("alice@dev", "apply").unwrap();
        let b = locks.acquire("bob@ci", "apply").unwrap();
        assert!(a.info().is_none());
        assert!(b.info().is_none());
    }

    #[test]
    fn test_file_lock_conflict_across_managers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let one = LockManager::new(Arc::new(FileBackend::new(&path, true)));
        let two = LockManager::new(Arc::new(FileBackend::new(&path, true)));

        let guard = one.acquire("alice@dev", "apply").unwrap();
        assert!(matches!(
            two.acquire("bob@ci", "apply"),
            Err(ConvergeError::LockConflict { .. })
        ));
        drop(guard);
        assert!(two.acquire("bob@ci", "apply").is_ok());
    }

    #[test]
    fn test_default_holder_shape() {
        assert!(default_holder().contains('@'));
    }
}
