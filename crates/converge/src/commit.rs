//! State committer: applies mutations with monotonic serials

use crate::backend::Backend;
use crate::error::{ConvergeError, Result};
use crate::lock::LockGuard;
use crate::model::{Mutation, State};
use chrono::Utc;
use std::sync::Arc;

/// Writes mutations back to a backend, one serial per mutation.
///
/// The committer remembers the serial it last read or wrote. A commit finding
/// a different stored serial means someone else wrote in between; it fails
/// with [`ConvergeError::StaleWrite`] and leaves storage untouched.
pub struct StateCommitter {
    backend: Arc<dyn Backend>,
    state: State,
}

impl StateCommitter {
    /// Read current state and start tracking its serial
    pub fn open(backend: Arc<dyn Backend>) -> Result<Self> {
        let state = backend.read()?;
        log::debug!(
            "Loaded state serial {} ({} resources) from {} backend",
            state.serial,
            state.len(),
            backend.name()
        );
        Ok(Self { backend, state })
    }

    /// State as of the last read or commit
    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn serial(&self) -> u64 {
        self.state.serial
    }

    /// Re-read storage, accepting whatever serial is there now
    pub fn reload(&mut self) -> Result<&State> {
        self.state = self.backend.read()?;
        Ok(&self.state)
    }

    /// Apply one mutation and persist it at `serial + 1`.
    ///
    /// The guard is a witness that the caller holds the state lock for the
    /// duration of the commit.
    pub fn commit(&mut self, _guard: &LockGuard, mutation: &Mutation) -> Result<&State> {
        let stored = self.backend.read()?;
        if stored.serial != self.state.serial {
            return Err(ConvergeError::StaleWrite {
                expected: self.state.serial,
                found: stored.serial,
            });
        }

        let now = Utc::now();
        let mut next = stored;
        next.apply(mutation, now)?;
        next.serial += 1;
        next.last_updated = Some(now);

        self.backend.write(&next)?;
        log::info!(
            "Committed {} {} (serial {})",
            mutation.operation(),
            mutation.address(),
            next.serial
        );
        self.state = next;
        Ok(&self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FileBackend, MemoryBackend};
    use crate::lock::LockManager;
    use crate::model::{Address, Status};

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    #[test]
    fn test_serial_increments_once_per_commit() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let locks = LockManager::new(Arc::clone(&backend));
        let guard = locks.acquire("alice@dev", "apply").unwrap();
        let mut committer = StateCommitter::open(Arc::clone(&backend)).unwrap();
        assert_eq!(committer.serial(), 0);

        committer
            .commit(&guard, &Mutation::created(addr("feature.a"), vec![]))
            .unwrap();
        assert_eq!(committer.serial(), 1);

        committer
            .commit(
                &guard,
                &Mutation::MarkPartial {
                    address: addr("feature.b"),
                    reason: "half done".into(),
                },
            )
            .unwrap();
        let stored = backend.read().unwrap();
        assert_eq!(stored.serial, 2);
        assert_eq!(stored.status_of(&addr("feature.b")), Some(Status::Partial));
        assert!(stored.last_updated.is_some());
    }

    #[test]
    fn test_stale_committer_fails_and_leaves_storage_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> =
            Arc::new(FileBackend::new(dir.path().join("state.json"), false));
        let guard = LockManager::new(Arc::clone(&backend))
            .acquire("alice@dev", "apply")
            .unwrap();

        let mut first = StateCommitter::open(Arc::clone(&backend)).unwrap();
        let mut second = StateCommitter::open(Arc::clone(&backend)).unwrap();

        first
            .commit(&guard, &Mutation::created(addr("feature.a"), vec![]))
            .unwrap();
        let before = backend.read().unwrap();

        let err = second
            .commit(&guard, &Mutation::created(addr("feature.b"), vec![]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::StaleWrite {
                expected: 0,
                found: 1
            }
        ));
        assert_eq!(backend.read().unwrap(), before);

        // reload and retry succeeds on top of the other writer
        second.reload().unwrap();
        second
            .commit(&guard, &Mutation::created(addr("feature.b"), vec![]))
            .unwrap();
        let after = backend.read().unwrap();
        assert_eq!(after.serial, 2);
        assert_eq!(after.len(), 2);
    }

    #[test]
    fn test_failed_mutation_does_not_bump_serial() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let guard = LockManager::new(Arc::clone(&backend))
            .acquire("alice@dev", "rm")
            .unwrap();
        let mut committer = StateCommitter::open(Arc::clone(&backend)).unwrap();

        let err = committer
            .commit(
                &guard,
                &Mutation::Remove {
                    address: addr("feature.ghost"),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ConvergeError::UnknownResource { .. }));
        assert_eq!(committer.serial(), 0);
        assert!(!backend.exists());
    }
}
