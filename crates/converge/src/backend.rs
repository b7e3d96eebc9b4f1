//! State storage backends.
//!
//! A backend stores one state document and, optionally, one lock record.
//! Writes are optimistic: the stored serial must be exactly one behind the
//! incoming state, otherwise the write is refused with a stale-write error.

use crate::error::{ConvergeError, Result};
use crate::lock::LockInfo;
use crate::model::State;
use crate::spec::{BackendConfig, BackendKind};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Storage for state and its lock
pub trait Backend: Send + Sync {
    /// Short name for logs ("local", "memory")
    fn name(&self) -> &'static str;

    /// Stored state, or an empty state at serial 0 when nothing is stored
    fn read(&self) -> Result<State>;

    /// Store `state` if the stored serial is `state.serial - 1`
    fn write(&self, state: &State) -> Result<()>;

    fn exists(&self) -> bool;

    fn supports_locking(&self) -> bool {
        false
    }

    /// Conditionally create the lock record
    fn lock(&self, _info: &LockInfo) -> Result<()> {
        Ok(())
    }

    /// Delete the lock record if it carries `lock_id`; returns whether it did
    fn unlock(&self, _lock_id: Uuid) -> Result<bool> {
        Ok(false)
    }

    /// Delete whatever lock record exists; returns whether there was one
    fn force_unlock(&self) -> Result<bool> {
        Ok(false)
    }

    fn current_lock(&self) -> Result<Option<LockInfo>> {
        Ok(None)
    }
}

fn check_serial(stored: &State, incoming: &State) -> Result<()> {
    let expected = incoming.serial.saturating_sub(1);
    if stored.serial + 1 == incoming.serial {
        Ok(())
    } else {
        Err(ConvergeError::StaleWrite {
            expected,
            found: stored.serial,
        })
    }
}

/// Open the backend a spec asks for. `default_path` is used when the spec
/// names no state path; relative paths resolve against `base`.
pub fn from_config(config: &BackendConfig, base: &Path, default_path: &Path) -> Arc<dyn Backend> {
    match config.kind {
        BackendKind::Memory => {
            if config.lock {
                Arc::new(MemoryBackend::new())
            } else {
                Arc::new(MemoryBackend::without_locking())
            }
        }
        BackendKind::Local => {
            let path = config
                .path
                .as_deref()
                .map_or_else(|| default_path.to_path_buf(), |p| base.join(p));
            Arc::new(FileBackend::new(path, config.lock))
        }
    }
}

// ============================================================================
// FileBackend
// ============================================================================

/// JSON state file with an optional sibling `.lock` file
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    lock_path: PathBuf,
    locking: bool,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, locking: bool) -> Self {
        let path = path.into();
        let mut lock_name = path.as_os_str().to_os_string();
        lock_name.push(".lock");
        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            locking,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Write via a `.tmp` sibling and rename over the target
    fn atomic_write(&self, data: &[u8]) -> Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir).map_err(|e| {
                ConvergeError::backend(format!("cannot create {}: {e}", dir.display()))
            })?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .map_err(|e| ConvergeError::backend(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            ConvergeError::backend(format!("cannot replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }

    fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        match std::fs::read_to_string(&self.lock_path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConvergeError::backend(format!(
                "cannot read {}: {e}",
                self.lock_path.display()
            ))),
        }
    }

    fn remove_lock_file(&self) -> Result<bool> {
        match std::fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ConvergeError::backend(format!(
                "cannot remove {}: {e}",
                self.lock_path.display()
            ))),
        }
    }
}

impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn read(&self) -> Result<State> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ConvergeError::backend(format!("cannot parse {}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(State::new()),
            Err(e) => Err(ConvergeError::backend(format!(
                "cannot read {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn write(&self, state: &State) -> Result<()> {
        check_serial(&self.read()?, state)?;
        let json = serde_json::to_string_pretty(state)?;
        self.atomic_write(json.as_bytes())?;
        log::debug!("Wrote state serial {} to {}", state.serial, self.path.display());
        Ok(())
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn supports_locking(&self) -> bool {
        self.locking
    }

    fn lock(&self, info: &LockInfo) -> Result<()> {
        let json = serde_json::to_string_pretty(info)?;
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(json.as_bytes()).and_then(|()| file.sync_all()) {
                    drop(file);
                    // never leave an empty lock behind
                    let _ = std::fs::remove_file(&self.lock_path);
                    return Err(ConvergeError::backend(format!(
                        "cannot write {}: {e}",
                        self.lock_path.display()
                    )));
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.read_lock_file() {
                Ok(Some(existing)) => Err(existing.conflict()),
                Ok(None) => Err(ConvergeError::backend(format!(
                    "lock file {} vanished while locking, try again",
                    self.lock_path.display()
                ))),
                Err(err) => Err(ConvergeError::backend(format!(
                    "lock file {} is unreadable ({err}); run force-unlock if its holder is gone",
                    self.lock_path.display()
                ))),
            },
            Err(e) => Err(ConvergeError::backend(format!(
                "cannot create {}: {e}",
                self.lock_path.display()
            ))),
        }
    }

    fn unlock(&self, lock_id: Uuid) -> Result<bool> {
        match self.read_lock_file()? {
            Some(existing) if existing.lock_id == lock_id => self.remove_lock_file(),
            _ => Ok(false),
        }
    }

    fn force_unlock(&self) -> Result<bool> {
        self.remove_lock_file()
    }

    fn current_lock(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file()
    }
}

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-process backend, mostly for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<Option<State>>,
    lock: Mutex<Option<LockInfo>>,
    no_locking: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_locking() -> Self {
        Self {
            no_locking: true,
            ..Self::default()
        }
    }

    /// Backend pre-loaded with `state`, stored as-is
    pub fn with_state(state: State) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn read(&self) -> Result<State> {
        let stored = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stored.clone().unwrap_or_default())
    }

    fn write(&self, state: &State) -> Result<()> {
        let mut stored = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = stored.clone().unwrap_or_default();
        check_serial(&current, state)?;
        *stored = Some(state.clone());
        Ok(())
    }

    fn exists(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn supports_locking(&self) -> bool {
        !self.no_locking
    }

    fn lock(&self, info: &LockInfo) -> Result<()> {
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = lock.as_ref() {
            return Err(existing.conflict());
        }
        *lock = Some(info.clone());
        Ok(())
    }

    fn unlock(&self, lock_id: Uuid) -> Result<bool> {
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *lock = None;
            return Ok(true);
        }
        Ok(false)
    }

    fn force_unlock(&self) -> Result<bool> {
        let mut lock = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(lock.take().is_some())
    }

    fn current_lock(&self) -> Result<Option<LockInfo>> {
        Ok(self
            .lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(state: &State) -> State {
        let mut s = state.clone();
        s.serial += 1;
        s
    }

    #[test]
    fn test_file_backend_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"), false);
        assert!(!backend.exists());
        let state = backend.read().unwrap();
        assert_eq!(state.serial, 0);
        assert!(state.is_empty());
    }

    #[test]
    fn test_file_backend_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("nested/state.json"), false);

        let first = next(&State::new());
        backend.write(&first).unwrap();
        assert!(backend.exists());
        assert_eq!(backend.read().unwrap(), first);
        assert!(!dir.path().join("nested/state.tmp").exists());
    }

    #[test]
    fn test_stale_write_leaves_file_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state.json"), false);
        let first = next(&State::new());
        backend.write(&first).unwrap();

        // another writer built on serial 0 as well
        let err = backend.write(&first).unwrap_err();
        assert!(matches!(
            err,
            ConvergeError::StaleWrite {
                expected: 0,
                found: 1
            }
        ));
        assert_eq!(backend.read().unwrap(), first);
    }

    #[test]
    fn test_memory_backend_serial_check() {
        let backend = MemoryBackend::new();
        let one = next(&State::new());
        backend.write(&one).unwrap();
        backend.write(&next(&one)).unwrap();
        assert_eq!(backend.read().unwrap().serial, 2);
        assert!(backend.write(&one).is_err());
    }

    #[test]
    fn test_lock_path_sits_next_to_state() {
        let backend = FileBackend::new("/tmp/x/state.json", true);
        assert_eq!(backend.lock_path(), Path::new("/tmp/x/state.json.lock"));
    }

    #[test]
    fn test_from_config_resolves_relative_path() {
        let config = BackendConfig {
            kind: BackendKind::Local,
            path: Some(PathBuf::from("custom.json")),
            lock: false,
        };
        let backend = from_config(&config, Path::new("/proj"), Path::new("/proj/default.json"));
        assert_eq!(backend.name(), "local");
        assert!(!backend.supports_locking());
    }
}
