pub mod apply;
pub mod init;
pub mod mark;
pub mod plan;
pub mod refresh;
pub mod state;
pub mod unlock;
pub mod validate;

use anyhow::{Context as AnyhowContext, Result};
use converge::backend::{self, Backend, FileBackend};
use converge::{Address, LockGuard, LockManager, Spec, StateCommitter};
use std::path::PathBuf;
use std::sync::Arc;

use crate::Context;
use crate::paths;

/// A loaded spec and the state backend it points at
pub struct Project {
    pub spec_path: PathBuf,
    pub spec: Spec,
    /// Directory resource files are relative to
    pub root: PathBuf,
    pub backend: Arc<dyn Backend>,
}

impl Project {
    pub fn load(ctx: &Context) -> Result<Self> {
        let spec_path = paths::spec_path(ctx.spec.as_deref());
        let spec = Spec::load(&spec_path)?;
        let root = paths::project_root(&spec_path);
        let backend = open_backend(ctx, &spec, &root);
        log::debug!(
            "Loaded {} resources from {} ({} backend)",
            spec.len(),
            spec_path.display(),
            backend.name()
        );
        Ok(Self {
            spec_path,
            spec,
            root,
            backend,
        })
    }

    /// Take the state lock for `operation`
    pub fn lock(&self, operation: &str) -> Result<LockGuard> {
        let locks = LockManager::new(Arc::clone(&self.backend));
        Ok(locks.acquire(&converge::default_holder(), operation)?)
    }

    pub fn committer(&self) -> Result<StateCommitter> {
        Ok(StateCommitter::open(Arc::clone(&self.backend))?)
    }
}

/// State backend for commands that work without a spec
pub fn state_backend(ctx: &Context) -> Arc<dyn Backend> {
    let spec_path = paths::spec_path(ctx.spec.as_deref());
    match Spec::load(&spec_path) {
        Ok(spec) => open_backend(ctx, &spec, &paths::project_root(&spec_path)),
        Err(e) => {
            log::debug!("No usable spec, using the default state file: {e}");
            Arc::new(FileBackend::new(paths::state_path(ctx.state.as_deref()), true))
        }
    }
}

fn open_backend(ctx: &Context, spec: &Spec, root: &std::path::Path) -> Arc<dyn Backend> {
    let state_path = paths::state_path(ctx.state.as_deref());
    match &spec.backend {
        Some(config) => backend::from_config(config, root, &state_path),
        None => Arc::new(FileBackend::new(state_path, true)),
    }
}

pub fn parse_address(input: &str) -> Result<Address> {
    input
        .parse()
        .with_context(|| format!("Invalid resource address '{input}' (expected kind.name)"))
}
