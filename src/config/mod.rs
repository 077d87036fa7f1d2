pub mod session_config;

use std::sync::{Arc, PoisonError, RwLock};

use crate::config::session_config::SessionConfig;

/// Live settings shared between the display layer and the core.
///
/// The core reads `current()` at every decision point, so edits take effect
/// immediately without restarting anything.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<SessionConfig>>,
}

impl SharedConfig {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// A copy of the current settings
    pub fn current(&self) -> SessionConfig {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut SessionConfig)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut guard);
    }
}
