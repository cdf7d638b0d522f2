//! Per-identifier mutual exclusion for context provisioning and teardown

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Registry of per-environment locks.
///
/// Two holders of the same registry can never build or destroy the same
/// identifier's context at the same time. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct ContextLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

/// Held for the lifetime of a scoped environment.
#[derive(Debug)]
pub struct ContextGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl ContextGuard {
    /// Identifier this guard protects.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ContextLocks {
    /// Create an empty, independent registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by every provisioner built with defaults.
    pub fn global() -> Self {
        static GLOBAL: OnceLock<ContextLocks> = OnceLock::new();
        GLOBAL.get_or_init(ContextLocks::new).clone()
    }

    /// Wait until `name` is free and take it.
    pub async fn acquire(&self, name: &str) -> ContextGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(map.entry(name.to_string()).or_default())
        };

        if lock.try_lock().is_err() {
            debug!(env = %name, "Waiting for environment context lock");
        }

        ContextGuard {
            name: name.to_string(),
            _guard: lock.lock_owned().await,
        }
    }
}
