//! Execution backends and their registry.
//!
//! A backend performs the real-world action for an item (send, post, record).
//! Backends are registered per item type. Hook descriptors in a directory of
//! `*.toml` files declare external commands:
//!
//! ```toml
//! [backend]
//! name = "send_email"
//! item_type = "email"
//! command = "hooks/send_email.sh"
//! timeout_secs = 60
//! ```

pub mod command;

pub use command::CommandBackend;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::model::{ItemType, WorkItem};

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Perform the action. `Ok` carries optional result data; any error
    /// sends the item to the error queue.
    async fn execute(&self, item: &WorkItem) -> Result<Option<serde_json::Value>>;
}

/// Top-level TOML wrapper.
#[derive(Debug, Deserialize)]
struct BackendConfig {
    backend: HookDescriptor,
}

/// An external hook bound to one item type.
#[derive(Debug, Clone, Deserialize)]
pub struct HookDescriptor {
    pub name: String,
    pub item_type: ItemType,
    pub command: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

/// Registry of backends, indexed by item type.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<ItemType, Arc<dyn ExecutionBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry with no backends.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, item_type: ItemType, backend: Arc<dyn ExecutionBackend>) {
        self.backends.insert(item_type, backend);
    }

    /// Load all `.toml` hook descriptors from a directory.
    pub fn load_from_dir(dir: &Path, token: Option<SecretString>) -> Result<Self> {
        let mut registry = Self::empty();

        let entries = std::fs::read_dir(dir).map_err(|e| {
            Error::Config(format!("cannot read hooks dir {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                let content = std::fs::read_to_string(&path)?;
                let config: BackendConfig = toml::from_str(&content).map_err(|e| {
                    Error::Config(format!("bad hook descriptor {}: {e}", path.display()))
                })?;
                let hook = config.backend;
                if let Some(existing) = registry.get(hook.item_type) {
                    return Err(Error::Config(format!(
                        "{} and {} both handle {}",
                        existing.name(),
                        hook.name,
                        hook.item_type
                    )));
                }
                info!(backend = %hook.name, item_type = %hook.item_type, "backend registered");
                let item_type = hook.item_type;
                registry.register(item_type, Arc::new(CommandBackend::new(hook, token.clone())));
            }
        }

        Ok(registry)
    }

    /// Look up the backend for an item type.
    pub fn get(&self, item_type: ItemType) -> Option<&Arc<dyn ExecutionBackend>> {
        self.backends.get(&item_type)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
