//! Local key-value configuration store.
//!
//! Keys are dotted paths into a TOML document (`pacman.tags` is the `tags`
//! key of the `[pacman]` table).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub trait ConfigStore: Send + Sync {
    /// Current value of `key`, or `None` when unset.
    fn get(&self, key: &str) -> Option<String>;
}

/// Store backed by a TOML file that is re-read on every lookup.
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlFileStore {
    fn get(&self, key: &str) -> Option<String> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Config store unreadable");
                return None;
            }
        };
        let doc: toml::Table = match content.parse() {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Config store is not valid TOML");
                return None;
            }
        };
        lookup(&doc, key)
    }
}

fn lookup(doc: &toml::Table, key: &str) -> Option<String> {
    let mut parts = key.split('.');
    let mut value = doc.get(parts.next()?)?;
    for part in parts {
        value = value.as_table()?.get(part)?;
    }
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Table(_) | toml::Value::Array(_) => None,
        other => Some(other.to_string()),
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value.into());
        }
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }
}
