//! Process-local session store.

use dashmap::DashMap;
use serde_json::Value;

use super::{SessionStore, SessionStoreError};

/// In-memory [`SessionStore`]; state is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    values: DashMap<String, Value>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get_bool(&self, key: &str) -> bool {
        self.values
            .get(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<(), SessionStoreError> {
        self.values.insert(key.to_string(), Value::Bool(value));
        Ok(())
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|value| value.as_str().map(str::to_string))
    }

    fn put_string(&self, key: &str, value: &str) -> Result<(), SessionStoreError> {
        self.values
            .insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SessionStoreError> {
        self.values.remove(key);
        Ok(())
    }
}
