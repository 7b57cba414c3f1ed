//! Shared execution state
//!
//! The blackboard every node reads from and the engine writes to.
//! Keys are globally unique within one run; a later write fully
//! replaces the previous value. Persistence lives in [`session`].

pub mod session;

pub use session::{session_store_from_env, InMemorySessionStore, PostgresSessionStore, SessionStore};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::sync::Arc;

/// Run-scoped key/value state shared between pipeline nodes.
///
/// Insertion order is preserved, so iterating keys reflects the order in
/// which the pipeline produced them. Reads of a key that was never written
/// return `None`, not an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    values: Map<String, Value>,
}

impl SharedState {
    pub fn new() -> Self {
        Self { values: Map::new() }
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Write a value, fully replacing any previous value under the key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }

    /// Take an immutable snapshot to hand to a unit.
    pub fn snapshot(&self) -> SharedStateView {
        SharedStateView {
            inner: Arc::new(self.clone()),
        }
    }

    /// SHA256 over the serialized state, streamed into the hasher.
    pub fn integrity_hash(&self) -> String {
        let mut hasher = Sha256::new();

        if serde_json::to_writer(&mut HashWriter(&mut hasher), &self.values).is_err() {
            return String::new();
        }

        hex::encode(hasher.finalize())
    }
}

/// Read-only view of [`SharedState`] scoped to one unit invocation.
///
/// Units receive a view, never the state itself; all writes flow back
/// through the owning composer.
#[derive(Debug, Clone)]
pub struct SharedStateView {
    inner: Arc<SharedState>,
}

impl SharedStateView {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.keys()
    }

    /// Collect the values of the given keys, skipping absent ones.
    pub fn project(&self, keys: &[String]) -> Map<String, Value> {
        let mut out = Map::new();
        for key in keys {
            if let Some(value) = self.inner.get(key) {
                out.insert(key.clone(), value.clone());
            }
        }
        out
    }
}

impl From<SharedState> for SharedStateView {
    fn from(state: SharedState) -> Self {
        Self {
            inner: Arc::new(state),
        }
    }
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_replaces_previous_value() {
        let mut state = SharedState::new();
        state.set("market_data_result", json!({"price": 100.0}));
        state.set("market_data_result", json!({"price": 200.0}));

        assert_eq!(state.len(), 1);
        assert_eq!(
            state.get("market_data_result"),
            Some(&json!({"price": 200.0}))
        );
    }

    #[test]
    fn test_absent_key_reads_none() {
        let state = SharedState::new();
        assert!(state.get("never_written").is_none());
        assert!(!state.contains("never_written"));
    }

    #[test]
    fn test_keys_preserve_write_order() {
        let mut state = SharedState::new();
        state.set("b", json!(1));
        state.set("a", json!(2));
        state.set("c", json!(3));

        let keys: Vec<&str> = state.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_view_is_isolated_from_later_writes() {
        let mut state = SharedState::new();
        state.set("counter", json!(1));

        let view = state.snapshot();
        state.set("counter", json!(2));

        assert_eq!(view.get("counter"), Some(&json!(1)));
        assert_eq!(state.get("counter"), Some(&json!(2)));
    }

    #[test]
    fn test_integrity_hash_changes_with_content() {
        let mut a = SharedState::new();
        a.set("k", json!("v"));
        let mut b = SharedState::new();
        b.set("k", json!("w"));

        assert_ne!(a.integrity_hash(), b.integrity_hash());
        assert_eq!(a.integrity_hash(), a.clone().integrity_hash());
    }

    #[test]
    fn test_project_skips_absent_keys() {
        let mut state = SharedState::new();
        state.set("present", json!(true));

        let view = state.snapshot();
        let projected = view.project(&["present".to_string(), "absent".to_string()]);

        assert_eq!(projected.len(), 1);
        assert_eq!(projected.get("present"), Some(&json!(true)));
    }
}
