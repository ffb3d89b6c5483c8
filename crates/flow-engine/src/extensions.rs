//! Typed extension map for non-serializable dependency injection.
//!
//! `ContextExtensions` lets hosts hand runtime objects (API clients,
//! database handles, channels) to leaf nodes. The map is set on the
//! [`Executor`](crate::execute::Executor) and every nested execution sees
//! the same entries through `ctx.extensions()`.
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::ContextExtensions;
//!
//! let mut ext = ContextExtensions::new();
//! ext.set("http", MyClient::new());
//!
//! // Inside a node:
//! if let Some(client) = ctx.extensions().get::<MyClient>("http") {
//!     client.send(..);
//! }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Typed extension map shared by an execution tree.
///
/// Values are held behind `Arc` so the map is cheap to clone into nested
/// executions.
#[derive(Clone, Default)]
pub struct ContextExtensions {
    inner: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ContextExtensions {
    /// Create an empty extension map.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Insert a typed value under the given key, replacing any previous one.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.inner.insert(key.to_string(), Arc::new(value));
    }

    /// Builder form of [`set`](Self::set)
    pub fn with<T: Send + Sync + 'static>(mut self, key: &str, value: T) -> Self {
        self.set(key, value);
        self
    }

    /// Get a typed value by key.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.inner
            .get(key)
            .and_then(|v| v.clone().downcast::<T>().ok())
    }

    /// Check whether a key exists in the map.
    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for ContextExtensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.inner.keys().collect();
        keys.sort();
        f.debug_struct("ContextExtensions")
            .field("keys", &keys)
            .finish()
    }
}
