// Document store boundary
//
// The API layer never talks to a concrete database. Everything it needs from
// persistence fits in the `DocumentStore` trait below: JSON documents keyed
// by a string `_id`, equality selectors with dotted paths, and four update
// shapes. `memory::MemoryStore` is the reference implementation used by the
// demo server and the integration tests.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;

/// Equality selector over documents. Keys may be dotted paths
/// (`services.resume.loginTokens.hashedToken`); a path segment that lands on
/// an array matches when any element matches the remainder.
pub type Selector = Map<String, Value>;

/// The update shapes the API layer issues.
#[derive(Debug, Clone)]
pub enum UpdateDoc {
    /// Replace every field except `_id`.
    Replace(Map<String, Value>),
    /// Set the given fields; keys may be dotted paths.
    Set(Map<String, Value>),
    /// Append a value to the array at the dotted path, creating it if absent.
    Push { path: String, value: Value },
    /// Remove array elements whose fields all equal the given values.
    Pull { path: String, matching: Map<String, Value> },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// Narrow persistence interface consumed by the API layer.
///
/// Implementations own their atomicity and isolation guarantees; the API
/// layer adds no locking around document mutations.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, assigning an `_id` if absent. Returns the id.
    async fn insert(&self, collection: &str, document: Value) -> Result<String, StoreError>;

    /// All documents matching the selector.
    async fn find(&self, collection: &str, selector: &Selector) -> Result<Vec<Value>, StoreError>;

    /// First document matching the selector.
    async fn find_one(&self, collection: &str, selector: &Selector) -> Result<Option<Value>, StoreError>;

    /// Apply the update to the first matching document. Returns the number of
    /// documents updated (0 or 1).
    async fn update(&self, collection: &str, selector: &Selector, update: &UpdateDoc) -> Result<u64, StoreError>;

    /// Remove every matching document. Returns the number removed.
    async fn remove(&self, collection: &str, selector: &Selector) -> Result<u64, StoreError>;
}

/// A named collection bound to a store. Cheap to clone; endpoint actions
/// capture one of these per resource.
#[derive(Clone)]
pub struct Collection {
    store: Arc<dyn DocumentStore>,
    name: String,
}

impl Collection {
    pub fn new(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self { store, name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn insert(&self, document: Value) -> Result<String, StoreError> {
        self.store.insert(&self.name, document).await
    }

    pub async fn find(&self, selector: &Selector) -> Result<Vec<Value>, StoreError> {
        self.store.find(&self.name, selector).await
    }

    pub async fn find_one(&self, selector: &Selector) -> Result<Option<Value>, StoreError> {
        self.store.find_one(&self.name, selector).await
    }

    pub async fn update(&self, selector: &Selector, update: &UpdateDoc) -> Result<u64, StoreError> {
        self.store.update(&self.name, selector, update).await
    }

    pub async fn remove(&self, selector: &Selector) -> Result<u64, StoreError> {
        self.store.remove(&self.name, selector).await
    }
}

/// Selector targeting a single document by id.
pub fn by_id(id: impl Into<String>) -> Selector {
    let mut selector = Selector::new();
    selector.insert("_id".to_string(), Value::String(id.into()));
    selector
}
