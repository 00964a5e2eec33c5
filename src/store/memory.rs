// In-memory document store
//
// Reference `DocumentStore` implementation backed by a `RwLock`ed map of
// collections. Used by the demo server and the integration tests; production
// deployments plug in their own store behind the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{DocumentStore, Selector, StoreError, UpdateDoc};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_err() -> StoreError {
        StoreError::Backend("collection lock poisoned".to_string())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, document: Value) -> Result<String, StoreError> {
        let Value::Object(mut doc) = document else {
            return Err(StoreError::InvalidDocument("document must be a JSON object".to_string()));
        };

        let id = match doc.get("_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                doc.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let mut collections = self.collections.write().map_err(|_| Self::lock_err())?;
        collections.entry(collection.to_string()).or_default().push(Value::Object(doc));
        Ok(id)
    }

    async fn find(&self, collection: &str, selector: &Selector) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().map_err(|_| Self::lock_err())?;
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or_default();
        Ok(docs.iter().filter(|doc| matches(doc, selector)).cloned().collect())
    }

    async fn find_one(&self, collection: &str, selector: &Selector) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.read().map_err(|_| Self::lock_err())?;
        let docs = collections.get(collection).map(Vec::as_slice).unwrap_or_default();
        Ok(docs.iter().find(|doc| matches(doc, selector)).cloned())
    }

    async fn update(&self, collection: &str, selector: &Selector, update: &UpdateDoc) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::lock_err())?;
        let docs = match collections.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(0),
        };

        let Some(doc) = docs.iter_mut().find(|doc| matches(doc, selector)) else {
            return Ok(0);
        };

        apply_update(doc, update);
        Ok(1)
    }

    async fn remove(&self, collection: &str, selector: &Selector) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().map_err(|_| Self::lock_err())?;
        let docs = match collections.get_mut(collection) {
            Some(docs) => docs,
            None => return Ok(0),
        };

        let before = docs.len();
        docs.retain(|doc| !matches(doc, selector));
        Ok((before - docs.len()) as u64)
    }
}

/// Whether a document satisfies every selector field.
fn matches(doc: &Value, selector: &Selector) -> bool {
    selector.iter().all(|(path, expected)| path_matches(doc, path, expected))
}

/// Resolve a dotted path against a node. Arrays match when any element
/// matches the remaining path; a terminal array matches on containment.
fn path_matches(node: &Value, path: &str, expected: &Value) -> bool {
    if let Value::Array(items) = node {
        return items.iter().any(|item| path_matches(item, path, expected));
    }

    match path.split_once('.') {
        Some((head, rest)) => match node.get(head) {
            Some(child) => path_matches(child, rest, expected),
            None => false,
        },
        None => match node.get(path) {
            Some(Value::Array(items)) => items.iter().any(|item| item == expected),
            Some(value) => value == expected,
            None => false,
        },
    }
}

fn apply_update(doc: &mut Value, update: &UpdateDoc) {
    match update {
        UpdateDoc::Replace(fields) => {
            let id = doc.get("_id").cloned();
            let mut replacement = fields.clone();
            if let Some(id) = id {
                replacement.insert("_id".to_string(), id);
            }
            *doc = Value::Object(replacement);
        }
        UpdateDoc::Set(fields) => {
            for (path, value) in fields {
                set_path(doc, path, value.clone());
            }
        }
        UpdateDoc::Push { path, value } => {
            let target = resolve_path_mut(doc, path);
            match target {
                Value::Array(items) => items.push(value.clone()),
                other => *other = Value::Array(vec![value.clone()]),
            }
        }
        UpdateDoc::Pull { path, matching } => {
            if let Value::Array(items) = resolve_path_mut(doc, path) {
                items.retain(|item| {
                    !matching.iter().all(|(field, expected)| item.get(field) == Some(expected))
                });
            }
        }
    }
}

/// Set a (possibly dotted) path, creating intermediate objects.
fn set_path(doc: &mut Value, path: &str, value: Value) {
    *resolve_path_mut(doc, path) = value;
}

/// Navigate to the node at a dotted path, creating empty objects along the
/// way. Non-object intermediates are overwritten.
fn resolve_path_mut<'a>(doc: &'a mut Value, path: &str) -> &'a mut Value {
    let mut node = doc;
    for segment in path.split('.') {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else {
            unreachable!("node was just made an object");
        };
        node = map.entry(segment.to_string()).or_insert(Value::Null);
    }
    node
}
