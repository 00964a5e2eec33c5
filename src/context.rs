use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use axum::http::{HeaderMap, Method};
use serde_json::{Map, Value};

/// Per-request state handed to the dispatch pipeline and the endpoint action.
///
/// Built fresh for every request and dropped when the response is sent. The
/// pipeline fills in the authenticated user after a successful auth check;
/// actions may attach a user themselves (the login flow does) and may mark
/// the response as manually completed via [`RequestContext::done`].
pub struct RequestContext {
    pub method: Method,
    /// The registered route path this request matched.
    pub path: String,
    pub headers: HeaderMap,
    pub url_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body_params: Map<String, Value>,
    /// Path, query and body parameters merged into one map. Path values are
    /// merged first, so query and body values win on key conflicts.
    pub params: Map<String, Value>,
    user: RwLock<Option<(Value, String)>>,
    done: AtomicBool,
}

impl RequestContext {
    pub fn new(
        method: Method,
        path: String,
        headers: HeaderMap,
        url_params: HashMap<String, String>,
        query_params: HashMap<String, String>,
        body_params: Map<String, Value>,
    ) -> Self {
        Self {
            method,
            path,
            headers,
            url_params,
            query_params,
            body_params,
            params: Map::new(),
            user: RwLock::new(None),
            done: AtomicBool::new(false),
        }
    }

    /// A request header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// A path parameter by name.
    pub fn url_param(&self, name: &str) -> Option<&str> {
        self.url_params.get(name).map(String::as_str)
    }

    /// Merge path, query and body parameters into `params`. Path first, then
    /// query, then body, so later sources override earlier ones.
    pub(crate) fn merge_params(&mut self) {
        let mut params = Map::new();
        for (key, value) in &self.url_params {
            params.insert(key.clone(), Value::String(value.clone()));
        }
        for (key, value) in &self.query_params {
            params.insert(key.clone(), Value::String(value.clone()));
        }
        for (key, value) in &self.body_params {
            params.insert(key.clone(), value.clone());
        }
        self.params = params;
    }

    /// Attach the authenticated user and its id.
    pub fn set_user(&self, user: Value, user_id: impl Into<String>) {
        if let Ok(mut slot) = self.user.write() {
            *slot = Some((user, user_id.into()));
        }
    }

    /// The authenticated user document, if auth succeeded.
    pub fn user(&self) -> Option<Value> {
        self.user.read().ok().and_then(|slot| slot.as_ref().map(|(user, _)| user.clone()))
    }

    /// The authenticated user's id, if auth succeeded.
    pub fn user_id(&self) -> Option<String> {
        self.user.read().ok().and_then(|slot| slot.as_ref().map(|(_, id)| id.clone()))
    }

    /// Signal that the action handled its own response; the dispatcher ends
    /// the response without further encoding.
    pub fn done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }
}
