// Route dispatch engine
//
// A `Route` owns one URL path's per-method endpoints. Registration computes
// the allowed/rejected method sets, wires allowed methods through the
// auth -> role -> action pipeline, and answers every rejected method with a
// 405 listing the allowed set. Responses funnel through `respond`, which
// merges headers case-insensitively, serializes JSON bodies, and defers
// 401/403 sends behind a random delay so credential failures cannot be told
// apart by latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use rand::{thread_rng, Rng};
use serde_json::{Map, Value};

use crate::auth::roles::{role_accepted, RoleProvider};
use crate::auth::{authenticate, AuthResult};
use crate::config::ApiConfig;
use crate::context::RequestContext;
use crate::endpoint::{Endpoint, Endpoints, Envelope, Outcome, RouteOptions};
use crate::error::ApiError;
use crate::store::Collection;

const LOGIN_REQUIRED: &str = "You must be logged in to do this.";
const PERMISSION_DENIED: &str = "You do not have permission to do this.";
const UNKNOWN_ENDPOINT: &str = "API endpoint does not exist";

/// Bounds of the deferred send for 401/403 responses, in milliseconds.
const DELAY_MIN_MS: u64 = 500;
const DELAY_MAX_MS: u64 = 1000;

/// One URL path plus its per-method endpoints and route-level defaults.
pub struct Route {
    pub path: String,
    pub options: RouteOptions,
    pub endpoints: Endpoints,
}

impl Route {
    pub fn new(path: impl Into<String>, options: RouteOptions, endpoints: Endpoints) -> Self {
        Self { path: path.into(), options, endpoints }
    }

    /// Register this route's handlers on the router. Fails when the path is
    /// already registered. Fills a missing OPTIONS endpoint with the
    /// configured CORS default before normalizing.
    pub(crate) fn add_to_api(
        mut self,
        config: &Arc<ApiConfig>,
        users: &Collection,
        roles: &Option<Arc<dyn RoleProvider>>,
        paths: &mut Vec<String>,
        router: Router,
    ) -> Result<Router, ApiError> {
        if paths.iter().any(|registered| registered == &self.path) {
            return Err(ApiError::config(format!(
                "Cannot add a route at an existing path: {}",
                self.path
            )));
        }

        if config.enable_cors && self.endpoints.options.is_none() {
            self.endpoints.options = config.default_options_endpoint.clone();
        }

        let universe = [
            (Method::GET, self.endpoints.get.take()),
            (Method::POST, self.endpoints.post.take()),
            (Method::PUT, self.endpoints.put.take()),
            (Method::PATCH, self.endpoints.patch.take()),
            (Method::DELETE, self.endpoints.delete.take()),
            (Method::OPTIONS, self.endpoints.options.take()),
        ];

        let allowed: Vec<&str> = universe
            .iter()
            .filter(|(_, spec)| spec.is_some())
            .map(|(method, _)| method.as_str())
            .collect();

        paths.push(self.path.clone());

        let full_path = format!("/{}{}", config.api_path, self.path);
        let shared = Arc::new(RouteShared {
            config: Arc::clone(config),
            users: users.clone(),
            roles: roles.clone(),
            allow_header: allowed.join(", "),
            full_path: full_path.clone(),
        });

        let mut method_router = MethodRouter::new();
        for (method, spec) in universe {
            let Some(spec) = spec else { continue };
            let endpoint = Arc::new(spec.normalize(&self.options));
            let filter = method_filter(&method)?;

            let handler = {
                let shared = Arc::clone(&shared);
                let endpoint = Arc::clone(&endpoint);
                move |Path(url_params): Path<HashMap<String, String>>,
                      Query(query_params): Query<HashMap<String, String>>,
                      headers: HeaderMap,
                      body: Bytes| {
                    let shared = Arc::clone(&shared);
                    let endpoint = Arc::clone(&endpoint);
                    let method = method.clone();
                    async move {
                        dispatch(shared, endpoint, method, headers, url_params, query_params, body)
                            .await
                    }
                }
            };
            method_router = method_router.on(filter, handler);
        }

        // Every method outside the configured set answers 405 with the
        // allowed methods in the Allow header.
        let rejected = {
            let shared = Arc::clone(&shared);
            move || {
                let shared = Arc::clone(&shared);
                async move {
                    let outcome =
                        Outcome::with_status(StatusCode::METHOD_NOT_ALLOWED, Envelope::error(UNKNOWN_ENDPOINT))
                            .header("Allow", shared.allow_header.clone());
                    respond(&shared.config, outcome).await
                }
            }
        };
        method_router = method_router.fallback(rejected);

        Ok(router.route(&full_path, method_router))
    }
}

/// State shared by every handler registered for one route.
pub(crate) struct RouteShared {
    pub config: Arc<ApiConfig>,
    pub users: Collection,
    pub roles: Option<Arc<dyn RoleProvider>>,
    pub allow_header: String,
    pub full_path: String,
}

fn method_filter(method: &Method) -> Result<MethodFilter, ApiError> {
    if *method == Method::GET {
        Ok(MethodFilter::GET)
    } else if *method == Method::POST {
        Ok(MethodFilter::POST)
    } else if *method == Method::PUT {
        Ok(MethodFilter::PUT)
    } else if *method == Method::PATCH {
        Ok(MethodFilter::PATCH)
    } else if *method == Method::DELETE {
        Ok(MethodFilter::DELETE)
    } else if *method == Method::OPTIONS {
        Ok(MethodFilter::OPTIONS)
    } else {
        Err(ApiError::config(format!("unsupported endpoint method: {method}")))
    }
}

/// Handle one request for one endpoint: build the context, run the pipeline,
/// and turn the result (or any raised error) into a well-formed response.
/// Nothing escapes this boundary.
async fn dispatch(
    shared: Arc<RouteShared>,
    endpoint: Arc<Endpoint>,
    method: Method,
    headers: HeaderMap,
    url_params: HashMap<String, String>,
    query_params: HashMap<String, String>,
    body: Bytes,
) -> Response {
    let body_params = match parse_body(&body) {
        Ok(params) => params,
        Err(err) => return error_response(&shared.config, err).await,
    };

    let ctx = RequestContext::new(
        method,
        shared.full_path.clone(),
        headers,
        url_params,
        query_params,
        body_params,
    );

    match call_endpoint(&shared, &endpoint, ctx).await {
        Ok((ctx, outcome)) => {
            if ctx.is_done() {
                // The action completed the response itself.
                Response::new(Body::empty())
            } else {
                respond(&shared.config, outcome).await
            }
        }
        Err(err) => error_response(&shared.config, err).await,
    }
}

/// The per-request pipeline: authentication, role authorization, parameter
/// merge, hooks, action.
pub(crate) async fn call_endpoint(
    shared: &RouteShared,
    endpoint: &Endpoint,
    mut ctx: RequestContext,
) -> Result<(Arc<RequestContext>, Outcome), ApiError> {
    if endpoint.auth_required {
        let mut result = authenticate(&ctx, &shared.users, &shared.config.auth).await?;
        if let Some(hook) = &shared.config.hooks.on_auth {
            if let Some(replacement) = hook(&ctx, &result) {
                result = replacement;
            }
        }

        match result {
            AuthResult::Granted { user, user_id } => ctx.set_user(user, user_id),
            AuthResult::Denied { error } => {
                let outcome = error.unwrap_or_else(|| {
                    Outcome::with_status(StatusCode::UNAUTHORIZED, Envelope::error(LOGIN_REQUIRED))
                });
                return Ok((Arc::new(ctx), outcome));
            }
        }

        // Only ever evaluated for authenticated contexts.
        if !role_accepted(&ctx, endpoint.role_required.as_ref(), shared.roles.as_ref()).await {
            return Ok((
                Arc::new(ctx),
                Outcome::with_status(StatusCode::FORBIDDEN, Envelope::error(PERMISSION_DENIED)),
            ));
        }
    }

    ctx.merge_params();
    let ctx = Arc::new(ctx);

    if let Some(hook) = &shared.config.hooks.on_action {
        hook(&ctx);
    }

    let mut outcome = (endpoint.handler)(Arc::clone(&ctx)).await?;

    if let Some(hook) = &shared.config.hooks.on_return {
        if let Some(replacement) = hook(&ctx, &outcome) {
            outcome = replacement;
        }
    }

    Ok((ctx, outcome))
}

fn parse_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(_) => Ok(Map::new()),
        Err(e) => Err(ApiError::bad_request(format!("Malformed JSON body: {e}"))),
    }
}

async fn error_response(config: &ApiConfig, err: ApiError) -> Response {
    if err.is_server_error() {
        tracing::error!(error = %err, "endpoint action failed");
    } else {
        tracing::debug!(error = %err, "request rejected");
    }
    let body = err.to_body(config.environment.expose_error_detail());
    respond(config, Outcome::with_status(err.status_code(), body)).await
}

/// Encode and send an outcome. Header keys from both the configured defaults
/// and the outcome are lower-cased before the merge so case differences
/// cannot duplicate a header; outcome headers win on conflict. JSON-typed
/// bodies are serialized (pretty when configured); other content types pass
/// string bodies through unmodified. 401 and 403 responses are held back for
/// a uniformly random 500-1000ms; the wait is awaited, so only this request
/// is delayed.
pub(crate) async fn respond(config: &ApiConfig, outcome: Outcome) -> Response {
    let Outcome { status, body, headers } = outcome;

    let mut merged: Vec<(String, String)> = Vec::new();
    for (name, value) in &config.default_headers {
        upsert_header(&mut merged, name.to_lowercase(), value.clone());
    }
    for (name, value) in headers {
        upsert_header(&mut merged, name.to_lowercase(), value);
    }

    let content_type = merged
        .iter()
        .find(|(name, _)| name == "content-type")
        .map(|(_, value)| value.as_str())
        .unwrap_or("");

    let payload = if content_type.contains("json") || content_type.contains("javascript") {
        if body.is_null() {
            Vec::new()
        } else {
            let serialized = if config.pretty_json {
                serde_json::to_vec_pretty(&body)
            } else {
                serde_json::to_vec(&body)
            };
            serialized.unwrap_or_else(|e| {
                tracing::error!("failed to serialize response body: {e}");
                b"null".to_vec()
            })
        }
    } else {
        match body {
            Value::String(text) => text.into_bytes(),
            Value::Null => Vec::new(),
            other => other.to_string().into_bytes(),
        }
    };

    // 204/304 must not carry a body on the wire.
    let payload = if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        Vec::new()
    } else {
        payload
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        let delay = thread_rng().gen_range(DELAY_MIN_MS..DELAY_MAX_MS);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &merged {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Body::from(payload)) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("failed to build response: {e}");
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    if let Some(entry) = headers.iter_mut().find(|(existing, _)| *existing == name) {
        entry.1 = value;
    } else {
        headers.push((name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_merge_is_case_insensitive_with_outcome_winning() {
        let mut merged = Vec::new();
        upsert_header(&mut merged, "content-type".to_string(), "application/json".to_string());
        upsert_header(&mut merged, "content-type".to_string(), "text/plain".to_string());
        assert_eq!(merged, vec![("content-type".to_string(), "text/plain".to_string())]);
    }

    #[test]
    fn body_parse_accepts_empty_and_rejects_garbage() {
        assert!(parse_body(&Bytes::new()).unwrap().is_empty());
        assert!(parse_body(&Bytes::from_static(b"{\"a\":1}")).unwrap().contains_key("a"));
        assert!(parse_body(&Bytes::from_static(b"not json")).is_err());
    }
}
