use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RequestContext;
use crate::error::ApiError;

/// The standard response body shape: `status` plus optional `data`/`message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub status: EnvelopeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Fail,
    Error,
}

impl Envelope {
    pub fn success(data: impl Into<Value>) -> Self {
        Self { status: EnvelopeStatus::Success, data: Some(data.into()), message: None }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self { status: EnvelopeStatus::Fail, data: None, message: Some(message.into()) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { status: EnvelopeStatus::Error, data: None, message: Some(message.into()) }
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        serde_json::to_value(envelope).unwrap_or(Value::Null)
    }
}

/// What an action hands back: a status, a body and any extra headers. The
/// encoder merges the headers under the configured defaults and serializes
/// the body according to the final content type.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub status: StatusCode,
    pub body: Value,
    pub headers: Vec<(String, String)>,
}

impl Outcome {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Value>) -> Self {
        Self::with_status(StatusCode::OK, body)
    }

    pub fn with_status(status: StatusCode, body: impl Into<Value>) -> Self {
        Self { status, body: body.into(), headers: Vec::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// A role requirement on an endpoint. The authenticated user must belong to
/// any of the listed roles; `Scoped` additionally passes a scope (e.g. a
/// group) to the role provider. An empty role list never matches.
#[derive(Debug, Clone)]
pub enum RoleSpec {
    Any(Vec<String>),
    Scoped { roles: Vec<String>, scope: Option<String> },
}

impl RoleSpec {
    pub fn one(role: impl Into<String>) -> Self {
        RoleSpec::Any(vec![role.into()])
    }

    pub fn roles(&self) -> &[String] {
        match self {
            RoleSpec::Any(roles) => roles,
            RoleSpec::Scoped { roles, .. } => roles,
        }
    }

    pub fn scope(&self) -> Option<&str> {
        match self {
            RoleSpec::Any(_) => None,
            RoleSpec::Scoped { scope, .. } => scope.as_deref(),
        }
    }
}

/// Route-level defaults applied to every endpoint that does not set its own.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub auth_required: Option<bool>,
    pub role_required: Option<RoleSpec>,
}

pub type ActionHandler =
    Arc<dyn Fn(Arc<RequestContext>) -> BoxFuture<'static, Result<Outcome, ApiError>> + Send + Sync>;

/// An endpoint as registered: either a bare action, or an action with its
/// own auth/role configuration. Normalized exactly once at registration into
/// [`Endpoint`]; the dispatch pipeline never re-inspects the original shape.
#[derive(Clone)]
pub enum EndpointSpec {
    Action(ActionHandler),
    Configured {
        handler: ActionHandler,
        auth_required: Option<bool>,
        role_required: Option<RoleSpec>,
    },
}

/// Wrap an async closure as a bare-action endpoint.
pub fn action<F, Fut>(f: F) -> EndpointSpec
where
    F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome, ApiError>> + Send + 'static,
{
    EndpointSpec::Action(Arc::new(move |ctx| Box::pin(f(ctx))))
}

impl EndpointSpec {
    /// Set the auth requirement, converting a bare action into a configured one.
    pub fn auth_required(self, required: bool) -> Self {
        let (handler, _, role_required) = self.into_parts();
        EndpointSpec::Configured { handler, auth_required: Some(required), role_required }
    }

    /// Set the role requirement, converting a bare action into a configured one.
    pub fn role_required(self, role: RoleSpec) -> Self {
        let (handler, auth_required, _) = self.into_parts();
        EndpointSpec::Configured { handler, auth_required, role_required: Some(role) }
    }

    pub(crate) fn declares_role(&self) -> bool {
        matches!(self, EndpointSpec::Configured { role_required: Some(_), .. })
    }

    fn into_parts(self) -> (ActionHandler, Option<bool>, Option<RoleSpec>) {
        match self {
            EndpointSpec::Action(handler) => (handler, None, None),
            EndpointSpec::Configured { handler, auth_required, role_required } => {
                (handler, auth_required, role_required)
            }
        }
    }

    /// Resolve against the owning route's defaults. A role requirement
    /// forces authentication even when `auth_required` was left off or set
    /// to false.
    pub(crate) fn normalize(self, route: &RouteOptions) -> Endpoint {
        let (handler, auth_required, role_required) = self.into_parts();
        let role_required = role_required.or_else(|| route.role_required.clone());
        let auth_required = if role_required.is_some() {
            true
        } else {
            auth_required.or(route.auth_required).unwrap_or(false)
        };
        Endpoint { handler, auth_required, role_required }
    }
}

/// A fully resolved endpoint: the shape the dispatch pipeline works with.
#[derive(Clone)]
pub struct Endpoint {
    pub handler: ActionHandler,
    pub auth_required: bool,
    pub role_required: Option<RoleSpec>,
}

/// The per-method endpoints of one route, over the fixed method universe.
#[derive(Clone, Default)]
pub struct Endpoints {
    pub get: Option<EndpointSpec>,
    pub post: Option<EndpointSpec>,
    pub put: Option<EndpointSpec>,
    pub patch: Option<EndpointSpec>,
    pub delete: Option<EndpointSpec>,
    pub options: Option<EndpointSpec>,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(mut self, spec: EndpointSpec) -> Self {
        self.get = Some(spec);
        self
    }

    pub fn post(mut self, spec: EndpointSpec) -> Self {
        self.post = Some(spec);
        self
    }

    pub fn put(mut self, spec: EndpointSpec) -> Self {
        self.put = Some(spec);
        self
    }

    pub fn patch(mut self, spec: EndpointSpec) -> Self {
        self.patch = Some(spec);
        self
    }

    pub fn delete(mut self, spec: EndpointSpec) -> Self {
        self.delete = Some(spec);
        self
    }

    pub fn options(mut self, spec: EndpointSpec) -> Self {
        self.options = Some(spec);
        self
    }

    pub(crate) fn declares_role(&self) -> bool {
        [&self.get, &self.post, &self.put, &self.patch, &self.delete, &self.options]
            .into_iter()
            .flatten()
            .any(EndpointSpec::declares_role)
    }
}
