use std::env;
use std::sync::Arc;

use serde_json::Value;

use crate::auth::{AuthResult, IdentityExtractor};
use crate::context::RequestContext;
use crate::endpoint::{EndpointSpec, Outcome};

/// Default dotted location of hashed session tokens on a user document.
pub const DEFAULT_TOKEN_LOCATION: &str = "services.resume.loginTokens.hashedToken";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }

    /// Whether error responses may carry internal detail.
    pub fn expose_error_detail(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Where per-session hashed tokens live on a user document: an array field
/// plus the element field holding the hash. Resolved once at configuration
/// time from the dotted descriptor, never re-split per request.
#[derive(Debug, Clone)]
pub struct TokenLocation {
    pub array_path: String,
    pub token_field: String,
}

impl TokenLocation {
    pub fn parse(descriptor: &str) -> Result<Self, crate::error::ApiError> {
        match descriptor.rsplit_once('.') {
            Some((array_path, token_field)) if !array_path.is_empty() && !token_field.is_empty() => {
                Ok(Self { array_path: array_path.to_string(), token_field: token_field.to_string() })
            }
            _ => Err(crate::error::ApiError::config(format!(
                "token location must be a dotted path with at least two segments: {descriptor}"
            ))),
        }
    }

    /// The full dotted path, used as a selector key for token lookups.
    pub fn dotted(&self) -> String {
        format!("{}.{}", self.array_path, self.token_field)
    }
}

impl Default for TokenLocation {
    fn default() -> Self {
        Self {
            array_path: "services.resume.loginTokens".to_string(),
            token_field: "hashedToken".to_string(),
        }
    }
}

/// How requests prove who they are: where tokens live on the user document
/// and how a claimed identity is pulled off the request. A `None` extractor
/// falls back to the `X-User-Id`/`X-Auth-Token` header rule.
#[derive(Clone, Default)]
pub struct AuthConfig {
    pub token_location: TokenLocation,
    pub extractor: Option<IdentityExtractor>,
}

pub type OnAuthHook = Arc<dyn Fn(&RequestContext, &AuthResult) -> Option<AuthResult> + Send + Sync>;
pub type OnActionHook = Arc<dyn Fn(&RequestContext) + Send + Sync>;
pub type OnReturnHook = Arc<dyn Fn(&RequestContext, &Outcome) -> Option<Outcome> + Send + Sync>;
pub type SessionHook = Arc<dyn Fn(&RequestContext) -> Option<Value> + Send + Sync>;

/// Extension points around the dispatch pipeline and the login/logout flow.
/// `on_auth` and `on_return` may replace the pipeline's value for their
/// stage; `on_action` is for side effects only; the session hooks contribute
/// an `extra` payload to login/logout responses.
#[derive(Clone, Default)]
pub struct Hooks {
    pub on_auth: Option<OnAuthHook>,
    pub on_action: Option<OnActionHook>,
    pub on_return: Option<OnReturnHook>,
    pub on_logged_in: Option<SessionHook>,
    pub on_logged_out: Option<SessionHook>,
}

/// Registry-wide configuration. Built once at startup and read-only while
/// traffic is served; route registration must complete before serving begins.
#[derive(Clone)]
pub struct ApiConfig {
    /// Base path prefix. Normalized to no leading slash and one trailing slash.
    pub api_path: String,
    /// Optional version segment appended to the base path.
    pub version: Option<String>,
    /// Default response headers, merged case-insensitively under call-site headers.
    pub default_headers: Vec<(String, String)>,
    pub enable_cors: bool,
    /// Install the login/logout routes and the header identity rule.
    pub use_default_auth: bool,
    pub pretty_json: bool,
    pub environment: Environment,
    pub auth: AuthConfig,
    pub hooks: Hooks,
    /// Endpoint answering OPTIONS on routes that configure none. Installed
    /// automatically when CORS is enabled.
    pub default_options_endpoint: Option<EndpointSpec>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_path: "api/".to_string(),
            version: None,
            default_headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            enable_cors: true,
            use_default_auth: false,
            pretty_json: false,
            environment: Environment::from_env(),
            auth: AuthConfig::default(),
            hooks: Hooks::default(),
            default_options_endpoint: None,
        }
    }
}

impl ApiConfig {
    /// Normalize the base path and fold in the version segment:
    /// `/api` -> `api/`, version `v1` -> `api/v1/`.
    pub(crate) fn normalize_api_path(&mut self) {
        if let Some(stripped) = self.api_path.strip_prefix('/') {
            self.api_path = stripped.to_string();
        }
        if !self.api_path.is_empty() && !self.api_path.ends_with('/') {
            self.api_path.push('/');
        }
        if let Some(version) = self.version.take() {
            self.api_path.push_str(&version);
            self.api_path.push('/');
        }
    }

    /// The CORS headers advertised on every response and on the default
    /// OPTIONS endpoint.
    pub(crate) fn cors_headers(&self) -> Vec<(String, String)> {
        let mut allow_headers = "Origin, X-Requested-With, Content-Type, Accept".to_string();
        if self.use_default_auth {
            allow_headers.push_str(", X-User-Id, X-Auth-Token");
        }
        vec![
            ("Access-Control-Allow-Origin".to_string(), "*".to_string()),
            ("Access-Control-Allow-Headers".to_string(), allow_headers),
        ]
    }
}
