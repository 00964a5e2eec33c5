// Api registry
//
// Process-wide configuration plus the set of registered paths. Routes are
// added during the startup phase only; `into_router` consumes the registry
// and hands an immutable `axum::Router` to the server, so registration can
// never race with traffic.

pub mod collections;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use serde_json::{json, Value};

use crate::auth::accounts::{
    Accounts, AccountsError, BcryptVerifier, Password, PasswordVerifier, UserIdentifier,
};
use crate::auth::roles::RoleProvider;
use crate::auth::{hash_login_token, token_selector, user_id_of};
use crate::config::{ApiConfig, SessionHook};
use crate::context::RequestContext;
use crate::endpoint::{action, EndpointSpec, Endpoints, Envelope, Outcome, RouteOptions};
use crate::error::ApiError;
use crate::route::Route;
use crate::store::Collection;

pub use collections::{CollectionMethod, CollectionOptions, EndpointOptions};

/// Optional injected capabilities. The password verifier defaults to bcrypt;
/// the role provider has no default and is required before any route may
/// declare a role.
#[derive(Default)]
pub struct Collaborators {
    pub password_verifier: Option<Arc<dyn PasswordVerifier>>,
    pub role_provider: Option<Arc<dyn RoleProvider>>,
}

/// The API registry: configuration, collaborators and the routes registered
/// so far.
pub struct Api {
    config: Arc<ApiConfig>,
    users: Collection,
    roles: Option<Arc<dyn RoleProvider>>,
    accounts: Arc<Accounts>,
    paths: Vec<String>,
    router: Router,
}

impl Api {
    /// Build a registry with default collaborators. When the configuration
    /// enables default auth, the login/logout routes are installed here,
    /// before any caller-added route.
    pub fn new(config: ApiConfig, users: Collection) -> Result<Self, ApiError> {
        Self::with_collaborators(config, users, Collaborators::default())
    }

    pub fn with_collaborators(
        mut config: ApiConfig,
        users: Collection,
        collaborators: Collaborators,
    ) -> Result<Self, ApiError> {
        config.normalize_api_path();

        if config.enable_cors {
            let cors = config.cors_headers();
            for (name, value) in &cors {
                replace_header(&mut config.default_headers, name, value);
            }
            if config.default_options_endpoint.is_none() {
                config.default_options_endpoint = Some(cors_options_endpoint(cors));
            }
        }

        let verifier = collaborators
            .password_verifier
            .unwrap_or_else(|| Arc::new(BcryptVerifier::default()));
        let accounts =
            Arc::new(Accounts::new(users.clone(), verifier, config.auth.token_location.clone()));

        let mut api = Self {
            config: Arc::new(config),
            users,
            roles: collaborators.role_provider,
            accounts,
            paths: Vec::new(),
            router: Router::new(),
        };

        if api.config.use_default_auth {
            api.init_auth()?;
        }
        Ok(api)
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Register endpoints for the given HTTP methods at the given path.
    /// Fails on a duplicate path, or on a role requirement without a
    /// configured role provider.
    pub fn add_route(
        &mut self,
        path: impl Into<String>,
        options: RouteOptions,
        endpoints: Endpoints,
    ) -> Result<&mut Self, ApiError> {
        let path = path.into();
        if self.roles.is_none() && (options.role_required.is_some() || endpoints.declares_role()) {
            return Err(ApiError::config(format!(
                "route '{path}' declares a role requirement but no role provider is configured"
            )));
        }

        let route = Route::new(path, options, endpoints);
        let router = std::mem::take(&mut self.router);
        self.router =
            route.add_to_api(&self.config, &self.users, &self.roles, &mut self.paths, router)?;
        Ok(self)
    }

    /// Generate the standard CRUD routes for a collection: `{path}` with
    /// `post` and list `get`, and `{path}/:id` with `get`, `put`, `patch`
    /// and `delete`.
    pub fn add_collection(
        &mut self,
        collection: Collection,
        options: CollectionOptions,
    ) -> Result<&mut Self, ApiError> {
        let path = options.path.clone().unwrap_or_else(|| collection.name().to_string());
        let (collection_endpoints, entity_endpoints) =
            collections::collection_routes(&collection, &options);
        self.add_route(path.clone(), options.route_options.clone(), collection_endpoints)?;
        self.add_route(format!("{path}/:id"), options.route_options.clone(), entity_endpoints)?;
        Ok(self)
    }

    /// Generate CRUD routes for the identity-bearing users collection:
    /// profile-scoped reads and writes, 404 for missing targets, creation
    /// delegated to the accounts collaborator.
    pub fn add_user_collection(&mut self, options: CollectionOptions) -> Result<&mut Self, ApiError> {
        let path = options.path.clone().unwrap_or_else(|| self.users.name().to_string());
        let (collection_endpoints, entity_endpoints) =
            collections::user_collection_routes(&self.users, &self.accounts, &options);
        self.add_route(path.clone(), options.route_options.clone(), collection_endpoints)?;
        self.add_route(format!("{path}/:id"), options.route_options.clone(), entity_endpoints)?;
        Ok(self)
    }

    /// Hand the finished router to the server. Consumes the registry;
    /// registration is over once traffic can be served.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Install the `login` and `logout` routes.
    fn init_auth(&mut self) -> Result<(), ApiError> {
        let login = login_endpoint(
            Arc::clone(&self.accounts),
            self.users.clone(),
            self.config.hooks.on_logged_in.clone(),
        );
        self.add_route(
            "login",
            RouteOptions { auth_required: Some(false), role_required: None },
            Endpoints::new().post(login),
        )?;

        let logout_post =
            logout_endpoint(Arc::clone(&self.accounts), self.config.hooks.on_logged_out.clone(), false);
        let logout_get =
            logout_endpoint(Arc::clone(&self.accounts), self.config.hooks.on_logged_out.clone(), true);
        self.add_route(
            "logout",
            RouteOptions { auth_required: Some(true), role_required: None },
            Endpoints::new().post(logout_post).get(logout_get),
        )?;
        Ok(())
    }
}

fn replace_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
    headers.push((name.to_string(), value.to_string()));
}

/// The default OPTIONS endpoint when CORS is enabled: 200 with the CORS
/// headers and an empty body.
fn cors_options_endpoint(headers: Vec<(String, String)>) -> EndpointSpec {
    action(move |_ctx| {
        let headers = headers.clone();
        async move {
            let mut outcome = Outcome::with_status(StatusCode::OK, Value::Null);
            outcome.headers = headers;
            Ok(outcome)
        }
    })
}

fn unauthorized() -> Outcome {
    Outcome::with_status(StatusCode::UNAUTHORIZED, Envelope::error("Unauthorized"))
}

/// POST login: verify credentials, issue a session token, attach the fresh
/// session's user to the context, and merge any `on_logged_in` extra data
/// into the response.
fn login_endpoint(
    accounts: Arc<Accounts>,
    users: Collection,
    on_logged_in: Option<SessionHook>,
) -> EndpointSpec {
    action(move |ctx| {
        let accounts = Arc::clone(&accounts);
        let users = users.clone();
        let on_logged_in = on_logged_in.clone();
        async move {
            let Some(identifier) = UserIdentifier::from_body(&ctx.body_params) else {
                return Ok(unauthorized());
            };
            let Some(password) = Password::from_body(&ctx.body_params) else {
                return Ok(unauthorized());
            };

            let login = match accounts.login_with_password(&identifier, &password).await {
                Ok(login) => login,
                Err(AccountsError::Store(err)) => return Err(ApiError::from(err)),
                Err(_) => return Ok(unauthorized()),
            };

            // Re-resolve the just-created session so the hooks see the
            // authenticated user on the context.
            let selector = token_selector(
                accounts.token_location(),
                &login.user_id,
                &hash_login_token(&login.auth_token),
            );
            if let Some(user) = users.find_one(&selector).await? {
                if let Some(user_id) = user_id_of(&user) {
                    ctx.set_user(user, user_id);
                }
            }

            let mut data = json!({"userId": login.user_id, "authToken": login.auth_token});
            if let Some(hook) = &on_logged_in {
                if let Some(extra) = hook(&ctx) {
                    data["extra"] = extra;
                }
            }
            Ok(Outcome::ok(Envelope::success(data)))
        }
    })
}

async fn perform_logout(
    accounts: &Accounts,
    on_logged_out: &Option<SessionHook>,
    ctx: &Arc<RequestContext>,
) -> Result<Outcome, ApiError> {
    let raw_token = ctx
        .header("x-auth-token")
        .map(str::to_string)
        .ok_or_else(|| ApiError::bad_request("Missing X-Auth-Token header"))?;
    let user_id = ctx
        .user_id()
        .ok_or_else(|| ApiError::internal("logout requires an authenticated user"))?;

    accounts.logout(&user_id, &raw_token).await?;

    let mut data = json!({"message": "You've been logged out!"});
    if let Some(hook) = on_logged_out {
        if let Some(extra) = hook(ctx) {
            data["extra"] = extra;
        }
    }
    Ok(Outcome::ok(Envelope::success(data)))
}

/// The logout action. The GET variant is accepted for backwards
/// compatibility but deprecated in favor of POST.
fn logout_endpoint(
    accounts: Arc<Accounts>,
    on_logged_out: Option<SessionHook>,
    deprecated_get: bool,
) -> EndpointSpec {
    action(move |ctx| {
        let accounts = Arc::clone(&accounts);
        let on_logged_out = on_logged_out.clone();
        async move {
            if deprecated_get {
                tracing::warn!("logout via GET is deprecated; use POST instead");
            }
            perform_logout(&accounts, &on_logged_out, &ctx).await
        }
    })
}
