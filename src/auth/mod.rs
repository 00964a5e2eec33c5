// Request authentication
//
// Resolves a request's claimed identity to a verified user. The identity
// extraction rule is pluggable; the default reads the `X-User-Id` and
// `X-Auth-Token` headers and hashes the token. A credentialed identity is
// verified with a composite store lookup: the user must match the claimed id
// AND carry the hashed token in its token array, so removing the stored hash
// revokes exactly that token.

pub mod accounts;
pub mod roles;

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::config::{AuthConfig, TokenLocation};
use crate::context::RequestContext;
use crate::endpoint::Outcome;
use crate::error::ApiError;
use crate::store::{Collection, Selector};
use serde_json::Value;

/// Hash a raw session token into its stored form.
pub fn hash_login_token(token: &str) -> String {
    BASE64.encode(Sha256::digest(token.as_bytes()))
}

/// What an identity extraction rule can pull off a request.
#[derive(Clone)]
pub enum ExtractedIdentity {
    /// A claimed user id plus an already-hashed token, to be verified
    /// against the store.
    Credentials { user_id: String, token: String },
    /// A fully resolved user, trusted as-is.
    User(Value),
    /// Extraction failed with a custom response payload.
    Error(Outcome),
}

pub type IdentityExtractor = Arc<dyn Fn(&RequestContext) -> Option<ExtractedIdentity> + Send + Sync>;

/// Result of the auth resolver for one request.
#[derive(Clone)]
pub enum AuthResult {
    Granted { user: Value, user_id: String },
    /// Denied, optionally with a custom response payload supplied by the
    /// extraction rule. Without one the pipeline answers a generic 401.
    Denied { error: Option<Outcome> },
}

impl AuthResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, AuthResult::Granted { .. })
    }
}

/// The default identity rule: both `X-User-Id` and `X-Auth-Token` headers
/// present yields credentials with the token hashed; anything else yields no
/// identity.
pub fn default_extractor(ctx: &RequestContext) -> Option<ExtractedIdentity> {
    let user_id = ctx.header("x-user-id")?;
    let token = ctx.header("x-auth-token")?;
    Some(ExtractedIdentity::Credentials {
        user_id: user_id.to_string(),
        token: hash_login_token(token),
    })
}

/// Resolve the request's identity against the users collection. On success
/// the user and its id are attached to the context.
pub async fn authenticate(
    ctx: &RequestContext,
    users: &Collection,
    auth: &AuthConfig,
) -> Result<AuthResult, ApiError> {
    let extracted = match &auth.extractor {
        Some(extractor) => extractor(ctx),
        None => default_extractor(ctx),
    };

    let result = match extracted {
        None => AuthResult::Denied { error: None },
        Some(ExtractedIdentity::Error(outcome)) => AuthResult::Denied { error: Some(outcome) },
        Some(ExtractedIdentity::User(user)) => match user_id_of(&user) {
            Some(user_id) => AuthResult::Granted { user, user_id },
            None => AuthResult::Denied { error: None },
        },
        Some(ExtractedIdentity::Credentials { user_id, token }) => {
            match users.find_one(&token_selector(&auth.token_location, &user_id, &token)).await? {
                Some(user) => AuthResult::Granted { user, user_id },
                None => AuthResult::Denied { error: None },
            }
        }
    };

    if let AuthResult::Granted { user, user_id } = &result {
        ctx.set_user(user.clone(), user_id.clone());
    }
    Ok(result)
}

/// Composite selector binding a user id to one of its stored hashed tokens.
pub fn token_selector(location: &TokenLocation, user_id: &str, hashed_token: &str) -> Selector {
    let mut selector = Selector::new();
    selector.insert("_id".to_string(), Value::String(user_id.to_string()));
    selector.insert(location.dotted(), Value::String(hashed_token.to_string()));
    selector
}

pub(crate) fn user_id_of(user: &Value) -> Option<String> {
    user.get("_id").and_then(Value::as_str).map(str::to_string)
}
