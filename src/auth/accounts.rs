// Password accounts
//
// Credential verification, session-token issuance and user creation over the
// users collection. Password checking is delegated to a `PasswordVerifier`;
// the default verifier matches the common client-side scheme of bcrypt over
// a SHA-256 digest of the password.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::auth::{hash_login_token, user_id_of};
use crate::config::TokenLocation;
use crate::store::{by_id, Collection, Selector, StoreError, UpdateDoc};

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// Length of a raw session token.
const TOKEN_LENGTH: usize = 43;

#[derive(Debug)]
pub enum AccountsError {
    /// Any credential failure: malformed identity, unknown user, missing or
    /// mismatched password. Collapsed deliberately so responses carry no
    /// username/password oracle.
    Unauthorized,
    Invalid(String),
    Store(StoreError),
}

impl From<StoreError> for AccountsError {
    fn from(err: StoreError) -> Self {
        AccountsError::Store(err)
    }
}

impl std::fmt::Display for AccountsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountsError::Unauthorized => write!(f, "Unauthorized"),
            AccountsError::Invalid(msg) => write!(f, "{msg}"),
            AccountsError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AccountsError {}

/// Exactly one identifier names the user logging in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdentifier {
    Username(String),
    Email(String),
}

impl UserIdentifier {
    /// Identity precedence from a login request body: explicit `username`
    /// then `email` fields win; otherwise a combined `user` field is
    /// classified as an email when it contains `@`.
    pub fn from_body(body: &Map<String, Value>) -> Option<Self> {
        if let Some(username) = body.get("username").and_then(Value::as_str) {
            return Some(UserIdentifier::Username(username.to_string()));
        }
        if let Some(email) = body.get("email").and_then(Value::as_str) {
            return Some(UserIdentifier::Email(email.to_string()));
        }
        let combined = body.get("user").and_then(Value::as_str)?;
        if combined.contains('@') {
            Some(UserIdentifier::Email(combined.to_string()))
        } else {
            Some(UserIdentifier::Username(combined.to_string()))
        }
    }

    fn selector(&self) -> Selector {
        let mut selector = Selector::new();
        match self {
            UserIdentifier::Username(username) => {
                selector.insert("username".to_string(), Value::String(username.clone()));
            }
            UserIdentifier::Email(email) => {
                selector.insert("emails.address".to_string(), Value::String(email.clone()));
            }
        }
        selector
    }
}

/// A password credential, either plain text or a client-side SHA-256 digest.
#[derive(Debug, Clone)]
pub enum Password {
    Plain(String),
    Digest(String),
}

impl Password {
    /// Read the `password` field; a truthy `hashed` field marks it as a
    /// digest.
    pub fn from_body(body: &Map<String, Value>) -> Option<Self> {
        let password = body.get("password").and_then(Value::as_str)?;
        if body.get("hashed").and_then(Value::as_bool).unwrap_or(false) {
            Some(Password::Digest(password.to_string()))
        } else {
            Some(Password::Plain(password.to_string()))
        }
    }

    /// The SHA-256 hex digest form, computed for plain passwords.
    pub fn digest(&self) -> String {
        match self {
            Password::Plain(plain) => format!("{:x}", Sha256::digest(plain.as_bytes())),
            Password::Digest(digest) => digest.clone(),
        }
    }
}

/// Injected credential-checking capability.
pub trait PasswordVerifier: Send + Sync {
    fn verify(&self, password: &Password, stored_hash: &str) -> bool;
    fn hash(&self, password: &Password) -> Result<String, AccountsError>;
}

/// Default verifier: bcrypt over the password's SHA-256 digest.
pub struct BcryptVerifier {
    cost: u32,
}

impl BcryptVerifier {
    pub fn with_cost(cost: u32) -> Self {
        Self { cost }
    }
}

impl Default for BcryptVerifier {
    fn default() -> Self {
        Self { cost: BCRYPT_COST }
    }
}

impl PasswordVerifier for BcryptVerifier {
    fn verify(&self, password: &Password, stored_hash: &str) -> bool {
        bcrypt::verify(password.digest(), stored_hash).unwrap_or(false)
    }

    fn hash(&self, password: &Password) -> Result<String, AccountsError> {
        bcrypt::hash(password.digest(), self.cost)
            .map_err(|e| AccountsError::Invalid(format!("bcrypt hash: {e}")))
    }
}

/// A fresh session: the id of the authenticated user and the raw token
/// handed to the client. Only the hashed form is stored.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub user_id: String,
    pub auth_token: String,
}

/// Account operations over the users collection.
pub struct Accounts {
    users: Collection,
    verifier: Arc<dyn PasswordVerifier>,
    token_location: TokenLocation,
}

impl Accounts {
    pub fn new(users: Collection, verifier: Arc<dyn PasswordVerifier>, token_location: TokenLocation) -> Self {
        Self { users, verifier, token_location }
    }

    /// Verify credentials and issue a session token. Every failure mode
    /// collapses to `Unauthorized`.
    pub async fn login_with_password(
        &self,
        identifier: &UserIdentifier,
        password: &Password,
    ) -> Result<LoginSuccess, AccountsError> {
        let user = self
            .users
            .find_one(&identifier.selector())
            .await?
            .ok_or(AccountsError::Unauthorized)?;

        let stored_hash = user
            .pointer("/services/password/bcrypt")
            .and_then(Value::as_str)
            .ok_or(AccountsError::Unauthorized)?;

        if !self.verifier.verify(password, stored_hash) {
            return Err(AccountsError::Unauthorized);
        }

        let user_id = user_id_of(&user).ok_or(AccountsError::Unauthorized)?;
        let auth_token = generate_login_token();
        self.insert_hashed_token(&user_id, &hash_login_token(&auth_token)).await?;

        Ok(LoginSuccess { user_id, auth_token })
    }

    /// Store a hashed token as a new session entry on the user document.
    async fn insert_hashed_token(&self, user_id: &str, hashed_token: &str) -> Result<(), StoreError> {
        let mut entry = Map::new();
        entry.insert(self.token_location.token_field.clone(), Value::String(hashed_token.to_string()));
        entry.insert("when".to_string(), Value::String(Utc::now().to_rfc3339()));

        self.users
            .update(
                &by_id(user_id),
                &UpdateDoc::Push {
                    path: self.token_location.array_path.clone(),
                    value: Value::Object(entry),
                },
            )
            .await?;
        Ok(())
    }

    /// Revoke one session: remove exactly the entry holding this token's
    /// hash. Other sessions of the same user stay valid.
    pub async fn logout(&self, user_id: &str, raw_token: &str) -> Result<(), StoreError> {
        let mut matching = Map::new();
        matching.insert(
            self.token_location.token_field.clone(),
            Value::String(hash_login_token(raw_token)),
        );

        self.users
            .update(
                &by_id(user_id),
                &UpdateDoc::Pull { path: self.token_location.array_path.clone(), matching },
            )
            .await?;
        Ok(())
    }

    /// Create a user document with a hashed password credential. Returns the
    /// new id.
    pub async fn create_user(&self, body: &Map<String, Value>) -> Result<String, AccountsError> {
        let username = body.get("username").and_then(Value::as_str);
        let email = body.get("email").and_then(Value::as_str);
        if username.is_none() && email.is_none() {
            return Err(AccountsError::Invalid("username or email is required".to_string()));
        }

        let password = Password::from_body(body)
            .ok_or_else(|| AccountsError::Invalid("password is required".to_string()))?;
        let bcrypt_hash = self.verifier.hash(&password)?;

        let mut doc = Map::new();
        doc.insert("_id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        if let Some(username) = username {
            doc.insert("username".to_string(), Value::String(username.to_string()));
        }
        if let Some(email) = email {
            doc.insert("emails".to_string(), json!([{"address": email, "verified": false}]));
        }
        doc.insert("services".to_string(), json!({"password": {"bcrypt": bcrypt_hash}}));
        doc.insert(
            "profile".to_string(),
            body.get("profile").cloned().unwrap_or_else(|| json!({})),
        );
        doc.insert("createdAt".to_string(), Value::String(Utc::now().to_rfc3339()));

        Ok(self.users.insert(Value::Object(doc)).await?)
    }

    pub fn token_location(&self) -> &TokenLocation {
        &self.token_location
    }
}

/// A random alphanumeric session token.
fn generate_login_token() -> String {
    thread_rng().sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect()
}
