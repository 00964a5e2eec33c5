pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod route;
pub mod store;

pub use api::{Api, CollectionMethod, CollectionOptions, Collaborators, EndpointOptions};
pub use auth::accounts::{Accounts, BcryptVerifier, Password, PasswordVerifier, UserIdentifier};
pub use auth::roles::RoleProvider;
pub use auth::{AuthResult, ExtractedIdentity};
pub use config::{ApiConfig, AuthConfig, Environment, Hooks, TokenLocation};
pub use context::RequestContext;
pub use endpoint::{action, EndpointSpec, Endpoints, Envelope, Outcome, RoleSpec, RouteOptions};
pub use error::ApiError;
pub use store::{by_id, Collection, DocumentStore, MemoryStore, Selector, StoreError, UpdateDoc};
