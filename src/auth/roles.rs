// Role-based authorization
//
// Role membership lives outside this crate; endpoints declare what they
// need and an injected `RoleProvider` answers membership questions. The
// check runs strictly after authentication has succeeded.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::endpoint::RoleSpec;

/// Role-membership capability. A route declaring a role requirement without
/// a configured provider is rejected at registration time.
#[async_trait]
pub trait RoleProvider: Send + Sync {
    /// Whether the user belongs to any of the given roles, optionally within
    /// a scope (e.g. a group or tenant).
    async fn user_has_role(&self, user_id: &str, roles: &[String], scope: Option<&str>) -> bool;
}

/// Evaluate an endpoint's role requirement for an authenticated context.
/// No requirement is always accepted; an empty role list never is.
pub async fn role_accepted(
    ctx: &RequestContext,
    required: Option<&RoleSpec>,
    provider: Option<&Arc<dyn RoleProvider>>,
) -> bool {
    let Some(required) = required else {
        return true;
    };
    let Some(provider) = provider else {
        return false;
    };
    let Some(user_id) = ctx.user_id() else {
        return false;
    };

    let roles = required.roles();
    if roles.is_empty() {
        return false;
    }
    provider.user_has_role(&user_id, roles, required.scope()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use serde_json::json;
    use std::collections::HashMap;

    struct AdminOnly;

    #[async_trait]
    impl RoleProvider for AdminOnly {
        async fn user_has_role(&self, user_id: &str, roles: &[String], _scope: Option<&str>) -> bool {
            user_id == "admin-user" && roles.iter().any(|role| role == "admin")
        }
    }

    fn ctx(user_id: Option<&str>) -> RequestContext {
        let ctx = RequestContext::new(
            Method::GET,
            "/api/items".to_string(),
            HeaderMap::new(),
            HashMap::new(),
            HashMap::new(),
            serde_json::Map::new(),
        );
        if let Some(id) = user_id {
            ctx.set_user(json!({"_id": id}), id);
        }
        ctx
    }

    #[tokio::test]
    async fn no_requirement_is_accepted() {
        assert!(role_accepted(&ctx(None), None, None).await);
    }

    #[tokio::test]
    async fn membership_is_delegated() {
        let provider: Arc<dyn RoleProvider> = Arc::new(AdminOnly);
        let required = RoleSpec::one("admin");
        assert!(role_accepted(&ctx(Some("admin-user")), Some(&required), Some(&provider)).await);
        assert!(!role_accepted(&ctx(Some("other-user")), Some(&required), Some(&provider)).await);
    }

    #[tokio::test]
    async fn empty_role_list_is_denied() {
        let provider: Arc<dyn RoleProvider> = Arc::new(AdminOnly);
        let required = RoleSpec::Any(Vec::new());
        assert!(!role_accepted(&ctx(Some("admin-user")), Some(&required), Some(&provider)).await);
    }
}
