// CRUD endpoint factory
//
// Generates the standard method set for a resource collection, split across
// a collection route (`post`, list `get`) and an entity route at
// `{path}/:id` (`get`, `put`, `patch`, `delete`), plus the specialized
// variant for identity-bearing user collections. Per-endpoint status codes
// intentionally differ between the generic and user families (204/400 vs
// 404 for missing targets) and are kept that way.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{json, Map, Value};

use crate::auth::accounts::{Accounts, AccountsError};
use crate::endpoint::{action, EndpointSpec, Endpoints, Envelope, Outcome, RoleSpec};
use crate::error::ApiError;
use crate::store::{by_id, Collection, Selector, UpdateDoc};

/// The generated endpoints of a collection, for exclusion and per-method
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMethod {
    Get,
    GetAll,
    Post,
    Put,
    Patch,
    Delete,
}

/// Auth/role overrides for one generated endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    pub auth_required: Option<bool>,
    pub role_required: Option<RoleSpec>,
}

/// Options for `add_collection`: a path override, route-level defaults,
/// endpoints to drop entirely, and per-endpoint overrides.
#[derive(Default)]
pub struct CollectionOptions {
    /// Route path; defaults to the collection name.
    pub path: Option<String>,
    pub route_options: crate::endpoint::RouteOptions,
    pub excluded_endpoints: Vec<CollectionMethod>,
    pub endpoints: Vec<(CollectionMethod, EndpointOptions)>,
}

/// Build a store selector from the request's query parameters.
///
/// Every query key is copied into the selector; values that parse entirely
/// as numbers are stored as numbers, everything else as strings. Callers
/// should treat this as a raw query surface: any query parameter becomes a
/// store-query field.
pub fn selector_from_query(query: &std::collections::HashMap<String, String>) -> Selector {
    let mut selector = Selector::new();
    for (key, raw) in query {
        selector.insert(key.clone(), coerce_query_value(raw));
    }
    selector
}

fn coerce_query_value(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if float.is_finite() {
            if let Some(number) = serde_json::Number::from_f64(float) {
                return Value::Number(number);
            }
        }
    }
    Value::String(raw.to_string())
}

/// Selector for entity operations: query parameters plus the path id, which
/// always overrides a query-supplied `_id`.
fn entity_selector(ctx: &crate::context::RequestContext) -> Selector {
    let mut selector = selector_from_query(&ctx.query_params);
    let id = ctx.url_param("id").unwrap_or_default();
    selector.insert("_id".to_string(), Value::String(id.to_string()));
    selector
}

/// Generate the two endpoint sets for a generic collection.
pub(crate) fn collection_routes(
    collection: &Collection,
    options: &CollectionOptions,
) -> (Endpoints, Endpoints) {
    let mut collection_endpoints = Endpoints::new();
    let mut entity_endpoints = Endpoints::new();

    collection_endpoints.get = configure(get_all(collection.clone()), options, CollectionMethod::GetAll);
    collection_endpoints.post = configure(post(collection.clone()), options, CollectionMethod::Post);
    entity_endpoints.get = configure(get(collection.clone()), options, CollectionMethod::Get);
    entity_endpoints.put = configure(put(collection.clone()), options, CollectionMethod::Put);
    entity_endpoints.patch = configure(patch(collection.clone()), options, CollectionMethod::Patch);
    entity_endpoints.delete = configure(delete(collection.clone()), options, CollectionMethod::Delete);

    (collection_endpoints, entity_endpoints)
}

/// Generate the two endpoint sets for a user collection: reads and writes
/// confined to the `profile` sub-field, missing targets answered with 404,
/// creation delegated to the accounts collaborator.
pub(crate) fn user_collection_routes(
    users: &Collection,
    accounts: &Arc<Accounts>,
    options: &CollectionOptions,
) -> (Endpoints, Endpoints) {
    let mut collection_endpoints = Endpoints::new();
    let mut entity_endpoints = Endpoints::new();

    collection_endpoints.get = configure(user_get_all(users.clone()), options, CollectionMethod::GetAll);
    collection_endpoints.post =
        configure(user_post(users.clone(), Arc::clone(accounts)), options, CollectionMethod::Post);
    entity_endpoints.get = configure(user_get(users.clone()), options, CollectionMethod::Get);
    entity_endpoints.put = configure(user_put(users.clone()), options, CollectionMethod::Put);
    entity_endpoints.delete = configure(user_delete(users.clone()), options, CollectionMethod::Delete);

    (collection_endpoints, entity_endpoints)
}

fn configure(
    spec: EndpointSpec,
    options: &CollectionOptions,
    method: CollectionMethod,
) -> Option<EndpointSpec> {
    if options.excluded_endpoints.contains(&method) {
        return None;
    }
    let mut spec = spec;
    if let Some((_, overrides)) = options.endpoints.iter().find(|(m, _)| *m == method) {
        if let Some(auth) = overrides.auth_required {
            spec = spec.auth_required(auth);
        }
        if let Some(role) = &overrides.role_required {
            spec = spec.role_required(role.clone());
        }
    }
    Some(spec)
}

// Generic collection endpoints

fn get(collection: Collection) -> EndpointSpec {
    action(move |ctx| {
        let collection = collection.clone();
        async move {
            let selector = entity_selector(&ctx);
            let entities = collection.find(&selector).await?;
            if entities.is_empty() {
                Ok(Outcome::with_status(StatusCode::NO_CONTENT, Envelope::fail("Item not found")))
            } else {
                Ok(Outcome::ok(Envelope::success(Value::Array(entities))))
            }
        }
    })
}

fn get_all(collection: Collection) -> EndpointSpec {
    action(move |ctx| {
        let collection = collection.clone();
        async move {
            let selector = selector_from_query(&ctx.query_params);
            let entities = collection.find(&selector).await?;
            Ok(Outcome::ok(Envelope::success(Value::Array(entities))))
        }
    })
}

fn post(collection: Collection) -> EndpointSpec {
    action(move |ctx| {
        let collection = collection.clone();
        async move {
            let id = collection.insert(Value::Object(ctx.body_params.clone())).await?;
            match collection.find_one(&by_id(&id)).await? {
                Some(entity) => {
                    Ok(Outcome::with_status(StatusCode::CREATED, Envelope::success(entity)))
                }
                None => Ok(Outcome::with_status(StatusCode::BAD_REQUEST, Envelope::fail("No item added"))),
            }
        }
    })
}

fn put(collection: Collection) -> EndpointSpec {
    action(move |ctx| {
        let collection = collection.clone();
        async move {
            let selector = entity_selector(&ctx);
            let updated =
                collection.update(&selector, &UpdateDoc::Replace(ctx.body_params.clone())).await?;
            if updated > 0 {
                let id = ctx.url_param("id").unwrap_or_default();
                let entity = collection.find_one(&by_id(id)).await?.unwrap_or(Value::Null);
                Ok(Outcome::ok(Envelope::success(entity)))
            } else {
                Ok(Outcome::with_status(StatusCode::BAD_REQUEST, Envelope::fail("Item not updated")))
            }
        }
    })
}

fn patch(collection: Collection) -> EndpointSpec {
    action(move |ctx| {
        let collection = collection.clone();
        async move {
            let selector = entity_selector(&ctx);
            let updated =
                collection.update(&selector, &UpdateDoc::Set(ctx.body_params.clone())).await?;
            if updated > 0 {
                let entity = collection.find_one(&selector).await?.unwrap_or(Value::Null);
                Ok(Outcome::ok(Envelope::success(entity)))
            } else {
                Ok(Outcome::with_status(StatusCode::BAD_REQUEST, Envelope::fail("Item not updated")))
            }
        }
    })
}

fn delete(collection: Collection) -> EndpointSpec {
    action(move |ctx| {
        let collection = collection.clone();
        async move {
            let selector = entity_selector(&ctx);
            if collection.remove(&selector).await? > 0 {
                Ok(Outcome::ok(Envelope::success(json!({"message": "Item removed"}))))
            } else {
                Ok(Outcome::with_status(
                    StatusCode::BAD_REQUEST,
                    Envelope::fail("Could not delete item"),
                ))
            }
        }
    })
}

// User collection endpoints

/// Restrict a user document to its public shape: id plus profile.
fn project_profile(user: &Value) -> Value {
    let mut projected = Map::new();
    if let Some(id) = user.get("_id") {
        projected.insert("_id".to_string(), id.clone());
    }
    if let Some(profile) = user.get("profile") {
        projected.insert("profile".to_string(), profile.clone());
    }
    Value::Object(projected)
}

fn user_get(users: Collection) -> EndpointSpec {
    action(move |ctx| {
        let users = users.clone();
        async move {
            let id = ctx.url_param("id").unwrap_or_default();
            match users.find_one(&by_id(id)).await? {
                Some(user) => Ok(Outcome::ok(Envelope::success(project_profile(&user)))),
                None => Ok(Outcome::with_status(StatusCode::NOT_FOUND, Envelope::fail("User not found"))),
            }
        }
    })
}

fn user_get_all(users: Collection) -> EndpointSpec {
    action(move |_ctx| {
        let users = users.clone();
        async move {
            let entities = users.find(&Selector::new()).await?;
            let projected: Vec<Value> = entities.iter().map(project_profile).collect();
            Ok(Outcome::ok(Envelope::success(Value::Array(projected))))
        }
    })
}

fn user_put(users: Collection) -> EndpointSpec {
    action(move |ctx| {
        let users = users.clone();
        async move {
            let id = ctx.url_param("id").unwrap_or_default();
            let mut fields = Map::new();
            fields.insert("profile".to_string(), Value::Object(ctx.body_params.clone()));
            let updated = users.update(&by_id(id), &UpdateDoc::Set(fields)).await?;
            if updated > 0 {
                let user = users.find_one(&by_id(id)).await?.unwrap_or(Value::Null);
                Ok(Outcome::ok(Envelope::success(project_profile(&user))))
            } else {
                Ok(Outcome::with_status(StatusCode::NOT_FOUND, Envelope::fail("User not found")))
            }
        }
    })
}

fn user_delete(users: Collection) -> EndpointSpec {
    action(move |ctx| {
        let users = users.clone();
        async move {
            let id = ctx.url_param("id").unwrap_or_default();
            if users.remove(&by_id(id)).await? > 0 {
                Ok(Outcome::ok(Envelope::success(json!({"message": "User removed"}))))
            } else {
                Ok(Outcome::with_status(StatusCode::NOT_FOUND, Envelope::fail("User not found")))
            }
        }
    })
}

fn user_post(users: Collection, accounts: Arc<Accounts>) -> EndpointSpec {
    action(move |ctx| {
        let users = users.clone();
        let accounts = Arc::clone(&accounts);
        async move {
            let id = match accounts.create_user(&ctx.body_params).await {
                Ok(id) => id,
                Err(AccountsError::Store(err)) => return Err(ApiError::from(err)),
                Err(_) => {
                    return Ok(Outcome::with_status(
                        StatusCode::BAD_REQUEST,
                        Envelope::fail("No user added"),
                    ))
                }
            };
            match users.find_one(&by_id(&id)).await? {
                Some(user) => Ok(Outcome::with_status(
                    StatusCode::CREATED,
                    Envelope::success(project_profile(&user)),
                )),
                None => {
                    Ok(Outcome::with_status(StatusCode::BAD_REQUEST, Envelope::fail("No user added")))
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn fully_numeric_values_are_coerced() {
        assert_eq!(coerce_query_value("10"), json!(10));
        assert_eq!(coerce_query_value("3.5"), json!(3.5));
        assert_eq!(coerce_query_value("-2"), json!(-2));
    }

    #[test]
    fn partially_numeric_values_stay_strings() {
        assert_eq!(coerce_query_value("10abc"), json!("10abc"));
        assert_eq!(coerce_query_value(""), json!(""));
        assert_eq!(coerce_query_value("NaN"), json!("NaN"));
    }

    #[test]
    fn query_keys_are_copied_into_the_selector() {
        let mut query = HashMap::new();
        query.insert("count".to_string(), "10".to_string());
        query.insert("name".to_string(), "widget".to_string());
        let selector = selector_from_query(&query);
        assert_eq!(selector["count"], json!(10));
        assert_eq!(selector["name"], json!("widget"));
    }

    #[test]
    fn excluded_endpoints_are_dropped() {
        let options = CollectionOptions {
            excluded_endpoints: vec![CollectionMethod::Delete],
            ..Default::default()
        };
        let spec = action(|_ctx| async { Ok(Outcome::ok(Value::Null)) });
        assert!(configure(spec, &options, CollectionMethod::Delete).is_none());
    }

    #[test]
    fn profile_projection_drops_everything_else() {
        let user = json!({"_id": "u1", "profile": {"name": "A"}, "services": {"password": {}}});
        let projected = project_profile(&user);
        assert_eq!(projected, json!({"_id": "u1", "profile": {"name": "A"}}));
    }
}
