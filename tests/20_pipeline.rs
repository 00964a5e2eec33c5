mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use crest::{
    action, Api, ApiConfig, AuthResult, Collaborators, Endpoints, Envelope, Hooks, Outcome,
    RoleProvider, RoleSpec, RouteOptions,
};

// The auth -> role -> action pipeline: 401/403 behavior and timing, role
// delegation, and the extension hooks.

fn whoami() -> crest::EndpointSpec {
    action(|ctx| async move {
        Ok(Outcome::ok(Envelope::success(json!({"userId": ctx.user_id()}))))
    })
}

struct StaticRoles;

#[async_trait]
impl RoleProvider for StaticRoles {
    async fn user_has_role(&self, user_id: &str, roles: &[String], _scope: Option<&str>) -> bool {
        user_id == "admin-1" && roles.iter().any(|role| role == "admin")
    }
}

async fn login(client: &reqwest::Client, base_url: &str, username: &str, password: &str) -> Result<(String, String)> {
    let res = client
        .post(format!("{base_url}/api/login"))
        .json(&json!({"username": username, "password": password}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let payload = res.json::<serde_json::Value>().await?;
    let user_id = payload["data"]["userId"].as_str().unwrap_or_default().to_string();
    let token = payload["data"]["authToken"].as_str().unwrap_or_default().to_string();
    Ok((user_id, token))
}

#[tokio::test]
async fn missing_credentials_answer_401_after_a_delay() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let config = ApiConfig { use_default_auth: true, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_route(
        "me",
        RouteOptions { auth_required: Some(true), role_required: None },
        Endpoints::new().get(whoami()),
    )?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let started = Instant::now();
        let res = client.get(format!("{}/api/me", server.base_url)).send().await?;
        let elapsed = started.elapsed();

        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let payload = res.json::<serde_json::Value>().await?;
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["message"], "You must be logged in to do this.");

        assert!(elapsed >= Duration::from_millis(500), "sent too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "sent too late: {elapsed:?}");
    }
    Ok(())
}

#[tokio::test]
async fn session_tokens_authenticate_requests() -> Result<()> {
    let (_store, users, _items) = common::collections();
    common::seed_user(&users, "u1", "alice", "secret").await?;

    let config = ApiConfig { use_default_auth: true, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_route(
        "me",
        RouteOptions { auth_required: Some(true), role_required: None },
        Endpoints::new().get(whoami()),
    )?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    let (user_id, token) = login(&client, &server.base_url, "alice", "secret").await?;
    assert_eq!(user_id, "u1");

    let res = client
        .get(format!("{}/api/me", server.base_url))
        .header("X-User-Id", &user_id)
        .header("X-Auth-Token", &token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["data"]["userId"], "u1");
    Ok(())
}

#[tokio::test]
async fn missing_role_answers_403() -> Result<()> {
    let (_store, users, _items) = common::collections();
    common::seed_user(&users, "u1", "alice", "secret").await?;
    common::seed_user(&users, "admin-1", "root", "secret").await?;

    let config = ApiConfig { use_default_auth: true, ..Default::default() };
    let collaborators =
        Collaborators { password_verifier: None, role_provider: Some(Arc::new(StaticRoles)) };
    let mut api = Api::with_collaborators(config, users, collaborators)?;
    api.add_route(
        "admin",
        RouteOptions { auth_required: None, role_required: Some(RoleSpec::one("admin")) },
        Endpoints::new().get(whoami()),
    )?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    // Authenticated but not an admin.
    let (user_id, token) = login(&client, &server.base_url, "alice", "secret").await?;
    let res = client
        .get(format!("{}/api/admin", server.base_url))
        .header("X-User-Id", &user_id)
        .header("X-Auth-Token", &token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["message"], "You do not have permission to do this.");

    // An admin passes.
    let (user_id, token) = login(&client, &server.base_url, "root", "secret").await?;
    let res = client
        .get(format!("{}/api/admin", server.base_url))
        .header("X-User-Id", &user_id)
        .header("X-Auth-Token", &token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn role_gated_route_requires_auth_even_unasked() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let config = ApiConfig { use_default_auth: true, ..Default::default() };
    let collaborators =
        Collaborators { password_verifier: None, role_provider: Some(Arc::new(StaticRoles)) };
    let mut api = Api::with_collaborators(config, users, collaborators)?;
    // auth_required is explicitly false, but the role requirement wins.
    api.add_route(
        "admin",
        RouteOptions { auth_required: Some(false), role_required: Some(RoleSpec::one("admin")) },
        Endpoints::new().get(whoami()),
    )?;
    let server = common::spawn(api).await?;

    let res = reqwest::get(format!("{}/api/admin", server.base_url)).await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn hooks_fire_once_per_request_at_their_stage() -> Result<()> {
    let (_store, users, _items) = common::collections();
    common::seed_user(&users, "u1", "alice", "secret").await?;

    let auth_calls = Arc::new(AtomicUsize::new(0));
    let action_calls = Arc::new(AtomicUsize::new(0));
    let return_calls = Arc::new(AtomicUsize::new(0));

    let hooks = Hooks {
        on_auth: Some({
            let auth_calls = Arc::clone(&auth_calls);
            Arc::new(move |_ctx: &crest::RequestContext, _result: &AuthResult| {
                auth_calls.fetch_add(1, Ordering::SeqCst);
                None
            })
        }),
        on_action: Some({
            let action_calls = Arc::clone(&action_calls);
            Arc::new(move |_ctx: &crest::RequestContext| {
                action_calls.fetch_add(1, Ordering::SeqCst);
            })
        }),
        on_return: Some({
            let return_calls = Arc::clone(&return_calls);
            Arc::new(move |_ctx: &crest::RequestContext, _outcome: &Outcome| {
                return_calls.fetch_add(1, Ordering::SeqCst);
                None
            })
        }),
        ..Default::default()
    };

    let config = ApiConfig { use_default_auth: true, hooks, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_route(
        "me",
        RouteOptions { auth_required: Some(true), role_required: None },
        Endpoints::new().get(whoami()),
    )?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    let (user_id, token) = login(&client, &server.base_url, "alice", "secret").await?;
    let before_auth = auth_calls.load(Ordering::SeqCst);
    let before_action = action_calls.load(Ordering::SeqCst);
    let before_return = return_calls.load(Ordering::SeqCst);

    let res = client
        .get(format!("{}/api/me", server.base_url))
        .header("X-User-Id", &user_id)
        .header("X-Auth-Token", &token)
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    assert_eq!(auth_calls.load(Ordering::SeqCst) - before_auth, 1);
    assert_eq!(action_calls.load(Ordering::SeqCst) - before_action, 1);
    assert_eq!(return_calls.load(Ordering::SeqCst) - before_return, 1);
    Ok(())
}

#[tokio::test]
async fn on_auth_replacement_overrides_the_resolver() -> Result<()> {
    let (_store, users, _items) = common::collections();

    let hooks = Hooks {
        on_auth: Some(Arc::new(|ctx: &crest::RequestContext, _result: &AuthResult| {
            // A service header vouches for the request regardless of tokens.
            if ctx.header("x-service-key") == Some("letmein") {
                Some(AuthResult::Granted {
                    user: json!({"_id": "service"}),
                    user_id: "service".to_string(),
                })
            } else {
                None
            }
        })),
        ..Default::default()
    };

    let config = ApiConfig { use_default_auth: true, hooks, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_route(
        "me",
        RouteOptions { auth_required: Some(true), role_required: None },
        Endpoints::new().get(whoami()),
    )?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/api/me", server.base_url))
        .header("X-Service-Key", "letmein")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["data"]["userId"], "service");
    Ok(())
}

#[tokio::test]
async fn on_return_replacement_substitutes_the_outcome() -> Result<()> {
    let (_store, users, _items) = common::collections();

    let hooks = Hooks {
        on_return: Some(Arc::new(|_ctx: &crest::RequestContext, _outcome: &Outcome| {
            Some(Outcome::ok(Envelope::success(json!({"replaced": true}))))
        })),
        ..Default::default()
    };

    let config = ApiConfig { hooks, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_route(
        "ping",
        RouteOptions::default(),
        Endpoints::new().get(action(|_ctx| async {
            Ok(Outcome::ok(Envelope::success(json!({"replaced": false}))))
        })),
    )?;
    let server = common::spawn(api).await?;

    let res = reqwest::get(format!("{}/api/ping", server.base_url)).await?;
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["data"]["replaced"], true);
    Ok(())
}

#[tokio::test]
async fn slow_responses_do_not_block_other_requests() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let config = ApiConfig { use_default_auth: true, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_route(
        "me",
        RouteOptions { auth_required: Some(true), role_required: None },
        Endpoints::new().get(whoami()),
    )?;
    api.add_route(
        "ping",
        RouteOptions::default(),
        Endpoints::new().get(action(|_ctx| async {
            Ok(Outcome::ok(Envelope::success(json!({"pong": true}))))
        })),
    )?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    // Start a request that will sit in the 401 delay, then check that an
    // unauthenticated public route answers immediately.
    let delayed = {
        let client = client.clone();
        let url = format!("{}/api/me", server.base_url);
        tokio::spawn(async move { client.get(url).send().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    let res = client.get(format!("{}/api/ping", server.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(started.elapsed() < Duration::from_millis(400), "public route was delayed");

    let delayed = delayed.await??;
    assert_eq!(delayed.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}
