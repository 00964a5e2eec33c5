mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;

use crest::{action, Api, ApiConfig, Endpoints, Envelope, Outcome, RoleSpec, RouteOptions};

// Route registration surface: allowed/rejected methods, duplicate paths,
// the default OPTIONS endpoint, path normalization, manual completion.

fn ping() -> crest::EndpointSpec {
    action(|_ctx| async { Ok(Outcome::ok(Envelope::success(json!({"pong": true})))) })
}

#[tokio::test]
async fn unconfigured_methods_answer_405_with_allow_header() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;
    api.add_route("ping", RouteOptions::default(), Endpoints::new().get(ping()))?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    for method in [reqwest::Method::POST, reqwest::Method::PUT, reqwest::Method::DELETE] {
        let res = client
            .request(method.clone(), format!("{}/api/ping", server.base_url))
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED, "method: {method}");

        let allow = res
            .headers()
            .get("allow")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert_eq!(allow, "GET, OPTIONS");

        let payload = res.json::<serde_json::Value>().await?;
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["message"], "API endpoint does not exist");
    }

    let res = client.get(format!("{}/api/ping", server.base_url)).send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn duplicate_paths_are_rejected_at_registration() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;
    api.add_route("ping", RouteOptions::default(), Endpoints::new().get(ping()))?;

    let second = api.add_route("ping", RouteOptions::default(), Endpoints::new().post(ping()));
    assert!(second.is_err(), "second registration at the same path must fail");
    Ok(())
}

#[tokio::test]
async fn role_requirement_without_provider_is_a_config_error() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;

    let result = api.add_route(
        "secure",
        RouteOptions { auth_required: None, role_required: Some(RoleSpec::one("admin")) },
        Endpoints::new().get(ping()),
    );
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn default_options_endpoint_advertises_cors() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;
    api.add_route("ping", RouteOptions::default(), Endpoints::new().get(ping()))?;
    let server = common::spawn(api).await?;
    let client = reqwest::Client::new();

    let res = client
        .request(reqwest::Method::OPTIONS, format!("{}/api/ping", server.base_url))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let origin = res
        .headers()
        .get("access-control-allow-origin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert_eq!(origin, "*");
    Ok(())
}

#[tokio::test]
async fn cors_headers_ride_on_every_response() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;
    api.add_route("ping", RouteOptions::default(), Endpoints::new().get(ping()))?;
    let server = common::spawn(api).await?;

    let res = reqwest::get(format!("{}/api/ping", server.base_url)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("access-control-allow-origin").is_some());
    Ok(())
}

#[tokio::test]
async fn base_path_and_version_shape_the_url() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let config = ApiConfig {
        api_path: "/rest".to_string(),
        version: Some("v1".to_string()),
        ..Default::default()
    };
    let mut api = Api::new(config, users)?;
    api.add_route("ping", RouteOptions::default(), Endpoints::new().get(ping()))?;
    let server = common::spawn(api).await?;

    let res = reqwest::get(format!("{}/rest/v1/ping", server.base_url)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn manual_completion_ends_the_response_unencoded() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;
    api.add_route(
        "raw",
        RouteOptions::default(),
        Endpoints::new().get(action(|ctx| async move {
            ctx.done();
            Ok(Outcome::ok(Envelope::success(json!({"ignored": true}))))
        })),
    )?;
    let server = common::spawn(api).await?;

    let res = reqwest::get(format!("{}/api/raw", server.base_url)).await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.bytes().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn action_errors_become_structured_responses() -> Result<()> {
    let (_store, users, _items) = common::collections();
    let mut api = Api::new(ApiConfig::default(), users)?;
    api.add_route(
        "boom",
        RouteOptions::default(),
        Endpoints::new().get(action(|_ctx| async {
            Err::<Outcome, _>(crest::ApiError::not_found("no such thing"))
        })),
    )?;
    let server = common::spawn(api).await?;

    let res = reqwest::get(format!("{}/api/boom", server.base_url)).await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let payload = res.json::<serde_json::Value>().await?;
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["message"], "no such thing");
    Ok(())
}
