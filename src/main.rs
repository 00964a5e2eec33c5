use std::sync::Arc;

use serde_json::json;
use tower_http::trace::TraceLayer;

use crest::{
    Api, ApiConfig, BcryptVerifier, Collection, CollectionOptions, MemoryStore, Password,
    PasswordVerifier,
};

// Demo server: an in-memory store with one seeded user (demo / password) and
// an `items` collection exposed under /api/.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up PORT, APP_ENV, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = Arc::new(MemoryStore::new());
    let users = Collection::new(store.clone(), "users");
    let items = Collection::new(store.clone(), "items");
    seed_demo_data(&users, &items).await?;

    let config = ApiConfig { use_default_auth: true, ..Default::default() };
    let mut api = Api::new(config, users)?;
    api.add_collection(items, CollectionOptions::default())?;

    let app = api.into_router().layer(TraceLayer::new_for_http());

    // Allow deployments to override the port via env
    let port = std::env::var("CREST_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(3000);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("crest demo server listening on http://{bind_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn seed_demo_data(users: &Collection, items: &Collection) -> anyhow::Result<()> {
    let verifier = BcryptVerifier::default();
    let password_hash = verifier.hash(&Password::Plain("password".to_string()))?;

    users
        .insert(json!({
            "_id": "demo-user",
            "username": "demo",
            "emails": [{"address": "demo@example.com", "verified": true}],
            "services": {"password": {"bcrypt": password_hash}},
            "profile": {"name": "Demo User"}
        }))
        .await?;

    items.insert(json!({"name": "widget", "count": 10})).await?;
    items.insert(json!({"name": "gadget", "count": 3})).await?;
    Ok(())
}
