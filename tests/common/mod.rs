#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crest::{Api, BcryptVerifier, Collection, MemoryStore, Password, PasswordVerifier};

pub struct TestServer {
    pub base_url: String,
}

/// Serve a finished registry on an OS-assigned port and return its base URL.
pub async fn spawn(api: Api) -> Result<TestServer> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, api.into_router()).await {
            eprintln!("test server exited: {e}");
        }
    });

    Ok(TestServer { base_url: format!("http://{addr}") })
}

/// An in-memory store with `users` and `items` collection handles.
pub fn collections() -> (Arc<MemoryStore>, Collection, Collection) {
    let store = Arc::new(MemoryStore::new());
    let users = Collection::new(store.clone(), "users");
    let items = Collection::new(store.clone(), "items");
    (store, users, items)
}

/// Seed a user with a working password credential. A low bcrypt cost keeps
/// tests fast; verification reads the cost from the hash.
pub async fn seed_user(users: &Collection, id: &str, username: &str, password: &str) -> Result<()> {
    let verifier = BcryptVerifier::with_cost(4);
    let password_hash = verifier.hash(&Password::Plain(password.to_string()))?;

    users
        .insert(json!({
            "_id": id,
            "username": username,
            "emails": [{"address": format!("{username}@example.com"), "verified": true}],
            "services": {"password": {"bcrypt": password_hash}},
            "profile": {"name": username}
        }))
        .await?;
    Ok(())
}
