//! Test helpers for zonegate tests.
//!
//! Provides in-memory application state and router builders, plus small
//! utilities for driving the login flow from `oneshot` requests.

use crate::auth::directory::DirectoryAuthenticator;
use crate::auth::policy;
use crate::auth::session::SessionManager;
use crate::config::Config;
use crate::dns::{DnsProvider, MemoryProvider, RecordSet, Zone, ZoneService};
use crate::store::{MemoryStore, Role, Store};
use crate::{ui, AppState};
use std::collections::HashMap;
use std::sync::Arc;

/// Create a minimal AppState for testing.
///
/// Uses the in-memory store and provider, seeded with one zone and one
/// record, no directory.
pub async fn create_test_app_state() -> AppState {
    create_test_app_state_with_directory(None).await
}

/// Create a test AppState with an optional directory authenticator.
pub async fn create_test_app_state_with_directory(
    directory: Option<Arc<dyn DirectoryAuthenticator>>,
) -> AppState {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());

    let provider = Arc::new(MemoryProvider::new());
    provider.add_zone(
        Zone {
            id: "Z1".to_string(),
            name: "example.com.".to_string(),
            ..Default::default()
        },
        vec![RecordSet {
            name: "www.example.com.".to_string(),
            rtype: "A".to_string(),
            ttl: 300,
            values: vec!["192.0.2.10".to_string()],
            ..Default::default()
        }],
    );
    let provider: Arc<dyn DnsProvider> = provider;

    let sessions = Arc::new(
        SessionManager::new(store.clone())
            .await
            .expect("session manager over a fresh memory store"),
    );
    let zones = Arc::new(ZoneService::new(
        provider,
        store.clone(),
        HashMap::new(),
    ));

    AppState {
        config: Arc::new(Config::default()),
        store,
        sessions,
        directory,
        zones,
        templates: Arc::new(ui::build_env()),
    }
}

/// Create a user with a hashed password directly in the state's store.
pub async fn seed_user(state: &AppState, username: &str, password: &str, role: Role) {
    let hash = policy::hash_password(password).expect("argon2 hash");
    state
        .store
        .create_user(username, &hash, role)
        .await
        .expect("seed user");
}

/// Issue a session for a user, returning the `Cookie` header value and
/// the CSRF token.
pub async fn seed_session(state: &AppState, username: &str) -> (String, String) {
    let (signed, csrf) = state
        .sessions
        .issue(username)
        .await
        .expect("issue session");
    (
        format!("{}={}", crate::auth::SESSION_COOKIE, signed),
        csrf,
    )
}

/// Create a test router over fresh in-memory state.
pub async fn create_test_router() -> (axum::Router, AppState) {
    let state = create_test_app_state().await;
    (crate::router(state.clone()), state)
}
