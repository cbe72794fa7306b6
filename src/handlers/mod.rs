//! HTTP handlers for the console pages and form submissions.

pub mod admin;
pub mod auth;
pub mod records;
pub mod setup;
pub mod zones;

use crate::store::{AuditEntry, Store};
use axum::http::HeaderMap;
use std::sync::Arc;
use tracing::warn;

/// Extract the client IP for audit entries: first `X-Forwarded-For` hop,
/// then `X-Real-IP`. Empty when neither header is present (direct
/// connections behind no proxy are not resolved here).
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let ip = first.trim();
            if !ip.is_empty() {
                return ip.to_string();
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let ip = real_ip.trim();
        if !ip.is_empty() {
            return ip.to_string();
        }
    }
    String::new()
}

/// Write an audit entry; failures are logged and never surfaced.
pub(crate) async fn audit(store: &Arc<dyn Store>, entry: AuditEntry) {
    if let Err(e) = store.log_audit(&entry).await {
        warn!("Failed to write audit entry for '{}': {}", entry.action, e);
    }
}

/// The role string shown to the layout; empty when the user record cannot
/// be resolved.
pub(crate) async fn role_of(store: &Arc<dyn Store>, username: &str) -> String {
    match store.get_user_by_username(username).await {
        Ok(Some(user)) => user.role.as_str().to_string(),
        _ => String::new(),
    }
}
